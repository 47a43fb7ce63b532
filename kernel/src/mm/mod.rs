//! Memory management
//!
//! Physical frames come from the buddy [`frame_allocator`]; virtual mappings
//! are edited through the loopback-mapped translation tables in
//! [`page_table`], with missing intermediate tables filled on demand by
//! [`demand_paging`]. [`address_space`] ties a top-level table and an ASID
//! into a shared handle, and [`heap`] provides the kernel's dynamic
//! allocation on top of the frame allocator.

pub mod address_space;
pub mod demand_paging;
pub mod frame_allocator;
pub mod heap;
pub mod memory_map;
pub mod page_table;

pub use address_space::AddressSpace;
pub use frame_allocator::{PageAllocator, FRAME_ALLOCATOR};
pub use memory_map::{MemoryMap, MemoryRegion, MemoryType};

use bitflags::bitflags;

/// Size in bytes of a single page, the smallest mappable granule.
pub const PAGE_SIZE: usize = 4096;

/// Physical memory address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct PhysAddr(u64);

impl PhysAddr {
    pub const fn new(addr: u64) -> Self {
        Self(addr)
    }

    pub const fn as_u64(&self) -> u64 {
        self.0
    }

    pub const fn as_usize(&self) -> usize {
        self.0 as usize
    }

    pub const fn offset(&self, offset: u64) -> Self {
        Self(self.0 + offset)
    }

    pub const fn is_null(&self) -> bool {
        self.0 == 0
    }
}

/// Virtual memory address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct VirtAddr(u64);

impl VirtAddr {
    pub const fn new(addr: u64) -> Self {
        Self(addr)
    }

    pub const fn as_u64(&self) -> u64 {
        self.0
    }

    pub const fn as_usize(&self) -> usize {
        self.0 as usize
    }

    pub const fn offset(&self, offset: u64) -> Self {
        Self(self.0 + offset)
    }
}

bitflags! {
    /// Page permission flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct PageFlags: u32 {
        /// Page is writable (read-only when clear).
        const RW = 1 << 0;
        /// Page is accessible from user mode.
        const USER = 1 << 1;
        /// Page may contain executable code.
        const EXE = 1 << 2;
    }
}
