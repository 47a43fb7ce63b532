//! Address spaces
//!
//! A refcounted handle to a top-level translation table plus the ASID that
//! scopes its TLB entries. Sharing is by `Arc`: a process and all of its
//! clones hold the same handle until one of them execs. When the last
//! reference drops, the table frames of the user half are walked and
//! reclaimed (the frames *mapped by* those tables belong to whoever mapped
//! them and are not touched).

use alloc::sync::Arc;

use spin::Mutex;

use super::frame_allocator::FRAME_ALLOCATOR;
use super::page_table;
use super::{PhysAddr, PAGE_SIZE};
use crate::arch::aarch64::sysreg;
use crate::error::SysResult;

/// One user address space.
pub struct AddressSpace {
    frame: PhysAddr,
    asid: u16,
}

static NEXT_ASID: Mutex<u16> = Mutex::new(1);

impl AddressSpace {
    pub fn new(frame: PhysAddr, asid: u16) -> Self {
        Self { frame, asid }
    }

    pub fn table_frame(&self) -> PhysAddr {
        self.frame
    }

    pub fn asid(&self) -> u16 {
        self.asid
    }

    /// TTBR0 image: table frame with the ASID in the top byte pair.
    pub fn ttbr_value(&self) -> u64 {
        self.frame.as_u64() | (self.asid as u64) << 48
    }
}

/// Reserve and initialize a fresh top table and wrap it in a shared handle.
pub fn create_address_space() -> SysResult<Arc<AddressSpace>> {
    let frame = FRAME_ALLOCATOR.lock().reserve(PAGE_SIZE)?;
    page_table::initialize_top_table(frame);
    let asid = {
        let mut next = NEXT_ASID.lock();
        let asid = *next;
        *next = next.wrapping_add(1).max(1);
        asid
    };
    Ok(Arc::new(AddressSpace::new(frame, asid)))
}

/// Make `space` the active user half.
pub fn load_address_space(space: &AddressSpace) {
    sysreg::set_ttbr0_el1(space.ttbr_value());
}

impl Drop for AddressSpace {
    fn drop(&mut self) {
        destroy_tables(self.frame);
    }
}

/// Walk the user half of the space rooted at `top` through scratch
/// mappings and free every table frame, deepest first.
///
/// Runs only when the space is no longer loaded in TTBR0; the walk itself
/// uses kernel-half scratch pages, so the dying tables are never consulted
/// for translation.
#[cfg(all(target_arch = "aarch64", target_os = "none"))]
fn destroy_tables(top: PhysAddr) {
    use super::page_table::{
        clear_entry, get_page_frame, set_page_entry, PageTableEntry, SCRATCH_PAGE, TABLE_ENTRIES,
    };
    use super::{PageFlags, VirtAddr};

    // Two scratch windows: one for the top table, one for the level below.
    let top_window = VirtAddr::new(SCRATCH_PAGE);
    let mid_window = VirtAddr::new(SCRATCH_PAGE - PAGE_SIZE as u64);
    let saved_top = get_page_frame(top_window);
    let saved_mid = get_page_frame(mid_window);

    set_page_entry(0, top_window, top, PageFlags::RW);
    let top_table = SCRATCH_PAGE as *const PageTableEntry;
    // Skip the loopback slot; it references `top` itself.
    for i in 0..TABLE_ENTRIES - 1 {
        // SAFETY: the scratch window was just mapped onto the top table.
        let entry = unsafe { top_table.add(i).read_volatile() };
        if !entry.present() || !entry.is_table() {
            continue;
        }
        let mid_frame = entry.output_address();
        set_page_entry(0, mid_window, mid_frame, PageFlags::RW);
        let mid_table = mid_window.as_u64() as *const PageTableEntry;
        for j in 0..TABLE_ENTRIES {
            // SAFETY: the second scratch window was just mapped onto the
            // mid-level table.
            let leaf = unsafe { mid_table.add(j).read_volatile() };
            if leaf.present() && leaf.is_table() {
                FRAME_ALLOCATOR.lock().free(leaf.output_address());
            }
        }
        FRAME_ALLOCATOR.lock().free(mid_frame);
    }
    FRAME_ALLOCATOR.lock().free(top);

    // Restore the scratch windows.
    if saved_top.is_null() {
        clear_entry(0, top_window);
    } else {
        set_page_entry(0, top_window, saved_top, PageFlags::RW);
    }
    if saved_mid.is_null() {
        clear_entry(0, mid_window);
    } else {
        set_page_entry(0, mid_window, saved_mid, PageFlags::RW);
    }
}

#[cfg(not(all(target_arch = "aarch64", target_os = "none")))]
fn destroy_tables(_top: PhysAddr) {}
