//! Memory-management syscalls

use crate::error::{Errno, ENONE};
use crate::kernel::Kernel;
use crate::mm::page_table::{map_region, unmap_region};
use crate::mm::{PageFlags, VirtAddr, FRAME_ALLOCATOR};

/// `mmap(ptr, size, flags)`: back `[ptr, ptr + size)` with fresh frames.
/// User accessibility is forced on whatever flags the caller passed.
pub fn sys_mmap(kernel: &mut Kernel, ptr: u64, size: u64, flags: u64) {
    let frame = match FRAME_ALLOCATOR.lock().reserve(size as usize) {
        Ok(frame) => frame,
        Err(_) => {
            kernel.set_caller_return(Errno::NoMem.code() as u64);
            return;
        }
    };
    let flags = PageFlags::from_bits_truncate(flags as u32) | PageFlags::USER;
    match map_region(VirtAddr::new(ptr), size as usize, frame, flags) {
        Ok(()) => kernel.set_caller_return(ENONE),
        Err(e) => {
            FRAME_ALLOCATOR.lock().free(frame);
            kernel.set_caller_return(e.code() as u64);
        }
    }
}

/// `munmap(ptr, size)`: clear the page entries. The underlying frames are
/// the caller's to free.
pub fn sys_munmap(kernel: &mut Kernel, ptr: u64, size: u64) {
    unmap_region(VirtAddr::new(ptr), size as usize);
    kernel.set_caller_return(ENONE);
}
