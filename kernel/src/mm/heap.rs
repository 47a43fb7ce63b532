//! Kernel heap
//!
//! A free-list allocator (first-fit with coalescing, courtesy of
//! `linked_list_allocator`) over the region boot hands it, wrapped so that
//! exhaustion reserves fresh frames, maps them contiguously past the
//! current heap end, and retries. Registered as the global allocator on
//! bare metal; host builds use the system allocator instead.

use core::alloc::{GlobalAlloc, Layout};

use linked_list_allocator::Heap;
use spin::Mutex;

use super::frame_allocator::FRAME_ALLOCATOR;
use super::page_table::map_region;
use super::{PageFlags, VirtAddr, PAGE_SIZE};

/// Minimum growth step, to keep fault-driven growth from thrashing the
/// page allocator one page at a time.
const GROW_MIN: usize = 1 << 20;

/// The growable kernel heap.
pub struct KernelHeap {
    inner: Mutex<Heap>,
}

impl KernelHeap {
    pub const fn empty() -> Self {
        Self {
            inner: Mutex::new(Heap::empty()),
        }
    }

    /// Hand the heap its initial region.
    ///
    /// # Safety
    ///
    /// `[start, start + size)` must be mapped, writable, unused memory
    /// reserved for the heap for the kernel's lifetime.
    pub unsafe fn init(&self, start: *mut u8, size: usize) {
        // SAFETY: forwarded to the caller's contract.
        unsafe { self.inner.lock().init(start, size) };
    }

    /// Reserve frames and map them right after the current heap top, then
    /// extend the free list over them. Returns false when physical memory
    /// is exhausted.
    fn grow(&self, needed: usize) -> bool {
        let bytes = needed
            .max(GROW_MIN)
            .next_multiple_of(PAGE_SIZE);
        let frame = match FRAME_ALLOCATOR.lock().reserve(bytes) {
            Ok(frame) => frame,
            Err(_) => return false,
        };
        // The allocator rounds reservations up to a power-of-two block;
        // claim what was actually granted.
        let granted = bytes.next_power_of_two();

        let mut inner = self.inner.lock();
        let top = inner.top() as u64;
        if map_region(VirtAddr::new(top), granted, frame, PageFlags::RW).is_err() {
            FRAME_ALLOCATOR.lock().free(frame);
            return false;
        }
        // SAFETY: the region just mapped sits immediately after the heap's
        // current top and belongs to the heap from here on.
        unsafe { inner.extend(granted) };
        true
    }

    /// Current heap statistics: (used, free) bytes.
    pub fn stats(&self) -> (usize, usize) {
        let inner = self.inner.lock();
        (inner.used(), inner.free())
    }
}

// SAFETY: all mutation happens under the spin lock; growth maps fresh
// frames owned exclusively by the heap.
unsafe impl GlobalAlloc for KernelHeap {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        if let Ok(block) = self.inner.lock().allocate_first_fit(layout) {
            return block.as_ptr();
        }
        if !self.grow(layout.size() + layout.align()) {
            return core::ptr::null_mut();
        }
        self.inner
            .lock()
            .allocate_first_fit(layout)
            .map(|b| b.as_ptr())
            .unwrap_or(core::ptr::null_mut())
    }

    unsafe fn dealloc(&self, ptr: *mut u8, layout: Layout) {
        if let Some(ptr) = core::ptr::NonNull::new(ptr) {
            // SAFETY: `ptr` came from `alloc` with the same layout.
            unsafe { self.inner.lock().deallocate(ptr, layout) };
        }
    }
}

/// The kernel's global allocator. Boot calls [`init_heap`] before the
/// first allocation; host builds fall back to the system allocator.
#[cfg_attr(all(target_arch = "aarch64", target_os = "none"), global_allocator)]
pub static KERNEL_HEAP: KernelHeap = KernelHeap::empty();

/// Initialize the global heap over `[start, start + size)`.
///
/// # Safety
///
/// See [`KernelHeap::init`]; additionally this must be called exactly once,
/// before any allocation.
pub unsafe fn init_heap(start: *mut u8, size: usize) {
    // SAFETY: forwarded to the caller's contract.
    unsafe { KERNEL_HEAP.init(start, size) };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn growth_sizing_rounds_sensibly() {
        // The minimum step dominates small requests.
        assert!(GROW_MIN % PAGE_SIZE == 0);
        let needed = 100usize;
        let bytes = needed.max(GROW_MIN).next_multiple_of(PAGE_SIZE);
        assert_eq!(bytes, GROW_MIN);
        // Large requests round up to whole pages.
        let needed = GROW_MIN + 1;
        let bytes = needed.max(GROW_MIN).next_multiple_of(PAGE_SIZE);
        assert_eq!(bytes % PAGE_SIZE, 0);
        assert!(bytes > GROW_MIN);
    }
}
