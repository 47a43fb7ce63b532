//! Demand-paged translation-table fill
//!
//! The loopback windows make table edits plain stores, so the first store
//! into a region whose intermediate tables do not exist yet takes a
//! translation fault. Those faults, and only those (write translation
//! faults whose address falls inside one of the table windows), are repaired
//! here by allocating the missing tables top-down. Every other data abort is
//! fatal.

#[cfg(all(target_arch = "aarch64", target_os = "none"))]
use super::frame_allocator::FRAME_ALLOCATOR;
use super::page_table::{KERNEL_TABLES, USER_TABLES};
#[cfg(all(target_arch = "aarch64", target_os = "none"))]
use super::page_table::PageTableEntry;
#[cfg(all(target_arch = "aarch64", target_os = "none"))]
use super::PAGE_SIZE;
use crate::arch::aarch64::syndrome::DataAbortSyndrome;

/// Where a faulting address lands, and therefore what repair applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultPlan {
    /// Fill missing tables for the window at `target_level`, with the
    /// fault's offset into that window.
    Fill { target_level: usize, offset: u64 },
    /// Not repairable.
    Fatal,
    /// Null dereference, reported separately.
    NullPointer,
}

/// Classify a faulting address against the table windows.
///
/// The windows of each half are laid out in descending address order
/// (top-table page, 2 MiB-level window, page-level window), so the first
/// base at or below the address decides. Faults on the top-table page
/// itself mean the loopback entry is gone and cannot be self-healed.
pub fn classify_fault(far: u64) -> FaultPlan {
    for tables in [&KERNEL_TABLES, &USER_TABLES] {
        if far >= tables[0] {
            return FaultPlan::Fatal;
        }
        if far >= tables[1] {
            return FaultPlan::Fill {
                target_level: 1,
                offset: far - tables[1],
            };
        }
        if far >= tables[2] {
            return FaultPlan::Fill {
                target_level: 2,
                offset: far - tables[2],
            };
        }
    }
    if far == 0 {
        return FaultPlan::NullPointer;
    }
    FaultPlan::Fatal
}

/// First window level whose entry is missing, given the translation level
/// the hardware walk faulted at (1–3).
pub fn fill_start(fault_level: usize, target_level: usize) -> usize {
    (target_level + fault_level).saturating_sub(4)
}

/// Index into the level-`i` window of the entry that backs `offset` within
/// the level-`target_level` window.
pub fn fill_index(offset: u64, target_level: usize, i: usize) -> usize {
    (offset >> (12 + 9 * (target_level - i - 1))) as usize
}

/// Allocate and install the tables missing for a faulting store at `far`.
///
/// Walks window levels from the shallowest absent one down to
/// `target_level - 1`, reserving one frame per level. Runs with the fault
/// still pending; out of memory here is unrecoverable.
#[cfg(all(target_arch = "aarch64", target_os = "none"))]
pub fn fill_translation_table(fault_level: usize, target_level: usize, offset: u64, far: u64) {
    let tables = if far >= super::page_table::HIGH_MEM_BASE {
        &KERNEL_TABLES
    } else {
        &USER_TABLES
    };
    for i in fill_start(fault_level, target_level)..target_level {
        let index = fill_index(offset, target_level, i);
        let frame = match FRAME_ALLOCATOR.lock().reserve(PAGE_SIZE) {
            Ok(frame) => frame,
            Err(_) => {
                log::error!("out of memory while allocating a translation table");
                crate::arch::halt();
            }
        };
        let entry = (tables[i] + index as u64 * 8) as *mut PageTableEntry;
        // SAFETY: the governing entries for window level `i` were installed
        // by the previous iterations (or were already present), so this
        // store lands in a mapped table page.
        unsafe { entry.write_volatile(PageTableEntry::table_descriptor(frame)) };
        // SAFETY: TLB maintenance has no memory preconditions.
        unsafe {
            core::arch::asm!("dsb ish", "tlbi vmalle1", "dsb ish", "isb", options(nostack));
        }
    }
}

/// Handle an EL1 data abort.
///
/// Write translation faults at levels 1–3 inside a table window are
/// repaired; everything else halts.
#[cfg(all(target_arch = "aarch64", target_os = "none"))]
pub fn handle_page_fault(syndrome: DataAbortSyndrome, far: u64) {
    use crate::arch::aarch64::syndrome::DataAbortStatus;

    let level = match syndrome.status {
        DataAbortStatus::TranslateFault1
        | DataAbortStatus::TranslateFault2
        | DataAbortStatus::TranslateFault3 => syndrome.status as usize & 3,
        other => {
            log::error!("unhandled page fault ({:?}), FAR_EL1 = {:#018x}", other, far);
            crate::arch::halt();
        }
    };

    if !syndrome.write {
        log::error!(
            "unhandled read translation fault (level {}), FAR_EL1 = {:#018x}",
            level,
            far
        );
        crate::arch::halt();
    }

    match classify_fault(far) {
        FaultPlan::Fill {
            target_level,
            offset,
        } => fill_translation_table(level, target_level, offset, far),
        FaultPlan::NullPointer => {
            log::error!("null pointer exception");
            crate::arch::halt();
        }
        FaultPlan::Fatal => {
            log::error!(
                "unhandled translation fault (level {}), FAR_EL1 = {:#018x}",
                level,
                far
            );
            crate::arch::halt();
        }
    }
}

#[cfg(not(all(target_arch = "aarch64", target_os = "none")))]
pub fn handle_page_fault(_syndrome: DataAbortSyndrome, _far: u64) {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mm::page_table::{HIGH_MEM_BASE, USER_SPACE_TOP};

    #[test]
    fn table_windows_fill_everything_else_is_fatal() {
        // Plain data addresses are never repaired.
        assert_eq!(classify_fault(0x1000_0000), FaultPlan::Fatal);
        assert_eq!(classify_fault(HIGH_MEM_BASE + 0x1000), FaultPlan::Fatal);
        // Null dereference is reported as such.
        assert_eq!(classify_fault(0), FaultPlan::NullPointer);
        // Top-table pages cannot self-heal.
        assert_eq!(classify_fault(USER_TABLES[0]), FaultPlan::Fatal);
        assert_eq!(classify_fault(KERNEL_TABLES[0] + 8), FaultPlan::Fatal);

        assert_eq!(
            classify_fault(USER_TABLES[2]),
            FaultPlan::Fill {
                target_level: 2,
                offset: 0
            }
        );
        assert_eq!(
            classify_fault(USER_TABLES[1] + 0x3000),
            FaultPlan::Fill {
                target_level: 1,
                offset: 0x3000
            }
        );
        assert_eq!(
            classify_fault(KERNEL_TABLES[2] + 0x123000),
            FaultPlan::Fill {
                target_level: 2,
                offset: 0x123000
            }
        );
    }

    #[test]
    fn fill_range_depends_on_fault_depth() {
        // Deepest-level fault against the page-table window: only the
        // 2 MiB-level entry is missing.
        assert_eq!(fill_start(3, 2), 1);
        // Shallower fault: both the top entry and the 2 MiB entry must be
        // created.
        assert_eq!(fill_start(2, 2), 0);
        // Faults against the 2 MiB-level window only ever need the top
        // entry.
        assert_eq!(fill_start(3, 1), 0);
    }

    #[test]
    fn fill_indices_address_the_governing_entries() {
        // A page-table-window page at offset `o` describes the 2 MiB region
        // starting at (o >> 12) << 21; its top-level entry index is o >> 21
        // and its 2 MiB-level window index is o >> 12.
        let offset = 0x1234_5000u64;
        assert_eq!(fill_index(offset, 2, 0), (offset >> 21) as usize);
        assert_eq!(fill_index(offset, 2, 1), (offset >> 12) as usize);
        // A 2 MiB-window page at offset `o` is the table of the 1 GiB
        // region numbered o >> 12.
        assert_eq!(fill_index(offset, 1, 0), (offset >> 12) as usize);
    }

    #[test]
    fn loopback_identity_for_fill_targets() {
        // The table window occupies the loopback gigabyte, so the walk's
        // 2 MiB-level entry for a page-table-window address resolves into
        // the top-table page, the very slot the fill path writes at window
        // level 0. Same aliasing, seen from two directions.
        use crate::mm::page_table::entry_address;
        use crate::mm::VirtAddr;

        let offset = 0x40_2000u64;
        let far = USER_TABLES[2] + offset;
        assert!(far < USER_SPACE_TOP);

        let via_fill = USER_TABLES[0] + fill_index(offset, 2, 0) as u64 * 8;
        let via_walk = entry_address(1, VirtAddr::new(far)).unwrap();
        assert_eq!(via_fill, via_walk);
    }
}
