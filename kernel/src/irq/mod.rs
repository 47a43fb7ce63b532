//! Interrupt and exception dispatch
//!
//! One vector table, installed at boot. IRQs are decoded by polling the
//! controller's pending registers and routed through a 256-slot handler
//! table that drivers populate late. Synchronous exceptions split three
//! ways: SVCs into the syscall dispatcher, EL1 data aborts into the
//! demand-fill path, everything else into log-and-halt.
//!
//! The kernel is non-reentrant: interrupts stay masked from vector entry
//! until the stub returns to user mode, so all handler work runs
//! single-threaded.

#![allow(dead_code)]

use spin::Mutex;

use crate::arch::aarch64::mmio;
use crate::kernel::Kernel;

/// Number of late-bound handler slots.
pub const HANDLER_COUNT: usize = 256;

/// Implemented by drivers that service hardware interrupts. One handler
/// per source; a driver may register for several sources.
pub trait InterruptHandler: Sync {
    fn handle_interrupt(&self, source: u32, kernel: &mut Kernel);
}

struct HandlerTable {
    handlers: [Option<&'static dyn InterruptHandler>; HANDLER_COUNT],
}

static HANDLERS: Mutex<HandlerTable> = Mutex::new(HandlerTable {
    handlers: [None; HANDLER_COUNT],
});

/// Bind `handler` to interrupt `source`, replacing any previous binding.
pub fn insert_handler(source: u32, handler: &'static dyn InterruptHandler) {
    if (source as usize) < HANDLER_COUNT {
        HANDLERS.lock().handlers[source as usize] = Some(handler);
    }
}

/// Invoke the handler bound to `source`, if any.
pub fn call_handler(source: u32, kernel: &mut Kernel) {
    let handler = HANDLERS
        .lock()
        .handlers
        .get(source as usize)
        .copied()
        .flatten();
    if let Some(handler) = handler {
        handler.handle_interrupt(source, kernel);
    }
}

/// Install the vector table and unmask the interrupt sources the kernel
/// services (timer channel 1, UART) at the controller. CPU-side interrupts
/// stay masked; user-mode SPSR values unmask them on exception return.
#[cfg(all(target_arch = "aarch64", target_os = "none"))]
pub fn init() {
    use crate::arch::aarch64::{sysreg, vectors};

    // SAFETY: taking the address of the vector table symbol.
    sysreg::set_vbar_el1(unsafe { &vectors::vector_table_el1 as *const _ as u64 });
    sysreg::mask_interrupts();

    // SAFETY: interrupt-controller registers inside the mapped peripheral
    // window.
    unsafe {
        mmio::mmio_write(mmio::IRQ_ENABLE_BASIC, 0x8_0002);
        mmio::mmio_write(mmio::IRQ_ENABLE_1, 0x0000_0002);
        mmio::mmio_write(mmio::IRQ_ENABLE_2, 0x0200_0000);
    }
}

#[cfg(not(all(target_arch = "aarch64", target_os = "none")))]
pub fn init() {}

/// Decode the highest-priority pending interrupt: bank 1, then bank 2,
/// then the basic register; lowest set bit wins within a bank.
pub fn find_irq_source() -> Option<u32> {
    // SAFETY: pending registers inside the mapped peripheral window (host
    // reads float zero).
    unsafe {
        let pending1 = mmio::mmio_read(mmio::IRQ_PENDING_1);
        if pending1 != 0 {
            return Some(pending1.trailing_zeros());
        }
        let pending2 = mmio::mmio_read(mmio::IRQ_PENDING_2);
        if pending2 != 0 {
            return Some(32 + pending2.trailing_zeros());
        }
        let basic = mmio::mmio_read(mmio::IRQ_BASIC_PENDING) & 255;
        if basic != 0 {
            return Some(basic.trailing_zeros());
        }
    }
    None
}

/// Service a decoded IRQ: park the interrupted context on the current
/// process, run the driver handler (which may reschedule), and hand back
/// the context of whoever should run next.
pub fn handle_irq(source: Option<u32>, kernel: &mut Kernel, ctx: &crate::arch::aarch64::Context) {
    if let Some(process) = kernel.active_process() {
        process.store_context(ctx);
    }
    if let Some(source) = source {
        call_handler(source, kernel);
    }
}

// ---------------------------------------------------------------------------
// Vector-table entry points (called from the assembly stubs)
// ---------------------------------------------------------------------------

#[cfg(all(target_arch = "aarch64", target_os = "none"))]
mod entry {
    use super::*;
    use crate::arch::aarch64::syndrome::{DataAbortSyndrome, ExceptionClass};
    use crate::arch::aarch64::{sysreg, Context};
    use crate::kernel::KERNEL;
    use crate::mm::demand_paging;

    /// IRQ vector: decode, dispatch, return the context to resume.
    #[no_mangle]
    extern "C" fn vector_irq(ctx: *mut Context) -> *mut Context {
        let source = find_irq_source();
        let mut kernel = KERNEL.lock();
        let kernel = &mut *kernel;
        // SAFETY: the stub passes the context frame it just spilled.
        handle_irq(source, kernel, unsafe { &*ctx });
        match kernel.active_process() {
            Some(process) => process.context_mut() as *mut Context,
            None => ctx,
        }
    }

    /// Synchronous-exception vector: syscalls, demand fill, fatal faults.
    #[no_mangle]
    extern "C" fn vector_sync(ctx: *mut Context) -> *mut Context {
        let esr = sysreg::get_esr_el1();
        let far = sysreg::get_far_el1();

        match ExceptionClass::from_esr(esr) {
            Some(ExceptionClass::SvcAarch64) | Some(ExceptionClass::SvcAarch32) => {
                // SAFETY: the stub passes the spilled context frame; the
                // userspace convention places the id in x0 and the
                // arguments in x1-x4.
                let (id, args) = unsafe {
                    let c = &*ctx;
                    (
                        c.gp_regs[0],
                        [c.gp_regs[1], c.gp_regs[2], c.gp_regs[3], c.gp_regs[4]],
                    )
                };
                crate::syscall::do_syscall(id, args[0], args[1], args[2], args[3], ctx)
            }
            Some(ExceptionClass::DataAbortEl1) => {
                match DataAbortSyndrome::from_esr(esr) {
                    Some(syndrome) => demand_paging::handle_page_fault(syndrome, far),
                    None => {
                        log::error!(
                            "undecodable EL1 data abort, ESR = {:#x}, FAR = {:#018x}",
                            esr,
                            far
                        );
                        crate::arch::halt();
                    }
                }
                ctx
            }
            Some(class) => {
                log::error!("unhandled {:?}, FAR_EL1 = {:#018x}", class, far);
                crate::arch::halt();
            }
            None => {
                log::error!("unimplemented exception class, ESR = {:#x}", esr);
                crate::arch::halt();
            }
        }
    }

    /// Vector slots that should never fire.
    #[no_mangle]
    extern "C" fn vector_invalid(esr: u64, elr: u64) -> ! {
        log::error!("exception from invalid vector, ESR = {:#x}, ELR = {:#018x}", esr, elr);
        crate::arch::halt();
    }
}
