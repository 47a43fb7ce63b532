//! System call dispatch
//!
//! Nineteen table-indexed entries. The stub stores the interrupted context
//! on the current process before dispatch; after the handler runs, the
//! current process, possibly a different one if the call rescheduled,
//! supplies the context returned to the stub. Every handler writes its
//! result into the caller's return register via
//! [`Kernel::set_caller_return`]; handlers that reschedule do so before
//! rescheduling.

mod filesystem;
mod memory;
mod process;
pub mod user;

use crate::arch::aarch64::Context;
use crate::error::Errno;
use crate::kernel::{Kernel, KERNEL};

/// Syscall identifiers, the userspace ABI.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u64)]
pub enum SyscallId {
    Printk = 0,
    Mmap = 1,
    Munmap = 2,
    Clone = 3,
    Terminate = 4,
    Exec = 5,
    Yield = 6,
    SigRaise = 7,
    SigRet = 8,
    SigWait = 9,
    SigAction = 10,
    Open = 11,
    Close = 12,
    Create = 13,
    Unlink = 14,
    Read = 15,
    Write = 16,
    FdDup = 17,
    CreatePipe = 18,
}

impl TryFrom<u64> for SyscallId {
    type Error = ();

    fn try_from(value: u64) -> Result<Self, ()> {
        Ok(match value {
            0 => Self::Printk,
            1 => Self::Mmap,
            2 => Self::Munmap,
            3 => Self::Clone,
            4 => Self::Terminate,
            5 => Self::Exec,
            6 => Self::Yield,
            7 => Self::SigRaise,
            8 => Self::SigRet,
            9 => Self::SigWait,
            10 => Self::SigAction,
            11 => Self::Open,
            12 => Self::Close,
            13 => Self::Create,
            14 => Self::Unlink,
            15 => Self::Read,
            16 => Self::Write,
            17 => Self::FdDup,
            18 => Self::CreatePipe,
            _ => return Err(()),
        })
    }
}

/// Route one syscall to its handler.
pub fn dispatch(kernel: &mut Kernel, id: u64, args: [u64; 4]) {
    let Ok(id) = SyscallId::try_from(id) else {
        kernel.set_caller_return(Errno::NoSys.code() as u64);
        return;
    };
    match id {
        SyscallId::Printk => filesystem::sys_printk(kernel, args[0]),
        SyscallId::Mmap => memory::sys_mmap(kernel, args[0], args[1], args[2]),
        SyscallId::Munmap => memory::sys_munmap(kernel, args[0], args[1]),
        SyscallId::Clone => {
            process::sys_clone(kernel, args[0], args[1], args[2], args[3])
        }
        SyscallId::Terminate => process::sys_terminate(kernel),
        SyscallId::Exec => process::sys_exec(kernel, args[0], args[1], args[2]),
        SyscallId::Yield => process::sys_yield(kernel),
        SyscallId::SigRaise => process::sys_sigraise(kernel, args[0], args[1]),
        SyscallId::SigRet => process::sys_sigret(kernel),
        SyscallId::SigWait => process::sys_sigwait(kernel),
        SyscallId::SigAction => {
            process::sys_sigaction(kernel, args[0], args[1], args[2], args[3])
        }
        SyscallId::Open => filesystem::sys_open(kernel, args[0], args[1]),
        SyscallId::Close => filesystem::sys_close(kernel, args[0]),
        SyscallId::Create => filesystem::sys_create(kernel, args[0], args[1]),
        SyscallId::Unlink => filesystem::sys_unlink(kernel, args[0]),
        SyscallId::Read => filesystem::sys_read(kernel, args[0], args[1], args[2]),
        SyscallId::Write => filesystem::sys_write(kernel, args[0], args[1], args[2]),
        SyscallId::FdDup => filesystem::sys_fddup(kernel, args[0], args[1]),
        SyscallId::CreatePipe => filesystem::sys_create_pipe(kernel, args[0]),
    }
}

/// Entry point called by the synchronous-exception stub for SVCs.
///
/// Stores the interrupted context, dispatches, and returns the context of
/// the process that should resume.
#[no_mangle]
pub extern "C" fn do_syscall(
    id: u64,
    a1: u64,
    a2: u64,
    a3: u64,
    a4: u64,
    ctx: *mut Context,
) -> *mut Context {
    let mut kernel = KERNEL.lock();
    let kernel = &mut *kernel;
    if let Some(process) = kernel.active_process() {
        // SAFETY: the stub passes the context frame it just spilled.
        process.store_context(unsafe { &*ctx });
    }
    dispatch(kernel, id, [a1, a2, a3, a4]);
    match kernel.active_process() {
        Some(process) => process.context_mut() as *mut Context,
        None => {
            log::error!("no runnable process after syscall {}", id);
            crate::arch::halt();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ENONE;
    use crate::mm::{AddressSpace, PhysAddr};
    use crate::process::{Pid, Process, ProcessState};
    use alloc::sync::Arc;

    fn kernel_with_processes(n: u64) -> Kernel {
        let mut kernel = Kernel::new();
        for pid in 1..=n {
            let space = Arc::new(AddressSpace::new(PhysAddr::new(0x1000 * pid), pid as u16));
            kernel.add_process(Process::new(Pid(pid), Pid(0), space));
        }
        kernel.switch_task();
        kernel
    }

    #[test]
    fn unknown_ids_return_enosys() {
        let mut kernel = kernel_with_processes(1);
        dispatch(&mut kernel, 99, [0; 4]);
        let ret = kernel.active_process().unwrap().context().gp_regs[0];
        assert_eq!(ret as i64, Errno::NoSys.code());
    }

    #[test]
    fn yield_rotates_and_returns_zero() {
        let mut kernel = kernel_with_processes(2);
        let first = kernel.active_process().unwrap().pid();
        dispatch(&mut kernel, SyscallId::Yield as u64, [0; 4]);
        let second = kernel.active_process().unwrap().pid();
        assert_ne!(first, second);

        // The yielding process got its return value before the switch.
        let parked = kernel.process(first).unwrap();
        assert_eq!(parked.context().gp_regs[0], ENONE);
    }

    #[test]
    fn sigwait_parks_the_caller() {
        let mut kernel = kernel_with_processes(2);
        let first = kernel.active_process().unwrap().pid();
        dispatch(&mut kernel, SyscallId::SigWait as u64, [0; 4]);

        assert_ne!(kernel.active_process().unwrap().pid(), first);
        let parked = kernel.process(first).unwrap();
        assert_eq!(parked.state(), ProcessState::SigWait);
        // Wake-up return value was staged before the reschedule.
        assert_eq!(parked.context().gp_regs[0], ENONE);
    }

    #[test]
    fn create_and_unlink_are_unimplemented() {
        let mut kernel = kernel_with_processes(1);
        dispatch(&mut kernel, SyscallId::Create as u64, [0; 4]);
        let ret = kernel.active_process().unwrap().context().gp_regs[0];
        assert_eq!(ret as i64, Errno::NoSys.code());

        dispatch(&mut kernel, SyscallId::Unlink as u64, [0; 4]);
        let ret = kernel.active_process().unwrap().context().gp_regs[0];
        assert_eq!(ret as i64, Errno::NoSys.code());
    }
}
