//! Process-management syscalls

use alloc::vec::Vec;

use super::user;
use crate::error::{Errno, ENONE};
use crate::kernel::Kernel;
use crate::process::{Pid, ProcessState, SIGNAL_CHILD};

/// `clone(fn, stack, userdata, flags)`: a new process sharing the caller's
/// address space, entering `fn(userdata)` on the supplied stack.
pub fn sys_clone(kernel: &mut Kernel, entry: u64, stack: u64, userdata: u64, _flags: u64) {
    let pid = kernel.next_pid();
    let child = match kernel.active_process() {
        Some(parent) => parent.clone_for(pid, entry, stack, userdata),
        None => return,
    };
    kernel.add_process(child);
    kernel.set_caller_return(ENONE);
}

/// `terminate()`: raise the child signal on the parent, tear the caller
/// down, and run someone else. Does not return to the caller.
pub fn sys_terminate(kernel: &mut Kernel) {
    let parent = match kernel.active_process() {
        Some(process) => process.parent(),
        None => return,
    };
    kernel.raise_signal(parent, SIGNAL_CHILD);
    kernel.delete_active_process();
    kernel.switch_task();
}

/// `exec(path, argv, envp)`: replace the caller's image. Returns only on
/// failure.
pub fn sys_exec(kernel: &mut Kernel, path: u64, argv: u64, envp: u64) {
    // Copy everything out of the dying address space first.
    // SAFETY: the caller's address space is live; the helpers bound the
    // walks and reject null pointers.
    let copied = unsafe {
        user::user_cstr(path).and_then(|p| {
            Some((
                p.to_vec(),
                user::copy_user_str_array(argv)?,
                user::copy_user_str_array(envp)?,
            ))
        })
    };
    let Some((path, argv, envp)) = copied else {
        kernel.set_caller_return(Errno::Inval.code() as u64);
        return;
    };
    let Ok(path) = core::str::from_utf8(&path) else {
        kernel.set_caller_return(Errno::Inval.code() as u64);
        return;
    };

    let argv_refs: Vec<&[u8]> = argv.iter().map(|s| s.as_slice()).collect();
    let envp_refs: Vec<&[u8]> = envp.iter().map(|s| s.as_slice()).collect();
    if let Err(e) = kernel.exec(path, &argv_refs, &envp_refs) {
        kernel.set_caller_return(e.code() as u64);
    }
}

/// `yield()`: to the back of the queue.
pub fn sys_yield(kernel: &mut Kernel) {
    kernel.set_caller_return(ENONE);
    kernel.switch_task();
}

/// `sigraise(pid, signal)`.
pub fn sys_sigraise(kernel: &mut Kernel, pid: u64, signal: u64) {
    let caller = kernel.active_process().map(|p| p.pid());
    let target = Pid(pid);
    let status = kernel.raise_signal(target, signal as usize);
    if status <= 0 {
        kernel.set_caller_return(status as u64);
    } else if caller != Some(target) {
        // Target was killed; if the caller killed itself, another process
        // is current now and its x0 must stay untouched.
        kernel.set_caller_return(ENONE);
    }
}

/// `sigret()`: restore the pre-handler context. The restored x0 carries
/// whatever the interrupted computation held, so no return value is
/// written.
pub fn sys_sigret(kernel: &mut Kernel) {
    if let Some(process) = kernel.active_process() {
        process.signal_return();
    }
}

/// `sigwait()`: block until a signal arrives. The 0 wake-up value is
/// staged before the reschedule.
pub fn sys_sigwait(kernel: &mut Kernel) {
    kernel.set_caller_return(ENONE);
    if let Some(process) = kernel.active_process() {
        process.set_state(ProcessState::SigWait);
    }
    kernel.sleep_active_process();
    kernel.switch_task();
}

/// `sigaction(signal, handler, trampoline, userdata)`.
pub fn sys_sigaction(
    kernel: &mut Kernel,
    signal: u64,
    handler: u64,
    trampoline: u64,
    userdata: u64,
) {
    if let Some(process) = kernel.active_process() {
        process.set_signal_action(signal as usize, handler, trampoline, userdata);
    }
    kernel.set_caller_return(ENONE);
}
