//! File and pipe syscalls

use alloc::sync::Arc;

use super::user;
use crate::arch::aarch64::serial::UART;
use crate::error::{encode, Errno, ENONE};
use crate::fs::fat_file::Fat32FileContext;
use crate::fs::pipe::create_pipe;
use crate::fs::FileType;
use crate::kernel::Kernel;

/// `printk(str)`: write a string to the kernel log stream.
pub fn sys_printk(kernel: &mut Kernel, ptr: u64) {
    // SAFETY: the caller's address space is live; the walk is bounded and
    // null is rejected.
    let Some(s) = (unsafe { user::user_cstr(ptr) }) else {
        kernel.set_caller_return(Errno::Inval.code() as u64);
        return;
    };
    UART.write_bytes(s);
    kernel.set_caller_return(ENONE);
}

/// `open(path, flags)`: open a regular file on the RAM filesystem.
pub fn sys_open(kernel: &mut Kernel, path: u64, _flags: u64) {
    let Some(fs) = kernel.ramfs() else {
        kernel.set_caller_return(Errno::Io.code() as u64);
        return;
    };
    // SAFETY: see `sys_printk`.
    let path = unsafe { user::user_cstr(path) }.and_then(|p| core::str::from_utf8(p).ok());
    let Some(path) = path else {
        kernel.set_caller_return(Errno::NoFile.code() as u64);
        return;
    };
    if fs.file_type(path) != Ok(FileType::File) {
        kernel.set_caller_return(Errno::NoFile.code() as u64);
        return;
    }
    let file = Arc::new(Fat32FileContext::open(fs, path));
    let Some(process) = kernel.active_process() else {
        return;
    };
    let fd = process.store_file(file);
    kernel.set_caller_return(fd as u64);
}

/// `close(fd)`.
pub fn sys_close(kernel: &mut Kernel, fd: u64) {
    let result = match kernel.active_process() {
        Some(process) => process.close_file(fd as i32).map(|_| ENONE),
        None => return,
    };
    kernel.set_caller_return(encode(result));
}

/// `create(path, flags)`: not supported on the read-only filesystem.
pub fn sys_create(kernel: &mut Kernel, _path: u64, _flags: u64) {
    kernel.set_caller_return(Errno::NoSys.code() as u64);
}

/// `unlink(fd)`: not supported on the read-only filesystem.
pub fn sys_unlink(kernel: &mut Kernel, _fd: u64) {
    kernel.set_caller_return(Errno::NoSys.code() as u64);
}

/// `read(fd, buf, n)`.
pub fn sys_read(kernel: &mut Kernel, fd: u64, buf: u64, n: u64) {
    let Some(file) = kernel.active_process().and_then(|p| p.file(fd as i32)) else {
        kernel.set_caller_return(Errno::NoFile.code() as u64);
        return;
    };
    // SAFETY: the caller's address space is live and the buffer is its to
    // hand over.
    let Some(buf) = (unsafe { user::user_slice_mut(buf, n as usize) }) else {
        kernel.set_caller_return(Errno::Inval.code() as u64);
        return;
    };
    kernel.set_caller_return(encode(file.read(buf).map(|n| n as u64)));
}

/// `write(fd, buf, n)`.
pub fn sys_write(kernel: &mut Kernel, fd: u64, buf: u64, n: u64) {
    let Some(file) = kernel.active_process().and_then(|p| p.file(fd as i32)) else {
        log::warn!("failed to write on fd {}", fd);
        kernel.set_caller_return(Errno::NoFile.code() as u64);
        return;
    };
    // SAFETY: see `sys_read`.
    let Some(buf) = (unsafe { user::user_slice(buf, n as usize) }) else {
        kernel.set_caller_return(Errno::Inval.code() as u64);
        return;
    };
    kernel.set_caller_return(encode(file.write(buf).map(|n| n as u64)));
}

/// `fddup(oldfd, newfd)`: alias `newfd` to the same open file as `oldfd`,
/// displacing whatever `newfd` held.
pub fn sys_fddup(kernel: &mut Kernel, oldfd: u64, newfd: u64) {
    let (oldfd, newfd) = (oldfd as i32, newfd as i32);
    let result = {
        let Some(process) = kernel.active_process() else {
            return;
        };
        match process.file(oldfd) {
            None => Errno::NoFile.code() as u64,
            Some(file) => {
                if process.file(newfd).is_some() && process.close_file(newfd).is_err() {
                    log::error!("fddup() failed to close newfd={}", newfd);
                    Errno::Unknown.code() as u64
                } else if process.store_file_at(file, newfd).is_err() {
                    log::error!("fddup() failed to store newfd={}", newfd);
                    Errno::Unknown.code() as u64
                } else {
                    ENONE
                }
            }
        }
    };
    kernel.set_caller_return(result);
}

/// `create_pipe(pipefd)`: make a pipe and write its two descriptors
/// through the user pointer.
pub fn sys_create_pipe(kernel: &mut Kernel, pipefd: u64) {
    if pipefd == 0 {
        kernel.set_caller_return(Errno::Inval.code() as u64);
        return;
    }
    let (reader, writer) = create_pipe();
    let Some(process) = kernel.active_process() else {
        return;
    };
    let rfd = process.store_file(reader);
    let wfd = process.store_file(writer);
    // SAFETY: non-null was checked; the caller's buffer is writable user
    // memory.
    if unsafe { user::write_user_fd_pair(pipefd, [rfd, wfd]) }.is_none() {
        kernel.set_caller_return(Errno::Inval.code() as u64);
        return;
    }
    kernel.set_caller_return(ENONE);
}
