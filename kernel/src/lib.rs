//! Kestrel kernel library
//!
//! A small preemptive kernel for Raspberry Pi 3 class AArch64 boards:
//! buddy-allocated physical memory, loopback-mapped translation tables
//! with demand-filled intermediate levels, a round-robin scheduler over a
//! refcounted process model, signal delivery through userspace
//! trampolines, and pipes, files, and the UART unified behind one
//! descriptor contract.
//!
//! Everything hardware-facing is compiled for `target_os = "none"` only;
//! on a host target the crate links `std` and the test suites drive the
//! same logic against in-memory stand-ins.

#![no_std]

extern crate alloc;

// Host target: link std so the unit and integration tests can run under
// the standard harness with the system allocator.
#[cfg(not(target_os = "none"))]
extern crate std;

#[macro_use]
pub mod print;

pub mod arch;
pub mod elf;
pub mod error;
pub mod fs;
pub mod irq;
pub mod kernel;
pub mod logger;
pub mod mm;
pub mod process;
pub mod sched;
pub mod syscall;


pub use error::{Errno, SysResult};
pub use kernel::{Kernel, KERNEL};
