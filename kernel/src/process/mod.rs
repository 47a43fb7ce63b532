//! Process model
//!
//! A process is a pid, a saved register context, a shared address space, a
//! signal action table, and a file-descriptor table. The state machine has
//! three states: ACTIVE (runnable), SIGNAL (a handler is executing in user
//! mode, the pre-handler context parked in the backup slot), and SIGWAIT
//! (blocked until a signal arrives).

pub mod args;
pub mod pcb;
pub mod signal;
pub mod table;

pub use pcb::Process;
pub use signal::{ActionType, SignalAction, SignalDelivery};
pub use table::ProcessTable;

use core::fmt;

/// Process identifier. PID 1 is the init process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Pid(pub u64);

impl fmt::Display for Pid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Scheduling state of a process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    /// Runnable (or running).
    Active,
    /// Executing a signal handler in user mode; the interrupted context is
    /// held in the backup slot until `sigret`.
    Signal,
    /// Blocked awaiting a signal; excluded from the run queue.
    SigWait,
}

/// Number of signal slots per process.
pub const MAX_SIGNALS: usize = 64;

/// Signal conventionally raised on the parent when a child terminates.
pub const SIGNAL_CHILD: usize = 17;

/// Kernel stack size for every process.
pub const KERNEL_STACK_SIZE: usize = 1 << 16;

/// User stack placement for freshly exec'd programs: 64 KiB mapped just
/// below the top address.
pub const USER_STACK_TOP: u64 = 0x7f_c000_0000;
pub const USER_STACK_SIZE: usize = 1 << 16;
pub const USER_STACK_BASE: u64 = USER_STACK_TOP - USER_STACK_SIZE as u64;
