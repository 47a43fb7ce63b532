//! BCM2837 system timer
//!
//! Free-running 1 MHz counter with four compare registers. Compare 1 drives
//! the scheduling tick: each interrupt re-arms the compare register one
//! quantum ahead and rotates the run queue.

#![allow(dead_code)]

use lazy_static::lazy_static;

#[cfg(all(target_arch = "aarch64", target_os = "none"))]
use super::mmio::{self, SYSTEM_TIMER_BASE};
use crate::irq::InterruptHandler;
use crate::kernel::Kernel;

/// Interrupt lines of the four timer channels.
pub const TIMER_IRQS: core::ops::Range<u32> = 0..4;

/// Scheduling quantum in milliseconds.
const TICK_MS: u32 = 50;

// Register offsets.
const CS: u64 = 0x00;
const CLO: u64 = 0x04;
const CHI: u64 = 0x08;
const C1: u64 = 0x10;

/// The scheduling timer.
pub struct SystemTimer {
    delta_ms: u32,
}

lazy_static! {
    /// The board's system timer, armed by [`crate::kernel::Kernel::boot`].
    pub static ref TIMER: SystemTimer = SystemTimer::new(TICK_MS);
}

impl SystemTimer {
    fn new(delta_ms: u32) -> Self {
        Self { delta_ms }
    }

    /// Arm compare register 1 one quantum from now and acknowledge all
    /// channels.
    pub fn reset(&self) {
        #[cfg(all(target_arch = "aarch64", target_os = "none"))]
        // SAFETY: all addresses are system-timer registers inside the
        // mapped peripheral window.
        unsafe {
            let now = mmio::mmio_read(SYSTEM_TIMER_BASE + CLO);
            mmio::mmio_write(SYSTEM_TIMER_BASE + C1, now.wrapping_add(self.delta_ms * 1000));
            mmio::mmio_write(SYSTEM_TIMER_BASE + CS, 0xf);
        }
    }
}

impl InterruptHandler for SystemTimer {
    fn handle_interrupt(&self, _source: u32, kernel: &mut Kernel) {
        self.reset();
        kernel.switch_task();
    }
}

/// Microseconds since the counter started. Timestamps the kernel log.
#[cfg(all(target_arch = "aarch64", target_os = "none"))]
pub fn current_time_us() -> u64 {
    // SAFETY: CLO/CHI are system-timer registers inside the mapped window.
    unsafe {
        let hi = mmio::mmio_read(SYSTEM_TIMER_BASE + CHI) as u64;
        let lo = mmio::mmio_read(SYSTEM_TIMER_BASE + CLO) as u64;
        (hi << 32) | lo
    }
}

/// Microseconds since the counter started. Timestamps the kernel log.
#[cfg(not(all(target_arch = "aarch64", target_os = "none")))]
pub fn current_time_us() -> u64 {
    0
}
