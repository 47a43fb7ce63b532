//! Kernel log sink
//!
//! Wires the `log` facade to the UART: every record is stamped with the
//! system-timer time, split into seconds, milliseconds and microseconds,
//! and its level. Fatal paths log through `error!` and then halt.

use log::{Level, LevelFilter, Log, Metadata, Record};

use crate::arch::aarch64::timer;

struct UartLogger;

static LOGGER: UartLogger = UartLogger;

/// Most verbose level that reaches the UART.
const MAX_LEVEL: Level = Level::Debug;

impl Log for UartLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= MAX_LEVEL
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let t = timer::current_time_us();
        crate::println!(
            "[{:>5}][{}:{:03}:{:03}] {}",
            record.level(),
            t / 1_000_000,
            (t / 1_000) % 1_000,
            t % 1_000,
            record.args()
        );
    }

    fn flush(&self) {}
}

/// Install the UART logger. Records logged before this call are dropped.
pub fn init() {
    if log::set_logger(&LOGGER).is_ok() {
        log::set_max_level(LevelFilter::Debug);
    }
}
