//! PL011 UART driver
//!
//! The kernel's character sink and source: the log stream writes here, and
//! the standard descriptors opened by `exec` are endpoints onto this
//! device. Transmit is busy-waited; receive is interrupt-driven into a
//! small ring. On host builds transmitted bytes land in a capture buffer so
//! tests can observe output.

#![allow(dead_code)]

use alloc::collections::VecDeque;
use alloc::sync::Arc;
use core::fmt;

use lazy_static::lazy_static;
use spin::Mutex;

#[cfg(all(target_arch = "aarch64", target_os = "none"))]
use super::mmio::{self, UART0_BASE};
use crate::error::{Errno, SysResult};
use crate::fs::FileContext;
use crate::irq::InterruptHandler;
use crate::kernel::Kernel;

/// Interrupt line the PL011 raises on the BCM2837.
pub const UART_IRQ: u32 = 57;

// Register offsets.
const DR: u64 = 0x00;
const FR: u64 = 0x18;
const IBRD: u64 = 0x24;
const FBRD: u64 = 0x28;
const LCRH: u64 = 0x2c;
const CR: u64 = 0x30;
const IMSC: u64 = 0x38;
const ICR: u64 = 0x44;

// Flag register bits.
const FR_RXFE: u32 = 1 << 4;
const FR_TXFF: u32 = 1 << 5;

// Interrupt bits: receive and receive-timeout.
const INT_RX: u32 = (1 << 4) | (1 << 6);

/// Open mode of a UART endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    ReadOnly,
    ReadWrite,
    WriteOnly,
}

/// The PL011 device.
pub struct Pl011 {
    rx: Mutex<VecDeque<u8>>,
}

lazy_static! {
    /// The board's one UART.
    pub static ref UART: Pl011 = Pl011::new();
}

#[cfg(not(all(target_arch = "aarch64", target_os = "none")))]
static HOST_SINK: Mutex<alloc::vec::Vec<u8>> = Mutex::new(alloc::vec::Vec::new());

/// Drain everything written to the UART in this host process. Test-facing.
#[cfg(not(all(target_arch = "aarch64", target_os = "none")))]
pub fn take_host_output() -> alloc::vec::Vec<u8> {
    core::mem::take(&mut *HOST_SINK.lock())
}

impl Pl011 {
    fn new() -> Self {
        Self {
            rx: Mutex::new(VecDeque::new()),
        }
    }

    /// Program the line: FIFOs on, 8n1, 115200 baud against the 3 MHz
    /// UART clock the firmware sets up, receive interrupts unmasked.
    pub fn init(&self) {
        #[cfg(all(target_arch = "aarch64", target_os = "none"))]
        // SAFETY: all addresses are PL011 registers inside the mapped
        // peripheral window.
        unsafe {
            mmio::mmio_write(UART0_BASE + CR, 0);
            mmio::mmio_write(UART0_BASE + ICR, 0x7ff);
            mmio::mmio_write(UART0_BASE + IBRD, 1);
            mmio::mmio_write(UART0_BASE + FBRD, 40);
            mmio::mmio_write(UART0_BASE + LCRH, (1 << 4) | (1 << 5) | (1 << 6));
            mmio::mmio_write(UART0_BASE + IMSC, INT_RX);
            mmio::mmio_write(UART0_BASE + CR, 1 | (1 << 8) | (1 << 9));
        }
    }

    /// Transmit one byte, waiting for FIFO space.
    pub fn write_byte(&self, byte: u8) {
        #[cfg(all(target_arch = "aarch64", target_os = "none"))]
        // SAFETY: FR and DR are PL011 registers inside the mapped window.
        unsafe {
            while mmio::mmio_read(UART0_BASE + FR) & FR_TXFF != 0 {}
            mmio::mmio_write(UART0_BASE + DR, byte as u32);
        }
        #[cfg(not(all(target_arch = "aarch64", target_os = "none")))]
        HOST_SINK.lock().push(byte);
    }

    pub fn write_bytes(&self, bytes: &[u8]) {
        for &b in bytes {
            self.write_byte(b);
        }
    }

    /// Take one received byte from the ring, if any.
    pub fn read_byte(&self) -> Option<u8> {
        self.rx.lock().pop_front()
    }

    /// Push a byte into the receive ring. The IRQ path on hardware; tests
    /// use it to fake input.
    pub fn inject(&self, byte: u8) {
        self.rx.lock().push_back(byte);
    }

    /// Open an endpoint for use as a file descriptor.
    pub fn open(&'static self, mode: Mode) -> Arc<dyn FileContext> {
        Arc::new(UartEndpoint { mode })
    }
}

impl InterruptHandler for Pl011 {
    fn handle_interrupt(&self, _source: u32, _kernel: &mut Kernel) {
        #[cfg(all(target_arch = "aarch64", target_os = "none"))]
        // SAFETY: FR, DR and ICR are PL011 registers inside the mapped
        // window.
        unsafe {
            while mmio::mmio_read(UART0_BASE + FR) & FR_RXFE == 0 {
                let byte = mmio::mmio_read(UART0_BASE + DR) as u8;
                self.rx.lock().push_back(byte);
            }
            mmio::mmio_write(UART0_BASE + ICR, INT_RX);
        }
    }
}

/// A descriptor endpoint onto the UART.
struct UartEndpoint {
    mode: Mode,
}

impl FileContext for UartEndpoint {
    fn read(&self, buf: &mut [u8]) -> SysResult<usize> {
        if self.mode == Mode::WriteOnly {
            return Err(Errno::Io);
        }
        let mut count = 0;
        while count < buf.len() {
            match UART.read_byte() {
                Some(b) => {
                    buf[count] = b;
                    count += 1;
                }
                None => break,
            }
        }
        Ok(count)
    }

    fn write(&self, buf: &[u8]) -> SysResult<usize> {
        if self.mode == Mode::ReadOnly {
            return Err(Errno::Io);
        }
        UART.write_bytes(buf);
        Ok(buf.len())
    }

    fn duplicate(&self) -> Arc<dyn FileContext> {
        Arc::new(UartEndpoint { mode: self.mode })
    }
}

/// `fmt::Write` front end over the global UART, used by the print macros
/// and the logger.
pub struct UartWriter;

impl fmt::Write for UartWriter {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        UART.write_bytes(s.as_bytes());
        Ok(())
    }
}

#[doc(hidden)]
pub fn _print(args: fmt::Arguments) {
    use fmt::Write;
    let _ = UartWriter.write_fmt(args);
}
