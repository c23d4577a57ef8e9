// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! 16550 UART on the QEMU `virt` machine: boot banner, logger and trap report.
//!
//! The restricted routine reaches the same device directly, through a PMP
//! region granted over `UART0_BASE..UART0_BASE + UART0_SPAN`.

use core::fmt::{self, Write};
use spin::Mutex;

/// Address of the first UART on the `virt` machine.
pub const UART0_BASE: usize = 0x1000_0000;
/// MMIO span covered by the UART protection region.
pub const UART0_SPAN: usize = 0x100;
/// Transmit holding register.
pub const UART_THR: usize = 0x0;
const UART_FCR: usize = 0x2;
const UART_LSR: usize = 0x5;
const FCR_FIFO_ENABLE: u8 = 1 << 0;
const LSR_TX_IDLE: u8 = 1 << 5;

static UART0: Mutex<KernelUart> = Mutex::new(KernelUart::new(UART0_BASE));

/// Feeds `s` to `put` one byte at a time, expanding `\n` to `\r\n`.
fn emit(s: &str, mut put: impl FnMut(u8)) {
    for &byte in s.as_bytes() {
        if byte == b'\n' {
            put(b'\r');
        }
        put(byte);
    }
}

/// UART at a fixed MMIO base.
#[derive(Clone, Copy)]
pub struct KernelUart {
    base: usize,
}

impl KernelUart {
    pub const fn new(base: usize) -> Self {
        Self { base }
    }

    /// Returns a guard for the boot UART singleton.
    pub fn lock() -> spin::MutexGuard<'static, KernelUart> {
        UART0.lock()
    }

    /// Enables the transmit FIFO.
    ///
    /// # Safety
    /// `base` must map a 16550-compatible device.
    pub unsafe fn init(&self) {
        unsafe { core::ptr::write_volatile((self.base + UART_FCR) as *mut u8, FCR_FIFO_ENABLE) };
    }

    fn put(&self, value: u8) {
        // SAFETY: `base` maps the UART; only the boot UART instance is ever built.
        unsafe {
            while core::ptr::read_volatile((self.base + UART_LSR) as *const u8) & LSR_TX_IDLE == 0 {}
            core::ptr::write_volatile((self.base + UART_THR) as *mut u8, value);
        }
    }
}

impl Write for KernelUart {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        emit(s, |byte| self.put(byte));
        Ok(())
    }
}

/// Lock-free writer for trap and panic contexts where the mutex may be held.
pub struct RawUart;

impl Write for RawUart {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        emit(s, |byte| KernelUart::new(UART0_BASE).put(byte));
        Ok(())
    }
}

pub fn raw_writer() -> RawUart {
    RawUart
}

/// Writes a line terminated by `\n` to the UART.
pub fn write_line(message: &str) {
    let mut uart = KernelUart::lock();
    let _ = uart.write_str(message);
    let _ = uart.write_str("\n");
}
