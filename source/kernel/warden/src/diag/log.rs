// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: `log` backend writing to the boot UART
//! PUBLIC API: UartLogger, init(), write_record()
//! DEPENDS_ON: uart::KernelUart
//! INVARIANTS: Single-line emission; `[LEVEL target] message`; never used on
//!             the trap path (the dispatcher writes through the raw UART)

use core::fmt::{self, Write};

use ::log::{LevelFilter, Log, Metadata, Record, SetLoggerError};

/// Highest level emitted by default; `debug_uart` opens it up to `Trace`.
pub const MAX_LEVEL: LevelFilter = if cfg!(feature = "debug_uart") {
    LevelFilter::Trace
} else if cfg!(debug_assertions) {
    LevelFilter::Debug
} else {
    LevelFilter::Info
};

/// Writes one record as a single line.
pub fn write_record<W: Write + ?Sized>(out: &mut W, record: &Record<'_>) -> fmt::Result {
    write!(out, "[{} {}] ", record.level(), record.target())?;
    out.write_fmt(*record.args())?;
    out.write_char('\n')
}

pub struct UartLogger {
    max_level: LevelFilter,
}

impl UartLogger {
    pub const fn new(max_level: LevelFilter) -> Self {
        Self { max_level }
    }
}

impl Log for UartLogger {
    fn enabled(&self, metadata: &Metadata<'_>) -> bool {
        metadata.level() <= self.max_level
    }

    fn log(&self, record: &Record<'_>) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let mut uart = crate::uart::KernelUart::lock();
        let _ = write_record(&mut *uart, record);
    }

    fn flush(&self) {}
}

static LOGGER: UartLogger = UartLogger::new(MAX_LEVEL);

/// Routes the `log` macros to the UART. Call once during early boot.
pub fn init() -> Result<(), SetLoggerError> {
    ::log::set_logger(&LOGGER)?;
    ::log::set_max_level(MAX_LEVEL);
    Ok(())
}
