// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Panic handler emitting diagnostics over the raw UART
//! PUBLIC API: panic handler (no_std)
//! DEPENDS_ON: trap::DISPATCHER, uart::raw_writer()
//! INVARIANTS: No allocation; never blocks on a held lock; parks the hart

use core::{fmt::Write, panic::PanicInfo};

use crate::{diag::hex::write_hex, trap, uart};

#[panic_handler]
fn panic(info: &PanicInfo) -> ! {
    let mut w = uart::raw_writer();

    let _ = w.write_str("\nPANIC: ");
    if let Some(location) = info.location() {
        let _ = w.write_str(location.file());
        let _ = w.write_str(":");
        let _ = write_hex(&mut w, location.line() as usize);
        let _ = w.write_str(": ");
    }
    match info.message().as_str() {
        Some(msg) => {
            let _ = w.write_str(msg);
        }
        None => {
            let _ = w.write_str("<complex msg>");
        }
    }
    let _ = w.write_str("\n");

    let last = trap::DISPATCHER.try_lock().and_then(|dispatcher| dispatcher.last_record());
    if let Some(record) = last {
        let _ = w.write_str("PANIC: last ");
        let _ = trap::write_report(&record, &mut w);
    }

    crate::arch::riscv::park()
}
