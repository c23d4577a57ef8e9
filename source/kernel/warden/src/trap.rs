// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Machine-mode trap dispatcher
//! PUBLIC API: TrapRecord, TrapCause, DispatcherState, TrapArmed,
//!             TrapDispatcher::{install, handle, last_record}, write_report()
//! DEPENDS_ON: hal::HardwareRegisters, diag::hex
//! INVARIANTS: The record is captured before anything else runs; the dispatcher
//!             ends in Halted and never returns control to the faulting code;
//!             the report goes through a lock-free writer

use core::fmt::{self, Write};

use crate::arch::riscv::INTERRUPT_FLAG;
use crate::diag::hex::{write_hex, HexWord};
use crate::error::InstallError;
use crate::hal::HardwareRegisters;

/// Trap CSRs as read on entry.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TrapRecord {
    /// Raw `mcause`.
    pub cause: usize,
    /// `mepc`: the instruction that trapped.
    pub faulting_pc: usize,
    /// `mtval`: the faulting address for access faults.
    pub faulting_address: usize,
    /// `mstatus` at trap entry.
    pub status_snapshot: usize,
}

impl TrapRecord {
    pub const fn classify(&self) -> TrapCause {
        TrapCause::from_mcause(self.cause)
    }
}

/// Decoded `mcause`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TrapCause {
    InstructionMisaligned,
    InstructionAccessFault,
    IllegalInstruction,
    Breakpoint,
    LoadMisaligned,
    LoadAccessFault,
    StoreMisaligned,
    StoreAccessFault,
    EnvironmentCallFromU,
    EnvironmentCallFromS,
    EnvironmentCallFromM,
    InstructionPageFault,
    LoadPageFault,
    StorePageFault,
    Interrupt(usize),
    Unknown(usize),
}

impl TrapCause {
    pub const fn from_mcause(mcause: usize) -> Self {
        let code = mcause & !INTERRUPT_FLAG;
        if mcause & INTERRUPT_FLAG != 0 {
            return Self::Interrupt(code);
        }
        match code {
            0 => Self::InstructionMisaligned,
            1 => Self::InstructionAccessFault,
            2 => Self::IllegalInstruction,
            3 => Self::Breakpoint,
            4 => Self::LoadMisaligned,
            5 => Self::LoadAccessFault,
            6 => Self::StoreMisaligned,
            7 => Self::StoreAccessFault,
            8 => Self::EnvironmentCallFromU,
            9 => Self::EnvironmentCallFromS,
            11 => Self::EnvironmentCallFromM,
            12 => Self::InstructionPageFault,
            13 => Self::LoadPageFault,
            15 => Self::StorePageFault,
            other => Self::Unknown(other),
        }
    }

    /// Exception code as it appears in `mcause`.
    pub const fn code(self) -> usize {
        match self {
            Self::InstructionMisaligned => 0,
            Self::InstructionAccessFault => 1,
            Self::IllegalInstruction => 2,
            Self::Breakpoint => 3,
            Self::LoadMisaligned => 4,
            Self::LoadAccessFault => 5,
            Self::StoreMisaligned => 6,
            Self::StoreAccessFault => 7,
            Self::EnvironmentCallFromU => 8,
            Self::EnvironmentCallFromS => 9,
            Self::EnvironmentCallFromM => 11,
            Self::InstructionPageFault => 12,
            Self::LoadPageFault => 13,
            Self::StorePageFault => 15,
            Self::Interrupt(code) | Self::Unknown(code) => code,
        }
    }

    /// PMP violations.
    pub const fn is_access_fault(self) -> bool {
        matches!(self, Self::InstructionAccessFault | Self::LoadAccessFault | Self::StoreAccessFault)
    }

    pub const fn name(self) -> &'static str {
        match self {
            Self::InstructionMisaligned => "InstructionAddressMisaligned",
            Self::InstructionAccessFault => "InstructionAccessFault",
            Self::IllegalInstruction => "IllegalInstruction",
            Self::Breakpoint => "Breakpoint",
            Self::LoadMisaligned => "LoadAddressMisaligned",
            Self::LoadAccessFault => "LoadAccessFault",
            Self::StoreMisaligned => "StoreAMOAddressMisaligned",
            Self::StoreAccessFault => "StoreAMOAccessFault",
            Self::EnvironmentCallFromU => "EnvironmentCallFromUMode",
            Self::EnvironmentCallFromS => "EnvironmentCallFromSMode",
            Self::EnvironmentCallFromM => "EnvironmentCallFromMMode",
            Self::InstructionPageFault => "InstructionPageFault",
            Self::LoadPageFault => "LoadPageFault",
            Self::StorePageFault => "StoreAMOPageFault",
            Self::Interrupt(_) => "Interrupt",
            Self::Unknown(_) => "Exception",
        }
    }
}

impl fmt::Display for TrapCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Writes the four-line trap report.
pub fn write_report<W: Write + ?Sized>(record: &TrapRecord, out: &mut W) -> fmt::Result {
    let fields = [
        ("mcause:  ", record.cause),
        ("mepc:    ", record.faulting_pc),
        ("mtval:   ", record.faulting_address),
        ("mstatus: ", record.status_snapshot),
    ];
    out.write_str("TRAP\n")?;
    for (label, value) in fields {
        out.write_str(label)?;
        write_hex(&mut *out, value)?;
        out.write_char('\n')?;
    }
    Ok(())
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DispatcherState {
    Disarmed,
    Armed,
    Handling,
    /// Terminal; left only by reset.
    Halted,
}

/// Proof that the trap vector is installed.
///
/// Only `TrapDispatcher::install` creates one, and the privilege transition
/// demands it, so no restricted code can run before faults have a handler.
#[derive(Debug)]
pub struct TrapArmed {
    _private: (),
}

/// Owns the trap vector and the report-then-halt policy.
#[derive(Debug)]
pub struct TrapDispatcher {
    state: DispatcherState,
    last: Option<TrapRecord>,
}

impl Default for TrapDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl TrapDispatcher {
    pub const fn new() -> Self {
        Self { state: DispatcherState::Disarmed, last: None }
    }

    pub const fn state(&self) -> DispatcherState {
        self.state
    }

    /// Last record handled; kept for the panic handler and tests.
    pub const fn last_record(&self) -> Option<TrapRecord> {
        self.last
    }

    /// Points the trap vector at `vector`. Only the first call succeeds.
    pub fn install<H: HardwareRegisters>(&mut self, hw: &mut H, vector: usize) -> Result<TrapArmed, InstallError> {
        if self.state != DispatcherState::Disarmed {
            return Err(InstallError::AlreadyInstalled);
        }
        if vector % 4 != 0 {
            return Err(InstallError::MisalignedVector(vector));
        }
        hw.write_trap_vector(vector);
        self.state = DispatcherState::Armed;
        log::debug!(target: "trap", "vector installed at {:#x}", vector);
        Ok(TrapArmed { _private: () })
    }

    /// Captures, reports and halts.
    ///
    /// Returns the captured record, or `None` if the dispatcher was not armed
    /// (including a second trap after halting). Either way the state ends in
    /// `Halted`; the caller must park the hart.
    pub fn handle<H: HardwareRegisters, W: Write + ?Sized>(&mut self, hw: &H, out: &mut W) -> Option<TrapRecord> {
        let record = hw.capture_trap();
        if self.state != DispatcherState::Armed {
            self.state = DispatcherState::Halted;
            return None;
        }
        self.state = DispatcherState::Handling;
        self.last = Some(record);
        let reported = write_report(&record, out);
        log::error!(
            target: "trap",
            "{} at {} (addr {}), halting",
            record.classify(),
            HexWord(record.faulting_pc),
            HexWord(record.faulting_address)
        );
        if reported.is_err() {
            log::warn!(target: "trap", "trap report truncated: console write failed");
        }
        self.state = DispatcherState::Halted;
        Some(record)
    }
}

/// Dispatcher as shared between the boot flow and the trap entry.
pub type SharedDispatcher = spin::Mutex<TrapDispatcher>;

#[cfg(all(target_arch = "riscv64", target_os = "none"))]
pub use self::vector::{trap_vector_address, DISPATCHER};

#[cfg(all(target_arch = "riscv64", target_os = "none"))]
mod vector {
    use super::SharedDispatcher;
    use crate::hal::machine::Machine;

    /// The one dispatcher on this hart.
    pub static DISPATCHER: SharedDispatcher = SharedDispatcher::new(super::TrapDispatcher::new());

    // Swap in the trap stack from mscratch, then hand over to Rust. Nothing
    // comes back; the loop only guards against a returning handler.
    core::arch::global_asm!(
        ".pushsection .text.trap_vector, \"ax\", @progbits",
        ".balign 4",
        ".global __trap_vector",
        "__trap_vector:",
        "    csrrw sp, mscratch, sp",
        "    call {entry}",
        "1:  wfi",
        "    j 1b",
        ".popsection",
        entry = sym trap_entry,
    );

    extern "C" {
        fn __trap_vector();
    }

    pub fn trap_vector_address() -> usize {
        __trap_vector as usize
    }

    extern "C" fn trap_entry() -> ! {
        // SAFETY: only reads trap CSRs; mscratch was set during boot.
        let hart = unsafe { Machine::steal() };
        if let Some(mut dispatcher) = DISPATCHER.try_lock() {
            let _ = dispatcher.handle(&hart, &mut crate::uart::raw_writer());
        }
        crate::arch::riscv::park()
    }
}
