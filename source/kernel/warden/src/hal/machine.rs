// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Machine-mode CSR access on RV64.
//!
//! CSR numbers are part of the instruction encoding, so every indexed
//! register gets its own `csrr`/`csrw` arm.

use core::convert::Infallible;

use super::HardwareRegisters;
use crate::arch::riscv::{MSECCFG, MSECCFG_MMWP};
use crate::pmp::REGION_COUNT;
use crate::trap::TrapRecord;

macro_rules! csr_read {
    ($csr:literal) => {{
        let value: usize;
        // SAFETY: reading a machine-mode CSR has no side effects.
        unsafe { core::arch::asm!(concat!("csrr {0}, ", $csr), out(reg) value, options(nomem, nostack)) };
        value
    }};
}

macro_rules! csr_write {
    ($csr:literal, $value:expr) => {{
        let value: usize = $value;
        // SAFETY: callers uphold the ordering rules documented on `HardwareRegisters`.
        unsafe { core::arch::asm!(concat!("csrw ", $csr, ", {0}"), in(reg) value, options(nostack)) };
    }};
}

/// The hart this kernel runs on.
pub struct Machine {
    _private: (),
}

impl Machine {
    /// Takes ownership of the machine-mode register file and points `mscratch`
    /// at the trap stack.
    ///
    /// # Safety
    /// Call once, from machine mode, before any trap can be taken.
    /// `trap_stack_top` must be 16-byte aligned writable memory.
    pub unsafe fn new(trap_stack_top: usize) -> Self {
        unsafe { riscv::register::mscratch::write(trap_stack_top) };
        Self { _private: () }
    }

    /// Another handle to the same register file, for the trap entry.
    ///
    /// # Safety
    /// The caller must only read CSRs or must be the sole user of the hart.
    pub unsafe fn steal() -> Self {
        Self { _private: () }
    }
}

impl HardwareRegisters for Machine {
    type Resumed = Infallible;

    fn pmpaddr(&self, index: usize) -> usize {
        match index {
            0 => csr_read!("pmpaddr0"),
            1 => csr_read!("pmpaddr1"),
            2 => csr_read!("pmpaddr2"),
            3 => csr_read!("pmpaddr3"),
            4 => csr_read!("pmpaddr4"),
            5 => csr_read!("pmpaddr5"),
            6 => csr_read!("pmpaddr6"),
            7 => csr_read!("pmpaddr7"),
            _ => 0,
        }
    }

    fn write_pmpaddr(&mut self, index: usize, value: usize) {
        match index {
            0 => csr_write!("pmpaddr0", value),
            1 => csr_write!("pmpaddr1", value),
            2 => csr_write!("pmpaddr2", value),
            3 => csr_write!("pmpaddr3", value),
            4 => csr_write!("pmpaddr4", value),
            5 => csr_write!("pmpaddr5", value),
            6 => csr_write!("pmpaddr6", value),
            7 => csr_write!("pmpaddr7", value),
            _ => {}
        }
    }

    fn pmpcfg(&self, index: usize) -> u8 {
        if index >= REGION_COUNT {
            return 0;
        }
        (csr_read!("pmpcfg0") >> (index * 8)) as u8
    }

    fn write_pmpcfg(&mut self, index: usize, value: u8) {
        if index >= REGION_COUNT {
            return;
        }
        // RV64 packs eight entries into pmpcfg0; locked bytes ignore the rewrite.
        let shift = index * 8;
        let current = csr_read!("pmpcfg0");
        csr_write!("pmpcfg0", (current & !(0xff << shift)) | ((value as usize) << shift));
    }

    fn enable_machine_whitelist(&mut self) {
        // SAFETY: MMWP only narrows what machine mode may touch.
        unsafe {
            core::arch::asm!(
                "csrs {csr}, {bits}",
                csr = const MSECCFG,
                bits = in(reg) MSECCFG_MMWP,
                options(nostack)
            )
        };
    }

    fn read_status(&self) -> usize {
        csr_read!("mstatus")
    }

    fn write_status(&mut self, value: usize) {
        csr_write!("mstatus", value);
    }

    fn trap_vector(&self) -> usize {
        csr_read!("mtvec")
    }

    fn write_trap_vector(&mut self, vector: usize) {
        // SAFETY: the dispatcher validated alignment before calling.
        unsafe { riscv::register::mtvec::write(vector, riscv::register::mtvec::TrapMode::Direct) };
    }

    fn capture_trap(&self) -> TrapRecord {
        TrapRecord {
            cause: csr_read!("mcause"),
            faulting_pc: csr_read!("mepc"),
            faulting_address: csr_read!("mtval"),
            status_snapshot: csr_read!("mstatus"),
        }
    }

    unsafe fn resume_at(&mut self, entry: usize, stack_pointer: usize) -> Infallible {
        // mepc and sp are set in the same block as mret; nothing runs in between.
        unsafe {
            core::arch::asm!(
                "csrw mepc, {entry}",
                "mv sp, {sp}",
                "mret",
                entry = in(reg) entry,
                sp = in(reg) stack_pointer,
                options(noreturn)
            )
        }
    }
}
