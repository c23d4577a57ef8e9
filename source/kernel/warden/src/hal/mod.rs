// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Hardware abstraction layer for the machine-mode register file.
//!
//! The PMP, `mstatus`, `mtvec` and trap CSRs are only reachable through this
//! trait, which lets the manager, transition controller and dispatcher run
//! against `sim::SimHart` on the host.

#[cfg(all(target_arch = "riscv64", target_os = "none"))]
pub mod machine;

use crate::trap::TrapRecord;

/// Machine-mode CSR access used by the isolation kernel.
pub trait HardwareRegisters {
    /// What `resume_at` yields; `!`-like on hardware, an exit report in simulation.
    type Resumed;

    /// Reads `pmpaddr{index}`.
    fn pmpaddr(&self, index: usize) -> usize;
    /// Writes `pmpaddr{index}`. Hardware ignores the write while the entry is locked.
    fn write_pmpaddr(&mut self, index: usize, value: usize);
    /// Reads the `pmp{index}cfg` byte.
    fn pmpcfg(&self, index: usize) -> u8;
    /// Writes the `pmp{index}cfg` byte, leaving the neighbouring bytes alone.
    fn write_pmpcfg(&mut self, index: usize, value: u8);
    /// Sets `mseccfg.MMWP`; irreversible until reset.
    fn enable_machine_whitelist(&mut self);

    fn read_status(&self) -> usize;
    fn write_status(&mut self, value: usize);

    fn trap_vector(&self) -> usize;
    /// Points `mtvec` at `vector` in direct mode.
    fn write_trap_vector(&mut self, vector: usize);

    /// Snapshot of `mcause`, `mepc`, `mtval` and `mstatus`.
    fn capture_trap(&self) -> TrapRecord;

    /// Sets `mepc` and the stack pointer, then returns from machine mode.
    ///
    /// # Safety
    /// `mstatus.MPP` must already name the target level, and `entry`/`sp` must
    /// have been checked against the active PMP configuration.
    unsafe fn resume_at(&mut self, entry: usize, stack_pointer: usize) -> Self::Resumed;
}
