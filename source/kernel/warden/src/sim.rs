// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Host-side model of one RISC-V hart
//! PUBLIC API: SimHart, Cpu, Routine, Fault, SimExit, RegisterWrite
//! DEPENDS_ON: hal::HardwareRegisters, pmp::permits
//! INVARIANTS: Locked PMP entries ignore writes exactly like hardware; every
//!             fetch and data access is checked before it takes effect; a
//!             fault enters machine mode at `mtvec` with the trap CSRs set
//!
//! Restricted code is modelled as plain functions ("routines") mapped at an
//! address. Each `Cpu` operation is one instruction: it is fetched at the
//! current pc (execute check), performs its access, then advances pc by 4.

use alloc::collections::BTreeMap;
use alloc::string::String;
use alloc::vec::Vec;

use crate::arch::riscv::{mstatus, MSECCFG_MMWP};
use crate::hal::HardwareRegisters;
use crate::pmp::{decode_cfg, permits, AccessKind, AddressMode, DefaultAccess, REGION_COUNT};
use crate::privilege::PrivilegeLevel;
use crate::trap::{TrapCause, TrapRecord};
use crate::uart::{UART0_BASE, UART_THR};

const INSTRUCTION_BYTES: usize = 4;

/// Register write as issued to the simulated hart, in order.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RegisterWrite {
    PmpAddr { index: usize, value: usize },
    PmpCfg { index: usize, value: u8 },
    MachineWhitelist,
    Status(usize),
    TrapVector(usize),
    Resume { entry: usize, stack_pointer: usize },
}

/// Synchronous exception raised by an instruction.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Fault {
    pub cause: TrapCause,
    /// Value reported in `mtval`.
    pub address: usize,
}

/// How control left the simulated code.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SimExit {
    /// A fault redirected the hart to the trap vector in machine mode.
    Trapped { vector: usize },
    /// The routine ran to completion; `pc` is past its last instruction.
    Parked { pc: usize },
}

/// Code mapped at an address.
pub type Routine = fn(&mut Cpu<'_>) -> Result<(), Fault>;

/// Simulated hart: PMP, trap CSRs, privilege, word memory and a UART.
#[derive(Debug, Clone)]
pub struct SimHart {
    pmpaddr: [usize; REGION_COUNT],
    pmpcfg: [u8; REGION_COUNT],
    mseccfg: usize,
    mstatus: usize,
    mepc: usize,
    mcause: usize,
    mtval: usize,
    mtvec: usize,
    level: PrivilegeLevel,
    pc: usize,
    sp: usize,
    memory: BTreeMap<usize, u32>,
    routines: BTreeMap<usize, Routine>,
    console: String,
    writes: Vec<RegisterWrite>,
    entered: Option<(usize, usize, PrivilegeLevel)>,
}

impl Default for SimHart {
    fn default() -> Self {
        Self::new()
    }
}

impl SimHart {
    /// A hart fresh out of reset, in machine mode with every entry off.
    pub fn new() -> Self {
        Self {
            pmpaddr: [0; REGION_COUNT],
            pmpcfg: [0; REGION_COUNT],
            mseccfg: 0,
            mstatus: 0,
            mepc: 0,
            mcause: 0,
            mtval: 0,
            mtvec: 0,
            level: PrivilegeLevel::Machine,
            pc: 0,
            sp: 0,
            memory: BTreeMap::new(),
            routines: BTreeMap::new(),
            console: String::new(),
            writes: Vec::new(),
            entered: None,
        }
    }

    /// Maps `routine` at `addr`.
    pub fn load_routine(&mut self, addr: usize, routine: Routine) {
        self.routines.insert(addr, routine);
    }

    /// Stores a word without any protection check.
    pub fn poke(&mut self, addr: usize, value: u32) {
        self.memory.insert(addr, value);
    }

    /// Reads a word without any protection check.
    pub fn peek(&self, addr: usize) -> u32 {
        self.memory.get(&addr).copied().unwrap_or(0)
    }

    /// Everything written to the UART so far.
    pub fn console(&self) -> &str {
        &self.console
    }

    pub fn writes(&self) -> &[RegisterWrite] {
        &self.writes
    }

    pub fn privilege(&self) -> PrivilegeLevel {
        self.level
    }

    pub fn pc(&self) -> usize {
        self.pc
    }

    /// Entry, stack pointer and level observed by the last `mret`.
    pub fn entered(&self) -> Option<(usize, usize, PrivilegeLevel)> {
        self.entered
    }

    pub fn machine_whitelist(&self) -> bool {
        self.mseccfg & MSECCFG_MMWP != 0
    }

    /// Loads trap CSRs as if a trap had just been taken.
    pub fn inject_trap(&mut self, record: TrapRecord) {
        self.mcause = record.cause;
        self.mepc = record.faulting_pc;
        self.mtval = record.faulting_address;
        self.mstatus = record.status_snapshot;
    }

    /// Runs the routine at `entry` at the current privilege level.
    pub fn execute(&mut self, entry: usize) -> SimExit {
        self.pc = entry;
        self.run()
    }

    /// Hardware check for one access at the current privilege level.
    pub fn check(&self, addr: usize, width: usize, kind: AccessKind) -> bool {
        let default = if self.machine_whitelist() { DefaultAccess::Deny } else { DefaultAccess::Allow };
        permits(&self.pmpaddr, &self.pmpcfg, addr, width, kind, self.level, default)
    }

    fn entry_locked(&self, index: usize) -> bool {
        decode_cfg(self.pmpcfg[index]).locked
    }

    fn address_locked(&self, index: usize) -> bool {
        // A locked TOR entry also freezes the address below it.
        let next = index + 1;
        self.entry_locked(index)
            || (next < REGION_COUNT && self.entry_locked(next) && decode_cfg(self.pmpcfg[next]).mode == AddressMode::Tor)
    }

    fn run(&mut self) -> SimExit {
        let entry = self.pc;
        if !self.check(entry, INSTRUCTION_BYTES, AccessKind::Execute) {
            return self.take_trap(Fault { cause: TrapCause::InstructionAccessFault, address: entry });
        }
        let Some(routine) = self.routines.get(&entry).copied() else {
            return self.take_trap(Fault { cause: TrapCause::IllegalInstruction, address: 0 });
        };
        match routine(&mut Cpu { hart: self }) {
            Ok(()) => SimExit::Parked { pc: self.pc },
            Err(fault) => self.take_trap(fault),
        }
    }

    fn take_trap(&mut self, fault: Fault) -> SimExit {
        self.mcause = fault.cause.code();
        self.mepc = self.pc;
        self.mtval = fault.address;
        let previous_ie = if self.mstatus & mstatus::MIE != 0 { mstatus::MPIE } else { 0 };
        let cleared = self.mstatus & !(mstatus::MPP_MASK | mstatus::MPIE | mstatus::MIE);
        self.mstatus = cleared | self.level.mpp_bits() | previous_ie;
        self.level = PrivilegeLevel::Machine;
        self.pc = self.mtvec;
        SimExit::Trapped { vector: self.mtvec }
    }

    fn fetch(&mut self) -> Result<(), Fault> {
        if self.check(self.pc, INSTRUCTION_BYTES, AccessKind::Execute) {
            Ok(())
        } else {
            Err(Fault { cause: TrapCause::InstructionAccessFault, address: self.pc })
        }
    }

    fn retire(&mut self) {
        self.pc += INSTRUCTION_BYTES;
    }
}

impl HardwareRegisters for SimHart {
    type Resumed = SimExit;

    fn pmpaddr(&self, index: usize) -> usize {
        self.pmpaddr.get(index).copied().unwrap_or(0)
    }

    fn write_pmpaddr(&mut self, index: usize, value: usize) {
        self.writes.push(RegisterWrite::PmpAddr { index, value });
        if index < REGION_COUNT && !self.address_locked(index) {
            self.pmpaddr[index] = value;
        }
    }

    fn pmpcfg(&self, index: usize) -> u8 {
        self.pmpcfg.get(index).copied().unwrap_or(0)
    }

    fn write_pmpcfg(&mut self, index: usize, value: u8) {
        self.writes.push(RegisterWrite::PmpCfg { index, value });
        if index < REGION_COUNT && !self.entry_locked(index) {
            self.pmpcfg[index] = value;
        }
    }

    fn enable_machine_whitelist(&mut self) {
        self.writes.push(RegisterWrite::MachineWhitelist);
        self.mseccfg |= MSECCFG_MMWP;
    }

    fn read_status(&self) -> usize {
        self.mstatus
    }

    fn write_status(&mut self, value: usize) {
        self.writes.push(RegisterWrite::Status(value));
        self.mstatus = value;
    }

    fn trap_vector(&self) -> usize {
        self.mtvec
    }

    fn write_trap_vector(&mut self, vector: usize) {
        self.writes.push(RegisterWrite::TrapVector(vector));
        self.mtvec = vector;
    }

    fn capture_trap(&self) -> TrapRecord {
        TrapRecord {
            cause: self.mcause,
            faulting_pc: self.mepc,
            faulting_address: self.mtval,
            status_snapshot: self.mstatus,
        }
    }

    unsafe fn resume_at(&mut self, entry: usize, stack_pointer: usize) -> SimExit {
        self.writes.push(RegisterWrite::Resume { entry, stack_pointer });
        // mret: level from MPP, MIE from MPIE, MPIE set, MPP back to U.
        let level = PrivilegeLevel::from_status(self.mstatus).unwrap_or(PrivilegeLevel::User);
        let ie = if self.mstatus & mstatus::MPIE != 0 { mstatus::MIE } else { 0 };
        self.mstatus = (self.mstatus & !(mstatus::MPP_MASK | mstatus::MIE)) | mstatus::MPIE | ie;
        self.mepc = entry;
        self.level = level;
        self.pc = entry;
        self.sp = stack_pointer;
        self.entered = Some((entry, stack_pointer, level));
        self.run()
    }
}

/// Instruction-level view handed to a routine.
pub struct Cpu<'a> {
    hart: &'a mut SimHart,
}

impl Cpu<'_> {
    pub fn pc(&self) -> usize {
        self.hart.pc
    }

    pub fn stack_pointer(&self) -> usize {
        self.hart.sp
    }

    pub fn privilege(&self) -> PrivilegeLevel {
        self.hart.level
    }

    /// `lw`
    pub fn load(&mut self, addr: usize) -> Result<u32, Fault> {
        self.hart.fetch()?;
        if !self.hart.check(addr, 4, AccessKind::Read) {
            return Err(Fault { cause: TrapCause::LoadAccessFault, address: addr });
        }
        self.hart.retire();
        Ok(self.hart.peek(addr))
    }

    /// `sw`
    pub fn store(&mut self, addr: usize, value: u32) -> Result<(), Fault> {
        self.hart.fetch()?;
        if !self.hart.check(addr, 4, AccessKind::Write) {
            return Err(Fault { cause: TrapCause::StoreAccessFault, address: addr });
        }
        self.hart.retire();
        self.hart.poke(addr, value);
        Ok(())
    }

    /// `csrr mstatus`; illegal below machine mode.
    pub fn read_status(&mut self) -> Result<usize, Fault> {
        self.hart.fetch()?;
        if self.hart.level != PrivilegeLevel::Machine {
            return Err(Fault { cause: TrapCause::IllegalInstruction, address: 0 });
        }
        self.hart.retire();
        Ok(self.hart.mstatus)
    }

    /// Byte stores to the UART transmit register.
    pub fn print(&mut self, message: &str) -> Result<(), Fault> {
        let thr = UART0_BASE + UART_THR;
        for ch in message.chars() {
            self.hart.fetch()?;
            if !self.hart.check(thr, 1, AccessKind::Write) {
                return Err(Fault { cause: TrapCause::StoreAccessFault, address: thr });
            }
            self.hart.retire();
            self.hart.console.push(ch);
        }
        Ok(())
    }
}
