// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Privilege transition controller
//! PUBLIC API: PrivilegeLevel, ExecutionContext, TransitionController::drop_to()
//! DEPENDS_ON: hal::HardwareRegisters, pmp::manager::RegionManager, trap::TrapArmed
//! INVARIANTS: Only downward transitions; the trap dispatcher is armed and the
//!             regions are final before control leaves machine mode; the target
//!             observes the requested stack pointer and level as its first state

use core::fmt;

use crate::arch::riscv::mstatus;
use crate::error::TransitionError;
use crate::hal::HardwareRegisters;
use crate::pmp::manager::RegionManager;
use crate::pmp::AccessKind;
use crate::trap::TrapArmed;

/// Width of the first fetch at the entry point.
const INSTRUCTION_BYTES: usize = 4;

/// Required stack alignment of the RISC-V calling convention.
pub const STACK_ALIGN: usize = 16;

/// RISC-V privilege level, numbered as in `mstatus.MPP`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum PrivilegeLevel {
    User = 0,
    Supervisor = 1,
    Machine = 3,
}

impl PrivilegeLevel {
    /// Decodes an `MPP` field; the reserved encoding 2 reads as `None`.
    pub const fn from_mpp(bits: usize) -> Option<Self> {
        match bits & 0b11 {
            0 => Some(Self::User),
            1 => Some(Self::Supervisor),
            3 => Some(Self::Machine),
            _ => None,
        }
    }

    /// Level stored in the `MPP` field of an `mstatus` value.
    pub const fn from_status(status: usize) -> Option<Self> {
        Self::from_mpp((status & mstatus::MPP_MASK) >> mstatus::MPP_SHIFT)
    }

    pub const fn mpp_bits(self) -> usize {
        (self as usize) << mstatus::MPP_SHIFT
    }
}

impl fmt::Display for PrivilegeLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::User => "U",
            Self::Supervisor => "S",
            Self::Machine => "M",
        })
    }
}

/// Where the restricted routine starts and with which privileges.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ExecutionContext {
    pub entry: usize,
    pub stack_pointer: usize,
    pub target_level: PrivilegeLevel,
}

impl ExecutionContext {
    /// Checks everything that can be checked without touching hardware.
    pub fn validate(&self, regions: &RegionManager) -> Result<(), TransitionError> {
        if self.target_level >= PrivilegeLevel::Machine {
            return Err(TransitionError::NotLower(self.target_level));
        }
        if self.entry == 0 {
            return Err(TransitionError::NullEntry);
        }
        if self.stack_pointer % STACK_ALIGN != 0 {
            return Err(TransitionError::StackMisaligned(self.stack_pointer));
        }
        if !regions.permits(self.entry, INSTRUCTION_BYTES, AccessKind::Execute, self.target_level) {
            return Err(TransitionError::EntryNotExecutable { entry: self.entry, level: self.target_level });
        }
        // The stack grows down: the first push lands just below `stack_pointer`.
        let word = core::mem::size_of::<usize>();
        let writable = self
            .stack_pointer
            .checked_sub(word)
            .is_some_and(|slot| regions.permits(slot, word, AccessKind::Write, self.target_level));
        if !writable {
            return Err(TransitionError::StackInaccessible {
                sp: self.stack_pointer,
                level: self.target_level,
            });
        }
        Ok(())
    }
}

/// Moves the hart from machine mode into a less privileged routine.
#[derive(Debug, Default)]
pub struct TransitionController {
    _private: (),
}

impl TransitionController {
    pub const fn new() -> Self {
        Self { _private: () }
    }

    /// Validates `context`, stages `mstatus` and returns into the target.
    ///
    /// `armed` proves the trap dispatcher is installed. On hardware this does
    /// not return; faults in the target end up in the dispatcher.
    ///
    /// # Safety
    /// `regions` must describe the live PMP state and no other code may
    /// reconfigure it until the target traps.
    pub unsafe fn drop_to<H: HardwareRegisters>(
        &self,
        hw: &mut H,
        regions: &RegionManager,
        _armed: &TrapArmed,
        context: ExecutionContext,
    ) -> Result<H::Resumed, TransitionError> {
        context.validate(regions)?;

        log::info!(
            target: "privilege",
            "entering {} at {:#x} sp={:#x}",
            context.target_level,
            context.entry,
            context.stack_pointer
        );
        // mret copies MPIE into MIE; no interrupt source is enabled in `mie`.
        let status = hw.read_status() & !mstatus::MPP_MASK & !mstatus::MIE;
        hw.write_status(status | context.target_level.mpp_bits() | mstatus::MPIE);
        // SAFETY: MPP is staged; entry and stack were checked against `regions`.
        Ok(unsafe { hw.resume_at(context.entry, context.stack_pointer) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pmp::{Permissions, RegionDescriptor};
    use crate::sim::{SimExit, SimHart};
    use crate::trap::TrapDispatcher;

    const STACK_BASE: usize = 0x8002_0000;
    const STACK_SIZE: usize = 0x1000;

    fn stack_regions(hart: &mut SimHart) -> RegionManager {
        let mut regions = RegionManager::new();
        let text = RegionDescriptor::new(0x8000_4000, 0x1000, Permissions::READ | Permissions::EXECUTE)
            .expect("text region");
        regions.configure(hart, 1, text).expect("configure");
        let stack = RegionDescriptor::new(STACK_BASE, STACK_SIZE, Permissions::READ | Permissions::WRITE)
            .expect("stack region");
        regions.configure(hart, 0, stack).expect("configure");
        regions
    }

    fn context(level: PrivilegeLevel) -> ExecutionContext {
        ExecutionContext { entry: 0x8000_4000, stack_pointer: STACK_BASE + STACK_SIZE, target_level: level }
    }

    #[test]
    fn mpp_round_trips_through_status() {
        for level in [PrivilegeLevel::User, PrivilegeLevel::Supervisor, PrivilegeLevel::Machine] {
            assert_eq!(PrivilegeLevel::from_status(level.mpp_bits()), Some(level));
        }
        assert_eq!(PrivilegeLevel::from_mpp(2), None);
    }

    #[test]
    fn rejects_invalid_contexts() {
        let mut hart = SimHart::new();
        let regions = stack_regions(&mut hart);
        assert_eq!(
            context(PrivilegeLevel::Machine).validate(&regions),
            Err(TransitionError::NotLower(PrivilegeLevel::Machine))
        );
        let null = ExecutionContext { entry: 0, ..context(PrivilegeLevel::User) };
        assert_eq!(null.validate(&regions), Err(TransitionError::NullEntry));
        let odd = ExecutionContext { stack_pointer: STACK_BASE + 8, ..context(PrivilegeLevel::User) };
        assert_eq!(odd.validate(&regions), Err(TransitionError::StackMisaligned(STACK_BASE + 8)));
        let outside = ExecutionContext { stack_pointer: STACK_BASE, ..context(PrivilegeLevel::User) };
        assert_eq!(
            outside.validate(&regions),
            Err(TransitionError::StackInaccessible { sp: STACK_BASE, level: PrivilegeLevel::User })
        );
        let unmapped = ExecutionContext { entry: 0x8009_0000, ..context(PrivilegeLevel::User) };
        assert_eq!(
            unmapped.validate(&regions),
            Err(TransitionError::EntryNotExecutable { entry: 0x8009_0000, level: PrivilegeLevel::User })
        );
        let on_stack = ExecutionContext { entry: STACK_BASE, ..context(PrivilegeLevel::User) };
        assert_eq!(
            on_stack.validate(&regions),
            Err(TransitionError::EntryNotExecutable { entry: STACK_BASE, level: PrivilegeLevel::User })
        );
        assert!(context(PrivilegeLevel::Supervisor).validate(&regions).is_ok());
    }

    #[test]
    fn non_executable_entry_stops_before_any_write() {
        let mut hart = SimHart::new();
        let mut regions = RegionManager::new();
        let stack = RegionDescriptor::new(STACK_BASE, STACK_SIZE, Permissions::READ | Permissions::WRITE)
            .expect("stack region");
        regions.configure(&mut hart, 0, stack).expect("configure");
        let mut dispatcher = TrapDispatcher::new();
        let armed = dispatcher.install(&mut hart, 0x8000_0100).expect("install");
        let writes = hart.writes().len();
        let ctx = context(PrivilegeLevel::User);

        // SAFETY: simulated hart.
        let result = unsafe { TransitionController::new().drop_to(&mut hart, &regions, &armed, ctx) };
        assert_eq!(
            result,
            Err(TransitionError::EntryNotExecutable { entry: 0x8000_4000, level: PrivilegeLevel::User })
        );
        assert_eq!(hart.writes().len(), writes);
        assert_eq!(hart.privilege(), PrivilegeLevel::Machine);
    }

    #[test]
    fn stages_previous_privilege_before_resuming() {
        let mut hart = SimHart::new();
        let regions = stack_regions(&mut hart);
        let mut dispatcher = TrapDispatcher::new();
        let armed = dispatcher.install(&mut hart, 0x8000_0100).expect("install");
        let ctx = context(PrivilegeLevel::User);
        hart.load_routine(ctx.entry, |_| Ok(()));

        // SAFETY: simulated hart.
        let exit = unsafe { TransitionController::new().drop_to(&mut hart, &regions, &armed, ctx) };
        assert_eq!(exit, Ok(SimExit::Parked { pc: ctx.entry }));
        assert_eq!(hart.entered(), Some((ctx.entry, ctx.stack_pointer, PrivilegeLevel::User)));
    }

    #[test]
    fn failed_validation_touches_nothing() {
        let mut hart = SimHart::new();
        let regions = stack_regions(&mut hart);
        let mut dispatcher = TrapDispatcher::new();
        let armed = dispatcher.install(&mut hart, 0x8000_0100).expect("install");
        let writes = hart.writes().len();
        let status = hart.read_status();
        let bad = ExecutionContext { entry: 0, ..context(PrivilegeLevel::User) };

        // SAFETY: simulated hart.
        let result = unsafe { TransitionController::new().drop_to(&mut hart, &regions, &armed, bad) };
        assert_eq!(result, Err(TransitionError::NullEntry));
        assert_eq!(hart.writes().len(), writes);
        assert_eq!(hart.read_status(), status);
        assert_eq!(hart.privilege(), PrivilegeLevel::Machine);
    }
}
