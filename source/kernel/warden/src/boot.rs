// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Boot flow for the isolation kernel
//! PUBLIC API: RegionAssignment, IsolationPlan, isolate(), early_boot_init(), kmain()
//! DEPENDS_ON: trap::TrapDispatcher, pmp::manager::RegionManager, privilege::TransitionController
//! INVARIANTS: trap vector before regions, regions before the machine default,
//!             all three before the privilege drop; any error stops the flow
//!             while the hart is still in machine mode

use crate::error::BootError;
use crate::hal::HardwareRegisters;
use crate::pmp::manager::RegionManager;
use crate::pmp::{DefaultAccess, RegionDescriptor};
use crate::privilege::{ExecutionContext, TransitionController};
use crate::trap::SharedDispatcher;

/// Descriptor destined for PMP entry `index`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RegionAssignment {
    pub index: usize,
    pub descriptor: RegionDescriptor,
}

/// Everything the boot flow needs to isolate one routine.
#[derive(Clone, Copy, Debug)]
pub struct IsolationPlan<'a> {
    /// Applied in order; lower indices win when regions overlap.
    pub regions: &'a [RegionAssignment],
    pub machine_default: DefaultAccess,
    pub trap_vector: usize,
    pub context: ExecutionContext,
}

/// Installs the dispatcher, applies `plan` and drops into the restricted routine.
///
/// # Safety
/// Must run in machine mode with nothing else touching the PMP or trap CSRs.
/// On hardware a successful call does not return.
pub unsafe fn isolate<H: HardwareRegisters>(
    hw: &mut H,
    dispatcher: &SharedDispatcher,
    regions: &mut RegionManager,
    plan: &IsolationPlan<'_>,
) -> Result<H::Resumed, BootError> {
    // The guard must be gone before anything can trap into the dispatcher.
    let armed = dispatcher.lock().install(hw, plan.trap_vector)?;

    for assignment in plan.regions {
        regions.configure(hw, assignment.index, assignment.descriptor)?;
    }
    regions.set_machine_default(hw, plan.machine_default)?;
    if cfg!(feature = "boot_banner") {
        log::info!(target: "boot", "{}", regions);
    }

    // SAFETY: `regions` mirrors what was just written; the caller owns the hart.
    let resumed = unsafe { TransitionController::new().drop_to(hw, regions, &armed, plan.context)? };
    Ok(resumed)
}

#[cfg(all(target_arch = "riscv64", target_os = "none"))]
pub use self::machine::{early_boot_init, kmain};

#[cfg(all(target_arch = "riscv64", target_os = "none"))]
mod machine {
    use super::{isolate, IsolationPlan};
    use crate::hal::machine::Machine;
    use crate::pmp::manager::RegionManager;
    use crate::pmp::DefaultAccess;
    use crate::{restricted, trap, uart};

    extern "C" {
        static mut __bss_start: u8;
        static mut __bss_end: u8;
        static __trap_stack_top: u8;
    }

    /// Clears `.bss`, brings up the UART and the logger.
    ///
    /// # Safety
    /// Call once on the boot hart before any other Rust code touches statics.
    pub unsafe fn early_boot_init() {
        // SAFETY: single hart, before any static is in use.
        unsafe {
            crate::arch::riscv::clear_bss(
                core::ptr::addr_of_mut!(__bss_start),
                core::ptr::addr_of_mut!(__bss_end),
            );
            uart::KernelUart::lock().init();
        }
        #[cfg(feature = "boot_banner")]
        uart::write_line("Prog Start!");
        if crate::diag::log::init().is_err() {
            uart::write_line("boot: logger already installed");
        }
    }

    /// Isolates the restricted routine. Returns only by parking the hart.
    pub fn kmain() -> ! {
        // SAFETY: linker-provided symbol; the trap stack is reserved in kernel.ld.
        let trap_stack_top = unsafe { core::ptr::addr_of!(__trap_stack_top) } as usize;
        // SAFETY: first and only owner of the register file on this hart.
        let mut hart = unsafe { Machine::new(trap_stack_top) };
        let mut regions = RegionManager::new();

        let result = restricted::regions().map_err(Into::into).and_then(|assignments| {
            let plan = IsolationPlan {
                regions: &assignments,
                machine_default: DefaultAccess::Allow,
                trap_vector: trap::trap_vector_address(),
                context: restricted::context(),
            };
            // SAFETY: machine mode, boot hart, nothing else configures the PMP.
            unsafe { isolate(&mut hart, &trap::DISPATCHER, &mut regions, &plan) }
        });
        if let Err(err) = result {
            log::error!(target: "boot", "isolation failed: {}", err);
        }
        crate::arch::riscv::park()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ConfigError, TransitionError};
    use crate::pmp::{AccessKind, Permissions};
    use crate::privilege::PrivilegeLevel;
    use crate::sim::{RegisterWrite, SimExit, SimHart};
    use crate::trap::{DispatcherState, TrapDispatcher};

    const ENTRY: usize = 0x8000_4000;
    const STACK_TOP: usize = 0x8000_6000;

    fn assignments() -> [RegionAssignment; 2] {
        [
            RegionAssignment {
                index: 0,
                descriptor: RegionDescriptor::new(ENTRY, 0x1000, Permissions::READ | Permissions::EXECUTE)
                    .expect("text"),
            },
            RegionAssignment {
                index: 1,
                descriptor: RegionDescriptor::new(0x8000_5000, 0x1000, Permissions::READ | Permissions::WRITE)
                    .expect("stack"),
            },
        ]
    }

    fn plan(regions: &[RegionAssignment]) -> IsolationPlan<'_> {
        IsolationPlan {
            regions,
            machine_default: DefaultAccess::Allow,
            trap_vector: 0x8000_0100,
            context: ExecutionContext { entry: ENTRY, stack_pointer: STACK_TOP, target_level: PrivilegeLevel::User },
        }
    }

    #[test]
    fn steps_run_in_order() {
        let mut hart = SimHart::new();
        hart.load_routine(ENTRY, |_| Ok(()));
        let dispatcher = SharedDispatcher::new(TrapDispatcher::new());
        let mut regions = RegionManager::new();
        let assignments = assignments();

        // SAFETY: simulated hart.
        let exit = unsafe { isolate(&mut hart, &dispatcher, &mut regions, &plan(&assignments)) };
        assert_eq!(exit, Ok(SimExit::Parked { pc: ENTRY }));
        assert_eq!(dispatcher.lock().state(), DispatcherState::Armed);

        let writes = hart.writes();
        assert_eq!(writes.first(), Some(&RegisterWrite::TrapVector(0x8000_0100)));
        assert!(matches!(writes[writes.len() - 2], RegisterWrite::Status(_)));
        assert_eq!(writes.last(), Some(&RegisterWrite::Resume { entry: ENTRY, stack_pointer: STACK_TOP }));
        assert!(regions.permits(STACK_TOP - 8, 8, AccessKind::Write, PrivilegeLevel::User));
    }

    #[test]
    fn config_error_stops_before_transition() {
        let mut hart = SimHart::new();
        let dispatcher = SharedDispatcher::new(TrapDispatcher::new());
        let mut regions = RegionManager::new();
        let mut assignments = assignments();
        assignments[1].index = crate::pmp::REGION_COUNT;

        // SAFETY: simulated hart.
        let result = unsafe { isolate(&mut hart, &dispatcher, &mut regions, &plan(&assignments)) };
        assert_eq!(
            result,
            Err(BootError::Config(ConfigError::IndexOutOfRange { index: crate::pmp::REGION_COUNT }))
        );
        assert_eq!(hart.entered(), None);
        assert_eq!(hart.privilege(), PrivilegeLevel::Machine);
    }

    #[test]
    fn stack_outside_regions_is_rejected() {
        let mut hart = SimHart::new();
        let dispatcher = SharedDispatcher::new(TrapDispatcher::new());
        let mut regions = RegionManager::new();
        let assignments = assignments();
        let mut plan = plan(&assignments);
        plan.context.stack_pointer = 0x8000_9000;

        // SAFETY: simulated hart.
        let result = unsafe { isolate(&mut hart, &dispatcher, &mut regions, &plan) };
        assert_eq!(
            result,
            Err(BootError::Transition(TransitionError::StackInaccessible {
                sp: 0x8000_9000,
                level: PrivilegeLevel::User
            }))
        );
        assert_eq!(hart.entered(), None);
    }
}
