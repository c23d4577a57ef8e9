//! CONTEXT: Protection properties of the region manager on the simulated hart
//! INTENT: Check the hardware-facing guarantees the boot flow relies on
//! DEPS: warden::sim (host model of the hart)
//! TESTS: Deny-by-default, permission enforcement, lock immutability,
//!        transition atomicity, fault capture fidelity, machine-mode locking,
//!        whitelist policy, legacy encoding span
// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

use warden::pmp::encode_legacy_pmpaddr;
use warden::pmp::{cfg_byte, AddressMode};
use warden::sim::{Cpu, Fault, RegisterWrite, SimExit, SimHart};
use warden::{
    ConfigError, DefaultAccess, ExecutionContext, HardwareRegisters, LockedRegionError, Permissions,
    PrivilegeLevel, RegionDescriptor, RegionManager, TransitionController, TrapCause, TrapDispatcher,
    TrapRecord,
};

const TRAP_VECTOR: usize = 0x8000_0100;
const TEXT: usize = 0x8000_4000;
const STACK: usize = 0x8000_5000;
const STACK_TOP: usize = STACK + 0x1000;
const DATA: usize = 0x8001_0000;
const ELSEWHERE: usize = 0x8003_0000;

/// Hart with text and stack regions for a user routine at `TEXT`.
fn user_hart() -> (SimHart, RegionManager) {
    let mut hart = SimHart::new();
    let mut regions = RegionManager::new();
    let text = RegionDescriptor::new(TEXT, 0x1000, Permissions::READ | Permissions::EXECUTE).expect("text");
    let stack = RegionDescriptor::new(STACK, 0x1000, Permissions::READ | Permissions::WRITE).expect("stack");
    regions.configure(&mut hart, 4, text).expect("text region");
    regions.configure(&mut hart, 5, stack).expect("stack region");
    (hart, regions)
}

/// Drops to user mode at `TEXT` running `routine`.
fn run_user(hart: &mut SimHart, regions: &RegionManager, routine: warden::sim::Routine) -> SimExit {
    hart.load_routine(TEXT, routine);
    let mut dispatcher = TrapDispatcher::new();
    let armed = dispatcher.install(hart, TRAP_VECTOR).expect("install");
    let context = ExecutionContext { entry: TEXT, stack_pointer: STACK_TOP, target_level: PrivilegeLevel::User };
    // SAFETY: simulated hart.
    unsafe { TransitionController::new().drop_to(hart, regions, &armed, context) }.expect("valid context")
}

fn trapped_with(hart: &SimHart, exit: SimExit) -> TrapRecord {
    assert_eq!(exit, SimExit::Trapped { vector: TRAP_VECTOR });
    assert_eq!(hart.privilege(), PrivilegeLevel::Machine);
    hart.capture_trap()
}

#[test]
fn unmatched_user_access_is_denied() {
    let (mut hart, regions) = user_hart();
    let exit = run_user(&mut hart, &regions, |cpu| cpu.load(ELSEWHERE).map(drop));
    let record = trapped_with(&hart, exit);
    assert_eq!(record.classify(), TrapCause::LoadAccessFault);
    assert_eq!(record.faulting_address, ELSEWHERE);
}

#[test]
fn unmatched_user_store_is_denied() {
    let (mut hart, regions) = user_hart();
    let exit = run_user(&mut hart, &regions, |cpu| cpu.store(ELSEWHERE, 1));
    assert_eq!(trapped_with(&hart, exit).classify(), TrapCause::StoreAccessFault);
    assert_eq!(hart.peek(ELSEWHERE), 0);
}

#[test]
fn read_permission_gates_loads() {
    let (mut hart, mut regions) = user_hart();
    hart.poke(DATA, 0x5eed);
    let readable = RegionDescriptor::new(DATA, 16, Permissions::READ).expect("data");
    regions.configure(&mut hart, 0, readable).expect("data region");

    fn copy_to_stack(cpu: &mut Cpu<'_>) -> Result<(), Fault> {
        let value = cpu.load(DATA)?;
        cpu.store(STACK_TOP - 4, value)?;
        cpu.store(DATA, 0)
    }
    let exit = run_user(&mut hart, &regions, copy_to_stack);
    assert_eq!(hart.peek(STACK_TOP - 4), 0x5eed);
    let record = trapped_with(&hart, exit);
    assert_eq!(record.classify(), TrapCause::StoreAccessFault);
    assert_eq!(hart.peek(DATA), 0x5eed);
}

#[test]
fn missing_read_permission_faults() {
    let (mut hart, mut regions) = user_hart();
    let hidden = RegionDescriptor::new(DATA, 16, Permissions::EXECUTE).expect("data");
    regions.configure(&mut hart, 0, hidden).expect("data region");
    let exit = run_user(&mut hart, &regions, |cpu| cpu.load(DATA + 8).map(drop));
    let record = trapped_with(&hart, exit);
    assert_eq!(record.classify(), TrapCause::LoadAccessFault);
    assert_eq!(record.faulting_address, DATA + 8);
}

#[test]
fn locked_region_survives_reconfiguration_attempts() {
    let (mut hart, mut regions) = user_hart();
    let locked = RegionDescriptor::new(DATA, 16, Permissions::empty()).expect("data").locked();
    regions.configure(&mut hart, 0, locked).expect("lock");
    let (addr, cfg) = (hart.pmpaddr(0), hart.pmpcfg(0));

    let open = RegionDescriptor::new(DATA, 16, Permissions::all()).expect("data");
    assert_eq!(regions.configure(&mut hart, 0, open), Err(ConfigError::Locked(LockedRegionError { index: 0 })));

    // Bypass the manager: hardware drops the writes.
    hart.write_pmpaddr(0, usize::MAX);
    hart.write_pmpcfg(0, cfg_byte(Permissions::all(), AddressMode::Napot, false));
    assert_eq!((hart.pmpaddr(0), hart.pmpcfg(0)), (addr, cfg));

    let exit = run_user(&mut hart, &regions, |cpu| cpu.load(DATA).map(drop));
    assert_eq!(trapped_with(&hart, exit).classify(), TrapCause::LoadAccessFault);
}

#[test]
fn routine_starts_with_requested_stack_and_level() {
    let (mut hart, regions) = user_hart();
    fn observe(cpu: &mut Cpu<'_>) -> Result<(), Fault> {
        assert_eq!(cpu.pc(), TEXT);
        assert_eq!(cpu.stack_pointer(), STACK_TOP);
        assert_eq!(cpu.privilege(), PrivilegeLevel::User);
        cpu.store(cpu.stack_pointer() - 4, 1)?;
        cpu.read_status().map(drop)
    }
    let exit = run_user(&mut hart, &regions, observe);
    assert_eq!(hart.entered(), Some((TEXT, STACK_TOP, PrivilegeLevel::User)));
    // mstatus is machine-only: the routine's attempt traps as illegal.
    let record = trapped_with(&hart, exit);
    assert_eq!(record.classify(), TrapCause::IllegalInstruction);
    assert_eq!(record.faulting_pc, TEXT + 4);
}

#[test]
fn status_is_written_right_before_resume() {
    let (mut hart, regions) = user_hart();
    run_user(&mut hart, &regions, |_| Ok(()));
    let writes = hart.writes();
    let resume = writes.len() - 1;
    assert_eq!(writes[resume], RegisterWrite::Resume { entry: TEXT, stack_pointer: STACK_TOP });
    let RegisterWrite::Status(status) = writes[resume - 1] else {
        panic!("expected mstatus write before resume, got {:?}", writes[resume - 1]);
    };
    assert_eq!(PrivilegeLevel::from_status(status), Some(PrivilegeLevel::User));
}

#[test]
fn nothing_after_the_faulting_access_runs() {
    let (mut hart, mut regions) = user_hart();
    let locked = RegionDescriptor::new(DATA, 16, Permissions::empty()).expect("data").locked();
    regions.configure(&mut hart, 0, locked).expect("lock");

    fn two_stores_then_violation(cpu: &mut Cpu<'_>) -> Result<(), Fault> {
        cpu.store(STACK_TOP - 4, 1)?;
        cpu.store(STACK_TOP - 8, 2)?;
        cpu.load(DATA + 4)?;
        cpu.store(STACK_TOP - 12, 3)
    }
    let exit = run_user(&mut hart, &regions, two_stores_then_violation);
    let record = trapped_with(&hart, exit);
    assert_eq!(record.faulting_pc, TEXT + 8);
    assert_eq!(record.faulting_address, DATA + 4);
    assert_eq!(hart.peek(STACK_TOP - 8), 2);
    assert_eq!(hart.peek(STACK_TOP - 12), 0);
}

#[test]
fn only_locked_regions_bind_machine_mode() {
    const OPEN: usize = DATA;
    const SEALED: usize = DATA + 0x100;
    let mut hart = SimHart::new();
    let mut regions = RegionManager::new();
    let open = RegionDescriptor::new(OPEN, 16, Permissions::empty()).expect("open");
    let sealed = RegionDescriptor::new(SEALED, 16, Permissions::empty()).expect("sealed").locked();
    regions.configure(&mut hart, 0, open).expect("open region");
    regions.configure(&mut hart, 1, sealed).expect("sealed region");
    hart.write_trap_vector(TRAP_VECTOR);
    hart.poke(OPEN, 7);

    hart.load_routine(TEXT, |cpu| {
        assert_eq!(cpu.load(OPEN)?, 7);
        Ok(())
    });
    assert_eq!(hart.execute(TEXT), SimExit::Parked { pc: TEXT + 4 });

    hart.load_routine(TEXT + 0x10, |cpu| cpu.load(SEALED).map(drop));
    let exit = hart.execute(TEXT + 0x10);
    let record = trapped_with(&hart, exit);
    assert_eq!(record.classify(), TrapCause::LoadAccessFault);
    assert_eq!(PrivilegeLevel::from_status(record.status_snapshot), Some(PrivilegeLevel::Machine));
}

#[test]
fn whitelist_policy_denies_unmatched_machine_fetch() {
    let mut hart = SimHart::new();
    let mut regions = RegionManager::new();
    hart.write_trap_vector(TRAP_VECTOR);
    hart.load_routine(TEXT, |_| Ok(()));
    assert_eq!(hart.execute(TEXT), SimExit::Parked { pc: TEXT });

    regions.set_machine_default(&mut hart, DefaultAccess::Deny).expect("deny");
    assert!(hart.machine_whitelist());
    let exit = hart.execute(TEXT);
    let record = trapped_with(&hart, exit);
    assert_eq!(record.classify(), TrapCause::InstructionAccessFault);
    assert_eq!(record.faulting_address, TEXT);
}

#[test]
fn legacy_encoding_leaves_upper_half_exposed() {
    let (mut hart, regions) = user_hart();
    let everything = cfg_byte(Permissions::READ, AddressMode::Napot, false);
    hart.write_pmpaddr(0, encode_legacy_pmpaddr(DATA, 16));
    hart.write_pmpcfg(0, cfg_byte(Permissions::empty(), AddressMode::Napot, true));
    hart.write_pmpaddr(7, usize::MAX);
    hart.write_pmpcfg(7, everything);

    // Lower eight bytes are protected, the upper eight fall through.
    let exit = run_user(&mut hart, &regions, |cpu| {
        cpu.load(DATA + 8)?;
        cpu.load(DATA)?;
        Ok(())
    });
    let record = trapped_with(&hart, exit);
    assert_eq!(record.faulting_address, DATA);
}
