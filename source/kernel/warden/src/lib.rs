// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! WARDEN: PMP-based isolation for a single RISC-V hart.
//!
//! The kernel locks data regions with physical memory protection entries,
//! drops from machine mode into a restricted routine and reports (then halts
//! on) any access the restricted routine is not allowed to perform.
//!
//! Everything except the bare-metal glue (`hal::machine`, the trap vector,
//! `kmain`) builds on the host; `sim::SimHart` stands in for the hardware in
//! tests.

#![cfg_attr(not(test), no_std)]
#![forbid(clippy::unwrap_used)]

#[cfg(not(target_os = "none"))]
extern crate alloc;

mod arch;
pub mod boot;
pub mod diag;
pub mod error;
pub mod hal;
pub mod pmp;
pub mod privilege;
#[cfg(not(target_os = "none"))]
pub mod sim;
pub mod trap;
pub mod uart;

#[cfg(all(target_arch = "riscv64", target_os = "none"))]
mod panic;
#[cfg(all(target_arch = "riscv64", target_os = "none"))]
mod restricted;

pub use boot::{isolate, IsolationPlan, RegionAssignment};
pub use error::{BootError, ConfigError, InstallError, LockedRegionError, TransitionError};
pub use hal::HardwareRegisters;
pub use pmp::{
    manager::RegionManager, AccessKind, DefaultAccess, NapotRegion, Permissions,
    RegionDescriptor, REGION_COUNT,
};
pub use privilege::{ExecutionContext, PrivilegeLevel, TransitionController};
pub use trap::{DispatcherState, SharedDispatcher, TrapArmed, TrapCause, TrapDispatcher, TrapRecord};

#[cfg(all(target_arch = "riscv64", target_os = "none"))]
pub use boot::{early_boot_init, kmain};
