// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Configuration-time error kinds
//! PUBLIC API: ConfigError, LockedRegionError, TransitionError, InstallError, BootError
//! INVARIANTS: Every error is raised before hardware state is touched; runtime
//!             protection faults are not errors and never appear here

use thiserror::Error;

use crate::pmp::REGION_COUNT;
use crate::privilege::PrivilegeLevel;

/// Attempt to rewrite a region whose lock bit is set.
///
/// Hardware silently drops such writes until the next reset; software refuses
/// them up front so the caller learns about it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("PMP region {index} is locked until reset")]
pub struct LockedRegionError {
    pub index: usize,
}

/// Rejected region configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("region size {size:#x} is below the 8-byte minimum")]
    TooSmall { size: usize },
    #[error("region size {size:#x} is not a power of two")]
    NotPowerOfTwo { size: usize },
    #[error("region base {base:#x} is not aligned to its size {size:#x}")]
    Misaligned { base: usize, size: usize },
    #[error("region {base:#x}+{size:#x} wraps the address space")]
    OutOfRange { base: usize, size: usize },
    #[error("region index {index} exceeds the {max} available entries", max = REGION_COUNT)]
    IndexOutOfRange { index: usize },
    #[error("machine-mode whitelist policy is sticky until reset")]
    DefaultAccessSticky,
    #[error(transparent)]
    Locked(#[from] LockedRegionError),
}

/// Rejected privilege transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum TransitionError {
    #[error("target level {0:?} is not below machine mode")]
    NotLower(PrivilegeLevel),
    #[error("entry address is null")]
    NullEntry,
    #[error("stack pointer {0:#x} is not 16-byte aligned")]
    StackMisaligned(usize),
    #[error("entry {entry:#x} is not executable at {level:?}")]
    EntryNotExecutable { entry: usize, level: PrivilegeLevel },
    #[error("stack below {sp:#x} is not writable at {level:?}")]
    StackInaccessible { sp: usize, level: PrivilegeLevel },
}

/// Trap vector installation failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum InstallError {
    #[error("trap dispatcher is already installed")]
    AlreadyInstalled,
    #[error("trap vector {0:#x} is not 4-byte aligned")]
    MisalignedVector(usize),
}

/// Anything that stops the boot flow before the restricted routine runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum BootError {
    #[error("trap install: {0}")]
    Install(#[from] InstallError),
    #[error("region config: {0}")]
    Config(#[from] ConfigError),
    #[error("transition: {0}")]
    Transition(#[from] TransitionError),
}
