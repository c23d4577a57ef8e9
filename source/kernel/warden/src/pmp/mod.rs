// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Physical memory protection model
//! PUBLIC API: Permissions, AddressMode, CfgFields, RegionDescriptor, AccessKind,
//!             DefaultAccess, cfg_byte(), decode_cfg(), permits()
//! DEPENDS_ON: pmp::encode (NAPOT arithmetic), privilege::PrivilegeLevel
//! INVARIANTS: Entries are matched in ascending index order and the first match
//!             wins; a partial match always fails; S/U accesses with no match
//!             are denied; M-mode ignores unlocked entries

pub mod encode;
pub mod manager;

use bitflags::bitflags;
use core::fmt;
use static_assertions::const_assert;

use crate::error::ConfigError;
use crate::privilege::PrivilegeLevel;

pub use encode::{encode_legacy_pmpaddr, NapotRegion};

/// Number of PMP entries this kernel manages (one `pmpcfg0` on RV64).
pub const REGION_COUNT: usize = 8;
/// Smallest span a NAPOT entry can describe.
pub const MIN_REGION_SIZE: usize = 8;

const_assert!(REGION_COUNT <= core::mem::size_of::<u64>());
const_assert!(MIN_REGION_SIZE.is_power_of_two());

/// Lock bit of a `pmpNcfg` byte.
pub const CFG_LOCK: u8 = 1 << 7;
const CFG_MODE_SHIFT: u8 = 3;
const CFG_MODE_MASK: u8 = 0b11 << CFG_MODE_SHIFT;
const CFG_PERM_MASK: u8 = 0b111;

bitflags! {
    #[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
    /// Access rights granted by a region (bits 2:0 of `pmpNcfg`).
    pub struct Permissions: u8 {
        const READ = 1 << 0;
        const WRITE = 1 << 1;
        const EXECUTE = 1 << 2;
    }
}

impl fmt::Display for Permissions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let flag = |p: Permissions, c: char| if self.contains(p) { c } else { '-' };
        write!(
            f,
            "{}{}{}",
            flag(Permissions::READ, 'r'),
            flag(Permissions::WRITE, 'w'),
            flag(Permissions::EXECUTE, 'x')
        )
    }
}

/// Address-matching mode (bits 4:3 of `pmpNcfg`).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum AddressMode {
    Off = 0,
    /// Top of range: `pmpaddr[i-1] <= a < pmpaddr[i]`.
    Tor = 1,
    /// Naturally aligned four-byte region.
    Na4 = 2,
    /// Naturally aligned power-of-two region, at least eight bytes.
    Napot = 3,
}

impl AddressMode {
    const fn from_bits(bits: u8) -> Self {
        match bits & 0b11 {
            0 => Self::Off,
            1 => Self::Tor,
            2 => Self::Na4,
            _ => Self::Napot,
        }
    }
}

/// Builds a `pmpNcfg` byte.
pub const fn cfg_byte(permissions: Permissions, mode: AddressMode, locked: bool) -> u8 {
    let lock = if locked { CFG_LOCK } else { 0 };
    (permissions.bits() & CFG_PERM_MASK) | ((mode as u8) << CFG_MODE_SHIFT) | lock
}

/// Decoded `pmpNcfg` byte.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CfgFields {
    pub permissions: Permissions,
    pub mode: AddressMode,
    pub locked: bool,
}

/// Splits a `pmpNcfg` byte into its fields. Reserved bits 6:5 are ignored.
pub const fn decode_cfg(byte: u8) -> CfgFields {
    CfgFields {
        permissions: Permissions::from_bits_truncate(byte & CFG_PERM_MASK),
        mode: AddressMode::from_bits((byte & CFG_MODE_MASK) >> CFG_MODE_SHIFT),
        locked: byte & CFG_LOCK != 0,
    }
}

/// One NAPOT protection region as requested by the caller.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RegionDescriptor {
    region: NapotRegion,
    permissions: Permissions,
    locked: bool,
}

impl RegionDescriptor {
    /// Validates `base`/`size` and builds an unlocked descriptor.
    pub fn new(base: usize, size: usize, permissions: Permissions) -> Result<Self, ConfigError> {
        Ok(Self { region: NapotRegion::new(base, size)?, permissions, locked: false })
    }

    /// Requests the lock bit; the entry becomes immutable once applied.
    #[must_use]
    pub const fn locked(mut self) -> Self {
        self.locked = true;
        self
    }

    pub const fn region(&self) -> NapotRegion {
        self.region
    }

    pub fn base(&self) -> usize {
        self.region.base()
    }

    /// Span in bytes; `None` only for a region covering the whole address space.
    pub fn size(&self) -> Option<usize> {
        self.region.size()
    }

    pub const fn permissions(&self) -> Permissions {
        self.permissions
    }

    pub const fn is_locked(&self) -> bool {
        self.locked
    }

    /// Value for the `pmpaddrN` register; written first.
    pub const fn pmpaddr(&self) -> usize {
        self.region.pmpaddr()
    }

    /// Value for the `pmpNcfg` byte; written second.
    pub const fn pmpcfg(&self) -> u8 {
        cfg_byte(self.permissions, AddressMode::Napot, self.locked)
    }
}

impl fmt::Display for RegionDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.region, self.permissions)?;
        if self.locked {
            f.write_str(" L")?;
        }
        Ok(())
    }
}

/// Kind of memory access being checked.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AccessKind {
    Read,
    Write,
    Execute,
}

impl AccessKind {
    pub const fn required(self) -> Permissions {
        match self {
            Self::Read => Permissions::READ,
            Self::Write => Permissions::WRITE,
            Self::Execute => Permissions::EXECUTE,
        }
    }
}

/// Outcome for a machine-mode access that matches no entry.
///
/// S/U accesses without a match are always denied; this only covers M-mode.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum DefaultAccess {
    /// Reset behaviour.
    #[default]
    Allow,
    /// Smepmp `mseccfg.MMWP`; sticky until reset.
    Deny,
}

/// Span matched by entry `index`, or `None` when the entry is off.
fn entry_span(addrs: &[usize], cfgs: &[u8], index: usize) -> Option<(usize, Option<usize>)> {
    match decode_cfg(cfgs[index]).mode {
        AddressMode::Off => None,
        AddressMode::Tor => {
            let bottom = if index == 0 { 0 } else { addrs[index - 1] << 2 };
            let top = addrs[index] << 2;
            // An empty TOR range matches nothing.
            (top > bottom).then(|| (bottom, Some(top - bottom)))
        }
        AddressMode::Na4 => Some((addrs[index] << 2, Some(4))),
        AddressMode::Napot => {
            let region = NapotRegion::from_pmpaddr(addrs[index]);
            Some((region.base(), region.size()))
        }
    }
}

/// Applies the hardware matching rule to the raw `pmpaddr`/`pmpcfg` contents.
///
/// `width` is the access size in bytes (at least one).
pub fn permits(
    addrs: &[usize],
    cfgs: &[u8],
    addr: usize,
    width: usize,
    kind: AccessKind,
    level: PrivilegeLevel,
    machine_default: DefaultAccess,
) -> bool {
    let Some(last) = addr.checked_add(width.max(1) - 1) else {
        return false;
    };
    for index in 0..addrs.len().min(cfgs.len()) {
        let Some((start, size)) = entry_span(addrs, cfgs, index) else {
            continue;
        };
        let end = size.and_then(|size| start.checked_add(size - 1)).unwrap_or(usize::MAX);
        if last < start || addr > end {
            continue;
        }
        if addr < start || last > end {
            // Partial match fails at every privilege level.
            return false;
        }
        let fields = decode_cfg(cfgs[index]);
        if level == PrivilegeLevel::Machine && !fields.locked {
            return true;
        }
        return fields.permissions.contains(kind.required());
    }
    level == PrivilegeLevel::Machine && machine_default == DefaultAccess::Allow
}
