// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Protection region manager
//! PUBLIC API: RegionManager::{configure, disable, set_machine_default, permits, region}
//! DEPENDS_ON: hal::HardwareRegisters, pmp::{RegionDescriptor, permits}
//! INVARIANTS: pmpaddr is written before pmpcfg; locked entries are never
//!             rewritten; boot-time, single-threaded use only

use core::fmt;

use super::{cfg_byte, decode_cfg, AccessKind, AddressMode, DefaultAccess, Permissions, RegionDescriptor, REGION_COUNT};
use crate::error::{ConfigError, LockedRegionError};
use crate::hal::HardwareRegisters;
use crate::privilege::PrivilegeLevel;

/// Software shadow of the PMP entries this kernel configured.
#[derive(Debug, Clone)]
pub struct RegionManager {
    regions: [Option<RegionDescriptor>; REGION_COUNT],
    machine_default: DefaultAccess,
}

impl Default for RegionManager {
    fn default() -> Self {
        Self::new()
    }
}

impl RegionManager {
    pub const fn new() -> Self {
        Self { regions: [None; REGION_COUNT], machine_default: DefaultAccess::Allow }
    }

    /// Programs entry `index` with `descriptor`.
    ///
    /// The address register is written before the config byte. Between the
    /// two writes the entry may match with its previous permissions, so no
    /// restricted code may run while regions are being configured.
    pub fn configure<H: HardwareRegisters>(
        &mut self,
        hw: &mut H,
        index: usize,
        descriptor: RegionDescriptor,
    ) -> Result<(), ConfigError> {
        self.ensure_writable(hw, index)?;
        hw.write_pmpaddr(index, descriptor.pmpaddr());
        hw.write_pmpcfg(index, descriptor.pmpcfg());
        self.regions[index] = Some(descriptor);
        log::debug!(target: "pmp", "region {}: {}", index, descriptor);
        Ok(())
    }

    /// Turns an unlocked entry off.
    pub fn disable<H: HardwareRegisters>(&mut self, hw: &mut H, index: usize) -> Result<(), ConfigError> {
        self.ensure_writable(hw, index)?;
        hw.write_pmpcfg(index, cfg_byte(Permissions::empty(), AddressMode::Off, false));
        hw.write_pmpaddr(index, 0);
        self.regions[index] = None;
        log::debug!(target: "pmp", "region {}: off", index);
        Ok(())
    }

    /// Selects what machine mode gets for addresses no entry matches.
    ///
    /// `Deny` cannot be undone before reset.
    pub fn set_machine_default<H: HardwareRegisters>(
        &mut self,
        hw: &mut H,
        default: DefaultAccess,
    ) -> Result<(), ConfigError> {
        match (self.machine_default, default) {
            (current, requested) if current == requested => Ok(()),
            (DefaultAccess::Deny, DefaultAccess::Allow) => Err(ConfigError::DefaultAccessSticky),
            (_, _) => {
                hw.enable_machine_whitelist();
                self.machine_default = DefaultAccess::Deny;
                log::info!(target: "pmp", "machine-mode default: deny");
                Ok(())
            }
        }
    }

    pub const fn machine_default(&self) -> DefaultAccess {
        self.machine_default
    }

    pub fn region(&self, index: usize) -> Option<&RegionDescriptor> {
        self.regions.get(index).and_then(Option::as_ref)
    }

    /// Configured entries in matching order.
    pub fn regions(&self) -> impl Iterator<Item = (usize, &RegionDescriptor)> {
        self.regions.iter().enumerate().filter_map(|(index, region)| region.as_ref().map(|r| (index, r)))
    }

    /// Whether an access would pass the entries configured through this manager.
    pub fn permits(&self, addr: usize, width: usize, kind: AccessKind, level: PrivilegeLevel) -> bool {
        let mut addrs = [0usize; REGION_COUNT];
        let mut cfgs = [0u8; REGION_COUNT];
        for (index, region) in self.regions() {
            addrs[index] = region.pmpaddr();
            cfgs[index] = region.pmpcfg();
        }
        super::permits(&addrs, &cfgs, addr, width, kind, level, self.machine_default)
    }

    fn ensure_writable<H: HardwareRegisters>(&self, hw: &H, index: usize) -> Result<(), ConfigError> {
        if index >= REGION_COUNT {
            return Err(ConfigError::IndexOutOfRange { index });
        }
        let shadow_locked = self.regions[index].is_some_and(|r| r.is_locked());
        if shadow_locked || decode_cfg(hw.pmpcfg(index)).locked {
            log::warn!(target: "pmp", "refusing to rewrite locked region {}", index);
            return Err(LockedRegionError { index }.into());
        }
        // A locked TOR entry uses pmpaddr[index] as its base and freezes it.
        let next = index + 1;
        if next < REGION_COUNT {
            let above = decode_cfg(hw.pmpcfg(next));
            if above.locked && above.mode == AddressMode::Tor {
                log::warn!(target: "pmp", "region {} address is frozen by locked TOR region {}", index, next);
                return Err(LockedRegionError { index }.into());
            }
        }
        Ok(())
    }
}

impl fmt::Display for RegionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "PMP regions:")?;
        for (index, region) in self.regions() {
            writeln!(f, " [{}] {}", index, region)?;
        }
        let default = match self.machine_default {
            DefaultAccess::Allow => "allow",
            DefaultAccess::Deny => "deny",
        };
        write!(f, " default: U/S deny, M {}", default)
    }
}
