// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! NAPOT region encoding.
//!
//! A NAPOT `pmpaddr` holds bits `XLEN+1:2` of the base address with the low
//! `log2(size) - 3` bits set to one. Decoding counts the trailing ones.

use core::fmt;
use core::ops::RangeInclusive;

use super::MIN_REGION_SIZE;
use crate::error::ConfigError;

/// Validated naturally-aligned power-of-two span.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct NapotRegion {
    pmpaddr: usize,
}

impl NapotRegion {
    /// Encodes `base`/`size`, rejecting spans NAPOT cannot express exactly.
    pub fn new(base: usize, size: usize) -> Result<Self, ConfigError> {
        if size < MIN_REGION_SIZE {
            return Err(ConfigError::TooSmall { size });
        }
        if !size.is_power_of_two() {
            return Err(ConfigError::NotPowerOfTwo { size });
        }
        if base % size != 0 {
            return Err(ConfigError::Misaligned { base, size });
        }
        if base.checked_add(size - 1).is_none() {
            return Err(ConfigError::OutOfRange { base, size });
        }
        Ok(Self { pmpaddr: (base >> 2) | ((size / 2 - 1) >> 2) })
    }

    /// Interprets a raw `pmpaddr` value; every bit pattern names some span.
    pub const fn from_pmpaddr(pmpaddr: usize) -> Self {
        Self { pmpaddr }
    }

    pub const fn pmpaddr(&self) -> usize {
        self.pmpaddr
    }

    /// log2 of the span in bytes.
    pub const fn size_log2(&self) -> u32 {
        self.pmpaddr.trailing_ones() + 3
    }

    pub const fn base(&self) -> usize {
        let ones = self.pmpaddr.trailing_ones();
        let cleared = if ones >= usize::BITS { 0 } else { self.pmpaddr & !((1 << ones) - 1) };
        cleared << 2
    }

    /// Span in bytes, or `None` if it does not fit in `usize`.
    pub const fn size(&self) -> Option<usize> {
        let log2 = self.size_log2();
        if log2 >= usize::BITS {
            None
        } else {
            Some(1 << log2)
        }
    }

    /// Exclusive end address, or `None` if the span reaches the top of memory.
    pub const fn end(&self) -> Option<usize> {
        match self.size() {
            Some(size) => self.base().checked_add(size),
            None => None,
        }
    }

    /// Inclusive byte range matched by the entry.
    pub fn address_range(&self) -> RangeInclusive<usize> {
        let last = match self.size() {
            Some(size) => self.base().saturating_add(size - 1),
            None => usize::MAX,
        };
        self.base()..=last
    }

    pub const fn contains(&self, addr: usize) -> bool {
        addr >= self.base()
            && match self.end() {
                Some(end) => addr < end,
                None => true,
            }
    }
}

impl fmt::Display for NapotRegion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.end() {
            Some(end) => write!(f, "{:#010x}..{:#010x}", self.base(), end),
            None => write!(f, "{:#010x}..", self.base()),
        }
    }
}

/// The address expression used by earlier boot images, bit for bit.
///
/// It shifts the mask by three instead of two, so the hardware matches only
/// `size / 2` bytes (sizes 8 and 16 encode identically). Kept for comparing
/// images built against the old encoding; `NapotRegion::new` is the real one.
pub const fn encode_legacy_pmpaddr(base: usize, size: usize) -> usize {
    (base >> 2) | ((size / 2).wrapping_sub(1) >> 3)
}
