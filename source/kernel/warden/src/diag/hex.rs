// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Register-value formatting for the trap report.
//!
//! Works on any `fmt::Write` so the trap path can print through the raw UART
//! without formatting machinery beyond `write_char`.

use core::fmt;

/// Digits always printed; wider values are printed in full.
pub const MIN_HEX_DIGITS: usize = 8;

/// Writes `0x` followed by at least eight uppercase hex digits.
pub fn write_hex<W: fmt::Write + ?Sized>(out: &mut W, value: usize) -> fmt::Result {
    const DIGITS: &[u8; 16] = b"0123456789ABCDEF";
    let significant = (usize::BITS - value.leading_zeros()).div_ceil(4) as usize;
    let nibbles = significant.max(MIN_HEX_DIGITS);
    out.write_str("0x")?;
    for i in (0..nibbles).rev() {
        let nib = (value >> (i * 4)) & 0xF;
        out.write_char(DIGITS[nib] as char)?;
    }
    Ok(())
}

/// `Display` adapter around [`write_hex`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HexWord(pub usize);

impl fmt::Display for HexWord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_hex(f, self.0)
    }
}
