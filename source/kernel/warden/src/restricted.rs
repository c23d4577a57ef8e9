// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: The restricted routine and the regions it runs under
//! PUBLIC API: regions(), context()
//! DEPENDS_ON: kernel.ld symbols (__restricted_text_*, __restricted_stack_*)
//! INVARIANTS: The routine lives entirely in `.restricted_text` and calls
//!             nothing outside it; its first load targets LOCKED_BUFFER

use crate::boot::RegionAssignment;
use crate::error::ConfigError;
use crate::pmp::{Permissions, RegionDescriptor};
use crate::privilege::{ExecutionContext, PrivilegeLevel};
use crate::uart::{UART0_BASE, UART0_SPAN};

pub const RESTRICTED_TEXT_SIZE: usize = 0x1000;
pub const RESTRICTED_STACK_SIZE: usize = 0x1000;
const LOCKED_BUFFER_SIZE: usize = core::mem::size_of::<LockedBuffer>();

// Only `restricted_main` reads the contents.
#[allow(dead_code)]
#[repr(C, align(16))]
struct LockedBuffer([u32; 4]);

/// Data no level may touch once its region is locked.
static LOCKED_BUFFER: LockedBuffer = LockedBuffer([5, 6, 7, 8]);

// Reads the locked buffer, then reports survival over the UART. The load
// faults, so the print loop is never reached under correct isolation.
core::arch::global_asm!(
    ".pushsection .restricted_text, \"ax\", @progbits",
    ".balign 4",
    ".global restricted_main",
    "restricted_main:",
    "    la   t0, {buffer}",
    "    lw   t1, 0(t0)",
    "    la   t0, 2f",
    "    li   t2, {uart}",
    "1:  lbu  t1, 0(t0)",
    "    beqz t1, 3f",
    "    sb   t1, 0(t2)",
    "    addi t0, t0, 1",
    "    j    1b",
    "3:  j    3b",
    "2:  .asciz \"SURVIVED\\r\\n\"",
    ".popsection",
    buffer = sym LOCKED_BUFFER,
    uart = const UART0_BASE,
);

extern "C" {
    fn restricted_main() -> !;
    static __restricted_text_start: u8;
    static __restricted_stack_bottom: u8;
    static __restricted_stack_top: u8;
}

fn symbol(sym: *const u8) -> usize {
    sym as usize
}

/// Lock the buffer first so it wins over every other entry.
pub fn regions() -> Result<[RegionAssignment; 4], ConfigError> {
    // SAFETY: linker-provided symbols; only their addresses are taken.
    let (text, stack) = unsafe {
        (
            symbol(core::ptr::addr_of!(__restricted_text_start)),
            symbol(core::ptr::addr_of!(__restricted_stack_bottom)),
        )
    };
    let buffer = core::ptr::addr_of!(LOCKED_BUFFER) as usize;
    Ok([
        RegionAssignment {
            index: 0,
            descriptor: RegionDescriptor::new(buffer, LOCKED_BUFFER_SIZE, Permissions::empty())?.locked(),
        },
        RegionAssignment {
            index: 1,
            descriptor: RegionDescriptor::new(
                text,
                RESTRICTED_TEXT_SIZE,
                Permissions::READ | Permissions::EXECUTE,
            )?,
        },
        RegionAssignment {
            index: 2,
            descriptor: RegionDescriptor::new(
                stack,
                RESTRICTED_STACK_SIZE,
                Permissions::READ | Permissions::WRITE,
            )?,
        },
        RegionAssignment {
            index: 3,
            descriptor: RegionDescriptor::new(UART0_BASE, UART0_SPAN, Permissions::READ | Permissions::WRITE)?,
        },
    ])
}

pub fn context() -> ExecutionContext {
    // SAFETY: linker-provided symbol; only its address is taken.
    let stack_top = unsafe { symbol(core::ptr::addr_of!(__restricted_stack_top)) };
    ExecutionContext {
        entry: restricted_main as usize,
        stack_pointer: stack_top,
        target_level: PrivilegeLevel::User,
    }
}
