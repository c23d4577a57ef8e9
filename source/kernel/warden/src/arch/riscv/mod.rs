// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! RISC-V machine-mode constants and helpers.
//!
//! Field layouts follow the RISC-V privileged ISA. Host builds get
//! `#[cfg(not(...))]` stubs so the logic above this layer stays testable.

/// `mstatus` fields touched by the privilege transition and trap entry.
pub mod mstatus {
    /// Machine interrupt enable.
    pub const MIE: usize = 1 << 3;
    /// Previous machine interrupt enable, restored into MIE by `mret`.
    pub const MPIE: usize = 1 << 7;
    pub const MPP_SHIFT: usize = 11;
    /// Previous privilege, restored by `mret` (bits 12:11).
    pub const MPP_MASK: usize = 0b11 << MPP_SHIFT;
}

/// `mseccfg` (Smepmp) CSR number; not every assembler knows the name.
#[cfg_attr(not(all(target_arch = "riscv64", target_os = "none")), allow(dead_code))]
pub const MSECCFG: usize = 0x747;
/// Machine-mode whitelist policy: unmatched M-mode accesses are denied.
pub const MSECCFG_MMWP: usize = 1 << 1;

/// Top bit of `mcause`; set for interrupts, clear for exceptions.
pub const INTERRUPT_FLAG: usize = usize::MAX - (usize::MAX >> 1);

/// Clears the `.bss` region defined by the linker.
#[cfg(all(target_arch = "riscv64", target_os = "none"))]
#[inline]
pub fn clear_bss(start: *mut u8, end: *mut u8) {
    // SAFETY: the linker script guarantees `start..end` is the writable .bss span.
    unsafe {
        let mut ptr = start;
        while ptr < end {
            core::ptr::write_volatile(ptr, 0);
            ptr = ptr.add(1);
        }
    }
}

/// Issues a WFI instruction or yields on the host.
#[cfg_attr(not(all(target_arch = "riscv64", target_os = "none")), allow(dead_code))]
#[inline]
pub fn wait_for_interrupt() {
    #[cfg(target_arch = "riscv64")]
    unsafe {
        core::arch::asm!("wfi", options(nomem, nostack, preserves_flags));
    }
    #[cfg(not(target_arch = "riscv64"))]
    {
        core::hint::spin_loop();
    }
}

/// Parks the hart for good.
#[cfg_attr(not(all(target_arch = "riscv64", target_os = "none")), allow(dead_code))]
#[inline]
pub fn park() -> ! {
    loop {
        wait_for_interrupt();
    }
}
