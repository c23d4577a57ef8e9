// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Boot wrapper for the WARDEN isolation kernel. Provides a minimal `_start`
//! entry point that sets up the stack and global pointer before handing
//! execution to the library via `warden::kmain()`.
#![cfg_attr(target_os = "none", no_std)]
#![cfg_attr(target_os = "none", no_main)]

#[cfg(all(target_arch = "riscv64", target_os = "none"))]
core::arch::global_asm!(
    r#"
    .section .text._start, "ax", @progbits
    .globl _start
    .align 4
_start:
    csrw mie, zero
    la   sp, __stack_top
    .option push
    .option norelax
    la   gp, __global_pointer$
    .option pop
    j    start_rust
"#
);

#[cfg(all(target_arch = "riscv64", target_os = "none"))]
#[no_mangle]
pub extern "C" fn start_rust() -> ! {
    // SAFETY: single hart, straight from `_start`, before any static is used.
    unsafe { warden::early_boot_init() };
    warden::kmain()
}

#[cfg(not(target_os = "none"))]
fn main() {
    println!("warden-boot targets riscv64gc-unknown-none-elf; run it under qemu-system-riscv64 -machine virt -bios none");
}
