// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Architecture specific support code
//! PUBLIC API: arch backends under `arch::<isa>`
//! INVARIANTS: Keep per-arch code isolated behind module boundaries

pub mod riscv;
