// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Boot and trap diagnostics.

pub mod hex;
pub mod log;

pub use hex::{write_hex, HexWord};
