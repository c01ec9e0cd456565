// Copyright (c) The flakewatch Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

#![warn(missing_docs)]

//! Structured access to flakewatch's machine-readable output.
//!
//! This crate has no dependency on the rest of flakewatch, so tools consuming
//! `flakewatch show --message-format json` can depend on it cheaply.

mod exit_codes;
mod summary;

pub use exit_codes::*;
pub use summary::*;
