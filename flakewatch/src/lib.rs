// Copyright (c) The flakewatch Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Track flaky tests across CI builds.
//!
//! flakewatch reads the JUnit reports produced by each build and keeps a
//! bounded pass/fail history for every test that has failed recently. From
//! that history it derives stability and flakiness metrics.
//!
//! The core logic lives in the `flakewatch-history` crate. This crate is the
//! command-line interface on top of it.

#![warn(missing_docs)]

mod dispatch;
mod errors;
mod output;

#[doc(hidden)]
pub use dispatch::*;
#[doc(hidden)]
pub use errors::*;
#[doc(hidden)]
pub use output::{OutputContext, StderrStyles};
