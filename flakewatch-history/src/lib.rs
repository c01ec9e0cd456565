// Copyright (c) The flakewatch Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

#![warn(missing_docs)]

//! Core functionality for flakewatch: per-test pass/fail histories carried
//! across CI builds, and the stability and flakiness metrics derived from
//! them.
//!
//! The basic flow for one build is:
//!
//! 1. Read the build's JUnit reports into [`BuildResults`](test_result::BuildResults)
//!    with [`junit`].
//! 2. Load earlier builds from the [`store`].
//! 3. Run [`HistoryPropagation`](propagation::HistoryPropagation) to work out
//!    each test's history for this build.
//! 4. Record the results and histories back into the store, and compute
//!    [`StabilityMetrics`](metrics::StabilityMetrics) on demand.

pub mod config;
pub mod errors;
pub mod history;
pub mod junit;
pub mod metrics;
pub mod propagation;
pub mod store;
pub mod test_result;

#[cfg(test)]
mod test_helpers;
