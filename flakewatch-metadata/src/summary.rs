// Copyright (c) The flakewatch Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use serde::{Deserialize, Serialize};

/// Stability information for every tracked test in a build.
///
/// Produced by `flakewatch show --message-format json`.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct BuildStabilitySummary {
    /// The build number.
    pub build_number: u64,

    /// When the build was recorded, in RFC 3339 format.
    pub recorded_at: String,

    /// The number of test results (classes and cases) in the build.
    pub result_count: usize,

    /// Tests with a history in this build, in identity order.
    ///
    /// Tests that never failed within their window are not listed: they are
    /// 100% stable.
    pub tests: Vec<TestStabilitySummary>,
}

/// Stability information for a single tracked test.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct TestStabilitySummary {
    /// The test's identity: `classname::name` for test cases, `classname` for
    /// test classes.
    pub id: String,

    /// The number of runs in the test's history.
    pub total: usize,

    /// The number of runs that failed.
    pub failed: usize,

    /// Percentage of runs that passed.
    pub stability: usize,

    /// The number of adjacent runs whose outcomes differ.
    pub test_status_changes: usize,

    /// Percentage of adjacent runs whose outcomes differ.
    pub flakiness: usize,

    /// `100 - flakiness`.
    pub health_score: usize,

    /// The health band: one of `stable`, `mostly-stable`, `unsettled`,
    /// `flaky` or `very-flaky`.
    pub health: String,

    /// A human-readable description of the metrics.
    pub description: String,

    /// The runs in the history, oldest first.
    pub outcomes: Vec<OutcomeSummary>,
}

/// A single run in a test's history.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct OutcomeSummary {
    /// The build the run happened in.
    pub build_number: u64,

    /// Whether the test passed.
    pub passed: bool,
}
