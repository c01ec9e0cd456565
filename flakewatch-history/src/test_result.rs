// Copyright (c) The flakewatch Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Per-build test results, as produced by a test-result source.

use serde::{Deserialize, Serialize};
use smol_str::SmolStr;
use std::{borrow::Borrow, fmt};

/// A stable key identifying the same test case or test class across builds.
#[derive(Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TestIdentity(SmolStr);

impl TestIdentity {
    /// Creates a new identity.
    pub fn new(id: impl AsRef<str>) -> Self {
        Self(SmolStr::new(id))
    }

    /// Returns the identity as a string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TestIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Borrow<str> for TestIdentity {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl From<&str> for TestIdentity {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// How a test fared in a single build.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case", rename_all_fields = "kebab-case")]
pub enum TestStatus {
    /// The test passed.
    Passed,

    /// The test failed. For a test class, `fail_count` is the number of
    /// failing cases.
    Failed {
        /// The number of failures.
        fail_count: usize,
    },

    /// The test did not run.
    Skipped,
}

/// The result of one test case or test class in one build.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct TestResult {
    /// The identity of the test.
    pub id: TestIdentity,

    /// The status of the test.
    pub status: TestStatus,
}

impl TestResult {
    /// Creates a new test result.
    pub fn new(id: impl Into<TestIdentity>, status: TestStatus) -> Self {
        Self {
            id: id.into(),
            status,
        }
    }

    /// Returns true if the test passed.
    pub fn is_passed(&self) -> bool {
        matches!(self.status, TestStatus::Passed)
    }

    /// Returns the number of failures recorded for this test.
    pub fn fail_count(&self) -> usize {
        match self.status {
            TestStatus::Failed { fail_count } => fail_count,
            TestStatus::Passed | TestStatus::Skipped => 0,
        }
    }
}

/// The flat collection of class- and case-level results for one build.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct BuildResults {
    results: Vec<TestResult>,
}

impl BuildResults {
    /// Creates an empty set of results.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a result.
    pub fn push(&mut self, result: TestResult) {
        self.results.push(result);
    }

    /// Appends all results from `other`, e.g. from another report file in the
    /// same build.
    pub fn merge(&mut self, other: BuildResults) {
        self.results.extend(other.results);
    }

    /// Returns the number of results.
    pub fn len(&self) -> usize {
        self.results.len()
    }

    /// Returns true if there are no results.
    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    /// Iterates over results in the order they were added.
    pub fn iter(&self) -> std::slice::Iter<'_, TestResult> {
        self.results.iter()
    }
}

impl FromIterator<TestResult> for BuildResults {
    fn from_iter<T: IntoIterator<Item = TestResult>>(iter: T) -> Self {
        Self {
            results: iter.into_iter().collect(),
        }
    }
}

impl<'a> IntoIterator for &'a BuildResults {
    type Item = &'a TestResult;
    type IntoIter = std::slice::Iter<'a, TestResult>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}
