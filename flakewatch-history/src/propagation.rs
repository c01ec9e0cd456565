// Copyright (c) The flakewatch Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Carrying test histories forward from one build to the next.
//!
//! [`HistoryPropagation`] runs once per build. For every test result in the
//! build it decides whether to extend the history inherited from the previous
//! build, drop it, leave it as-is, or build a fresh one from the chain of
//! earlier results:
//!
//! | inherited history | current run    | result                                  |
//! |-------------------|----------------|-----------------------------------------|
//! | yes               | passed         | extended; dropped if now all-passed     |
//! | yes               | failed         | extended                                |
//! | yes               | skipped        | kept unchanged                          |
//! | no                | failed         | backfilled from earlier results         |
//! | no                | passed/skipped | not tracked                             |
//!
//! Histories attached to earlier builds are only ever read through shared
//! borrows and copied before being extended.

use crate::{
    errors::HistoryLookupError,
    history::{BoundedHistory, BuildNumber, MaxHistoryLength, Outcome},
    test_result::{TestIdentity, TestResult},
};
use std::collections::{BTreeMap, btree_map};
use tracing::{debug, warn};

/// A test's result as recorded in an earlier build.
#[derive(Clone, Copy, Debug)]
pub struct PreviousResult<'a> {
    /// The build the result was recorded in.
    pub build_number: BuildNumber,

    /// Whether the test passed in that build.
    pub passed: bool,

    /// The history attached to the result, if any.
    pub history: Option<&'a BoundedHistory>,
}

/// Access to test results recorded by earlier builds.
///
/// Applying [`previous_result`](Self::previous_result) to its own output walks
/// a test's results backwards through the build chain.
pub trait PreviousResultLookup {
    /// Returns the result for `id` from the build immediately preceding
    /// `build_number`.
    ///
    /// Returns `Ok(None)` if there is no such build, or if that build has no
    /// result for `id`.
    fn previous_result(
        &self,
        id: &TestIdentity,
        build_number: BuildNumber,
    ) -> Result<Option<PreviousResult<'_>>, HistoryLookupError>;
}

impl<T: PreviousResultLookup + ?Sized> PreviousResultLookup for &T {
    fn previous_result(
        &self,
        id: &TestIdentity,
        build_number: BuildNumber,
    ) -> Result<Option<PreviousResult<'_>>, HistoryLookupError> {
        (**self).previous_result(id, build_number)
    }
}

/// Produces the per-test histories for a build.
#[derive(Debug)]
pub struct HistoryPropagation<'a, L: ?Sized> {
    lookup: &'a L,
    max_history_length: MaxHistoryLength,
}

impl<'a, L: PreviousResultLookup + ?Sized> HistoryPropagation<'a, L> {
    /// Creates a new `HistoryPropagation`.
    ///
    /// Every history produced uses `max_history_length` as its capacity,
    /// including histories copied from builds that used a different one.
    pub fn new(lookup: &'a L, max_history_length: MaxHistoryLength) -> Self {
        Self {
            lookup,
            max_history_length,
        }
    }

    /// Computes the histories for `build_number` from its test results.
    ///
    /// Lookup failures are logged and otherwise treated as missing results, so
    /// this never fails. Only tests with a live history appear in the output.
    pub fn propagate<'r>(
        &self,
        build_number: BuildNumber,
        results: impl IntoIterator<Item = &'r TestResult>,
    ) -> PropagatedHistories {
        let mut histories = BTreeMap::new();
        let mut result_count = 0usize;

        for result in results {
            result_count += 1;
            match self.next_history(build_number, result) {
                Some(history) => {
                    histories.insert(result.id.clone(), history);
                }
                None => {
                    histories.remove(&result.id);
                }
            }
        }

        debug!(
            build_number,
            result_count,
            tracked = histories.len(),
            "propagated test histories"
        );

        PropagatedHistories {
            build_number,
            histories,
        }
    }

    fn next_history(
        &self,
        build_number: BuildNumber,
        result: &TestResult,
    ) -> Option<BoundedHistory> {
        let id = &result.id;

        if let Some(mut history) = self.inherited_history(id, build_number) {
            if result.is_passed() {
                history.add(Outcome::passed(build_number));
                if history.is_all_passed() {
                    debug!(%id, "test is stable, no longer tracking history");
                    return None;
                }
            } else if result.fail_count() > 0 {
                history.add(Outcome::failed(build_number));
            }
            // Otherwise the test was skipped, and the history is kept unchanged.
            return Some(history);
        }

        if result.fail_count() > 0 {
            debug!(%id, "found first failure for test");
            return Some(self.backfill_history(id, build_number));
        }

        None
    }

    /// Copies the previous build's history for `id` into a new buffer of the
    /// current capacity.
    fn inherited_history(
        &self,
        id: &TestIdentity,
        build_number: BuildNumber,
    ) -> Option<BoundedHistory> {
        let previous = self.previous_result(id, build_number)?;
        let previous_history = previous.history?;

        let mut history = BoundedHistory::with_max_length(self.max_history_length);
        history.add_all(previous_history.snapshot().iter().copied());
        Some(history)
    }

    /// Builds a history for a test failing for the first time, from its
    /// earlier results plus the current failure.
    fn backfill_history(&self, id: &TestIdentity, build_number: BuildNumber) -> BoundedHistory {
        let limit = self.max_history_length.get() - 1;
        let mut newest_first = Vec::with_capacity(limit);

        let mut cursor = build_number;
        while newest_first.len() < limit {
            let Some(previous) = self.previous_result(id, cursor) else {
                break;
            };
            newest_first.push(Outcome::new(previous.build_number, previous.passed));
            cursor = previous.build_number;
        }

        let mut history = BoundedHistory::with_max_length(self.max_history_length);
        history.add_all(newest_first.into_iter().rev());
        history.add(Outcome::failed(build_number));
        history
    }

    fn previous_result(
        &self,
        id: &TestIdentity,
        build_number: BuildNumber,
    ) -> Option<PreviousResult<'a>> {
        match self.lookup.previous_result(id, build_number) {
            Ok(previous) => previous,
            Err(error) => {
                warn!(
                    %id,
                    build_number,
                    error = &error as &(dyn std::error::Error + 'static),
                    "treating failed history lookup as no previous result"
                );
                None
            }
        }
    }
}

/// The histories produced for one build, keyed by test identity.
///
/// Tests without a live history (never failed, or stabilized this build) are
/// absent.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct PropagatedHistories {
    build_number: BuildNumber,
    histories: BTreeMap<TestIdentity, BoundedHistory>,
}

impl PropagatedHistories {
    /// The build these histories belong to.
    pub fn build_number(&self) -> BuildNumber {
        self.build_number
    }

    /// Returns the history for `id`, if it has one.
    pub fn get(&self, id: &str) -> Option<&BoundedHistory> {
        self.histories.get(id)
    }

    /// Returns true if `id` has a history.
    pub fn contains(&self, id: &str) -> bool {
        self.histories.contains_key(id)
    }

    /// The number of tests with a history.
    pub fn len(&self) -> usize {
        self.histories.len()
    }

    /// Returns true if no test has a history.
    pub fn is_empty(&self) -> bool {
        self.histories.is_empty()
    }

    /// Iterates over histories in identity order.
    pub fn iter(&self) -> btree_map::Iter<'_, TestIdentity, BoundedHistory> {
        self.histories.iter()
    }

    /// Consumes self, returning the underlying map.
    pub fn into_inner(self) -> BTreeMap<TestIdentity, BoundedHistory> {
        self.histories
    }
}

impl IntoIterator for PropagatedHistories {
    type Item = (TestIdentity, BoundedHistory);
    type IntoIter = btree_map::IntoIter<TestIdentity, BoundedHistory>;

    fn into_iter(self) -> Self::IntoIter {
        self.histories.into_iter()
    }
}

impl<'a> IntoIterator for &'a PropagatedHistories {
    type Item = (&'a TestIdentity, &'a BoundedHistory);
    type IntoIter = btree_map::Iter<'a, TestIdentity, BoundedHistory>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}
