// Copyright (c) The flakewatch Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Test helpers: an in-memory build chain and proptest support.

use crate::{
    errors::HistoryLookupError,
    history::{BoundedHistory, BuildNumber},
    propagation::{PreviousResult, PreviousResultLookup},
    test_result::{TestIdentity, TestResult, TestStatus},
};
use proptest::prelude::*;
use std::{
    cell::Cell,
    collections::{BTreeMap, BTreeSet},
};

pub(crate) fn passed(id: &str) -> TestResult {
    TestResult::new(id, TestStatus::Passed)
}

pub(crate) fn failed(id: &str) -> TestResult {
    TestResult::new(id, TestStatus::Failed { fail_count: 1 })
}

pub(crate) fn skipped(id: &str) -> TestResult {
    TestResult::new(id, TestStatus::Skipped)
}

#[derive(Debug)]
struct RecordedResult {
    passed: bool,
    history: Option<BoundedHistory>,
}

/// An in-memory chain of builds, with lookups that can be made to fail.
#[derive(Debug, Default)]
pub(crate) struct BuildGraph {
    builds: BTreeMap<BuildNumber, BTreeMap<TestIdentity, RecordedResult>>,
    failing_lookups: BTreeSet<(TestIdentity, BuildNumber)>,
    lookup_count: Cell<usize>,
}

impl BuildGraph {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Records `result` in `build`, with `history` attached to it.
    pub(crate) fn record(
        &mut self,
        build: BuildNumber,
        result: TestResult,
        history: Option<BoundedHistory>,
    ) {
        self.builds.entry(build).or_default().insert(
            result.id.clone(),
            RecordedResult {
                passed: result.is_passed(),
                history,
            },
        );
    }

    /// Makes looking up the result for `id` preceding `build` fail.
    pub(crate) fn fail_lookup(&mut self, id: &str, build: BuildNumber) {
        self.failing_lookups.insert((TestIdentity::new(id), build));
    }

    pub(crate) fn history(&self, build: BuildNumber, id: &str) -> Option<&BoundedHistory> {
        self.builds.get(&build)?.get(id)?.history.as_ref()
    }

    pub(crate) fn lookup_count(&self) -> usize {
        self.lookup_count.get()
    }
}

impl PreviousResultLookup for BuildGraph {
    fn previous_result(
        &self,
        id: &TestIdentity,
        build_number: BuildNumber,
    ) -> Result<Option<PreviousResult<'_>>, HistoryLookupError> {
        self.lookup_count.set(self.lookup_count.get() + 1);
        if self.failing_lookups.contains(&(id.clone(), build_number)) {
            return Err(HistoryLookupError::new(id.as_str(), build_number));
        }

        let Some((&previous_build, results)) = self.builds.range(..build_number).next_back()
        else {
            return Ok(None);
        };
        Ok(results.get(id).map(|result| PreviousResult {
            build_number: previous_build,
            passed: result.passed,
            history: result.history.as_ref(),
        }))
    }
}

impl Arbitrary for TestStatus {
    type Parameters = ();
    type Strategy = BoxedStrategy<Self>;

    fn arbitrary_with(_: Self::Parameters) -> Self::Strategy {
        prop_oneof![
            Just(TestStatus::Passed),
            (1usize..4).prop_map(|fail_count| TestStatus::Failed { fail_count }),
            Just(TestStatus::Skipped),
        ]
        .boxed()
    }
}
