// Copyright (c) The flakewatch Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Stability and flakiness derived from a [`BoundedHistory`].

use crate::history::{BoundedHistory, Outcome};
use std::fmt;

/// Summary metrics computed from a test's history.
///
/// * `stability` is the share of retained runs that passed.
/// * `flakiness` is the share of run-to-run transitions where the outcome
///   changed.
///
/// Both are integer percentages, truncated towards zero. These are never
/// stored; recompute them from the history when needed.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub struct StabilityMetrics {
    total: usize,
    failed: usize,
    stability: usize,
    test_status_changes: usize,
    flakiness: usize,
}

impl StabilityMetrics {
    /// Metrics for a test with no recorded history: 100% stable, 0% flaky.
    pub const NO_DATA: Self = Self {
        total: 0,
        failed: 0,
        stability: 100,
        test_status_changes: 0,
        flakiness: 0,
    };

    /// Computes metrics for a history. A missing history is treated as no data.
    pub fn compute(history: Option<&BoundedHistory>) -> Self {
        match history {
            Some(history) => Self::from_outcomes(history.snapshot()),
            None => Self::NO_DATA,
        }
    }

    /// Computes metrics for a sequence of outcomes, oldest first.
    pub fn from_outcomes<'a>(outcomes: impl IntoIterator<Item = &'a Outcome>) -> Self {
        let mut total = 0;
        let mut failed = 0;
        let mut test_status_changes = 0;
        let mut previous_passed = None;

        for outcome in outcomes {
            total += 1;
            if !outcome.passed {
                failed += 1;
            }
            if previous_passed.is_some_and(|previous| previous != outcome.passed) {
                test_status_changes += 1;
            }
            previous_passed = Some(outcome.passed);
        }

        let stability = if total == 0 {
            100
        } else {
            100 * (total - failed) / total
        };
        let flakiness = if total > 1 {
            100 * test_status_changes / (total - 1)
        } else {
            0
        };

        Self {
            total,
            failed,
            stability,
            test_status_changes,
            flakiness,
        }
    }

    /// The number of runs considered.
    pub fn total(&self) -> usize {
        self.total
    }

    /// The number of runs that failed.
    pub fn failed(&self) -> usize {
        self.failed
    }

    /// Percentage of runs that passed.
    pub fn stability(&self) -> usize {
        self.stability
    }

    /// The number of adjacent runs whose outcomes differ.
    pub fn test_status_changes(&self) -> usize {
        self.test_status_changes
    }

    /// Percentage of adjacent runs whose outcomes differ.
    pub fn flakiness(&self) -> usize {
        self.flakiness
    }

    /// The health score: `100 - flakiness`.
    pub fn health_score(&self) -> usize {
        100 - self.flakiness
    }

    /// Returns the human-readable description of these metrics, as shown to
    /// users. Equivalent to the `Display` output.
    pub fn description(&self) -> String {
        self.to_string()
    }

    /// Buckets the health score into one of five bands.
    pub fn health_level(&self) -> HealthLevel {
        HealthLevel::from_score(self.health_score())
    }
}

impl Default for StabilityMetrics {
    fn default() -> Self {
        Self::NO_DATA
    }
}

/// Writes the human-readable description.
impl fmt::Display for StabilityMetrics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.stability == 100 {
            write!(f, "No known failures. Flakiness 0%, Stability 100%")
        } else {
            write!(
                f,
                "Failed {} times in the last {} runs. Flakiness: {}%, Stability: {}%",
                self.failed, self.total, self.flakiness, self.stability
            )
        }
    }
}

/// Health band for a [`StabilityMetrics::health_score`].
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum HealthLevel {
    /// Score below 20.
    VeryFlaky,
    /// Score from 20 to 39.
    Flaky,
    /// Score from 40 to 59.
    Unsettled,
    /// Score from 60 to 79.
    MostlyStable,
    /// Score of 80 or above.
    Stable,
}

impl HealthLevel {
    /// Returns the band for a score between 0 and 100.
    pub fn from_score(score: usize) -> Self {
        match score {
            80.. => Self::Stable,
            60..80 => Self::MostlyStable,
            40..60 => Self::Unsettled,
            20..40 => Self::Flaky,
            _ => Self::VeryFlaky,
        }
    }

    /// Returns a short kebab-case name for this band.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::VeryFlaky => "very-flaky",
            Self::Flaky => "flaky",
            Self::Unsettled => "unsettled",
            Self::MostlyStable => "mostly-stable",
            Self::Stable => "stable",
        }
    }
}

impl fmt::Display for HealthLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::BuildNumber;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;
    use test_case::test_case;
    use test_strategy::proptest;

    fn history_of(capacity: usize, passed: impl IntoIterator<Item = bool>) -> BoundedHistory {
        let mut history = BoundedHistory::new(capacity).unwrap();
        history.add_all(
            passed
                .into_iter()
                .enumerate()
                .map(|(i, passed)| Outcome::new(i as BuildNumber + 1, passed)),
        );
        history
    }

    #[test]
    fn absent_history_is_no_data() {
        let metrics = StabilityMetrics::compute(None);
        assert_eq!(metrics, StabilityMetrics::NO_DATA);
        assert_eq!(metrics.total(), 0);
        assert_eq!(metrics.failed(), 0);
        assert_eq!(metrics.stability(), 100);
        assert_eq!(metrics.flakiness(), 0);
    }

    #[test]
    fn empty_history_is_no_data() {
        let history = BoundedHistory::new(5).unwrap();
        assert_eq!(
            StabilityMetrics::compute(Some(&history)),
            StabilityMetrics::NO_DATA
        );
    }

    #[test_case(true ; "pass")]
    #[test_case(false ; "fail")]
    fn single_outcome_has_no_flakiness(passed: bool) {
        let history = history_of(5, [passed]);
        let metrics = StabilityMetrics::compute(Some(&history));
        assert_eq!(metrics.total(), 1);
        assert_eq!(metrics.flakiness(), 0);
        assert_eq!(metrics.stability(), if passed { 100 } else { 0 });
    }

    #[test]
    fn alternating_is_fully_flaky() {
        let history = history_of(10, (0..10).map(|i| i % 2 == 0));
        let metrics = StabilityMetrics::compute(Some(&history));
        assert_eq!(metrics.total(), 10);
        assert_eq!(metrics.failed(), 5);
        assert_eq!(metrics.test_status_changes(), 9);
        assert_eq!(metrics.flakiness(), 100);
        assert_eq!(metrics.stability(), 50);
        assert_eq!(metrics.health_level(), HealthLevel::VeryFlaky);
    }

    #[test]
    fn all_passing_is_stable() {
        let history = history_of(10, [true; 10]);
        let metrics = StabilityMetrics::compute(Some(&history));
        assert_eq!(metrics.flakiness(), 0);
        assert_eq!(metrics.stability(), 100);
        assert_eq!(
            metrics.description(),
            "No known failures. Flakiness 0%, Stability 100%"
        );
    }

    #[test]
    fn half_flaky_over_wrapped_window() {
        // (pass, pass, fail, fail) repeated out to 104 runs; the 101-run window
        // drops the first three.
        let pattern = (0..104).map(|i| i % 4 < 2);
        let history = history_of(101, pattern);
        assert_eq!(history.len(), 101);

        let metrics = StabilityMetrics::compute(Some(&history));
        assert_eq!(metrics.total(), 101);
        assert_eq!(metrics.test_status_changes(), 50);
        assert_eq!(metrics.flakiness(), 50);
    }

    #[test]
    fn stability_truncates() {
        // 2 of 3 passed: 66.67% truncates to 66.
        let history = history_of(10, [true, false, true]);
        let metrics = StabilityMetrics::compute(Some(&history));
        assert_eq!(metrics.stability(), 66);
        assert_eq!(metrics.flakiness(), 100);
        assert_eq!(
            metrics.to_string(),
            "Failed 1 times in the last 3 runs. Flakiness: 100%, Stability: 66%"
        );
    }

    #[test_case(100, HealthLevel::Stable)]
    #[test_case(80, HealthLevel::Stable)]
    #[test_case(79, HealthLevel::MostlyStable)]
    #[test_case(60, HealthLevel::MostlyStable)]
    #[test_case(59, HealthLevel::Unsettled)]
    #[test_case(39, HealthLevel::Flaky)]
    #[test_case(19, HealthLevel::VeryFlaky)]
    #[test_case(0, HealthLevel::VeryFlaky)]
    fn health_level_bands(score: usize, expected: HealthLevel) {
        assert_eq!(HealthLevel::from_score(score), expected);
    }

    #[proptest]
    fn compute_is_deterministic_and_bounded(
        #[strategy(proptest::collection::vec(any::<bool>(), 0..40))] passed: Vec<bool>,
    ) {
        let history = history_of(64, passed.iter().copied());
        let first = StabilityMetrics::compute(Some(&history));
        let second = StabilityMetrics::compute(Some(&history.clone()));
        prop_assert_eq!(first, second);
        prop_assert!(first.stability() <= 100);
        prop_assert!(first.flakiness() <= 100);
        prop_assert_eq!(first.failed(), passed.iter().filter(|p| !**p).count());
    }
}
