// Copyright (c) The flakewatch Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Fixed-capacity, chronological pass/fail history for a single test.
//!
//! A [`BoundedHistory`] holds at most [`MaxHistoryLength`] outcomes, oldest
//! first. Adding to a full history evicts the oldest outcome, so the most
//! recent runs are always the ones retained.

use crate::errors::{InvalidConfigurationError, InvalidHistoryError};
use serde::{Deserialize, Serialize};
use std::{
    cmp::Ordering,
    collections::VecDeque,
    fmt,
    iter::Chain,
    num::NonZeroUsize,
    slice,
    str::FromStr,
};

/// The number of a build. Increases monotonically within a pipeline.
pub type BuildNumber = u64;

/// The recorded pass/fail result of one test in one build.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Outcome {
    /// The build this outcome was recorded in.
    pub build_number: BuildNumber,

    /// Whether the test passed in that build.
    pub passed: bool,
}

impl Outcome {
    /// Creates a new outcome.
    pub fn new(build_number: BuildNumber, passed: bool) -> Self {
        Self {
            build_number,
            passed,
        }
    }

    /// Creates a passing outcome for the given build.
    pub fn passed(build_number: BuildNumber) -> Self {
        Self::new(build_number, true)
    }

    /// Creates a failing outcome for the given build.
    pub fn failed(build_number: BuildNumber) -> Self {
        Self::new(build_number, false)
    }
}

/// The maximum number of outcomes a [`BoundedHistory`] retains.
///
/// Always a positive integer. Invalid values are rejected when the
/// configuration is read, not each time a history is created.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct MaxHistoryLength(NonZeroUsize);

impl MaxHistoryLength {
    /// The length used when none is configured.
    pub const DEFAULT_VALUE: usize = 30;

    /// Creates a new `MaxHistoryLength`, failing if `value` is zero.
    pub fn new(value: usize) -> Result<Self, InvalidConfigurationError> {
        NonZeroUsize::new(value)
            .map(Self)
            .ok_or_else(|| InvalidConfigurationError::new(value.to_string()))
    }

    /// Returns the length as a `usize`.
    pub fn get(self) -> usize {
        self.0.get()
    }
}

impl Default for MaxHistoryLength {
    fn default() -> Self {
        Self(NonZeroUsize::new(Self::DEFAULT_VALUE).expect("default history length is non-zero"))
    }
}

impl fmt::Display for MaxHistoryLength {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for MaxHistoryLength {
    type Err = InvalidConfigurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // Parse as i64 so that negative inputs produce the same error as zero.
        let value: i64 = s
            .trim()
            .parse()
            .map_err(|_| InvalidConfigurationError::new(s))?;
        match value.cmp(&0) {
            Ordering::Greater => usize::try_from(value)
                .map_err(|_| InvalidConfigurationError::new(s))
                .and_then(Self::new),
            Ordering::Equal | Ordering::Less => Err(InvalidConfigurationError::new(s)),
        }
    }
}

impl Serialize for MaxHistoryLength {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_u64(self.get() as u64)
    }
}

impl<'de> Deserialize<'de> for MaxHistoryLength {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        struct V;

        impl serde::de::Visitor<'_> for V {
            type Value = MaxHistoryLength;

            fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
                write!(formatter, "a positive integer")
            }

            // Note that TOML uses i64, not u64.
            fn visit_i64<E>(self, v: i64) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                match v.cmp(&0) {
                    Ordering::Greater => self.visit_u64(v as u64),
                    Ordering::Equal | Ordering::Less => Err(serde::de::Error::invalid_value(
                        serde::de::Unexpected::Signed(v),
                        &self,
                    )),
                }
            }

            fn visit_u64<E>(self, v: u64) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                usize::try_from(v)
                    .ok()
                    .and_then(|v| MaxHistoryLength::new(v).ok())
                    .ok_or_else(|| {
                        serde::de::Error::invalid_value(serde::de::Unexpected::Unsigned(v), &self)
                    })
            }
        }

        deserializer.deserialize_any(V)
    }
}

/// A fixed-capacity, insertion-ordered log of a test's recent outcomes.
///
/// Outcomes are kept oldest first. Once the history holds `capacity`
/// outcomes, each [`add`](Self::add) evicts the single oldest outcome.
///
/// A history attached to a finished build is never modified again. To extend
/// an earlier build's history, copy it into a fresh `BoundedHistory` with
/// [`add_all`](Self::add_all) and extend the copy.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "SerializedHistory", into = "SerializedHistory")]
pub struct BoundedHistory {
    capacity: MaxHistoryLength,
    // Invariant: outcomes.len() <= capacity.
    outcomes: VecDeque<Outcome>,
}

impl BoundedHistory {
    /// Creates an empty history holding at most `capacity` outcomes.
    ///
    /// Returns an error if `capacity` is zero.
    pub fn new(capacity: usize) -> Result<Self, InvalidConfigurationError> {
        MaxHistoryLength::new(capacity).map(Self::with_max_length)
    }

    /// Creates an empty history from an already-validated capacity.
    pub fn with_max_length(capacity: MaxHistoryLength) -> Self {
        Self {
            capacity,
            outcomes: VecDeque::with_capacity(capacity.get()),
        }
    }

    /// Returns the maximum number of outcomes retained.
    pub fn capacity(&self) -> usize {
        self.capacity.get()
    }

    /// Returns the maximum number of outcomes retained.
    pub fn max_length(&self) -> MaxHistoryLength {
        self.capacity
    }

    /// Returns the number of outcomes currently held.
    pub fn len(&self) -> usize {
        self.outcomes.len()
    }

    /// Returns true if no outcomes are held.
    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }

    /// Appends an outcome, evicting the oldest one first if the history is full.
    pub fn add(&mut self, outcome: Outcome) {
        if self.outcomes.len() == self.capacity.get() {
            self.outcomes.pop_front();
        }
        self.outcomes.push_back(outcome);
    }

    /// Appends each outcome in order, as if by repeated calls to [`add`](Self::add).
    ///
    /// Later outcomes may evict earlier ones added by the same call.
    pub fn add_all(&mut self, outcomes: impl IntoIterator<Item = Outcome>) {
        for outcome in outcomes {
            self.add(outcome);
        }
    }

    /// Returns a read-only view of the outcomes, oldest first.
    pub fn snapshot(&self) -> HistorySnapshot<'_> {
        let (front, back) = self.outcomes.as_slices();
        HistorySnapshot { front, back }
    }

    /// Returns true if every outcome held is a pass.
    ///
    /// An empty history counts as all-passed.
    pub fn is_all_passed(&self) -> bool {
        self.outcomes.iter().all(|outcome| outcome.passed)
    }

    /// Returns the most recent outcome, if any.
    pub fn latest(&self) -> Option<&Outcome> {
        self.outcomes.back()
    }
}

impl Extend<Outcome> for BoundedHistory {
    fn extend<T: IntoIterator<Item = Outcome>>(&mut self, iter: T) {
        self.add_all(iter);
    }
}

/// A read-only view of a [`BoundedHistory`], oldest outcome first.
///
/// Returned by [`BoundedHistory::snapshot`].
#[derive(Clone, Copy, Debug)]
pub struct HistorySnapshot<'a> {
    // The two halves of the ring buffer, in order.
    front: &'a [Outcome],
    back: &'a [Outcome],
}

impl<'a> HistorySnapshot<'a> {
    /// Returns the number of outcomes in the snapshot.
    pub fn len(&self) -> usize {
        self.front.len() + self.back.len()
    }

    /// Returns true if the snapshot is empty.
    pub fn is_empty(&self) -> bool {
        self.front.is_empty() && self.back.is_empty()
    }

    /// Iterates over the outcomes, oldest first.
    pub fn iter(&self) -> Chain<slice::Iter<'a, Outcome>, slice::Iter<'a, Outcome>> {
        self.front.iter().chain(self.back.iter())
    }

    /// Returns the outcome at `index`, counting from the oldest.
    pub fn get(&self, index: usize) -> Option<&'a Outcome> {
        if index < self.front.len() {
            self.front.get(index)
        } else {
            self.back.get(index - self.front.len())
        }
    }

    /// Copies the outcomes into a `Vec`, oldest first.
    pub fn to_vec(&self) -> Vec<Outcome> {
        self.iter().copied().collect()
    }
}

impl<'a> IntoIterator for HistorySnapshot<'a> {
    type Item = &'a Outcome;
    type IntoIter = Chain<slice::Iter<'a, Outcome>, slice::Iter<'a, Outcome>>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// On-disk form of a [`BoundedHistory`], validated on the way back in.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct SerializedHistory {
    capacity: usize,
    outcomes: Vec<Outcome>,
}

impl TryFrom<SerializedHistory> for BoundedHistory {
    type Error = InvalidHistoryError;

    fn try_from(value: SerializedHistory) -> Result<Self, Self::Error> {
        let capacity = MaxHistoryLength::new(value.capacity)?;
        if value.outcomes.len() > capacity.get() {
            return Err(InvalidHistoryError::Overfull {
                capacity: capacity.get(),
                len: value.outcomes.len(),
            });
        }
        Ok(Self {
            capacity,
            outcomes: value.outcomes.into(),
        })
    }
}

impl From<BoundedHistory> for SerializedHistory {
    fn from(value: BoundedHistory) -> Self {
        Self {
            capacity: value.capacity.get(),
            outcomes: value.outcomes.into(),
        }
    }
}
