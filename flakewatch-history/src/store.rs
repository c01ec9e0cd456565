// Copyright (c) The flakewatch Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! On-disk storage for recorded builds.
//!
//! Each build is kept in its own JSON file, `<store-dir>/builds/<n>.json`,
//! holding every test result of that build along with the history attached
//! to it. A recorded build is never rewritten: the next build's histories go
//! into the next build's file.

use crate::{
    errors::{HistoryLookupError, RecordBuildError, StoreReadError, StoreWriteError},
    history::{BoundedHistory, BuildNumber},
    propagation::{PreviousResult, PreviousResultLookup, PropagatedHistories},
    test_result::{BuildResults, TestIdentity, TestStatus},
};
use camino::{Utf8Path, Utf8PathBuf};
use chrono::{DateTime, FixedOffset, Local};
use serde::{Deserialize, Serialize};
use std::{
    collections::BTreeMap,
    io::{self, Write},
    sync::Arc,
};
use tracing::{debug, info};

const BUILDS_DIR_NAME: &str = "builds";
const BUILD_FILE_EXTENSION: &str = "json";

/// The format version of recorded build files.
pub const STORE_FORMAT_VERSION: u32 = 1;

/// A directory of recorded builds.
#[derive(Clone, Debug)]
pub struct BuildStore {
    builds_dir: Utf8PathBuf,
}

impl BuildStore {
    /// Creates a new `BuildStore` rooted at `store_dir`.
    ///
    /// Nothing is created on disk until the first build is recorded.
    pub fn new(store_dir: &Utf8Path) -> Self {
        Self {
            builds_dir: store_dir.join(BUILDS_DIR_NAME),
        }
    }

    /// Returns the directory that build files are kept in.
    pub fn builds_dir(&self) -> &Utf8Path {
        &self.builds_dir
    }

    /// Returns the path of the file for `build_number`.
    pub fn build_path(&self, build_number: BuildNumber) -> Utf8PathBuf {
        self.builds_dir.join(format!("{build_number}.{BUILD_FILE_EXTENSION}"))
    }

    /// Loads every recorded build.
    ///
    /// A build file that can't be read is kept as a broken entry rather than
    /// failing the load. Lookups that pass through a broken build fail with a
    /// [`HistoryLookupError`].
    pub fn load_builds(&self) -> Result<StoredBuilds, StoreReadError> {
        let mut builds = BTreeMap::new();

        for (build_number, path) in self.list_build_files()? {
            let build = match read_build_file(&path, build_number) {
                Ok(build) => StoredBuild::Recorded(build),
                Err(error) => {
                    debug!(%path, "recorded build is unreadable: {error}");
                    StoredBuild::Broken(Arc::new(error))
                }
            };
            builds.insert(build_number, build);
        }

        debug!(builds_dir = %self.builds_dir, count = builds.len(), "loaded recorded builds");
        Ok(StoredBuilds { builds })
    }

    /// Returns the number of the most recently recorded build, if any.
    pub fn latest_build_number(&self) -> Result<Option<BuildNumber>, StoreReadError> {
        Ok(self
            .list_build_files()?
            .last()
            .map(|(build_number, _)| *build_number))
    }

    /// Reads a single recorded build.
    ///
    /// Returns `Ok(None)` if the build hasn't been recorded.
    pub fn read_build(
        &self,
        build_number: BuildNumber,
    ) -> Result<Option<RecordedBuild>, StoreReadError> {
        match read_build_file(&self.build_path(build_number), build_number) {
            Ok(build) => Ok(Some(build)),
            Err(StoreReadError::Read { error, .. }) if error.kind() == io::ErrorKind::NotFound => {
                Ok(None)
            }
            Err(error) => Err(error),
        }
    }

    /// Records the results of a build, along with the histories produced for
    /// it.
    ///
    /// Fails if the build isn't newer than every build already recorded.
    pub fn record(
        &self,
        results: &BuildResults,
        histories: &PropagatedHistories,
    ) -> Result<RecordedBuild, RecordBuildError> {
        let build_number = histories.build_number();
        let existing = self.list_build_files()?;
        if let Some(&(latest, _)) = existing.last()
            && latest >= build_number
        {
            return Err(RecordBuildError::BuildNumberNotIncreasing {
                build_number,
                latest,
            });
        }

        let results = results
            .iter()
            .map(|result| {
                let recorded = RecordedResult {
                    status: result.status,
                    history: histories.get(result.id.as_str()).cloned(),
                };
                (result.id.clone(), recorded)
            })
            .collect();
        let build = RecordedBuild {
            version: STORE_FORMAT_VERSION,
            build_number,
            recorded_at: Local::now().fixed_offset(),
            results,
        };

        self.write_build(&build)?;
        info!(
            build_number,
            result_count = build.results.len(),
            tracked = histories.len(),
            "recorded build"
        );
        Ok(build)
    }

    // ---
    // Helper methods
    // ---

    /// Returns build files sorted by build number.
    fn list_build_files(&self) -> Result<Vec<(BuildNumber, Utf8PathBuf)>, StoreReadError> {
        let entries = match self.builds_dir.read_dir_utf8() {
            Ok(entries) => entries,
            Err(error) if error.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(error) => {
                return Err(StoreReadError::ListDir {
                    path: self.builds_dir.clone(),
                    error,
                });
            }
        };

        let mut files = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|error| StoreReadError::ListDir {
                path: self.builds_dir.clone(),
                error,
            })?;
            let path = entry.path();
            let build_number = match (path.file_stem(), path.extension()) {
                (Some(stem), Some(BUILD_FILE_EXTENSION)) => stem.parse::<BuildNumber>().ok(),
                _ => None,
            };
            match build_number {
                Some(build_number) => files.push((build_number, path.to_owned())),
                None => debug!(%path, "ignoring unrecognized file in builds directory"),
            }
        }

        files.sort_unstable_by_key(|(build_number, _)| *build_number);
        Ok(files)
    }

    fn write_build(&self, build: &RecordedBuild) -> Result<(), StoreWriteError> {
        std::fs::create_dir_all(&self.builds_dir).map_err(|error| StoreWriteError::CreateDir {
            path: self.builds_dir.clone(),
            error,
        })?;

        let contents = serde_json::to_vec_pretty(build)
            .map_err(|error| StoreWriteError::Serialize { error })?;

        let path = self.build_path(build.build_number);
        atomicwrites::AtomicFile::new(&path, atomicwrites::AllowOverwrite)
            .write(|file| file.write_all(&contents))
            .map_err(|error| StoreWriteError::Write {
                path,
                error: match error {
                    atomicwrites::Error::Internal(error) | atomicwrites::Error::User(error) => {
                        error
                    }
                },
            })
    }
}

fn read_build_file(
    path: &Utf8Path,
    build_number: BuildNumber,
) -> Result<RecordedBuild, StoreReadError> {
    let contents = std::fs::read_to_string(path).map_err(|error| StoreReadError::Read {
        path: path.to_owned(),
        error,
    })?;

    // Check the version first, since other fields may not parse across versions.
    let header: BuildFileHeader =
        serde_json::from_str(&contents).map_err(|error| StoreReadError::Deserialize {
            path: path.to_owned(),
            error,
        })?;
    if header.version != STORE_FORMAT_VERSION {
        return Err(StoreReadError::VersionMismatch {
            path: path.to_owned(),
            expected: STORE_FORMAT_VERSION,
            actual: header.version,
        });
    }

    let build: RecordedBuild =
        serde_json::from_str(&contents).map_err(|error| StoreReadError::Deserialize {
            path: path.to_owned(),
            error,
        })?;
    if build.build_number != build_number {
        return Err(StoreReadError::BuildNumberMismatch {
            path: path.to_owned(),
            expected: build_number,
            actual: build.build_number,
        });
    }
    Ok(build)
}

#[derive(Deserialize)]
struct BuildFileHeader {
    version: u32,
}

/// The contents of a recorded build file.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct RecordedBuild {
    /// The format version of the file.
    pub version: u32,

    /// The build number.
    pub build_number: BuildNumber,

    /// When the build was recorded.
    pub recorded_at: DateTime<FixedOffset>,

    /// The result of every test in the build.
    pub results: BTreeMap<TestIdentity, RecordedResult>,
}

impl RecordedBuild {
    /// Iterates over the tests that have a history attached, in identity
    /// order.
    pub fn tracked(&self) -> impl Iterator<Item = (&TestIdentity, &BoundedHistory)> {
        self.results
            .iter()
            .filter_map(|(id, result)| result.history.as_ref().map(|history| (id, history)))
    }
}

/// A single test's result within a [`RecordedBuild`].
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct RecordedResult {
    /// The status of the test in this build.
    pub status: TestStatus,

    /// The history attached to this result, if the test is being tracked.
    pub history: Option<BoundedHistory>,
}

#[derive(Clone, Debug)]
enum StoredBuild {
    Recorded(RecordedBuild),
    Broken(Arc<StoreReadError>),
}

/// Every build recorded in a [`BuildStore`], as of when it was loaded.
#[derive(Clone, Debug, Default)]
pub struct StoredBuilds {
    builds: BTreeMap<BuildNumber, StoredBuild>,
}

impl StoredBuilds {
    /// Returns the number of recorded builds, including broken ones.
    pub fn len(&self) -> usize {
        self.builds.len()
    }

    /// Returns true if no builds have been recorded.
    pub fn is_empty(&self) -> bool {
        self.builds.is_empty()
    }

    /// Returns the most recently recorded build number.
    pub fn latest_build_number(&self) -> Option<BuildNumber> {
        self.builds.keys().next_back().copied()
    }

    /// Returns the build with the given number.
    ///
    /// Returns `None` if the build wasn't recorded, and `Some(Err)` if it was
    /// recorded but couldn't be read.
    pub fn get(
        &self,
        build_number: BuildNumber,
    ) -> Option<Result<&RecordedBuild, &StoreReadError>> {
        self.builds.get(&build_number).map(|build| match build {
            StoredBuild::Recorded(build) => Ok(build),
            StoredBuild::Broken(error) => Err(&**error),
        })
    }

    /// Iterates over builds that couldn't be read.
    pub fn broken_builds(&self) -> impl Iterator<Item = (BuildNumber, &StoreReadError)> {
        self.builds.iter().filter_map(|(build_number, build)| match build {
            StoredBuild::Broken(error) => Some((*build_number, &**error)),
            StoredBuild::Recorded(_) => None,
        })
    }

    /// Iterates over the numbers of all recorded builds, oldest first.
    pub fn build_numbers(&self) -> impl Iterator<Item = BuildNumber> + '_ {
        self.builds.keys().copied()
    }
}

impl PreviousResultLookup for StoredBuilds {
    fn previous_result(
        &self,
        id: &TestIdentity,
        build_number: BuildNumber,
    ) -> Result<Option<PreviousResult<'_>>, HistoryLookupError> {
        let Some((&previous_build, build)) = self.builds.range(..build_number).next_back() else {
            return Ok(None);
        };

        match build {
            StoredBuild::Recorded(build) => Ok(build.results.get(id).map(|result| PreviousResult {
                build_number: previous_build,
                passed: result.status == TestStatus::Passed,
                history: result.history.as_ref(),
            })),
            StoredBuild::Broken(error) => Err(HistoryLookupError::with_source(
                id.as_str(),
                build_number,
                error.clone(),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        history::{MaxHistoryLength, Outcome},
        metrics::StabilityMetrics,
        propagation::HistoryPropagation,
        test_helpers::{failed, passed, skipped},
        test_result::TestResult,
    };
    use camino_tempfile::Utf8TempDir;
    use pretty_assertions::assert_eq;

    fn run_build(
        store: &BuildStore,
        build_number: BuildNumber,
        max_history_length: usize,
        results: impl IntoIterator<Item = TestResult>,
    ) -> RecordedBuild {
        let builds = store.load_builds().unwrap();
        let results: BuildResults = results.into_iter().collect();
        let max_history_length = MaxHistoryLength::new(max_history_length).unwrap();
        let histories =
            HistoryPropagation::new(&builds, max_history_length).propagate(build_number, &results);
        store.record(&results, &histories).unwrap()
    }

    fn outcomes(build: &RecordedBuild, id: &str) -> Option<Vec<Outcome>> {
        build.results[id]
            .history
            .as_ref()
            .map(|history| history.snapshot().to_vec())
    }

    #[test]
    fn empty_store() {
        let dir = Utf8TempDir::new().unwrap();
        let store = BuildStore::new(dir.path());

        let builds = store.load_builds().unwrap();
        assert!(builds.is_empty());
        assert_eq!(builds.latest_build_number(), None);
        assert_eq!(
            builds
                .previous_result(&TestIdentity::new("t"), 1)
                .unwrap()
                .map(|previous| previous.build_number),
            None
        );
    }

    #[test]
    fn record_and_reload() {
        let dir = Utf8TempDir::new().unwrap();
        let store = BuildStore::new(dir.path());

        let recorded = run_build(&store, 1, 30, [failed("a"), passed("b"), skipped("c")]);
        assert!(store.build_path(1).is_file());

        let builds = store.load_builds().unwrap();
        assert_eq!(builds.latest_build_number(), Some(1));
        let loaded = builds.get(1).unwrap().unwrap();
        assert_eq!(loaded, &recorded);
        assert_eq!(loaded.version, STORE_FORMAT_VERSION);
        assert_eq!(outcomes(loaded, "a"), Some(vec![Outcome::failed(1)]));
        assert_eq!(outcomes(loaded, "b"), None);
        assert_eq!(loaded.results["c"].status, TestStatus::Skipped);

        let tracked: Vec<_> = loaded.tracked().map(|(id, _)| id.as_str()).collect();
        assert_eq!(tracked, vec!["a"]);
    }

    #[test]
    fn build_file_format() {
        let dir = Utf8TempDir::new().unwrap();
        let store = BuildStore::new(dir.path());
        run_build(&store, 7, 30, [failed("a")]);

        let contents = std::fs::read_to_string(store.build_path(7)).unwrap();
        let json: serde_json::Value = serde_json::from_str(&contents).unwrap();
        assert_eq!(json["version"], 1);
        assert_eq!(json["build-number"], 7);
        assert_eq!(json["results"]["a"]["status"]["kind"], "failed");
        assert_eq!(json["results"]["a"]["history"]["capacity"], 30);
    }

    #[test]
    fn read_single_build() {
        let dir = Utf8TempDir::new().unwrap();
        let store = BuildStore::new(dir.path());
        assert_eq!(store.latest_build_number().unwrap(), None);

        run_build(&store, 1, 30, [failed("a")]);
        let recorded = run_build(&store, 2, 30, [passed("a")]);
        assert_eq!(store.latest_build_number().unwrap(), Some(2));
        assert_eq!(store.read_build(2).unwrap(), Some(recorded));
        assert_eq!(store.read_build(3).unwrap(), None);

        std::fs::write(store.build_path(1), "{").unwrap();
        assert!(matches!(
            store.read_build(1),
            Err(StoreReadError::Deserialize { .. })
        ));
    }

    #[test]
    fn build_numbers_must_increase() {
        let dir = Utf8TempDir::new().unwrap();
        let store = BuildStore::new(dir.path());
        run_build(&store, 5, 30, [passed("t")]);

        let builds = store.load_builds().unwrap();
        let results: BuildResults = [passed("t")].into_iter().collect();
        for build_number in [3, 5] {
            let histories = HistoryPropagation::new(&builds, MaxHistoryLength::default())
                .propagate(build_number, &results);
            let error = store.record(&results, &histories).unwrap_err();
            assert!(
                matches!(
                    error,
                    RecordBuildError::BuildNumberNotIncreasing { latest: 5, .. }
                ),
                "unexpected error: {error:?}"
            );
        }
    }

    #[test]
    fn histories_carry_across_recorded_builds() {
        let dir = Utf8TempDir::new().unwrap();
        let store = BuildStore::new(dir.path());

        run_build(&store, 1, 30, [passed("t"), passed("stable")]);
        run_build(&store, 2, 30, [passed("t"), passed("stable")]);
        let build = run_build(&store, 3, 30, [failed("t"), passed("stable")]);
        assert_eq!(
            outcomes(&build, "t"),
            Some(vec![
                Outcome::passed(1),
                Outcome::passed(2),
                Outcome::failed(3)
            ])
        );
        assert_eq!(outcomes(&build, "stable"), None);

        let build = run_build(&store, 4, 30, [passed("t"), passed("stable")]);
        assert_eq!(
            outcomes(&build, "t"),
            Some(vec![
                Outcome::passed(1),
                Outcome::passed(2),
                Outcome::failed(3),
                Outcome::passed(4),
            ])
        );

        let history = build.results["t"].history.as_ref();
        let metrics = StabilityMetrics::compute(history);
        assert_eq!(metrics.total(), 4);
        assert_eq!(metrics.failed(), 1);
        assert_eq!(metrics.stability(), 75);
        assert_eq!(metrics.test_status_changes(), 2);
        assert_eq!(metrics.flakiness(), 66);

        // Earlier build files are untouched.
        let builds = store.load_builds().unwrap();
        let build_3 = builds.get(3).unwrap().unwrap();
        assert_eq!(outcomes(build_3, "t").map(|o| o.len()), Some(3));
    }

    #[test]
    fn test_stabilizes_after_enough_passes() {
        let dir = Utf8TempDir::new().unwrap();
        let store = BuildStore::new(dir.path());

        run_build(&store, 1, 3, [failed("t")]);
        run_build(&store, 2, 3, [passed("t")]);
        let build = run_build(&store, 3, 3, [passed("t")]);
        assert!(outcomes(&build, "t").is_some());

        // The failure from build 1 is evicted here.
        let build = run_build(&store, 4, 3, [passed("t")]);
        assert_eq!(outcomes(&build, "t"), None);
        assert_eq!(build.tracked().count(), 0);
    }

    #[test]
    fn gap_in_build_numbers_uses_nearest_earlier_build() {
        let dir = Utf8TempDir::new().unwrap();
        let store = BuildStore::new(dir.path());

        run_build(&store, 10, 30, [failed("t")]);
        let build = run_build(&store, 20, 30, [failed("t")]);
        assert_eq!(
            outcomes(&build, "t"),
            Some(vec![Outcome::failed(10), Outcome::failed(20)])
        );
    }

    #[test]
    fn broken_build_is_fail_soft() {
        let dir = Utf8TempDir::new().unwrap();
        let store = BuildStore::new(dir.path());

        run_build(&store, 1, 30, [failed("t")]);
        run_build(&store, 2, 30, [failed("t")]);
        std::fs::write(store.build_path(2), "not json").unwrap();

        let builds = store.load_builds().unwrap();
        assert_eq!(builds.len(), 2);
        let broken: Vec<_> = builds.broken_builds().map(|(n, _)| n).collect();
        assert_eq!(broken, vec![2]);
        assert!(matches!(
            builds.get(2),
            Some(Err(StoreReadError::Deserialize { .. }))
        ));

        let error = builds
            .previous_result(&TestIdentity::new("t"), 3)
            .unwrap_err();
        assert_eq!(error.build_number(), 3);

        // The history through build 2 is lost, so this counts as a first
        // failure with nothing to backfill.
        let build = run_build(&store, 3, 30, [failed("t")]);
        assert_eq!(outcomes(&build, "t"), Some(vec![Outcome::failed(3)]));
    }

    #[test]
    fn version_mismatch_is_a_broken_build() {
        let dir = Utf8TempDir::new().unwrap();
        let store = BuildStore::new(dir.path());
        std::fs::create_dir_all(store.builds_dir()).unwrap();
        std::fs::write(
            store.build_path(1),
            r#"{"version": 99, "something-else": true}"#,
        )
        .unwrap();

        let builds = store.load_builds().unwrap();
        assert!(matches!(
            builds.get(1),
            Some(Err(StoreReadError::VersionMismatch {
                expected: 1,
                actual: 99,
                ..
            }))
        ));
    }

    #[test]
    fn build_number_mismatch_is_a_broken_build() {
        let dir = Utf8TempDir::new().unwrap();
        let store = BuildStore::new(dir.path());
        run_build(&store, 4, 30, [failed("t")]);
        std::fs::rename(store.build_path(4), store.build_path(5)).unwrap();

        let builds = store.load_builds().unwrap();
        assert!(matches!(
            builds.get(5),
            Some(Err(StoreReadError::BuildNumberMismatch {
                expected: 5,
                actual: 4,
                ..
            }))
        ));
    }

    #[test]
    fn unrecognized_files_are_ignored() {
        let dir = Utf8TempDir::new().unwrap();
        let store = BuildStore::new(dir.path());
        run_build(&store, 1, 30, [failed("t")]);
        std::fs::write(store.builds_dir().join("notes.txt"), "hello").unwrap();
        std::fs::write(store.builds_dir().join("latest.json"), "{}").unwrap();

        let builds = store.load_builds().unwrap();
        assert_eq!(builds.build_numbers().collect::<Vec<_>>(), vec![1]);
    }
}
