// Copyright (c) The flakewatch Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Errors produced by flakewatch.

use crate::history::BuildNumber;
use camino::{Utf8Path, Utf8PathBuf};
use config::ConfigError;
use std::sync::Arc;
use thiserror::Error;

/// A history length was configured that isn't a positive integer.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
#[error("invalid max-history-length `{input}`: must be a positive integer")]
pub struct InvalidConfigurationError {
    input: String,
}

impl InvalidConfigurationError {
    pub(crate) fn new(input: impl Into<String>) -> Self {
        Self {
            input: input.into(),
        }
    }

    /// Returns the rejected input, as provided.
    pub fn input(&self) -> &str {
        &self.input
    }
}

/// A serialized history could not be turned back into a
/// [`BoundedHistory`](crate::history::BoundedHistory).
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum InvalidHistoryError {
    /// The stored capacity is not a positive integer.
    #[error(transparent)]
    Capacity(#[from] InvalidConfigurationError),

    /// More outcomes were stored than the capacity allows.
    #[error("history holds {len} outcomes but its capacity is {capacity}")]
    Overfull {
        /// The stored capacity.
        capacity: usize,
        /// The number of stored outcomes.
        len: usize,
    },
}

/// Looking up a test's result in an earlier build failed.
///
/// [`HistoryPropagation`](crate::propagation::HistoryPropagation) never
/// surfaces this error: the queried link is treated as absent instead.
#[derive(Clone, Debug, Error)]
#[error("failed to look up result for `{test_id}` preceding build {build_number}")]
pub struct HistoryLookupError {
    test_id: String,
    build_number: BuildNumber,
    #[source]
    source: Option<Arc<StoreReadError>>,
}

impl HistoryLookupError {
    /// Creates a new lookup error with no underlying cause.
    pub fn new(test_id: impl Into<String>, build_number: BuildNumber) -> Self {
        Self {
            test_id: test_id.into(),
            build_number,
            source: None,
        }
    }

    pub(crate) fn with_source(
        test_id: impl Into<String>,
        build_number: BuildNumber,
        source: Arc<StoreReadError>,
    ) -> Self {
        Self {
            test_id: test_id.into(),
            build_number,
            source: Some(source),
        }
    }

    /// Returns the build number that the lookup started from.
    pub fn build_number(&self) -> BuildNumber {
        self.build_number
    }
}

/// An error that occurred while parsing the config.
#[derive(Debug, Error)]
#[error("failed to parse flakewatch config at `{config_file}`")]
#[non_exhaustive]
pub struct ConfigParseError {
    config_file: Utf8PathBuf,
    #[source]
    kind: ConfigParseErrorKind,
}

impl ConfigParseError {
    pub(crate) fn new(config_file: impl Into<Utf8PathBuf>, kind: ConfigParseErrorKind) -> Self {
        Self {
            config_file: config_file.into(),
            kind,
        }
    }

    /// Returns the config file for this error.
    pub fn config_file(&self) -> &Utf8PathBuf {
        &self.config_file
    }

    /// Returns the kind of error.
    pub fn kind(&self) -> &ConfigParseErrorKind {
        &self.kind
    }
}

/// The kind of config parse error that occurred.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ConfigParseErrorKind {
    /// An error occurred while building the layered config.
    #[error(transparent)]
    BuildError(Box<ConfigError>),

    /// An error occurred while deserializing the config.
    #[error(transparent)]
    DeserializeError(Box<serde_path_to_error::Error<ConfigError>>),
}

/// An error that occurred while reading a JUnit report.
#[derive(Debug, Error)]
pub enum JunitReadError {
    /// The report file could not be read.
    #[error("failed to read JUnit report at `{path}`")]
    Read {
        /// The path that failed to be read.
        path: Utf8PathBuf,
        /// The underlying IO error.
        #[source]
        error: std::io::Error,
    },

    /// The report is not well-formed XML.
    #[error("failed to parse JUnit report{}", display_path(.path.as_ref()))]
    Xml {
        /// The path to the report, if it came from a file.
        path: Option<Utf8PathBuf>,
        /// The underlying XML error.
        #[source]
        error: quick_xml::Error,
    },

    /// The report is well-formed XML but not a JUnit report.
    #[error("invalid JUnit report{}: {message}", display_path(.path.as_ref()))]
    Malformed {
        /// The path to the report, if it came from a file.
        path: Option<Utf8PathBuf>,
        /// What was wrong with it.
        message: String,
    },
}

impl JunitReadError {
    pub(crate) fn with_path(self, new_path: &Utf8Path) -> Self {
        match self {
            Self::Xml { error, .. } => Self::Xml {
                path: Some(new_path.to_owned()),
                error,
            },
            Self::Malformed { message, .. } => Self::Malformed {
                path: Some(new_path.to_owned()),
                message,
            },
            other @ Self::Read { .. } => other,
        }
    }
}

fn display_path(path: Option<&Utf8PathBuf>) -> String {
    match path {
        Some(path) => format!(" at `{path}`"),
        None => String::new(),
    }
}

/// An error that occurred while reading a recorded build from the store.
#[derive(Debug, Error)]
pub enum StoreReadError {
    /// The store directory could not be listed.
    #[error("failed to list builds in `{path}`")]
    ListDir {
        /// The directory that failed to be listed.
        path: Utf8PathBuf,
        /// The underlying IO error.
        #[source]
        error: std::io::Error,
    },

    /// A build file could not be read.
    #[error("failed to read recorded build at `{path}`")]
    Read {
        /// The path that failed to be read.
        path: Utf8PathBuf,
        /// The underlying IO error.
        #[source]
        error: std::io::Error,
    },

    /// A build file could not be deserialized.
    #[error("failed to deserialize recorded build at `{path}`")]
    Deserialize {
        /// The path that failed to be deserialized.
        path: Utf8PathBuf,
        /// The underlying deserialization error.
        #[source]
        error: serde_json::Error,
    },

    /// A build file has an unsupported format version.
    #[error("recorded build version mismatch at `{path}`: expected {expected}, got {actual}")]
    VersionMismatch {
        /// The path with the version mismatch.
        path: Utf8PathBuf,
        /// The expected version.
        expected: u32,
        /// The actual version found.
        actual: u32,
    },

    /// The build number inside a file doesn't match its file name.
    #[error("recorded build at `{path}` is for build {actual}, expected build {expected}")]
    BuildNumberMismatch {
        /// The path of the build file.
        path: Utf8PathBuf,
        /// The build number implied by the file name.
        expected: BuildNumber,
        /// The build number recorded in the file.
        actual: BuildNumber,
    },
}

/// An error that occurred while writing a recorded build to the store.
#[derive(Debug, Error)]
pub enum StoreWriteError {
    /// Error creating the store directory.
    #[error("failed to create directory `{path}`")]
    CreateDir {
        /// The directory path that failed to be created.
        path: Utf8PathBuf,
        /// The underlying IO error.
        #[source]
        error: std::io::Error,
    },

    /// Error serializing the build.
    #[error("failed to serialize recorded build")]
    Serialize {
        /// The underlying serialization error.
        #[source]
        error: serde_json::Error,
    },

    /// Error writing the build to disk.
    #[error("failed to write recorded build to `{path}`")]
    Write {
        /// The path that failed to be written.
        path: Utf8PathBuf,
        /// The underlying IO error.
        #[source]
        error: std::io::Error,
    },
}

/// An error that occurred while recording a new build.
#[derive(Debug, Error)]
pub enum RecordBuildError {
    /// Build numbers must increase from one recorded build to the next.
    #[error("build {build_number} is not newer than the latest recorded build {latest}")]
    BuildNumberNotIncreasing {
        /// The build number that was being recorded.
        build_number: BuildNumber,
        /// The latest build number already in the store.
        latest: BuildNumber,
    },

    /// Listing the existing builds failed.
    #[error("failed to read existing builds")]
    Read(#[from] StoreReadError),

    /// Writing the new build failed.
    #[error("failed to write build")]
    Write(#[from] StoreWriteError),
}
