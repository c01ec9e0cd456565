// Copyright (c) The flakewatch Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::output::{NO_HEADING_TARGET, StderrStyles};
use camino::{FromPathBufError, Utf8PathBuf};
use flakewatch_history::{errors::*, history::BuildNumber};
use flakewatch_metadata::FlakewatchExitCode;
use owo_colors::OwoColorize;
use std::error::Error;
use thiserror::Error;
use tracing::error;

pub(crate) type Result<T, E = ExpectedError> = std::result::Result<T, E>;

// Note that the #[error()] strings are mostly placeholder messages -- the expected way to print out
// errors is with the display_to_stderr method, which colorizes errors.

/// An expected error: bad input, configuration or store state, rather than a
/// bug in flakewatch.
#[derive(Debug, Error)]
#[doc(hidden)]
pub enum ExpectedError {
    #[error("could not determine the current directory")]
    CurrentDirFailed {
        #[source]
        err: std::io::Error,
    },
    #[error("workspace root is not valid UTF-8")]
    WorkspaceRootInvalidUtf8 {
        #[source]
        err: FromPathBufError,
    },
    #[error("config parse error")]
    ConfigParseError {
        #[from]
        err: ConfigParseError,
    },
    #[error("JUnit read error")]
    JunitReadError {
        #[from]
        err: JunitReadError,
    },
    #[error("store read error")]
    StoreReadError {
        #[from]
        err: StoreReadError,
    },
    #[error("record build error")]
    RecordBuildError {
        #[from]
        err: RecordBuildError,
    },
    #[error("no builds recorded")]
    NoBuildsRecorded { store_dir: Utf8PathBuf },
    #[error("build not found")]
    BuildNotFound {
        build_number: BuildNumber,
        store_dir: Utf8PathBuf,
    },
    #[error("error writing output")]
    WriteError {
        #[source]
        err: std::io::Error,
    },
    #[error("error writing JSON output")]
    JsonWriteError {
        #[source]
        err: serde_json::Error,
    },
}

impl ExpectedError {
    pub(crate) fn current_dir_failed(err: std::io::Error) -> Self {
        Self::CurrentDirFailed { err }
    }

    pub(crate) fn build_not_found(
        build_number: BuildNumber,
        store_dir: impl Into<Utf8PathBuf>,
    ) -> Self {
        Self::BuildNotFound {
            build_number,
            store_dir: store_dir.into(),
        }
    }

    /// Returns the exit code for the process.
    pub fn process_exit_code(&self) -> i32 {
        match self {
            Self::CurrentDirFailed { .. }
            | Self::WorkspaceRootInvalidUtf8 { .. }
            | Self::ConfigParseError { .. } => FlakewatchExitCode::SETUP_ERROR,
            Self::RecordBuildError { err } => match err {
                RecordBuildError::BuildNumberNotIncreasing { .. } => {
                    FlakewatchExitCode::SETUP_ERROR
                }
                RecordBuildError::Read(_) | RecordBuildError::Write(_) => {
                    FlakewatchExitCode::STORE_ERROR
                }
            },
            Self::JunitReadError { .. } => FlakewatchExitCode::INVALID_JUNIT,
            Self::StoreReadError { .. } => FlakewatchExitCode::STORE_ERROR,
            Self::NoBuildsRecorded { .. } | Self::BuildNotFound { .. } => {
                FlakewatchExitCode::BUILD_NOT_FOUND
            }
            Self::WriteError { .. } | Self::JsonWriteError { .. } => {
                FlakewatchExitCode::WRITE_OUTPUT_ERROR
            }
        }
    }

    /// Displays this error to stderr.
    pub fn display_to_stderr(&self, styles: &StderrStyles) {
        let mut next_error = match &self {
            Self::CurrentDirFailed { err } => {
                error!("could not determine the current directory");
                Some(err as &dyn Error)
            }
            Self::WorkspaceRootInvalidUtf8 { err } => {
                error!(
                    "workspace root `{}` is not valid UTF-8",
                    err.as_path().display().style(styles.bold)
                );
                None
            }
            Self::ConfigParseError { err } => {
                error!(
                    "failed to parse config at `{}`",
                    err.config_file().style(styles.bold)
                );
                err.source()
            }
            Self::JunitReadError { err } => {
                error!("{err}");
                err.source()
            }
            Self::StoreReadError { err } => {
                error!("{err}");
                err.source()
            }
            Self::RecordBuildError { err } => match err {
                RecordBuildError::BuildNumberNotIncreasing {
                    build_number,
                    latest,
                } => {
                    error!(
                        "cannot record build {}: build {} has already been recorded\n\
                         (hint: build numbers must increase from one recorded build to the next)",
                        build_number.style(styles.bold),
                        latest.style(styles.bold),
                    );
                    None
                }
                RecordBuildError::Read(err) => {
                    error!("{err}");
                    err.source()
                }
                RecordBuildError::Write(err) => {
                    error!("{err}");
                    err.source()
                }
            },
            Self::NoBuildsRecorded { store_dir } => {
                error!(
                    "no builds have been recorded in `{}`\n\
                     (hint: record a build with `flakewatch record`)",
                    store_dir.style(styles.bold)
                );
                None
            }
            Self::BuildNotFound {
                build_number,
                store_dir,
            } => {
                error!(
                    "build {} has not been recorded in `{}`",
                    build_number.style(styles.bold),
                    store_dir.style(styles.bold),
                );
                None
            }
            Self::WriteError { err } => {
                error!("error writing output");
                Some(err as &dyn Error)
            }
            Self::JsonWriteError { err } => {
                error!("error writing JSON output");
                Some(err as &dyn Error)
            }
        };

        while let Some(err) = next_error {
            error!(target: NO_HEADING_TARGET, "\nCaused by:\n  {}", err);
            next_error = err.source();
        }
    }
}
