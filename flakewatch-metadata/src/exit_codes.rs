// Copyright (c) The flakewatch Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

/// Documented exit codes for `flakewatch` failures.
///
/// Unknown/unexpected failures will always result in exit code 1.
pub enum FlakewatchExitCode {}

impl FlakewatchExitCode {
    /// No errors occurred and flakewatch exited normally.
    pub const OK: i32 = 0;

    /// A user issue happened while setting up a flakewatch invocation, for
    /// example an invalid config file.
    pub const SETUP_ERROR: i32 = 96;

    /// A JUnit report could not be read or was malformed.
    pub const INVALID_JUNIT: i32 = 97;

    /// Reading from or writing to the build store failed.
    pub const STORE_ERROR: i32 = 98;

    /// The requested build has not been recorded.
    pub const BUILD_NOT_FOUND: i32 = 99;

    /// Writing data to stdout or stderr produced an error.
    pub const WRITE_OUTPUT_ERROR: i32 = 110;
}
