// Copyright (c) The flakewatch Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Top-level application and command routing.

use crate::{
    errors::{ExpectedError, Result},
    output::{OutputContext, OutputOpts, StdoutStyles},
};
use camino::{Utf8Path, Utf8PathBuf};
use clap::{Args, Parser, Subcommand, ValueEnum};
use flakewatch_history::{
    config::FlakewatchConfig,
    history::{BoundedHistory, BuildNumber, MaxHistoryLength},
    junit::read_reports,
    metrics::StabilityMetrics,
    propagation::HistoryPropagation,
    store::{BuildStore, RecordedBuild},
    test_result::TestIdentity,
};
use flakewatch_metadata::{
    BuildStabilitySummary, FlakewatchExitCode, OutcomeSummary, TestStabilitySummary,
};
use owo_colors::OwoColorize;
use std::io::Write;
use tracing::{debug, warn};

/// Track flaky tests across CI builds.
///
/// Record each build's JUnit reports with `flakewatch record`, then use
/// `flakewatch show` to see stability and flakiness for every test that has
/// failed recently.
#[derive(Debug, Parser)]
#[command(
    version,
    name = "flakewatch",
    styles = crate::output::clap_styles::style(),
    max_term_width = 100,
)]
pub struct FlakewatchApp {
    #[clap(flatten)]
    common: CommonOpts,

    #[clap(flatten)]
    output: OutputOpts,

    #[clap(subcommand)]
    command: Command,
}

impl FlakewatchApp {
    /// Initializes the output context.
    pub fn init_output(&self) -> OutputContext {
        self.output.init()
    }

    /// Executes the app.
    pub fn exec(self, output: OutputContext, writer: &mut dyn Write) -> Result<i32> {
        let workspace_root = self.common.workspace_root()?;
        let config = self.common.make_config(&workspace_root)?;
        let store = BuildStore::new(config.store_dir());

        match self.command {
            Command::Record { build, junit_files } => {
                exec_record(&config, &store, build, &junit_files, output, writer)
            }
            Command::Show {
                build,
                message_format,
            } => exec_show(&config, &store, build, message_format, output, writer),
        }
    }
}

#[derive(Debug, Args)]
#[command(next_help_heading = "Config options")]
struct CommonOpts {
    /// Workspace root [default: current directory]
    #[arg(
        long,
        global = true,
        value_name = "PATH",
        env = "FLAKEWATCH_WORKSPACE_ROOT"
    )]
    workspace_root: Option<Utf8PathBuf>,

    /// Config file [default: workspace-root/.config/flakewatch.toml]
    #[arg(long, global = true, value_name = "PATH")]
    config_file: Option<Utf8PathBuf>,

    /// Number of recent runs kept per test [default: from config]
    #[arg(
        long,
        global = true,
        value_name = "N",
        env = "FLAKEWATCH_MAX_HISTORY_LENGTH"
    )]
    max_history_length: Option<MaxHistoryLength>,
}

impl CommonOpts {
    fn workspace_root(&self) -> Result<Utf8PathBuf> {
        match &self.workspace_root {
            Some(workspace_root) => Ok(workspace_root.clone()),
            None => {
                let current_dir =
                    std::env::current_dir().map_err(ExpectedError::current_dir_failed)?;
                Utf8PathBuf::try_from(current_dir)
                    .map_err(|err| ExpectedError::WorkspaceRootInvalidUtf8 { err })
            }
        }
    }

    fn make_config(&self, workspace_root: &Utf8Path) -> Result<FlakewatchConfig> {
        let config = FlakewatchConfig::from_sources(workspace_root, self.config_file.as_deref())?;
        Ok(match self.max_history_length {
            Some(max_history_length) => config.with_max_history_length(max_history_length),
            None => config,
        })
    }
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Record a build's JUnit reports and update test histories
    ///
    /// Reads every report given, carries each test's history forward from the
    /// previous recorded build, and records the results as build N.
    Record {
        /// The build number; must be greater than every recorded build
        #[arg(long, value_name = "N")]
        build: BuildNumber,

        /// JUnit XML reports produced by the build
        #[arg(required = true, value_name = "JUNIT_FILES")]
        junit_files: Vec<Utf8PathBuf>,
    },

    /// Show stability metrics for tracked tests
    ///
    /// Tests that haven't failed within their history window are not tracked,
    /// and are not shown.
    Show {
        /// The build to show [default: the latest recorded build]
        #[arg(long, value_name = "N")]
        build: Option<BuildNumber>,

        /// Output format
        #[arg(
            short = 'T',
            long,
            value_enum,
            default_value_t,
            value_name = "FMT"
        )]
        message_format: MessageFormatOpts,
    },
}

#[derive(Copy, Clone, Debug, ValueEnum, Default)]
enum MessageFormatOpts {
    /// A human-readable output format.
    #[default]
    Human,
    /// JSON, as described by `flakewatch-metadata`.
    Json,
}

fn exec_record(
    config: &FlakewatchConfig,
    store: &BuildStore,
    build_number: BuildNumber,
    junit_files: &[Utf8PathBuf],
    output: OutputContext,
    writer: &mut dyn Write,
) -> Result<i32> {
    let results = read_reports(junit_files.iter().map(Utf8PathBuf::as_path))?;
    if results.is_empty() {
        warn!("no test results found in {} JUnit report(s)", junit_files.len());
    }

    let builds = store.load_builds()?;
    for (broken_build, error) in builds.broken_builds() {
        warn!("ignoring unreadable recorded build {broken_build}: {error}");
    }

    let histories = HistoryPropagation::new(&builds, config.max_history_length())
        .propagate(build_number, &results);
    let recorded = store.record(&results, &histories)?;

    let styles = output.stdout_styles();
    writeln!(
        writer,
        "recorded build {}: {} results, {} tracked {}",
        recorded.build_number.style(styles.bold),
        recorded.results.len(),
        histories.len().style(styles.bold),
        plural_tests(histories.len()),
    )
    .map_err(|err| ExpectedError::WriteError { err })?;

    Ok(FlakewatchExitCode::OK)
}

fn exec_show(
    config: &FlakewatchConfig,
    store: &BuildStore,
    build_number: Option<BuildNumber>,
    message_format: MessageFormatOpts,
    output: OutputContext,
    writer: &mut dyn Write,
) -> Result<i32> {
    let build_number = match build_number {
        Some(build_number) => build_number,
        None => store
            .latest_build_number()?
            .ok_or_else(|| ExpectedError::NoBuildsRecorded {
                store_dir: config.store_dir().to_owned(),
            })?,
    };
    let build = store
        .read_build(build_number)?
        .ok_or_else(|| ExpectedError::build_not_found(build_number, config.store_dir()))?;
    debug!(build_number, tracked = build.tracked().count(), "showing build");

    match message_format {
        MessageFormatOpts::Human => {
            write_human(&build, output, writer).map_err(|err| ExpectedError::WriteError { err })?;
        }
        MessageFormatOpts::Json => {
            let summary = build_summary(&build);
            serde_json::to_writer_pretty(&mut *writer, &summary)
                .map_err(|err| ExpectedError::JsonWriteError { err })?;
            writeln!(writer).map_err(|err| ExpectedError::WriteError { err })?;
        }
    }

    Ok(FlakewatchExitCode::OK)
}

fn write_human(
    build: &RecordedBuild,
    output: OutputContext,
    writer: &mut dyn Write,
) -> std::io::Result<()> {
    let styles = output.stdout_styles();
    let tracked: Vec<_> = build.tracked().collect();

    writeln!(
        writer,
        "build {}: {} tracked {}",
        build.build_number.style(styles.bold),
        tracked.len().style(styles.bold),
        plural_tests(tracked.len()),
    )?;

    for (id, history) in tracked {
        write_test(id, history, &styles, output.verbose, writer)?;
    }

    Ok(())
}

fn write_test(
    id: &TestIdentity,
    history: &BoundedHistory,
    styles: &StdoutStyles,
    verbose: bool,
    writer: &mut dyn Write,
) -> std::io::Result<()> {
    let metrics = StabilityMetrics::compute(Some(history));
    let health = metrics.health_level();

    writeln!(
        writer,
        "  {:>13} {}",
        health.style(styles.health(health)),
        id.style(styles.bold),
    )?;
    writeln!(writer, "{:>16}{}", "", metrics)?;

    if verbose {
        let runs: String = history
            .snapshot()
            .iter()
            .map(|outcome| if outcome.passed { '.' } else { 'F' })
            .collect();
        writeln!(writer, "{:>16}runs: {runs}", "")?;
    }

    Ok(())
}

fn build_summary(build: &RecordedBuild) -> BuildStabilitySummary {
    BuildStabilitySummary {
        build_number: build.build_number,
        recorded_at: build.recorded_at.to_rfc3339(),
        result_count: build.results.len(),
        tests: build
            .tracked()
            .map(|(id, history)| test_summary(id, history))
            .collect(),
    }
}

fn test_summary(id: &TestIdentity, history: &BoundedHistory) -> TestStabilitySummary {
    let metrics = StabilityMetrics::compute(Some(history));
    TestStabilitySummary {
        id: id.to_string(),
        total: metrics.total(),
        failed: metrics.failed(),
        stability: metrics.stability(),
        test_status_changes: metrics.test_status_changes(),
        flakiness: metrics.flakiness(),
        health_score: metrics.health_score(),
        health: metrics.health_level().to_string(),
        description: metrics.description(),
        outcomes: history
            .snapshot()
            .iter()
            .map(|outcome| OutcomeSummary {
                build_number: outcome.build_number,
                passed: outcome.passed,
            })
            .collect(),
    }
}

fn plural_tests(count: usize) -> &'static str {
    if count == 1 { "test" } else { "tests" }
}
