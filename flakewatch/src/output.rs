// Copyright (c) The flakewatch Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use clap::{Args, ValueEnum};
use flakewatch_history::metrics::HealthLevel;
use owo_colors::{OwoColorize, Style, style};
use std::fmt;
use tracing::{
    Event, Level, Subscriber,
    field::{Field, Visit},
    level_filters::LevelFilter,
    warn,
};
use tracing_subscriber::{
    Layer,
    filter::Targets,
    fmt::{FmtContext, FormatEvent, FormatFields, format},
    layer::SubscriberExt,
    registry::LookupSpan,
    util::SubscriberInitExt,
};

pub(crate) mod clap_styles {
    use clap::builder::{
        Styles,
        styling::{AnsiColor, Effects, Style},
    };

    const HEADER: Style = AnsiColor::Green.on_default().effects(Effects::BOLD);
    const USAGE: Style = AnsiColor::Green.on_default().effects(Effects::BOLD);
    const LITERAL: Style = AnsiColor::Cyan.on_default().effects(Effects::BOLD);
    const PLACEHOLDER: Style = AnsiColor::Cyan.on_default();
    const ERROR: Style = AnsiColor::Red.on_default().effects(Effects::BOLD);
    const VALID: Style = AnsiColor::Cyan.on_default().effects(Effects::BOLD);
    const INVALID: Style = AnsiColor::Yellow.on_default().effects(Effects::BOLD);

    pub(crate) const fn style() -> Styles {
        Styles::styled()
            .header(HEADER)
            .usage(USAGE)
            .literal(LITERAL)
            .placeholder(PLACEHOLDER)
            .error(ERROR)
            .valid(VALID)
            .invalid(INVALID)
    }
}

/// The environment variable used to configure log filtering.
pub(crate) const LOG_ENV: &str = "FLAKEWATCH_LOG";

/// Log events with this target are printed without a level prefix.
pub(crate) const NO_HEADING_TARGET: &str = "flakewatch::no_heading";

#[derive(Copy, Clone, Debug, Args)]
#[command(next_help_heading = "Output options")]
#[must_use]
pub(crate) struct OutputOpts {
    /// Verbose output
    #[arg(long, short, global = true, env = "FLAKEWATCH_VERBOSE")]
    pub(crate) verbose: bool,

    /// Produce color output: auto, always, never
    #[arg(
        long,
        value_enum,
        default_value_t,
        hide_possible_values = true,
        global = true,
        value_name = "WHEN",
        env = "CARGO_TERM_COLOR"
    )]
    pub(crate) color: Color,
}

impl OutputOpts {
    pub(crate) fn init(self) -> OutputContext {
        let OutputOpts { verbose, color } = self;

        color.init(verbose);

        OutputContext { verbose, color }
    }
}

/// Output settings, resolved once the logger is initialized.
#[derive(Copy, Clone, Debug)]
#[must_use]
pub struct OutputContext {
    pub(crate) verbose: bool,
    pub(crate) color: Color,
}

impl OutputContext {
    /// Returns general stderr styles for the current output context.
    pub fn stderr_styles(&self) -> StderrStyles {
        let mut styles = StderrStyles::default();

        if self.color.should_colorize(supports_color::Stream::Stderr) {
            styles.colorize();
        }

        styles
    }

    pub(crate) fn stdout_styles(&self) -> StdoutStyles {
        let mut styles = StdoutStyles::default();

        if self.color.should_colorize(supports_color::Stream::Stdout) {
            styles.colorize();
        }

        styles
    }
}

/// When to produce color output.
#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum, Default)]
#[must_use]
pub enum Color {
    #[default]
    Auto,
    Always,
    Never,
}

static INIT_LOGGER: std::sync::Once = std::sync::Once::new();

struct SimpleFormatter {
    styles: LogStyles,
}

impl<S, N> FormatEvent<S, N> for SimpleFormatter
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        _ctx: &FmtContext<'_, S, N>,
        mut writer: format::Writer<'_>,
        event: &Event<'_>,
    ) -> fmt::Result {
        let metadata = event.metadata();

        if metadata.target() != NO_HEADING_TARGET {
            match *metadata.level() {
                Level::ERROR => {
                    write!(writer, "{}: ", "error".style(self.styles.error))?;
                }
                Level::WARN => {
                    write!(writer, "{}: ", "warning".style(self.styles.warning))?;
                }
                Level::INFO => {
                    write!(writer, "{}: ", "info".style(self.styles.info))?;
                }
                Level::DEBUG => {
                    write!(writer, "{}: ", "debug".style(self.styles.debug))?;
                }
                Level::TRACE => {
                    write!(writer, "{}: ", "trace".style(self.styles.trace))?;
                }
            }
        }

        let mut visitor = MessageVisitor {
            writer: &mut writer,
            error: None,
        };

        event.record(&mut visitor);

        if let Some(error) = visitor.error {
            return Err(error);
        }

        writeln!(writer)
    }
}

static MESSAGE_FIELD: &str = "message";

/// Writes the message, followed by any other fields as `name=value`.
struct MessageVisitor<'writer, 'a> {
    writer: &'a mut format::Writer<'writer>,
    error: Option<fmt::Error>,
}

impl MessageVisitor<'_, '_> {
    fn write(&mut self, result: fmt::Result) {
        if let Err(error) = result {
            self.error = Some(error);
        }
    }
}

impl Visit for MessageVisitor<'_, '_> {
    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        if field.name() == MESSAGE_FIELD {
            let result = write!(self.writer, "{value:?}");
            self.write(result);
        } else {
            let result = write!(self.writer, " {}={value:?}", field.name());
            self.write(result);
        }
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == MESSAGE_FIELD {
            let result = write!(self.writer, "{value}");
            self.write(result);
        } else {
            let result = write!(self.writer, " {}={value}", field.name());
            self.write(result);
        }
    }

    fn record_error(&mut self, field: &Field, value: &(dyn std::error::Error + 'static)) {
        let result = write!(self.writer, " {}={value}", field.name());
        self.write(result);
    }
}

impl Color {
    pub(crate) fn init(self, verbose: bool) {
        let mut log_styles = LogStyles::default();
        if self.should_colorize(supports_color::Stream::Stderr) {
            log_styles.colorize();
        }

        INIT_LOGGER.call_once(|| {
            let default_level = if verbose {
                LevelFilter::DEBUG
            } else {
                LevelFilter::INFO
            };

            // An invalid filter is reported once the logger is up, and the
            // default level is used instead.
            let level_str = std::env::var(LOG_ENV).unwrap_or_default();
            let (targets, parse_error) = if level_str.is_empty() {
                (Targets::new().with_default(default_level), None)
            } else {
                match level_str.parse::<Targets>() {
                    Ok(targets) => (targets, None),
                    Err(error) => (Targets::new().with_default(default_level), Some(error)),
                }
            };

            let layer = tracing_subscriber::fmt::layer()
                .event_format(SimpleFormatter { styles: log_styles })
                .with_writer(std::io::stderr)
                .with_filter(targets);

            tracing_subscriber::registry().with(layer).init();

            if let Some(error) = parse_error {
                warn!("ignoring invalid {LOG_ENV} value `{level_str}`: {error}");
            }
        });
    }

    pub(crate) fn should_colorize(self, stream: supports_color::Stream) -> bool {
        match self {
            Color::Auto => supports_color::on_cached(stream).is_some(),
            Color::Always => true,
            Color::Never => false,
        }
    }
}

#[derive(Debug, Default)]
struct LogStyles {
    error: Style,
    warning: Style,
    info: Style,
    debug: Style,
    trace: Style,
}

impl LogStyles {
    fn colorize(&mut self) {
        self.error = style().red().bold();
        self.warning = style().yellow().bold();
        self.info = style().bold();
        self.debug = style().bold();
        self.trace = style().dimmed();
    }
}

/// Styles used when printing errors.
#[derive(Debug, Default)]
pub struct StderrStyles {
    pub(crate) bold: Style,
}

impl StderrStyles {
    fn colorize(&mut self) {
        self.bold = style().bold();
    }
}

#[derive(Debug, Default)]
pub(crate) struct StdoutStyles {
    pub(crate) bold: Style,
    pub(crate) stable: Style,
    pub(crate) unsettled: Style,
    pub(crate) flaky: Style,
}

impl StdoutStyles {
    fn colorize(&mut self) {
        self.bold = style().bold();
        self.stable = style().green();
        self.unsettled = style().yellow();
        self.flaky = style().red().bold();
    }

    pub(crate) fn health(&self, level: HealthLevel) -> Style {
        match level {
            HealthLevel::Stable | HealthLevel::MostlyStable => self.stable,
            HealthLevel::Unsettled => self.unsettled,
            HealthLevel::Flaky | HealthLevel::VeryFlaky => self.flaky,
        }
    }
}
