// Copyright (c) The flakewatch Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Configuration for flakewatch.
//!
//! The embedded [default config](FlakewatchConfig::DEFAULT_CONFIG) is read
//! first, and the repository's `.config/flakewatch.toml` (or an explicitly
//! provided file) is layered on top of it.

use crate::{
    errors::{ConfigParseError, ConfigParseErrorKind},
    history::MaxHistoryLength,
};
use camino::{Utf8Path, Utf8PathBuf};
use config::{Config, ConfigBuilder, ConfigError, File, FileFormat, builder::DefaultState};
use serde::Deserialize;
use std::collections::BTreeSet;
use tracing::warn;

/// Handles warnings produced while reading configuration.
pub trait ConfigWarnings {
    /// Called with the set of unknown keys found in a config file.
    fn unknown_config_keys(
        &mut self,
        config_file: &Utf8Path,
        workspace_root: &Utf8Path,
        unknown: &BTreeSet<String>,
    );
}

/// Logs configuration warnings through `tracing`.
#[derive(Clone, Copy, Debug, Default)]
pub struct DefaultConfigWarnings;

impl ConfigWarnings for DefaultConfigWarnings {
    fn unknown_config_keys(
        &mut self,
        config_file: &Utf8Path,
        workspace_root: &Utf8Path,
        unknown: &BTreeSet<String>,
    ) {
        let mut unknown_str = String::new();
        if unknown.len() == 1 {
            unknown_str.push_str("key: ");
            unknown_str.extend(unknown.iter().map(String::as_str));
        } else {
            unknown_str.push_str("keys:\n");
            for ignored_key in unknown {
                unknown_str.push_str("\n  - ");
                unknown_str.push_str(ignored_key);
            }
        }

        warn!(
            "in config file {}, ignoring unknown configuration {unknown_str}",
            config_file
                .strip_prefix(workspace_root)
                .unwrap_or(config_file),
        );
    }
}

/// Overall configuration for flakewatch.
#[derive(Clone, Debug)]
pub struct FlakewatchConfig {
    workspace_root: Utf8PathBuf,
    max_history_length: MaxHistoryLength,
    store_dir: Utf8PathBuf,
}

impl FlakewatchConfig {
    /// The default location of the config within the workspace root.
    pub const CONFIG_PATH: &'static str = ".config/flakewatch.toml";

    /// Contains the default config as a TOML file.
    ///
    /// Repository-specific configuration is layered on top of the default config.
    pub const DEFAULT_CONFIG: &'static str = include_str!("../default-config.toml");

    /// Reads the config from the given file, or if not specified from
    /// `.config/flakewatch.toml` in the workspace root.
    ///
    /// If no config file is specified and the workspace doesn't have
    /// `.config/flakewatch.toml`, the default config is used. Unknown keys are
    /// logged as warnings.
    pub fn from_sources(
        workspace_root: impl Into<Utf8PathBuf>,
        config_file: Option<&Utf8Path>,
    ) -> Result<Self, ConfigParseError> {
        Self::from_sources_with_warnings(workspace_root, config_file, &mut DefaultConfigWarnings)
    }

    /// Reads the config with custom warning handling.
    pub fn from_sources_with_warnings(
        workspace_root: impl Into<Utf8PathBuf>,
        config_file: Option<&Utf8Path>,
        warnings: &mut impl ConfigWarnings,
    ) -> Result<Self, ConfigParseError> {
        let workspace_root = workspace_root.into();

        let (config_file, source) = match config_file {
            Some(file) => (file.to_owned(), File::new(file.as_str(), FileFormat::Toml)),
            None => {
                let config_file = workspace_root.join(Self::CONFIG_PATH);
                let source = File::new(config_file.as_str(), FileFormat::Toml).required(false);
                (config_file, source)
            }
        };

        let builder = Self::make_default_config().add_source(source);
        let (config, unknown) = Self::build_and_deserialize_config(&builder)
            .map_err(|kind| ConfigParseError::new(&config_file, kind))?;

        if !unknown.is_empty() {
            warnings.unknown_config_keys(&config_file, &workspace_root, &unknown);
        }

        Ok(Self::from_deserialized(workspace_root, config))
    }

    /// Returns the default config.
    #[cfg(test)]
    pub(crate) fn default_config(workspace_root: impl Into<Utf8PathBuf>) -> Self {
        let (config, unknown) = Self::build_and_deserialize_config(&Self::make_default_config())
            .expect("default config is always valid");

        // The default config is shipped with the binary, so it must not have
        // any unknown keys.
        assert!(
            unknown.is_empty(),
            "found unknown keys in default config: {unknown:?}"
        );

        Self::from_deserialized(workspace_root.into(), config)
    }

    /// Returns the workspace root.
    pub fn workspace_root(&self) -> &Utf8Path {
        &self.workspace_root
    }

    /// Returns the maximum number of outcomes retained per test.
    pub fn max_history_length(&self) -> MaxHistoryLength {
        self.max_history_length
    }

    /// Overrides the configured maximum history length, e.g. from the
    /// command line.
    pub fn with_max_history_length(mut self, max_history_length: MaxHistoryLength) -> Self {
        self.max_history_length = max_history_length;
        self
    }

    /// Returns the absolute path to the directory builds are recorded in.
    pub fn store_dir(&self) -> &Utf8Path {
        &self.store_dir
    }

    // ---
    // Helper methods
    // ---

    fn from_deserialized(workspace_root: Utf8PathBuf, config: FlakewatchConfigDeserialize) -> Self {
        let store_dir = workspace_root.join(&config.store.dir);
        Self {
            workspace_root,
            max_history_length: config.history.max_history_length,
            store_dir,
        }
    }

    fn make_default_config() -> ConfigBuilder<DefaultState> {
        Config::builder().add_source(File::from_str(Self::DEFAULT_CONFIG, FileFormat::Toml))
    }

    /// This returns a tuple of (config, ignored paths).
    fn build_and_deserialize_config(
        builder: &ConfigBuilder<DefaultState>,
    ) -> Result<(FlakewatchConfigDeserialize, BTreeSet<String>), ConfigParseErrorKind> {
        let config = builder
            .build_cloned()
            .map_err(|error| ConfigParseErrorKind::BuildError(Box::new(error)))?;

        let mut ignored = BTreeSet::new();
        let mut cb = |path: serde_ignored::Path| {
            ignored.insert(path.to_string());
        };
        let ignored_de = serde_ignored::Deserializer::new(config, &mut cb);
        let config: FlakewatchConfigDeserialize = serde_path_to_error::deserialize(ignored_de)
            .map_err(|error| {
                // serde_path_to_error already tracks the key, so drop it from
                // the config error.
                let path = error.path().clone();
                let error = match error.into_inner() {
                    ConfigError::At { error, .. } => *error,
                    other => other,
                };
                ConfigParseErrorKind::DeserializeError(Box::new(serde_path_to_error::Error::new(
                    path, error,
                )))
            })?;

        Ok((config, ignored))
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct FlakewatchConfigDeserialize {
    history: HistoryConfig,
    store: StoreConfig,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct HistoryConfig {
    max_history_length: MaxHistoryLength,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct StoreConfig {
    dir: Utf8PathBuf,
}

#[cfg(test)]
mod tests {
    use super::*;
    use camino_tempfile::Utf8TempDir;
    use indoc::indoc;
    use pretty_assertions::assert_eq;
    use test_case::test_case;

    #[derive(Default)]
    struct TestConfigWarnings {
        unknown: Vec<(Utf8PathBuf, BTreeSet<String>)>,
    }

    impl ConfigWarnings for TestConfigWarnings {
        fn unknown_config_keys(
            &mut self,
            config_file: &Utf8Path,
            _workspace_root: &Utf8Path,
            unknown: &BTreeSet<String>,
        ) {
            self.unknown.push((config_file.to_owned(), unknown.clone()));
        }
    }

    fn write_config(dir: &Utf8TempDir, contents: &str) -> Utf8PathBuf {
        let path = dir.path().join(FlakewatchConfig::CONFIG_PATH);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn default_config_values() {
        let config = FlakewatchConfig::default_config("/fake/root");
        assert_eq!(config.max_history_length().get(), MaxHistoryLength::DEFAULT_VALUE);
        assert_eq!(config.store_dir(), "/fake/root/target/flakewatch");
    }

    #[test]
    fn missing_workspace_config_uses_defaults() {
        let dir = Utf8TempDir::new().unwrap();
        let mut warnings = TestConfigWarnings::default();
        let config =
            FlakewatchConfig::from_sources_with_warnings(dir.path(), None, &mut warnings).unwrap();

        assert_eq!(config.max_history_length().get(), 30);
        assert_eq!(config.store_dir(), dir.path().join("target/flakewatch"));
        assert!(warnings.unknown.is_empty());
    }

    #[test]
    fn workspace_config_is_layered_over_defaults() {
        let dir = Utf8TempDir::new().unwrap();
        write_config(
            &dir,
            indoc! {r#"
                [history]
                max-history-length = 5
            "#},
        );

        let config = FlakewatchConfig::from_sources(dir.path(), None).unwrap();
        assert_eq!(config.max_history_length().get(), 5);
        // Not overridden, so taken from the default config.
        assert_eq!(config.store_dir(), dir.path().join("target/flakewatch"));
    }

    #[test]
    fn explicit_config_file() {
        let dir = Utf8TempDir::new().unwrap();
        let path = dir.path().join("custom.toml");
        std::fs::write(
            &path,
            indoc! {r#"
                [store]
                dir = "ci/history"
            "#},
        )
        .unwrap();

        let config = FlakewatchConfig::from_sources(dir.path(), Some(&path)).unwrap();
        assert_eq!(config.store_dir(), dir.path().join("ci/history"));
    }

    #[test]
    fn explicit_config_file_must_exist() {
        let dir = Utf8TempDir::new().unwrap();
        let path = dir.path().join("missing.toml");

        let error = FlakewatchConfig::from_sources(dir.path(), Some(&path)).unwrap_err();
        assert_eq!(error.config_file(), &path);
        assert!(
            matches!(error.kind(), ConfigParseErrorKind::BuildError(_)),
            "unexpected error kind: {:?}",
            error.kind()
        );
    }

    #[test_case("0" ; "zero")]
    #[test_case("-3" ; "negative")]
    #[test_case("\"thirty\"" ; "string")]
    fn invalid_max_history_length_is_rejected(value: &str) {
        let dir = Utf8TempDir::new().unwrap();
        write_config(&dir, &format!("[history]\nmax-history-length = {value}\n"));

        let error = FlakewatchConfig::from_sources(dir.path(), None).unwrap_err();
        match error.kind() {
            ConfigParseErrorKind::DeserializeError(error) => {
                assert_eq!(error.path().to_string(), "history.max-history-length");
            }
            other => panic!("unexpected error kind: {other:?}"),
        }
    }

    #[test]
    fn unknown_keys_are_reported() {
        let dir = Utf8TempDir::new().unwrap();
        let path = write_config(
            &dir,
            indoc! {r#"
                [history]
                max-history-length = 10
                max-age = 3

                [reporting]
                enabled = true
            "#},
        );

        let mut warnings = TestConfigWarnings::default();
        let config =
            FlakewatchConfig::from_sources_with_warnings(dir.path(), None, &mut warnings).unwrap();
        assert_eq!(config.max_history_length().get(), 10);

        let expected: BTreeSet<String> = ["history.max-age", "reporting"]
            .into_iter()
            .map(String::from)
            .collect();
        assert_eq!(warnings.unknown, vec![(path, expected)]);
    }

    #[test]
    fn command_line_override() {
        let config = FlakewatchConfig::default_config("/fake/root")
            .with_max_history_length(MaxHistoryLength::new(7).unwrap());
        assert_eq!(config.max_history_length().get(), 7);
    }
}
