//! ABOUTME: Central configuration for the netdbg debugger
//! ABOUTME: Session flags, launch parameters, log destination, TOML files

#![warn(missing_docs)]
#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::env;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

/// Configuration file discovery order, relative to the working
/// directory.
const CONFIG_SEARCH_PATHS: &[&str] = &["netdbg.toml", ".netdbg.toml", ".config/netdbg.toml"];

/// Environment variable selecting the log destination.
pub const LOG_OUTPUT_ENV: &str = "LOG_OUTPUT";

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The config file could not be read.
    #[error("cannot read config file {path}: {source}")]
    Io {
        /// Path that failed.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },
    /// The config file is not valid TOML.
    #[error("cannot parse config file {path}: {source}")]
    Parse {
        /// Path that failed.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: toml::de::Error,
    },
}

/// Session-wide behavior flags.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct SessionConfig {
    /// Treat only user-authored code as steppable/breakable.
    pub just_my_code: bool,
    /// Skip properties and operators while stepping.
    pub step_filtering: bool,
    /// Stop at the program entry method after launch.
    pub stop_at_entry: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            just_my_code: true,
            step_filtering: false,
            stop_at_entry: false,
        }
    }
}

/// Parameters of one launch request.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct LaunchConfig {
    /// Program to run.
    pub program: String,
    /// Arguments passed to the debuggee.
    pub args: Vec<String>,
    /// Environment for the debuggee.
    pub env: BTreeMap<String, String>,
    /// Working directory for the debuggee.
    pub cwd: Option<String>,
    /// Stop at the entry method.
    pub stop_at_entry: bool,
}

/// Where log records go.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum LogDestination {
    /// Standard error (the default; keeps stdout clean for protocol
    /// traffic).
    #[default]
    Stderr,
    /// Standard output.
    Stdout,
    /// A file, appended to.
    File(PathBuf),
}

/// Log configuration resolved from flags and environment.
#[derive(Debug, Clone, Default)]
pub struct LogConfig {
    /// Destination of debugger log records.
    pub destination: LogDestination,
    /// Separate destination for protocol-level logging, when enabled.
    pub engine_log: Option<PathBuf>,
}

impl LogConfig {
    /// Resolve the destination from the `LOG_OUTPUT` environment
    /// variable. Unset or empty means stderr.
    #[must_use]
    pub fn from_env() -> Self {
        let destination = match env::var(LOG_OUTPUT_ENV) {
            Ok(value) => Self::parse_destination(&value),
            Err(_) => LogDestination::Stderr,
        };
        Self {
            destination,
            engine_log: None,
        }
    }

    /// Apply a `--log[=path]` style override on top of the environment.
    #[must_use]
    pub fn with_flag(mut self, flag: Option<&str>) -> Self {
        if let Some(value) = flag {
            self.destination = Self::parse_destination(value);
        }
        self
    }

    fn parse_destination(value: &str) -> LogDestination {
        match value.trim() {
            "" | "stderr" => LogDestination::Stderr,
            "stdout" => LogDestination::Stdout,
            path => LogDestination::File(PathBuf::from(path)),
        }
    }
}

/// The full on-disk configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct NetdbgConfig {
    /// Session flags.
    pub session: SessionConfig,
    /// Default launch parameters; CLI arguments win over these.
    pub launch: LaunchConfig,
}

impl NetdbgConfig {
    /// Load configuration from `path`, or discover one of the standard
    /// locations when `path` is `None`. A missing file yields defaults.
    ///
    /// # Errors
    ///
    /// [`ConfigError`] when an explicitly named file cannot be read or
    /// parsed. Discovery failures fall back to defaults silently.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        if let Some(path) = path {
            return Self::load_file(path);
        }

        for candidate in CONFIG_SEARCH_PATHS {
            let candidate = Path::new(candidate);
            if candidate.is_file() {
                debug!(path = %candidate.display(), "discovered config file");
                return Self::load_file(candidate);
            }
        }

        Ok(Self::default())
    }

    fn load_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::io::Write;

    #[test]
    fn defaults() {
        let config = SessionConfig::default();
        assert!(config.just_my_code);
        assert!(!config.step_filtering);
        assert!(!config.stop_at_entry);
    }

    #[test]
    fn log_destination_parsing() {
        assert_eq!(
            LogConfig::parse_destination("stdout"),
            LogDestination::Stdout
        );
        assert_eq!(LogConfig::parse_destination(""), LogDestination::Stderr);
        assert_eq!(
            LogConfig::parse_destination("/tmp/netdbg.log"),
            LogDestination::File(PathBuf::from("/tmp/netdbg.log"))
        );
    }

    #[test]
    fn flag_overrides_env() {
        let config = LogConfig {
            destination: LogDestination::Stdout,
            engine_log: None,
        }
        .with_flag(Some("/var/log/dbg.log"));
        assert_eq!(
            config.destination,
            LogDestination::File(PathBuf::from("/var/log/dbg.log"))
        );
    }

    #[test]
    fn load_explicit_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "[session]\njust-my-code = false\nstop-at-entry = true\n\n[launch]\nprogram = \"app.dll\""
        )
        .unwrap();

        let config = NetdbgConfig::load(Some(file.path())).unwrap();
        assert!(!config.session.just_my_code);
        assert!(config.session.stop_at_entry);
        assert_eq!(config.launch.program, "app.dll");
    }

    #[test]
    fn missing_discovery_yields_defaults() {
        let config = NetdbgConfig::load(None).unwrap();
        assert!(config.session.just_my_code);
    }

    #[test]
    fn bad_toml_is_an_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "not toml [").unwrap();
        let err = NetdbgConfig::load(Some(file.path())).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }
}
