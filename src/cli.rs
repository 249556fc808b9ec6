//! Command-line interface for reloadg.
use std::{path::PathBuf, str::FromStr, time::Duration};

use clap::Parser;
use tracing::level_filters::LevelFilter;

use crate::{
    config::{Config, Settings, Timings, load_settings, parse_duration, parse_interval},
    constants::{DEFAULT_COMMAND, DEFAULT_WATCH_PATH},
    error::ConfigError,
};

/// Wrapper around `LevelFilter` so clap can parse log levels from either
/// string names ("info", "debug", etc.) or numeric shorthands (0-5).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LogLevelArg(LevelFilter);

impl LogLevelArg {
    /// String representation suitable for `RUST_LOG`.
    pub fn as_str(&self) -> &'static str {
        match self.0 {
            LevelFilter::OFF => "off",
            LevelFilter::ERROR => "error",
            LevelFilter::WARN => "warn",
            LevelFilter::INFO => "info",
            LevelFilter::DEBUG => "debug",
            LevelFilter::TRACE => "trace",
        }
    }
}

impl FromStr for LogLevelArg {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            return Err("log level cannot be empty".into());
        }

        if let Ok(number) = trimmed.parse::<u8>() {
            let level = match number {
                0 => LevelFilter::OFF,
                1 => LevelFilter::ERROR,
                2 => LevelFilter::WARN,
                3 => LevelFilter::INFO,
                4 => LevelFilter::DEBUG,
                5 => LevelFilter::TRACE,
                _ => {
                    return Err(format!(
                        "unsupported log level number '{number}' (expected 0-5)"
                    ));
                }
            };

            return Ok(LogLevelArg(level));
        }

        let level = match trimmed.to_ascii_lowercase().as_str() {
            "off" => LevelFilter::OFF,
            "error" | "err" => LevelFilter::ERROR,
            "warn" | "warning" => LevelFilter::WARN,
            "info" => LevelFilter::INFO,
            "debug" => LevelFilter::DEBUG,
            "trace" => LevelFilter::TRACE,
            _ => return Err(format!("invalid log level '{trimmed}'")),
        };

        Ok(LogLevelArg(level))
    }
}

/// Runs one child process and restarts it when its config file changes.
#[derive(Debug, Parser)]
#[command(name = "reloadg", version, author)]
#[command(
    about = "Single-child supervisor that restarts its child when a config file changes",
    long_about = None
)]
pub struct Cli {
    /// Executable to supervise [default: /usr/local/bin/redis-exporter].
    #[arg(long, value_name = "PATH")]
    pub command: Option<String>,

    /// Config file to watch; a path that does not exist disables watching
    /// [default: /usr/local/bin/conf/exporter.conf].
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Optional YAML settings file. Command-line flags take precedence.
    #[arg(long, value_name = "YAML")]
    pub settings: Option<PathBuf>,

    /// Quiet period before a detected change triggers a restart (e.g. `500ms`).
    #[arg(long, value_name = "DUR", value_parser = parse_duration)]
    pub debounce: Option<Duration>,

    /// Interval of the fallback stat poller (e.g. `5s`); must be non-zero.
    #[arg(long, value_name = "DUR", value_parser = parse_interval)]
    pub poll_interval: Option<Duration>,

    /// Grace period between SIGTERM and SIGKILL (e.g. `10s`).
    #[arg(long, value_name = "DUR", value_parser = parse_duration)]
    pub stop_timeout: Option<Duration>,

    /// Override the logging verbosity.
    #[arg(long, value_name = "LEVEL")]
    pub log_level: Option<LogLevelArg>,

    /// Arguments passed to the child verbatim.
    #[arg(trailing_var_arg = true, allow_hyphen_values = true, value_name = "ARGS")]
    pub args: Vec<String>,
}

impl Cli {
    /// Builds the runtime configuration: flags, then the settings file, then
    /// built-in defaults.
    pub fn resolve(&self) -> Result<Config, ConfigError> {
        let settings = match &self.settings {
            Some(path) => load_settings(path)?,
            None => Settings::default(),
        };
        self.merge(settings)
    }

    fn merge(&self, settings: Settings) -> Result<Config, ConfigError> {
        let command = self
            .command
            .clone()
            .or(settings.command)
            .unwrap_or_else(|| DEFAULT_COMMAND.to_string());

        let args = if self.args.is_empty() {
            settings.args.unwrap_or_default()
        } else {
            self.args.clone()
        };

        let watch_path = self
            .config
            .clone()
            .or(settings.watch)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_WATCH_PATH));

        let mut timings = settings.timings.apply(Timings::default())?;
        if let Some(debounce) = self.debounce {
            timings.debounce = debounce;
        }
        if let Some(poll_interval) = self.poll_interval {
            timings.poll_interval = poll_interval;
        }
        if let Some(stop_timeout) = self.stop_timeout {
            timings.stop_timeout = stop_timeout;
        }

        Ok(Config::new(command, args)
            .with_watch_path(watch_path)
            .with_timings(timings))
    }
}

/// Parses command-line arguments.
pub fn parse_args() -> Cli {
    Cli::parse()
}
