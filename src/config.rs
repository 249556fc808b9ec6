//! Configuration management for reloadg.
use regex::Regex;
use serde::Deserialize;
use std::{
    env, fs,
    path::{Path, PathBuf},
    sync::OnceLock,
    time::Duration,
};

use crate::{
    constants::{
        DEBOUNCE_WINDOW, GRACEFUL_STOP_TIMEOUT, POLL_INTERVAL, RESTART_SETTLE_DELAY,
    },
    error::ConfigError,
};

/// Timers used by the detector and the process supervisor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timings {
    /// Quiet period before a confirmed change is reported.
    pub debounce: Duration,
    /// Interval of the fallback stat poller.
    pub poll_interval: Duration,
    /// Grace period between `SIGTERM` and `SIGKILL`.
    pub stop_timeout: Duration,
    /// Pause between stop and start during a restart.
    pub settle_delay: Duration,
}

impl Default for Timings {
    fn default() -> Self {
        Self {
            debounce: DEBOUNCE_WINDOW,
            poll_interval: POLL_INTERVAL,
            stop_timeout: GRACEFUL_STOP_TIMEOUT,
            settle_delay: RESTART_SETTLE_DELAY,
        }
    }
}

/// Everything the orchestrator needs to run.
#[derive(Debug, Clone)]
pub struct Config {
    /// Executable to supervise.
    pub command: String,
    /// Arguments passed to the executable.
    pub args: Vec<String>,
    /// File whose changes trigger a restart. `None` disables change detection.
    pub watch_path: Option<PathBuf>,
    /// Timers.
    pub timings: Timings,
}

impl Config {
    pub fn new(command: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            command: command.into(),
            args,
            watch_path: None,
            timings: Timings::default(),
        }
    }

    pub fn with_watch_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.watch_path = Some(path.into());
        self
    }

    pub fn with_timings(mut self, timings: Timings) -> Self {
        self.timings = timings;
        self
    }
}

/// On-disk settings file. Every field is optional; command-line flags win.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    pub command: Option<String>,
    pub args: Option<Vec<String>>,
    pub watch: Option<PathBuf>,
    pub timings: TimingSettings,
}

/// Timer overrides as written in the settings file, e.g. `"500ms"` or `"10s"`.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TimingSettings {
    pub debounce: Option<String>,
    pub poll_interval: Option<String>,
    pub stop_timeout: Option<String>,
    pub settle_delay: Option<String>,
}

impl TimingSettings {
    /// Applies the overrides present in the file on top of `base`.
    pub fn apply(&self, base: Timings) -> Result<Timings, ConfigError> {
        let pick = |raw: &Option<String>, fallback: Duration| {
            raw.as_deref().map_or(Ok(fallback), parse_duration)
        };

        Ok(Timings {
            debounce: pick(&self.debounce, base.debounce)?,
            poll_interval: self
                .poll_interval
                .as_deref()
                .map_or(Ok(base.poll_interval), parse_interval)?,
            stop_timeout: pick(&self.stop_timeout, base.stop_timeout)?,
            settle_delay: pick(&self.settle_delay, base.settle_delay)?,
        })
    }
}

fn env_var_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"\$\{?([A-Za-z_][A-Za-z0-9_]*)\}?").expect("valid env var pattern")
    })
}

/// Expands `$VAR` and `${VAR}` references from the process environment.
fn expand_env_vars(input: &str) -> Result<String, ConfigError> {
    let pattern = env_var_pattern();
    let mut expanded = String::with_capacity(input.len());
    let mut last = 0;

    for caps in pattern.captures_iter(input) {
        let Some(whole) = caps.get(0) else { continue };
        let name = &caps[1];
        let value =
            env::var(name).map_err(|_| ConfigError::MissingEnvVar(name.to_string()))?;
        expanded.push_str(&input[last..whole.start()]);
        expanded.push_str(&value);
        last = whole.end();
    }

    expanded.push_str(&input[last..]);
    Ok(expanded)
}

/// Loads and parses a settings file, expanding environment variables first.
pub fn load_settings(path: &Path) -> Result<Settings, ConfigError> {
    let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;

    let expanded = expand_env_vars(&content)?;
    if expanded.trim().is_empty() {
        return Ok(Settings::default());
    }

    Ok(serde_yaml::from_str(&expanded)?)
}

/// Parses a duration in the format `<number>[ms|s|m|h]`; a bare number is seconds.
pub fn parse_duration(raw: &str) -> Result<Duration, ConfigError> {
    let value = raw.trim();
    if value.is_empty() {
        return Err(ConfigError::InvalidDuration(raw.to_string()));
    }

    let (amount_str, millis_per_unit) = if let Some(stripped) = value.strip_suffix("ms") {
        (stripped.trim(), 1)
    } else if let Some(stripped) = value.strip_suffix('s') {
        (stripped.trim(), 1_000)
    } else if let Some(stripped) = value.strip_suffix('m') {
        (stripped.trim(), 60_000)
    } else if let Some(stripped) = value.strip_suffix('h') {
        (stripped.trim(), 3_600_000)
    } else {
        (value, 1_000)
    };

    let amount: u64 = amount_str
        .parse()
        .map_err(|_| ConfigError::InvalidDuration(raw.to_string()))?;

    Ok(Duration::from_millis(amount.saturating_mul(millis_per_unit)))
}

/// Like [`parse_duration`], but rejects zero; used for periodic timers.
pub fn parse_interval(raw: &str) -> Result<Duration, ConfigError> {
    let interval = parse_duration(raw)?;
    if interval.is_zero() {
        return Err(ConfigError::ZeroInterval(raw.to_string()));
    }
    Ok(interval)
}
