//! Configuration loading and management
//!
//! Handles parsing of `.studysync.toml` configuration files.

use std::path::Path;

use chrono::Duration;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Name of the configuration file at the workspace root
pub const CONFIG_FILE: &str = ".studysync.toml";

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Viewer identity
    #[serde(default)]
    pub viewer: ViewerConfig,

    /// Notification behavior
    #[serde(default)]
    pub notify: NotifyConfig,

    /// Suppression store maintenance
    #[serde(default)]
    pub suppression: SuppressionConfig,
}

/// Viewer-related configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ViewerConfig {
    /// Default viewer id when `--viewer` is not given
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
}

/// Notification configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotifyConfig {
    /// How far ahead a due date starts producing deadline alerts
    #[serde(default = "default_deadline_window")]
    pub deadline_window: String,

    /// Minimum time between two alerts with the same suppression key
    #[serde(default = "default_suppression_interval")]
    pub suppression_interval: String,

    /// How long a platform notification stays up before auto-dismiss
    #[serde(default = "default_display_interval")]
    pub display_interval: String,

    /// Re-check deadlines on this interval even when the feed is idle
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reevaluate_every: Option<String>,

    /// Platform channel: "events" or "off"
    #[serde(default = "default_platform")]
    pub platform: String,

    /// Buffered toasts per in-app subscriber
    #[serde(default = "default_toast_capacity")]
    pub toast_capacity: usize,
}

fn default_deadline_window() -> String {
    "24h".to_string()
}

fn default_suppression_interval() -> String {
    "1h".to_string()
}

fn default_display_interval() -> String {
    "5s".to_string()
}

fn default_platform() -> String {
    "events".to_string()
}

fn default_toast_capacity() -> usize {
    64
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            deadline_window: default_deadline_window(),
            suppression_interval: default_suppression_interval(),
            display_interval: default_display_interval(),
            reevaluate_every: None,
            platform: default_platform(),
            toast_capacity: default_toast_capacity(),
        }
    }
}

/// Suppression store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuppressionConfig {
    /// Entries older than this are dropped by compaction
    #[serde(default = "default_max_age")]
    pub max_age: String,

    /// Compact once when a subscription is attached
    #[serde(default = "default_true")]
    pub compact_on_start: bool,
}

fn default_max_age() -> String {
    "48h".to_string()
}

fn default_true() -> bool {
    true
}

impl Default for SuppressionConfig {
    fn default() -> Self {
        Self {
            max_age: default_max_age(),
            compact_on_start: true,
        }
    }
}

/// Typed engine settings derived from a validated [`Config`].
#[derive(Debug, Clone, Copy)]
pub struct EngineSettings {
    pub deadline_window: Duration,
    pub suppression_interval: Duration,
    pub display_interval: Duration,
    pub reevaluate_every: Option<Duration>,
    pub suppression_max_age: Duration,
    pub compact_on_start: bool,
    pub toast_capacity: usize,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            deadline_window: Duration::hours(24),
            suppression_interval: Duration::hours(1),
            display_interval: Duration::seconds(5),
            reevaluate_every: None,
            suppression_max_age: Duration::hours(48),
            compact_on_start: true,
            toast_capacity: default_toast_capacity(),
        }
    }
}

impl Config {
    /// Load configuration from a `.studysync.toml` file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from the workspace root, or return defaults
    pub fn load_from_root(root: &Path) -> Self {
        let config_path = root.join(CONFIG_FILE);
        if !config_path.exists() {
            return Self::default();
        }
        match Self::load(&config_path) {
            Ok(config) => config,
            Err(err) => {
                tracing::warn!(path = %config_path.display(), error = %err, "ignoring invalid config");
                Self::default()
            }
        }
    }

    /// Save configuration to a file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Whether the platform channel is enabled
    pub fn platform_enabled(&self) -> bool {
        self.notify.platform.trim() == "events"
    }

    /// Parse duration strings into typed settings.
    pub fn settings(&self) -> Result<EngineSettings> {
        let reevaluate_every = self
            .notify
            .reevaluate_every
            .as_deref()
            .map(parse_duration)
            .transpose()?;
        Ok(EngineSettings {
            deadline_window: parse_duration(&self.notify.deadline_window)?,
            suppression_interval: parse_duration(&self.notify.suppression_interval)?,
            display_interval: parse_duration(&self.notify.display_interval)?,
            reevaluate_every,
            suppression_max_age: parse_duration(&self.suppression.max_age)?,
            compact_on_start: self.suppression.compact_on_start,
            toast_capacity: self.notify.toast_capacity,
        })
    }

    fn validate(&self) -> Result<()> {
        if let Some(id) = &self.viewer.id {
            if id.trim().is_empty() {
                return Err(Error::InvalidConfig("viewer.id cannot be empty".to_string()));
            }
        }

        match self.notify.platform.trim() {
            "events" | "off" => {}
            other => {
                return Err(Error::InvalidConfig(format!(
                    "notify.platform: invalid value '{other}' (expected events|off)"
                )))
            }
        }

        if self.notify.toast_capacity == 0 {
            return Err(Error::InvalidConfig(
                "notify.toast_capacity must be > 0".to_string(),
            ));
        }

        let settings = self
            .settings()
            .map_err(|err| Error::InvalidConfig(err.to_string()))?;

        if settings.deadline_window <= Duration::zero() {
            return Err(Error::InvalidConfig(
                "notify.deadline_window must be > 0".to_string(),
            ));
        }
        if settings.suppression_interval < Duration::zero() {
            return Err(Error::InvalidConfig(
                "notify.suppression_interval cannot be negative".to_string(),
            ));
        }
        if let Some(every) = settings.reevaluate_every {
            if every <= Duration::zero() {
                return Err(Error::InvalidConfig(
                    "notify.reevaluate_every must be > 0".to_string(),
                ));
            }
        }
        if settings.suppression_max_age < settings.deadline_window {
            return Err(Error::InvalidConfig(format!(
                "suppression.max_age '{}' must cover notify.deadline_window '{}'",
                self.suppression.max_age, self.notify.deadline_window
            )));
        }

        Ok(())
    }
}

/// Parse a duration like `30m`, `1h`, `5s`, `2d`, `1w`. Bare numbers are minutes.
pub fn parse_duration(s: &str) -> Result<Duration> {
    let s = s.trim();

    if s.is_empty() {
        return Err(Error::InvalidArgument("Duration cannot be empty".to_string()));
    }

    let (num_str, unit) = match s.find(|c: char| !c.is_ascii_digit()) {
        Some(pos) => (&s[..pos], s[pos..].trim()),
        None => (s, "m"),
    };

    let num: i64 = num_str
        .parse()
        .map_err(|_| Error::InvalidArgument(format!("Invalid duration number: {num_str}")))?;

    let duration = match unit.to_lowercase().as_str() {
        "s" | "sec" | "second" | "seconds" => Duration::try_seconds(num),
        "m" | "min" | "minute" | "minutes" => Duration::try_minutes(num),
        "h" | "hr" | "hour" | "hours" => Duration::try_hours(num),
        "d" | "day" | "days" => Duration::try_days(num),
        "w" | "week" | "weeks" => Duration::try_weeks(num),
        _ => {
            return Err(Error::InvalidArgument(format!(
                "Invalid duration unit '{unit}'. Expected: s, m, h, d, w"
            )));
        }
    };

    match duration {
        Some(duration) if duration <= max_duration() => Ok(duration),
        _ => Err(Error::InvalidArgument(format!(
            "Duration '{s}' is too long (max {MAX_DURATION_DAYS}d)"
        ))),
    }
}

/// Longest duration accepted anywhere a duration string is parsed.
pub const MAX_DURATION_DAYS: i64 = 3650;

fn max_duration() -> Duration {
    Duration::days(MAX_DURATION_DAYS)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn defaults_are_expected() {
        let cfg = Config::default();
        assert!(cfg.viewer.id.is_none());
        assert_eq!(cfg.notify.deadline_window, "24h");
        assert_eq!(cfg.notify.suppression_interval, "1h");
        assert_eq!(cfg.notify.display_interval, "5s");
        assert!(cfg.notify.reevaluate_every.is_none());
        assert_eq!(cfg.notify.platform, "events");
        assert_eq!(cfg.suppression.max_age, "48h");
        assert!(cfg.suppression.compact_on_start);

        let settings = cfg.settings().expect("settings");
        assert_eq!(settings.deadline_window, Duration::hours(24));
        assert_eq!(settings.suppression_interval, Duration::hours(1));
        assert_eq!(settings.display_interval, Duration::seconds(5));
        assert!(settings.reevaluate_every.is_none());
    }

    #[test]
    fn load_parses_overrides() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join(CONFIG_FILE);
        let content = r#"
[viewer]
id = "u1"

[notify]
deadline_window = "12h"
suppression_interval = "30m"
display_interval = "10s"
reevaluate_every = "5m"
platform = "off"
toast_capacity = 8

[suppression]
max_age = "3d"
compact_on_start = false
"#;
        fs::write(&path, content.trim()).expect("write config");

        let cfg = Config::load(&path).expect("load config");
        assert_eq!(cfg.viewer.id.as_deref(), Some("u1"));
        assert!(!cfg.platform_enabled());

        let settings = cfg.settings().expect("settings");
        assert_eq!(settings.deadline_window, Duration::hours(12));
        assert_eq!(settings.suppression_interval, Duration::minutes(30));
        assert_eq!(settings.display_interval, Duration::seconds(10));
        assert_eq!(settings.reevaluate_every, Some(Duration::minutes(5)));
        assert_eq!(settings.suppression_max_age, Duration::days(3));
        assert!(!settings.compact_on_start);
        assert_eq!(settings.toast_capacity, 8);
    }

    #[test]
    fn invalid_platform_rejected() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join(CONFIG_FILE);
        fs::write(&path, "[notify]\nplatform = \"sms\"").expect("write config");

        let err = Config::load(&path).expect_err("invalid config");
        assert!(matches!(err, Error::InvalidConfig(_)));
    }

    #[test]
    fn max_age_must_cover_deadline_window() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join(CONFIG_FILE);
        fs::write(&path, "[suppression]\nmax_age = \"2h\"").expect("write config");

        let err = Config::load(&path).expect_err("invalid config");
        assert!(matches!(err, Error::InvalidConfig(_)));
    }

    #[test]
    fn bad_duration_rejected() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join(CONFIG_FILE);
        fs::write(&path, "[notify]\nsuppression_interval = \"soon\"").expect("write config");

        let err = Config::load(&path).expect_err("invalid config");
        assert!(matches!(err, Error::InvalidConfig(_)));
    }

    #[test]
    fn load_from_root_defaults_when_missing_or_invalid() {
        let dir = tempfile::tempdir().expect("tempdir");
        let cfg = Config::load_from_root(dir.path());
        assert_eq!(cfg.notify.deadline_window, "24h");

        fs::write(dir.path().join(CONFIG_FILE), "[notify\n").expect("write config");
        let cfg = Config::load_from_root(dir.path());
        assert_eq!(cfg.notify.deadline_window, "24h");
    }

    #[test]
    fn save_round_trips_viewer() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("out.toml");
        let mut cfg = Config::default();
        cfg.viewer.id = Some("u9".to_string());
        cfg.save(&path).expect("save config");

        let written = fs::read_to_string(&path).expect("read config");
        assert!(written.contains("id = \"u9\""));
        assert!(written.contains("deadline_window = \"24h\""));
    }

    #[test]
    fn parse_duration_units() {
        assert_eq!(parse_duration("90").unwrap(), Duration::minutes(90));
        assert_eq!(parse_duration("2h").unwrap(), Duration::hours(2));
        assert_eq!(parse_duration("1 day").unwrap(), Duration::days(1));
        assert!(parse_duration("").is_err());
        assert!(parse_duration("3y").is_err());
    }

    #[test]
    fn parse_duration_rejects_overflowing_values() {
        assert!(matches!(
            parse_duration("99999999999999w"),
            Err(Error::InvalidArgument(_))
        ));
        assert!(matches!(
            parse_duration("100000000d"),
            Err(Error::InvalidArgument(_))
        ));
        assert_eq!(parse_duration("3650d").unwrap(), Duration::days(3650));
        assert!(parse_duration("3651d").is_err());
    }

    #[test]
    fn huge_max_age_is_invalid_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE);
        fs::write(&path, "[suppression]\nmax_age = \"100000000d\"\n").unwrap();
        assert!(matches!(Config::load(&path), Err(Error::InvalidConfig(_))));
    }
}
