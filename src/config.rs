//! Configuration management using the prefer crate for discovery.
//!
//! A config file (TOML, YAML or JSON) is located via `--config` or
//! `prefer`, environment variables are applied on top, and the result is
//! validated into [`Settings`].

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use chrono::NaiveTime;
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::llm::LlmConfig;

/// Name used for config discovery and the data directory.
pub const APP_NAME: &str = "errtriage";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file {path}: {message}")]
    Parse { path: PathBuf, message: String },
    #[error("invalid daily_analysis_time '{0}', expected HH:mm:ss")]
    InvalidTime(String),
    #[error("unknown time zone '{0}'")]
    InvalidTimeZone(String),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Scheduler options as written in the config file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Time of day for the daily run (HH:mm:ss).
    #[serde(default = "default_daily_analysis_time")]
    pub daily_analysis_time: String,
    /// IANA time zone the daily run time is evaluated in.
    #[serde(default = "default_time_zone")]
    pub time_zone: String,
    #[serde(default = "default_retry_interval_minutes")]
    pub retry_interval_minutes: u64,
    /// Analysis attempts a log may consume before it is abandoned.
    /// Also the number of recent days the retry pass looks at.
    #[serde(default = "default_max_retry_attempts")]
    pub max_retry_attempts: u32,
    #[serde(default = "default_max_concurrent_analysis")]
    pub max_concurrent_analysis: usize,
}

fn default_daily_analysis_time() -> String {
    "01:00:00".to_string()
}

fn default_time_zone() -> String {
    "UTC".to_string()
}

fn default_retry_interval_minutes() -> u64 {
    30
}

fn default_max_retry_attempts() -> u32 {
    3
}

fn default_max_concurrent_analysis() -> usize {
    5
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            daily_analysis_time: default_daily_analysis_time(),
            time_zone: default_time_zone(),
            retry_interval_minutes: default_retry_interval_minutes(),
            max_retry_attempts: default_max_retry_attempts(),
            max_concurrent_analysis: default_max_concurrent_analysis(),
        }
    }
}

impl SchedulerConfig {
    /// Apply `ERRTRIAGE_*` overrides.
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(val) = std::env::var("ERRTRIAGE_DAILY_ANALYSIS_TIME") {
            self.daily_analysis_time = val;
        }
        if let Ok(val) = std::env::var("ERRTRIAGE_TIME_ZONE") {
            self.time_zone = val;
        }
        if let Some(n) = env_parse("ERRTRIAGE_RETRY_INTERVAL_MINUTES") {
            self.retry_interval_minutes = n;
        }
        if let Some(n) = env_parse("ERRTRIAGE_MAX_RETRY_ATTEMPTS") {
            self.max_retry_attempts = n;
        }
        if let Some(n) = env_parse("ERRTRIAGE_MAX_CONCURRENT_ANALYSIS") {
            self.max_concurrent_analysis = n;
        }
        self
    }

    /// Validate into the runtime schedule.
    pub fn resolve(&self) -> Result<Schedule, ConfigError> {
        let daily_time = parse_time_of_day(&self.daily_analysis_time)?;
        let time_zone = Tz::from_str(self.time_zone.trim())
            .map_err(|_| ConfigError::InvalidTimeZone(self.time_zone.clone()))?;

        if self.retry_interval_minutes == 0 {
            return Err(ConfigError::Invalid(
                "retry_interval_minutes must be > 0".to_string(),
            ));
        }
        if self.max_retry_attempts == 0 {
            return Err(ConfigError::Invalid(
                "max_retry_attempts must be > 0".to_string(),
            ));
        }

        let retry_secs = self.retry_interval_minutes.checked_mul(60).ok_or_else(|| {
            ConfigError::Invalid(format!(
                "retry_interval_minutes is too large: {}",
                self.retry_interval_minutes
            ))
        })?;

        Ok(Schedule {
            daily_time,
            time_zone,
            retry_interval: Duration::from_secs(retry_secs),
            max_retry_attempts: self.max_retry_attempts,
            max_concurrent_analysis: self.max_concurrent_analysis.max(1),
            ..Schedule::default()
        })
    }
}

/// Validated scheduler settings.
#[derive(Debug, Clone)]
pub struct Schedule {
    pub daily_time: NaiveTime,
    pub time_zone: Tz,
    pub retry_interval: Duration,
    pub max_retry_attempts: u32,
    pub max_concurrent_analysis: usize,
    /// Wait before re-running a scheduled day another run was holding.
    pub busy_retry_delay: Duration,
    pub busy_retry_limit: u32,
}

impl Default for Schedule {
    fn default() -> Self {
        Self {
            daily_time: NaiveTime::from_hms_opt(1, 0, 0).unwrap_or_default(),
            time_zone: Tz::UTC,
            retry_interval: Duration::from_secs(default_retry_interval_minutes() * 60),
            max_retry_attempts: default_max_retry_attempts(),
            max_concurrent_analysis: default_max_concurrent_analysis(),
            busy_retry_delay: Duration::from_secs(60),
            busy_retry_limit: 30,
        }
    }
}

/// Accepts `HH:mm:ss` and `HH:mm`.
pub fn parse_time_of_day(s: &str) -> Result<NaiveTime, ConfigError> {
    let s = s.trim();
    NaiveTime::parse_from_str(s, "%H:%M:%S")
        .or_else(|_| NaiveTime::parse_from_str(s, "%H:%M"))
        .map_err(|_| ConfigError::InvalidTime(s.to_string()))
}

fn env_parse<T: FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.trim().parse().ok())
}

/// Default limit on records accepted in one ingestion call.
pub const DEFAULT_MAX_LOGS_PER_REQUEST: usize = 1000;

/// Default number of days `find_by_id` scans.
pub const DEFAULT_FIND_WINDOW_DAYS: u32 = 90;

/// Resolved application settings.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Directory holding partition files, the run log and the retry ledger.
    pub logs_path: PathBuf,
    pub max_logs_per_request: usize,
    pub find_window_days: u32,
    pub schedule: Schedule,
    pub llm: LlmConfig,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            logs_path: default_logs_path(),
            max_logs_per_request: DEFAULT_MAX_LOGS_PER_REQUEST,
            find_window_days: DEFAULT_FIND_WINDOW_DAYS,
            schedule: Schedule::default(),
            llm: LlmConfig::default(),
        }
    }
}

impl Settings {
    /// Settings rooted at a custom logs directory.
    pub fn with_logs_path(logs_path: impl Into<PathBuf>) -> Self {
        Self {
            logs_path: logs_path.into(),
            ..Default::default()
        }
    }

    pub fn ensure_directories(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.logs_path).map_err(|e| {
            std::io::Error::new(
                e.kind(),
                format!(
                    "Failed to create logs directory '{}': {}",
                    self.logs_path.display(),
                    e
                ),
            )
        })
    }
}

/// Falls back gracefully: local data dir -> home dir -> current dir.
fn default_logs_path() -> PathBuf {
    dirs::data_local_dir()
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_NAME)
        .join("logs")
}

/// Configuration file structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Partition root. Relative paths resolve against the config file.
    #[serde(default, skip_serializing_if = "Option::is_none", alias = "LogsPath")]
    pub logs_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_logs_per_request: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub find_window_days: Option<u32>,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    /// Analysis service client.
    #[serde(default, alias = "llm")]
    pub analysis: LlmConfig,
    /// Path of the file this was loaded from.
    #[serde(skip)]
    pub source_path: Option<PathBuf>,
}

impl Config {
    /// Discover a config file with prefer, falling back to defaults.
    pub async fn load() -> Result<Self, ConfigError> {
        match prefer::load(APP_NAME).await {
            Ok(found) => match found.source_path() {
                Some(path) => Self::load_from_path(path).await,
                None => Ok(Self::default_with_env()),
            },
            Err(_) => Ok(Self::default_with_env()),
        }
    }

    /// Defaults with environment overrides applied.
    pub fn default_with_env() -> Self {
        Self::default().with_env_overrides()
    }

    /// Load configuration from a specific file, choosing the format by extension.
    pub async fn load_from_path(path: &Path) -> Result<Self, ConfigError> {
        let contents = tokio::fs::read_to_string(path)
            .await
            .map_err(|source| ConfigError::Read {
                path: path.to_path_buf(),
                source,
            })?;

        let mut config = Self::parse(&contents, path)?;
        config.source_path = Some(path.to_path_buf());
        Ok(config.with_env_overrides())
    }

    fn parse(contents: &str, path: &Path) -> Result<Self, ConfigError> {
        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("json");
        let parse_err = |message: String| ConfigError::Parse {
            path: path.to_path_buf(),
            message,
        };

        match ext {
            "toml" => toml::from_str(contents).map_err(|e| parse_err(e.to_string())),
            "yaml" | "yml" => serde_yaml::from_str(contents).map_err(|e| parse_err(e.to_string())),
            _ => serde_json::from_str(contents).map_err(|e| parse_err(e.to_string())),
        }
    }

    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(val) = std::env::var("ERRTRIAGE_LOGS_PATH") {
            if !val.is_empty() {
                self.logs_path = Some(val);
            }
        }
        if let Some(n) = env_parse("ERRTRIAGE_MAX_LOGS_PER_REQUEST") {
            self.max_logs_per_request = Some(n);
        }
        if let Some(n) = env_parse("ERRTRIAGE_FIND_WINDOW_DAYS") {
            self.find_window_days = Some(n);
        }
        self.scheduler = self.scheduler.with_env_overrides();
        self.analysis = self.analysis.with_env_overrides();
        self
    }

    /// Directory used to resolve relative paths.
    pub fn base_dir(&self) -> Option<PathBuf> {
        self.source_path
            .as_ref()
            .and_then(|p| p.parent().map(|p| p.to_path_buf()))
    }

    /// Absolute paths are kept, `~` is expanded, relative paths join `base_dir`.
    pub fn resolve_path(&self, path_str: &str, base_dir: &Path) -> PathBuf {
        let expanded = shellexpand::tilde(path_str);
        let path = Path::new(expanded.as_ref());
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            base_dir.join(path)
        }
    }

    /// Validate and build settings.
    pub fn into_settings(self, base_dir: &Path) -> Result<Settings, ConfigError> {
        let mut settings = Settings::default();
        if let Some(ref logs_path) = self.logs_path {
            settings.logs_path = self.resolve_path(logs_path, base_dir);
        }
        if let Some(n) = self.max_logs_per_request {
            if n == 0 {
                return Err(ConfigError::Invalid(
                    "max_logs_per_request must be > 0".to_string(),
                ));
            }
            settings.max_logs_per_request = n;
        }
        if let Some(n) = self.find_window_days {
            settings.find_window_days = n.max(1);
        }
        settings.schedule = self.scheduler.resolve()?;
        url::Url::parse(self.analysis.base_url()).map_err(|e| {
            ConfigError::Invalid(format!(
                "analysis.endpoint '{}': {}",
                self.analysis.endpoint, e
            ))
        })?;
        settings.llm = self.analysis;
        Ok(settings)
    }
}

/// Options for loading settings.
#[derive(Debug, Clone, Default)]
pub struct LoadOptions {
    /// Explicit config file path (overrides discovery).
    pub config_path: Option<PathBuf>,
    /// Logs directory override (`--logs-path`), highest precedence.
    pub logs_path: Option<PathBuf>,
}

/// Load settings: config file, then environment, then command-line overrides.
pub async fn load_settings_with_options(options: LoadOptions) -> Result<Settings, ConfigError> {
    let config = match options.config_path {
        Some(ref path) => Config::load_from_path(path).await?,
        None => Config::load().await?,
    };

    if let Some(ref path) = config.source_path {
        tracing::debug!("Loaded config from {}", path.display());
    }

    let base_dir = config
        .base_dir()
        .unwrap_or_else(|| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")));

    let mut settings = config.into_settings(&base_dir)?;
    if let Some(logs_path) = options.logs_path {
        settings.logs_path = logs_path;
    }
    Ok(settings)
}
