//! Configuration loading.
//!
//! Every field has a default, so an absent config file is a valid setup as
//! long as the bot token comes from the environment.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::{fs, io};

use chrono::NaiveTime;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

use crate::age::Lifespan;
use crate::svg::Theme;

pub const DEFAULT_CONFIG_FILE: &str = "lifeweeks.toml";
pub const TOKEN_ENV: &str = "TELEGRAM_BOT_TOKEN";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("io: {0}")]
    Io(#[from] io::Error),
    #[error("toml: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("validation: {0}")]
    Validation(String),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub telegram: TelegramConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub schedule: ScheduleConfig,
    #[serde(default)]
    pub lifespan: Lifespan,
    #[serde(default)]
    pub chart: ChartConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelegramConfig {
    /// Bot token. `TELEGRAM_BOT_TOKEN` takes precedence.
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default = "default_api_base")]
    pub api_base: String,
    /// Long-poll timeout for `getUpdates`.
    #[serde(default = "default_poll_timeout_secs")]
    pub poll_timeout_secs: u64,
}

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            token: None,
            api_base: default_api_base(),
            poll_timeout_secs: default_poll_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_users_file")]
    pub users_file: PathBuf,
    #[serde(default = "default_watermark_file")]
    pub watermark_file: PathBuf,
    /// With `false` the last seen week per user lives in memory only, and a
    /// restart re-sends the chart to everyone on the next daily run.
    #[serde(default = "default_true")]
    pub persist_watermarks: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            users_file: default_users_file(),
            watermark_file: default_watermark_file(),
            persist_watermarks: true,
        }
    }
}

impl StorageConfig {
    pub fn watermark_path(&self) -> Option<PathBuf> {
        self.persist_watermarks.then(|| self.watermark_file.clone())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleConfig {
    /// Local time of day for the daily summary, `HH:MM` or `HH:MM:SS`.
    #[serde(
        default = "default_trigger_time",
        serialize_with = "serialize_time",
        deserialize_with = "deserialize_time"
    )]
    pub trigger_time: NaiveTime,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            trigger_time: default_trigger_time(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChartConfig {
    #[serde(default)]
    pub theme: Theme,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Base level: trace, debug, info, warn, error.
    #[serde(default)]
    pub level: Option<String>,
    /// Per-module overrides, e.g. `reqwest = "warn"`.
    #[serde(default)]
    pub filters: BTreeMap<String, String>,
    /// `pretty` or `compact`.
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: None,
            filters: BTreeMap::new(),
            format: default_log_format(),
        }
    }
}

fn default_api_base() -> String {
    "https://api.telegram.org".to_string()
}

fn default_poll_timeout_secs() -> u64 {
    30
}

fn default_users_file() -> PathBuf {
    PathBuf::from("users_data.json")
}

fn default_watermark_file() -> PathBuf {
    PathBuf::from("last_weeks.json")
}

fn default_true() -> bool {
    true
}

fn default_trigger_time() -> NaiveTime {
    NaiveTime::from_hms_opt(10, 0, 0).unwrap_or(NaiveTime::MIN)
}

fn default_log_format() -> String {
    "pretty".to_string()
}

pub fn parse_time_of_day(s: &str) -> Option<NaiveTime> {
    NaiveTime::parse_from_str(s, "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(s, "%H:%M:%S"))
        .ok()
}

fn deserialize_time<'de, D: Deserializer<'de>>(deserializer: D) -> Result<NaiveTime, D::Error> {
    let raw = String::deserialize(deserializer)?;
    parse_time_of_day(&raw)
        .ok_or_else(|| serde::de::Error::custom(format!("invalid time of day '{raw}', expected HH:MM")))
}

fn serialize_time<S: Serializer>(time: &NaiveTime, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&time.format("%H:%M:%S").to_string())
}

impl Config {
    /// Loads `path`, or `lifeweeks.toml` if it exists, or the defaults.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let config = match path {
            Some(path) => Self::from_file(path)?,
            None if Path::new(DEFAULT_CONFIG_FILE).exists() => {
                Self::from_file(Path::new(DEFAULT_CONFIG_FILE))?
            }
            None => Self::default(),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let data = fs::read_to_string(path)?;
        Self::from_toml(&data)
    }

    pub fn from_toml(data: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(data)?)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let lifespan = &self.lifespan;
        if lifespan.total_years == 0 || lifespan.weeks_per_year == 0 || lifespan.days_per_year == 0 {
            return Err(ConfigError::Validation(
                "lifespan values must be greater than zero".to_string(),
            ));
        }
        if !matches!(self.logging.format.as_str(), "pretty" | "compact") {
            return Err(ConfigError::Validation(format!(
                "unknown logging format '{}'",
                self.logging.format
            )));
        }
        Ok(())
    }

    /// Token from the environment, falling back to the config file.
    pub fn bot_token(&self) -> Result<String, ConfigError> {
        std::env::var(TOKEN_ENV)
            .ok()
            .filter(|t| !t.trim().is_empty())
            .or_else(|| self.telegram.token.clone())
            .ok_or_else(|| {
                ConfigError::Validation(format!(
                    "no bot token: set {TOKEN_ENV} or telegram.token"
                ))
            })
    }
}
