//! PriceWatch configuration system.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{PriceWatchError, Result};

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PriceWatchConfig {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub telegram: TelegramConfig,
    #[serde(default)]
    pub schedule: ScheduleConfig,
    #[serde(default)]
    pub fetch: FetchConfig,
    #[serde(default)]
    pub cycle: CycleConfig,
    #[serde(default)]
    pub scraper: ScraperConfig,
}

impl PriceWatchConfig {
    /// Load config from the default path (~/.pricewatch/config.toml).
    pub fn load() -> Result<Self> {
        let path = Self::default_path();
        let mut config = if path.exists() {
            Self::load_from(&path)?
        } else {
            tracing::debug!("No config at {}, using defaults", path.display());
            Self::default()
        };
        config.apply_env_overrides();
        Ok(config)
    }

    /// Load config from a specific path.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| PriceWatchError::Config(format!("Failed to read config: {e}")))?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content)
            .map_err(|e| PriceWatchError::Config(format!("Failed to parse config: {e}")))
    }

    /// Environment wins over the file for secrets and paths.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(token) = std::env::var("PRICEWATCH_BOT_TOKEN")
            && !token.is_empty()
        {
            self.telegram.bot_token = token;
        }
        if let Ok(path) = std::env::var("PRICEWATCH_DATABASE")
            && !path.is_empty()
        {
            self.database.path = path;
        }
    }

    /// Reject settings the engine cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.schedule.trigger_times.is_empty() {
            return Err(PriceWatchError::Config(
                "schedule.trigger_times must not be empty".into(),
            ));
        }
        if !(-14 * 60..=14 * 60).contains(&self.schedule.utc_offset_minutes) {
            return Err(PriceWatchError::Config(format!(
                "schedule.utc_offset_minutes out of range: {}",
                self.schedule.utc_offset_minutes
            )));
        }
        if self.fetch.max_attempts == 0 {
            return Err(PriceWatchError::Config("fetch.max_attempts must be at least 1".into()));
        }
        if self.fetch.attempt_timeout_secs == 0 {
            return Err(PriceWatchError::Config(
                "fetch.attempt_timeout_secs must be positive".into(),
            ));
        }
        if self.cycle.max_concurrent_fetches == 0 {
            return Err(PriceWatchError::Config(
                "cycle.max_concurrent_fetches must be at least 1".into(),
            ));
        }
        Ok(())
    }

    /// Get the default config path.
    pub fn default_path() -> PathBuf {
        Self::home_dir().join("config.toml")
    }

    /// Get the PriceWatch home directory.
    pub fn home_dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".pricewatch")
    }
}

/// SQLite storage configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_database_path")]
    pub path: String,
}

fn default_database_path() -> String { "~/.pricewatch/pricewatch.db".into() }

impl DatabaseConfig {
    /// Path with `~` expanded.
    pub fn resolved_path(&self) -> PathBuf {
        PathBuf::from(shellexpand::tilde(&self.path).to_string())
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self { path: default_database_path() }
    }
}

/// Telegram delivery. An empty token means notifications are only logged.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelegramConfig {
    #[serde(default)]
    pub bot_token: String,
    #[serde(default = "bool_true")]
    pub enabled: bool,
    #[serde(default = "default_send_timeout")]
    pub send_timeout_secs: u64,
}

fn bool_true() -> bool { true }
fn default_send_timeout() -> u64 { 10 }

impl TelegramConfig {
    pub fn is_usable(&self) -> bool {
        self.enabled && !self.bot_token.is_empty()
    }
}

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            bot_token: String::new(),
            enabled: true,
            send_timeout_secs: default_send_timeout(),
        }
    }
}

/// When cycles run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleConfig {
    /// Times of day, "HH:MM".
    #[serde(default = "default_trigger_times")]
    pub trigger_times: Vec<String>,
    /// Offset from UTC the trigger times are read in.
    #[serde(default)]
    pub utc_offset_minutes: i32,
}

fn default_trigger_times() -> Vec<String> {
    vec!["09:00".into(), "15:00".into(), "21:00".into()]
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            trigger_times: default_trigger_times(),
            utc_offset_minutes: 0,
        }
    }
}

/// Per-product fetch retry policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_attempt_timeout")]
    pub attempt_timeout_secs: u64,
    #[serde(default)]
    pub backoff: BackoffConfig,
}

fn default_max_attempts() -> u32 { 2 }
fn default_attempt_timeout() -> u64 { 30 }

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            attempt_timeout_secs: default_attempt_timeout(),
            backoff: BackoffConfig::default(),
        }
    }
}

/// Delay between fetch attempts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BackoffConfig {
    Fixed {
        #[serde(default = "default_backoff_ms")]
        delay_ms: u64,
    },
    Exponential {
        #[serde(default = "default_backoff_ms")]
        initial_ms: u64,
        #[serde(default = "default_backoff_max_ms")]
        max_ms: u64,
    },
}

fn default_backoff_ms() -> u64 { 1200 }
fn default_backoff_max_ms() -> u64 { 10_000 }

impl Default for BackoffConfig {
    fn default() -> Self {
        BackoffConfig::Fixed { delay_ms: default_backoff_ms() }
    }
}

/// Cycle fan-out and failure suppression.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CycleConfig {
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_fetches: usize,
    /// Consecutive structural failures before a product is held back. 0 disables.
    #[serde(default = "default_suppress_after")]
    pub suppress_after_failures: u32,
    #[serde(default = "default_suppress_hours")]
    pub suppress_for_hours: u64,
}

fn default_max_concurrent() -> usize { 3 }
fn default_suppress_after() -> u32 { 5 }
fn default_suppress_hours() -> u64 { 24 }

impl Default for CycleConfig {
    fn default() -> Self {
        Self {
            max_concurrent_fetches: default_max_concurrent(),
            suppress_after_failures: default_suppress_after(),
            suppress_for_hours: default_suppress_hours(),
        }
    }
}

/// HTTP scraper settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScraperConfig {
    #[serde(default = "default_api_base")]
    pub api_base: String,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    #[serde(default = "default_accept_language")]
    pub accept_language: String,
}

fn default_api_base() -> String { "https://api.ozon.ru/composer-api.bx/page/json/v2".into() }
fn default_user_agent() -> String {
    concat!(
        "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 ",
        "(KHTML, like Gecko) Chrome/128.0.0.0 Safari/537.36"
    )
    .into()
}
fn default_accept_language() -> String { "ru-RU,ru;q=0.9,en-US;q=0.8,en;q=0.7".into() }

impl Default for ScraperConfig {
    fn default() -> Self {
        Self {
            api_base: default_api_base(),
            user_agent: default_user_agent(),
            accept_language: default_accept_language(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = PriceWatchConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.schedule.trigger_times, vec!["09:00", "15:00", "21:00"]);
        assert_eq!(config.fetch.max_attempts, 2);
        assert_eq!(config.cycle.max_concurrent_fetches, 3);
    }

    #[test]
    fn test_partial_toml_fills_defaults() {
        let config = PriceWatchConfig::from_toml(
            r#"
            [schedule]
            trigger_times = ["08:30", "20:00"]
            utc_offset_minutes = 180

            [fetch]
            max_attempts = 4

            [fetch.backoff]
            kind = "exponential"
            initial_ms = 500
            "#,
        )
        .unwrap();

        assert_eq!(config.schedule.trigger_times.len(), 2);
        assert_eq!(config.schedule.utc_offset_minutes, 180);
        assert_eq!(config.fetch.max_attempts, 4);
        assert_eq!(config.fetch.attempt_timeout_secs, 30);
        assert_eq!(
            config.fetch.backoff,
            BackoffConfig::Exponential { initial_ms: 500, max_ms: 10_000 }
        );
        assert_eq!(config.cycle.suppress_after_failures, 5);
    }

    #[test]
    fn test_validate_rejects_zero_concurrency() {
        let mut config = PriceWatchConfig::default();
        config.cycle.max_concurrent_fetches = 0;
        assert!(matches!(config.validate(), Err(PriceWatchError::Config(_))));
    }

    #[test]
    fn test_validate_rejects_empty_triggers() {
        let mut config = PriceWatchConfig::default();
        config.schedule.trigger_times.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_bad_toml_is_config_error() {
        let err = PriceWatchConfig::from_toml("[fetch]\nmax_attempts = \"two\"").unwrap_err();
        assert!(matches!(err, PriceWatchError::Config(_)));
    }
}
