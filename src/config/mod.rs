//! Configuration module for the orianna application.
//!
//! Values come from an optional TOML file overlaid by raw environment
//! variables (`DATABASE_URL`, `MASTERY_INTERVAL`, ...). Durations accept
//! strings like `"30s"`, `"5m"` or `"1h"`, or a bare integer of seconds.

use crate::refresh::CoordinatorSettings;
use crate::refresh::domain::Domain;
use crate::refresh::scheduler::DomainSchedule;
use crate::riot::RiotRateLimit;
use figment::Figment;
use figment::providers::{Env, Format, Toml};
use fundu::{DurationParser, TimeUnit};
use serde::{Deserialize, Deserializer};
use std::path::Path;
use std::time::Duration;

/// Config file read when no path is given on the command line.
pub const DEFAULT_CONFIG_FILE: &str = "orianna.toml";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error(transparent)]
    Load(#[from] Box<figment::Error>),
    #[error("invalid value for `{key}`: {reason}")]
    Invalid { key: &'static str, reason: &'static str },
}

/// Main application configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Log level for the application
    ///
    /// Used as the default for the `orianna` target when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub log_level: String,
    pub database_url: String,
    pub riot_api_key: String,
    /// The bot is not started without a token.
    #[serde(default)]
    pub discord_token: Option<String>,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Graceful shutdown timeout
    #[serde(
        default = "default_shutdown_timeout",
        deserialize_with = "deserialize_duration"
    )]
    pub shutdown_timeout: Duration,

    /// Number of worker agents
    #[serde(default = "default_worker_count")]
    pub worker_count: usize,
    /// Requests each worker agent processes at once
    #[serde(default = "default_worker_concurrency")]
    pub worker_concurrency: usize,
    /// How long the refresh command waits for a worker
    #[serde(
        default = "default_refresh_timeout",
        deserialize_with = "deserialize_duration"
    )]
    pub refresh_timeout: Duration,
    /// In-flight entries older than this many intervals are evicted
    #[serde(default = "default_stuck_multiplier")]
    pub stuck_multiplier: u32,

    #[serde(default = "default_riot_rate")]
    pub riot_requests_per_second: u32,
    #[serde(default = "default_riot_rate")]
    pub riot_burst: u32,

    #[serde(
        default = "default_mastery_interval",
        deserialize_with = "deserialize_duration"
    )]
    pub mastery_interval: Duration,
    #[serde(default = "default_mastery_amount")]
    pub mastery_amount: usize,
    #[serde(
        default = "default_rank_interval",
        deserialize_with = "deserialize_duration"
    )]
    pub rank_interval: Duration,
    #[serde(default = "default_rank_amount")]
    pub rank_amount: usize,
    #[serde(
        default = "default_account_interval",
        deserialize_with = "deserialize_duration"
    )]
    pub account_interval: Duration,
    #[serde(default = "default_account_amount")]
    pub account_amount: usize,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_shutdown_timeout() -> Duration {
    Duration::from_secs(8)
}

fn default_worker_count() -> usize {
    2
}

fn default_worker_concurrency() -> usize {
    4
}

fn default_refresh_timeout() -> Duration {
    Duration::from_secs(20)
}

fn default_stuck_multiplier() -> u32 {
    3
}

fn default_riot_rate() -> u32 {
    20
}

fn default_mastery_interval() -> Duration {
    Duration::from_secs(5 * 60)
}

fn default_mastery_amount() -> usize {
    25
}

fn default_rank_interval() -> Duration {
    Duration::from_secs(10 * 60)
}

fn default_rank_amount() -> usize {
    25
}

fn default_account_interval() -> Duration {
    Duration::from_secs(30 * 60)
}

fn default_account_amount() -> usize {
    10
}

impl Config {
    /// Load from `path` (or `orianna.toml` if it exists) and the environment.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let file = path.unwrap_or(Path::new(DEFAULT_CONFIG_FILE));
        let config: Config = Figment::new()
            .merge(Toml::file(file))
            .merge(Env::raw())
            .extract()
            .map_err(Box::new)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let checks: [(&'static str, bool, &'static str); 8] = [
            ("worker_count", self.worker_count >= 1, "must be at least 1"),
            (
                "worker_concurrency",
                self.worker_concurrency >= 1,
                "must be at least 1",
            ),
            (
                "stuck_multiplier",
                self.stuck_multiplier >= 1,
                "must be at least 1",
            ),
            (
                "riot_requests_per_second",
                self.riot_requests_per_second >= 1,
                "must be at least 1",
            ),
            (
                "refresh_timeout",
                !self.refresh_timeout.is_zero(),
                "must be greater than zero",
            ),
            (
                "mastery_interval",
                !self.mastery_interval.is_zero(),
                "must be greater than zero",
            ),
            (
                "rank_interval",
                !self.rank_interval.is_zero(),
                "must be greater than zero",
            ),
            (
                "account_interval",
                !self.account_interval.is_zero(),
                "must be greater than zero",
            ),
        ];
        for (key, ok, reason) in checks {
            if !ok {
                return Err(ConfigError::Invalid { key, reason });
            }
        }

        for (key, amount) in [
            ("mastery_amount", self.mastery_amount),
            ("rank_amount", self.rank_amount),
            ("account_amount", self.account_amount),
        ] {
            if amount == 0 {
                return Err(ConfigError::Invalid {
                    key,
                    reason: "must be at least 1",
                });
            }
        }
        Ok(())
    }

    pub fn schedule(&self, domain: Domain) -> DomainSchedule {
        let (interval, amount) = match domain {
            Domain::Mastery => (self.mastery_interval, self.mastery_amount),
            Domain::Rank => (self.rank_interval, self.rank_amount),
            Domain::Account => (self.account_interval, self.account_amount),
        };
        DomainSchedule {
            domain,
            interval,
            amount,
            stuck_multiplier: self.stuck_multiplier,
        }
    }

    pub fn coordinator_settings(&self) -> CoordinatorSettings {
        CoordinatorSettings {
            worker_count: self.worker_count,
            worker_concurrency: self.worker_concurrency,
            schedules: Domain::ALL.iter().map(|d| self.schedule(*d)).collect(),
        }
    }

    pub fn riot_rate_limit(&self) -> RiotRateLimit {
        RiotRateLimit {
            requests_per_second: self.riot_requests_per_second,
            burst: self.riot_burst,
        }
    }
}

fn duration_parser() -> DurationParser<'static> {
    DurationParser::with_time_units(&[
        TimeUnit::MilliSecond,
        TimeUnit::Second,
        TimeUnit::Minute,
        TimeUnit::Hour,
    ])
}

/// Parse `"30s"`, `"5m"`, `"1h"`, `"250ms"`, or a bare number of seconds.
pub fn parse_duration(value: &str) -> Result<Duration, String> {
    let parsed = duration_parser()
        .parse(value.trim())
        .map_err(|e| format!("invalid duration '{value}': {e}"))?;
    Duration::try_from(parsed).map_err(|e| format!("invalid duration '{value}': {e}"))
}

/// Accepts either an integer number of seconds or a duration string.
fn deserialize_duration<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Seconds(u64),
        Text(String),
    }

    match Raw::deserialize(deserializer)? {
        Raw::Seconds(secs) => Ok(Duration::from_secs(secs)),
        Raw::Text(text) => parse_duration(&text).map_err(serde::de::Error::custom),
    }
}
