// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Application configuration loaded from environment variables.
//!
//! Values are read once at startup. A `.env` file is honored for local runs.

use crate::models::StepSource;
use std::env;
use std::num::NonZeroU64;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Steps needed for one club support point.
pub const DEFAULT_STEPS_TO_POINTS_RATIO: u64 = 1000;
/// Per-day cap applied to raw health readings.
pub const DEFAULT_MAX_DAILY_STEPS: u64 = 100_000;
/// Minimum time between two background syncs.
pub const DEFAULT_SYNC_INTERVAL_SECS: u64 = 60 * 60;
/// Days re-read from the health store on every sync.
pub const DEFAULT_SYNC_LOOKBACK_DAYS: u32 = 7;

/// Application configuration, loaded once at startup.
#[derive(Debug, Clone)]
pub struct Config {
    /// Base URL of the club points API (no trailing slash)
    pub api_base_url: String,
    /// File holding tokens and the sync checkpoint
    pub credentials_path: PathBuf,
    /// Step export read by the daemon's file-backed health source
    pub health_export_path: PathBuf,
    /// Source marker for user-initiated syncs
    pub step_source: StepSource,
    pub steps_to_points_ratio: NonZeroU64,
    pub max_daily_steps: u64,
    pub sync_interval: Duration,
    pub lookback_days: u32,
    /// Per-request transport timeout
    pub request_timeout: Duration,
    /// Refresh JWT access tokens this long before they expire
    pub token_refresh_margin: Duration,
    pub task_backoff_initial: Duration,
    pub task_backoff_max: Duration,
    pub task_max_attempts: u32,
    /// Run a one-off sync as soon as the daemon starts
    pub sync_on_start: bool,
}

impl Default for Config {
    /// Default config for testing only.
    fn default() -> Self {
        Self {
            api_base_url: "http://127.0.0.1:8000/api/v1".to_string(),
            credentials_path: PathBuf::from("step-sync-credentials.json"),
            health_export_path: PathBuf::from("health-export.json"),
            step_source: StepSource::Manual,
            steps_to_points_ratio: NonZeroU64::new(DEFAULT_STEPS_TO_POINTS_RATIO)
                .unwrap_or(NonZeroU64::MIN),
            max_daily_steps: DEFAULT_MAX_DAILY_STEPS,
            sync_interval: Duration::from_secs(DEFAULT_SYNC_INTERVAL_SECS),
            lookback_days: DEFAULT_SYNC_LOOKBACK_DAYS,
            request_timeout: Duration::from_secs(30),
            token_refresh_margin: Duration::from_secs(5 * 60),
            task_backoff_initial: Duration::from_secs(30),
            task_backoff_max: Duration::from_secs(60 * 60),
            task_max_attempts: 5,
            sync_on_start: false,
        }
    }
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok(); // Load .env file if present

        let defaults = Self::default();

        let api_base_url = env::var("API_BASE_URL")
            .map(|v| v.trim().trim_end_matches('/').to_string())
            .map_err(|_| ConfigError::Missing("API_BASE_URL"))?;
        if api_base_url.is_empty() {
            return Err(ConfigError::Missing("API_BASE_URL"));
        }

        let ratio: u64 = parse_var("STEPS_TO_POINTS_RATIO", DEFAULT_STEPS_TO_POINTS_RATIO)?;
        let steps_to_points_ratio = NonZeroU64::new(ratio).ok_or(ConfigError::Invalid {
            name: "STEPS_TO_POINTS_RATIO",
            reason: "must be greater than zero".to_string(),
        })?;

        let lookback_days: u32 = parse_var("SYNC_LOOKBACK_DAYS", DEFAULT_SYNC_LOOKBACK_DAYS)?;
        if lookback_days == 0 {
            return Err(ConfigError::Invalid {
                name: "SYNC_LOOKBACK_DAYS",
                reason: "must be at least 1".to_string(),
            });
        }

        let task_max_attempts: u32 = parse_var("TASK_MAX_ATTEMPTS", defaults.task_max_attempts)?;
        if task_max_attempts == 0 {
            return Err(ConfigError::Invalid {
                name: "TASK_MAX_ATTEMPTS",
                reason: "must be at least 1".to_string(),
            });
        }

        Ok(Self {
            api_base_url,
            credentials_path: env::var("CREDENTIALS_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.credentials_path),
            health_export_path: env::var("HEALTH_EXPORT_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.health_export_path),
            step_source: parse_var("STEP_SOURCE", defaults.step_source)?,
            steps_to_points_ratio,
            max_daily_steps: parse_var("MAX_DAILY_STEPS", DEFAULT_MAX_DAILY_STEPS)?,
            sync_interval: parse_positive_secs("SYNC_INTERVAL_SECS", DEFAULT_SYNC_INTERVAL_SECS)?,
            lookback_days,
            request_timeout: parse_positive_secs("REQUEST_TIMEOUT_SECS", 30)?,
            token_refresh_margin: Duration::from_secs(parse_var(
                "TOKEN_REFRESH_MARGIN_SECS",
                5 * 60,
            )?),
            task_backoff_initial: parse_positive_secs("TASK_BACKOFF_INITIAL_SECS", 30)?,
            task_backoff_max: parse_positive_secs("TASK_BACKOFF_MAX_SECS", 60 * 60)?,
            task_max_attempts,
            sync_on_start: parse_var("SYNC_ON_START", false)?,
        })
    }
}

/// Read an optional variable, falling back to `default` when unset.
fn parse_var<T>(name: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(name) {
        Ok(raw) => raw.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
            name,
            reason: e.to_string(),
        }),
        Err(_) => Ok(default),
    }
}

/// Read an optional whole-second duration that must be non-zero.
fn parse_positive_secs(name: &'static str, default: u64) -> Result<Duration, ConfigError> {
    match parse_var(name, default)? {
        0 => Err(ConfigError::Invalid {
            name,
            reason: "must be greater than zero".to_string(),
        }),
        secs => Ok(Duration::from_secs(secs)),
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    Missing(&'static str),

    #[error("Invalid value for {name}: {reason}")]
    Invalid { name: &'static str, reason: String },
}
