//! Step log entries and the `/steps/sync` wire contract.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Where a step count came from.
///
/// Wire names match the server's accepted values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepSource {
    /// Apple HealthKit
    HealthKit,
    /// Google Fit / Health Connect
    GoogleFit,
    /// Entered or imported by the user
    Manual,
    /// Collected by an unattended scheduled sync
    Background,
}

impl StepSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            StepSource::HealthKit => "healthkit",
            StepSource::GoogleFit => "googlefit",
            StepSource::Manual => "manual",
            StepSource::Background => "background",
        }
    }
}

impl fmt::Display for StepSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StepSource {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "healthkit" => Ok(StepSource::HealthKit),
            "googlefit" => Ok(StepSource::GoogleFit),
            "manual" => Ok(StepSource::Manual),
            "background" => Ok(StepSource::Background),
            other => Err(format!("unknown step source '{}'", other)),
        }
    }
}

/// The full step total for one calendar day.
///
/// Always carries the canonical total, never a delta, so the server can
/// upsert by date.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepLogEntry {
    date: NaiveDate,
    steps: u64,
    source: StepSource,
}

impl StepLogEntry {
    pub fn new(date: NaiveDate, steps: u64, source: StepSource) -> Self {
        Self {
            date,
            steps,
            source,
        }
    }

    pub fn date(&self) -> NaiveDate {
        self.date
    }

    pub fn steps(&self) -> u64 {
        self.steps
    }

    pub fn source(&self) -> StepSource {
        self.source
    }
}

/// Body of `POST /steps/sync`.
#[derive(Debug, Clone, Serialize)]
pub struct SyncRequest<'a> {
    pub steps: &'a [StepLogEntry],
}

/// Per-day record echoed back by the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepLogRecord {
    pub date: String,
    pub steps: u64,
    #[serde(default)]
    pub points: u64,
    #[serde(default)]
    pub source: Option<String>,
}

/// Response of `POST /steps/sync`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncResult {
    pub synced_count: u32,
    pub total_points_earned: u64,
    #[serde(default)]
    pub step_logs: Vec<StepLogRecord>,
}
