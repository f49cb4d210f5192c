// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Step count sources.
//!
//! [`HealthDataSource`] is what the sync service consumes. Two adapters are
//! provided:
//! - [`PlatformHealthSource`] wraps a device health API that returns raw
//!   samples and sums them into per-day totals
//! - [`ExportFileSource`] reads a JSON export of daily totals

use crate::models::StepSource;
use chrono::{DateTime, FixedOffset, NaiveDate, TimeZone, Utc};
use futures_util::future::BoxFuture;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Daily step totals, per calendar day.
pub type DailySteps = BTreeMap<NaiveDate, u64>;

/// Permission-gated source of daily step totals.
///
/// Days with no data are simply absent from range results.
pub trait HealthDataSource: Send + Sync {
    /// Ask for read access to step data. `false` means denied.
    fn request_permission(&self) -> BoxFuture<'_, bool>;

    /// Total for one day, or `None` when unavailable.
    fn steps_for_date(&self, date: NaiveDate) -> BoxFuture<'_, Option<u64>>;

    /// Totals for every available day in `[start, end]`.
    fn steps_for_range(&self, start: NaiveDate, end: NaiveDate) -> BoxFuture<'_, DailySteps>;

    /// Source marker attached to user-initiated syncs.
    fn source(&self) -> StepSource;
}

// ─── Platform Adapter ──────────────────────────────────────────────────────

/// Health data types requested from the platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthDataType {
    Steps,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthPermission {
    Read,
    ReadWrite,
}

/// One raw reading as reported by the platform.
#[derive(Debug, Clone)]
pub struct HealthSample {
    pub data_type: HealthDataType,
    pub value: f64,
    pub date_from: DateTime<Utc>,
}

#[derive(Debug, Clone, thiserror::Error)]
#[error("Health platform error: {0}")]
pub struct HealthPlatformError(pub String);

/// Raw device health API (HealthKit, Health Connect, ...).
pub trait HealthPlatform: Send + Sync {
    fn request_authorization(
        &self,
        types: &[HealthDataType],
        permissions: &[HealthPermission],
    ) -> BoxFuture<'_, bool>;

    fn get_health_data_from_types(
        &self,
        types: &[HealthDataType],
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> BoxFuture<'_, Result<Vec<HealthSample>, HealthPlatformError>>;
}

/// Sums platform samples into per-day totals in a fixed UTC offset.
pub struct PlatformHealthSource<P> {
    platform: P,
    source: StepSource,
    offset: FixedOffset,
}

impl<P: HealthPlatform> PlatformHealthSource<P> {
    pub fn new(platform: P, source: StepSource, offset: FixedOffset) -> Self {
        Self {
            platform,
            source,
            offset,
        }
    }

    /// UTC instant at which `date` starts in the configured offset.
    fn day_start(&self, date: NaiveDate) -> DateTime<Utc> {
        let midnight = date.and_hms_opt(0, 0, 0).unwrap_or_default();
        self.offset
            .from_local_datetime(&midnight)
            .single()
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(|| midnight.and_utc())
    }

    fn aggregate(&self, samples: Vec<HealthSample>, start: NaiveDate, end: NaiveDate) -> DailySteps {
        let mut totals = DailySteps::new();
        for sample in samples {
            if sample.data_type != HealthDataType::Steps || !sample.value.is_finite() {
                continue;
            }
            if sample.value < 0.0 {
                tracing::debug!(value = sample.value, "Ignoring negative step sample");
                continue;
            }
            let day = sample.date_from.with_timezone(&self.offset).date_naive();
            if day < start || day > end {
                continue;
            }
            // Float-to-int casts saturate; keep the sum saturating too so a
            // glitch still reaches the daily clamp as a huge value.
            let total = totals.entry(day).or_default();
            *total = total.saturating_add(sample.value.round() as u64);
        }
        totals
    }
}

impl<P: HealthPlatform> HealthDataSource for PlatformHealthSource<P> {
    fn request_permission(&self) -> BoxFuture<'_, bool> {
        self.platform
            .request_authorization(&[HealthDataType::Steps], &[HealthPermission::Read])
    }

    fn steps_for_date(&self, date: NaiveDate) -> BoxFuture<'_, Option<u64>> {
        Box::pin(async move { self.steps_for_range(date, date).await.remove(&date) })
    }

    fn steps_for_range(&self, start: NaiveDate, end: NaiveDate) -> BoxFuture<'_, DailySteps> {
        Box::pin(async move {
            let from = self.day_start(start);
            let to = end
                .succ_opt()
                .map(|next| self.day_start(next))
                .unwrap_or(DateTime::<Utc>::MAX_UTC);

            match self
                .platform
                .get_health_data_from_types(&[HealthDataType::Steps], from, to)
                .await
            {
                Ok(samples) => self.aggregate(samples, start, end),
                Err(e) => {
                    // Unavailable data contributes nothing; it never fails the batch.
                    tracing::warn!(error = %e, "Health platform query failed");
                    DailySteps::new()
                }
            }
        })
    }

    fn source(&self) -> StepSource {
        self.source
    }
}

// ─── Export File ───────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct ExportRow {
    date: NaiveDate,
    steps: i64,
}

/// Reads `[{"date": "YYYY-MM-DD", "steps": N}, ...]` from disk on every query.
///
/// Permission is "granted" when the file exists. Duplicate dates keep the
/// largest value; negative values are skipped.
pub struct ExportFileSource {
    path: PathBuf,
    source: StepSource,
}

impl ExportFileSource {
    pub fn new(path: impl Into<PathBuf>, source: StepSource) -> Self {
        Self {
            path: path.into(),
            source,
        }
    }

    async fn load(&self) -> DailySteps {
        let raw = match tokio::fs::read_to_string(&self.path).await {
            Ok(raw) => raw,
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "Step export unreadable");
                return DailySteps::new();
            }
        };

        let rows: Vec<ExportRow> = match serde_json::from_str(&raw) {
            Ok(rows) => rows,
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "Step export malformed");
                return DailySteps::new();
            }
        };

        let mut totals = DailySteps::new();
        for row in rows {
            let Ok(steps) = u64::try_from(row.steps) else {
                continue;
            };
            let slot = totals.entry(row.date).or_default();
            *slot = (*slot).max(steps);
        }
        totals
    }
}

impl HealthDataSource for ExportFileSource {
    fn request_permission(&self) -> BoxFuture<'_, bool> {
        Box::pin(async move { tokio::fs::try_exists(&self.path).await.unwrap_or(false) })
    }

    fn steps_for_date(&self, date: NaiveDate) -> BoxFuture<'_, Option<u64>> {
        Box::pin(async move { self.load().await.remove(&date) })
    }

    fn steps_for_range(&self, start: NaiveDate, end: NaiveDate) -> BoxFuture<'_, DailySteps> {
        Box::pin(async move {
            self.load()
                .await
                .into_iter()
                .filter(|(day, _)| *day >= start && *day <= end)
                .collect()
        })
    }

    fn source(&self) -> StepSource {
        self.source
    }
}
