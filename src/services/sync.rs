// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! One sync pass: health store -> per-day entries -> server -> checkpoint.
//!
//! Phases: `Idle -> Checking -> Fetching -> Transforming -> Pushing ->
//! Committed`, or `Aborted` from any of them. The checkpoint only moves in
//! `Committed`, so a failed pass re-sends the whole window next time. That
//! is safe because the server upserts by date and every entry carries the
//! full day total.
//!
//! The checkpoint records when the pass started, and a scheduled pass counts
//! as due when it starts within [`DUE_SLACK_DIVISOR`]ths of an interval of
//! the next due time, so timer jitter cannot skip a period.
//!
//! No lock is held across a pass; a scheduled and a user-initiated pass may
//! run at the same time.

use crate::db::CredentialStore;
use crate::error::{Result, SyncError};
use crate::models::{StepLogEntry, StepSource, SyncResult};
use crate::services::api_client::ResilientApiClient;
use crate::services::health::{DailySteps, HealthDataSource};
use crate::services::points::PointCalculator;
use crate::services::scheduler::{TaskOutcome, TaskRegistry};
use crate::time_utils;
use chrono::{DateTime, Local, NaiveDate, Utc};
use std::sync::Arc;
use tokio::sync::watch;

/// A scheduled pass is due this fraction of an interval early.
pub const DUE_SLACK_DIVISOR: i32 = 20;

/// Registry name of the unattended periodic sync.
pub const BACKGROUND_SYNC_TASK: &str = "step_sync.background";
/// Registry name of a one-off, user-requested sync.
pub const MANUAL_SYNC_TASK: &str = "step_sync.manual";

/// Who asked for the sync.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncTrigger {
    /// OS/scheduler initiated; throttled by the sync interval.
    Scheduled,
    /// Pull-to-refresh or similar; bypasses the interval check.
    UserInitiated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncPhase {
    Idle,
    Checking,
    Fetching,
    Transforming,
    Pushing,
    Committed,
    Aborted,
}

/// Why a pass stopped before committing.
#[derive(Debug)]
pub enum AbortReason {
    NotAuthenticated,
    NotDue,
    PermissionDenied,
    NothingToSync,
    Failed(SyncError),
}

impl AbortReason {
    pub fn into_error(self) -> SyncError {
        match self {
            AbortReason::NotAuthenticated => SyncError::NotAuthenticated,
            AbortReason::NotDue => SyncError::NotDue,
            AbortReason::PermissionDenied => SyncError::PermissionDenied,
            AbortReason::NothingToSync => SyncError::NothingToSync,
            AbortReason::Failed(e) => e,
        }
    }
}

/// Result of one pass.
#[derive(Debug)]
pub enum SyncOutcome {
    Committed(SyncResult),
    Aborted {
        /// Last phase reached before aborting.
        phase: SyncPhase,
        reason: AbortReason,
    },
}

impl SyncOutcome {
    pub fn is_committed(&self) -> bool {
        matches!(self, SyncOutcome::Committed(_))
    }
}

/// Observable state for UI layers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncSnapshot {
    pub phase: SyncPhase,
    pub last_result: Option<SyncResult>,
    pub last_error: Option<String>,
    pub last_synced_at: Option<DateTime<Utc>>,
    /// Encouragement for the points earned by the last committed pass.
    pub message: Option<String>,
    /// Steps still needed today for the next point, if today was synced.
    pub steps_to_next_point: Option<u64>,
}

/// Tunables for a pass.
#[derive(Debug, Clone, Copy)]
pub struct SyncSettings {
    pub lookback_days: u32,
    pub calculator: PointCalculator,
}

/// Orchestrates sync passes.
pub struct StepSyncService {
    store: Arc<CredentialStore>,
    health: Arc<dyn HealthDataSource>,
    api: Arc<ResilientApiClient>,
    settings: SyncSettings,
    state: watch::Sender<SyncSnapshot>,
}

impl StepSyncService {
    pub fn new(
        store: Arc<CredentialStore>,
        health: Arc<dyn HealthDataSource>,
        api: Arc<ResilientApiClient>,
        settings: SyncSettings,
    ) -> Self {
        let (state, _) = watch::channel(SyncSnapshot {
            phase: SyncPhase::Idle,
            last_result: None,
            last_error: None,
            last_synced_at: store.last_sync_time(),
            message: None,
            steps_to_next_point: None,
        });

        Self {
            store,
            health,
            api,
            settings,
            state,
        }
    }

    /// Watch phase changes and results.
    pub fn subscribe(&self) -> watch::Receiver<SyncSnapshot> {
        self.state.subscribe()
    }

    pub fn snapshot(&self) -> SyncSnapshot {
        self.state.borrow().clone()
    }

    /// Run one pass for `trigger`. Never panics and never returns an error;
    /// failures are reported in the outcome.
    pub async fn run(&self, trigger: SyncTrigger) -> SyncOutcome {
        self.run_for_day(trigger, Local::now().date_naive()).await
    }

    /// Same as [`run`](Self::run) with an explicit "today".
    pub async fn run_for_day(&self, trigger: SyncTrigger, today: NaiveDate) -> SyncOutcome {
        // ─── Checking ────────────────────────────────────────────
        self.set_phase(SyncPhase::Checking);
        let started = Utc::now();

        // Pick up tokens and checkpoints written by another context.
        if let Err(e) = self.store.reload() {
            tracing::warn!(error = %e, "Failed to reload credential store, using cached state");
        }

        if !self.store.is_authenticated() {
            return self.abort(SyncPhase::Checking, AbortReason::NotAuthenticated);
        }
        if trigger == SyncTrigger::Scheduled {
            let slack = self.store.sync_interval() / DUE_SLACK_DIVISOR;
            let due_by = started.checked_add_signed(slack).unwrap_or(started);
            if !self.store.should_sync_at(due_by) {
                return self.abort(SyncPhase::Checking, AbortReason::NotDue);
            }
        }

        // ─── Fetching ────────────────────────────────────────────
        self.set_phase(SyncPhase::Fetching);

        if !self.health.request_permission().await {
            return self.abort(SyncPhase::Fetching, AbortReason::PermissionDenied);
        }

        let start = time_utils::window_start(today, self.settings.lookback_days);
        let raw = self.health.steps_for_range(start, today).await;

        // ─── Transforming ────────────────────────────────────────
        self.set_phase(SyncPhase::Transforming);

        let source = match trigger {
            SyncTrigger::Scheduled => StepSource::Background,
            SyncTrigger::UserInitiated => self.health.source(),
        };
        let entries = build_entries(&raw, start, today, source, &self.settings.calculator);
        if entries.is_empty() {
            return self.abort(SyncPhase::Transforming, AbortReason::NothingToSync);
        }

        let calculator = &self.settings.calculator;
        let (estimated_points, estimated_bonus) =
            entries.iter().fold((0u64, 0u64), |(points, bonus), e| {
                (
                    points + calculator.points(e.steps()),
                    bonus + calculator.bonus_points(e.steps(), time_utils::is_weekend(e.date())),
                )
            });
        tracing::info!(
            days = entries.len(),
            estimated_points,
            estimated_bonus,
            source = %source,
            from = %time_utils::format_day(start),
            to = %time_utils::format_day(today),
            "Prepared step batch"
        );

        // ─── Pushing ─────────────────────────────────────────────
        self.set_phase(SyncPhase::Pushing);

        let result = match self.api.sync_steps(&entries).await {
            Ok(result) => result,
            Err(e) => return self.abort(SyncPhase::Pushing, AbortReason::Failed(e)),
        };

        // ─── Committed ───────────────────────────────────────────
        if let Err(e) = self.store.save_last_sync_time(started) {
            // The server accepted the batch; resending it later is harmless.
            tracing::error!(error = %e, "Failed to persist sync checkpoint");
        }

        tracing::info!(
            synced_count = result.synced_count,
            total_points_earned = result.total_points_earned,
            last_sync = %time_utils::format_utc_rfc3339(started),
            "Step sync committed"
        );

        let message = PointCalculator::contribution_message(result.total_points_earned);
        let steps_to_next_point = entries
            .iter()
            .find(|e| e.date() == today)
            .map(|e| calculator.steps_for_next_point(e.steps()));
        self.state.send_modify(|s| {
            s.phase = SyncPhase::Committed;
            s.last_result = Some(result.clone());
            s.last_error = None;
            s.last_synced_at = Some(started);
            s.message = Some(message);
            s.steps_to_next_point = steps_to_next_point;
        });

        SyncOutcome::Committed(result)
    }

    /// Foreground sync: bypasses the interval and surfaces errors.
    pub async fn sync_now(&self) -> Result<SyncResult> {
        match self.run(SyncTrigger::UserInitiated).await {
            SyncOutcome::Committed(result) => Ok(result),
            SyncOutcome::Aborted { reason, .. } => Err(reason.into_error()),
        }
    }

    /// Background sync: logs failures and reports whether the scheduler
    /// should retry.
    pub async fn run_background(&self) -> TaskOutcome {
        task_outcome(self.run(SyncTrigger::Scheduled).await)
    }

    /// Register the background and manual sync handlers.
    pub fn register_tasks(self: &Arc<Self>, registry: &TaskRegistry) {
        let service = Arc::clone(self);
        registry.register(BACKGROUND_SYNC_TASK, move |_ctx| {
            let service = Arc::clone(&service);
            async move { service.run_background().await }
        });

        let service = Arc::clone(self);
        registry.register(MANUAL_SYNC_TASK, move |_ctx| {
            let service = Arc::clone(&service);
            async move { task_outcome(service.run(SyncTrigger::UserInitiated).await) }
        });
    }

    fn set_phase(&self, phase: SyncPhase) {
        tracing::debug!(?phase, "Sync phase");
        self.state.send_modify(|s| s.phase = phase);
    }

    fn abort(&self, phase: SyncPhase, reason: AbortReason) -> SyncOutcome {
        match &reason {
            AbortReason::NotDue => tracing::debug!(?phase, "Sync not due, skipping"),
            AbortReason::Failed(e) => {
                tracing::warn!(?phase, error = %e, "Sync aborted, checkpoint unchanged")
            }
            other => tracing::info!(?phase, reason = ?other, "Sync aborted"),
        }

        let message = match &reason {
            AbortReason::NotDue => None,
            AbortReason::NotAuthenticated => Some(SyncError::NotAuthenticated.user_message()),
            AbortReason::PermissionDenied => Some(SyncError::PermissionDenied.user_message()),
            AbortReason::NothingToSync => Some(SyncError::NothingToSync.user_message()),
            AbortReason::Failed(e) => Some(e.user_message()),
        };
        self.state.send_modify(|s| {
            s.phase = SyncPhase::Aborted;
            if message.is_some() {
                s.last_error = message;
            }
        });

        SyncOutcome::Aborted { phase, reason }
    }
}

/// Scheduler verdict for a finished pass.
fn task_outcome(outcome: SyncOutcome) -> TaskOutcome {
    match outcome {
        SyncOutcome::Committed(_) => TaskOutcome::Success,
        SyncOutcome::Aborted { reason, .. } => match reason {
            // Nothing to retry until the next interval.
            AbortReason::NotDue
            | AbortReason::PermissionDenied
            | AbortReason::NothingToSync
            | AbortReason::NotAuthenticated => TaskOutcome::Success,
            AbortReason::Failed(e) if e.is_transient() => TaskOutcome::Retry,
            AbortReason::Failed(_) => TaskOutcome::Failure,
        },
    }
}

/// One clamped entry per available day in `[start, end]`, oldest first.
pub fn build_entries(
    raw: &DailySteps,
    start: NaiveDate,
    end: NaiveDate,
    source: StepSource,
    calculator: &PointCalculator,
) -> Vec<StepLogEntry> {
    time_utils::days_inclusive(start, end)
        .filter_map(|day| {
            let steps = *raw.get(&day)?;
            if !calculator.within_daily_limit(steps) {
                tracing::warn!(
                    date = %time_utils::format_day(day),
                    steps,
                    "Clamping implausible daily step count"
                );
            }
            Some(StepLogEntry::new(day, calculator.clamp(steps), source))
        })
        .collect()
}
