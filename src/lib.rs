// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Step Sync: turn daily step counts into club points
//!
//! This crate reads per-day step totals from a health data source, pushes
//! them to the club points API and schedules the sync in the background.
//! The API client refreshes expired sessions exactly once no matter how
//! many requests fail at the same time.

pub mod config;
pub mod db;
pub mod error;
pub mod middleware;
pub mod models;
pub mod services;
pub mod time_utils;

use config::Config;
use db::CredentialStore;
use error::Result;
use services::scheduler::{BackoffPolicy, DeviceConditions, TaskConstraints, TaskRequest};
use services::sync::{BACKGROUND_SYNC_TASK, MANUAL_SYNC_TASK};
use services::{
    HealthDataSource, PointCalculator, ResilientApiClient, StepSyncService, SyncScheduler,
    SyncSettings, TaskRegistry,
};
use std::sync::Arc;

/// Identity of the recurring background sync.
pub const PERIODIC_SYNC_ID: &str = "step-sync.periodic";
/// Identity of an on-demand sync queued in the background.
pub const ONE_OFF_SYNC_ID: &str = "step-sync.now";

/// Shared application state.
pub struct AppState {
    pub config: Config,
    pub store: Arc<CredentialStore>,
    pub api: Arc<ResilientApiClient>,
    pub sync_service: Arc<StepSyncService>,
    pub registry: Arc<TaskRegistry>,
    pub scheduler: SyncScheduler,
}

impl AppState {
    /// Wire the API client, sync service and scheduler together.
    pub fn new(
        config: Config,
        store: Arc<CredentialStore>,
        health: Arc<dyn HealthDataSource>,
        conditions: Arc<dyn DeviceConditions>,
    ) -> Result<Self> {
        let api = Arc::new(ResilientApiClient::new(&config, Arc::clone(&store))?);
        Ok(Self::with_client(config, store, health, conditions, api))
    }

    /// Same as [`new`](Self::new) over an existing API client.
    pub fn with_client(
        config: Config,
        store: Arc<CredentialStore>,
        health: Arc<dyn HealthDataSource>,
        conditions: Arc<dyn DeviceConditions>,
        api: Arc<ResilientApiClient>,
    ) -> Self {
        let settings = SyncSettings {
            lookback_days: config.lookback_days,
            calculator: PointCalculator::new(config.steps_to_points_ratio, config.max_daily_steps),
        };
        let sync_service = Arc::new(StepSyncService::new(
            Arc::clone(&store),
            health,
            Arc::clone(&api),
            settings,
        ));

        let registry = Arc::new(TaskRegistry::new());
        sync_service.register_tasks(&registry);

        let backoff = BackoffPolicy {
            initial: config.task_backoff_initial,
            max: config.task_backoff_max,
            max_attempts: config.task_max_attempts,
        };
        let scheduler = SyncScheduler::new(Arc::clone(&registry), conditions, backoff);

        Self {
            config,
            store,
            api,
            sync_service,
            registry,
            scheduler,
        }
    }

    /// Schedule the recurring background sync. Safe to call repeatedly.
    pub fn start(&self) -> bool {
        let request = TaskRequest::new(PERIODIC_SYNC_ID, BACKGROUND_SYNC_TASK)
            .with_constraints(TaskConstraints::default());
        self.scheduler
            .register_periodic(request, self.config.sync_interval)
    }

    /// Queue a user-initiated sync on the scheduler instead of awaiting it.
    pub fn sync_now_in_background(&self) -> bool {
        let request = TaskRequest::new(ONE_OFF_SYNC_ID, MANUAL_SYNC_TASK)
            .with_constraints(TaskConstraints {
                requires_network: true,
                requires_battery_not_low: false,
            });
        self.scheduler.register_one_off(request)
    }

    /// Cancel every scheduled task and wait for a sync in progress to
    /// commit.
    pub async fn shutdown(&self) {
        self.scheduler.shutdown().await;
    }
}
