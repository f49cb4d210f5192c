// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Services module - sync pipeline and its collaborators.

pub mod api_client;
pub mod health;
pub mod points;
pub mod scheduler;
pub mod sync;
pub mod transport;

pub use api_client::ResilientApiClient;
pub use health::{
    DailySteps, ExportFileSource, HealthDataSource, HealthPlatform, PlatformHealthSource,
};
pub use points::PointCalculator;
pub use scheduler::{
    AlwaysAvailable, BackoffPolicy, DeviceConditions, SyncScheduler, TaskConstraints,
    TaskOutcome, TaskRegistry, TaskRequest,
};
pub use sync::{StepSyncService, SyncOutcome, SyncPhase, SyncSettings, SyncTrigger};
pub use transport::{ApiRequest, ApiResponse, ReqwestTransport, Transport};
