// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Data models for the sync pipeline and its wire contract.

pub mod credentials;
pub mod step_log;

pub use credentials::{Credentials, RefreshRequest, RefreshResponse, SyncCheckpoint};
pub use step_log::{StepLogEntry, StepLogRecord, StepSource, SyncRequest, SyncResult};
