// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Shared fixtures: an in-process fake of the club points API and a
//! scriptable health data source.

#![allow(dead_code)]

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use chrono::NaiveDate;
use futures_util::future::BoxFuture;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use step_sync::config::Config;
use step_sync::db::CredentialStore;
use step_sync::models::{Credentials, StepSource};
use step_sync::services::{
    DailySteps, HealthDataSource, PointCalculator, ResilientApiClient, StepSyncService,
    SyncSettings,
};

pub const API_PREFIX: &str = "/api/v1";
pub const INITIAL_ACCESS: &str = "access-0";
pub const INITIAL_REFRESH: &str = "refresh-0";
pub const HOUR: Duration = Duration::from_secs(3600);

/// Server-side state of the fake API.
#[derive(Default)]
pub struct FakeApi {
    pub base_url: String,
    access_token: Mutex<String>,
    refresh_token: Mutex<String>,
    /// date -> (steps, source), upserted by date
    step_logs: Mutex<BTreeMap<String, (u64, Option<String>)>>,
    rotations: AtomicUsize,
    pub sync_calls: AtomicUsize,
    pub refresh_calls: AtomicUsize,
    /// Answer this many sync calls with HTTP 500.
    pub fail_syncs: AtomicUsize,
    pub refresh_delay_ms: AtomicU64,
    /// Hold every sync response this long before answering.
    pub sync_delay_ms: AtomicU64,
    pub reject_refresh: AtomicBool,
}

impl FakeApi {
    /// Start the fake on an ephemeral port.
    pub async fn start() -> Arc<Self> {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind fake API");
        let addr = listener.local_addr().expect("local addr");

        let api = Arc::new(FakeApi {
            base_url: format!("http://{}{}", addr, API_PREFIX),
            access_token: Mutex::new(INITIAL_ACCESS.to_string()),
            refresh_token: Mutex::new(INITIAL_REFRESH.to_string()),
            ..Default::default()
        });

        let app = Router::new()
            .route(&format!("{API_PREFIX}/steps/sync"), post(sync_steps))
            .route(&format!("{API_PREFIX}/auth/refresh"), post(refresh))
            .with_state(Arc::clone(&api));

        tokio::spawn(async move {
            axum::serve(listener, app).await.expect("fake API server");
        });

        api
    }

    /// Invalidate the current access token, as if it had expired.
    pub fn expire_access_token(&self) {
        *self.access_token.lock().unwrap() = "expired".to_string();
    }

    pub fn current_access_token(&self) -> String {
        self.access_token.lock().unwrap().clone()
    }

    pub fn stored_steps(&self, date: &str) -> Option<u64> {
        self.step_logs
            .lock()
            .unwrap()
            .get(date)
            .map(|(steps, _)| *steps)
    }

    pub fn stored_source(&self, date: &str) -> Option<String> {
        self.step_logs
            .lock()
            .unwrap()
            .get(date)
            .and_then(|(_, source)| source.clone())
    }

    pub fn stored_days(&self) -> usize {
        self.step_logs.lock().unwrap().len()
    }

    pub fn total_points(&self) -> u64 {
        self.step_logs
            .lock()
            .unwrap()
            .values()
            .map(|(steps, _)| steps / 1000)
            .sum()
    }
}

fn bearer(headers: &HeaderMap) -> Option<&str> {
    headers
        .get("authorization")?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
}

async fn sync_steps(
    State(api): State<Arc<FakeApi>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    api.sync_calls.fetch_add(1, Ordering::SeqCst);

    let delay = api.sync_delay_ms.load(Ordering::SeqCst);
    if delay > 0 {
        tokio::time::sleep(Duration::from_millis(delay)).await;
    }

    if bearer(&headers) != Some(api.current_access_token().as_str()) {
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({"detail": "Could not validate credentials"})),
        )
            .into_response();
    }

    if api
        .fail_syncs
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
    {
        return (StatusCode::INTERNAL_SERVER_ERROR, "boom").into_response();
    }

    let Some(entries) = body["steps"].as_array() else {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({"detail": "steps must be a list"})),
        )
            .into_response();
    };

    let mut logs = Vec::new();
    let mut total_points = 0;
    {
        let mut stored = api.step_logs.lock().unwrap();
        for entry in entries {
            let (Some(date), Some(steps)) = (entry["date"].as_str(), entry["steps"].as_u64()) else {
                return (
                    StatusCode::BAD_REQUEST,
                    Json(json!({"detail": "Invalid step log entry"})),
                )
                    .into_response();
            };
            let source = entry["source"].as_str().map(str::to_string);
            stored.insert(date.to_string(), (steps, source.clone()));

            let points = steps / 1000;
            total_points += points;
            logs.push(json!({"date": date, "steps": steps, "points": points, "source": source}));
        }
    }

    Json(json!({
        "synced_count": logs.len(),
        "total_points_earned": total_points,
        "step_logs": logs,
    }))
    .into_response()
}

async fn refresh(State(api): State<Arc<FakeApi>>, Json(body): Json<Value>) -> Response {
    api.refresh_calls.fetch_add(1, Ordering::SeqCst);

    let delay = api.refresh_delay_ms.load(Ordering::SeqCst);
    if delay > 0 {
        tokio::time::sleep(Duration::from_millis(delay)).await;
    }

    let presented = body["refresh_token"].as_str().unwrap_or_default().to_string();
    if api.reject_refresh.load(Ordering::SeqCst) || presented != *api.refresh_token.lock().unwrap()
    {
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({"detail": "Invalid refresh token"})),
        )
            .into_response();
    }

    let n = api.rotations.fetch_add(1, Ordering::SeqCst) + 1;
    let access = format!("access-{n}");
    let refresh = format!("refresh-{n}");
    *api.access_token.lock().unwrap() = access.clone();
    *api.refresh_token.lock().unwrap() = refresh.clone();

    Json(json!({"access_token": access, "refresh_token": refresh, "token_type": "bearer"}))
        .into_response()
}

/// Health source backed by a fixed map.
pub struct FakeHealth {
    pub granted: bool,
    pub days: Mutex<DailySteps>,
    pub range_reads: AtomicUsize,
}

impl FakeHealth {
    pub fn new(days: impl IntoIterator<Item = (NaiveDate, u64)>) -> Arc<Self> {
        Arc::new(Self {
            granted: true,
            days: Mutex::new(days.into_iter().collect()),
            range_reads: AtomicUsize::new(0),
        })
    }

    pub fn denied() -> Arc<Self> {
        Arc::new(Self {
            granted: false,
            days: Mutex::new(DailySteps::new()),
            range_reads: AtomicUsize::new(0),
        })
    }

    pub fn set(&self, date: NaiveDate, steps: u64) {
        self.days.lock().unwrap().insert(date, steps);
    }
}

impl HealthDataSource for FakeHealth {
    fn request_permission(&self) -> BoxFuture<'_, bool> {
        Box::pin(async move { self.granted })
    }

    fn steps_for_date(&self, date: NaiveDate) -> BoxFuture<'_, Option<u64>> {
        Box::pin(async move { self.days.lock().unwrap().get(&date).copied() })
    }

    fn steps_for_range(&self, start: NaiveDate, end: NaiveDate) -> BoxFuture<'_, DailySteps> {
        Box::pin(async move {
            self.range_reads.fetch_add(1, Ordering::SeqCst);
            self.days
                .lock()
                .unwrap()
                .range(start..=end)
                .map(|(d, s)| (*d, *s))
                .collect()
        })
    }

    fn source(&self) -> StepSource {
        StepSource::HealthKit
    }
}

pub fn test_config(api: &FakeApi) -> Config {
    Config {
        api_base_url: api.base_url.clone(),
        request_timeout: Duration::from_secs(5),
        ..Config::default()
    }
}

/// In-memory store holding the fake API's initial session.
pub fn logged_in_store() -> Arc<CredentialStore> {
    let store = Arc::new(CredentialStore::in_memory(HOUR));
    store
        .save_credentials(&Credentials {
            access_token: INITIAL_ACCESS.to_string(),
            refresh_token: INITIAL_REFRESH.to_string(),
        })
        .unwrap();
    store
}

pub fn client(api: &FakeApi, store: &Arc<CredentialStore>) -> Arc<ResilientApiClient> {
    Arc::new(ResilientApiClient::new(&test_config(api), Arc::clone(store)).unwrap())
}

pub fn sync_service(
    api: &FakeApi,
    store: &Arc<CredentialStore>,
    health: Arc<FakeHealth>,
) -> StepSyncService {
    let settings = SyncSettings {
        lookback_days: 7,
        calculator: PointCalculator::default(),
    };
    StepSyncService::new(Arc::clone(store), health, client(api, store), settings)
}

pub fn day(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}
