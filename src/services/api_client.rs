// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Club points API client.
//!
//! Every outbound call goes through one fixed middleware chain:
//! 1. `AuthAttach` - attach the stored access token
//! 2. `RequestLogging`
//! 3. `AuthRefresh` - single-flight refresh and one resubmit on 401
//! 4. `TransientRetry` - one resubmit on timeout/connectivity/5xx
//!
//! The refresh endpoint is called through a second transport that has no
//! middleware at all.

use crate::config::Config;
use crate::db::CredentialStore;
use crate::error::{Result, SyncError};
use crate::middleware::{
    AuthAttach, AuthRefresh, Middleware, Next, RequestLogging, TokenRefresher, TransientRetry,
};
use crate::models::{StepLogEntry, SyncRequest, SyncResult};
use crate::services::transport::{ApiRequest, ApiResponse, ReqwestTransport, Transport};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

/// Path of the step sync endpoint, relative to the API base URL.
pub const SYNC_PATH: &str = "/steps/sync";

/// Resilient client for the club points API.
pub struct ResilientApiClient {
    transport: Arc<dyn Transport>,
    chain: Vec<Arc<dyn Middleware>>,
    refresher: Arc<TokenRefresher>,
    store: Arc<CredentialStore>,
}

impl ResilientApiClient {
    /// Create a client talking to `config.api_base_url` over HTTP.
    pub fn new(config: &Config, store: Arc<CredentialStore>) -> Result<Self> {
        let transport = ReqwestTransport::new(&config.api_base_url, config.request_timeout)?;
        // Separate instance (and connection pool) for refresh calls.
        let refresh_transport = ReqwestTransport::new(&config.api_base_url, config.request_timeout)?;

        Ok(Self::with_transports(
            store,
            Arc::new(transport),
            Arc::new(refresh_transport),
            config.token_refresh_margin,
        ))
    }

    /// Create a client over caller-provided transports.
    pub fn with_transports(
        store: Arc<CredentialStore>,
        transport: Arc<dyn Transport>,
        refresh_transport: Arc<dyn Transport>,
        refresh_margin: Duration,
    ) -> Self {
        let refresher = Arc::new(TokenRefresher::new(Arc::clone(&store), refresh_transport));

        let chain: Vec<Arc<dyn Middleware>> = vec![
            Arc::new(AuthAttach::new(Arc::clone(&store))),
            Arc::new(RequestLogging),
            Arc::new(AuthRefresh::new(Arc::clone(&refresher), refresh_margin)),
            Arc::new(TransientRetry),
        ];

        Self {
            transport,
            chain,
            refresher,
            store,
        }
    }

    /// Send a request through the chain and map the final status to an error.
    pub async fn send(&self, request: ApiRequest) -> Result<ApiResponse> {
        let response = Next::new(self.transport.as_ref(), &self.chain)
            .run(request)
            .await?;
        check_response(response)
    }

    /// POST a JSON body and parse a JSON response.
    pub async fn post_json<B: Serialize, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T> {
        let request = ApiRequest::post_json(path, body)?;
        self.send(request).await?.json()
    }

    /// Push a batch of per-day step totals.
    pub async fn sync_steps(&self, entries: &[StepLogEntry]) -> Result<SyncResult> {
        self.post_json(SYNC_PATH, &SyncRequest { steps: entries })
            .await
    }

    /// Drop the local session (logout).
    pub fn logout(&self) -> Result<()> {
        self.store.clear_all()
    }

    pub fn refresher(&self) -> &TokenRefresher {
        &self.refresher
    }
}

/// Map a completed response onto the error taxonomy.
fn check_response(response: ApiResponse) -> Result<ApiResponse> {
    let status = response.status;
    if status.is_success() {
        return Ok(response);
    }

    // Refresh was already attempted by the chain.
    if status == StatusCode::UNAUTHORIZED {
        return Err(SyncError::AuthExpired);
    }

    if status.is_server_error() {
        return Err(SyncError::ServerUnavailable {
            status: status.as_u16(),
        });
    }

    if status == StatusCode::TOO_MANY_REQUESTS {
        tracing::warn!("API rate limit hit (429)");
    }

    Err(SyncError::rejected(status.as_u16(), &response.body))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Credentials, StepSource};
    use crate::services::transport::scripted::{ScriptedTransport, Step};
    use chrono::NaiveDate;

    const HOUR: Duration = Duration::from_secs(3600);

    fn client(api: Arc<ScriptedTransport>, refresh: Arc<ScriptedTransport>) -> ResilientApiClient {
        let store = Arc::new(CredentialStore::in_memory(HOUR));
        store
            .save_credentials(&Credentials {
                access_token: "access".to_string(),
                refresh_token: "refresh".to_string(),
            })
            .unwrap();
        ResilientApiClient::with_transports(store, api, refresh, Duration::from_secs(300))
    }

    fn one_entry() -> Vec<StepLogEntry> {
        vec![StepLogEntry::new(
            NaiveDate::from_ymd_opt(2026, 10, 18).unwrap(),
            8543,
            StepSource::HealthKit,
        )]
    }

    #[tokio::test]
    async fn sync_steps_parses_result() {
        let api = Arc::new(ScriptedTransport::new([Step::Respond(
            200,
            r#"{"synced_count": 1, "total_points_earned": 8, "step_logs": [{"date": "2026-10-18", "steps": 8543, "points": 8}]}"#,
        )]));
        let client = client(Arc::clone(&api), Arc::new(ScriptedTransport::default()));

        let result = client.sync_steps(&one_entry()).await.unwrap();

        assert_eq!(result.synced_count, 1);
        assert_eq!(result.total_points_earned, 8);
        assert_eq!(result.step_logs[0].points, 8);

        let seen = api.seen.lock().unwrap();
        assert_eq!(seen[0].path, SYNC_PATH);
        assert_eq!(seen[0].bearer(), Some("access"));
        assert_eq!(
            seen[0].body.as_ref().unwrap()["steps"][0]["source"],
            "healthkit"
        );
    }

    #[tokio::test]
    async fn business_errors_surface_as_rejected() {
        let api = Arc::new(ScriptedTransport::new([Step::Respond(
            400,
            r#"{"detail": "Invalid steps count: -5"}"#,
        )]));
        let client = client(Arc::clone(&api), Arc::new(ScriptedTransport::default()));

        let err = client.sync_steps(&one_entry()).await.unwrap_err();

        match err {
            SyncError::ServerRejected { status, message } => {
                assert_eq!(status, 400);
                assert_eq!(message, "Invalid steps count: -5");
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(api.calls(), 1);
    }

    #[tokio::test]
    async fn persistent_server_error_is_unavailable() {
        let api = Arc::new(ScriptedTransport::new([
            Step::Respond(500, ""),
            Step::Respond(500, ""),
        ]));
        let client = client(Arc::clone(&api), Arc::new(ScriptedTransport::default()));

        let err = client.sync_steps(&one_entry()).await.unwrap_err();

        assert!(matches!(err, SyncError::ServerUnavailable { status: 500 }));
        assert!(err.is_transient());
        assert_eq!(api.calls(), 2);
    }

    #[tokio::test]
    async fn timeout_then_401_then_refresh() {
        let api = Arc::new(ScriptedTransport::new([
            Step::Timeout,
            Step::Respond(401, ""),
            Step::Respond(200, r#"{"synced_count": 1, "total_points_earned": 8}"#),
        ]));
        let refresh = Arc::new(ScriptedTransport::new([Step::Respond(
            200,
            r#"{"access_token": "access-2"}"#,
        )]));
        let client = client(Arc::clone(&api), Arc::clone(&refresh));

        let result = client.sync_steps(&one_entry()).await.unwrap();

        assert_eq!(result.total_points_earned, 8);
        assert_eq!(api.calls(), 3);
        assert_eq!(refresh.calls(), 1);
        assert_eq!(api.bearer_at(2).as_deref(), Some("access-2"));
    }

    #[tokio::test]
    async fn logout_clears_store() {
        let client = client(
            Arc::new(ScriptedTransport::default()),
            Arc::new(ScriptedTransport::default()),
        );
        client.logout().unwrap();
        assert!(!client.store.is_authenticated());
    }
}
