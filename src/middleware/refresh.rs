// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Access token refresh on 401, shared across concurrent requests.
//!
//! Handles:
//! - Single-flight refresh: concurrent 401s for the same stale token await
//!   one shared refresh instead of each spending the refresh token
//! - Proactive refresh of JWT access tokens that are about to expire
//! - Forced logout (credentials cleared) when the refresh is rejected
//!
//! The refresh call goes through its own transport, never through the
//! middleware chain, so a 401 from `/auth/refresh` cannot recurse.

use super::auth::expires_within;
use super::{Middleware, Next};
use crate::db::CredentialStore;
use crate::error::{Result, SyncError};
use crate::models::{Credentials, RefreshRequest, RefreshResponse};
use crate::services::transport::{ApiRequest, ApiResponse, Transport};
use chrono::Utc;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures_util::future::{BoxFuture, FutureExt, Shared};
use reqwest::StatusCode;
use std::sync::Arc;

/// Path of the token refresh endpoint, relative to the API base URL.
pub const REFRESH_PATH: &str = "/auth/refresh";

/// Why a refresh did not produce a new access token.
#[derive(Debug, Clone)]
pub struct RefreshRejected(pub String);

type RefreshOutcome = std::result::Result<String, RefreshRejected>;

/// In-flight refresh shared by every caller that saw the same stale token.
type SharedRefresh = Shared<BoxFuture<'static, RefreshOutcome>>;

/// Coordinates token refreshes so only one runs per stale access token.
pub struct TokenRefresher {
    store: Arc<CredentialStore>,
    /// Un-intercepted transport dedicated to the refresh endpoint.
    transport: Arc<dyn Transport>,
    /// In-flight refreshes keyed by the access token that was rejected.
    in_flight: Arc<DashMap<String, SharedRefresh>>,
}

impl TokenRefresher {
    pub fn new(store: Arc<CredentialStore>, transport: Arc<dyn Transport>) -> Self {
        Self {
            store,
            transport,
            in_flight: Arc::new(DashMap::new()),
        }
    }

    /// Get an access token to replace `stale_token`.
    ///
    /// 1. Join a refresh already running for `stale_token`, or
    /// 2. reload the store and reuse its token if another caller (here or in
    ///    another process) already replaced it, or
    /// 3. start a new refresh that later callers can join.
    ///
    /// Steps 2 and 3 run under the map's entry lock, and a finished refresh
    /// persists its tokens before leaving the map, so a late caller always
    /// sees one or the other.
    pub async fn refresh(&self, stale_token: &str) -> Result<String> {
        let shared = match self.in_flight.entry(stale_token.to_string()) {
            Entry::Occupied(entry) => {
                tracing::debug!("Joining in-flight token refresh");
                entry.get().clone()
            }
            Entry::Vacant(entry) => {
                // Another process may have rotated the session already.
                if let Err(e) = self.store.reload() {
                    tracing::warn!(error = %e, "Failed to reload credential store before refresh");
                }

                match self.store.access_token() {
                    Some(current) if current != stale_token => {
                        tracing::debug!("Access token already refreshed by another request");
                        return Ok(current);
                    }
                    None if !stale_token.is_empty() => {
                        // Another request's refresh failed and logged us out.
                        return Err(SyncError::AuthRevoked);
                    }
                    _ => {}
                }

                let refresh = perform_refresh(
                    Arc::clone(&self.store),
                    Arc::clone(&self.transport),
                    Arc::clone(&self.in_flight),
                    stale_token.to_string(),
                )
                .boxed()
                .shared();
                entry.insert(refresh.clone());
                refresh
            }
        };

        shared.await.map_err(|RefreshRejected(reason)| {
            tracing::warn!(reason = %reason, "Token refresh rejected");
            SyncError::AuthRevoked
        })
    }

    /// Number of refreshes currently running.
    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }
}

/// Exchange the refresh token, persist the result, then leave the map.
async fn perform_refresh(
    store: Arc<CredentialStore>,
    transport: Arc<dyn Transport>,
    in_flight: Arc<DashMap<String, SharedRefresh>>,
    key: String,
) -> RefreshOutcome {
    let outcome = exchange_refresh_token(&store, transport.as_ref()).await;

    match &outcome {
        Ok(_) => tracing::info!("Access token refreshed"),
        Err(RefreshRejected(reason)) => {
            tracing::warn!(reason = %reason, "Refresh failed, clearing credentials");
            if let Err(e) = store.clear_all() {
                tracing::error!(error = %e, "Failed to clear credentials after refresh failure");
            }
        }
    }

    in_flight.remove(&key);
    outcome
}

async fn exchange_refresh_token(
    store: &CredentialStore,
    transport: &dyn Transport,
) -> RefreshOutcome {
    let refresh_token = store
        .refresh_token()
        .ok_or_else(|| RefreshRejected("no refresh token stored".to_string()))?;

    let request = ApiRequest::post_json(
        REFRESH_PATH,
        &RefreshRequest {
            refresh_token: &refresh_token,
        },
    )
    .map_err(|e| RefreshRejected(e.to_string()))?;

    let response = transport
        .send(request)
        .await
        .map_err(|e| RefreshRejected(format!("refresh request failed: {}", e)))?;

    if !response.status.is_success() {
        return Err(RefreshRejected(format!(
            "refresh endpoint returned HTTP {}",
            response.status.as_u16()
        )));
    }

    let tokens: RefreshResponse = response
        .json()
        .map_err(|e| RefreshRejected(e.to_string()))?;

    let credentials = Credentials {
        access_token: tokens.access_token,
        refresh_token: tokens.refresh_token.unwrap_or(refresh_token),
    };
    store
        .save_credentials(&credentials)
        .map_err(|e| RefreshRejected(e.to_string()))?;

    Ok(credentials.access_token)
}

/// Refreshes the access token on 401 and resubmits the request once.
pub struct AuthRefresh {
    refresher: Arc<TokenRefresher>,
    margin: chrono::Duration,
}

impl AuthRefresh {
    pub fn new(refresher: Arc<TokenRefresher>, margin: std::time::Duration) -> Self {
        Self {
            refresher,
            margin: chrono::Duration::from_std(margin).unwrap_or(chrono::Duration::zero()),
        }
    }
}

impl Middleware for AuthRefresh {
    fn handle<'a>(
        &'a self,
        mut request: ApiRequest,
        next: Next<'a>,
    ) -> BoxFuture<'a, Result<ApiResponse>> {
        Box::pin(async move {
            // Proactive path: don't send a token we already know is expiring.
            if let Some(token) = request.bearer().map(str::to_string) {
                if expires_within(&token, self.margin, Utc::now()) {
                    tracing::info!("Access token expiring soon, refreshing before request");
                    let fresh = self.refresher.refresh(&token).await?;
                    request.set_bearer(&fresh)?;
                }
            }

            let stale = request.bearer().unwrap_or_default().to_string();
            let resubmit = request.clone();

            let response = next.run(request).await?;
            if response.status != StatusCode::UNAUTHORIZED {
                return Ok(response);
            }

            tracing::info!(path = %resubmit.path, "Received 401, refreshing access token");
            let fresh = self.refresher.refresh(&stale).await?;

            let mut resubmit = resubmit;
            resubmit.set_bearer(&fresh)?;
            next.transport().send(resubmit).await
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::middleware::auth::tests::jwt_expiring_at;
    use crate::middleware::AuthAttach;
    use crate::services::transport::scripted::{ScriptedTransport, Step};
    use reqwest::Method;
    use std::time::Duration;

    const HOUR: Duration = Duration::from_secs(3600);

    fn store_with(access: &str, refresh: &str) -> Arc<CredentialStore> {
        let store = Arc::new(CredentialStore::in_memory(HOUR));
        store
            .save_credentials(&Credentials {
                access_token: access.to_string(),
                refresh_token: refresh.to_string(),
            })
            .unwrap();
        store
    }

    fn chain(store: &Arc<CredentialStore>, refresh: Arc<ScriptedTransport>) -> Vec<Arc<dyn Middleware>> {
        let refresher = Arc::new(TokenRefresher::new(Arc::clone(store), refresh));
        vec![
            Arc::new(AuthAttach::new(Arc::clone(store))),
            Arc::new(AuthRefresh::new(refresher, Duration::from_secs(300))),
        ]
    }

    #[tokio::test]
    async fn refreshes_and_resubmits_once_on_401() {
        let store = store_with("old-access", "old-refresh");
        let api = ScriptedTransport::new([Step::Respond(401, ""), Step::Respond(200, "{}")]);
        let refresh = Arc::new(ScriptedTransport::new([Step::Respond(
            200,
            r#"{"access_token": "new-access", "refresh_token": "new-refresh"}"#,
        )]));
        let chain = chain(&store, Arc::clone(&refresh));

        let response = Next::new(&api, &chain)
            .run(ApiRequest::new(Method::POST, "/steps/sync"))
            .await
            .unwrap();

        assert_eq!(response.status, StatusCode::OK);
        assert_eq!(api.calls(), 2);
        assert_eq!(api.bearer_at(0).as_deref(), Some("old-access"));
        assert_eq!(api.bearer_at(1).as_deref(), Some("new-access"));
        assert_eq!(refresh.calls(), 1);
        assert_eq!(store.access_token().as_deref(), Some("new-access"));
        assert_eq!(store.refresh_token().as_deref(), Some("new-refresh"));
    }

    #[tokio::test]
    async fn keeps_refresh_token_when_not_rotated() {
        let store = store_with("old-access", "keep-me");
        let api = ScriptedTransport::new([Step::Respond(401, ""), Step::Respond(200, "{}")]);
        let refresh = Arc::new(ScriptedTransport::new([Step::Respond(
            200,
            r#"{"access_token": "new-access"}"#,
        )]));
        let chain = chain(&store, refresh);

        Next::new(&api, &chain)
            .run(ApiRequest::new(Method::GET, "/users/me"))
            .await
            .unwrap();

        assert_eq!(store.refresh_token().as_deref(), Some("keep-me"));
    }

    #[tokio::test]
    async fn second_401_after_refresh_is_returned_not_looped() {
        let store = store_with("old-access", "old-refresh");
        let api = ScriptedTransport::new([Step::Respond(401, ""), Step::Respond(401, "")]);
        let refresh = Arc::new(ScriptedTransport::new([Step::Respond(
            200,
            r#"{"access_token": "new-access"}"#,
        )]));
        let chain = chain(&store, Arc::clone(&refresh));

        let response = Next::new(&api, &chain)
            .run(ApiRequest::new(Method::GET, "/users/me"))
            .await
            .unwrap();

        assert_eq!(response.status, StatusCode::UNAUTHORIZED);
        assert_eq!(api.calls(), 2);
        assert_eq!(refresh.calls(), 1);
    }

    #[tokio::test]
    async fn rejected_refresh_clears_credentials() {
        let store = store_with("old-access", "bad-refresh");
        store.save_last_sync_time(Utc::now()).unwrap();
        let api = ScriptedTransport::new([Step::Respond(401, "")]);
        let refresh = Arc::new(ScriptedTransport::new([Step::Respond(401, "")]));
        let chain = chain(&store, refresh);

        let err = Next::new(&api, &chain)
            .run(ApiRequest::new(Method::POST, "/steps/sync"))
            .await
            .unwrap_err();

        assert!(matches!(err, SyncError::AuthRevoked));
        assert_eq!(api.calls(), 1);
        assert!(store.access_token().is_none());
        assert!(store.refresh_token().is_none());
    }

    #[tokio::test]
    async fn missing_refresh_token_clears_credentials() {
        let store = Arc::new(CredentialStore::in_memory(HOUR));
        store.save_access_token("only-access").unwrap();
        let api = ScriptedTransport::new([Step::Respond(401, "")]);
        let refresh = Arc::new(ScriptedTransport::default());
        let chain = chain(&store, Arc::clone(&refresh));

        let err = Next::new(&api, &chain)
            .run(ApiRequest::new(Method::GET, "/users/me"))
            .await
            .unwrap_err();

        assert!(matches!(err, SyncError::AuthRevoked));
        assert_eq!(refresh.calls(), 0);
        assert!(!store.is_authenticated());
    }

    #[tokio::test]
    async fn proactively_refreshes_expiring_jwt() {
        let expiring = jwt_expiring_at(Utc::now() + chrono::Duration::seconds(30));
        let store = store_with(&expiring, "old-refresh");
        let api = ScriptedTransport::new([Step::Respond(200, "{}")]);
        let refresh = Arc::new(ScriptedTransport::new([Step::Respond(
            200,
            r#"{"access_token": "fresh-access"}"#,
        )]));
        let chain = chain(&store, Arc::clone(&refresh));

        Next::new(&api, &chain)
            .run(ApiRequest::new(Method::GET, "/users/me"))
            .await
            .unwrap();

        assert_eq!(refresh.calls(), 1);
        assert_eq!(api.calls(), 1);
        assert_eq!(api.bearer_at(0).as_deref(), Some("fresh-access"));
    }

    #[tokio::test]
    async fn reuses_token_refreshed_by_someone_else() {
        let store = store_with("newer-access", "refresh");
        let refresh = Arc::new(ScriptedTransport::default());
        let refresher = TokenRefresher::new(Arc::clone(&store), Arc::clone(&refresh) as Arc<dyn Transport>);

        let token = refresher.refresh("stale-access").await.unwrap();

        assert_eq!(token, "newer-access");
        assert_eq!(refresh.calls(), 0);
        assert_eq!(refresher.in_flight(), 0);
    }
}
