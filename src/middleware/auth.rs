// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Bearer credential attachment and access token inspection.

use super::{Middleware, Next};
use crate::db::CredentialStore;
use crate::error::Result;
use crate::services::transport::{ApiRequest, ApiResponse};
use chrono::{DateTime, Utc};
use futures_util::future::BoxFuture;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::Deserialize;
use std::sync::Arc;

/// The only claim we need from the server's access tokens.
#[derive(Debug, Deserialize)]
struct ExpiryClaims {
    /// Expiration time (Unix timestamp)
    exp: i64,
}

/// Read the `exp` claim of a JWT access token without verifying it.
///
/// The client never holds the signing key; the server still verifies every
/// token. Returns `None` for opaque (non-JWT) tokens.
pub fn access_token_expiry(token: &str) -> Option<DateTime<Utc>> {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.insecure_disable_signature_validation();
    validation.validate_exp = false;
    validation.required_spec_claims.clear();

    let data = decode::<ExpiryClaims>(token, &DecodingKey::from_secret(&[]), &validation).ok()?;
    DateTime::from_timestamp(data.claims.exp, 0)
}

/// True when `token` is a JWT that expires within `margin` of `now`.
pub fn expires_within(token: &str, margin: chrono::Duration, now: DateTime<Utc>) -> bool {
    access_token_expiry(token).is_some_and(|exp| now + margin >= exp)
}

/// Attaches the stored access token as a bearer credential.
pub struct AuthAttach {
    store: Arc<CredentialStore>,
}

impl AuthAttach {
    pub fn new(store: Arc<CredentialStore>) -> Self {
        Self { store }
    }
}

impl Middleware for AuthAttach {
    fn handle<'a>(
        &'a self,
        mut request: ApiRequest,
        next: Next<'a>,
    ) -> BoxFuture<'a, Result<ApiResponse>> {
        Box::pin(async move {
            if let Some(token) = self.store.access_token() {
                request.set_bearer(&token)?;
            }
            next.run(request).await
        })
    }
}
