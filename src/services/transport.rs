// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Raw HTTP transport underneath the middleware chain.
//!
//! A transport sends exactly one request and reports any HTTP status as a
//! successful response; only failures to get a response at all (timeouts,
//! connectivity) become errors.

use crate::error::{Result, SyncError};
use futures_util::future::BoxFuture;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::Duration;

/// An outgoing API call, relative to the API base URL.
#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub method: Method,
    pub path: String,
    pub headers: HeaderMap,
    pub body: Option<serde_json::Value>,
}

impl ApiRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            headers: HeaderMap::new(),
            body: None,
        }
    }

    pub fn post_json<B: Serialize>(path: impl Into<String>, body: &B) -> Result<Self> {
        let body = serde_json::to_value(body)
            .map_err(|e| SyncError::Internal(anyhow::anyhow!("JSON error: {}", e)))?;
        Ok(Self {
            body: Some(body),
            ..Self::new(Method::POST, path)
        })
    }

    /// Set (or replace) the bearer credential.
    pub fn set_bearer(&mut self, token: &str) -> Result<()> {
        let value = HeaderValue::from_str(&format!("Bearer {}", token))
            .map_err(|e| SyncError::Internal(anyhow::anyhow!("Invalid token header: {}", e)))?;
        self.headers.insert(AUTHORIZATION, value);
        Ok(())
    }

    /// The bearer credential currently attached, if any.
    pub fn bearer(&self) -> Option<&str> {
        self.headers
            .get(AUTHORIZATION)
            .and_then(|h| h.to_str().ok())
            .and_then(|h| h.strip_prefix("Bearer "))
    }
}

/// Status and body of a completed HTTP exchange.
#[derive(Debug, Clone)]
pub struct ApiResponse {
    pub status: StatusCode,
    pub body: String,
}

impl ApiResponse {
    pub fn new(status: StatusCode, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_str(&self.body)
            .map_err(|e| SyncError::InvalidResponse(format!("JSON parse error: {}", e)))
    }
}

/// Sends a single request with no retries or credential handling.
pub trait Transport: Send + Sync {
    fn send(&self, request: ApiRequest) -> BoxFuture<'_, Result<ApiResponse>>;
}

/// reqwest-backed transport.
#[derive(Clone)]
pub struct ReqwestTransport {
    http: reqwest::Client,
    base_url: String,
}

impl ReqwestTransport {
    /// Create a transport with its own connection pool.
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .build()
            .map_err(|e| SyncError::Internal(anyhow::anyhow!("HTTP client error: {}", e)))?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }
}

impl Transport for ReqwestTransport {
    fn send(&self, request: ApiRequest) -> BoxFuture<'_, Result<ApiResponse>> {
        Box::pin(async move {
            let ApiRequest {
                method,
                path,
                headers,
                body,
            } = request;
            let url = format!("{}{}", self.base_url, path);

            let mut builder = self.http.request(method, &url).headers(headers);
            if let Some(body) = &body {
                builder = builder.json(body);
            }

            let response = builder.send().await.map_err(classify_error)?;
            let status = response.status();
            let body = response.text().await.map_err(classify_error)?;

            Ok(ApiResponse { status, body })
        })
    }
}

/// Map reqwest failures onto the error taxonomy.
fn classify_error(err: reqwest::Error) -> SyncError {
    if err.is_timeout() || err.is_connect() || err.is_request() || err.is_body() {
        SyncError::TransientNetwork(err.to_string())
    } else if err.is_decode() {
        SyncError::InvalidResponse(err.to_string())
    } else {
        SyncError::Internal(anyhow::anyhow!("HTTP error: {}", err))
    }
}
