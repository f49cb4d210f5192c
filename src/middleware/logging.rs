// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Request/response logging.

use super::{Middleware, Next};
use crate::error::Result;
use crate::services::transport::{ApiRequest, ApiResponse};
use futures_util::future::BoxFuture;
use std::time::Instant;

/// Logs method, path, outcome and latency of every call. Never logs headers.
#[derive(Default)]
pub struct RequestLogging;

impl Middleware for RequestLogging {
    fn handle<'a>(
        &'a self,
        request: ApiRequest,
        next: Next<'a>,
    ) -> BoxFuture<'a, Result<ApiResponse>> {
        Box::pin(async move {
            let method = request.method.clone();
            let path = request.path.clone();
            let started = Instant::now();

            let result = next.run(request).await;
            let elapsed_ms = started.elapsed().as_millis() as u64;

            match &result {
                Ok(response) => tracing::debug!(
                    method = %method,
                    path = %path,
                    status = response.status.as_u16(),
                    elapsed_ms,
                    "API call completed"
                ),
                Err(e) => tracing::warn!(
                    method = %method,
                    path = %path,
                    error = %e,
                    elapsed_ms,
                    "API call failed"
                ),
            }

            result
        })
    }
}
