// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Single retry for transient failures.
//!
//! Timeouts, connectivity failures and 5xx responses are resubmitted once,
//! straight to the transport. Business errors (4xx, including 401) pass
//! through untouched.

use super::{Middleware, Next};
use crate::error::Result;
use crate::services::transport::{ApiRequest, ApiResponse};
use futures_util::future::BoxFuture;

#[derive(Default)]
pub struct TransientRetry;

impl Middleware for TransientRetry {
    fn handle<'a>(
        &'a self,
        request: ApiRequest,
        next: Next<'a>,
    ) -> BoxFuture<'a, Result<ApiResponse>> {
        Box::pin(async move {
            let retry = request.clone();

            match next.run(request).await {
                Err(e) if e.is_transient() => {
                    tracing::warn!(path = %retry.path, error = %e, "Transient failure, retrying once");
                    next.transport().send(retry).await
                }
                Ok(response) if response.status.is_server_error() => {
                    tracing::warn!(
                        path = %retry.path,
                        status = response.status.as_u16(),
                        "Server error, retrying once"
                    );
                    next.transport().send(retry).await
                }
                other => other,
            }
        })
    }
}
