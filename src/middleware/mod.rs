// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Outbound request middleware (credentials, logging, retry, token refresh).
//!
//! The chain is fixed when the client is built. Each middleware receives the
//! request and a [`Next`] handle for the rest of the chain; calling
//! [`Next::transport`] bypasses the remaining middleware entirely.

pub mod auth;
pub mod logging;
pub mod refresh;
pub mod retry;

pub use auth::AuthAttach;
pub use logging::RequestLogging;
pub use refresh::{AuthRefresh, TokenRefresher};
pub use retry::TransientRetry;

use crate::error::Result;
use crate::services::transport::{ApiRequest, ApiResponse, Transport};
use futures_util::future::BoxFuture;
use std::sync::Arc;

/// One link of the outbound chain.
pub trait Middleware: Send + Sync {
    fn handle<'a>(
        &'a self,
        request: ApiRequest,
        next: Next<'a>,
    ) -> BoxFuture<'a, Result<ApiResponse>>;
}

/// The remainder of the chain after the current middleware.
#[derive(Clone, Copy)]
pub struct Next<'a> {
    transport: &'a dyn Transport,
    chain: &'a [Arc<dyn Middleware>],
}

impl<'a> Next<'a> {
    pub fn new(transport: &'a dyn Transport, chain: &'a [Arc<dyn Middleware>]) -> Self {
        Self { transport, chain }
    }

    /// Pass the request to the next middleware, or to the transport at the end.
    pub fn run(self, request: ApiRequest) -> BoxFuture<'a, Result<ApiResponse>> {
        match self.chain.split_first() {
            Some((head, tail)) => head.handle(
                request,
                Next {
                    transport: self.transport,
                    chain: tail,
                },
            ),
            None => self.transport.send(request),
        }
    }

    /// The underlying transport, for resubmitting without re-entering the chain.
    pub fn transport(&self) -> &'a dyn Transport {
        self.transport
    }
}
