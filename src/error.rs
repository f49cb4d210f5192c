// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Error types shared by the API client, the sync service and the scheduler.

use serde::Deserialize;

/// Everything that can stop a sync pass or an API call.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("Health data permission denied")]
    PermissionDenied,

    #[error("Network error: {0}")]
    TransientNetwork(String),

    #[error("Access token expired")]
    AuthExpired,

    #[error("Credentials revoked, re-authentication required")]
    AuthRevoked,

    #[error("Not authenticated")]
    NotAuthenticated,

    #[error("Sync not due yet")]
    NotDue,

    #[error("No step data available to sync")]
    NothingToSync,

    #[error("Request rejected by server (HTTP {status}): {message}")]
    ServerRejected { status: u16, message: String },

    #[error("Server unavailable (HTTP {status})")]
    ServerUnavailable { status: u16 },

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Credential storage error: {0}")]
    Storage(String),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl SyncError {
    /// Errors worth another attempt later (timeouts, connectivity, 5xx).
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            SyncError::TransientNetwork(_) | SyncError::ServerUnavailable { .. }
        )
    }

    /// Errors caused by missing, expired or revoked credentials.
    pub fn is_auth_error(&self) -> bool {
        matches!(
            self,
            SyncError::AuthExpired | SyncError::AuthRevoked | SyncError::NotAuthenticated
        )
    }

    /// Message suitable for showing to the user after a foreground sync.
    pub fn user_message(&self) -> String {
        match self {
            SyncError::PermissionDenied => {
                "Allow access to step data in your health settings to earn points.".to_string()
            }
            SyncError::TransientNetwork(_) | SyncError::ServerUnavailable { .. } => {
                "Could not reach the server. Your steps will sync automatically later.".to_string()
            }
            SyncError::AuthExpired | SyncError::AuthRevoked | SyncError::NotAuthenticated => {
                "Your session has ended. Please sign in again.".to_string()
            }
            SyncError::NotDue => "Your steps are already up to date.".to_string(),
            SyncError::NothingToSync => "No steps recorded yet for the last few days.".to_string(),
            SyncError::ServerRejected { message, .. } => {
                format!("The server rejected the step data: {}", message)
            }
            SyncError::InvalidResponse(_) | SyncError::Storage(_) | SyncError::Internal(_) => {
                "Something went wrong while syncing. Please try again.".to_string()
            }
        }
    }

    /// Build a `ServerRejected` error from a non-success response body.
    ///
    /// Understands `{"detail": ...}` and `{"error": ...}` bodies and falls
    /// back to the raw text.
    pub fn rejected(status: u16, body: &str) -> Self {
        SyncError::ServerRejected {
            status,
            message: error_message_from_body(body),
        }
    }
}

#[derive(Deserialize)]
struct ErrorBody {
    #[serde(default)]
    detail: Option<serde_json::Value>,
    #[serde(default)]
    error: Option<String>,
}

fn error_message_from_body(body: &str) -> String {
    if let Ok(parsed) = serde_json::from_str::<ErrorBody>(body) {
        match (parsed.detail, parsed.error) {
            (Some(serde_json::Value::String(detail)), _) => return detail,
            (Some(detail), _) => return detail.to_string(),
            (None, Some(error)) => return error,
            (None, None) => {}
        }
    }

    let trimmed = body.trim();
    if trimmed.is_empty() {
        "no details".to_string()
    } else {
        trimmed.to_string()
    }
}

/// Result type alias used throughout the crate.
pub type Result<T> = std::result::Result<T, SyncError>;
