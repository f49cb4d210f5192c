// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Durable store for session tokens and the sync checkpoint.
//!
//! State lives in memory behind a lock and is written through to a JSON file
//! on every change (write to a temp file, then rename), so a scheduler running
//! in another execution context sees the same tokens after `reload()`.

use crate::error::{Result, SyncError};
use crate::models::{Credentials, SyncCheckpoint};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

/// On-disk layout.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct StoredState {
    #[serde(default)]
    access_token: Option<String>,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    last_sync_time: Option<DateTime<Utc>>,
}

/// Token and checkpoint store shared by the API client and the sync service.
pub struct CredentialStore {
    /// `None` for the in-memory store used in tests.
    path: Option<PathBuf>,
    state: RwLock<StoredState>,
    sync_interval: Duration,
}

impl CredentialStore {
    /// Open (or create) the store backed by `path`.
    pub fn open(path: impl AsRef<Path>, sync_interval: std::time::Duration) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let state = read_state(&path)?;

        tracing::debug!(
            path = %path.display(),
            has_credentials = state.access_token.is_some(),
            "Credential store opened"
        );

        Ok(Self {
            path: Some(path),
            state: RwLock::new(state),
            sync_interval: to_chrono(sync_interval),
        })
    }

    /// Create a store that never touches the filesystem.
    pub fn in_memory(sync_interval: std::time::Duration) -> Self {
        Self {
            path: None,
            state: RwLock::new(StoredState::default()),
            sync_interval: to_chrono(sync_interval),
        }
    }

    /// Re-read the backing file, picking up writes from another process.
    pub fn reload(&self) -> Result<()> {
        if let Some(path) = &self.path {
            // Hold the lock across the read so a concurrent local write is
            // never replaced by the file contents it superseded.
            let mut state = self.write();
            *state = read_state(path)?;
        }
        Ok(())
    }

    // ─── Tokens ──────────────────────────────────────────────────

    pub fn access_token(&self) -> Option<String> {
        self.read().access_token.clone()
    }

    pub fn refresh_token(&self) -> Option<String> {
        self.read().refresh_token.clone()
    }

    /// Both tokens, if a full session is stored.
    pub fn credentials(&self) -> Option<Credentials> {
        let state = self.read();
        match (&state.access_token, &state.refresh_token) {
            (Some(access), Some(refresh)) => Some(Credentials {
                access_token: access.clone(),
                refresh_token: refresh.clone(),
            }),
            _ => None,
        }
    }

    /// True when an access token is available to attach to requests.
    pub fn is_authenticated(&self) -> bool {
        self.read().access_token.is_some()
    }

    pub fn save_access_token(&self, token: &str) -> Result<()> {
        self.update(|state| state.access_token = Some(token.to_string()))
    }

    pub fn save_refresh_token(&self, token: &str) -> Result<()> {
        self.update(|state| state.refresh_token = Some(token.to_string()))
    }

    /// Replace both tokens in a single durable write.
    pub fn save_credentials(&self, credentials: &Credentials) -> Result<()> {
        self.update(|state| {
            state.access_token = Some(credentials.access_token.clone());
            state.refresh_token = Some(credentials.refresh_token.clone());
        })
    }

    // ─── Checkpoint ──────────────────────────────────────────────

    pub fn last_sync_time(&self) -> Option<DateTime<Utc>> {
        self.read().last_sync_time
    }

    pub fn checkpoint(&self) -> Option<SyncCheckpoint> {
        self.last_sync_time()
            .map(|last_sync_time| SyncCheckpoint { last_sync_time })
    }

    pub fn save_last_sync_time(&self, time: DateTime<Utc>) -> Result<()> {
        self.update(|state| state.last_sync_time = Some(time))
    }

    pub fn sync_interval(&self) -> Duration {
        self.sync_interval
    }

    /// Whether a background sync is due now.
    pub fn should_sync(&self) -> bool {
        self.should_sync_at(Utc::now())
    }

    /// Whether a background sync is due at `now`: no checkpoint yet, or at
    /// least one sync interval has elapsed since it.
    pub fn should_sync_at(&self, now: DateTime<Utc>) -> bool {
        match self.last_sync_time() {
            None => true,
            Some(last) => now - last >= self.sync_interval,
        }
    }

    // ─── Lifecycle ───────────────────────────────────────────────

    /// Forget tokens and checkpoint (logout or irrecoverable auth failure).
    pub fn clear_all(&self) -> Result<()> {
        tracing::info!("Clearing stored credentials");
        self.update(|state| *state = StoredState::default())
    }

    /// Apply `change` and persist the result while still holding the lock,
    /// so concurrent writers cannot interleave file contents.
    fn update(&self, change: impl FnOnce(&mut StoredState)) -> Result<()> {
        let mut state = self.write();
        change(&mut state);
        if let Some(path) = &self.path {
            write_state(path, &state)?;
        }
        Ok(())
    }

    fn read(&self) -> RwLockReadGuard<'_, StoredState> {
        self.state.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, StoredState> {
        self.state
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn to_chrono(interval: std::time::Duration) -> Duration {
    Duration::from_std(interval).unwrap_or(Duration::MAX)
}

fn read_state(path: &Path) -> Result<StoredState> {
    if !path.exists() {
        return Ok(StoredState::default());
    }

    let raw = fs::read_to_string(path)
        .map_err(|e| SyncError::Storage(format!("Failed to read {}: {}", path.display(), e)))?;
    if raw.trim().is_empty() {
        return Ok(StoredState::default());
    }

    serde_json::from_str(&raw)
        .map_err(|e| SyncError::Storage(format!("Corrupt store {}: {}", path.display(), e)))
}

fn write_state(path: &Path, state: &StoredState) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|e| SyncError::Storage(e.to_string()))?;
    }

    let json = serde_json::to_vec_pretty(state).map_err(|e| SyncError::Storage(e.to_string()))?;

    let tmp = path.with_extension("tmp");
    fs::write(&tmp, json)
        .map_err(|e| SyncError::Storage(format!("Failed to write {}: {}", tmp.display(), e)))?;
    fs::rename(&tmp, path)
        .map_err(|e| SyncError::Storage(format!("Failed to replace {}: {}", path.display(), e)))
}
