// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Durability of the file-backed credential store.

use chrono::{Duration, Utc};
use step_sync::db::CredentialStore;
use step_sync::error::SyncError;
use step_sync::models::Credentials;

mod common;
use common::HOUR;

fn session(n: u32) -> Credentials {
    Credentials {
        access_token: format!("access-{n}"),
        refresh_token: format!("refresh-{n}"),
    }
}

#[test]
fn test_tokens_and_checkpoint_survive_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("credentials.json");
    let synced_at = Utc::now() - Duration::minutes(10);

    {
        let store = CredentialStore::open(&path, HOUR).unwrap();
        assert!(!store.is_authenticated());
        store.save_credentials(&session(1)).unwrap();
        store.save_last_sync_time(synced_at).unwrap();
    }

    let reopened = CredentialStore::open(&path, HOUR).unwrap();
    assert_eq!(reopened.credentials(), Some(session(1)));
    assert_eq!(reopened.last_sync_time(), Some(synced_at));
    assert!(!reopened.should_sync());
}

#[test]
fn test_reload_sees_other_handle_writes() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("credentials.json");

    let foreground = CredentialStore::open(&path, HOUR).unwrap();
    let background = CredentialStore::open(&path, HOUR).unwrap();

    foreground.save_credentials(&session(1)).unwrap();
    assert!(!background.is_authenticated());

    background.reload().unwrap();
    assert_eq!(background.access_token().as_deref(), Some("access-1"));

    // Rotation in the background context is visible to the foreground.
    background.save_credentials(&session(2)).unwrap();
    foreground.reload().unwrap();
    assert_eq!(foreground.refresh_token().as_deref(), Some("refresh-2"));
}

#[test]
fn test_clear_all_is_durable() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("credentials.json");

    let store = CredentialStore::open(&path, HOUR).unwrap();
    store.save_credentials(&session(1)).unwrap();
    store.save_last_sync_time(Utc::now()).unwrap();
    store.clear_all().unwrap();

    let reopened = CredentialStore::open(&path, HOUR).unwrap();
    assert!(!reopened.is_authenticated());
    assert!(reopened.refresh_token().is_none());
    assert!(reopened.last_sync_time().is_none());
    assert!(reopened.should_sync());
}

#[test]
fn test_individual_token_saves() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("credentials.json");

    let store = CredentialStore::open(&path, HOUR).unwrap();
    store.save_access_token("only-access").unwrap();
    assert!(store.is_authenticated());
    assert!(store.credentials().is_none());

    store.save_refresh_token("only-refresh").unwrap();
    let reopened = CredentialStore::open(&path, HOUR).unwrap();
    assert_eq!(
        reopened.credentials(),
        Some(Credentials {
            access_token: "only-access".to_string(),
            refresh_token: "only-refresh".to_string(),
        })
    );
}

#[test]
fn test_corrupt_file_is_a_storage_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("credentials.json");
    std::fs::write(&path, b"{not json").unwrap();

    let err = CredentialStore::open(&path, HOUR).err().unwrap();
    assert!(matches!(err, SyncError::Storage(_)));
}

#[test]
fn test_empty_file_opens_empty() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("credentials.json");
    std::fs::write(&path, b"").unwrap();

    let store = CredentialStore::open(&path, HOUR).unwrap();
    assert!(!store.is_authenticated());
}
