// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Step Sync daemon
//!
//! Reads daily step totals from a health export and keeps the club points
//! API up to date in the background.

use std::env;
use std::sync::Arc;
use step_sync::{
    config::Config,
    db::CredentialStore,
    models::Credentials,
    services::{AlwaysAvailable, ExportFileSource},
    AppState,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize structured JSON logging
    init_logging();

    // Load configuration from environment
    let config = Config::from_env()?;
    tracing::info!(
        api = %config.api_base_url,
        interval_secs = config.sync_interval.as_secs(),
        lookback_days = config.lookback_days,
        "Starting Step Sync"
    );

    // Open durable credential store
    let store = Arc::new(CredentialStore::open(
        &config.credentials_path,
        config.sync_interval,
    )?);
    seed_credentials(&store)?;
    if !store.is_authenticated() {
        tracing::warn!(
            path = %config.credentials_path.display(),
            "No stored session; background syncs will be skipped until credentials are saved"
        );
    }

    // Health data comes from an exported step file on this host
    let health = Arc::new(ExportFileSource::new(
        &config.health_export_path,
        config.step_source,
    ));
    tracing::info!(
        path = %config.health_export_path.display(),
        source = %config.step_source,
        "Using step export"
    );

    let sync_on_start = config.sync_on_start;
    let state = AppState::new(config, store, health, Arc::new(AlwaysAvailable))?;

    state.start();
    if sync_on_start {
        state.sync_now_in_background();
    }

    let mut updates = state.sync_service.subscribe();
    let watcher = tokio::spawn(async move {
        while updates.changed().await.is_ok() {
            let snapshot = updates.borrow_and_update().clone();
            if let Some(result) = snapshot.last_result.as_ref() {
                tracing::debug!(
                    phase = ?snapshot.phase,
                    synced_count = result.synced_count,
                    total_points_earned = result.total_points_earned,
                    "Sync state changed"
                );
            }
        }
    });

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutting down");
    state.shutdown().await;
    watcher.abort();

    Ok(())
}

/// Save tokens handed over through the environment (there is no login UI).
fn seed_credentials(store: &CredentialStore) -> step_sync::error::Result<()> {
    let (Ok(access_token), Ok(refresh_token)) = (
        env::var("STEP_SYNC_ACCESS_TOKEN"),
        env::var("STEP_SYNC_REFRESH_TOKEN"),
    ) else {
        return Ok(());
    };

    tracing::info!("Seeding session from environment");
    store.save_credentials(&Credentials {
        access_token,
        refresh_token,
    })
}

/// Initialize structured JSON logging.
fn init_logging() {
    let format = tracing_subscriber::fmt::layer()
        .json()
        .with_target(false)
        .with_current_span(true)
        .flatten_event(true);

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("step_sync=debug,info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(format)
        .init();
}
