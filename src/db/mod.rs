// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Local persistence (credentials and sync checkpoint).

pub mod credential_store;

pub use credential_store::CredentialStore;
