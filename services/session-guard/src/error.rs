// SPDX-FileCopyrightText: 2026 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Error types for session-guard.
//!
//! Denials are never errors. These variants cover the storage and
//! configuration seams; the engine and coordinator catch them internally
//! and log instead of propagating.

use thiserror::Error;

use crate::storage::StorageError;

/// Crate error types
#[derive(Debug, Error)]
pub enum GuardError {
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),
}

/// Result type alias
pub type Result<T> = std::result::Result<T, GuardError>;
