//! Shared runtime state for qw-daemon.
//!
//! Handlers receive `State<Arc<AppState>>` from Axum. The guardian loop owns
//! the write side of [`AppState::guardian`]; handlers only read it.

use std::sync::Arc;

use qw_reconcile::{GuardianStatus, StatusHandle};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

// ---------------------------------------------------------------------------
// BuildInfo
// ---------------------------------------------------------------------------

/// Static build metadata included in health / status responses.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BuildInfo {
    pub service: &'static str,
    pub version: &'static str,
}

// ---------------------------------------------------------------------------
// AppState
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct AppState {
    pub build: BuildInfo,
    /// Live view published by the guardian after every tick.
    pub guardian: StatusHandle,
    pub config_hash: String,
    pub warn_threshold: i64,
    pub delete_threshold: i64,
}

impl AppState {
    pub fn new(
        guardian: StatusHandle,
        config_hash: impl Into<String>,
        warn_threshold: i64,
        delete_threshold: i64,
    ) -> Self {
        Self {
            build: BuildInfo {
                service: "qw-daemon",
                version: env!("CARGO_PKG_VERSION"),
            },
            guardian,
            config_hash: config_hash.into(),
            warn_threshold,
            delete_threshold,
        }
    }

    /// State with a detached, never-updated guardian status.
    pub fn detached(config_hash: impl Into<String>, warn_threshold: i64, delete_threshold: i64) -> Self {
        Self::new(
            Arc::new(RwLock::new(GuardianStatus::default())),
            config_hash,
            warn_threshold,
            delete_threshold,
        )
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Monotonically increasing uptime since first call (process lifetime).
pub fn uptime_secs() -> u64 {
    static START: std::sync::OnceLock<std::time::Instant> = std::sync::OnceLock::new();
    START
        .get_or_init(std::time::Instant::now)
        .elapsed()
        .as_secs()
}
