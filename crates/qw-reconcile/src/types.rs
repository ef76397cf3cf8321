use std::fmt;

use qw_broker::BrokerError;
use qw_config::{GuardianConfig, ReservedPattern};
use qw_db::StoreError;
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Settings
// ---------------------------------------------------------------------------

/// Everything the engine needs from configuration.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub warn_threshold: i64,
    pub delete_threshold: i64,
    /// Used when a queue snapshot carries no vhost.
    pub vhost: String,
    /// Queues whose account portion matches are never mirrored.
    pub reserved: Option<ReservedPattern>,
    /// Owner of accounts auto-created for orphaned queues.
    pub orphan_owner_email: Option<String>,
}

impl EngineSettings {
    pub fn new(warn_threshold: i64, delete_threshold: i64) -> Self {
        Self {
            warn_threshold,
            delete_threshold,
            vhost: "/".to_string(),
            reserved: None,
            orphan_owner_email: None,
        }
    }

    pub fn from_config(cfg: &GuardianConfig) -> anyhow::Result<Self> {
        Ok(Self {
            warn_threshold: cfg.thresholds.warn_queue_size,
            delete_threshold: cfg.thresholds.del_queue_size,
            vhost: cfg.rabbit.vhost.clone(),
            reserved: cfg.reserved.compile()?,
            orphan_owner_email: cfg.orphan_owner_email.clone(),
        })
    }
}

/// The deletion threshold is below the warning threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThresholdError {
    pub warn_threshold: i64,
    pub delete_threshold: i64,
}

impl fmt::Display for ThresholdError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "deletion threshold ({}) can't be smaller than the warning threshold ({})",
            self.delete_threshold, self.warn_threshold
        )
    }
}

impl std::error::Error for ThresholdError {}

// ---------------------------------------------------------------------------
// Tick errors
// ---------------------------------------------------------------------------

/// Why a tick was abandoned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickError {
    Broker(BrokerError),
    Store(StoreError),
}

impl TickError {
    /// Transport failures talking to the broker.
    pub fn is_connectivity(&self) -> bool {
        matches!(self, TickError::Broker(e) if e.is_transport())
    }
}

impl fmt::Display for TickError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TickError::Broker(e) => write!(f, "{e}"),
            TickError::Store(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for TickError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            TickError::Broker(e) => Some(e),
            TickError::Store(e) => Some(e),
        }
    }
}

impl From<BrokerError> for TickError {
    fn from(e: BrokerError) -> Self {
        TickError::Broker(e)
    }
}

impl From<StoreError> for TickError {
    fn from(e: StoreError) -> Self {
        TickError::Store(e)
    }
}

// ---------------------------------------------------------------------------
// Report
// ---------------------------------------------------------------------------

/// What one tick changed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TickReport {
    /// Live queues seen in the broker listing.
    pub observed: usize,
    pub created: usize,
    pub warned: usize,
    pub normal: usize,
    pub deleted: usize,
    pub vanished: usize,
    pub bindings_added: usize,
    pub bindings_removed: usize,
    /// Snapshots left alone this tick (incomplete stats, reserved owner).
    pub skipped: usize,
    pub accounts_created: usize,
}

impl TickReport {
    /// True when the tick changed nothing beyond size refreshes.
    pub fn is_quiet(&self) -> bool {
        self.created == 0
            && self.warned == 0
            && self.normal == 0
            && self.deleted == 0
            && self.vanished == 0
            && self.bindings_added == 0
            && self.bindings_removed == 0
            && self.accounts_created == 0
    }
}
