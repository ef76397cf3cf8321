//! Persisted Store contract.
//!
//! One method per logical step. Every mutating method is atomic on its own:
//! implementations commit before returning, so a crash between two calls
//! leaves a consistent subset of updates and never a torn write.

use std::fmt;

use async_trait::async_trait;
use qw_schemas::{Account, BindingRecord, Owner, QueueRecord};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// A lookup-by-key that must succeed did not find its row.
    NotFound { entity: &'static str, key: String },
    /// A unique key is already taken.
    Conflict(String),
    /// The backing database failed (connectivity, SQL error, decode).
    Backend(String),
}

impl StoreError {
    pub fn not_found(entity: &'static str, key: impl Into<String>) -> Self {
        StoreError::NotFound {
            entity,
            key: key.into(),
        }
    }
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::NotFound { entity, key } => write!(f, "{entity} not found: {key}"),
            StoreError::Conflict(msg) => write!(f, "store conflict: {msg}"),
            StoreError::Backend(msg) => write!(f, "store backend error: {msg}"),
        }
    }
}

impl std::error::Error for StoreError {}

pub type StoreResult<T> = Result<T, StoreError>;

/// Read/write contract over owners, accounts, queues and bindings.
#[async_trait]
pub trait Store: Send + Sync {
    // -- owners -------------------------------------------------------------

    /// `email` is normalised (trimmed, lower-cased) before storage.
    async fn create_owner(&self, email: &str, admin: bool) -> StoreResult<Owner>;
    async fn owner_by_email(&self, email: &str) -> StoreResult<Option<Owner>>;
    async fn list_owners(&self) -> StoreResult<Vec<Owner>>;
    /// Administrators ordered by id (oldest first).
    async fn admin_owners(&self) -> StoreResult<Vec<Owner>>;
    async fn set_owner_admin(&self, owner_id: i64, admin: bool) -> StoreResult<()>;
    /// Removes the owner and its account links; accounts are kept.
    async fn delete_owner(&self, owner_id: i64) -> StoreResult<()>;

    // -- accounts -----------------------------------------------------------

    /// Create an account linked to `owner_ids` in one commit.
    async fn create_account(&self, username: &str, owner_ids: &[i64]) -> StoreResult<Account>;
    async fn account_by_id(&self, account_id: i64) -> StoreResult<Option<Account>>;
    async fn account_by_username(&self, username: &str) -> StoreResult<Option<Account>>;
    async fn list_accounts(&self) -> StoreResult<Vec<Account>>;
    async fn account_owners(&self, account_id: i64) -> StoreResult<Vec<Owner>>;
    async fn add_account_owner(&self, account_id: i64, owner_id: i64) -> StoreResult<()>;
    async fn remove_account_owner(&self, account_id: i64, owner_id: i64) -> StoreResult<()>;
    async fn account_queues(&self, account_id: i64) -> StoreResult<Vec<QueueRecord>>;
    /// Deletes the account's queues (and their bindings) before the account.
    async fn delete_account(&self, account_id: i64) -> StoreResult<()>;

    // -- queues -------------------------------------------------------------

    async fn create_queue(&self, queue: &QueueRecord) -> StoreResult<()>;
    async fn queue_by_name(&self, name: &str) -> StoreResult<Option<QueueRecord>>;
    async fn list_queues(&self) -> StoreResult<Vec<QueueRecord>>;
    /// Refresh the observed broker fields of an existing queue.
    async fn update_queue_stats(&self, name: &str, size: i64, durable: bool) -> StoreResult<()>;
    async fn set_queue_warned(&self, name: &str, warned: bool) -> StoreResult<()>;
    async fn set_queue_unbounded(&self, name: &str, unbounded: bool) -> StoreResult<()>;
    /// Deletes the queue's bindings and notification subscriptions first.
    async fn delete_queue(&self, name: &str) -> StoreResult<()>;

    // -- bindings -----------------------------------------------------------

    async fn queue_bindings(&self, queue_name: &str) -> StoreResult<Vec<BindingRecord>>;
    async fn add_binding(&self, binding: &BindingRecord) -> StoreResult<()>;
    async fn remove_binding(&self, binding: &BindingRecord) -> StoreResult<()>;

    // -- queue notification subscribers ---------------------------------------

    async fn queue_notifications(&self, queue_name: &str) -> StoreResult<Vec<String>>;
    async fn add_queue_notification(&self, queue_name: &str, email: &str) -> StoreResult<()>;
    async fn remove_queue_notification(&self, queue_name: &str, email: &str) -> StoreResult<()>;
}
