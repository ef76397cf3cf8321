//! qw-broker
//!
//! Broker Client boundary: the read and write operations queue-warden needs
//! from the broker's management API.
//!
//! - [`BrokerClient`] is the trait the reconciliation engine and the CLI are
//!   written against.
//! - [`ManagementClient`] is the HTTP implementation (RabbitMQ management
//!   plugin, JSON over HTTP, basic auth).
//! - [`accounts`] holds the account-management flows built on top of the
//!   trait (permission grants, password rotation).
//!
//! Every operation surfaces a [`BrokerError`]; [`BrokerError::is_transport`]
//! separates "could not reach the broker" from "the broker answered with
//! something we cannot use".

pub mod accounts;
mod management;

use std::fmt;

use async_trait::async_trait;
use qw_schemas::{BindingSnapshot, QueueDetail, QueueSnapshot};
use serde::{Deserialize, Serialize};

pub use management::{endpoint_url, ManagementClient, ManagementSettings};

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Errors a [`BrokerClient`] may return.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BrokerError {
    /// Connection refused, DNS failure, timeout, broken body stream.
    Transport(String),
    /// The broker answered with a non-success status.
    Api {
        status: u16,
        path: String,
        message: String,
    },
    /// A response payload could not be decoded.
    Decode(String),
    /// The client itself is misconfigured (bad base URL, TLS setup).
    Config(String),
}

impl BrokerError {
    /// True for connectivity failures; drives the backoff + admin alert path.
    pub fn is_transport(&self) -> bool {
        matches!(self, BrokerError::Transport(_))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, BrokerError::Api { status: 404, .. })
    }
}

impl fmt::Display for BrokerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BrokerError::Transport(msg) => write!(f, "broker transport error: {msg}"),
            BrokerError::Api {
                status,
                path,
                message,
            } => write!(f, "broker api error status={status} path={path}: {message}"),
            BrokerError::Decode(msg) => write!(f, "broker decode error: {msg}"),
            BrokerError::Config(msg) => write!(f, "broker client config error: {msg}"),
        }
    }
}

impl std::error::Error for BrokerError {}

// ---------------------------------------------------------------------------
// Account types
// ---------------------------------------------------------------------------

/// Broker-side user as returned by `GET users/<user>`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrokerUser {
    pub name: String,
    #[serde(default)]
    pub tags: serde_json::Value,
}

/// Body of `PUT permissions/<vhost>/<user>`; each field is a regex.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Permissions {
    pub configure: String,
    pub write: String,
    pub read: String,
}

// ---------------------------------------------------------------------------
// Client trait
// ---------------------------------------------------------------------------

/// Management-API operations used by queue-warden.
///
/// Implementations must be `Send + Sync` so the daemon can hold an
/// `Arc<dyn BrokerClient>` across await points.
#[async_trait]
pub trait BrokerClient: Send + Sync {
    /// All queues in the monitored vhost.
    async fn list_queues(&self) -> Result<Vec<QueueSnapshot>, BrokerError>;

    /// All bindings in the monitored vhost.
    async fn list_bindings(&self) -> Result<Vec<BindingSnapshot>, BrokerError>;

    /// Bindings whose destination is `queue`.
    async fn queue_bindings(
        &self,
        vhost: &str,
        queue: &str,
    ) -> Result<Vec<BindingSnapshot>, BrokerError>;

    async fn get_queue_detail(&self, vhost: &str, queue: &str)
        -> Result<QueueDetail, BrokerError>;

    async fn delete_queue(&self, vhost: &str, queue: &str) -> Result<(), BrokerError>;

    /// `Ok(None)` when the user does not exist.
    async fn get_account(&self, username: &str) -> Result<Option<BrokerUser>, BrokerError>;

    async fn create_account(
        &self,
        username: &str,
        password: &str,
        tags: &str,
    ) -> Result<(), BrokerError>;

    async fn delete_account(&self, username: &str) -> Result<(), BrokerError>;

    async fn set_permissions(
        &self,
        vhost: &str,
        username: &str,
        permissions: &Permissions,
    ) -> Result<(), BrokerError>;
}

/// Live bindings of `queue`, limited to the ones the engine mirrors.
pub async fn tracked_queue_bindings(
    client: &dyn BrokerClient,
    vhost: &str,
    queue: &str,
) -> Result<Vec<BindingSnapshot>, BrokerError> {
    let mut bindings: Vec<BindingSnapshot> = client
        .queue_bindings(vhost, queue)
        .await?
        .into_iter()
        .filter(|b| b.is_tracked())
        .collect();
    bindings.sort_by(|a, b| a.pair().cmp(&b.pair()));
    Ok(bindings)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_transport_errors_are_transport() {
        assert!(BrokerError::Transport("refused".into()).is_transport());
        assert!(!BrokerError::Decode("eof".into()).is_transport());
        assert!(!BrokerError::Api {
            status: 500,
            path: "queues".into(),
            message: "boom".into()
        }
        .is_transport());
    }

    #[test]
    fn api_error_display_names_status_and_path() {
        let err = BrokerError::Api {
            status: 404,
            path: "users/alice".into(),
            message: "Object Not Found".into(),
        };
        assert!(err.is_not_found());
        assert_eq!(
            err.to_string(),
            "broker api error status=404 path=users/alice: Object Not Found"
        );
    }
}
