//! qw-schemas
//!
//! Shared data shapes for queue-warden:
//! - store records (owners, accounts, queues, bindings),
//! - broker snapshots as decoded from the management API.
//!
//! Snapshot structs keep every broker field optional. Validation happens at
//! the point of use so that one malformed queue entry never poisons the whole
//! listing.

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Store records
// ---------------------------------------------------------------------------

/// Human identity, keyed by a lower-cased email address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Owner {
    pub id: i64,
    pub email: String,
    pub admin: bool,
}

/// Normalise an email address the way owners are keyed in the store.
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Broker-level identity that owns queues.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub id: i64,
    pub username: String,
}

/// Stored mirror of one broker queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueRecord {
    pub name: String,
    /// Owning account; `None` for orphaned / non-conforming queue names.
    pub account_id: Option<i64>,
    pub size: i64,
    pub durable: bool,
    /// Exempt from the deletion policy.
    pub unbounded: bool,
    pub warned: bool,
}

impl QueueRecord {
    pub fn new(name: impl Into<String>, account_id: Option<i64>) -> Self {
        Self {
            name: name.into(),
            account_id,
            size: 0,
            durable: false,
            unbounded: false,
            warned: false,
        }
    }
}

/// Stored mirror of one broker binding.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BindingRecord {
    pub exchange: String,
    pub routing_key: String,
    pub queue_name: String,
}

impl BindingRecord {
    pub fn new(
        exchange: impl Into<String>,
        routing_key: impl Into<String>,
        queue_name: impl Into<String>,
    ) -> Self {
        Self {
            exchange: exchange.into(),
            routing_key: routing_key.into(),
            queue_name: queue_name.into(),
        }
    }

    /// Display key, `exchange-routing_key`.
    pub fn key(&self) -> String {
        binding_key(&self.exchange, &self.routing_key)
    }

    /// Identity used when diffing stored against live bindings. Unlike
    /// [`key`](Self::key) it cannot collide when a name contains `-`.
    pub fn pair(&self) -> (&str, &str) {
        (&self.exchange, &self.routing_key)
    }
}

/// `exchange-routing_key`, shared by stored and live bindings so both sides
/// compare with the same string format.
pub fn binding_key(exchange: &str, routing_key: &str) -> String {
    format!("{exchange}-{routing_key}")
}

// ---------------------------------------------------------------------------
// Broker snapshots
// ---------------------------------------------------------------------------

/// One entry of `GET queues[/<vhost>]`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueSnapshot {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub vhost: Option<String>,
    /// Total messages. Absent while the broker is still computing stats.
    #[serde(default)]
    pub messages: Option<i64>,
    #[serde(default)]
    pub messages_ready: Option<i64>,
    #[serde(default)]
    pub durable: Option<bool>,
    #[serde(default)]
    pub consumers: Option<i64>,
}

/// A queue snapshot that carries every field the engine needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObservedQueue {
    pub name: String,
    pub vhost: Option<String>,
    pub messages: i64,
    pub messages_ready: i64,
    pub durable: bool,
}

/// Why a snapshot could not be turned into an [`ObservedQueue`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotGap {
    MissingName,
    MissingMessages,
}

impl std::fmt::Display for SnapshotGap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SnapshotGap::MissingName => write!(f, "queue snapshot has no name"),
            SnapshotGap::MissingMessages => write!(f, "queue snapshot has no message count"),
        }
    }
}

impl QueueSnapshot {
    pub fn new(name: impl Into<String>, messages: i64) -> Self {
        Self {
            name: Some(name.into()),
            vhost: Some("/".to_string()),
            messages: Some(messages),
            messages_ready: Some(messages),
            durable: Some(false),
            consumers: Some(0),
        }
    }

    pub fn durable(mut self, durable: bool) -> Self {
        self.durable = Some(durable);
        self
    }

    pub fn observe(&self) -> Result<ObservedQueue, SnapshotGap> {
        let name = self.name.clone().ok_or(SnapshotGap::MissingName)?;
        let messages = self.messages.ok_or(SnapshotGap::MissingMessages)?;
        Ok(ObservedQueue {
            name,
            vhost: self.vhost.clone(),
            messages,
            messages_ready: self.messages_ready.unwrap_or(messages),
            durable: self.durable.unwrap_or(false),
        })
    }
}

/// One entry of `GET bindings[/<vhost>]` or `GET queues/<vhost>/<queue>/bindings`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BindingSnapshot {
    /// Exchange name. Empty for the implicit default-exchange binding.
    #[serde(default)]
    pub source: String,
    #[serde(default)]
    pub destination: String,
    #[serde(default)]
    pub destination_type: String,
    #[serde(default)]
    pub routing_key: String,
    #[serde(default)]
    pub vhost: Option<String>,
}

impl BindingSnapshot {
    pub fn queue_binding(
        exchange: impl Into<String>,
        routing_key: impl Into<String>,
        queue: impl Into<String>,
    ) -> Self {
        Self {
            source: exchange.into(),
            destination: queue.into(),
            destination_type: "queue".to_string(),
            routing_key: routing_key.into(),
            vhost: Some("/".to_string()),
        }
    }

    /// Bindings worth mirroring: from a named exchange to a queue.
    pub fn is_tracked(&self) -> bool {
        !self.source.is_empty() && self.destination_type == "queue"
    }

    pub fn key(&self) -> String {
        binding_key(&self.source, &self.routing_key)
    }

    pub fn pair(&self) -> (&str, &str) {
        (&self.source, &self.routing_key)
    }

    pub fn to_record(&self) -> BindingRecord {
        BindingRecord::new(&self.source, &self.routing_key, &self.destination)
    }
}

/// `GET queues/<vhost>/<queue>`; only the fields used for notification text.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueDetail {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub incoming: Vec<IncomingStat>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IncomingStat {
    #[serde(default)]
    pub exchange: ExchangeRef,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExchangeRef {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub vhost: Option<String>,
}

impl QueueDetail {
    /// Exchange the queue's first incoming message stream came from.
    pub fn originating_exchange(&self) -> Option<&str> {
        self.incoming
            .first()
            .map(|s| s.exchange.name.as_str())
            .filter(|n| !n.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn queue_snapshot_without_messages_is_a_gap() {
        let raw = r#"{"name":"queue/alice/foo","vhost":"/","durable":true}"#;
        let snap: QueueSnapshot = serde_json::from_str(raw).unwrap();
        assert_eq!(snap.observe(), Err(SnapshotGap::MissingMessages));
    }

    #[test]
    fn queue_snapshot_ignores_unknown_fields() {
        let raw = r#"{"name":"q","messages":3,"memory":1024,"state":"running"}"#;
        let snap: QueueSnapshot = serde_json::from_str(raw).unwrap();
        let q = snap.observe().unwrap();
        assert_eq!(q.messages, 3);
        assert_eq!(q.messages_ready, 3);
        assert!(!q.durable);
    }

    #[test]
    fn default_exchange_binding_is_not_tracked() {
        let b = BindingSnapshot::queue_binding("", "queue/alice/foo", "queue/alice/foo");
        assert!(!b.is_tracked());
        let b = BindingSnapshot::queue_binding("exchange/alice/x", "#", "queue/alice/foo");
        assert!(b.is_tracked());
        assert_eq!(b.key(), "exchange/alice/x-#");
    }

    #[test]
    fn detail_without_incoming_has_no_exchange() {
        let d: QueueDetail = serde_json::from_str(r#"{"name":"q","incoming":[]}"#).unwrap();
        assert_eq!(d.originating_exchange(), None);

        let d: QueueDetail = serde_json::from_str(
            r#"{"name":"q","incoming":[{"exchange":{"name":"exchange/a/b","vhost":"/"}}]}"#,
        )
        .unwrap();
        assert_eq!(d.originating_exchange(), Some("exchange/a/b"));
    }

    #[test]
    fn emails_are_case_normalised() {
        assert_eq!(normalize_email("  Alice@Example.COM "), "alice@example.com");
    }
}
