//! Notification subjects and bodies.

use std::time::Duration;

/// Exchange placeholder when the broker cannot tell where messages came from.
pub const UNKNOWN_EXCHANGE: &str = "could not be determined";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub subject: String,
    pub body: String,
}

const CLIENT_ADVICE: &str = "Make sure your clients are running correctly and are cleaning up unused
durable queues.
";

pub fn warning_message(
    queue: &str,
    exchange: &str,
    ready: i64,
    total: i64,
    delete_threshold: i64,
) -> Message {
    Message {
        subject: format!("Pulse warning: queue \"{queue}\" is overgrowing"),
        body: format!(
            "Warning: your queue \"{queue}\" on exchange \"{exchange}\" is
overgrowing ({ready} ready messages, {total} total messages).

The queue will be automatically deleted when it exceeds {delete_threshold} messages.

{CLIENT_ADVICE}"
        ),
    }
}

pub fn deletion_message(queue: &str, exchange: &str, total: i64, delete_threshold: i64) -> Message {
    Message {
        subject: format!("Pulse warning: queue \"{queue}\" has been deleted"),
        body: format!(
            "Your queue \"{queue}\" on exchange \"{exchange}\" has been
deleted after exceeding the maximum number of unread messages.  Upon deletion
there were {total} messages in the queue, out of a maximum {delete_threshold} messages.

{CLIENT_ADVICE}"
        ),
    }
}

pub fn back_to_normal_message(queue: &str, exchange: &str, ready: i64, total: i64) -> Message {
    Message {
        subject: format!("Pulse warning: queue \"{queue}\" is back to normal"),
        body: format!(
            "Your queue \"{queue}\" on exchange \"{exchange}\" is
now back to normal ({ready} ready messages, {total} total messages).
"
        ),
    }
}

pub fn connectivity_alert_message(error: &str, retry_in: Duration) -> Message {
    Message {
        subject: "queue-warden: cannot reach the broker".to_string(),
        body: format!(
            "queue-warden could not reach the broker management API:

    {error}

Polling continues with backoff (next attempt in {} seconds). No further
alerts will be sent until a poll succeeds.
",
            retry_in.as_secs()
        ),
    }
}

pub fn unknown_error_message(error: &str, retry_in: Duration) -> Message {
    Message {
        subject: "queue-warden: unexpected error while monitoring queues".to_string(),
        body: format!(
            "queue-warden hit an unexpected error while reconciling queues:

    {error}

Polling continues with backoff (next attempt in {} seconds). No further
alerts will be sent until a poll succeeds.
",
            retry_in.as_secs()
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn warning_names_queue_exchange_counts_and_limit() {
        let m = warning_message("queue/alice/foo", "exchange/alice/bar", 20, 25, 30);
        assert_eq!(m.subject, "Pulse warning: queue \"queue/alice/foo\" is overgrowing");
        assert!(m.body.starts_with(
            "Warning: your queue \"queue/alice/foo\" on exchange \"exchange/alice/bar\" is\n"
        ));
        assert!(m.body.contains("(20 ready messages, 25 total messages)"));
        assert!(m.body.contains("deleted when it exceeds 30 messages"));
    }

    #[test]
    fn deletion_reports_total_against_maximum() {
        let m = deletion_message("queue/alice/foo", UNKNOWN_EXCHANGE, 35, 30);
        assert_eq!(m.subject, "Pulse warning: queue \"queue/alice/foo\" has been deleted");
        assert!(m.body.contains("on exchange \"could not be determined\""));
        assert!(m.body.contains("there were 35 messages in the queue, out of a maximum 30"));
    }

    #[test]
    fn back_to_normal_subject() {
        let m = back_to_normal_message("queue/alice/foo", "x", 1, 2);
        assert_eq!(m.subject, "Pulse warning: queue \"queue/alice/foo\" is back to normal");
        assert!(m.body.ends_with("(1 ready messages, 2 total messages).\n"));
    }

    #[test]
    fn alerts_mention_retry_interval() {
        let m = connectivity_alert_message("connection refused", Duration::from_secs(10));
        assert!(m.body.contains("connection refused"));
        assert!(m.body.contains("next attempt in 10 seconds"));
        let m = unknown_error_message("bad json", Duration::from_secs(15));
        assert!(m.body.contains("next attempt in 15 seconds"));
        assert_ne!(m.subject, connectivity_alert_message("x", Duration::ZERO).subject);
    }
}
