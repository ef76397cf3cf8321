//! qw-notify
//!
//! Notifier boundary: `notify(recipients, subject, body)`.
//!
//! - [`SmtpNotifier`] delivers plain-text email through an SMTP relay.
//! - [`LogNotifier`] only logs; used when emails are disabled.
//!
//! An empty recipient list is a no-op for every implementation.

mod smtp;

use std::fmt;

use async_trait::async_trait;
use tracing::info;

pub use smtp::{SmtpNotifier, SmtpSettings};

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotifyError {
    /// A sender or recipient address could not be parsed.
    Address(String),
    /// The message could not be assembled.
    Message(String),
    /// The relay could not be reached or refused the message.
    Transport(String),
    /// The transport is misconfigured.
    Config(String),
}

impl fmt::Display for NotifyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NotifyError::Address(msg) => write!(f, "invalid email address: {msg}"),
            NotifyError::Message(msg) => write!(f, "email build error: {msg}"),
            NotifyError::Transport(msg) => write!(f, "email transport error: {msg}"),
            NotifyError::Config(msg) => write!(f, "email config error: {msg}"),
        }
    }
}

impl std::error::Error for NotifyError {}

// ---------------------------------------------------------------------------
// Notifier trait
// ---------------------------------------------------------------------------

/// Sends one formatted message to a set of recipients.
///
/// Failures are reported, never retried here; the caller decides whether a
/// failed delivery matters.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(
        &self,
        recipients: &[String],
        subject: &str,
        body: &str,
    ) -> Result<(), NotifyError>;
}

/// Logs each notification instead of delivering it.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(
        &self,
        recipients: &[String],
        subject: &str,
        _body: &str,
    ) -> Result<(), NotifyError> {
        if recipients.is_empty() {
            return Ok(());
        }
        info!(
            recipients = %recipients.join(","),
            subject = %subject,
            "email disabled; notification not sent"
        );
        Ok(())
    }
}
