//! SMTP delivery via `lettre`.
//!
//! The synchronous transport runs on the blocking pool so a slow relay never
//! stalls the runtime's worker threads.

use async_trait::async_trait;
use lettre::message::header::ContentType;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Message, SmtpTransport, Transport};
use tracing::{debug, info, warn};

use crate::{Notifier, NotifyError};

#[derive(Clone)]
pub struct SmtpSettings {
    pub from: String,
    pub server: String,
    pub port: u16,
    /// Implicit TLS when true, plain SMTP otherwise.
    pub ssl: bool,
    pub account: Option<String>,
    pub password: Option<String>,
}

impl std::fmt::Debug for SmtpSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SmtpSettings")
            .field("from", &self.from)
            .field("server", &self.server)
            .field("port", &self.port)
            .field("ssl", &self.ssl)
            .field("account", &self.account)
            .field("password", &self.password.as_ref().map(|_| "<REDACTED>"))
            .finish()
    }
}

#[derive(Clone)]
pub struct SmtpNotifier {
    from: Mailbox,
    transport: SmtpTransport,
}

impl std::fmt::Debug for SmtpNotifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SmtpNotifier")
            .field("from", &self.from.to_string())
            .finish_non_exhaustive()
    }
}

impl SmtpNotifier {
    pub fn new(settings: &SmtpSettings) -> Result<Self, NotifyError> {
        let from = parse_mailbox(&settings.from)?;

        let mut builder = if settings.ssl {
            SmtpTransport::relay(&settings.server)
                .map_err(|e| NotifyError::Config(format!("smtp relay setup failed: {e}")))?
        } else {
            SmtpTransport::builder_dangerous(&settings.server)
        };
        builder = builder.port(settings.port);
        if let (Some(account), Some(password)) = (&settings.account, &settings.password) {
            builder = builder.credentials(Credentials::new(account.clone(), password.clone()));
        }

        Ok(Self {
            from,
            transport: builder.build(),
        })
    }
}

fn parse_mailbox(addr: &str) -> Result<Mailbox, NotifyError> {
    addr.parse::<Mailbox>()
        .map_err(|e| NotifyError::Address(format!("{addr}: {e}")))
}

/// Assemble a plain-text message addressed to every parseable recipient.
///
/// Unparseable recipients are skipped; it fails only when none is left.
pub(crate) fn build_message(
    from: &Mailbox,
    recipients: &[String],
    subject: &str,
    body: &str,
) -> Result<Message, NotifyError> {
    let mut builder = Message::builder()
        .from(from.clone())
        .subject(subject)
        .header(ContentType::TEXT_PLAIN);
    let mut last_err = None;
    let mut accepted = 0usize;
    for r in recipients {
        match parse_mailbox(r) {
            Ok(mailbox) => {
                builder = builder.to(mailbox);
                accepted += 1;
            }
            Err(e) => {
                warn!(recipient = %r, error = %e, "skipping unparseable recipient");
                last_err = Some(e);
            }
        }
    }
    if accepted == 0 {
        return Err(last_err
            .unwrap_or_else(|| NotifyError::Address("no recipients".to_string())));
    }
    builder
        .body(body.to_string())
        .map_err(|e| NotifyError::Message(e.to_string()))
}

#[async_trait]
impl Notifier for SmtpNotifier {
    async fn notify(
        &self,
        recipients: &[String],
        subject: &str,
        body: &str,
    ) -> Result<(), NotifyError> {
        if recipients.is_empty() {
            return Ok(());
        }
        let message = build_message(&self.from, recipients, subject, body)?;
        let transport = self.transport.clone();

        debug!(recipients = recipients.len(), subject = %subject, "sending email");
        tokio::task::spawn_blocking(move || transport.send(&message))
            .await
            .map_err(|e| NotifyError::Transport(format!("send task failed: {e}")))?
            .map_err(|e| NotifyError::Transport(e.to_string()))?;

        info!(recipients = %recipients.join(","), subject = %subject, "email sent");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> SmtpSettings {
        SmtpSettings {
            from: "warden@example.com".into(),
            server: "localhost".into(),
            port: 25,
            ssl: false,
            account: Some("warden".into()),
            password: Some("hunter2".into()),
        }
    }

    #[test]
    fn message_carries_all_recipients_and_subject() {
        let from = parse_mailbox("warden@example.com").unwrap();
        let recipients = vec!["a@example.com".to_string(), "b@example.com".to_string()];
        let msg = build_message(&from, &recipients, "hello", "body text").unwrap();
        let raw = String::from_utf8(msg.formatted()).unwrap();
        assert!(raw.contains("Subject: hello"));
        assert!(raw.contains("a@example.com"));
        assert!(raw.contains("b@example.com"));
    }

    #[test]
    fn unparseable_recipient_does_not_block_the_others() {
        let from = parse_mailbox("warden@example.com").unwrap();
        let recipients = vec![
            "owner@example.com".to_string(),
            "typo-no-at-sign".to_string(),
            "sub@example.com".to_string(),
        ];
        let msg = build_message(&from, &recipients, "s", "b").unwrap();
        let raw = String::from_utf8(msg.formatted()).unwrap();
        assert!(raw.contains("owner@example.com"));
        assert!(raw.contains("sub@example.com"));
        assert!(!raw.contains("typo-no-at-sign"));
    }

    #[test]
    fn only_bad_recipients_is_an_address_error() {
        let from = parse_mailbox("warden@example.com").unwrap();
        let err = build_message(&from, &["not an address".to_string()], "s", "b").unwrap_err();
        assert!(matches!(err, NotifyError::Address(_)));
    }

    #[test]
    fn bad_sender_rejected_at_construction() {
        let mut s = settings();
        s.from = "nope".into();
        assert!(matches!(
            SmtpNotifier::new(&s).unwrap_err(),
            NotifyError::Address(_)
        ));
    }

    #[test]
    fn settings_debug_redacts_password() {
        assert!(!format!("{:?}", settings()).contains("hunter2"));
    }

    #[tokio::test]
    async fn empty_recipients_never_touch_the_relay() {
        // Port 1 is never listening; a real send would fail.
        let mut s = settings();
        s.port = 1;
        let n = SmtpNotifier::new(&s).unwrap();
        n.notify(&[], "s", "b").await.unwrap();
    }
}
