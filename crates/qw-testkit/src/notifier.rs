use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use qw_notify::{Notifier, NotifyError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentNotification {
    pub recipients: Vec<String>,
    pub subject: String,
    pub body: String,
}

#[derive(Default)]
struct NotifierState {
    sent: Vec<SentNotification>,
    failing: bool,
}

/// Captures notifications instead of delivering them.
///
/// Empty recipient lists are dropped, matching the real notifiers. While
/// failing, calls are still recorded and then return a transport error.
#[derive(Default)]
pub struct RecordingNotifier {
    state: Mutex<NotifierState>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, NotifierState> {
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    pub fn sent(&self) -> Vec<SentNotification> {
        self.lock().sent.clone()
    }

    pub fn count(&self) -> usize {
        self.lock().sent.len()
    }

    /// Notifications whose subject contains `needle`.
    pub fn with_subject(&self, needle: &str) -> Vec<SentNotification> {
        self.lock()
            .sent
            .iter()
            .filter(|n| n.subject.contains(needle))
            .cloned()
            .collect()
    }

    pub fn set_failing(&self, failing: bool) {
        self.lock().failing = failing;
    }

    pub fn clear(&self) {
        self.lock().sent.clear();
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(
        &self,
        recipients: &[String],
        subject: &str,
        body: &str,
    ) -> Result<(), NotifyError> {
        if recipients.is_empty() {
            return Ok(());
        }
        let mut st = self.lock();
        st.sent.push(SentNotification {
            recipients: recipients.to_vec(),
            subject: subject.to_string(),
            body: body.to_string(),
        });
        if st.failing {
            return Err(NotifyError::Transport("relay unavailable".to_string()));
        }
        Ok(())
    }
}
