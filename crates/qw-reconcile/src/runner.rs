//! Polling loop around [`Engine`].

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{watch, RwLock};
use tracing::{error, info, warn};

use crate::engine::Engine;
use crate::messages::{connectivity_alert_message, unknown_error_message};
use crate::policy::{FailureKind, FailureState};
use crate::types::{TickError, TickReport};

/// Point-in-time view of the loop, served by the daemon's status endpoint.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuardianStatus {
    pub interval_secs: u64,
    pub base_interval_secs: u64,
    pub connectivity_failing: bool,
    pub unknown_failing: bool,
    pub consecutive_failures: u32,
    pub ticks_total: u64,
    pub failures_total: u64,
    pub last_tick_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub last_report: Option<TickReport>,
}

pub type StatusHandle = Arc<RwLock<GuardianStatus>>;

/// What [`Guardian::run_once`] did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    Completed(TickReport),
    Failed {
        kind: FailureKind,
        error: String,
        /// Admins were alerted for this failure.
        alerted: bool,
    },
}

pub struct Guardian {
    engine: Engine,
    failures: FailureState,
    status: StatusHandle,
}

impl std::fmt::Debug for Guardian {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Guardian")
            .field("engine", &self.engine)
            .field("failures", &self.failures)
            .finish_non_exhaustive()
    }
}

impl Guardian {
    /// `step` is added to the interval after each failed tick, up to `max`.
    pub fn new(engine: Engine, base: Duration, step: Duration, max: Duration) -> Self {
        let failures = FailureState::new(base, step, max);
        let status = GuardianStatus {
            interval_secs: failures.interval().as_secs(),
            base_interval_secs: failures.base_interval().as_secs(),
            ..GuardianStatus::default()
        };
        Self {
            engine,
            failures,
            status: Arc::new(RwLock::new(status)),
        }
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    pub fn failures(&self) -> &FailureState {
        &self.failures
    }

    /// Shared handle to the live status.
    pub fn status_handle(&self) -> StatusHandle {
        Arc::clone(&self.status)
    }

    /// Current sleep between ticks.
    pub fn interval(&self) -> Duration {
        self.failures.interval()
    }

    /// Run one tick and apply the failure policy to its result.
    pub async fn run_once(&mut self) -> TickOutcome {
        let outcome = match self.engine.tick().await {
            Ok(report) => {
                if self.failures.record_success() {
                    info!("tick succeeded; leaving failure state");
                }
                TickOutcome::Completed(report)
            }
            Err(e) => self.handle_failure(e).await,
        };
        self.publish(&outcome).await;
        outcome
    }

    async fn handle_failure(&mut self, e: TickError) -> TickOutcome {
        let kind = if e.is_connectivity() {
            FailureKind::Connectivity
        } else {
            FailureKind::Unknown
        };
        let alert = self.failures.record_failure(kind);
        let retry_in = self.failures.interval();
        let error = e.to_string();

        match kind {
            FailureKind::Connectivity => warn!(
                error = %error,
                retry_in_secs = retry_in.as_secs(),
                "cannot reach the broker"
            ),
            FailureKind::Unknown => error!(
                error = %error,
                retry_in_secs = retry_in.as_secs(),
                "tick failed"
            ),
        }

        if alert {
            self.alert_admins(kind, &error, retry_in).await;
        }

        TickOutcome::Failed {
            kind,
            error,
            alerted: alert,
        }
    }

    async fn alert_admins(&self, kind: FailureKind, error: &str, retry_in: Duration) {
        let admins = match self.engine.store().admin_owners().await {
            Ok(a) => a,
            Err(e) => {
                error!(error = %e, "could not load administrators; alert not sent");
                return;
            }
        };
        let recipients: Vec<String> = admins.into_iter().map(|o| o.email).collect();
        let msg = match kind {
            FailureKind::Connectivity => connectivity_alert_message(error, retry_in),
            FailureKind::Unknown => unknown_error_message(error, retry_in),
        };
        if let Err(e) = self
            .engine
            .notifier()
            .notify(&recipients, &msg.subject, &msg.body)
            .await
        {
            warn!(error = %e, "admin alert failed");
        }
    }

    async fn publish(&self, outcome: &TickOutcome) {
        let mut st = self.status.write().await;
        st.ticks_total += 1;
        st.last_tick_at = Some(Utc::now());
        st.interval_secs = self.failures.interval().as_secs();
        st.consecutive_failures = self.failures.consecutive_failures();
        st.connectivity_failing = self.failures.is_alerted(FailureKind::Connectivity);
        st.unknown_failing = self.failures.is_alerted(FailureKind::Unknown);
        match outcome {
            TickOutcome::Completed(report) => {
                st.last_error = None;
                st.last_report = Some(report.clone());
            }
            TickOutcome::Failed { error, .. } => {
                st.failures_total += 1;
                st.last_error = Some(error.clone());
            }
        }
    }

    /// Tick until `shutdown` changes (or its sender is dropped).
    ///
    /// A shutdown during a tick abandons it; already committed store steps
    /// stay committed.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!(
            interval_secs = self.interval().as_secs(),
            warn_threshold = self.engine.settings().warn_threshold,
            delete_threshold = self.engine.settings().delete_threshold,
            "guardian started"
        );
        loop {
            if *shutdown.borrow() {
                break;
            }
            tokio::select! {
                _ = self.run_once() => {}
                _ = shutdown.changed() => break,
            }
            let sleep = self.interval();
            tokio::select! {
                _ = tokio::time::sleep(sleep) => {}
                _ = shutdown.changed() => break,
            }
        }
        info!("guardian stopped");
    }
}
