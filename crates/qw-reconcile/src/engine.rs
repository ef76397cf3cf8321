use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use qw_broker::BrokerClient;
use qw_db::{Store, StoreError};
use qw_notify::Notifier;
use qw_schemas::{BindingSnapshot, ObservedQueue, QueueRecord, QueueSnapshot, SnapshotGap};
use tracing::{debug, info, warn};

use crate::messages::{
    back_to_normal_message, deletion_message, warning_message, Message, UNKNOWN_EXCHANGE,
};
use crate::ownership::queue_account;
use crate::types::{EngineSettings, ThresholdError, TickError, TickReport};

/// Observer invoked with a queue name.
pub type QueueCallback = Arc<dyn Fn(&str) + Send + Sync>;

/// Result of running the deletion/warn policy on one queue.
enum Verdict {
    Deleted,
    Kept,
}

/// One reconciliation pass over a consistent broker snapshot.
pub struct Engine {
    settings: EngineSettings,
    broker: Arc<dyn BrokerClient>,
    store: Arc<dyn Store>,
    notifier: Arc<dyn Notifier>,
    on_warn: Option<QueueCallback>,
    on_delete: Option<QueueCallback>,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl Engine {
    /// Fails when the deletion threshold is below the warning threshold.
    pub fn new(
        settings: EngineSettings,
        broker: Arc<dyn BrokerClient>,
        store: Arc<dyn Store>,
        notifier: Arc<dyn Notifier>,
    ) -> Result<Self, ThresholdError> {
        if settings.delete_threshold < settings.warn_threshold {
            return Err(ThresholdError {
                warn_threshold: settings.warn_threshold,
                delete_threshold: settings.delete_threshold,
            });
        }
        Ok(Self {
            settings,
            broker,
            store,
            notifier,
            on_warn: None,
            on_delete: None,
        })
    }

    pub fn with_on_warn(mut self, f: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.on_warn = Some(Arc::new(f));
        self
    }

    pub fn with_on_delete(mut self, f: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.on_delete = Some(Arc::new(f));
        self
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    pub fn notifier(&self) -> &Arc<dyn Notifier> {
        &self.notifier
    }

    // -----------------------------------------------------------------------
    // Tick
    // -----------------------------------------------------------------------

    /// Run one full reconciliation pass.
    ///
    /// Every store write commits on its own; an error part-way through leaves
    /// the queues already processed in their new state.
    pub async fn tick(&self) -> Result<TickReport, TickError> {
        let snapshots = self.broker.list_queues().await?;
        let live_bindings = self.broker.list_bindings().await?;

        let mut report = TickReport::default();
        let by_queue = group_bindings(&live_bindings);

        // Every named snapshot counts as live, even when its stats are
        // incomplete, so its record is not dropped as vanished.
        let live_names: HashSet<&str> = snapshots
            .iter()
            .filter_map(|s| s.name.as_deref())
            .collect();
        report.observed = live_names.len();

        for snapshot in &snapshots {
            let observed = match snapshot.observe() {
                Ok(q) => q,
                Err(gap) => {
                    self.skip_snapshot(snapshot, gap);
                    report.skipped += 1;
                    continue;
                }
            };

            let Some(record) = self.resolve_queue(&observed, &mut report).await? else {
                report.skipped += 1;
                continue;
            };

            if let Verdict::Deleted = self.apply_policy(&observed, &record, &mut report).await? {
                continue;
            }

            let bindings = by_queue
                .get(observed.name.as_str())
                .map(Vec::as_slice)
                .unwrap_or(&[]);
            self.reconcile_bindings(&observed.name, bindings, &mut report)
                .await?;
        }

        self.clear_vanished(&live_names, &mut report).await?;

        debug!(
            observed = report.observed,
            created = report.created,
            warned = report.warned,
            normal = report.normal,
            deleted = report.deleted,
            vanished = report.vanished,
            "tick complete"
        );
        Ok(report)
    }

    fn skip_snapshot(&self, snapshot: &QueueSnapshot, gap: SnapshotGap) {
        match gap {
            SnapshotGap::MissingName => warn!("queue snapshot without a name; skipping"),
            SnapshotGap::MissingMessages => debug!(
                queue = %snapshot.name.as_deref().unwrap_or_default(),
                "queue has no message count yet; skipping this tick"
            ),
        }
    }

    // -----------------------------------------------------------------------
    // Queue records
    // -----------------------------------------------------------------------

    /// Load or create the record for a live queue and refresh its stats.
    ///
    /// `None` means the queue belongs to a reserved account and is ignored.
    async fn resolve_queue(
        &self,
        observed: &ObservedQueue,
        report: &mut TickReport,
    ) -> Result<Option<QueueRecord>, TickError> {
        if let Some(mut record) = self.store.queue_by_name(&observed.name).await? {
            if record.size != observed.messages || record.durable != observed.durable {
                self.store
                    .update_queue_stats(&observed.name, observed.messages, observed.durable)
                    .await?;
                record.size = observed.messages;
                record.durable = observed.durable;
            }
            return Ok(Some(record));
        }

        let account_id = match queue_account(&observed.name) {
            Some(account) => {
                if self.is_reserved(account) {
                    debug!(queue = %observed.name, account = %account, "reserved account; ignoring queue");
                    return Ok(None);
                }
                Some(self.resolve_account(account, &observed.name, report).await?)
            }
            None => {
                warn!(queue = %observed.name, "not a standard queue name; storing without owner");
                None
            }
        };

        let mut record = QueueRecord::new(observed.name.clone(), account_id);
        record.size = observed.messages;
        record.durable = observed.durable;

        match self.store.create_queue(&record).await {
            Ok(()) => {
                info!(
                    queue = %record.name,
                    size = record.size,
                    durable = record.durable,
                    "new queue encountered; added to the store"
                );
                report.created += 1;
                Ok(Some(record))
            }
            // Another writer inserted it between our lookup and insert.
            Err(StoreError::Conflict(_)) => Ok(self.store.queue_by_name(&observed.name).await?),
            Err(e) => Err(e.into()),
        }
    }

    fn is_reserved(&self, account: &str) -> bool {
        self.settings
            .reserved
            .as_ref()
            .is_some_and(|r| r.is_reserved(account))
    }

    /// Id of `username`, auto-creating the account when it is unknown.
    async fn resolve_account(
        &self,
        username: &str,
        queue: &str,
        report: &mut TickReport,
    ) -> Result<i64, TickError> {
        if let Some(account) = self.store.account_by_username(username).await? {
            return Ok(account.id);
        }

        let owner_ids = self.fallback_owner_ids().await?;
        match self.store.create_account(username, &owner_ids).await {
            Ok(account) => {
                info!(
                    queue = %queue,
                    account = %username,
                    owners = owner_ids.len(),
                    "queue owner not in the store; account created"
                );
                report.accounts_created += 1;
                Ok(account.id)
            }
            Err(StoreError::Conflict(_)) => self
                .store
                .account_by_username(username)
                .await?
                .map(|a| a.id)
                .ok_or_else(|| StoreError::not_found("account", username).into()),
            Err(e) => Err(e.into()),
        }
    }

    /// Owners for an auto-created account: the configured orphan owner, else
    /// the oldest administrator, else nobody.
    async fn fallback_owner_ids(&self) -> Result<Vec<i64>, TickError> {
        if let Some(email) = &self.settings.orphan_owner_email {
            if let Some(owner) = self.store.owner_by_email(email).await? {
                return Ok(vec![owner.id]);
            }
            warn!(email = %email, "configured orphan owner not found; falling back to an admin");
        }
        let admins = self.store.admin_owners().await?;
        Ok(admins.first().map(|o| vec![o.id]).unwrap_or_default())
    }

    // -----------------------------------------------------------------------
    // State machine
    // -----------------------------------------------------------------------

    async fn apply_policy(
        &self,
        observed: &ObservedQueue,
        record: &QueueRecord,
        report: &mut TickReport,
    ) -> Result<Verdict, TickError> {
        let size = observed.messages;

        // Deletion wins over warning, whatever the ownership or warned flag.
        if size > self.settings.delete_threshold && !record.unbounded {
            self.delete_overgrown(observed, record).await?;
            report.deleted += 1;
            return Ok(Verdict::Deleted);
        }

        // Warn/normal transitions only concern queues with an account.
        if record.account_id.is_none() {
            return Ok(Verdict::Kept);
        }

        if size > self.settings.warn_threshold && !record.warned {
            warn!(
                queue = %observed.name,
                size,
                threshold = self.settings.warn_threshold,
                "queue over warning threshold; warning owners"
            );
            self.store.set_queue_warned(&observed.name, true).await?;
            report.warned += 1;
            if let Some(cb) = &self.on_warn {
                cb(&observed.name);
            }
            self.notify_owners(record, observed, |exchange| {
                warning_message(
                    &observed.name,
                    exchange,
                    observed.messages_ready,
                    observed.messages,
                    self.settings.delete_threshold,
                )
            })
            .await?;
        } else if size <= self.settings.warn_threshold && record.warned {
            info!(
                queue = %observed.name,
                size,
                threshold = self.settings.warn_threshold,
                "warned queue is back under the warning threshold"
            );
            self.store.set_queue_warned(&observed.name, false).await?;
            report.normal += 1;
            self.notify_owners(record, observed, |exchange| {
                back_to_normal_message(
                    &observed.name,
                    exchange,
                    observed.messages_ready,
                    observed.messages,
                )
            })
            .await?;
        }

        Ok(Verdict::Kept)
    }

    /// Delete the broker queue, then its record, then tell the owners.
    async fn delete_overgrown(
        &self,
        observed: &ObservedQueue,
        record: &QueueRecord,
    ) -> Result<(), TickError> {
        warn!(
            queue = %observed.name,
            size = observed.messages,
            threshold = self.settings.delete_threshold,
            "queue over deletion threshold; deleting"
        );

        // Resolve recipients and exchange while the queue still exists.
        let recipients = self.recipients(record).await?;
        let exchange = if recipients.is_empty() {
            None
        } else {
            Some(self.exchange_of(observed).await)
        };

        let vhost = observed.vhost.as_deref().unwrap_or(&self.settings.vhost);
        match self.broker.delete_queue(vhost, &observed.name).await {
            Ok(()) => {}
            Err(e) if e.is_not_found() => {
                debug!(queue = %observed.name, "queue already gone from the broker");
            }
            Err(e) => return Err(e.into()),
        }
        self.store.delete_queue(&observed.name).await?;

        if let Some(cb) = &self.on_delete {
            cb(&observed.name);
        }
        if let Some(exchange) = exchange {
            let msg = deletion_message(
                &observed.name,
                &exchange,
                observed.messages,
                self.settings.delete_threshold,
            );
            self.send(&recipients, &msg).await;
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Notifications
    // -----------------------------------------------------------------------

    async fn notify_owners<F>(
        &self,
        record: &QueueRecord,
        observed: &ObservedQueue,
        build: F,
    ) -> Result<(), TickError>
    where
        F: FnOnce(&str) -> Message,
    {
        let recipients = self.recipients(record).await?;
        if recipients.is_empty() {
            debug!(queue = %record.name, "no recipients; notification skipped");
            return Ok(());
        }
        let exchange = self.exchange_of(observed).await;
        let msg = build(&exchange);
        self.send(&recipients, &msg).await;
        Ok(())
    }

    /// Account owner emails plus queue subscribers, de-duplicated and sorted.
    async fn recipients(&self, record: &QueueRecord) -> Result<Vec<String>, TickError> {
        let mut out: BTreeSet<String> = BTreeSet::new();
        if let Some(account_id) = record.account_id {
            for owner in self.store.account_owners(account_id).await? {
                out.insert(owner.email);
            }
        }
        out.extend(self.store.queue_notifications(&record.name).await?);
        Ok(out.into_iter().collect())
    }

    /// Name of the exchange feeding the queue, for notification text.
    async fn exchange_of(&self, observed: &ObservedQueue) -> String {
        let vhost = observed.vhost.as_deref().unwrap_or(&self.settings.vhost);
        match self.broker.get_queue_detail(vhost, &observed.name).await {
            Ok(detail) => detail
                .originating_exchange()
                .unwrap_or(UNKNOWN_EXCHANGE)
                .to_string(),
            Err(e) => {
                debug!(queue = %observed.name, error = %e, "queue detail unavailable");
                UNKNOWN_EXCHANGE.to_string()
            }
        }
    }

    /// Best-effort delivery; failures are logged and never fail the tick.
    async fn send(&self, recipients: &[String], msg: &Message) {
        if let Err(e) = self
            .notifier
            .notify(recipients, &msg.subject, &msg.body)
            .await
        {
            warn!(
                recipients = %recipients.join(","),
                subject = %msg.subject,
                error = %e,
                "notification failed"
            );
        }
    }

    // -----------------------------------------------------------------------
    // Bindings
    // -----------------------------------------------------------------------

    /// Make the stored bindings of `queue` equal to `live`, compared on the
    /// `(exchange, routing_key)` pair.
    async fn reconcile_bindings(
        &self,
        queue: &str,
        live: &[&BindingSnapshot],
        report: &mut TickReport,
    ) -> Result<(), TickError> {
        let live_by_pair: BTreeMap<(&str, &str), &BindingSnapshot> =
            live.iter().map(|b| (b.pair(), *b)).collect();
        let stored = self.store.queue_bindings(queue).await?;
        let stored_pairs: HashSet<(&str, &str)> = stored.iter().map(|b| b.pair()).collect();

        for (pair, binding) in &live_by_pair {
            if !stored_pairs.contains(pair) {
                self.store.add_binding(&binding.to_record()).await?;
                info!(queue = %queue, binding = %binding.key(), "binding added");
                report.bindings_added += 1;
            }
        }

        for record in &stored {
            if !live_by_pair.contains_key(&record.pair()) {
                self.store.remove_binding(record).await?;
                info!(queue = %queue, binding = %record.key(), "binding removed");
                report.bindings_removed += 1;
            }
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Vanished queues
    // -----------------------------------------------------------------------

    async fn clear_vanished(
        &self,
        live: &HashSet<&str>,
        report: &mut TickReport,
    ) -> Result<(), TickError> {
        for record in self.store.list_queues().await? {
            if !live.contains(record.name.as_str()) {
                self.store.delete_queue(&record.name).await?;
                info!(queue = %record.name, "queue no longer on the broker; record removed");
                report.vanished += 1;
            }
        }
        Ok(())
    }
}

/// Tracked live bindings grouped by destination queue.
fn group_bindings(bindings: &[BindingSnapshot]) -> HashMap<&str, Vec<&BindingSnapshot>> {
    let mut out: HashMap<&str, Vec<&BindingSnapshot>> = HashMap::new();
    for b in bindings.iter().filter(|b| b.is_tracked()) {
        out.entry(b.destination.as_str()).or_default().push(b);
    }
    out
}
