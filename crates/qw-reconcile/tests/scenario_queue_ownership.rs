//! Scenario: resolving owners for newly observed queues, and dropping
//! records of queues that disappeared.
//!
//! # Invariants under test
//!
//! 1. `abnormal.queue` is stored with no account and triggers no
//!    notification, even above the warning threshold.
//! 2. An unknown account in `queue/<account>/<suffix>` is auto-created and
//!    owned by the oldest administrator.
//! 3. A configured orphan owner takes precedence over administrators.
//! 4. Queues of reserved accounts are neither stored nor counted as vanished.
//! 5. A snapshot without a message count is skipped but keeps its record.
//! 6. Records whose queue is gone from the broker are removed silently.

use std::sync::Arc;

use qw_config::ReservedPattern;
use qw_reconcile::{Engine, EngineSettings};
use qw_schemas::{QueueRecord, QueueSnapshot};
use qw_testkit::{FakeBroker, MemStore, RecordingNotifier};

struct Fixture {
    broker: Arc<FakeBroker>,
    store: Arc<MemStore>,
    notifier: Arc<RecordingNotifier>,
}

fn fixture() -> Fixture {
    Fixture {
        broker: Arc::new(FakeBroker::new()),
        store: Arc::new(MemStore::new()),
        notifier: Arc::new(RecordingNotifier::new()),
    }
}

fn engine(fx: &Fixture, settings: EngineSettings) -> Engine {
    Engine::new(
        settings,
        fx.broker.clone(),
        fx.store.clone(),
        fx.notifier.clone(),
    )
    .expect("valid thresholds")
}

#[tokio::test]
async fn abnormal_queue_has_no_owner_and_no_notification() {
    let fx = fixture();
    let engine = engine(&fx, EngineSettings::new(20, 30));

    fx.broker.put_queue(QueueSnapshot::new("abnormal.queue", 25));
    let report = engine.tick().await.unwrap();

    assert_eq!(report.created, 1);
    assert_eq!(report.warned, 0);
    let q = fx.store.queue("abnormal.queue").unwrap();
    assert_eq!(q.account_id, None);
    assert!(!q.warned);
    assert_eq!(fx.notifier.count(), 0);
}

#[tokio::test]
async fn unknown_account_is_created_for_first_admin() {
    let fx = fixture();
    let _user = fx.store.seed_owner("user@example.com", false);
    let first_admin = fx.store.seed_owner("root@example.com", true);
    let _second_admin = fx.store.seed_owner("ops@example.com", true);
    let engine = engine(&fx, EngineSettings::new(20, 30));

    fx.broker.put_queue(QueueSnapshot::new("queue/ghost/q1", 1));
    fx.broker.put_queue(QueueSnapshot::new("queue/ghost/q2", 1));
    let report = engine.tick().await.unwrap();

    assert_eq!(report.created, 2);
    assert_eq!(report.accounts_created, 1);
    let account = fx.store.account("ghost").expect("account auto-created");
    assert_eq!(fx.store.owner_ids_of(account.id), vec![first_admin.id]);
    assert_eq!(
        fx.store.queue("queue/ghost/q1").unwrap().account_id,
        Some(account.id)
    );
}

#[tokio::test]
async fn unknown_account_without_admins_has_no_owner() {
    let fx = fixture();
    let engine = engine(&fx, EngineSettings::new(20, 30));

    fx.broker.put_queue(QueueSnapshot::new("queue/ghost/q1", 25));
    let report = engine.tick().await.unwrap();

    let account = fx.store.account("ghost").expect("account auto-created");
    assert!(fx.store.owner_ids_of(account.id).is_empty());
    // Still warned; there is simply nobody to tell.
    assert_eq!(report.warned, 1);
    assert_eq!(fx.notifier.count(), 0);
}

#[tokio::test]
async fn orphan_owner_email_wins_over_admins() {
    let fx = fixture();
    let _admin = fx.store.seed_owner("root@example.com", true);
    let orphan = fx.store.seed_owner("orphans@example.com", false);
    let mut settings = EngineSettings::new(20, 30);
    settings.orphan_owner_email = Some("Orphans@Example.com".to_string());
    let engine = engine(&fx, settings);

    fx.broker.put_queue(QueueSnapshot::new("queue/ghost/q1", 1));
    engine.tick().await.unwrap();

    let account = fx.store.account("ghost").unwrap();
    assert_eq!(fx.store.owner_ids_of(account.id), vec![orphan.id]);
}

#[tokio::test]
async fn reserved_account_queues_are_ignored() {
    let fx = fixture();
    let mut settings = EngineSettings::new(20, 30);
    settings.reserved =
        Some(ReservedPattern::new("taskcluster-.*", Some("reserved".into())).unwrap());
    let engine = engine(&fx, settings);

    fx.broker
        .put_queue(QueueSnapshot::new("queue/taskcluster-queue/q", 10_000));
    fx.broker.put_queue(QueueSnapshot::new("queue/alice/q", 1));
    let report = engine.tick().await.unwrap();

    assert_eq!(report.created, 1);
    assert_eq!(report.skipped, 1);
    assert_eq!(report.vanished, 0);
    assert!(fx.store.queue("queue/taskcluster-queue/q").is_none());
    assert!(fx.store.account("taskcluster-queue").is_none());
    assert!(fx.broker.deleted().is_empty());
}

#[tokio::test]
async fn snapshot_without_messages_is_skipped_but_kept() {
    let fx = fixture();
    fx.store.seed_queue(QueueRecord::new("queue/alice/stats", None));
    let engine = engine(&fx, EngineSettings::new(20, 30));

    let mut snap = QueueSnapshot::new("queue/alice/stats", 0);
    snap.messages = None;
    fx.broker.put_queue(snap);
    fx.broker.put_queue(QueueSnapshot::new("queue/alice/fresh", 0));

    let report = engine.tick().await.unwrap();
    assert_eq!(report.skipped, 1);
    assert_eq!(report.vanished, 0);
    assert!(fx.store.queue("queue/alice/stats").is_some());
    assert!(fx.store.queue("queue/alice/fresh").is_some());
}

#[tokio::test]
async fn vanished_queue_record_is_removed_without_notification() {
    let fx = fixture();
    let o = fx.store.seed_owner("alice@example.com", false);
    fx.store.seed_account("alice", &[&o]);
    let engine = engine(&fx, EngineSettings::new(20, 30));

    fx.broker.put_queue(QueueSnapshot::new("queue/alice/tmp", 1));
    engine.tick().await.unwrap();
    assert!(fx.store.queue("queue/alice/tmp").is_some());

    fx.broker.drop_queue("queue/alice/tmp");
    let report = engine.tick().await.unwrap();

    assert_eq!(report.vanished, 1);
    assert!(fx.store.queue("queue/alice/tmp").is_none());
    assert_eq!(fx.notifier.count(), 0);
    assert!(fx.broker.deleted().is_empty());
}
