//! Scenario: the polling loop ticks on its interval and stops cleanly when
//! asked, without alerting anyone.

use std::sync::Arc;
use std::time::Duration;

use qw_reconcile::{Engine, EngineSettings, Guardian};
use qw_schemas::QueueSnapshot;
use qw_testkit::{FakeBroker, MemStore, RecordingNotifier};
use tokio::sync::watch;

#[tokio::test(start_paused = true)]
async fn loop_ticks_until_shutdown() {
    let broker = Arc::new(FakeBroker::new());
    let store = Arc::new(MemStore::new());
    let notifier = Arc::new(RecordingNotifier::new());
    store.seed_owner("admin@example.com", true);
    broker.put_queue(QueueSnapshot::new("queue/alice/q", 1));

    let engine = Engine::new(
        EngineSettings::new(20, 30),
        broker.clone(),
        store.clone(),
        notifier.clone(),
    )
    .expect("valid thresholds");
    let guardian = Guardian::new(
        engine,
        Duration::from_secs(5),
        Duration::from_secs(5),
        Duration::from_secs(60),
    );
    let status = guardian.status_handle();

    let (tx, rx) = watch::channel(false);
    let handle = tokio::spawn(guardian.run(rx));

    tokio::time::sleep(Duration::from_secs(12)).await;
    tx.send(true).unwrap();
    handle.await.unwrap();

    let st = status.read().await.clone();
    assert!(st.ticks_total >= 2, "ticks_total = {}", st.ticks_total);
    assert_eq!(st.failures_total, 0);
    assert!(store.queue("queue/alice/q").is_some());
    assert_eq!(notifier.count(), 0);
}
