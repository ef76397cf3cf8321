//! Scenario: a deletion threshold below the warning threshold aborts
//! construction; equal thresholds are allowed.

use std::sync::Arc;

use qw_reconcile::{Engine, EngineSettings, ThresholdError};
use qw_testkit::{FakeBroker, MemStore, RecordingNotifier};

fn build(warn: i64, del: i64) -> Result<Engine, ThresholdError> {
    Engine::new(
        EngineSettings::new(warn, del),
        Arc::new(FakeBroker::new()),
        Arc::new(MemStore::new()),
        Arc::new(RecordingNotifier::new()),
    )
}

#[test]
fn delete_below_warn_is_rejected() {
    let err = build(30, 20).unwrap_err();
    assert_eq!(
        err,
        ThresholdError {
            warn_threshold: 30,
            delete_threshold: 20
        }
    );
    assert!(err.to_string().contains("can't be smaller"));
}

#[test]
fn equal_thresholds_are_accepted() {
    assert!(build(20, 20).is_ok());
}
