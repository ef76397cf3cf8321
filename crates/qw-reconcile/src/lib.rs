//! qw-reconcile
//!
//! Reconciliation Engine.
//!
//! - [`Engine::tick`] runs one pass: fetch live queues and bindings, mirror
//!   them into the store, drive the per-queue warn/normal/delete state
//!   machine, converge bindings, drop records of vanished queues.
//! - [`Guardian`] wraps the engine in the polling loop and owns the failure
//!   policy (additive backoff, one admin alert per failure episode).
//!
//! Queue state lives in the store, never in the engine, so a restart picks
//! up exactly where the last committed step left off.

mod engine;
mod messages;
mod ownership;
mod policy;
mod runner;
mod types;

pub use engine::{Engine, QueueCallback};
pub use messages::{
    back_to_normal_message, connectivity_alert_message, deletion_message, unknown_error_message,
    warning_message, Message, UNKNOWN_EXCHANGE,
};
pub use ownership::queue_account;
pub use policy::{FailureKind, FailureState};
pub use runner::{Guardian, GuardianStatus, StatusHandle, TickOutcome};
pub use types::{EngineSettings, ThresholdError, TickError, TickReport};
