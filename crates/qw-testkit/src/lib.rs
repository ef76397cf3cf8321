//! qw-testkit
//!
//! In-memory doubles for the three collaborators of the reconciliation
//! engine. Each double records what was asked of it so scenario tests can
//! assert on calls, not just on final state.
//!
//! - [`FakeBroker`]: scripted queue/binding listings, recorded deletions,
//!   switchable failure.
//! - [`MemStore`]: full [`qw_db::Store`] over `BTreeMap`s with a mutation log.
//! - [`RecordingNotifier`]: captures every notification.

mod broker;
mod notifier;
mod store;

pub use broker::FakeBroker;
pub use notifier::{RecordingNotifier, SentNotification};
pub use store::MemStore;
