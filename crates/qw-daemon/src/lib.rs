//! qw-daemon library target.
//!
//! Exposes the router, state and wiring helpers for integration tests and
//! for `qw-cli`. The binary `main.rs` depends on this library target.

pub mod api_types;
pub mod routes;
pub mod state;
pub mod wiring;
