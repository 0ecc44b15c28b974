//! Client-side reconciliation for the two delivery paths.
//!
//! Long-poll snapshots and pushed stream events race against each other
//! with no server-side coordination, so the same message routinely arrives
//! twice. This crate is the transport-agnostic state machine a UI embeds:
//! it merges both sources idempotently by message id, advances a single
//! monotonic cursor, and reports what the UI should do as [`Effect`]s
//! instead of performing any I/O itself.

pub mod backoff;
pub mod reconcile;

pub use backoff::Backoff;
pub use reconcile::{ClientState, Effect};
