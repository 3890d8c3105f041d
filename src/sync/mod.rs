//! Run state synchronization.
//!
//! This module owns the session lifecycle for one run id at a time: initial
//! snapshot, live subscription with polling fallback, update deduplication and
//! terminal detection. Presentation layers only read the published view.

mod controller;
mod dedup;
mod session;

pub use controller::{SyncHandle, Synchronizer, CONNECTION_INTERRUPTED, STREAMING_UNAVAILABLE};
