//! Client-side synchronization of long-running analysis runs.
//!
//! A [`Synchronizer`] follows one run id at a time. It fetches an initial
//! snapshot, subscribes to the server's event stream, falls back to interval
//! polling when the stream cannot be opened, and publishes an append-only log of
//! distinct states plus the last error through a [`SyncHandle`].

pub mod api;
pub mod model;
pub mod sync;
pub mod transport;

pub use api::{ApiClient, ApiConfig, TransportError};
pub use model::{RunState, RunStatus, SyncConfig, SyncErrorKind, SyncPhase, SyncView};
pub use sync::{SyncHandle, Synchronizer};
pub use transport::{ChannelSignal, LiveChannel, LiveUpdates, SnapshotFetcher};
