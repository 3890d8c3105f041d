//! Transport seams between the synchronizer and the run API.
//!
//! The synchronizer only talks to [`SnapshotFetcher`] and [`LiveUpdates`]; the
//! HTTP client implements both, tests substitute scripted versions.

mod poll;

pub(crate) use poll::{PollParams, Poller};

use crate::api::TransportError;
use crate::model::RunState;
use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Lifecycle signals raised by a live channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelSignal {
    /// The channel reached (or re-reached) `Open`.
    Open,
    /// One text payload, expected to be a RunState JSON object.
    Message(String),
    /// The channel failed; the string is a diagnostic detail.
    Error(String),
}

/// Single request/response read of a run's current state.
#[async_trait]
pub trait SnapshotFetcher: Send + Sync + 'static {
    async fn fetch_run(&self, run_id: &str) -> Result<RunState, TransportError>;
}

/// Opens server-push channels keyed by run id.
pub trait LiveUpdates: Send + Sync + 'static {
    fn open(&self, run_id: &str) -> LiveChannel;
}

/// Exclusively owned handle to one open live channel.
///
/// Closing aborts the producer and stops delivery. Closing twice is a no-op and
/// dropping the handle closes it.
pub struct LiveChannel {
    signals: mpsc::UnboundedReceiver<ChannelSignal>,
    task: Option<JoinHandle<()>>,
    closed: bool,
}

impl LiveChannel {
    pub fn new(signals: mpsc::UnboundedReceiver<ChannelSignal>, task: JoinHandle<()>) -> Self {
        Self {
            signals,
            task: Some(task),
            closed: false,
        }
    }

    /// Wrap a receiver whose producer is driven elsewhere.
    pub fn from_receiver(signals: mpsc::UnboundedReceiver<ChannelSignal>) -> Self {
        Self {
            signals,
            task: None,
            closed: false,
        }
    }

    /// Next signal, or `None` once the channel is closed or its producer ended.
    pub async fn recv(&mut self) -> Option<ChannelSignal> {
        if self.closed {
            return None;
        }
        self.signals.recv().await
    }

    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        if let Some(task) = self.task.take() {
            task.abort();
        }
        self.signals.close();
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

impl Drop for LiveChannel {
    fn drop(&mut self) {
        self.close();
    }
}

/// Which path produced a fetch result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FetchKind {
    Initial,
    Poll,
}

/// A completed snapshot fetch, tagged with the session generation that
/// requested it.
#[derive(Debug)]
pub(crate) struct FetchOutcome {
    pub generation: u64,
    pub kind: FetchKind,
    pub result: Result<RunState, TransportError>,
}

/// Spawn the one-shot initial snapshot fetch for a session.
pub(crate) fn spawn_snapshot(
    fetcher: std::sync::Arc<dyn SnapshotFetcher>,
    run_id: String,
    generation: u64,
    outcome_tx: mpsc::UnboundedSender<FetchOutcome>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let result = fetcher.fetch_run(&run_id).await;
        let _ = outcome_tx.send(FetchOutcome {
            generation,
            kind: FetchKind::Initial,
            result,
        });
    })
}
