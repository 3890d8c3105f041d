use crate::transport::{ChannelSignal, LiveChannel, Poller};
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// Resources and flags for one run id. Owned by a single synchronizer; dropping
/// a session releases everything it holds.
pub(crate) struct Session {
    pub run_id: String,
    /// Continuations tagged with another generation are stale.
    pub generation: u64,
    pub initial: Option<JoinHandle<()>>,
    pub live: Option<LiveChannel>,
    pub poller: Option<Poller>,
    /// Set once the live channel has reached `Open`.
    pub has_opened: bool,
    /// Deadline for the first `Open`, if one is configured.
    pub open_deadline: Option<Instant>,
    pub terminal: bool,
}

/// What the live side of a session produced next.
#[derive(Debug)]
pub(crate) enum LiveEvent {
    Signal(Option<ChannelSignal>),
    OpenTimedOut,
}

impl Session {
    pub fn new(run_id: String, generation: u64) -> Self {
        Self {
            run_id,
            generation,
            initial: None,
            live: None,
            poller: None,
            has_opened: false,
            open_deadline: None,
            terminal: false,
        }
    }

    /// Close the live channel, if any.
    pub fn close_live(&mut self) {
        if let Some(mut live) = self.live.take() {
            live.close();
        }
        self.open_deadline = None;
    }

    /// Stop all network activity. Safe to call repeatedly.
    pub fn close(&mut self) {
        if let Some(initial) = self.initial.take() {
            initial.abort();
        }
        self.close_live();
        if let Some(mut poller) = self.poller.take() {
            poller.cancel();
        }
    }

    /// Wait for the next live signal. Pends forever when there is no channel.
    pub async fn next_live_event(&mut self) -> LiveEvent {
        let deadline = if self.has_opened {
            None
        } else {
            self.open_deadline
        };
        let Some(live) = self.live.as_mut() else {
            return futures::future::pending().await;
        };
        match deadline {
            Some(deadline) => tokio::select! {
                signal = live.recv() => LiveEvent::Signal(signal),
                _ = tokio::time::sleep_until(deadline) => LiveEvent::OpenTimedOut,
            },
            None => LiveEvent::Signal(live.recv().await),
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.close();
    }
}

/// Wait on the active session's live side, or forever when idle.
pub(crate) async fn next_live_event(session: Option<&mut Session>) -> LiveEvent {
    match session {
        Some(session) => session.next_live_event().await,
        None => futures::future::pending().await,
    }
}
