//! Run state synchronizer.
//!
//! Owns one session at a time and emits a [`SyncView`] for presentation layers.

use super::dedup::{apply_update, is_terminal};
use super::session::{next_live_event, LiveEvent, Session};
use crate::model::{RunState, SyncConfig, SyncErrorKind, SyncPhase, SyncView};
use crate::transport::{
    spawn_snapshot, ChannelSignal, FetchKind, FetchOutcome, LiveUpdates, PollParams, Poller,
    SnapshotFetcher,
};
use std::sync::Arc;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

pub const STREAMING_UNAVAILABLE: &str = "Streaming unavailable. Falling back to periodic refresh.";
pub const CONNECTION_INTERRUPTED: &str = "Connection interrupted. Attempting to reconnect…";
const SNAPSHOT_FAILED: &str = "Unable to load run state.";
const POLL_FAILED: &str = "Unable to refresh run status.";

/// Commands sent by callers to the synchronizer task.
#[derive(Debug)]
enum SyncCommand {
    Attach {
        run_id: String,
        ack: oneshot::Sender<()>,
    },
    Detach {
        ack: oneshot::Sender<()>,
    },
    Shutdown,
}

/// Keeps a caller's view of one remote run up to date.
///
/// Fetches an initial snapshot, subscribes to live updates, and falls back to
/// interval polling when the live channel cannot be opened.
pub struct Synchronizer {
    cfg: SyncConfig,
    fetcher: Arc<dyn SnapshotFetcher>,
    live: Option<Arc<dyn LiveUpdates>>,
}

impl Synchronizer {
    /// `live = None` means live updates are unsupported; sessions poll.
    pub fn new(
        cfg: SyncConfig,
        fetcher: Arc<dyn SnapshotFetcher>,
        live: Option<Arc<dyn LiveUpdates>>,
    ) -> Self {
        Self { cfg, fetcher, live }
    }

    /// Start the synchronizer task and return its control handle.
    pub fn spawn(self) -> SyncHandle {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (actor, view_rx, outcome_rx) = SyncActor::new(self);
        let task = tokio::spawn(actor.run(cmd_rx, outcome_rx));
        SyncHandle {
            cmd_tx,
            view_rx,
            task: Some(task),
        }
    }
}

/// Caller-side handle. Dropping it stops the synchronizer and releases every
/// transport it holds.
pub struct SyncHandle {
    cmd_tx: UnboundedSender<SyncCommand>,
    view_rx: watch::Receiver<SyncView>,
    task: Option<JoinHandle<()>>,
}

impl SyncHandle {
    /// Start synchronizing `run_id`, discarding any previous session. Returns
    /// once the previous session is torn down and the view is reset.
    pub async fn attach(&self, run_id: impl Into<String>) {
        let (ack, done) = oneshot::channel();
        let cmd = SyncCommand::Attach {
            run_id: run_id.into(),
            ack,
        };
        if self.cmd_tx.send(cmd).is_ok() {
            let _ = done.await;
        }
    }

    /// Tear down the active session. Returns once every transport is closed.
    pub async fn detach(&self) {
        let (ack, done) = oneshot::channel();
        if self.cmd_tx.send(SyncCommand::Detach { ack }).is_ok() {
            let _ = done.await;
        }
    }

    /// Current view, without waiting.
    pub fn view(&self) -> SyncView {
        self.view_rx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SyncView> {
        self.view_rx.clone()
    }

    /// Resolve once the active session reaches a terminal status.
    pub async fn wait_terminal(&self) -> SyncView {
        let mut rx = self.view_rx.clone();
        let reached = rx.wait_for(SyncView::is_terminal).await.map(|v| v.clone());
        match reached {
            Ok(view) => view,
            Err(_) => self.view(),
        }
    }

    /// Stop the synchronizer and wait for it to finish.
    pub async fn shutdown(mut self) {
        let _ = self.cmd_tx.send(SyncCommand::Shutdown);
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for SyncHandle {
    fn drop(&mut self) {
        // Dropping a JoinHandle does not cancel the task.
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

/// The single task that owns session state. Commands, fetch outcomes and live
/// signals are handled one at a time, in completion order.
struct SyncActor {
    cfg: SyncConfig,
    fetcher: Arc<dyn SnapshotFetcher>,
    live: Option<Arc<dyn LiveUpdates>>,
    view_tx: watch::Sender<SyncView>,
    outcome_tx: UnboundedSender<FetchOutcome>,
    session: Option<Session>,
    generation: u64,
}

impl SyncActor {
    fn new(
        sync: Synchronizer,
    ) -> (
        Self,
        watch::Receiver<SyncView>,
        UnboundedReceiver<FetchOutcome>,
    ) {
        let (view_tx, view_rx) = watch::channel(SyncView::default());
        let (outcome_tx, outcome_rx) = mpsc::unbounded_channel();
        let actor = Self {
            cfg: sync.cfg,
            fetcher: sync.fetcher,
            live: sync.live,
            view_tx,
            outcome_tx,
            session: None,
            generation: 0,
        };
        (actor, view_rx, outcome_rx)
    }

    async fn run(
        mut self,
        mut cmd_rx: UnboundedReceiver<SyncCommand>,
        mut outcome_rx: UnboundedReceiver<FetchOutcome>,
    ) {
        loop {
            tokio::select! {
                cmd = cmd_rx.recv() => {
                    match cmd {
                        Some(SyncCommand::Attach { run_id, ack }) => {
                            self.attach(run_id);
                            let _ = ack.send(());
                        }
                        Some(SyncCommand::Detach { ack }) => {
                            self.detach();
                            let _ = ack.send(());
                        }
                        Some(SyncCommand::Shutdown) | None => {
                            self.detach();
                            break;
                        }
                    }
                }
                Some(outcome) = outcome_rx.recv() => self.on_fetch(outcome),
                event = next_live_event(self.session.as_mut()) => self.on_live_event(event),
            }
        }
    }

    fn attach(&mut self, run_id: String) {
        if self.session.as_ref().is_some_and(|s| s.run_id == run_id) {
            debug!(%run_id, "already synchronizing run");
            return;
        }
        self.close_session();

        self.generation += 1;
        let generation = self.generation;
        info!(%run_id, generation, "starting run session");
        self.view_tx.send_replace(SyncView {
            run_id: Some(run_id.clone()),
            phase: SyncPhase::Initializing,
            ..SyncView::default()
        });

        let mut session = Session::new(run_id.clone(), generation);
        session.initial = Some(spawn_snapshot(
            self.fetcher.clone(),
            run_id.clone(),
            generation,
            self.outcome_tx.clone(),
        ));

        let live = if self.cfg.live_updates {
            self.live.clone()
        } else {
            None
        };
        let has_live = live.is_some();
        if let Some(live) = live {
            session.live = Some(live.open(&run_id));
            session.open_deadline = self.cfg.open_timeout.map(|t| Instant::now() + t);
        }
        self.session = Some(session);

        if !has_live {
            debug!(%run_id, "live updates unavailable, polling");
            self.start_polling();
        }
    }

    fn detach(&mut self) {
        self.close_session();
        self.view_tx.send_replace(SyncView::default());
    }

    fn close_session(&mut self) {
        if let Some(mut session) = self.session.take() {
            session.close();
            info!(run_id = %session.run_id, generation = session.generation, "run session closed");
        }
    }

    fn start_polling(&mut self) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        if session.poller.is_some() || session.terminal {
            return;
        }
        session.poller = Some(Poller::spawn(PollParams {
            fetcher: self.fetcher.clone(),
            run_id: session.run_id.clone(),
            interval: self.cfg.poll_interval,
            generation: session.generation,
            outcome_tx: self.outcome_tx.clone(),
        }));
        self.view_tx.send_modify(|view| view.phase = SyncPhase::Polling);
    }

    fn on_fetch(&mut self, outcome: FetchOutcome) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        if outcome.generation != session.generation {
            debug!(generation = outcome.generation, "dropping stale fetch result");
            return;
        }
        if session.terminal {
            return;
        }
        if outcome.kind == FetchKind::Initial {
            session.initial = None;
        }

        match outcome.result {
            Ok(state) => self.accept(state),
            Err(err) => {
                let (kind, fallback) = match outcome.kind {
                    FetchKind::Initial => (SyncErrorKind::Snapshot, SNAPSHOT_FAILED),
                    FetchKind::Poll => (SyncErrorKind::Poll, POLL_FAILED),
                };
                let detail = err.detail();
                warn!(kind = ?outcome.kind, %detail, "run snapshot fetch failed");
                let message = if detail.trim().is_empty() {
                    fallback.to_string()
                } else {
                    detail
                };
                self.set_error(kind, message);
            }
        }
    }

    fn on_live_event(&mut self, event: LiveEvent) {
        match event {
            LiveEvent::Signal(Some(ChannelSignal::Open)) => self.on_open(),
            LiveEvent::Signal(Some(ChannelSignal::Message(payload))) => {
                match RunState::from_json(&payload) {
                    Ok(state) => self.accept(state),
                    Err(e) => warn!(error = %e, "failed to parse event payload"),
                }
            }
            LiveEvent::Signal(Some(ChannelSignal::Error(detail))) => self.on_channel_error(&detail),
            LiveEvent::Signal(None) => {
                let opened = self.session.as_ref().is_some_and(|s| s.has_opened);
                if opened {
                    debug!("live channel ended");
                    if let Some(session) = self.session.as_mut() {
                        session.close_live();
                    }
                } else {
                    self.on_channel_error("live channel closed before opening");
                }
            }
            LiveEvent::OpenTimedOut => self.on_channel_error("timed out waiting for live channel"),
        }
    }

    fn on_open(&mut self) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        session.has_opened = true;
        session.open_deadline = None;
        info!(run_id = %session.run_id, "live channel open");
        self.view_tx.send_modify(|view| {
            if view.phase == SyncPhase::Initializing {
                view.phase = SyncPhase::Streaming;
            }
            view.error = None;
            view.error_kind = None;
        });
    }

    fn on_channel_error(&mut self, detail: &str) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        if session.has_opened {
            warn!(run_id = %session.run_id, %detail, "live channel interrupted");
            self.set_error(SyncErrorKind::ChannelDrop, CONNECTION_INTERRUPTED.to_string());
            return;
        }
        warn!(run_id = %session.run_id, %detail, "live channel unavailable, falling back to polling");
        session.close_live();
        self.set_error(SyncErrorKind::ChannelOpen, STREAMING_UNAVAILABLE.to_string());
        self.start_polling();
    }

    fn accept(&mut self, state: RunState) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        if session.terminal {
            return;
        }
        if state.run_id != session.run_id {
            warn!(expected = %session.run_id, got = %state.run_id, "ignoring update for another run");
            return;
        }

        let terminal = is_terminal(&state);
        self.view_tx.send_modify(|view| {
            let applied = apply_update(&mut view.events, state);
            if applied.appended {
                view.latest = view.events.last().cloned();
            }
            view.error = None;
            view.error_kind = None;
            if applied.terminal {
                view.phase = SyncPhase::Terminal;
            }
        });

        if terminal {
            session.terminal = true;
            session.close();
            info!(run_id = %session.run_id, "run reached terminal status");
        }
    }

    fn set_error(&self, kind: SyncErrorKind, message: String) {
        self.view_tx.send_modify(|view| {
            view.error = Some(message);
            view.error_kind = Some(kind);
        });
    }
}
