use super::{FetchKind, FetchOutcome, SnapshotFetcher};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::debug;

/// Parameters for a polling loop.
pub(crate) struct PollParams {
    pub fetcher: Arc<dyn SnapshotFetcher>,
    pub run_id: String,
    pub interval: Duration,
    pub generation: u64,
    pub outcome_tx: mpsc::UnboundedSender<FetchOutcome>,
}

/// Owned handle to a running polling loop. Cancelling is idempotent and
/// dropping the handle cancels it.
pub(crate) struct Poller {
    task: Option<JoinHandle<()>>,
}

impl Poller {
    /// Fetch immediately, then once per interval until cancelled. Failed fetches
    /// are reported like successful ones and never stop the loop.
    pub fn spawn(params: PollParams) -> Self {
        let task = tokio::spawn(run_poll_loop(params));
        Self { task: Some(task) }
    }

    pub fn cancel(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl Drop for Poller {
    fn drop(&mut self) {
        self.cancel();
    }
}

async fn run_poll_loop(params: PollParams) {
    let PollParams {
        fetcher,
        run_id,
        interval,
        generation,
        outcome_tx,
    } = params;

    // The first tick completes immediately.
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;
        debug!(run_id = %run_id, generation, "polling run snapshot");
        let result = fetcher.fetch_run(&run_id).await;
        let outcome = FetchOutcome {
            generation,
            kind: FetchKind::Poll,
            result,
        };
        if outcome_tx.send(outcome).is_err() {
            break;
        }
    }
}
