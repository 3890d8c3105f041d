use crate::timeline::{build_timeline, event_line};
use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use run_sync::api::{ApiClient, ApiConfig, DEFAULT_MAX_SCENARIOS};
use run_sync::model::{RunStatus, SyncConfig, SyncView};
use run_sync::{LiveUpdates, Synchronizer};
use serde_json::{Map, Value};
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// Watch output: progress goes to stderr as it happens, the report is held
/// back and written to stdout once the watch ends.
enum WatchOutput {
    Progress(String),
    Report(String),
}

/// Spawn a blocking printer so a slow terminal never stalls the watch loop.
fn spawn_watch_printer() -> (
    mpsc::UnboundedSender<WatchOutput>,
    tokio::task::JoinHandle<std::io::Result<()>>,
) {
    let (tx, mut rx) = mpsc::unbounded_channel::<WatchOutput>();
    let handle = tokio::task::spawn_blocking(move || {
        let mut report = Vec::new();
        let mut progress = std::io::stderr().lock();
        while let Some(line) = rx.blocking_recv() {
            match line {
                WatchOutput::Progress(msg) => {
                    let _ = writeln!(progress, "{msg}");
                }
                WatchOutput::Report(msg) => report.push(msg),
            }
        }

        let mut out = std::io::stdout().lock();
        for line in report {
            writeln!(out, "{line}")?;
        }
        out.flush()
    });
    (tx, handle)
}

#[derive(Debug, Parser, Clone)]
#[command(
    name = "run-sync",
    version,
    about = "Follow analysis runs with live updates and polling fallback"
)]
pub struct Cli {
    /// Base URL of the analysis API
    #[arg(
        long,
        global = true,
        env = "RUN_SYNC_API_BASE_URL",
        default_value = "http://localhost:8000"
    )]
    pub base_url: String,

    /// Print JSON and exit (no progress lines)
    #[arg(long, global = true)]
    pub json: bool,

    /// Interval between snapshot polls when live updates are unavailable
    #[arg(long, global = true, default_value = "3s")]
    pub poll_interval: humantime::Duration,

    /// Give up on the live channel if it has not opened within this time
    #[arg(long, global = true)]
    pub open_timeout: Option<humantime::Duration>,

    /// Never open the live channel; poll only
    #[arg(long, global = true)]
    pub no_stream: bool,

    /// Timeout for request/response calls
    #[arg(long, global = true, default_value = "15s")]
    pub request_timeout: humantime::Duration,

    /// Delay before the live channel reconnects after a drop
    #[arg(long, global = true, default_value = "3s")]
    pub reconnect_delay: humantime::Duration,

    /// Client tag sent when opening the live channel
    #[arg(long, global = true, default_value = "cli")]
    pub client_tag: String,

    /// Log filter used when RUST_LOG is unset
    #[arg(long, global = true, default_value = "warn")]
    pub log_level: String,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Follow an existing run until it reaches a terminal status
    Watch { run_id: String },
    /// Submit a scenario run, then follow it
    Submit {
        scenario_id: String,
        /// Run parameter as key=value; values are parsed as JSON when possible
        #[arg(long = "param", value_parser = parse_param)]
        params: Vec<(String, Value)>,
        /// Print the submitted run and exit without following it
        #[arg(long)]
        no_watch: bool,
    },
    /// Ask for ranked scenario suggestions for a prompt
    Suggest {
        prompt: String,
        /// Maximum number of scenarios (1-12)
        #[arg(long, default_value_t = DEFAULT_MAX_SCENARIOS)]
        max: usize,
    },
}

pub async fn run(args: Cli) -> Result<()> {
    let client = ApiClient::new(build_api_config(&args)).context("failed to build HTTP client")?;

    match args.command.clone() {
        Command::Watch { run_id } => watch_run(&args, client, run_id).await,
        Command::Submit {
            scenario_id,
            params,
            no_watch,
        } => {
            let parameters: Map<String, Value> = params.into_iter().collect();
            let submitted = client
                .submit_run(&scenario_id, parameters)
                .await
                .context("failed to submit run")?;
            if no_watch {
                let out = if args.json {
                    serde_json::to_string_pretty(&submitted)?
                } else {
                    format!("{} {}", submitted.run_id, submitted.status)
                };
                println!("{out}");
                return Ok(());
            }
            if !args.json {
                eprintln!("Submitted run {} ({})", submitted.run_id, submitted.status);
            }
            watch_run(&args, client, submitted.run_id).await
        }
        Command::Suggest { prompt, max } => {
            let resp = client
                .suggest_scenarios(&prompt, max)
                .await
                .context("failed to fetch scenario suggestions")?;
            if args.json {
                println!("{}", serde_json::to_string_pretty(&resp)?);
                return Ok(());
            }
            for (i, option) in resp.options.iter().enumerate() {
                println!(
                    "{}. {} [{}] score {:.2}",
                    i + 1,
                    option.title,
                    option.scenario_id,
                    option.score
                );
                println!("   {}", option.short_description);
            }
            Ok(())
        }
    }
}

/// Build an `ApiConfig` from CLI arguments.
pub fn build_api_config(args: &Cli) -> ApiConfig {
    ApiConfig {
        base_url: args.base_url.clone(),
        request_timeout: Duration::from(args.request_timeout),
        user_agent: format!("run-sync/{}", env!("CARGO_PKG_VERSION")),
        client_tag: args.client_tag.clone(),
        reconnect_delay: Duration::from(args.reconnect_delay),
    }
}

/// Build a `SyncConfig` from CLI arguments.
pub fn build_sync_config(args: &Cli) -> SyncConfig {
    SyncConfig {
        poll_interval: Duration::from(args.poll_interval),
        open_timeout: args.open_timeout.map(Duration::from),
        live_updates: !args.no_stream,
    }
}

fn parse_param(raw: &str) -> Result<(String, Value), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected key=value, got {raw:?}"))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(format!("empty parameter name in {raw:?}"));
    }
    let value = serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.to_string()));
    Ok((key.to_string(), value))
}

/// Emit newly appended events and error changes as progress lines.
fn report_progress(
    out_tx: &mpsc::UnboundedSender<WatchOutput>,
    view: &SyncView,
    printed: &mut usize,
    last_error: &mut Option<String>,
) {
    for event in view.events.iter().skip(*printed) {
        let _ = out_tx.send(WatchOutput::Progress(event_line(event)));
    }
    *printed = view.events.len();
    if view.error != *last_error {
        if let Some(error) = view.error.as_deref() {
            let _ = out_tx.send(WatchOutput::Progress(format!("! {error}")));
        }
        *last_error = view.error.clone();
    }
}

/// Follow one run until it is terminal or the user interrupts, then print the
/// timeline (or the final view as JSON).
async fn watch_run(args: &Cli, client: ApiClient, run_id: String) -> Result<()> {
    let client = Arc::new(client);
    let live: Option<Arc<dyn LiveUpdates>> = if args.no_stream {
        None
    } else {
        Some(client.clone())
    };
    let handle = Synchronizer::new(build_sync_config(args), client, live).spawn();
    let (out_tx, out_handle) = spawn_watch_printer();

    handle.attach(run_id.clone()).await;
    let mut rx = handle.subscribe();
    let mut printed = 0usize;
    let mut last_error = None;
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    let interrupted = loop {
        let view = rx.borrow_and_update().clone();
        if !args.json {
            report_progress(&out_tx, &view, &mut printed, &mut last_error);
        }
        if view.is_terminal() {
            break false;
        }
        tokio::select! {
            changed = rx.changed() => {
                if changed.is_err() {
                    break false;
                }
            }
            _ = &mut ctrl_c => break true,
        }
    };

    let view = handle.view();
    handle.shutdown().await;

    if args.json {
        let _ = out_tx.send(WatchOutput::Report(serde_json::to_string_pretty(&view)?));
    } else {
        for line in build_timeline(&view)?.lines {
            let _ = out_tx.send(WatchOutput::Report(line));
        }
    }
    drop(out_tx);
    out_handle
        .await
        .context("output printer stopped")?
        .context("failed to write report")?;

    if interrupted {
        return Ok(());
    }
    match view.latest.as_ref().map(|l| l.status) {
        Some(status @ (RunStatus::Failed | RunStatus::Cancelled)) => {
            Err(anyhow!("run {run_id} finished with status {status}"))
        }
        _ => Ok(()),
    }
}
