use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::time::Duration;

/// Lifecycle status of a run. Closed set, serialized in lowercase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Queued,
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

impl RunStatus {
    /// `succeeded`, `failed` and `cancelled` end a run; nothing follows them.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            RunStatus::Succeeded | RunStatus::Failed | RunStatus::Cancelled
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RunStatus::Queued => "queued",
            RunStatus::Running => "running",
            RunStatus::Succeeded => "succeeded",
            RunStatus::Failed => "failed",
            RunStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One state update for a run, as delivered by snapshots and the live channel.
///
/// Unknown fields are captured in `extra` and written back unchanged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunState {
    pub run_id: String,
    pub status: RunStatus,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub scenario_id: String,
    #[serde(default)]
    pub parameters: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl RunState {
    /// Parse one channel payload.
    pub fn from_json(payload: &str) -> serde_json::Result<Self> {
        serde_json::from_str(payload)
    }

    /// True when `other` carries the same status, timestamp and message.
    /// Other fields are deliberately not compared.
    pub fn same_progress(&self, other: &RunState) -> bool {
        self.status == other.status
            && self.timestamp == other.timestamp
            && self.message == other.message
    }
}

/// A ranked scenario returned by the suggestion service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScenarioOption {
    pub scenario_id: String,
    pub title: String,
    pub short_description: String,
    pub rationale: String,
    #[serde(default)]
    pub inputs: Vec<String>,
    #[serde(default)]
    pub methodology: Vec<String>,
    #[serde(default)]
    pub deliverables: Vec<String>,
    pub score: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuggestionResponse {
    pub prompt: String,
    pub options: Vec<ScenarioOption>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

/// Synchronizer tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    #[serde(with = "humantime_serde")]
    pub poll_interval: Duration,
    /// Deadline for the live channel's first `Open`. `None` waits forever.
    #[serde(default, with = "humantime_serde")]
    pub open_timeout: Option<Duration>,
    /// When false the live channel is never attempted.
    pub live_updates: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(3000),
            open_timeout: None,
            live_updates: true,
        }
    }
}

/// Where a session currently is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SyncPhase {
    Idle,
    Initializing,
    Streaming,
    Polling,
    Terminal,
}

/// Classification of the session's last error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SyncErrorKind {
    /// Initial snapshot fetch failed.
    Snapshot,
    /// Live channel failed before ever opening; polling took over.
    ChannelOpen,
    /// Live channel dropped after being open.
    ChannelDrop,
    /// A polling tick failed.
    Poll,
}

/// Snapshot of a session as exposed to observers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncView {
    pub run_id: Option<String>,
    pub phase: SyncPhase,
    pub events: Vec<RunState>,
    pub latest: Option<RunState>,
    pub error: Option<String>,
    pub error_kind: Option<SyncErrorKind>,
}

impl Default for SyncView {
    fn default() -> Self {
        Self {
            run_id: None,
            phase: SyncPhase::Idle,
            events: Vec::new(),
            latest: None,
            error: None,
            error_kind: None,
        }
    }
}

impl SyncView {
    pub fn is_terminal(&self) -> bool {
        self.phase == SyncPhase::Terminal
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn unknown_fields_survive_a_round_trip() {
        let raw = json!({
            "run_id": "r1",
            "status": "running",
            "message": "modeling",
            "scenario_id": "trend_strength",
            "parameters": {"symbol": "AAPL"},
            "progress": 0.4,
            "stage": {"name": "fit"}
        });
        let state: RunState = serde_json::from_value(raw.clone()).unwrap();
        assert_eq!(state.status, RunStatus::Running);
        assert_eq!(state.extra.get("progress"), Some(&json!(0.4)));
        assert!(state.timestamp.is_none());

        let back = serde_json::to_value(&state).unwrap();
        assert_eq!(back, raw);
    }

    #[test]
    fn missing_optional_fields_default() {
        let state = RunState::from_json(r#"{"run_id":"r1","status":"queued"}"#).unwrap();
        assert_eq!(state.message, "");
        assert!(state.parameters.is_empty());
        assert!(state.result.is_none());
    }

    #[test]
    fn unknown_status_is_rejected() {
        assert!(RunState::from_json(r#"{"run_id":"r1","status":"paused"}"#).is_err());
    }

    #[test]
    fn terminal_statuses() {
        assert!(!RunStatus::Queued.is_terminal());
        assert!(!RunStatus::Running.is_terminal());
        assert!(RunStatus::Succeeded.is_terminal());
        assert!(RunStatus::Failed.is_terminal());
        assert!(RunStatus::Cancelled.is_terminal());
    }
}
