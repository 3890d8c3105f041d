//! Text timeline builder for CLI output.
//!
//! Formats the latest run state and the event log as human-readable lines.

use anyhow::Result;
use run_sync::model::{RunState, SyncView};
use time::format_description::well_known::Rfc3339;
use time::macros::format_description;
use time::OffsetDateTime;

/// Pre-formatted lines for text output.
pub(crate) struct Timeline {
    pub lines: Vec<String>,
}

fn parse_timestamp(ts: Option<&str>) -> Option<OffsetDateTime> {
    ts.and_then(|t| OffsetDateTime::parse(t, &Rfc3339).ok())
}

/// Time of day in the timestamp's own offset, or `None` if it doesn't parse.
fn time_of_day(ts: Option<&str>) -> Option<String> {
    let parsed = parse_timestamp(ts)?;
    parsed
        .format(format_description!("[hour]:[minute]:[second]"))
        .ok()
}

/// One log line for a single state.
pub(crate) fn event_line(event: &RunState) -> String {
    match time_of_day(event.timestamp.as_deref()) {
        Some(at) => format!("[{at}] {:<9} {}", event.status.as_str(), event.message),
        None => format!("{:<9} {}", event.status.as_str(), event.message),
    }
}

/// Events ordered by timestamp. Entries without a parseable timestamp sort
/// first; ties keep arrival order.
fn sorted_events(events: &[RunState]) -> Vec<&RunState> {
    let mut sorted: Vec<&RunState> = events.iter().collect();
    sorted.sort_by_key(|e| parse_timestamp(e.timestamp.as_deref()));
    sorted
}

/// Build the full timeline for a session view.
pub(crate) fn build_timeline(view: &SyncView) -> Result<Timeline> {
    let mut lines = Vec::new();
    let latest = view.latest.as_ref();

    if let Some(run_id) = view.run_id.as_deref() {
        lines.push(format!("Run: {run_id}"));
    }
    lines.push(format!(
        "Status: {}",
        latest.map(|l| l.status.as_str()).unwrap_or("queued")
    ));
    lines.push(format!(
        "Message: {}",
        latest
            .map(|l| l.message.as_str())
            .unwrap_or("Waiting for updates from orchestrator…")
    ));
    if let Some(error) = view.error.as_deref() {
        lines.push(format!("Error: {error}"));
    }

    if let Some(latest) = latest {
        if !latest.scenario_id.is_empty() {
            lines.push(format!("Scenario: {}", latest.scenario_id));
        }
        if !latest.parameters.is_empty() {
            lines.push(format!(
                "Parameters: {}",
                serde_json::to_string(&latest.parameters)?
            ));
        }
        match latest.result.as_ref() {
            Some(result) => {
                lines.push("Result:".to_string());
                lines.extend(
                    serde_json::to_string_pretty(result)?
                        .lines()
                        .map(|l| format!("  {l}")),
                );
            }
            None => lines.push("Result: none yet".to_string()),
        }
    }

    if !view.events.is_empty() {
        lines.push(format!("Event log ({}):", view.events.len()));
        for event in sorted_events(&view.events) {
            lines.push(format!("  {}", event_line(event)));
        }
    }

    Ok(Timeline { lines })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use run_sync::model::SyncPhase;
    use serde_json::json;

    fn event(status: &str, message: &str, ts: Option<&str>) -> RunState {
        let mut v = json!({"run_id": "r1", "status": status, "message": message});
        if let Some(ts) = ts {
            v["timestamp"] = json!(ts);
        }
        serde_json::from_value(v).unwrap()
    }

    #[test]
    fn log_is_ordered_by_timestamp() {
        let events = vec![
            event("running", "modeling", Some("2024-05-01T10:00:05+00:00")),
            event("queued", "queued", Some("2024-05-01T10:00:00.123456+00:00")),
            event("running", "no time", None),
        ];
        let sorted: Vec<&str> = sorted_events(&events)
            .iter()
            .map(|e| e.message.as_str())
            .collect();
        assert_eq!(sorted, vec!["no time", "queued", "modeling"]);
    }

    #[test]
    fn event_line_shows_time_of_day() {
        let e = event("running", "modeling", Some("2024-05-01T10:00:05+00:00"));
        assert_eq!(event_line(&e), "[10:00:05] running   modeling");
        let e = event("queued", "queued", Some("not a time"));
        assert_eq!(event_line(&e), "queued    queued");
    }

    #[test]
    fn empty_view_waits_for_updates() {
        let view = SyncView {
            run_id: Some("r1".into()),
            phase: SyncPhase::Initializing,
            ..SyncView::default()
        };
        let timeline = build_timeline(&view).unwrap();
        assert_eq!(
            timeline.lines,
            vec![
                "Run: r1".to_string(),
                "Status: queued".to_string(),
                "Message: Waiting for updates from orchestrator…".to_string(),
            ]
        );
    }

    #[test]
    fn terminal_view_includes_result_and_log() {
        let mut done = event("succeeded", "Completed", None);
        done.scenario_id = "trend_strength".into();
        done.result = Some(json!({"score": 1}));
        let view = SyncView {
            run_id: Some("r1".into()),
            phase: SyncPhase::Terminal,
            events: vec![event("running", "modeling", None), done.clone()],
            latest: Some(done),
            error: None,
            error_kind: None,
        };
        let lines = build_timeline(&view).unwrap().lines;
        assert!(lines.contains(&"Status: succeeded".to_string()));
        assert!(lines.contains(&"Scenario: trend_strength".to_string()));
        assert!(lines.contains(&"    \"score\": 1".to_string()));
        assert!(lines.contains(&"Event log (2):".to_string()));
        assert_eq!(lines.last().unwrap(), "  succeeded Completed");
    }
}
