use crate::model::RunState;

/// Result of offering one candidate update to the log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Applied {
    /// The candidate was appended and is now the latest entry.
    pub appended: bool,
    /// The candidate carries a terminal status.
    pub terminal: bool,
}

/// Append `candidate` unless it matches the last entry on status, timestamp
/// and message. The log is append-only; its last entry is the latest state.
pub(crate) fn apply_update(log: &mut Vec<RunState>, candidate: RunState) -> Applied {
    let terminal = is_terminal(&candidate);
    if log.last().is_some_and(|last| last.same_progress(&candidate)) {
        return Applied {
            appended: false,
            terminal,
        };
    }
    log.push(candidate);
    Applied {
        appended: true,
        terminal,
    }
}

pub(crate) fn is_terminal(state: &RunState) -> bool {
    state.status.is_terminal()
}
