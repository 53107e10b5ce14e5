//! Session event stream, operator log and per-role status board.
//!
//! UI layers subscribe to [`SessionEvent`]s instead of sharing mutable state
//! with the engine. The log and the status board are both append-only and
//! publish every entry on the same broadcast channel.

use certkit_core::capabilities::OperatorHost;
use certkit_core::error::ActionError;
use certkit_core::model::{CheckVerdict, Outcome, Phase, Role};
use parking_lot::{Mutex, RwLock};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::broadcast;

/// Capacity of the event channel; slow subscribers lag rather than block.
pub const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// Update published by a setup session.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// The session moved to a new phase
    PhaseChanged {
        /// Previous phase
        from: Phase,
        /// New phase
        to: Phase,
    },
    /// New status text for one role
    Status {
        /// Role the text belongs to
        role: Role,
        /// Status text
        text: String,
    },
    /// Line appended to the operator log
    Log(String),
    /// One role's action in a fan-out finished (or was given up on)
    ActionFinished {
        /// Phase that ran the action
        phase: Phase,
        /// Role that ran it
        role: Role,
        /// Result as seen at the join
        result: Result<(), ActionError>,
    },
    /// A manual check received a verdict
    CheckRecorded {
        /// Check id
        id: String,
        /// Verdict
        verdict: CheckVerdict,
    },
    /// Teardown finished and the final result was logged
    Finished {
        /// Final outcome
        outcome: Outcome,
    },
}

/// Append-only operator log, mirrored to the host and the event stream.
pub struct SessionLog {
    lines: Mutex<Vec<String>>,
    host: Arc<dyn OperatorHost>,
    events: broadcast::Sender<SessionEvent>,
}

impl SessionLog {
    /// New empty log
    pub fn new(host: Arc<dyn OperatorHost>, events: broadcast::Sender<SessionEvent>) -> Self {
        Self {
            lines: Mutex::new(Vec::new()),
            host,
            events,
        }
    }

    /// Append one line
    pub fn append(&self, line: impl Into<String>) {
        let line = line.into();
        tracing::info!(target: "certkit::session_log", "{}", line);
        self.lines.lock().push(line.clone());
        self.host.log(&line);
        let _ = self.events.send(SessionEvent::Log(line));
    }

    /// Copy of every line so far
    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().clone()
    }
}

/// Per-role status text. Each role's history only grows.
pub struct StatusBoard {
    entries: RwLock<BTreeMap<Role, Vec<String>>>,
    events: broadcast::Sender<SessionEvent>,
}

impl StatusBoard {
    /// Empty board
    pub fn new(events: broadcast::Sender<SessionEvent>) -> Self {
        Self {
            entries: RwLock::new(BTreeMap::new()),
            events,
        }
    }

    /// Publish new status text for `role`
    pub fn post(&self, role: Role, text: impl Into<String>) {
        let text = text.into();
        tracing::debug!(role = %role, status = %text, "Status");
        self.entries
            .write()
            .entry(role)
            .or_default()
            .push(text.clone());
        let _ = self.events.send(SessionEvent::Status { role, text });
    }

    /// Latest text for `role`
    pub fn current(&self, role: Role) -> Option<String> {
        self.entries
            .read()
            .get(&role)
            .and_then(|history| history.last().cloned())
    }

    /// Full history for `role`
    pub fn history(&self, role: Role) -> Vec<String> {
        self.entries.read().get(&role).cloned().unwrap_or_default()
    }

    /// Latest text of every role
    pub fn snapshot(&self) -> BTreeMap<Role, String> {
        self.entries
            .read()
            .iter()
            .filter_map(|(role, history)| history.last().map(|text| (*role, text.clone())))
            .collect()
    }
}
