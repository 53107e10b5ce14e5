//! Error types for certkit.
//!
//! Two layers of errors exist:
//!
//! - **Driver errors** ([`DriverError`]) are raised by console drivers and travel
//!   through the capability traits as `anyhow::Error`.
//! - **Orchestration errors** classify what went wrong for the operator:
//!
//! | Error | Raised by | Effect on the session |
//! |---|---|---|
//! | [`SelectionError`] | role assignment | stays in `Intro` |
//! | [`ProfileError`] | profile acquisition | `Aborted` |
//! | [`RelationshipError`] | relationship establishment | `Aborted` or check downgraded, per plan |
//! | [`ActionError`] | one role's script/install/launch | recorded per role only |
//!
//! [`SessionError`] wraps all of them for the session engine's public API.

use crate::model::{CheckVerdict, Phase, Role};
use std::time::Duration;
use thiserror::Error;

// =============================================================================
// Driver Errors
// =============================================================================

/// Category of a driver failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverErrorKind {
    /// Console unreachable or connection dropped
    Communication,
    /// Console reported a failure
    Hardware,
    /// Console did not answer in time
    Timeout,
    /// Referenced profile, drive or script does not exist
    NotFound,
    /// Request rejected as malformed
    InvalidParameter,
    /// Anything else
    Unknown,
}

impl std::fmt::Display for DriverErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            DriverErrorKind::Communication => "communication",
            DriverErrorKind::Hardware => "hardware",
            DriverErrorKind::Timeout => "timeout",
            DriverErrorKind::NotFound => "not_found",
            DriverErrorKind::InvalidParameter => "invalid_parameter",
            DriverErrorKind::Unknown => "unknown",
        };
        write!(f, "{}", label)
    }
}

/// Error raised by a console driver.
#[derive(Error, Debug, Clone)]
#[error("Driver '{driver_type}' {kind} error: {message}")]
pub struct DriverError {
    /// Driver that raised the error (usually includes the console id)
    pub driver_type: String,
    /// Failure category
    pub kind: DriverErrorKind,
    /// Detail message
    pub message: String,
}

impl DriverError {
    /// Build a driver error
    pub fn new(
        driver_type: impl Into<String>,
        kind: DriverErrorKind,
        message: impl Into<String>,
    ) -> Self {
        Self {
            driver_type: driver_type.into(),
            kind,
            message: message.into(),
        }
    }
}

// =============================================================================
// Orchestration Errors
// =============================================================================

/// The operator's console selection cannot start this plan.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SelectionError {
    /// Wrong number of consoles selected
    #[error("{selected} consoles are selected. Select {required}.")]
    WrongCount {
        /// Consoles selected
        selected: usize,
        /// Consoles the plan needs
        required: usize,
    },

    /// A selected console is offline
    #[error("The selected device {0} is not connected. Connect the device.")]
    Disconnected(String),

    /// The same console appears twice in the selection
    #[error("The device {0} is selected more than once.")]
    DuplicateDevice(String),

    /// No title chosen in the host's settings
    #[error("No title is selected. Select a title from the setup dialog.")]
    NoTitle,

    /// Title neither installed nor installable on a console
    #[error("The title cannot be installed on {0} as configured.")]
    TitleNotInstallable(String),
}

/// A distinct profile could not be obtained for a role.
#[derive(Error, Debug)]
pub enum ProfileError {
    /// Enumeration, creation, sign-out or sign-in failed on the console
    #[error("There was an error getting a profile from console {device}: {source}")]
    Acquisition {
        /// Console name
        device: String,
        /// Driver failure
        #[source]
        source: anyhow::Error,
    },

    /// Every attempt resolved to a gamertag already used by another role
    #[error("No distinct profile for role {role} on console {device} after {attempts} attempts")]
    NoDistinctProfile {
        /// Role being resolved
        role: Role,
        /// Console name
        device: String,
        /// Attempts made
        attempts: usize,
    },
}

/// A required friendship could not be confirmed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RelationshipError {
    /// Initial attempt and retry both failed
    #[error("Unable to friend profiles {requester} and {accepter} after {attempts} attempts: {last_error}")]
    Unconfirmed {
        /// Gamertag that sent the request
        requester: String,
        /// Gamertag that accepts it
        accepter: String,
        /// Request/accept rounds attempted
        attempts: u32,
        /// Message of the last failure
        last_error: String,
    },
}

/// One role's action in a fan-out did not complete successfully.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ActionError {
    /// The action returned an error (or panicked)
    #[error("{0}")]
    Failed(String),

    /// The join deadline passed first; the worker may still be running
    #[error("did not finish within {after:?}")]
    TimedOut {
        /// Join bound that expired
        after: Duration,
    },

    /// The session's cancellation token fired first
    #[error("cancelled")]
    Cancelled,

    /// A second action for a role already present in the same fan-out
    #[error("role {0} already has an action in this fan-out")]
    DuplicateRole(Role),
}

impl ActionError {
    /// Flatten a driver error chain into a `Failed`
    pub fn failed(err: &anyhow::Error) -> Self {
        Self::Failed(format!("{err:#}"))
    }

    /// The worker never reported back (timed out or cancelled)
    pub fn is_incomplete(&self) -> bool {
        matches!(self, Self::TimedOut { .. } | Self::Cancelled)
    }
}

/// Convenience alias for session-engine results.
pub type SessionResult<T> = std::result::Result<T, SessionError>;

/// Error returned by the setup session engine.
#[derive(Error, Debug)]
pub enum SessionError {
    /// Selection rejected; the session stays in `Intro`
    #[error(transparent)]
    Selection(#[from] SelectionError),

    /// Profile acquisition failed; the session aborted
    #[error(transparent)]
    Profile(#[from] ProfileError),

    /// A required relationship failed; the session aborted
    #[error(transparent)]
    Relationship(#[from] RelationshipError),

    /// Operation not valid in the current phase
    #[error("Cannot {operation} while the session is in phase {phase}")]
    InvalidPhase {
        /// Requested operation
        operation: &'static str,
        /// Phase at the time of the request
        phase: Phase,
    },

    /// The plan defines no check with this id
    #[error("Unknown manual check '{0}'")]
    UnknownCheck(String),

    /// The check already has a verdict
    #[error("Manual check '{0}' already has a result")]
    CheckAlreadyRecorded(String),

    /// Operators record only `Pass` or `Fail`
    #[error("Manual check '{check}' cannot be recorded as {}", .verdict.as_str())]
    VerdictNotAllowed {
        /// Check id
        check: String,
        /// Rejected verdict
        verdict: CheckVerdict,
    },

    /// The plan or harness configuration is inconsistent
    #[error("Invalid setup configuration: {0}")]
    Configuration(String),

    /// The operator cancelled the session
    #[error("Setup was cancelled")]
    Cancelled,
}

impl SessionError {
    /// Errors that leave the session usable (it stays in its current phase)
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::Selection(_)
                | Self::InvalidPhase { .. }
                | Self::UnknownCheck(_)
                | Self::CheckAlreadyRecorded(_)
                | Self::VerdictNotAllowed { .. }
        )
    }
}
