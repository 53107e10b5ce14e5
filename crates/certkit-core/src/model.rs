//! Orchestration vocabulary shared by drivers, the setup engine and hosts.

use serde::{Deserialize, Serialize};
use std::fmt;

// =============================================================================
// Roles and slots
// =============================================================================

/// A fixed logical position in the setup protocol.
///
/// The meaning of each role is plan-specific: in the two-console multiplayer
/// plan `Child` is the console with multiplayer disabled and `Inviting` is the
/// remote console; in the three-console plan `Primary` is the blocked profile.
/// Declaration order is the canonical role order used by maps and logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Primary (controlling) console
    Primary,
    /// Secondary console
    Secondary,
    /// Tertiary console
    Tertiary,
    /// Constrained console (e.g. multiplayer disabled)
    Child,
    /// Console that issues invitations
    Inviting,
}

impl Role {
    /// Human-readable label
    pub fn label(&self) -> &'static str {
        match self {
            Self::Primary => "primary",
            Self::Secondary => "secondary",
            Self::Tertiary => "tertiary",
            Self::Child => "child",
            Self::Inviting => "inviting",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Local user slot a profile is signed in under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserSlot {
    #[default]
    /// First controller slot
    Zero,
    /// Second controller slot
    One,
    /// Third controller slot
    Two,
    /// Fourth controller slot
    Three,
}

impl UserSlot {
    /// Zero-based slot index
    pub fn index(&self) -> u8 {
        match self {
            Self::Zero => 0,
            Self::One => 1,
            Self::Two => 2,
            Self::Three => 3,
        }
    }
}

// =============================================================================
// Drives and titles
// =============================================================================

/// Name of a storage drive on a console (`HDD`, `MU0`, `USB1`, ...).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DriveId(String);

impl DriveId {
    /// Wrap a drive name
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Drive name as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DriveId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DriveId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for DriveId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// How the title under test reaches a console.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TitleInstallType {
    /// Installed from a content package onto a drive
    #[default]
    ContentPackage,
    /// Streamed from a disc image by the emulation host; started by hand on remote consoles
    DiscEmulation,
    /// Raw file copy
    Raw,
}

impl fmt::Display for TitleInstallType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::ContentPackage => "Content Package",
            Self::DiscEmulation => "Disc Emulation",
            Self::Raw => "Raw",
        };
        f.write_str(label)
    }
}

/// The software under test.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TitleInfo {
    /// Display name; empty means no title was selected
    pub name: String,
    /// Install mechanism
    #[serde(default)]
    pub install_type: TitleInstallType,
    /// Size of the content package plus title update, if known
    #[serde(default)]
    pub package_bytes: u64,
}

impl TitleInfo {
    /// Content-package title with unknown size
    pub fn content_package(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            install_type: TitleInstallType::ContentPackage,
            package_bytes: 0,
        }
    }

    /// Whether the title is started through disc emulation
    pub fn is_emulation(&self) -> bool {
        self.install_type == TitleInstallType::DiscEmulation
    }
}

// =============================================================================
// Profiles
// =============================================================================

/// Snapshot of a profile as resolved for one role.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    /// Gamertag; unique across roles within one session
    pub gamertag: String,
    /// Created by this session (and therefore deleted on teardown)
    pub is_newly_created: bool,
    /// Signed in at the time of the snapshot
    pub signed_in: bool,
}

// =============================================================================
// Session phases and results
// =============================================================================

/// Setup session state machine.
///
/// ```text
/// Intro ─advance─▶ RoleAssignment ─▶ ProfileAcquisition ─▶ RelationshipEstablishment
///                                                                  │
///  Concluded ◀─all checks─ ReadyForManualVerification ◀─ InstallAndLaunch ◀─ ParallelConfiguration
///
///  any non-terminal phase ──failure / cancel──▶ Aborted
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// Waiting for the operator to select consoles and advance
    Intro,
    /// Mapping the selection onto roles
    RoleAssignment,
    /// Finding or creating one distinct profile per role
    ProfileAcquisition,
    /// Friending the profiles the plan requires
    RelationshipEstablishment,
    /// Running configuration scripts on every console
    ParallelConfiguration,
    /// Installing and launching the title on every console
    InstallAndLaunch,
    /// Consoles handed to the operator
    ReadyForManualVerification,
    /// All manual checks recorded
    Concluded,
    /// Setup failed or was cancelled
    Aborted,
}

impl Phase {
    /// Terminal phases never transition again
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Concluded | Self::Aborted)
    }

    /// The automatic successor of a setup phase, if any
    pub fn next_automatic(&self) -> Option<Phase> {
        match self {
            Self::RoleAssignment => Some(Self::ProfileAcquisition),
            Self::ProfileAcquisition => Some(Self::RelationshipEstablishment),
            Self::RelationshipEstablishment => Some(Self::ParallelConfiguration),
            Self::ParallelConfiguration => Some(Self::InstallAndLaunch),
            Self::InstallAndLaunch => Some(Self::ReadyForManualVerification),
            _ => None,
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Intro => "intro",
            Self::RoleAssignment => "role_assignment",
            Self::ProfileAcquisition => "profile_acquisition",
            Self::RelationshipEstablishment => "relationship_establishment",
            Self::ParallelConfiguration => "parallel_configuration",
            Self::InstallAndLaunch => "install_and_launch",
            Self::ReadyForManualVerification => "ready_for_manual_verification",
            Self::Concluded => "concluded",
            Self::Aborted => "aborted",
        };
        f.write_str(label)
    }
}

/// Session verdict. Starts `Pass`; once `Fail`, stays `Fail`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    #[default]
    /// No failure recorded
    Pass,
    /// At least one failure recorded
    Fail,
}

impl Outcome {
    /// Record a failure. There is no way back to `Pass`.
    pub fn fail(&mut self) {
        *self = Self::Fail;
    }

    /// Banner text used in the session summary
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pass => "PASS",
            Self::Fail => "FAIL",
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Operator verdict for one manual check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckVerdict {
    /// Behaviour observed as required
    Pass,
    /// Behaviour not as required
    Fail,
    /// Setup could not establish the preconditions for this check
    CannotVerify,
}

impl CheckVerdict {
    /// Label used in the session log
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pass => "PASS",
            Self::Fail => "FAIL",
            Self::CannotVerify => "CANNOT BE VERIFIED",
        }
    }
}
