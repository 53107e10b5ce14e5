//! `certkit-core`
//!
//! Core trait definitions and types for the certkit setup orchestrator.
//!
//! This crate defines the boundary between the orchestrator and the
//! collaborators it drives: the console SDK (devices, profile managers,
//! profiles) and the operator host (session log, progress indicators, modal
//! state). Nothing in here talks to hardware; drivers implement the traits.
//!
//! ## Key Types
//!
//! - [`ConsoleDevice`], [`ProfileManager`], [`ConsoleProfile`]: device-side capabilities
//! - [`OperatorHost`], [`ProgressSink`]: host-side capabilities
//! - [`Role`], [`Phase`], [`Outcome`]: orchestration vocabulary
//! - [`SelectionError`], [`ProfileError`], [`RelationshipError`], [`ActionError`],
//!   [`SessionError`]: error taxonomy

pub mod capabilities;
pub mod error;
pub mod model;

pub use capabilities::{ConsoleDevice, ConsoleProfile, OperatorHost, ProfileManager, ProgressSink};
pub use error::{
    ActionError, DriverError, DriverErrorKind, ProfileError, RelationshipError, SelectionError,
    SessionError, SessionResult,
};
pub use model::{
    CheckVerdict, DriveId, Outcome, Phase, Profile, Role, TitleInfo, TitleInstallType, UserSlot,
};
