//! Multi-console setup orchestration.
//!
//! A setup session takes the consoles an operator selected, binds them to
//! named roles, signs distinct profiles in, friends the profiles a plan asks
//! for, runs per-role configuration scripts in parallel, installs and
//! launches the title under test, then hands over to the operator for manual
//! verification. Teardown restores every console when the session ends.
//!
//! - [`roles`] - selection validation and role binding
//! - [`profiles`] - profile acquisition and de-duplication
//! - [`relationship`] - friend request/accept with one retry
//! - [`fanout`] - parallel per-role actions with a bounded join
//! - [`install`] - install and launch across roles
//! - [`plans`] - declarative setup plans and the built-in ones
//! - [`events`] - event stream, operator log and status board
//! - [`session`] - the [`SessionEngine`] state machine

pub mod events;
pub mod fanout;
pub mod install;
pub mod plans;
pub mod profiles;
pub mod relationship;
pub mod roles;
pub mod session;

pub use events::{SessionEvent, SessionLog, StatusBoard};
pub use fanout::{run_parallel, Action, ActionResults, FanOut, JoinTimeout};
pub use install::{best_available_drive, install_and_launch, InstallRequest};
pub use plans::{ConfigStep, ManualCheck, RelationshipPolicy, RelationshipSpec, SetupPlan};
pub use profiles::{acquire_distinct_profiles, acquire_profile, AcquiredProfile, CreatedProfiles};
pub use relationship::{are_friended, ensure_friended, FriendOutcome};
pub use roles::{assign_roles, RoleLayout, RoleMap};
pub use session::{CheckState, RoleBinding, SessionEngine, SessionSettings, SetupSession};
