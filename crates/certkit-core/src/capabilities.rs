//! Console and Host Capabilities
//!
//! The orchestrator never talks to a console SDK or a UI toolkit directly.
//! It drives these traits instead:
//!
//! - [`ConsoleDevice`]: one hardware unit (identity, drives, install, launch, scripts)
//! - [`ProfileManager`]: the profile store of one console
//! - [`ConsoleProfile`]: one user identity (sign-in, friends)
//! - [`OperatorHost`]: the host application (session log, progress, modal state)
//! - [`ProgressSink`]: one progress indicator opened by the host
//!
//! # Design Philosophy
//!
//! Each device-side capability:
//! - Is async (uses #[async_trait])
//! - Is thread-safe (requires Send + Sync)
//! - Uses anyhow::Result for errors
//!
//! Handles are shared as `Arc<dyn Trait>` so the orchestrator is written once
//! against the capability surface, with no downcasting to concrete drivers.
//!
//! # Example
//!
//! ```rust,ignore
//! async fn prepare(device: &dyn ConsoleDevice, drive: &DriveId) -> Result<()> {
//!     if !device.is_title_installed(drive).await? {
//!         device.install_title(Some(drive), None).await?;
//!     }
//!     device.launch_title(Some(drive)).await
//! }
//! ```

use crate::model::{DriveId, UserSlot};
use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;

// =============================================================================
// Device-side capabilities
// =============================================================================

/// Capability: one user identity on a console.
///
/// # Contract
/// - Friend operations address the other party by gamertag
/// - `enumerate_friends` returns an empty list for a profile with no friends;
///   an error means the query itself failed
#[async_trait]
pub trait ConsoleProfile: Send + Sync {
    /// Gamertag of this profile
    fn gamertag(&self) -> &str;

    /// Sign in under a local user slot
    async fn sign_in(&self, slot: UserSlot) -> Result<()>;

    /// Sign this profile out
    async fn sign_out(&self) -> Result<()>;

    /// Whether the profile is currently signed in
    async fn is_signed_in(&self) -> Result<bool>;

    /// Gamertags on this profile's friend list
    async fn enumerate_friends(&self) -> Result<Vec<String>>;

    /// Send a friend request to `target`
    async fn send_friend_request(&self, target: &str) -> Result<()>;

    /// Accept a pending friend request sent by `from`
    async fn accept_friend_request(&self, from: &str) -> Result<()>;
}

/// Capability: the profile store of one console.
#[async_trait]
pub trait ProfileManager: Send + Sync {
    /// Profiles stored on the console, in the console's enumeration order
    async fn enumerate_profiles(&self) -> Result<Vec<Arc<dyn ConsoleProfile>>>;

    /// Create one new profile with a generated gamertag
    async fn create_profile(&self) -> Result<Arc<dyn ConsoleProfile>>;

    /// Make `gamertag` the console's default profile
    async fn set_default_profile(&self, gamertag: &str) -> Result<()>;

    /// Sign out every user signed in on the console
    async fn sign_out_all(&self) -> Result<()>;

    /// Delete the profile `gamertag` from the console
    async fn delete_profile(&self, gamertag: &str) -> Result<()>;
}

/// Capability: one console.
///
/// # Contract
/// - Identity (`id`, `name`, `is_default`) never changes for a handle
/// - `is_connected` and `can_install_title` report cached state and never block
/// - `install_title(None, ..)` installs to the console's preferred drive, or
///   starts disc emulation for emulated titles
/// - `launch_title(None)` launches from wherever the title is installed
#[async_trait]
pub trait ConsoleDevice: Send + Sync {
    /// Stable identifier
    fn id(&self) -> &str;

    /// Display name
    fn name(&self) -> &str;

    /// Flagged as the host's default console
    fn is_default(&self) -> bool;

    /// Last known connection state
    fn is_connected(&self) -> bool;

    /// Whether the title can be installed as configured
    fn can_install_title(&self) -> bool;

    /// (Re)connect to the console
    async fn connect(&self) -> Result<()>;

    /// Drives currently mounted
    async fn list_drives(&self) -> Result<Vec<DriveId>>;

    /// Whether the title is installed on `drive`
    async fn is_title_installed(&self, drive: &DriveId) -> Result<bool>;

    /// Install the title, optionally reporting progress
    async fn install_title(
        &self,
        drive: Option<&DriveId>,
        progress: Option<Arc<dyn ProgressSink>>,
    ) -> Result<()>;

    /// Launch the title
    async fn launch_title(&self, drive: Option<&DriveId>) -> Result<()>;

    /// Run a named automation script (e.g. `Communications_Set_Everyone`)
    async fn run_named_script(&self, name: &str) -> Result<()>;

    /// Return the console to its system dashboard, stopping any running title
    async fn launch_system_dashboard(&self) -> Result<()>;

    /// Profile store of this console
    fn profiles(&self) -> Arc<dyn ProfileManager>;
}

// =============================================================================
// Host-side capabilities
// =============================================================================

/// Capability: a progress indicator opened by the host.
pub trait ProgressSink: Send + Sync {
    /// Set the value that represents completion
    fn set_max(&self, max: u32);

    /// Report current progress
    fn set_progress(&self, value: u32);

    /// Close the indicator
    fn finish(&self);
}

/// Capability: the host application running a setup session.
///
/// Status and phase updates do not go through this trait; the host subscribes
/// to the session's event stream and marshals updates onto its own UI thread.
pub trait OperatorHost: Send + Sync {
    /// Append a line to the operator-visible test log
    fn log(&self, text: &str);

    /// Open the host's single progress indicator
    fn open_progress_indicator(&self, title: &str) -> Arc<dyn ProgressSink>;

    /// Lock or unlock the host's module switcher while setup runs
    fn set_modal(&self, modal: bool);
}
