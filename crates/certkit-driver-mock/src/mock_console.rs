//! Mock console implementation.

use anyhow::Result;
use async_trait::async_trait;
use certkit_core::capabilities::{ConsoleDevice, ProfileManager, ProgressSink};
use certkit_core::error::{DriverError, DriverErrorKind};
use certkit_core::model::DriveId;
use parking_lot::Mutex;
use serde::Deserialize;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::time::sleep;

use crate::common::{ops, ErrorConfig, MockMode, TimingConfig};
use crate::friend_service::FriendService;
use crate::mock_profile::{MockProfileManager, ProfileContext};

/// Progress steps reported during an install
const INSTALL_PROGRESS_STEPS: u32 = 10;

/// Chaos-mode failure rate applied when no error config is given
const CHAOS_FAILURE_RATE: f64 = 0.05;

// =============================================================================
// Configuration
// =============================================================================

/// Declarative description of a simulated console (e.g. from TOML).
#[derive(Debug, Clone, Deserialize)]
pub struct MockConsoleConfig {
    /// Stable identifier
    pub id: String,
    /// Display name (defaults to the id)
    #[serde(default)]
    pub name: Option<String>,
    /// Connected at start
    #[serde(default = "default_true")]
    pub connected: bool,
    /// Flagged as the host's default console
    #[serde(default)]
    pub default: bool,
    /// Mounted drives
    #[serde(default = "default_drives")]
    pub drives: Vec<String>,
    /// Drives the title is already installed on
    #[serde(default)]
    pub installed_on: Vec<String>,
    /// Whether the title can be installed
    #[serde(default = "default_true")]
    pub can_install: bool,
    /// Gamertags of profiles already stored
    #[serde(default)]
    pub profiles: Vec<String>,
    /// Operational mode
    #[serde(default)]
    pub mode: MockMode,
}

fn default_true() -> bool {
    true
}

fn default_drives() -> Vec<String> {
    vec!["HDD".to_string()]
}

// =============================================================================
// MockConsole
// =============================================================================

#[derive(Debug, Default)]
struct ConsoleState {
    installed_on: BTreeSet<DriveId>,
    emulation_started: bool,
    title_running: bool,
    scripts_run: Vec<String>,
    dashboard_launches: u32,
    installs: Vec<Option<DriveId>>,
    launches: Vec<Option<DriveId>>,
}

/// Simulated console.
///
/// Records every install, launch and script run so tests can assert on the
/// side effects an orchestrator produced.
///
/// # Example
///
/// ```rust,ignore
/// let console = MockConsole::builder("devkit-1")
///     .default_console(true)
///     .drives(["HDD", "MU0"])
///     .profiles(["Alice"])
///     .build();
/// ```
pub struct MockConsole {
    id: String,
    name: String,
    is_default: bool,
    connected: AtomicBool,
    can_install: bool,
    drives: Vec<DriveId>,
    mode: MockMode,
    timing: TimingConfig,
    errors: ErrorConfig,
    driver_type: String,
    profiles: Arc<MockProfileManager>,
    state: Mutex<ConsoleState>,
}

impl MockConsole {
    /// Create a builder for a console with the given id
    pub fn builder(id: impl Into<String>) -> MockConsoleBuilder {
        MockConsoleBuilder::new(id)
    }

    /// Build a console from its declarative description
    pub fn from_config(config: &MockConsoleConfig, service: Arc<FriendService>) -> Self {
        let mut builder = Self::builder(config.id.clone())
            .connected(config.connected)
            .default_console(config.default)
            .drives(config.drives.iter().cloned())
            .installed_on(config.installed_on.iter().cloned())
            .can_install(config.can_install)
            .profiles(config.profiles.iter().cloned())
            .mode(config.mode)
            .service(service);
        if let Some(name) = &config.name {
            builder = builder.name(name.clone());
        }
        if config.mode.simulates_delays() {
            builder = builder.timing(TimingConfig::console());
        }
        builder.build()
    }

    /// Concrete profile store
    pub fn profile_store(&self) -> Arc<MockProfileManager> {
        self.profiles.clone()
    }

    /// Error injection shared by this console and its profiles
    pub fn error_config(&self) -> &ErrorConfig {
        &self.errors
    }

    /// Simulate a cable pull or reconnect
    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    /// Scripts run so far, in order
    pub fn scripts_run(&self) -> Vec<String> {
        self.state.lock().scripts_run.clone()
    }

    /// Dashboard launches so far
    pub fn dashboard_launches(&self) -> u32 {
        self.state.lock().dashboard_launches
    }

    /// Install requests so far, with their target drive
    pub fn installs(&self) -> Vec<Option<DriveId>> {
        self.state.lock().installs.clone()
    }

    /// Launch requests so far, with their source drive
    pub fn launches(&self) -> Vec<Option<DriveId>> {
        self.state.lock().launches.clone()
    }

    /// Whether a title is currently running
    pub fn is_title_running(&self) -> bool {
        self.state.lock().title_running
    }

    /// Whether disc emulation was started
    pub fn emulation_started(&self) -> bool {
        self.state.lock().emulation_started
    }

    async fn check(&self, operation: &'static str, delay: Duration) -> Result<()> {
        if self.errors.should_hang(operation) {
            futures::future::pending::<()>().await;
        }
        if self.mode.simulates_delays() && !delay.is_zero() {
            sleep(delay).await;
        }
        self.errors.check_operation(&self.driver_type, operation)?;
        self.ensure_connected()
    }

    fn ensure_connected(&self) -> Result<()> {
        if !self.connected.load(Ordering::SeqCst) {
            return Err(DriverError::new(
                &self.driver_type,
                DriverErrorKind::Communication,
                "Console is not connected",
            )
            .into());
        }
        Ok(())
    }

    fn ensure_drive(&self, drive: &DriveId) -> Result<()> {
        if !self.drives.contains(drive) {
            return Err(DriverError::new(
                &self.driver_type,
                DriverErrorKind::NotFound,
                format!("Drive '{}' is not mounted", drive),
            )
            .into());
        }
        Ok(())
    }
}

#[async_trait]
impl ConsoleDevice for MockConsole {
    fn id(&self) -> &str {
        &self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn is_default(&self) -> bool {
        self.is_default
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn can_install_title(&self) -> bool {
        self.can_install
    }

    async fn connect(&self) -> Result<()> {
        if self.errors.should_hang(ops::CONNECT) {
            futures::future::pending::<()>().await;
        }
        self.errors.check_operation(&self.driver_type, ops::CONNECT)?;
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn list_drives(&self) -> Result<Vec<DriveId>> {
        self.check(ops::LIST_DRIVES, self.timing.communication()).await?;
        Ok(self.drives.clone())
    }

    async fn is_title_installed(&self, drive: &DriveId) -> Result<bool> {
        self.check(ops::IS_TITLE_INSTALLED, self.timing.communication())
            .await?;
        Ok(self.state.lock().installed_on.contains(drive))
    }

    async fn install_title(
        &self,
        drive: Option<&DriveId>,
        progress: Option<Arc<dyn ProgressSink>>,
    ) -> Result<()> {
        if let Some(drive) = drive {
            self.ensure_drive(drive)?;
        }
        self.state.lock().installs.push(drive.cloned());

        if let Some(progress) = &progress {
            progress.set_max(INSTALL_PROGRESS_STEPS);
        }
        let step = self.timing.install() / INSTALL_PROGRESS_STEPS;
        for i in 1..=INSTALL_PROGRESS_STEPS {
            if self.mode.simulates_delays() && !step.is_zero() {
                sleep(step).await;
            }
            if let Some(progress) = &progress {
                progress.set_progress(i);
            }
        }
        let result = self.check(ops::INSTALL_TITLE, Duration::ZERO).await;
        if let Some(progress) = &progress {
            progress.finish();
        }
        result?;

        let mut state = self.state.lock();
        match drive {
            Some(drive) => {
                state.installed_on.insert(drive.clone());
            }
            None => state.emulation_started = true,
        }
        tracing::debug!(console = %self.id, drive = ?drive, "Mock title installed");
        Ok(())
    }

    async fn launch_title(&self, drive: Option<&DriveId>) -> Result<()> {
        self.check(ops::LAUNCH_TITLE, self.timing.launch()).await?;
        let mut state = self.state.lock();
        state.launches.push(drive.cloned());
        let available = match drive {
            Some(drive) => state.installed_on.contains(drive),
            None => state.emulation_started || !state.installed_on.is_empty(),
        };
        if !available {
            return Err(DriverError::new(
                &self.driver_type,
                DriverErrorKind::NotFound,
                "Title is not installed",
            )
            .into());
        }
        state.title_running = true;
        Ok(())
    }

    async fn run_named_script(&self, name: &str) -> Result<()> {
        if self.errors.should_hang(ops::RUN_SCRIPT) {
            futures::future::pending::<()>().await;
        }
        if self.mode.simulates_delays() {
            sleep(self.timing.script()).await;
        }
        self.errors.check_script(&self.driver_type, name)?;
        self.ensure_connected()?;
        self.state.lock().scripts_run.push(name.to_string());
        tracing::debug!(console = %self.id, script = name, "Mock script run");
        Ok(())
    }

    async fn launch_system_dashboard(&self) -> Result<()> {
        self.check(ops::LAUNCH_DASHBOARD, self.timing.launch()).await?;
        let mut state = self.state.lock();
        state.dashboard_launches += 1;
        state.title_running = false;
        Ok(())
    }

    fn profiles(&self) -> Arc<dyn ProfileManager> {
        self.profiles.clone()
    }
}

// =============================================================================
// MockConsoleBuilder
// =============================================================================

/// Builder for [`MockConsole`].
pub struct MockConsoleBuilder {
    id: String,
    name: Option<String>,
    is_default: bool,
    connected: bool,
    can_install: bool,
    drives: Vec<DriveId>,
    installed_on: Vec<DriveId>,
    profiles: Vec<String>,
    service: Option<Arc<FriendService>>,
    mode: MockMode,
    timing: TimingConfig,
    errors: Option<ErrorConfig>,
}

impl MockConsoleBuilder {
    /// Create a new builder with defaults: connected, one `HDD` drive, no profiles
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: None,
            is_default: false,
            connected: true,
            can_install: true,
            drives: vec![DriveId::new("HDD")],
            installed_on: Vec::new(),
            profiles: Vec::new(),
            service: None,
            mode: MockMode::Instant,
            timing: TimingConfig::default(),
            errors: None,
        }
    }

    /// Display name
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Flag as the host's default console
    pub fn default_console(mut self, is_default: bool) -> Self {
        self.is_default = is_default;
        self
    }

    /// Initial connection state
    pub fn connected(mut self, connected: bool) -> Self {
        self.connected = connected;
        self
    }

    /// Whether the title can be installed
    pub fn can_install(mut self, can_install: bool) -> Self {
        self.can_install = can_install;
        self
    }

    /// Mounted drives
    pub fn drives<I, S>(mut self, drives: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<DriveId>,
    {
        self.drives = drives.into_iter().map(Into::into).collect();
        self
    }

    /// Drives the title is already installed on
    pub fn installed_on<I, S>(mut self, drives: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<DriveId>,
    {
        self.installed_on = drives.into_iter().map(Into::into).collect();
        self
    }

    /// Profiles already stored, in enumeration order
    pub fn profiles<I, S>(mut self, gamertags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.profiles = gamertags.into_iter().map(Into::into).collect();
        self
    }

    /// Friend service shared with the other consoles of a test
    pub fn service(mut self, service: Arc<FriendService>) -> Self {
        self.service = Some(service);
        self
    }

    /// Operational mode
    pub fn mode(mut self, mode: MockMode) -> Self {
        self.mode = mode;
        self
    }

    /// Delays used outside instant mode
    pub fn timing(mut self, timing: TimingConfig) -> Self {
        self.timing = timing;
        self
    }

    /// Error injection
    pub fn error_config(mut self, config: ErrorConfig) -> Self {
        self.errors = Some(config);
        self
    }

    /// Build the console
    pub fn build(self) -> MockConsole {
        let driver_type = format!("mock_console[{}]", self.id);
        let errors = match (self.errors, self.mode) {
            (Some(errors), _) => errors,
            (None, MockMode::Chaos) => {
                ErrorConfig::random_failures_seeded(CHAOS_FAILURE_RATE, None)
            }
            (None, _) => ErrorConfig::none(),
        };
        let ctx = ProfileContext {
            driver_type: driver_type.clone(),
            service: self.service.unwrap_or_default(),
            errors: errors.clone(),
            mode: self.mode,
            timing: self.timing,
        };
        let profiles = Arc::new(MockProfileManager::new(ctx, &self.profiles));
        MockConsole {
            name: self.name.unwrap_or_else(|| self.id.clone()),
            id: self.id,
            is_default: self.is_default,
            connected: AtomicBool::new(self.connected),
            can_install: self.can_install,
            drives: self.drives,
            mode: self.mode,
            timing: self.timing,
            errors,
            driver_type,
            profiles,
            state: Mutex::new(ConsoleState {
                installed_on: self.installed_on.into_iter().collect(),
                ..Default::default()
            }),
        }
    }
}
