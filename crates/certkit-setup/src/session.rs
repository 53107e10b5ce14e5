//! SessionEngine - state machine for a multi-console setup session.
//!
//! The engine runs one [`SetupPlan`] against the consoles the operator
//! selected, publishes every phase change and status update on a broadcast
//! channel, and restores the consoles when the session ends.
//!
//! # State Machine
//!
//! ```text
//! ┌───────┐ advance() ┌────────────────┐   ┌────────────────────┐   ┌───────────────────────────┐
//! │ Intro │──────────▶│ RoleAssignment │──▶│ ProfileAcquisition │──▶│ RelationshipEstablishment │
//! └───────┘           └────────────────┘   └────────────────────┘   └─────────────┬─────────────┘
//!                                                                                 ▼
//! ┌───────────┐ record_check() ┌────────────────────────────┐   ┌─────────────────┐   ┌───────────────────────┐
//! │ Concluded │◀───────────────│ ReadyForManualVerification │◀──│ InstallAndLaunch│◀──│ ParallelConfiguration │
//! └───────────┘                └────────────────────────────┘   └─────────────────┘   └───────────────────────┘
//!
//!  failure / cancel() / stop() from any non-terminal phase ──▶ Aborted
//! ```
//!
//! Teardown runs once on entering `Concluded` or `Aborted`.
//!
//! # Usage
//!
//! ```rust,ignore
//! let engine = SessionEngine::new(plan, title, host, SessionSettings::default())?;
//! let mut events = engine.subscribe();
//!
//! engine.advance(&selected).await?;
//! for check in &engine.plan().manual_checks {
//!     engine.record_check(&check.id, CheckVerdict::Pass).await?;
//! }
//! assert_eq!(engine.phase(), Phase::Concluded);
//! ```

use crate::events::{SessionEvent, SessionLog, StatusBoard, EVENT_CHANNEL_CAPACITY};
use crate::fanout::{ActionResults, FanOut, JoinTimeout};
use crate::install::{best_available_drive, install_and_launch, InstallRequest};
use crate::plans::{RelationshipPolicy, SetupPlan};
use crate::profiles::{acquire_distinct_profiles_into, AcquiredProfile, CreatedProfiles};
use crate::relationship::{ensure_friended, FriendOutcome};
use crate::roles::{assign_roles, RoleMap};
use anyhow::Context;
use certkit_core::capabilities::{ConsoleDevice, OperatorHost};
use certkit_core::error::{ActionError, SelectionError, SessionError, SessionResult};
use certkit_core::model::{CheckVerdict, DriveId, Outcome, Phase, Profile, Role, TitleInfo};
use chrono::{DateTime, Utc};
use futures::FutureExt;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashSet};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

const RESULT_BANNER: &str = "************************************************************";

/// Timing and retry knobs for a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionSettings {
    /// Join bound for configuration scripts and dashboard launches; also
    /// bounds each teardown call
    pub config_join_timeout: JoinTimeout,
    /// Join bound for install and launch
    pub install_join_timeout: JoinTimeout,
    /// Attempts per role before giving up on a distinct profile
    pub max_profile_attempts: usize,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            config_join_timeout: JoinTimeout::Bounded(Duration::from_secs(120)),
            install_join_timeout: JoinTimeout::Unbounded,
            max_profile_attempts: 3,
        }
    }
}

/// Console bound to a role
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoleBinding {
    /// Console id
    pub device_id: String,
    /// Console display name
    pub device_name: String,
}

/// A manual check and its verdict so far
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckState {
    /// Check id
    pub id: String,
    /// Check description
    pub description: String,
    /// Verdict, once recorded
    pub verdict: Option<CheckVerdict>,
}

/// Read-only snapshot of a session for UI layers.
#[derive(Debug, Clone)]
pub struct SetupSession {
    /// Unique id of this session
    pub session_id: Uuid,
    /// Plan being run
    pub plan: String,
    /// When the engine was created
    pub started_at: DateTime<Utc>,
    /// Current phase
    pub phase: Phase,
    /// Console per role
    pub roles: RoleMap<RoleBinding>,
    /// Profile per role
    pub profiles: RoleMap<Profile>,
    /// Current outcome
    pub outcome: Outcome,
    /// Latest status text per role
    pub status_text: RoleMap<String>,
    /// Operator log so far
    pub log: Vec<String>,
    /// Whether every relationship of the plan was confirmed
    pub relationships_confirmed: bool,
    /// Install/launch result per role
    pub install_results: ActionResults,
    /// Manual checks in plan order
    pub checks: Vec<CheckState>,
    /// Why the session aborted, if it did
    pub abort_reason: Option<String>,
}

/// What teardown has already done
#[derive(Debug, Default)]
struct TeardownLedger {
    /// Restore scripts owed, in the order their steps ran
    pending_restores: Vec<(Role, String)>,
    /// Restore scripts that ran
    restored: Vec<(Role, String)>,
    /// (console id, gamertag) of deleted profiles
    deleted: HashSet<(String, String)>,
    finished: bool,
}

struct Inner {
    phase: Phase,
    roles: RoleMap<Arc<dyn ConsoleDevice>>,
    profiles: RoleMap<AcquiredProfile>,
    outcome: Outcome,
    relationships_confirmed: bool,
    install_results: ActionResults,
    verdicts: BTreeMap<String, CheckVerdict>,
    abort_reason: Option<String>,
    ledger: TeardownLedger,
}

/// Drives one setup session from `Intro` to `Concluded` or `Aborted`.
pub struct SessionEngine {
    session_id: Uuid,
    started_at: DateTime<Utc>,
    plan: SetupPlan,
    title: TitleInfo,
    settings: SessionSettings,
    host: Arc<dyn OperatorHost>,
    drives: Option<RoleMap<DriveId>>,
    cancel: CancellationToken,
    events: broadcast::Sender<SessionEvent>,
    log: Arc<SessionLog>,
    status: Arc<StatusBoard>,
    inner: Mutex<Inner>,
    /// Every profile created on the consoles, kept outside `inner` so a
    /// dropped acquisition cannot lose it
    created: CreatedProfiles,
    /// Held by whichever operation is moving the session; phases never overlap
    sequence: tokio::sync::Mutex<()>,
}

impl SessionEngine {
    /// Create an engine in `Intro` for `plan`
    pub fn new(
        plan: SetupPlan,
        title: TitleInfo,
        host: Arc<dyn OperatorHost>,
        settings: SessionSettings,
    ) -> SessionResult<Self> {
        plan.validate()
            .map_err(|err| SessionError::Configuration(format!("{err:#}")))?;
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let session_id = Uuid::new_v4();
        info!(session_id = %session_id, plan = %plan.name, title = %title.name, "Session created");

        Ok(Self {
            session_id,
            started_at: Utc::now(),
            log: Arc::new(SessionLog::new(host.clone(), events.clone())),
            status: Arc::new(StatusBoard::new(events.clone())),
            plan,
            title,
            settings,
            host,
            drives: None,
            cancel: CancellationToken::new(),
            events,
            inner: Mutex::new(Inner {
                phase: Phase::Intro,
                roles: RoleMap::new(),
                profiles: RoleMap::new(),
                outcome: Outcome::Pass,
                relationships_confirmed: true,
                install_results: ActionResults::new(),
                verdicts: BTreeMap::new(),
                abort_reason: None,
                ledger: TeardownLedger::default(),
            }),
            created: CreatedProfiles::new(),
            sequence: tokio::sync::Mutex::new(()),
        })
    }

    /// Install to these drives instead of each console's best drive
    pub fn with_drives(mut self, drives: RoleMap<DriveId>) -> Self {
        self.drives = Some(drives);
        self
    }

    /// Subscribe to phase, status and log updates
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    /// Plan being run
    pub fn plan(&self) -> &SetupPlan {
        &self.plan
    }

    /// Current phase
    pub fn phase(&self) -> Phase {
        self.inner.lock().phase
    }

    /// Current outcome
    pub fn outcome(&self) -> Outcome {
        self.inner.lock().outcome
    }

    /// Per-role status board
    pub fn status_board(&self) -> Arc<StatusBoard> {
        self.status.clone()
    }

    /// Operator log so far
    pub fn log_lines(&self) -> Vec<String> {
        self.log.lines()
    }

    /// Consoles bound to roles
    pub fn roles(&self) -> RoleMap<Arc<dyn ConsoleDevice>> {
        self.inner.lock().roles.clone()
    }

    /// Token cancelled by [`cancel`](Self::cancel) and [`stop`](Self::stop)
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Ask a running `advance` to stop at the next device call
    pub fn cancel(&self) {
        info!(session_id = %self.session_id, "Cancellation requested");
        self.cancel.cancel();
    }

    /// Snapshot of the whole session
    pub fn snapshot(&self) -> SetupSession {
        let inner = self.inner.lock();
        SetupSession {
            session_id: self.session_id,
            plan: self.plan.name.clone(),
            started_at: self.started_at,
            phase: inner.phase,
            roles: inner
                .roles
                .iter()
                .map(|(role, device)| {
                    (
                        *role,
                        RoleBinding {
                            device_id: device.id().to_string(),
                            device_name: device.name().to_string(),
                        },
                    )
                })
                .collect(),
            profiles: inner
                .profiles
                .iter()
                .map(|(role, p)| (*role, p.profile.clone()))
                .collect(),
            outcome: inner.outcome,
            status_text: self.status.snapshot(),
            log: self.log.lines(),
            relationships_confirmed: inner.relationships_confirmed,
            install_results: inner.install_results.clone(),
            checks: self
                .plan
                .manual_checks
                .iter()
                .map(|check| CheckState {
                    id: check.id.clone(),
                    description: check.description.clone(),
                    verdict: inner.verdicts.get(&check.id).copied(),
                })
                .collect(),
            abort_reason: inner.abort_reason.clone(),
        }
    }

    // =========================================================================
    // Operator entry points
    // =========================================================================

    /// Leave `Intro` with the operator's console selection and run setup
    /// through to `ReadyForManualVerification`.
    ///
    /// A rejected selection leaves the session in `Intro`. Any later failure
    /// aborts the session, runs teardown and is returned.
    pub async fn advance(&self, selected: &[Arc<dyn ConsoleDevice>]) -> SessionResult<Phase> {
        let _sequence = self.sequence.lock().await;
        let phase = self.phase();
        if phase != Phase::Intro {
            return Err(SessionError::InvalidPhase {
                operation: "advance",
                phase,
            });
        }

        let roles = match self.preflight(selected).await {
            Ok(roles) => roles,
            Err(err) => {
                warn!(error = %err, "Selection rejected");
                self.log.append(err.to_string());
                return Err(err.into());
            }
        };

        self.inner.lock().roles = roles.clone();
        self.set_phase(Phase::RoleAssignment);
        self.host.set_modal(true);
        self.log.append(format!(
            "Starting {} setup of {} on {} consoles",
            self.plan.name,
            self.title.name,
            roles.len()
        ));
        for (role, device) in &roles {
            self.status.post(*role, format!("Assigned to {}", device.name()));
        }

        if let Err(err) = self.run_setup(&roles).await {
            self.abort(&err);
            self.teardown_locked().await;
            return Err(err);
        }

        self.enter_verification();
        if self.all_checks_recorded() {
            self.set_phase(Phase::Concluded);
            self.teardown_locked().await;
        } else {
            self.host.set_modal(false);
        }
        Ok(self.phase())
    }

    /// Record the operator's verdict for one manual check.
    ///
    /// When every check has a verdict the session concludes and teardown runs.
    pub async fn record_check(&self, id: &str, verdict: CheckVerdict) -> SessionResult<Phase> {
        let _sequence = self.sequence.lock().await;
        let phase = self.phase();
        if phase != Phase::ReadyForManualVerification {
            return Err(SessionError::InvalidPhase {
                operation: "record a check",
                phase,
            });
        }
        let check = self
            .plan
            .check(id)
            .ok_or_else(|| SessionError::UnknownCheck(id.to_string()))?;
        if verdict == CheckVerdict::CannotVerify {
            return Err(SessionError::VerdictNotAllowed {
                check: id.to_string(),
                verdict,
            });
        }

        {
            let mut inner = self.inner.lock();
            if inner.verdicts.contains_key(id) {
                return Err(SessionError::CheckAlreadyRecorded(id.to_string()));
            }
            inner.verdicts.insert(id.to_string(), verdict);
            if verdict == CheckVerdict::Fail {
                inner.outcome.fail();
            }
        }
        info!(check = %id, verdict = verdict.as_str(), "Check recorded");
        self.log
            .append(format!("{}: {}", check.description, verdict.as_str()));
        let _ = self.events.send(SessionEvent::CheckRecorded {
            id: id.to_string(),
            verdict,
        });

        if self.all_checks_recorded() {
            self.set_phase(Phase::Concluded);
            self.teardown_locked().await;
        }
        Ok(self.phase())
    }

    /// The operator closed the module: cancel any running setup, abort a
    /// session that has not concluded and run teardown.
    pub async fn stop(&self) {
        self.cancel.cancel();
        let _sequence = self.sequence.lock().await;
        if !self.phase().is_terminal() {
            self.abort(&SessionError::Cancelled);
        }
        self.teardown_locked().await;
    }

    /// Restore the consoles and log the result. Calling it again is a no-op.
    ///
    /// Waits for a running `advance`; call [`cancel`](Self::cancel) first to
    /// cut that short.
    pub async fn teardown(&self) {
        let _sequence = self.sequence.lock().await;
        self.teardown_locked().await;
    }

    // =========================================================================
    // Phases
    // =========================================================================

    async fn preflight(
        &self,
        selected: &[Arc<dyn ConsoleDevice>],
    ) -> Result<RoleMap<Arc<dyn ConsoleDevice>>, SelectionError> {
        if self.title.name.trim().is_empty() {
            return Err(SelectionError::NoTitle);
        }
        let roles = assign_roles(selected, &self.plan.layout)?;

        if !self.title.is_emulation() {
            for device in roles.values() {
                if device.can_install_title() {
                    continue;
                }
                let installed = self
                    .settings
                    .config_join_timeout
                    .apply(title_installed_on_best_drive(device.as_ref()))
                    .await
                    .unwrap_or(false);
                if !installed {
                    return Err(SelectionError::TitleNotInstallable(
                        device.name().to_string(),
                    ));
                }
            }
        }
        Ok(roles)
    }

    async fn run_setup(&self, roles: &RoleMap<Arc<dyn ConsoleDevice>>) -> SessionResult<()> {
        self.set_phase(Phase::ProfileAcquisition);
        self.acquire_profiles(roles).await?;

        self.set_phase(Phase::RelationshipEstablishment);
        self.establish_relationships().await?;

        self.set_phase(Phase::ParallelConfiguration);
        self.configure(roles).await?;

        self.set_phase(Phase::InstallAndLaunch);
        self.install(roles).await?;
        Ok(())
    }

    async fn acquire_profiles(&self, roles: &RoleMap<Arc<dyn ConsoleDevice>>) -> SessionResult<()> {
        for role in roles.keys() {
            self.status.post(*role, "Getting a profile");
        }
        let slots = self.plan.slots();
        let mut acquired = RoleMap::new();
        let result = self
            .guarded(acquire_distinct_profiles_into(
                roles,
                &slots,
                self.settings.max_profile_attempts,
                &mut acquired,
                &self.created,
            ))
            .await;

        for (role, profile) in &acquired {
            let origin = if profile.is_new() { "created" } else { "existing" };
            self.status
                .post(*role, format!("Signed in as {} ({})", profile.gamertag(), origin));
        }
        self.inner.lock().profiles = acquired;

        result??;
        Ok(())
    }

    async fn establish_relationships(&self) -> SessionResult<()> {
        let profiles = self.inner.lock().profiles.clone();
        let mut confirmed = true;

        for spec in &self.plan.relationships {
            let (Some(requester), Some(accepter)) =
                (profiles.get(&spec.requester), profiles.get(&spec.accepter))
            else {
                return Err(SessionError::Configuration(format!(
                    "no profile for relationship {} -> {}",
                    spec.requester, spec.accepter
                )));
            };

            self.status.post(
                spec.requester,
                format!("Friending {} and {}", requester.gamertag(), accepter.gamertag()),
            );
            let result = self
                .guarded(ensure_friended(
                    requester.handle.as_ref(),
                    accepter.handle.as_ref(),
                ))
                .await?;

            match result {
                Ok(FriendOutcome::AlreadyFriended) => self.log.append(format!(
                    "{} and {} are already friends",
                    requester.gamertag(),
                    accepter.gamertag()
                )),
                Ok(FriendOutcome::Established { attempts }) => self.log.append(format!(
                    "Friended {} and {} (attempts: {})",
                    requester.gamertag(),
                    accepter.gamertag(),
                    attempts
                )),
                Err(err) => {
                    self.log
                        .append(format!("Relationship establishment failed: {}", err));
                    match spec.policy {
                        RelationshipPolicy::Required => return Err(err.into()),
                        RelationshipPolicy::BestEffort => {
                            confirmed = false;
                            warn!(
                                requester = %spec.requester,
                                accepter = %spec.accepter,
                                "Continuing without relationship"
                            );
                        }
                    }
                }
            }
        }

        self.inner.lock().relationships_confirmed = confirmed;
        Ok(())
    }

    async fn configure(&self, roles: &RoleMap<Arc<dyn ConsoleDevice>>) -> SessionResult<()> {
        let timeout = self.settings.config_join_timeout;

        if self.plan.launch_dashboard_before_configuration {
            let mut fanout = FanOut::new(timeout);
            for (role, device) in roles {
                let device = device.clone();
                self.status.post(*role, "Returning to dashboard");
                let pushed = fanout.push(
                    *role,
                    async move { device.launch_system_dashboard().await }.boxed(),
                );
                if let Err(err) = pushed {
                    warn!(role = %role, error = %err, "Dashboard action rejected");
                }
            }
            let results = fanout.run(&self.cancel).await;
            self.check_cancelled()?;
            self.report_results(Phase::ParallelConfiguration, "Dashboard launch", &results);
        }

        let profiles = self.inner.lock().profiles.clone();
        for (wave, steps) in self.plan.waves() {
            let mut fanout = FanOut::new(timeout);
            let mut ran: Vec<(Role, String, Option<String>)> = Vec::new();

            for step in steps {
                if step.skip_if_new_profile
                    && profiles.get(&step.role).is_some_and(|p| p.is_new())
                {
                    self.status.post(
                        step.role,
                        format!("Skipping {} for a new profile", step.script),
                    );
                    continue;
                }
                let Some(device) = roles.get(&step.role).cloned() else {
                    continue;
                };
                let script = step.script.clone();
                let action = async move {
                    device
                        .run_named_script(&script)
                        .await
                        .with_context(|| format!("running {}", script))
                }
                .boxed();
                match fanout.push(step.role, action) {
                    Ok(()) => {
                        self.status.post(step.role, format!("Running {}", step.script));
                        ran.push((step.role, step.script.clone(), step.restore_script.clone()));
                    }
                    Err(err) => {
                        self.log.append(format!(
                            "Configuration step {} on {} rejected: {}",
                            step.script, step.role, err
                        ));
                    }
                }
            }

            if fanout.is_empty() {
                continue;
            }
            info!(wave, steps = fanout.len(), "Running configuration wave");
            let results = fanout.run(&self.cancel).await;

            let mut inner_restores = Vec::new();
            for (role, script, restore) in ran {
                let result = results.get(&role);
                if let Some(Ok(())) = result {
                    self.status.post(role, format!("Finished {}", script));
                }
                let ran_or_may_have_run = match result {
                    Some(Ok(())) => true,
                    Some(Err(err)) => err.is_incomplete(),
                    None => false,
                };
                if let (Some(restore), true) = (restore, ran_or_may_have_run) {
                    inner_restores.push((role, restore));
                }
            }
            self.inner
                .lock()
                .ledger
                .pending_restores
                .extend(inner_restores);

            self.check_cancelled()?;
            self.report_results(Phase::ParallelConfiguration, "Configuration", &results);
        }
        Ok(())
    }

    async fn install(&self, roles: &RoleMap<Arc<dyn ConsoleDevice>>) -> SessionResult<()> {
        let drives = match &self.drives {
            Some(drives) => drives.clone(),
            None => {
                let mut drives = RoleMap::new();
                for (role, device) in roles {
                    let listed = self
                        .guarded(self.settings.config_join_timeout.apply(device.list_drives()))
                        .await?;
                    match listed {
                        Some(Ok(list)) => {
                            if let Some(drive) = best_available_drive(&list) {
                                drives.insert(*role, drive);
                            }
                        }
                        Some(Err(err)) => {
                            warn!(role = %role, error = %err, "Listing drives failed")
                        }
                        None => warn!(role = %role, "Listing drives timed out"),
                    }
                }
                drives
            }
        };

        let request = InstallRequest {
            title: self.title.clone(),
            progress_role: self.plan.progress_role,
            timeout: self.settings.install_join_timeout,
        };
        let results =
            install_and_launch(roles, &drives, &request, &self.host, &self.status, &self.cancel)
                .await;
        self.check_cancelled()?;
        self.report_results(Phase::InstallAndLaunch, "Install/launch", &results);
        self.inner.lock().install_results = results;
        Ok(())
    }

    fn enter_verification(&self) {
        self.set_phase(Phase::ReadyForManualVerification);

        let (roles, profiles, results, confirmed) = {
            let inner = self.inner.lock();
            (
                inner.roles.clone(),
                inner.profiles.clone(),
                inner.install_results.clone(),
                inner.relationships_confirmed,
            )
        };

        for (role, device) in &roles {
            let profile = profiles
                .get(role)
                .map(|p| {
                    let origin = if p.is_new() { "created" } else { "existing" };
                    format!("{} ({})", p.gamertag(), origin)
                })
                .unwrap_or_else(|| "no profile".to_string());
            let result = match results.get(role) {
                Some(Ok(())) => "title launched".to_string(),
                Some(Err(err)) => format!("install/launch: {}", err),
                None => "install/launch not run".to_string(),
            };
            self.log
                .append(format!("{}: {}, profile {}, {}", role, device.name(), profile, result));
        }
        self.log.append(format!(
            "Title: {} ({})",
            self.title.name, self.title.install_type
        ));

        if !confirmed {
            for check in self.plan.manual_checks.iter().filter(|c| c.requires_relationship) {
                self.inner
                    .lock()
                    .verdicts
                    .insert(check.id.clone(), CheckVerdict::CannotVerify);
                self.log.append(format!(
                    "{}: {}",
                    check.description,
                    CheckVerdict::CannotVerify.as_str()
                ));
                let _ = self.events.send(SessionEvent::CheckRecorded {
                    id: check.id.clone(),
                    verdict: CheckVerdict::CannotVerify,
                });
            }
        }
        self.log
            .append("Setup complete. Verify each check on the consoles and record the result.");
    }

    // =========================================================================
    // Teardown
    // =========================================================================

    async fn teardown_locked(&self) {
        let (roles, restores) = {
            let inner = self.inner.lock();
            if inner.ledger.finished {
                return;
            }
            (inner.roles.clone(), inner.ledger.pending_restores.clone())
        };
        info!(session_id = %self.session_id, "Teardown started");
        let bound = self.settings.config_join_timeout;

        for (role, device) in &roles {
            let role = *role;
            self.status.post(role, "Cleaning up");
            let manager = device.profiles();

            self.teardown_step(role, "signing out", bound.apply(manager.sign_out_all()))
                .await;

            for gamertag in self.created.on_device(device.id()) {
                let key = (device.id().to_string(), gamertag);
                if self.inner.lock().ledger.deleted.contains(&key) {
                    continue;
                }
                let what = format!("deleting profile {}", key.1);
                let deleted = self
                    .teardown_step(role, &what, bound.apply(manager.delete_profile(&key.1)))
                    .await;
                if deleted {
                    self.log
                        .append(format!("Deleted profile {} from {}", key.1, device.name()));
                    self.inner.lock().ledger.deleted.insert(key);
                }
            }

            self.teardown_step(
                role,
                "returning to dashboard",
                bound.apply(device.launch_system_dashboard()),
            )
            .await;

            for (_, script) in restores.iter().filter(|(r, _)| *r == role) {
                let what = format!("running {}", script);
                if self
                    .teardown_step(role, &what, bound.apply(device.run_named_script(script)))
                    .await
                {
                    self.inner
                        .lock()
                        .ledger
                        .restored
                        .push((role, script.clone()));
                }
            }
            self.status.post(role, "Cleaned up");
        }

        let outcome = {
            let mut inner = self.inner.lock();
            inner.ledger.pending_restores.clear();
            inner.ledger.finished = true;
            inner.outcome
        };
        self.log.append(RESULT_BANNER);
        self.log.append(format!("RESULT: {}", outcome));
        self.log.append(RESULT_BANNER);
        self.host.set_modal(false);
        let _ = self.events.send(SessionEvent::Finished { outcome });
        info!(session_id = %self.session_id, outcome = %outcome, "Teardown finished");
    }

    /// Run one cleanup call; failures are logged and swallowed.
    async fn teardown_step<F>(&self, role: Role, what: &str, step: F) -> bool
    where
        F: Future<Output = Option<anyhow::Result<()>>>,
    {
        match step.await {
            Some(Ok(())) => true,
            Some(Err(err)) => {
                warn!(role = %role, error = %err, "Cleanup step failed while {}", what);
                self.log
                    .append(format!("Cleanup on {} failed while {}: {:#}", role, what, err));
                false
            }
            None => {
                warn!(role = %role, "Cleanup step timed out while {}", what);
                self.log
                    .append(format!("Cleanup on {} timed out while {}", role, what));
                false
            }
        }
    }

    // =========================================================================
    // Helpers
    // =========================================================================

    fn set_phase(&self, to: Phase) {
        let from = {
            let mut inner = self.inner.lock();
            let from = inner.phase;
            if from.is_terminal() || from == to {
                return;
            }
            inner.phase = to;
            from
        };
        info!(session_id = %self.session_id, from = %from, to = %to, "Phase transition");
        let _ = self.events.send(SessionEvent::PhaseChanged { from, to });
    }

    fn abort(&self, err: &SessionError) {
        let reason = err.to_string();
        error!(session_id = %self.session_id, reason = %reason, "Setup aborted");
        {
            let mut inner = self.inner.lock();
            inner.outcome.fail();
            inner.abort_reason = Some(reason.clone());
        }
        self.log.append(format!("Setup aborted: {}", reason));
        self.set_phase(Phase::Aborted);
    }

    fn all_checks_recorded(&self) -> bool {
        let inner = self.inner.lock();
        self.plan
            .manual_checks
            .iter()
            .all(|check| inner.verdicts.contains_key(&check.id))
    }

    fn report_results(&self, phase: Phase, what: &str, results: &ActionResults) {
        let roles = self.inner.lock().roles.clone();
        for (role, result) in results {
            let _ = self.events.send(SessionEvent::ActionFinished {
                phase,
                role: *role,
                result: result.clone(),
            });
            if let Err(err) = result {
                let device = roles
                    .get(role)
                    .map(|d| d.name().to_string())
                    .unwrap_or_default();
                let message = match err {
                    ActionError::TimedOut { .. } => {
                        format!("{} on {} is incomplete: {}", what, device, err)
                    }
                    _ => format!("{} on {} failed: {}", what, device, err),
                };
                self.status.post(*role, message.clone());
                self.log.append(message);
            }
        }
    }

    async fn guarded<F: Future>(&self, fut: F) -> SessionResult<F::Output> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(SessionError::Cancelled),
            out = fut => Ok(out),
        }
    }

    fn check_cancelled(&self) -> SessionResult<()> {
        if self.cancel.is_cancelled() {
            return Err(SessionError::Cancelled);
        }
        Ok(())
    }
}

async fn title_installed_on_best_drive(device: &dyn ConsoleDevice) -> bool {
    let Ok(drives) = device.list_drives().await else {
        return false;
    };
    match best_available_drive(&drives) {
        Some(drive) => device.is_title_installed(&drive).await.unwrap_or(false),
        None => false,
    }
}
