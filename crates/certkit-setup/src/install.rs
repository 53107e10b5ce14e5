//! Title install and launch across every role.
//!
//! Built on the fan-out: each role checks its drive, installs if needed and
//! launches. One role at most gets the host's progress indicator.

use crate::events::StatusBoard;
use crate::fanout::{Action, ActionResults, FanOut, JoinTimeout};
use crate::roles::RoleMap;
use anyhow::{anyhow, Context};
use certkit_core::capabilities::{ConsoleDevice, OperatorHost, ProgressSink};
use certkit_core::error::ActionError;
use certkit_core::model::{DriveId, Role, TitleInfo};
use futures::FutureExt;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Pick the drive a title should go to.
///
/// The last drive whose name contains `HDD` wins; otherwise the first `USB`
/// or `MU` drive; otherwise the first drive.
pub fn best_available_drive(drives: &[DriveId]) -> Option<DriveId> {
    if let Some(hdd) = drives.iter().rev().find(|d| d.as_str().contains("HDD")) {
        return Some(hdd.clone());
    }
    drives
        .iter()
        .find(|d| d.as_str().contains("USB") || d.as_str().contains("MU"))
        .or_else(|| drives.first())
        .cloned()
}

/// Role that should carry the progress indicator.
///
/// `preferred` keeps it unless its title is already installed while another
/// role still needs an install; then the first role (in role order) needing
/// one takes it. `None` when nothing will be installed.
pub fn choose_progress_role(preferred: Role, needs_install: &RoleMap<bool>) -> Option<Role> {
    if needs_install.get(&preferred).copied().unwrap_or(false) {
        return Some(preferred);
    }
    needs_install
        .iter()
        .find(|(_, needs)| **needs)
        .map(|(role, _)| *role)
}

/// What to install and how long to wait for it.
#[derive(Debug, Clone)]
pub struct InstallRequest {
    /// Title under test
    pub title: TitleInfo,
    /// Role that preferably carries the progress indicator
    pub progress_role: Role,
    /// Join bound for the whole fan-out
    pub timeout: JoinTimeout,
}

/// Per-role plan resolved before anything is spawned
struct RoleInstall {
    device: Arc<dyn ConsoleDevice>,
    drive: Option<DriveId>,
    installed: bool,
}

/// Install (when needed) and launch the title on every role concurrently.
///
/// Per-role failures are returned, never raised; siblings keep running.
pub async fn install_and_launch(
    roles: &RoleMap<Arc<dyn ConsoleDevice>>,
    drives: &RoleMap<DriveId>,
    request: &InstallRequest,
    host: &Arc<dyn OperatorHost>,
    status: &Arc<StatusBoard>,
    cancel: &CancellationToken,
) -> ActionResults {
    let mut plans: RoleMap<RoleInstall> = RoleMap::new();
    for (role, device) in roles {
        let drive = drives.get(role).cloned();
        let installed = match (&drive, request.title.is_emulation()) {
            (Some(drive), false) => match device.is_title_installed(drive).await {
                Ok(installed) => installed,
                Err(err) => {
                    tracing::warn!(role = %role, error = %err, "Install check failed, installing");
                    false
                }
            },
            _ => false,
        };
        plans.insert(
            *role,
            RoleInstall {
                device: device.clone(),
                drive,
                installed,
            },
        );
    }

    let progress_role = if request.title.is_emulation() {
        Some(request.progress_role)
    } else {
        let needs: RoleMap<bool> = plans
            .iter()
            .map(|(role, plan)| (*role, !plan.installed))
            .collect();
        choose_progress_role(request.progress_role, &needs)
    };

    let mut fanout = FanOut::new(request.timeout);
    for (role, plan) in plans {
        let sink = (Some(role) == progress_role).then(|| {
            host.open_progress_indicator(&format!(
                "Installing {} on {}",
                request.title.name,
                plan.device.name()
            ))
        });
        let action = role_action(role, plan, &request.title, sink, progress_role, status.clone());
        if let Err(err) = fanout.push(role, action) {
            tracing::error!(role = %role, error = %err, "Install action rejected");
        }
    }

    let results = fanout.run(cancel).await;
    for (role, result) in &results {
        match result {
            Ok(()) => {}
            Err(ActionError::TimedOut { .. }) => {
                status.post(*role, "Install/launch still running; continuing without it")
            }
            Err(err) => status.post(*role, format!("Install/launch failed: {}", err)),
        }
    }
    results
}

fn role_action(
    role: Role,
    plan: RoleInstall,
    title: &TitleInfo,
    sink: Option<Arc<dyn ProgressSink>>,
    progress_role: Option<Role>,
    status: Arc<StatusBoard>,
) -> Action {
    let title = title.clone();
    async move {
        let device = plan.device;
        if title.is_emulation() {
            if Some(role) != progress_role {
                status.post(
                    role,
                    format!(
                        "{} uses disc emulation: start the title manually on {}",
                        title.name,
                        device.name()
                    ),
                );
                return Ok(());
            }
            status.post(role, "Starting disc emulation");
            device
                .install_title(None, sink)
                .await
                .context("starting disc emulation")?;
            device.launch_title(None).await.context("launching title")?;
            status.post(role, "Title launched");
            return Ok(());
        }

        let drive = plan
            .drive
            .ok_or_else(|| anyhow!("no drive available on {}", device.name()))?;
        if plan.installed {
            status.post(role, format!("Title already installed on {}; launching", drive));
        } else {
            status.post(role, format!("Installing {} to {}", title.name, drive));
            device
                .install_title(Some(&drive), sink)
                .await
                .with_context(|| format!("installing to {}", drive))?;
        }
        device
            .launch_title(Some(&drive))
            .await
            .context("launching title")?;
        status.post(role, "Title launched");
        Ok(())
    }
    .boxed()
}
