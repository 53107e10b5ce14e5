//! End-to-end setup sessions against simulated consoles.

use certkit_core::capabilities::ConsoleDevice;
use certkit_core::error::{ProfileError, RelationshipError, SelectionError, SessionError};
use certkit_core::model::{CheckVerdict, Outcome, Phase, Role, TitleInfo};
use certkit_driver_mock::{
    ops, ErrorConfig, ErrorScenario, FriendService, MockConsole, MockConsoleBuilder,
    MockOperatorHost,
};
use certkit_setup::{JoinTimeout, SessionEngine, SessionEvent, SessionSettings, SetupPlan};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

struct Bench {
    service: Arc<FriendService>,
    host: Arc<MockOperatorHost>,
    consoles: Vec<Arc<MockConsole>>,
}

impl Bench {
    fn new() -> Self {
        Self {
            service: Arc::new(FriendService::new()),
            host: Arc::new(MockOperatorHost::new()),
            consoles: Vec::new(),
        }
    }

    fn add(mut self, build: impl FnOnce(MockConsoleBuilder) -> MockConsoleBuilder) -> Self {
        let id = format!("devkit-{}", self.consoles.len());
        let builder = MockConsole::builder(id).service(self.service.clone());
        self.consoles.push(Arc::new(build(builder).build()));
        self
    }

    fn selection(&self) -> Vec<Arc<dyn ConsoleDevice>> {
        self.consoles
            .iter()
            .map(|c| c.clone() as Arc<dyn ConsoleDevice>)
            .collect()
    }

    fn engine(&self, plan: &str, settings: SessionSettings) -> SessionEngine {
        SessionEngine::new(
            SetupPlan::builtin(plan).unwrap(),
            TitleInfo::content_package("Test Title"),
            self.host.clone(),
            settings,
        )
        .unwrap()
    }
}

fn phases(rx: &mut broadcast::Receiver<SessionEvent>) -> Vec<Phase> {
    let mut seen = Vec::new();
    while let Ok(event) = rx.try_recv() {
        if let SessionEvent::PhaseChanged { to, .. } = event {
            seen.push(to);
        }
    }
    seen
}

#[tokio::test]
async fn test_communication_privacy_end_to_end() {
    let bench = Bench::new()
        .add(|b| b)
        .add(|b| b.default_console(true))
        .add(|b| b.installed_on(["HDD"]));
    let engine = bench.engine("communication-privacy", SessionSettings::default());
    let mut rx = engine.subscribe();

    let phase = engine.advance(&bench.selection()).await.unwrap();
    assert_eq!(phase, Phase::ReadyForManualVerification);
    assert_eq!(
        phases(&mut rx),
        vec![
            Phase::RoleAssignment,
            Phase::ProfileAcquisition,
            Phase::RelationshipEstablishment,
            Phase::ParallelConfiguration,
            Phase::InstallAndLaunch,
            Phase::ReadyForManualVerification,
        ]
    );

    // The default console is primary; the rest fill in selection order.
    let snapshot = engine.snapshot();
    assert_eq!(snapshot.roles[&Role::Primary].device_id, "devkit-1");
    assert_eq!(snapshot.roles[&Role::Secondary].device_id, "devkit-0");
    assert_eq!(snapshot.roles[&Role::Tertiary].device_id, "devkit-2");
    assert!(snapshot.relationships_confirmed);

    let primary = &bench.consoles[1];
    let secondary = &bench.consoles[0];
    let tertiary = &bench.consoles[2];
    assert_eq!(
        primary.scripts_run(),
        vec!["Voice_Output_Set_Speakers", "Communications_Set_Blocked"]
    );
    assert_eq!(
        secondary.scripts_run(),
        vec!["Voice_Output_Set_Speakers", "Communications_Set_Everyone"]
    );
    assert_eq!(tertiary.installs(), Vec::new());
    assert!(bench.consoles.iter().all(|c| c.is_title_running()));

    let primary_tag = snapshot.profiles[&Role::Primary].gamertag.clone();
    let secondary_tag = snapshot.profiles[&Role::Secondary].gamertag.clone();
    assert!(bench.service.are_friends(&primary_tag, &secondary_tag));
    assert_eq!(bench.host.progress_indicators().len(), 1);
    assert!(!bench.host.is_modal());

    for check in ["blocked-voice", "blocked-text", "friend-unaffected"] {
        engine.record_check(check, CheckVerdict::Pass).await.unwrap();
    }
    assert_eq!(engine.phase(), Phase::Concluded);
    assert_eq!(engine.outcome(), Outcome::Pass);
    assert!(bench.host.logged("RESULT: PASS"));

    // Teardown undid the blocking script and removed the created profiles.
    assert_eq!(
        primary.scripts_run().last().map(String::as_str),
        Some("Communications_Set_Everyone")
    );
    for console in &bench.consoles {
        assert_eq!(console.profile_store().deleted(), console.profile_store().created());
        assert!(console.profile_store().signed_in().is_empty());
        assert!(!console.is_title_running());
    }
}

#[tokio::test]
async fn test_failed_check_fails_the_session() {
    let bench = Bench::new().add(|b| b).add(|b| b).add(|b| b);
    let engine = bench.engine("communication-privacy", SessionSettings::default());
    engine.advance(&bench.selection()).await.unwrap();

    engine.record_check("blocked-voice", CheckVerdict::Fail).await.unwrap();
    assert_eq!(engine.outcome(), Outcome::Fail);
    engine.record_check("blocked-text", CheckVerdict::Pass).await.unwrap();
    engine
        .record_check("friend-unaffected", CheckVerdict::Pass)
        .await
        .unwrap();
    assert_eq!(engine.outcome(), Outcome::Fail);
    assert!(bench.host.logged("RESULT: FAIL"));
}

#[tokio::test]
async fn test_operator_cannot_mark_a_check_unverifiable() {
    let bench = Bench::new().add(|b| b).add(|b| b);
    let engine = bench.engine("multiplayer-privilege", SessionSettings::default());
    engine.advance(&bench.selection()).await.unwrap();
    let check = engine.plan().manual_checks[0].id.clone();

    let err = engine
        .record_check(&check, CheckVerdict::CannotVerify)
        .await
        .unwrap_err();
    assert!(matches!(err, SessionError::VerdictNotAllowed { .. }));
    assert!(err.is_recoverable());
    assert_eq!(engine.phase(), Phase::ReadyForManualVerification);
    let snapshot = engine.snapshot();
    assert!(snapshot.checks.iter().all(|c| c.verdict.is_none()));

    engine.record_check(&check, CheckVerdict::Pass).await.unwrap();
    assert_eq!(engine.snapshot().checks[0].verdict, Some(CheckVerdict::Pass));
}

#[tokio::test]
async fn test_best_effort_relationship_continues_with_unverifiable_check() {
    let bench = Bench::new()
        .add(|b| b.profiles(["Restricted"]))
        .add(|b| {
            b.profiles(["Inviter"])
                .error_config(ErrorConfig::scenario(ErrorScenario::FailTimes {
                    operation: ops::SEND_FRIEND_REQUEST,
                    count: 2,
                }))
        });
    let engine = bench.engine("multiplayer-privilege", SessionSettings::default());

    let phase = engine.advance(&bench.selection()).await.unwrap();
    assert_eq!(phase, Phase::ReadyForManualVerification);

    let snapshot = engine.snapshot();
    assert!(!snapshot.relationships_confirmed);
    let invite = snapshot
        .checks
        .iter()
        .find(|c| c.id == "invite-no-multiplayer")
        .unwrap();
    assert_eq!(invite.verdict, Some(CheckVerdict::CannotVerify));
    assert!(bench.host.logged("CANNOT BE VERIFIED"));
    assert!(bench.host.logged("Relationship establishment failed"));

    // Existing inviter profile keeps its privileges re-enabled.
    let child = &bench.consoles[0];
    let inviting = &bench.consoles[1];
    assert_eq!(
        inviting.scripts_run(),
        vec!["Scripts\\Enable_Xbox_Live_Game_Play_Privileges.xboxautomation"]
    );

    let phase = engine
        .record_check("access-multiplayer", CheckVerdict::Pass)
        .await
        .unwrap();
    assert_eq!(phase, Phase::Concluded);
    assert_eq!(engine.outcome(), Outcome::Pass);
    assert_eq!(
        child.scripts_run(),
        vec![
            "Scripts\\Disable_Xbox_Live_Game_Play_Privileges.xboxautomation",
            "Scripts\\Enable_Xbox_Live_Game_Play_Privileges.xboxautomation",
        ]
    );
    // Once before configuration and once during teardown.
    assert_eq!(child.dashboard_launches(), 2);
    assert!(child.profile_store().created().is_empty());
}

#[tokio::test]
async fn test_two_blank_consoles_reach_verification() {
    let bench = Bench::new().add(|b| b).add(|b| b);
    let engine = bench.engine("multiplayer-privilege", SessionSettings::default());

    let phase = engine.advance(&bench.selection()).await.unwrap();
    assert_eq!(phase, Phase::ReadyForManualVerification);
    assert_eq!(engine.outcome(), Outcome::Pass);

    let snapshot = engine.snapshot();
    let child = &snapshot.profiles[&Role::Child];
    let inviting = &snapshot.profiles[&Role::Inviting];
    assert!(child.is_newly_created && inviting.is_newly_created);
    assert!(child.signed_in && inviting.signed_in);
    assert_ne!(child.gamertag, inviting.gamertag);
    assert!(bench.service.are_friends(&child.gamertag, &inviting.gamertag));
    assert!(snapshot.relationships_confirmed);

    for console in &bench.consoles {
        assert!(console.is_title_running());
        assert_eq!(console.installs().len(), 1);
        assert_eq!(console.profile_store().signed_in().len(), 1);
    }
    // A new inviting profile keeps its default privileges.
    assert!(bench.consoles[1].scripts_run().is_empty());
    assert!(snapshot.checks.iter().all(|c| c.verdict.is_none()));
}

#[tokio::test]
async fn test_required_relationship_failure_aborts() {
    let bench = Bench::new().add(|b| b).add(|b| {
        b.error_config(ErrorConfig::scenario(ErrorScenario::FailTimes {
            operation: ops::SEND_FRIEND_REQUEST,
            count: 2,
        }))
    });
    let bench = bench.add(|b| b);
    let engine = bench.engine("communication-privacy", SessionSettings::default());

    let err = engine.advance(&bench.selection()).await.unwrap_err();
    assert!(matches!(
        err,
        SessionError::Relationship(RelationshipError::Unconfirmed { attempts: 2, .. })
    ));
    assert_eq!(engine.phase(), Phase::Aborted);
    assert_eq!(engine.outcome(), Outcome::Fail);
    assert!(engine.snapshot().abort_reason.is_some());
    assert!(bench.host.logged("RESULT: FAIL"));

    // Nothing was configured, but the created profiles were cleaned up.
    for console in &bench.consoles {
        assert!(console.scripts_run().is_empty());
        assert_eq!(console.profile_store().deleted().len(), 1);
    }

    let err = engine
        .record_check("blocked-voice", CheckVerdict::Pass)
        .await
        .unwrap_err();
    assert!(matches!(err, SessionError::InvalidPhase { phase: Phase::Aborted, .. }));
}

#[tokio::test]
async fn test_disconnected_console_can_be_retried() {
    let bench = Bench::new().add(|b| b).add(|b| b.connected(false));
    let engine = bench.engine("multiplayer-privilege", SessionSettings::default());

    let err = engine.advance(&bench.selection()).await.unwrap_err();
    assert!(matches!(
        err,
        SessionError::Selection(SelectionError::Disconnected(_))
    ));
    assert_eq!(engine.phase(), Phase::Intro);

    bench.consoles[1].set_connected(true);
    let phase = engine.advance(&bench.selection()).await.unwrap();
    assert_eq!(phase, Phase::ReadyForManualVerification);
}

#[tokio::test]
async fn test_title_not_installable_is_rejected() {
    let bench = Bench::new().add(|b| b).add(|b| b.can_install(false));
    let engine = bench.engine("multiplayer-privilege", SessionSettings::default());

    let err = engine.advance(&bench.selection()).await.unwrap_err();
    assert!(matches!(
        err,
        SessionError::Selection(SelectionError::TitleNotInstallable(_))
    ));
    assert_eq!(engine.phase(), Phase::Intro);

    // A console that cannot install is fine when the title is already there.
    let bench = Bench::new()
        .add(|b| b)
        .add(|b| b.can_install(false).installed_on(["HDD"]));
    let engine = bench.engine("multiplayer-privilege", SessionSettings::default());
    engine.advance(&bench.selection()).await.unwrap();
    assert!(bench.consoles[1].installs().is_empty());
}

#[tokio::test]
async fn test_teardown_runs_once() {
    let bench = Bench::new().add(|b| b).add(|b| b).add(|b| b);
    let engine = bench.engine("communication-privacy", SessionSettings::default());
    engine.advance(&bench.selection()).await.unwrap();
    for check in ["blocked-voice", "blocked-text", "friend-unaffected"] {
        engine.record_check(check, CheckVerdict::Pass).await.unwrap();
    }

    engine.teardown().await;
    engine.stop().await;

    for console in &bench.consoles {
        assert_eq!(console.error_config().calls(ops::DELETE_PROFILE), 1);
        assert_eq!(console.profile_store().deleted().len(), 1);
    }
    let primary = &bench.consoles[0];
    let restores = primary
        .scripts_run()
        .iter()
        .filter(|s| *s == "Communications_Set_Everyone")
        .count();
    assert_eq!(restores, 1);
    let banners = bench
        .host
        .lines()
        .iter()
        .filter(|l| l.starts_with("RESULT:"))
        .count();
    assert_eq!(banners, 1);
    assert_eq!(engine.phase(), Phase::Concluded);
    assert_eq!(engine.outcome(), Outcome::Pass);
}

#[tokio::test(start_paused = true)]
async fn test_hung_script_is_bounded_by_join_timeout() {
    let bench = Bench::new().add(|b| b).add(|b| b).add(|b| {
        b.error_config(ErrorConfig::scenario(ErrorScenario::Hang {
            operation: ops::RUN_SCRIPT,
        }))
    });
    let settings = SessionSettings {
        config_join_timeout: JoinTimeout::Bounded(Duration::from_secs(5)),
        ..SessionSettings::default()
    };
    let engine = bench.engine("communication-privacy", settings);

    let started = tokio::time::Instant::now();
    let phase = engine.advance(&bench.selection()).await.unwrap();
    let elapsed = started.elapsed();

    assert_eq!(phase, Phase::ReadyForManualVerification);
    // Two waves include the tertiary console; each gives up after 5s.
    assert!(elapsed >= Duration::from_secs(10));
    assert!(elapsed < Duration::from_secs(11));
    assert!(bench.host.logged("incomplete"));
    assert!(bench.consoles[2].is_title_running());
    assert_eq!(engine.outcome(), Outcome::Pass);
}

#[tokio::test]
async fn test_cancel_during_install_aborts_and_tears_down() {
    let bench = Bench::new().add(|b| b).add(|b| {
        b.error_config(ErrorConfig::scenario(ErrorScenario::Hang {
            operation: ops::INSTALL_TITLE,
        }))
    });
    let engine = Arc::new(bench.engine("multiplayer-privilege", SessionSettings::default()));
    let mut rx = engine.subscribe();

    let runner = {
        let engine = engine.clone();
        let selection = bench.selection();
        tokio::spawn(async move { engine.advance(&selection).await })
    };

    loop {
        match rx.recv().await.unwrap() {
            SessionEvent::PhaseChanged {
                to: Phase::InstallAndLaunch,
                ..
            } => break,
            _ => continue,
        }
    }
    engine.cancel();

    let err = runner.await.unwrap().unwrap_err();
    assert!(matches!(err, SessionError::Cancelled));
    assert_eq!(engine.phase(), Phase::Aborted);
    assert_eq!(engine.outcome(), Outcome::Fail);
    assert!(bench.host.logged("RESULT: FAIL"));
    assert!(!bench.host.is_modal());
}

#[tokio::test]
async fn test_profile_created_behind_a_collision_failure_is_deleted() {
    let bench = Bench::new()
        .add(|b| b.profiles(["Same"]))
        .add(|b| b.profiles(["Same", "Same", "Same"]))
        .add(|b| b);
    let engine = bench.engine("communication-privacy", SessionSettings::default());

    let err = engine.advance(&bench.selection()).await.unwrap_err();
    assert!(matches!(
        err,
        SessionError::Profile(ProfileError::NoDistinctProfile {
            role: Role::Secondary,
            ..
        })
    ));
    assert_eq!(engine.phase(), Phase::Aborted);

    let tertiary = bench.consoles[2].profile_store();
    assert_eq!(tertiary.created().len(), 1);
    assert_eq!(tertiary.deleted(), tertiary.created());
    for console in &bench.consoles[..2] {
        assert!(console.profile_store().created().is_empty());
        assert!(console.profile_store().deleted().is_empty());
    }
    assert!(bench.host.logged("RESULT: FAIL"));
}

#[tokio::test(start_paused = true)]
async fn test_stop_during_profile_acquisition_deletes_finished_creations() {
    let bench = Bench::new().add(|b| b).add(|b| {
        b.error_config(ErrorConfig::scenario(ErrorScenario::Hang {
            operation: ops::ENUMERATE_PROFILES,
        }))
    });
    let engine = Arc::new(bench.engine("multiplayer-privilege", SessionSettings::default()));

    let runner = {
        let engine = engine.clone();
        let selection = bench.selection();
        tokio::spawn(async move { engine.advance(&selection).await })
    };
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(engine.phase(), Phase::ProfileAcquisition);

    engine.stop().await;
    let err = runner.await.unwrap().unwrap_err();
    assert!(matches!(err, SessionError::Cancelled));
    assert_eq!(engine.phase(), Phase::Aborted);

    let finished = bench.consoles[0].profile_store();
    assert_eq!(finished.created().len(), 1);
    assert_eq!(finished.deleted(), finished.created());
    assert!(bench.consoles[1].profile_store().created().is_empty());
    assert!(bench.host.logged("RESULT: FAIL"));
}
