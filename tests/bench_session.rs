//! Full sessions on a bench described by configuration.

use certkit::config::HarnessConfig;
use certkit::host::ConsoleHost;
use certkit::simulated_bench;
use certkit_core::model::{CheckVerdict, Outcome, Phase, Role};
use certkit_setup::{SessionEngine, SetupPlan};
use std::io::Write;
use std::sync::Arc;

const BENCH: &str = r#"
[title]
name = "Bench Title"

[[consoles]]
id = "devkit-1"
profiles = ["Existing"]

[[consoles]]
id = "devkit-2"
default = true

[[consoles]]
id = "devkit-3"
drives = ["MU0", "HDD"]
installed_on = ["HDD"]
"#;

fn load(contents: &str) -> HarnessConfig {
    let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    let config = HarnessConfig::load_from(file.path()).unwrap();
    config.validate().unwrap();
    config
}

#[tokio::test]
async fn test_configured_bench_runs_communication_privacy() {
    let config = load(BENCH);
    let bench = simulated_bench(&config);
    assert_eq!(bench.len(), 3);

    let host = Arc::new(ConsoleHost::new(false));
    let engine = SessionEngine::new(
        SetupPlan::builtin("communication-privacy").unwrap(),
        config.title.clone(),
        host.clone(),
        config.session_settings(),
    )
    .unwrap();

    engine.advance(&bench).await.unwrap();
    let snapshot = engine.snapshot();
    assert_eq!(snapshot.roles[&Role::Primary].device_id, "devkit-2");
    assert_eq!(snapshot.profiles[&Role::Secondary].gamertag, "Existing");
    assert!(!snapshot.profiles[&Role::Secondary].is_newly_created);
    assert!(snapshot.install_results.values().all(Result::is_ok));

    for check in &engine.plan().manual_checks {
        engine.record_check(&check.id, CheckVerdict::Pass).await.unwrap();
    }
    assert_eq!(engine.phase(), Phase::Concluded);
    assert_eq!(engine.outcome(), Outcome::Pass);
    assert!(host.lines().iter().any(|l| l == "RESULT: PASS"));
    assert!(!host.is_modal());
}

#[tokio::test]
async fn test_configured_disconnected_console_is_rejected() {
    let config = load(
        r#"
        [title]
        name = "Bench Title"

        [[consoles]]
        id = "devkit-1"

        [[consoles]]
        id = "devkit-2"
        connected = false
        "#,
    );
    let host = Arc::new(ConsoleHost::new(false));
    let engine = SessionEngine::new(
        SetupPlan::builtin("multiplayer-privilege").unwrap(),
        config.title.clone(),
        host.clone(),
        config.session_settings(),
    )
    .unwrap();

    let err = engine.advance(&simulated_bench(&config)).await.unwrap_err();
    assert!(err.is_recoverable());
    assert_eq!(engine.phase(), Phase::Intro);
    assert!(host.lines().iter().any(|l| l.contains("devkit-2")));
}
