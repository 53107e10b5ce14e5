//! Integration tests for the mock console system
//!
//! These tests drive mocks only through the capability traits, the way the
//! setup engine does.

use certkit_core::capabilities::{ConsoleDevice, ConsoleProfile};
use certkit_core::model::{DriveId, UserSlot};
use certkit_driver_mock::*;
use std::sync::Arc;

fn pair() -> (Arc<MockConsole>, Arc<MockConsole>) {
    let service = Arc::new(FriendService::new());
    let a = MockConsole::builder("devkit-a")
        .profiles(["Alice"])
        .service(service.clone())
        .build();
    let b = MockConsole::builder("devkit-b")
        .profiles(["Bob"])
        .service(service)
        .build();
    (Arc::new(a), Arc::new(b))
}

#[tokio::test]
async fn test_friend_round_through_traits() {
    let (a, b) = pair();
    let a_dyn: Arc<dyn ConsoleDevice> = a.clone();
    let b_dyn: Arc<dyn ConsoleDevice> = b.clone();

    let alice = a_dyn.profiles().enumerate_profiles().await.unwrap().remove(0);
    let bob = b_dyn.profiles().enumerate_profiles().await.unwrap().remove(0);
    alice.sign_in(UserSlot::Zero).await.unwrap();
    bob.sign_in(UserSlot::Zero).await.unwrap();

    bob.send_friend_request(alice.gamertag()).await.unwrap();
    alice.accept_friend_request(bob.gamertag()).await.unwrap();

    assert_eq!(alice.enumerate_friends().await.unwrap(), vec!["Bob".to_string()]);
    assert_eq!(bob.enumerate_friends().await.unwrap(), vec!["Alice".to_string()]);
}

#[tokio::test]
async fn test_created_profiles_have_distinct_gamertags_across_consoles() {
    let (a, b) = pair();
    let x = a.profiles().create_profile().await.unwrap();
    let y = b.profiles().create_profile().await.unwrap();
    assert_ne!(x.gamertag(), y.gamertag());
    assert_eq!(a.profile_store().created(), vec![x.gamertag().to_string()]);
}

#[tokio::test]
async fn test_preinstalled_title_launches_without_install() {
    let console = MockConsole::builder("devkit-c")
        .drives(["MU0", "HDD"])
        .installed_on(["HDD"])
        .build();
    let hdd = DriveId::new("HDD");
    assert!(console.is_title_installed(&hdd).await.unwrap());
    console.launch_title(Some(&hdd)).await.unwrap();
    assert!(console.installs().is_empty());
    assert_eq!(console.launches(), vec![Some(hdd)]);
}

#[tokio::test]
async fn test_communication_loss_shared_with_profiles() {
    let console = MockConsole::builder("devkit-d")
        .profiles(["Carol"])
        .error_config(ErrorConfig::scenario(ErrorScenario::CommunicationLoss))
        .build();
    assert!(console.list_drives().await.is_err());
    let carol = console.profile_store().profile("Carol").unwrap();
    assert!(carol.sign_in(UserSlot::One).await.is_err());
}

#[tokio::test(start_paused = true)]
async fn test_hanging_operation_never_completes() {
    let console = MockConsole::builder("devkit-e")
        .error_config(ErrorConfig::scenario(ErrorScenario::Hang {
            operation: ops::RUN_SCRIPT,
        }))
        .build();
    let result = tokio::time::timeout(
        std::time::Duration::from_secs(600),
        console.run_named_script("Voice_Output_Set_Speakers"),
    )
    .await;
    assert!(result.is_err());
    assert!(console.scripts_run().is_empty());
}

#[test]
fn test_mock_modes() {
    assert_eq!(MockMode::default(), MockMode::Instant);
    let chaos = MockConsole::builder("devkit-f").mode(MockMode::Chaos).build();
    assert!(chaos.is_connected());
}
