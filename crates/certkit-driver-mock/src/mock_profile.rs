//! Mock profile store and profiles.

use anyhow::Result;
use async_trait::async_trait;
use certkit_core::capabilities::{ConsoleProfile, ProfileManager};
use certkit_core::error::{DriverError, DriverErrorKind};
use certkit_core::model::UserSlot;
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use tokio::time::sleep;

use crate::common::{ops, ErrorConfig, MockMode, TimingConfig};
use crate::friend_service::FriendService;

/// Everything a profile needs from its console
#[derive(Clone)]
pub(crate) struct ProfileContext {
    pub driver_type: String,
    pub service: Arc<FriendService>,
    pub errors: ErrorConfig,
    pub mode: MockMode,
    pub timing: TimingConfig,
}

impl ProfileContext {
    async fn check(&self, operation: &'static str) -> Result<()> {
        if self.errors.should_hang(operation) {
            futures::future::pending::<()>().await;
        }
        if self.mode.simulates_delays() {
            let delay = match operation {
                ops::ENUMERATE_FRIENDS | ops::SEND_FRIEND_REQUEST | ops::ACCEPT_FRIEND_REQUEST => {
                    self.timing.communication()
                }
                _ => self.timing.profile(),
            };
            sleep(delay).await;
        }
        self.errors.check_operation(&self.driver_type, operation)?;
        Ok(())
    }
}

// =============================================================================
// MockProfile
// =============================================================================

/// One profile stored on a mock console.
pub struct MockProfile {
    gamertag: String,
    ctx: ProfileContext,
    slot: Mutex<Option<UserSlot>>,
    friend_request_attempts: AtomicU32,
}

impl MockProfile {
    pub(crate) fn new(gamertag: impl Into<String>, ctx: ProfileContext) -> Self {
        Self {
            gamertag: gamertag.into(),
            ctx,
            slot: Mutex::new(None),
            friend_request_attempts: AtomicU32::new(0),
        }
    }

    /// Slot the profile is signed in under, if any
    pub fn signed_in_slot(&self) -> Option<UserSlot> {
        *self.slot.lock()
    }

    /// Friend requests attempted, including failed ones
    pub fn friend_request_attempts(&self) -> u32 {
        self.friend_request_attempts.load(Ordering::SeqCst)
    }

    fn force_sign_out(&self) {
        *self.slot.lock() = None;
    }
}

#[async_trait]
impl ConsoleProfile for MockProfile {
    fn gamertag(&self) -> &str {
        &self.gamertag
    }

    async fn sign_in(&self, slot: UserSlot) -> Result<()> {
        self.ctx.check(ops::SIGN_IN).await?;
        *self.slot.lock() = Some(slot);
        tracing::debug!(gamertag = %self.gamertag, slot = slot.index(), "Mock profile signed in");
        Ok(())
    }

    async fn sign_out(&self) -> Result<()> {
        self.ctx.check(ops::SIGN_OUT).await?;
        self.force_sign_out();
        Ok(())
    }

    async fn is_signed_in(&self) -> Result<bool> {
        Ok(self.slot.lock().is_some())
    }

    async fn enumerate_friends(&self) -> Result<Vec<String>> {
        self.ctx.check(ops::ENUMERATE_FRIENDS).await?;
        Ok(self.ctx.service.friends_of(&self.gamertag))
    }

    async fn send_friend_request(&self, target: &str) -> Result<()> {
        self.friend_request_attempts.fetch_add(1, Ordering::SeqCst);
        self.ctx.check(ops::SEND_FRIEND_REQUEST).await?;
        self.ctx
            .service
            .request(&self.gamertag, target)
            .map_err(|msg| {
                DriverError::new(&self.ctx.driver_type, DriverErrorKind::InvalidParameter, msg)
            })?;
        Ok(())
    }

    async fn accept_friend_request(&self, from: &str) -> Result<()> {
        self.ctx.check(ops::ACCEPT_FRIEND_REQUEST).await?;
        self.ctx
            .service
            .accept(&self.gamertag, from)
            .map_err(|msg| {
                DriverError::new(&self.ctx.driver_type, DriverErrorKind::NotFound, msg)
            })?;
        Ok(())
    }
}

// =============================================================================
// MockProfileManager
// =============================================================================

#[derive(Default)]
struct StoreState {
    profiles: Vec<Arc<MockProfile>>,
    default_profile: Option<String>,
    created: Vec<String>,
    deleted: Vec<String>,
}

/// Profile store of one mock console.
pub struct MockProfileManager {
    ctx: ProfileContext,
    state: Mutex<StoreState>,
}

impl MockProfileManager {
    pub(crate) fn new(ctx: ProfileContext, gamertags: &[String]) -> Self {
        let profiles = gamertags
            .iter()
            .map(|tag| Arc::new(MockProfile::new(tag.clone(), ctx.clone())))
            .collect();
        Self {
            ctx,
            state: Mutex::new(StoreState {
                profiles,
                ..Default::default()
            }),
        }
    }

    /// Concrete profile by gamertag
    pub fn profile(&self, gamertag: &str) -> Option<Arc<MockProfile>> {
        self.state
            .lock()
            .profiles
            .iter()
            .find(|p| p.gamertag() == gamertag)
            .cloned()
    }

    /// Gamertags currently stored
    pub fn gamertags(&self) -> Vec<String> {
        self.state
            .lock()
            .profiles
            .iter()
            .map(|p| p.gamertag().to_string())
            .collect()
    }

    /// Gamertags created through `create_profile`
    pub fn created(&self) -> Vec<String> {
        self.state.lock().created.clone()
    }

    /// Gamertags removed through `delete_profile`
    pub fn deleted(&self) -> Vec<String> {
        self.state.lock().deleted.clone()
    }

    /// Current default profile
    pub fn default_profile(&self) -> Option<String> {
        self.state.lock().default_profile.clone()
    }

    /// Gamertags currently signed in
    pub fn signed_in(&self) -> Vec<String> {
        self.state
            .lock()
            .profiles
            .iter()
            .filter(|p| p.signed_in_slot().is_some())
            .map(|p| p.gamertag().to_string())
            .collect()
    }
}

#[async_trait]
impl ProfileManager for MockProfileManager {
    async fn enumerate_profiles(&self) -> Result<Vec<Arc<dyn ConsoleProfile>>> {
        self.ctx.check(ops::ENUMERATE_PROFILES).await?;
        Ok(self
            .state
            .lock()
            .profiles
            .iter()
            .map(|p| p.clone() as Arc<dyn ConsoleProfile>)
            .collect())
    }

    async fn create_profile(&self) -> Result<Arc<dyn ConsoleProfile>> {
        self.ctx.check(ops::CREATE_PROFILE).await?;
        let gamertag = self.ctx.service.next_gamertag();
        let profile = Arc::new(MockProfile::new(gamertag.clone(), self.ctx.clone()));
        {
            let mut state = self.state.lock();
            state.profiles.push(profile.clone());
            state.created.push(gamertag.clone());
        }
        tracing::debug!(
            driver = %self.ctx.driver_type,
            gamertag = %gamertag,
            "Mock profile created"
        );
        Ok(profile)
    }

    async fn set_default_profile(&self, gamertag: &str) -> Result<()> {
        self.ctx.check(ops::SET_DEFAULT_PROFILE).await?;
        let mut state = self.state.lock();
        if !state.profiles.iter().any(|p| p.gamertag() == gamertag) {
            return Err(DriverError::new(
                &self.ctx.driver_type,
                DriverErrorKind::NotFound,
                format!("Profile '{}' does not exist", gamertag),
            )
            .into());
        }
        state.default_profile = Some(gamertag.to_string());
        Ok(())
    }

    async fn sign_out_all(&self) -> Result<()> {
        self.ctx.check(ops::SIGN_OUT_ALL).await?;
        for profile in self.state.lock().profiles.iter() {
            profile.force_sign_out();
        }
        Ok(())
    }

    async fn delete_profile(&self, gamertag: &str) -> Result<()> {
        self.ctx.check(ops::DELETE_PROFILE).await?;
        let mut state = self.state.lock();
        let Some(index) = state.profiles.iter().position(|p| p.gamertag() == gamertag) else {
            return Err(DriverError::new(
                &self.ctx.driver_type,
                DriverErrorKind::NotFound,
                format!("Profile '{}' does not exist", gamertag),
            )
            .into());
        };
        state.profiles.remove(index);
        state.deleted.push(gamertag.to_string());
        if state.default_profile.as_deref() == Some(gamertag) {
            state.default_profile = None;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::ErrorScenario;

    fn ctx(errors: ErrorConfig) -> ProfileContext {
        ProfileContext {
            driver_type: "mock_console[test]".into(),
            service: Arc::new(FriendService::new()),
            errors,
            mode: MockMode::Instant,
            timing: TimingConfig::default(),
        }
    }

    #[tokio::test]
    async fn test_create_sign_in_delete() {
        let store = MockProfileManager::new(ctx(ErrorConfig::none()), &[]);
        assert!(store.enumerate_profiles().await.unwrap().is_empty());

        let profile = store.create_profile().await.unwrap();
        let tag = profile.gamertag().to_string();
        profile.sign_in(UserSlot::One).await.unwrap();
        assert_eq!(store.signed_in(), vec![tag.clone()]);

        store.sign_out_all().await.unwrap();
        assert!(store.signed_in().is_empty());

        store.delete_profile(&tag).await.unwrap();
        assert_eq!(store.deleted(), vec![tag.clone()]);
        assert!(store.delete_profile(&tag).await.is_err());
    }

    #[tokio::test]
    async fn test_friend_round_between_stores() {
        let shared = ctx(ErrorConfig::none());
        let a = MockProfileManager::new(shared.clone(), &["Alice".into()]);
        let b = MockProfileManager::new(shared, &["Bob".into()]);
        let alice = a.profile("Alice").unwrap();
        let bob = b.profile("Bob").unwrap();

        alice.send_friend_request("Bob").await.unwrap();
        bob.accept_friend_request("Alice").await.unwrap();
        assert_eq!(bob.enumerate_friends().await.unwrap(), vec!["Alice".to_string()]);
        assert_eq!(alice.friend_request_attempts(), 1);
    }

    #[tokio::test]
    async fn test_failed_request_still_counts_attempt() {
        let store = MockProfileManager::new(
            ctx(ErrorConfig::scenario(ErrorScenario::FailTimes {
                operation: ops::SEND_FRIEND_REQUEST,
                count: 1,
            })),
            &["Alice".into()],
        );
        let alice = store.profile("Alice").unwrap();
        assert!(alice.send_friend_request("Bob").await.is_err());
        assert!(alice.send_friend_request("Bob").await.is_ok());
        assert_eq!(alice.friend_request_attempts(), 2);
    }

    #[tokio::test]
    async fn test_set_default_requires_existing_profile() {
        let store = MockProfileManager::new(ctx(ErrorConfig::none()), &["Alice".into()]);
        assert!(store.set_default_profile("Nobody").await.is_err());
        store.set_default_profile("Alice").await.unwrap();
        assert_eq!(store.default_profile().as_deref(), Some("Alice"));
    }
}
