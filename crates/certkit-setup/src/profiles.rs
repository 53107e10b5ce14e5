//! Profile acquisition and cross-role de-duplication.

use crate::roles::RoleMap;
use certkit_core::capabilities::{ConsoleDevice, ConsoleProfile};
use certkit_core::error::ProfileError;
use certkit_core::model::{Profile, Role, UserSlot};
use futures::future::join_all;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;

/// A profile resolved for one role, plus the handle needed to drive it.
#[derive(Clone)]
pub struct AcquiredProfile {
    /// Live profile handle
    pub handle: Arc<dyn ConsoleProfile>,
    /// Snapshot for the session
    pub profile: Profile,
    /// Console the profile lives on
    pub device_id: String,
}

impl AcquiredProfile {
    /// Gamertag of the profile
    pub fn gamertag(&self) -> &str {
        &self.profile.gamertag
    }

    /// Created during this session
    pub fn is_new(&self) -> bool {
        self.profile.is_newly_created
    }
}

impl std::fmt::Debug for AcquiredProfile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AcquiredProfile")
            .field("profile", &self.profile)
            .field("device_id", &self.device_id)
            .finish()
    }
}

/// Profiles created on consoles during acquisition.
///
/// A creation is recorded as soon as the console returns it, before sign-in
/// and before sibling consoles finish, so it survives an acquisition that
/// fails or is dropped afterwards.
#[derive(Debug, Default)]
pub struct CreatedProfiles {
    entries: Mutex<Vec<(String, String)>>,
}

impl CreatedProfiles {
    /// Empty ledger
    pub fn new() -> Self {
        Self::default()
    }

    fn record(&self, device_id: &str, gamertag: &str) {
        self.entries
            .lock()
            .push((device_id.to_string(), gamertag.to_string()));
    }

    /// Gamertags created on `device_id`, in creation order
    pub fn on_device(&self, device_id: &str) -> Vec<String> {
        self.entries
            .lock()
            .iter()
            .filter(|(id, _)| id == device_id)
            .map(|(_, tag)| tag.clone())
            .collect()
    }

    /// (console id, gamertag) of every created profile
    pub fn entries(&self) -> Vec<(String, String)> {
        self.entries.lock().clone()
    }

    /// Nothing created yet
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

/// Get the profile at `preferred_index` on `device`, or create one if the
/// console has fewer profiles. Everyone on the console is signed out first;
/// the resolved profile becomes the default and is signed in under `slot`.
pub async fn acquire_profile(
    device: &dyn ConsoleDevice,
    preferred_index: usize,
    slot: UserSlot,
) -> Result<AcquiredProfile, ProfileError> {
    acquire_recorded(device, preferred_index, slot, &CreatedProfiles::new()).await
}

async fn acquire_recorded(
    device: &dyn ConsoleDevice,
    preferred_index: usize,
    slot: UserSlot,
    created: &CreatedProfiles,
) -> Result<AcquiredProfile, ProfileError> {
    let wrap = |source: anyhow::Error| ProfileError::Acquisition {
        device: device.name().to_string(),
        source,
    };
    let manager = device.profiles();

    manager.sign_out_all().await.map_err(wrap)?;
    let existing = manager.enumerate_profiles().await.map_err(wrap)?;

    let (handle, is_new) = match existing.get(preferred_index) {
        Some(profile) => (profile.clone(), false),
        None => {
            let profile = manager.create_profile().await.map_err(wrap)?;
            created.record(device.id(), profile.gamertag());
            (profile, true)
        }
    };

    manager
        .set_default_profile(handle.gamertag())
        .await
        .map_err(wrap)?;
    handle.sign_in(slot).await.map_err(wrap)?;

    tracing::info!(
        device = %device.id(),
        gamertag = %handle.gamertag(),
        index = preferred_index,
        created = is_new,
        "Profile acquired"
    );

    Ok(AcquiredProfile {
        profile: Profile {
            gamertag: handle.gamertag().to_string(),
            is_newly_created: is_new,
            signed_in: true,
        },
        handle,
        device_id: device.id().to_string(),
    })
}

/// Acquire one profile per role with pairwise distinct gamertags.
pub async fn acquire_distinct_profiles(
    roles: &RoleMap<Arc<dyn ConsoleDevice>>,
    slots: &RoleMap<UserSlot>,
    max_attempts: usize,
) -> Result<RoleMap<AcquiredProfile>, ProfileError> {
    let mut acquired = RoleMap::new();
    let created = CreatedProfiles::new();
    acquire_distinct_profiles_into(roles, slots, max_attempts, &mut acquired, &created).await?;
    Ok(acquired)
}

/// Like [`acquire_distinct_profiles`], but every profile resolved so far
/// stays in `acquired` even when a later role fails, and every profile a
/// console creates lands in `created` the moment it exists. Cleanup should
/// go by `created`: a role that collides and retries, or that is still
/// queued behind a failing role, never reaches `acquired`.
///
/// The first attempt runs on every console concurrently. Collisions are then
/// resolved in role order: a role whose gamertag is already taken retries on
/// its own console with the next profile index, up to `max_attempts`
/// attempts in total.
pub async fn acquire_distinct_profiles_into(
    roles: &RoleMap<Arc<dyn ConsoleDevice>>,
    slots: &RoleMap<UserSlot>,
    max_attempts: usize,
    acquired: &mut RoleMap<AcquiredProfile>,
    created: &CreatedProfiles,
) -> Result<(), ProfileError> {
    let max_attempts = max_attempts.max(1);
    let slot_for = |role: &Role| slots.get(role).copied().unwrap_or_default();

    let first = join_all(
        roles
            .iter()
            .map(|(role, device)| acquire_recorded(device.as_ref(), 0, slot_for(role), created)),
    )
    .await;

    let mut pending_error = None;
    let mut first_results = Vec::with_capacity(first.len());
    for ((role, device), result) in roles.iter().zip(first) {
        match result {
            Ok(profile) => first_results.push((*role, device.clone(), profile)),
            Err(err) if pending_error.is_none() => pending_error = Some(err),
            Err(err) => tracing::warn!(role = %role, error = %err, "Profile acquisition failed"),
        }
    }
    if let Some(err) = pending_error {
        for (role, _, profile) in first_results {
            acquired.insert(role, profile);
        }
        return Err(err);
    }

    let mut taken: HashSet<String> = HashSet::new();
    for (role, device, mut profile) in first_results {
        let mut attempts = 1;
        while taken.contains(profile.gamertag()) {
            if attempts >= max_attempts {
                return Err(ProfileError::NoDistinctProfile {
                    role,
                    device: device.name().to_string(),
                    attempts,
                });
            }
            tracing::info!(
                role = %role,
                gamertag = %profile.gamertag(),
                attempt = attempts + 1,
                "Gamertag already used by another role, trying next profile"
            );
            profile = acquire_recorded(device.as_ref(), attempts, slot_for(&role), created).await?;
            attempts += 1;
        }
        taken.insert(profile.gamertag().to_string());
        acquired.insert(role, profile);
    }
    Ok(())
}
