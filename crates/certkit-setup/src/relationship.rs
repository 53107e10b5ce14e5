//! Friend relationship establishment between two profiles.

use certkit_core::capabilities::ConsoleProfile;
use certkit_core::error::RelationshipError;

/// Request/accept rounds attempted before giving up
pub const MAX_FRIEND_ATTEMPTS: u32 = 2;

/// How a confirmed friendship came about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FriendOutcome {
    /// The profiles were already friends; nothing was changed
    AlreadyFriended,
    /// A request/accept round made them friends
    Established {
        /// Rounds attempted, including the one that succeeded
        attempts: u32,
    },
}

/// Whether `profile` lists `other` as a friend.
///
/// A failed query counts as "not friended" so a transient error only costs
/// an extra request round.
pub async fn are_friended(profile: &dyn ConsoleProfile, other: &str) -> bool {
    match profile.enumerate_friends().await {
        Ok(friends) => friends.iter().any(|f| f == other),
        Err(err) => {
            tracing::warn!(
                gamertag = %profile.gamertag(),
                error = %err,
                "Friend list query failed, assuming not friended"
            );
            false
        }
    }
}

async fn friend_round(
    requester: &dyn ConsoleProfile,
    accepter: &dyn ConsoleProfile,
) -> anyhow::Result<()> {
    requester.send_friend_request(accepter.gamertag()).await?;
    accepter.accept_friend_request(requester.gamertag()).await?;
    Ok(())
}

/// Make `requester` and `accepter` friends.
///
/// `requester` sends, `accepter` accepts. A failed round is retried once with
/// the same two profiles, unless a re-query shows the friendship now exists.
pub async fn ensure_friended(
    requester: &dyn ConsoleProfile,
    accepter: &dyn ConsoleProfile,
) -> Result<FriendOutcome, RelationshipError> {
    if are_friended(requester, accepter.gamertag()).await {
        return Ok(FriendOutcome::AlreadyFriended);
    }

    let mut attempts = 0;
    loop {
        attempts += 1;
        let err = match friend_round(requester, accepter).await {
            Ok(()) => {
                tracing::info!(
                    requester = %requester.gamertag(),
                    accepter = %accepter.gamertag(),
                    attempts,
                    "Profiles friended"
                );
                return Ok(FriendOutcome::Established { attempts });
            }
            Err(err) => err,
        };

        tracing::warn!(
            requester = %requester.gamertag(),
            accepter = %accepter.gamertag(),
            attempt = attempts,
            error = %err,
            "Friend request round failed"
        );

        if attempts >= MAX_FRIEND_ATTEMPTS {
            return Err(RelationshipError::Unconfirmed {
                requester: requester.gamertag().to_string(),
                accepter: accepter.gamertag().to_string(),
                attempts,
                last_error: format!("{err:#}"),
            });
        }
        if are_friended(requester, accepter.gamertag()).await {
            return Ok(FriendOutcome::Established { attempts });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use certkit_driver_mock::{
        ops, ErrorConfig, ErrorScenario, FriendService, MockConsole, MockProfile,
    };
    use std::sync::Arc;

    fn profile(
        id: &str,
        tag: &str,
        service: &Arc<FriendService>,
        errors: ErrorConfig,
    ) -> Arc<MockProfile> {
        let console = MockConsole::builder(id)
            .profiles([tag])
            .service(service.clone())
            .error_config(errors)
            .build();
        console.profile_store().profile(tag).unwrap()
    }

    #[tokio::test]
    async fn test_establish_then_idempotent() {
        let service = Arc::new(FriendService::new());
        let alice = profile("a", "Alice", &service, ErrorConfig::none());
        let bob = profile("b", "Bob", &service, ErrorConfig::none());

        let first = ensure_friended(bob.as_ref(), alice.as_ref()).await.unwrap();
        assert_eq!(first, FriendOutcome::Established { attempts: 1 });

        let second = ensure_friended(bob.as_ref(), alice.as_ref()).await.unwrap();
        assert_eq!(second, FriendOutcome::AlreadyFriended);
        assert_eq!(bob.friend_request_attempts(), 1);
    }

    #[tokio::test]
    async fn test_retry_succeeds_with_same_two_profiles() {
        let service = Arc::new(FriendService::new());
        let alice = profile("a", "Alice", &service, ErrorConfig::none());
        let bob = profile(
            "b",
            "Bob",
            &service,
            ErrorConfig::scenario(ErrorScenario::FailTimes {
                operation: ops::SEND_FRIEND_REQUEST,
                count: 1,
            }),
        );
        let outcome = ensure_friended(bob.as_ref(), alice.as_ref()).await.unwrap();
        assert_eq!(outcome, FriendOutcome::Established { attempts: 2 });
        assert!(service.are_friends("Alice", "Bob"));
        assert_eq!(service.friendship_count(), 1);
    }

    #[tokio::test]
    async fn test_unconfirmed_after_two_attempts() {
        let service = Arc::new(FriendService::new());
        let alice = profile("a", "Alice", &service, ErrorConfig::none());
        let bob = profile(
            "b",
            "Bob",
            &service,
            ErrorConfig::scenario(ErrorScenario::FailTimes {
                operation: ops::SEND_FRIEND_REQUEST,
                count: 2,
            }),
        );
        let err = ensure_friended(bob.as_ref(), alice.as_ref()).await.unwrap_err();
        let RelationshipError::Unconfirmed { attempts, requester, accepter, .. } = err;
        assert_eq!(attempts, 2);
        assert_eq!(requester, "Bob");
        assert_eq!(accepter, "Alice");
        assert_eq!(bob.friend_request_attempts(), 2);
    }

    #[tokio::test]
    async fn test_query_failure_is_not_fatal() {
        let service = Arc::new(FriendService::new());
        let alice = profile("a", "Alice", &service, ErrorConfig::none());
        let bob = profile(
            "b",
            "Bob",
            &service,
            ErrorConfig::scenario(ErrorScenario::Timeout {
                operation: ops::ENUMERATE_FRIENDS,
            }),
        );
        assert!(!are_friended(bob.as_ref(), "Alice").await);
        let outcome = ensure_friended(bob.as_ref(), alice.as_ref()).await.unwrap();
        assert_eq!(outcome, FriendOutcome::Established { attempts: 1 });
    }
}
