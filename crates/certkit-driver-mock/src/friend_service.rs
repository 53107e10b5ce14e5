//! Simulated online friend service shared by every mock console.
//!
//! Gamertags are the identity key, so two consoles that both store a
//! profile named `Alice` see the same friend list for it.

use parking_lot::Mutex;
use std::collections::{BTreeSet, HashSet};

#[derive(Debug, Default)]
struct FriendState {
    /// Unordered pairs stored as (lower, higher)
    friendships: BTreeSet<(String, String)>,
    /// Outstanding requests as (from, to)
    pending: HashSet<(String, String)>,
    /// Counter for generated gamertags
    next_id: u32,
}

/// Friend graph and pending requests.
#[derive(Debug, Default)]
pub struct FriendService {
    state: Mutex<FriendState>,
}

fn pair(a: &str, b: &str) -> (String, String) {
    if a <= b {
        (a.to_string(), b.to_string())
    } else {
        (b.to_string(), a.to_string())
    }
}

impl FriendService {
    /// Empty service
    pub fn new() -> Self {
        Self::default()
    }

    /// Next generated gamertag (`CertTester001`, `CertTester002`, ...)
    pub fn next_gamertag(&self) -> String {
        let mut state = self.state.lock();
        state.next_id += 1;
        format!("CertTester{:03}", state.next_id)
    }

    /// Make two gamertags friends without a request round
    pub fn befriend(&self, a: &str, b: &str) {
        self.state.lock().friendships.insert(pair(a, b));
    }

    /// Whether `a` and `b` are friends
    pub fn are_friends(&self, a: &str, b: &str) -> bool {
        self.state.lock().friendships.contains(&pair(a, b))
    }

    /// Friends of `gamertag`, sorted
    pub fn friends_of(&self, gamertag: &str) -> Vec<String> {
        self.state
            .lock()
            .friendships
            .iter()
            .filter_map(|(a, b)| {
                if a == gamertag {
                    Some(b.clone())
                } else if b == gamertag {
                    Some(a.clone())
                } else {
                    None
                }
            })
            .collect()
    }

    /// Record a friend request. Requests to oneself are rejected.
    pub fn request(&self, from: &str, to: &str) -> Result<(), String> {
        if from == to {
            return Err(format!("{} cannot send a friend request to itself", from));
        }
        self.state
            .lock()
            .pending
            .insert((from.to_string(), to.to_string()));
        Ok(())
    }

    /// Accept the pending request `from -> accepter`
    pub fn accept(&self, accepter: &str, from: &str) -> Result<(), String> {
        let mut state = self.state.lock();
        if !state
            .pending
            .remove(&(from.to_string(), accepter.to_string()))
        {
            return Err(format!("No pending friend request from {} to {}", from, accepter));
        }
        state.friendships.insert(pair(from, accepter));
        Ok(())
    }

    /// Number of outstanding requests
    pub fn pending_requests(&self) -> usize {
        self.state.lock().pending.len()
    }

    /// Number of friendships
    pub fn friendship_count(&self) -> usize {
        self.state.lock().friendships.len()
    }
}
