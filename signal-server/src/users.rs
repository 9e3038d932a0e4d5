//! User directory collaborator.
//!
//! Registration, authentication and profile storage live outside the call
//! core; the router only needs to resolve user ids to display names and to
//! know whether an id exists at all.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Mutex;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub id: String,
    pub display_name: String,
}

pub trait UserDirectory: Send + Sync {
    fn get(&self, user_id: &str) -> Option<UserProfile>;

    /// Record (or refresh) a profile. Called when a user announces
    /// availability; the announcement carries the display name.
    fn upsert(&self, profile: UserProfile);
}

/// Directory backed by process memory, populated from `user_online`
/// announcements.
#[derive(Default)]
pub struct InMemoryUserDirectory {
    users: Mutex<HashMap<String, UserProfile>>,
}

impl InMemoryUserDirectory {
    pub fn new() -> Self {
        Self::default()
    }
}

impl UserDirectory for InMemoryUserDirectory {
    fn get(&self, user_id: &str) -> Option<UserProfile> {
        self.users
            .lock()
            .expect("user directory lock poisoned")
            .get(user_id)
            .cloned()
    }

    fn upsert(&self, profile: UserProfile) {
        self.users
            .lock()
            .expect("user directory lock poisoned")
            .insert(profile.id.clone(), profile);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upsert_replaces_display_name() {
        let dir = InMemoryUserDirectory::new();
        dir.upsert(UserProfile {
            id: "u1".into(),
            display_name: "Ada".into(),
        });
        dir.upsert(UserProfile {
            id: "u1".into(),
            display_name: "Ada L.".into(),
        });

        let profile = dir.get("u1").unwrap();
        assert_eq!(profile.display_name, "Ada L.");
        assert!(dir.get("u2").is_none());
    }
}
