//! Roster and online-status tracking.
//!
//! The roster is the list of users the local user can talk to; the online
//! set is maintained from presence pushes. Neither ever contains the local
//! user.

use std::collections::BTreeSet;

use parley_proto::message::User;
use parley_proto::presence::PresenceUpdate;

/// Who exists, and who is online right now.
#[derive(Debug, Clone, Default)]
pub struct PresenceTracker {
    local_user: Option<String>,
    roster: Vec<User>,
    online: BTreeSet<String>,
}

impl PresenceTracker {
    /// Creates an empty tracker with no local user.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Clears roster and online set and records who the local user is.
    pub fn reset(&mut self, local_user: Option<String>) {
        self.local_user = local_user;
        self.roster.clear();
        self.online.clear();
    }

    fn is_self(&self, user_id: &str) -> bool {
        self.local_user.as_deref() == Some(user_id)
    }

    /// Replaces the roster with `users`, minus the local user.
    pub fn set_roster(&mut self, users: Vec<User>) {
        let local = self.local_user.as_deref();
        self.roster = users
            .into_iter()
            .filter(|user| Some(user.id.as_str()) != local)
            .collect();
    }

    /// Applies a presence push. Returns whether anything changed.
    pub fn apply(&mut self, update: PresenceUpdate) -> bool {
        match update {
            PresenceUpdate::UserOnline { user_id, user } => {
                let mut changed = false;
                if let Some(user) = user
                    && !self.is_self(&user.id)
                    && !self.roster.iter().any(|known| known.id == user.id)
                {
                    tracing::debug!(user_id = %user.id, "adding newly seen user to roster");
                    self.roster.push(user);
                    changed = true;
                }
                if !self.is_self(&user_id) {
                    changed |= self.online.insert(user_id);
                }
                changed
            }
            PresenceUpdate::UserOffline { user_id } => self.online.remove(&user_id),
            PresenceUpdate::OnlineUsers { user_ids } => {
                let local = self.local_user.as_deref();
                let online: BTreeSet<String> = user_ids
                    .into_iter()
                    .filter(|id| Some(id.as_str()) != local)
                    .collect();
                let changed = online != self.online;
                self.online = online;
                changed
            }
        }
    }

    /// Known users other than the local user.
    #[must_use]
    pub fn roster(&self) -> &[User] {
        &self.roster
    }

    /// Ids of users currently online, in sorted order.
    pub fn online(&self) -> impl Iterator<Item = &str> {
        self.online.iter().map(String::as_str)
    }

    /// Whether `user_id` is online.
    #[must_use]
    pub fn is_online(&self, user_id: &str) -> bool {
        self.online.contains(user_id)
    }
}
