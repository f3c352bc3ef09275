//! Presence updates pushed by the service.

use serde::{Deserialize, Serialize};

use crate::message::User;

/// A change in who is online.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PresenceUpdate {
    /// A user connected. `user` is present when the service attached the
    /// full profile.
    UserOnline {
        /// The user that came online.
        user_id: String,
        /// Profile data, if supplied.
        user: Option<User>,
    },
    /// A user disconnected.
    UserOffline {
        /// The user that went offline.
        user_id: String,
    },
    /// Authoritative list of every online user.
    OnlineUsers {
        /// Ids of all users currently online.
        user_ids: Vec<String>,
    },
}

impl std::fmt::Display for PresenceUpdate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UserOnline { user_id, .. } => write!(f, "user_online({user_id})"),
            Self::UserOffline { user_id } => write!(f, "user_offline({user_id})"),
            Self::OnlineUsers { user_ids } => write!(f, "online_users({})", user_ids.len()),
        }
    }
}
