use bson::{oid::ObjectId, DateTime};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct User {
    #[serde(rename = "_id")]
    pub id: ObjectId,
    pub display_name: String,
    #[serde(default)]
    pub handle: String,
    pub avatar: Option<String>,
    #[serde(default)]
    pub is_online: bool,
    pub status: Option<String>,
    pub last_seen: Option<DateTime>,
    pub team_id: Option<ObjectId>,
    #[serde(default)]
    pub blocked_user_ids: Vec<ObjectId>,
}

/// The subset of a user document that realtime presence updates may touch.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Presence {
    pub is_online: bool,
    pub status: Option<String>,
    pub last_seen: Option<DateTime>,
}

impl User {
    pub const COLLECTION: &'static str = "users";

    /// Placeholder shown for conversation partners whose account is gone.
    pub fn deleted(id: ObjectId) -> Self {
        Self {
            id,
            display_name: "deleted user".to_string(),
            handle: String::new(),
            avatar: None,
            is_online: false,
            status: None,
            last_seen: None,
            team_id: None,
            blocked_user_ids: Vec::new(),
        }
    }

    pub fn presence(&self) -> Presence {
        Presence {
            is_online: self.is_online,
            status: self.status.clone(),
            last_seen: self.last_seen,
        }
    }

    pub fn apply_presence(&mut self, presence: Presence) {
        self.is_online = presence.is_online;
        self.status = presence.status;
        self.last_seen = presence.last_seen;
    }

    pub fn has_blocked(&self, other: &ObjectId) -> bool {
        self.blocked_user_ids.contains(other)
    }
}
