use bson::{oid::ObjectId, DateTime};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Conversation {
    #[serde(rename = "_id")]
    pub id: ObjectId,
    /// Exactly two user ids; order carries no meaning.
    pub participants: Vec<ObjectId>,
    pub last_message: Option<String>,
    pub last_message_at: Option<DateTime>,
    #[serde(default)]
    pub unread_count: u32,
    pub created_at: DateTime,
}

impl Conversation {
    pub const COLLECTION: &'static str = "conversations";

    /// Id shared by every conversation record between `a` and `b`,
    /// independent of who writes first.
    pub fn pair_id(a: ObjectId, b: ObjectId) -> ObjectId {
        let (lo, hi) = if a.bytes() <= b.bytes() { (a, b) } else { (b, a) };

        let mut hasher = Sha256::new();
        hasher.update(lo.bytes());
        hasher.update(hi.bytes());
        let digest = hasher.finalize();

        let mut bytes = [0u8; 12];
        bytes.copy_from_slice(&digest[..12]);
        ObjectId::from_bytes(bytes)
    }

    /// True when the participant set is exactly `{a, b}`.
    pub fn is_between(&self, a: &ObjectId, b: &ObjectId) -> bool {
        self.participants.len() == 2
            && a != b
            && self.participants.contains(a)
            && self.participants.contains(b)
    }

    pub fn other_participant(&self, me: &ObjectId) -> Option<ObjectId> {
        self.participants.iter().find(|p| *p != me).copied()
    }
}
