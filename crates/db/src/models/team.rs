use bson::{oid::ObjectId, DateTime};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Team {
    #[serde(rename = "_id")]
    pub id: ObjectId,
    pub name: String,
    pub owner_id: ObjectId,
    /// Always one of `members`.
    pub admin_id: ObjectId,
    #[serde(default)]
    pub members: Vec<ObjectId>,
    pub created_at: DateTime,
}

impl Team {
    pub const COLLECTION: &'static str = "teams";

    pub fn is_member(&self, user_id: &ObjectId) -> bool {
        self.members.contains(user_id)
    }

    pub fn is_admin(&self, user_id: &ObjectId) -> bool {
        self.admin_id == *user_id
    }
}
