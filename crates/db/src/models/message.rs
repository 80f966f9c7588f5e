use bson::{oid::ObjectId, DateTime};
use serde::{Deserialize, Serialize};

/// A chat line. `chat_id` is a conversation id for direct chats and the
/// team id for the team channel.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Message {
    #[serde(rename = "_id")]
    pub id: ObjectId,
    pub chat_id: ObjectId,
    pub sender_id: ObjectId,
    pub text: String,
    pub timestamp: DateTime,
}

impl Message {
    pub const COLLECTION: &'static str = "messages";
}
