use std::sync::Arc;

use bson::{doc, oid::ObjectId, DateTime};
use huddle_db::models::Conversation;
use huddle_db::store::{DocumentStore, Filter, Query};

use super::base::{BaseDao, DaoResult};

pub struct ConversationDao {
    pub base: BaseDao<Conversation>,
}

impl ConversationDao {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self {
            base: BaseDao::new(store, Conversation::COLLECTION),
        }
    }

    pub async fn create(
        &self,
        id: ObjectId,
        participants: [ObjectId; 2],
        preview: String,
        at: DateTime,
    ) -> DaoResult<Conversation> {
        let conversation = Conversation {
            id,
            participants: participants.to_vec(),
            last_message: Some(preview),
            last_message_at: Some(at),
            unread_count: 1,
            created_at: at,
        };

        self.base.insert_one(&conversation).await
    }

    /// Every conversation `user_id` takes part in, most recently active first.
    pub async fn find_for_participant(&self, user_id: ObjectId) -> DaoResult<Vec<Conversation>> {
        self.base
            .find_many(
                Query::new()
                    .filter(Filter::contains("participants", user_id))
                    .order_desc("last_message_at"),
            )
            .await
    }

    pub async fn update_preview(
        &self,
        id: ObjectId,
        preview: String,
        at: DateTime,
        unread_count: u32,
    ) -> DaoResult<Conversation> {
        self.base
            .update_by_id(
                id,
                doc! {
                    "last_message": preview,
                    "last_message_at": at,
                    "unread_count": i64::from(unread_count),
                },
            )
            .await
    }

    pub async fn mark_read(&self, id: ObjectId) -> DaoResult<Conversation> {
        self.base
            .update_by_id(id, doc! { "unread_count": 0_i64 })
            .await
    }
}
