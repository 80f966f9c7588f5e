use std::sync::Arc;

use bson::oid::ObjectId;
use huddle_db::models::Message;
use huddle_db::store::{DocumentStore, Filter, Query};

use super::base::{BaseDao, DaoResult, PaginatedResult, PaginationParams};

pub struct MessageDao {
    pub base: BaseDao<Message>,
}

impl MessageDao {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self {
            base: BaseDao::new(store, Message::COLLECTION),
        }
    }

    pub async fn create(&self, message: &Message) -> DaoResult<Message> {
        self.base.insert_one(message).await
    }

    /// Newest-first page of a chat's history.
    pub async fn find_in_chat(
        &self,
        chat_id: ObjectId,
        params: &PaginationParams,
    ) -> DaoResult<PaginatedResult<Message>> {
        self.base
            .find_paginated(
                Query::new()
                    .filter(Filter::equal("chat_id", chat_id))
                    .order_desc("timestamp"),
                params,
            )
            .await
    }

    /// The most recent `limit` messages of a chat, oldest first.
    pub async fn recent(&self, chat_id: ObjectId, limit: u64) -> DaoResult<Vec<Message>> {
        let page = self
            .find_in_chat(
                chat_id,
                &PaginationParams {
                    page: 1,
                    per_page: limit,
                },
            )
            .await?;
        let mut items = page.items;
        items.reverse();
        Ok(items)
    }
}
