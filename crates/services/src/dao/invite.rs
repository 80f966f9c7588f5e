use std::sync::Arc;

use bson::{doc, oid::ObjectId, DateTime};
use huddle_db::models::{Invite, InviteStatus};
use huddle_db::store::{DocumentStore, Filter, Query};

use super::base::{BaseDao, DaoResult};

pub struct InviteDao {
    pub base: BaseDao<Invite>,
}

impl InviteDao {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self {
            base: BaseDao::new(store, Invite::COLLECTION),
        }
    }

    pub async fn create(&self, sender_id: ObjectId, receiver_id: ObjectId) -> DaoResult<Invite> {
        let invite = Invite {
            id: ObjectId::new(),
            sender_id,
            receiver_id,
            status: InviteStatus::Pending,
            created_at: DateTime::now(),
        };

        self.base.insert_one(&invite).await
    }

    pub async fn find_by_id(&self, id: ObjectId) -> DaoResult<Invite> {
        self.base.find_by_id(id).await
    }

    pub async fn find_pending(
        &self,
        sender_id: ObjectId,
        receiver_id: ObjectId,
    ) -> DaoResult<Option<Invite>> {
        self.base
            .find_one(
                Query::new()
                    .filter(Filter::equal("sender_id", sender_id))
                    .filter(Filter::equal("receiver_id", receiver_id))
                    .filter(Filter::equal("status", InviteStatus::Pending.as_str())),
            )
            .await
    }

    pub async fn incoming_pending(&self, receiver_id: ObjectId) -> DaoResult<Vec<Invite>> {
        self.base
            .find_many(
                Query::new()
                    .filter(Filter::equal("receiver_id", receiver_id))
                    .filter(Filter::equal("status", InviteStatus::Pending.as_str()))
                    .order_desc("created_at"),
            )
            .await
    }

    pub async fn outgoing_pending(&self, sender_id: ObjectId) -> DaoResult<Vec<Invite>> {
        self.base
            .find_many(
                Query::new()
                    .filter(Filter::equal("sender_id", sender_id))
                    .filter(Filter::equal("status", InviteStatus::Pending.as_str()))
                    .order_desc("created_at"),
            )
            .await
    }

    pub async fn set_status(&self, id: ObjectId, status: InviteStatus) -> DaoResult<Invite> {
        self.base
            .update_by_id(id, doc! { "status": status.as_str() })
            .await
    }

    pub async fn delete(&self, id: ObjectId) -> DaoResult<()> {
        self.base.hard_delete(id).await
    }
}
