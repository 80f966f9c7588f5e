use std::sync::Arc;

use bson::{doc, oid::ObjectId, Bson, DateTime};
use huddle_db::models::Team;
use huddle_db::store::{DocumentStore, Filter, Query};

use super::base::{BaseDao, DaoResult};

pub struct TeamDao {
    pub base: BaseDao<Team>,
}

impl TeamDao {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self {
            base: BaseDao::new(store, Team::COLLECTION),
        }
    }

    pub async fn create(&self, name: String, owner_id: ObjectId) -> DaoResult<Team> {
        let team = Team {
            id: ObjectId::new(),
            name,
            owner_id,
            admin_id: owner_id,
            members: vec![owner_id],
            created_at: DateTime::now(),
        };

        self.base.insert_one(&team).await
    }

    pub async fn find_optional(&self, id: ObjectId) -> DaoResult<Option<Team>> {
        self.base.find_optional(id).await
    }

    /// Teams listing `user_id` as a member. More than one means a repair is due.
    pub async fn find_by_member(&self, user_id: ObjectId) -> DaoResult<Vec<Team>> {
        self.base
            .find_many(
                Query::new()
                    .filter(Filter::contains("members", user_id))
                    .order_asc("created_at"),
            )
            .await
    }

    pub async fn set_members(&self, id: ObjectId, members: &[ObjectId]) -> DaoResult<Team> {
        let members: Vec<Bson> = members.iter().copied().map(Bson::ObjectId).collect();
        self.base
            .update_by_id(id, doc! { "members": members })
            .await
    }

    /// Moves both ownership and adminship, as a leadership transfer does.
    pub async fn set_leader(&self, id: ObjectId, user_id: ObjectId) -> DaoResult<Team> {
        self.base
            .update_by_id(id, doc! { "owner_id": user_id, "admin_id": user_id })
            .await
    }

    pub async fn set_members_and_admin(
        &self,
        id: ObjectId,
        members: &[ObjectId],
        admin_id: ObjectId,
    ) -> DaoResult<Team> {
        let members: Vec<Bson> = members.iter().copied().map(Bson::ObjectId).collect();
        self.base
            .update_by_id(id, doc! { "members": members, "admin_id": admin_id })
            .await
    }

    pub async fn delete(&self, id: ObjectId) -> DaoResult<()> {
        self.base.hard_delete(id).await
    }
}
