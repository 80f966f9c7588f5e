use std::sync::Arc;

use bson::{doc, oid::ObjectId, Bson, DateTime};
use huddle_db::models::{Presence, User};
use huddle_db::store::{DocumentStore, Filter, Query};

use super::base::{BaseDao, DaoResult};

pub struct UserDao {
    pub base: BaseDao<User>,
}

impl UserDao {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self {
            base: BaseDao::new(store, User::COLLECTION),
        }
    }

    pub async fn create(&self, display_name: String, handle: String) -> DaoResult<User> {
        let user = User {
            id: ObjectId::new(),
            display_name,
            handle,
            avatar: None,
            is_online: false,
            status: None,
            last_seen: None,
            team_id: None,
            blocked_user_ids: Vec::new(),
        };

        self.base.insert_one(&user).await
    }

    pub async fn find_by_id(&self, id: ObjectId) -> DaoResult<User> {
        self.base.find_by_id(id).await
    }

    /// Users with the given ids, in no particular order. Missing ids are skipped.
    pub async fn find_many_by_ids(&self, ids: &[ObjectId]) -> DaoResult<Vec<User>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        self.base
            .find_many(Query::new().filter(Filter::is_in("_id", ids.iter().copied())))
            .await
    }

    pub async fn set_team(&self, user_id: ObjectId, team_id: Option<ObjectId>) -> DaoResult<User> {
        let team = team_id.map(Bson::ObjectId).unwrap_or(Bson::Null);
        self.base
            .update_by_id(user_id, doc! { "team_id": team })
            .await
    }

    pub async fn set_online(&self, user_id: ObjectId, is_online: bool) -> DaoResult<User> {
        self.base
            .update_by_id(user_id, doc! { "is_online": is_online })
            .await
    }

    pub async fn touch_last_seen(&self, user_id: ObjectId) -> DaoResult<User> {
        self.base
            .update_by_id(
                user_id,
                doc! {
                    "is_online": true,
                    "last_seen": DateTime::now(),
                },
            )
            .await
    }

    pub async fn update_presence(&self, user_id: ObjectId, presence: &Presence) -> DaoResult<User> {
        let status = presence.status.clone().map(Bson::String).unwrap_or(Bson::Null);
        let last_seen = presence.last_seen.map(Bson::DateTime).unwrap_or(Bson::Null);
        self.base
            .update_by_id(
                user_id,
                doc! {
                    "is_online": presence.is_online,
                    "status": status,
                    "last_seen": last_seen,
                },
            )
            .await
    }

    pub async fn set_blocked(&self, user_id: ObjectId, blocked: &[ObjectId]) -> DaoResult<User> {
        let blocked: Vec<Bson> = blocked.iter().copied().map(Bson::ObjectId).collect();
        self.base
            .update_by_id(user_id, doc! { "blocked_user_ids": blocked })
            .await
    }
}
