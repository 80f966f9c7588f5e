use std::{marker::PhantomData, sync::Arc};

use bson::{oid::ObjectId, Document};
use huddle_db::store::{DocumentStore, Query, StoreError};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum DaoError {
    #[error("Store error: {0}")]
    Store(StoreError),
    #[error("BSON serialization error: {0}")]
    BsonSer(#[from] bson::ser::Error),
    #[error("BSON deserialization error: {0}")]
    BsonDe(#[from] bson::de::Error),
    #[error("Entity not found")]
    NotFound,
    #[error("Duplicate key: {0}")]
    DuplicateKey(String),
    #[error("Validation: {0}")]
    Validation(String),
}

impl From<StoreError> for DaoError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound { .. } => DaoError::NotFound,
            StoreError::Conflict { .. } => DaoError::DuplicateKey(err.to_string()),
            StoreError::BsonSer(e) => DaoError::BsonSer(e),
            StoreError::BsonDe(e) => DaoError::BsonDe(e),
            other => DaoError::Store(other),
        }
    }
}

pub type DaoResult<T> = Result<T, DaoError>;

/// One-based page request.
#[derive(Debug, Clone, Copy)]
pub struct PaginationParams {
    pub page: u64,
    pub per_page: u64,
}

#[derive(Debug, Clone)]
pub struct PaginatedResult<T> {
    pub items: Vec<T>,
    pub total: u64,
    pub page: u64,
    pub per_page: u64,
    pub total_pages: u64,
}

/// Typed access to one collection of a [`DocumentStore`].
pub struct BaseDao<T> {
    store: Arc<dyn DocumentStore>,
    collection: &'static str,
    _marker: PhantomData<fn() -> T>,
}

impl<T> BaseDao<T>
where
    T: Serialize + for<'de> Deserialize<'de> + Send + Sync,
{
    pub fn new(store: Arc<dyn DocumentStore>, collection: &'static str) -> Self {
        Self {
            store,
            collection,
            _marker: PhantomData,
        }
    }

    pub async fn find_by_id(&self, id: ObjectId) -> DaoResult<T> {
        let document = self.store.get_document(self.collection, id).await?;
        Ok(bson::from_document(document)?)
    }

    /// Like [`find_by_id`](Self::find_by_id) but maps a missing document to `None`.
    pub async fn find_optional(&self, id: ObjectId) -> DaoResult<Option<T>> {
        match self.find_by_id(id).await {
            Ok(entity) => Ok(Some(entity)),
            Err(DaoError::NotFound) => Ok(None),
            Err(e) => Err(e),
        }
    }

    pub async fn find_one(&self, query: Query) -> DaoResult<Option<T>> {
        let page = self
            .store
            .list_documents(self.collection, &query.limit(1))
            .await?;
        match page.documents.into_iter().next() {
            Some(document) => Ok(Some(bson::from_document(document)?)),
            None => Ok(None),
        }
    }

    pub async fn find_many(&self, query: Query) -> DaoResult<Vec<T>> {
        let page = self.store.list_documents(self.collection, &query).await?;
        page.documents
            .into_iter()
            .map(|document| bson::from_document(document).map_err(DaoError::from))
            .collect()
    }

    pub async fn find_paginated(
        &self,
        query: Query,
        params: &PaginationParams,
    ) -> DaoResult<PaginatedResult<T>> {
        let per_page = params.per_page.max(1);
        let skip = params.page.saturating_sub(1) * per_page;

        let page = self
            .store
            .list_documents(self.collection, &query.offset(skip).limit(per_page))
            .await?;

        let items = page
            .documents
            .into_iter()
            .map(|document| bson::from_document(document).map_err(DaoError::from))
            .collect::<DaoResult<Vec<T>>>()?;

        let total_pages = page.total.div_ceil(per_page);

        Ok(PaginatedResult {
            items,
            total: page.total,
            page: params.page,
            per_page,
            total_pages,
        })
    }

    /// Inserts under the entity's own `_id` and returns what the store holds.
    pub async fn insert_one(&self, entity: &T) -> DaoResult<T> {
        let document = bson::to_document(entity)?;
        let id = document
            .get_object_id("_id")
            .map_err(|_| DaoError::Validation(format!("{} entity without _id", self.collection)))?;

        let stored = self
            .store
            .create_document(self.collection, id, document)
            .await?;
        debug!(collection = self.collection, %id, "Inserted document");
        Ok(bson::from_document(stored)?)
    }

    pub async fn update_by_id(&self, id: ObjectId, fields: Document) -> DaoResult<T> {
        let updated = self
            .store
            .update_document(self.collection, id, fields)
            .await?;
        Ok(bson::from_document(updated)?)
    }

    pub async fn hard_delete(&self, id: ObjectId) -> DaoResult<()> {
        self.store.delete_document(self.collection, id).await?;
        debug!(collection = self.collection, %id, "Deleted document");
        Ok(())
    }
}
