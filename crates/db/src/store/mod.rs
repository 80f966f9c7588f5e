//! Document store contract shared by the MongoDB backend and the in-process
//! backend used for tests and offline sessions.
//!
//! The store is the only source of truth. Writes are field-level and
//! last-writer-wins; nothing here offers multi-document transactions.

pub mod memory;
pub mod mongo;
mod query;

use async_trait::async_trait;
use bson::{oid::ObjectId, Document};
use futures::stream::BoxStream;
use serde::de::DeserializeOwned;
use thiserror::Error;

pub use query::{Filter, Query, SortOrder};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("MongoDB error: {0}")]
    Mongo(#[from] mongodb::error::Error),
    #[error("BSON serialization error: {0}")]
    BsonSer(#[from] bson::ser::Error),
    #[error("BSON deserialization error: {0}")]
    BsonDe(#[from] bson::de::Error),
    #[error("{collection}/{id} already exists")]
    Conflict { collection: String, id: ObjectId },
    #[error("{collection}/{id} not found")]
    NotFound { collection: String, id: ObjectId },
    #[error("Store unavailable: {0}")]
    Unavailable(String),
    #[error("Change stream lagged, {0} events dropped")]
    Lagged(u64),
}

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Create,
    Update,
    Delete,
}

/// One realtime notification. `payload` is the document after the change;
/// delete events may not carry one.
#[derive(Debug, Clone)]
pub struct ChangeEvent {
    pub kind: ChangeKind,
    pub collection: String,
    pub id: ObjectId,
    pub payload: Option<Document>,
}

impl ChangeEvent {
    pub fn decode<T: DeserializeOwned>(&self) -> StoreResult<Option<T>> {
        match &self.payload {
            Some(doc) => Ok(Some(bson::from_document(doc.clone())?)),
            None => Ok(None),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Page {
    pub documents: Vec<Document>,
    /// Matches before `limit`/`offset` were applied.
    pub total: u64,
}

/// Dropping the stream ends the subscription.
pub type ChangeStream = BoxStream<'static, StoreResult<ChangeEvent>>;

#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Fails with [`StoreError::Conflict`] when `id` is taken.
    async fn create_document(
        &self,
        collection: &str,
        id: ObjectId,
        fields: Document,
    ) -> StoreResult<Document>;

    async fn get_document(&self, collection: &str, id: ObjectId) -> StoreResult<Document>;

    /// Sets the given fields and returns the updated document.
    async fn update_document(
        &self,
        collection: &str,
        id: ObjectId,
        fields: Document,
    ) -> StoreResult<Document>;

    async fn delete_document(&self, collection: &str, id: ObjectId) -> StoreResult<()>;

    async fn list_documents(&self, collection: &str, query: &Query) -> StoreResult<Page>;

    async fn subscribe(&self, collection: &str) -> StoreResult<ChangeStream>;
}
