use async_trait::async_trait;
use bson::{doc, oid::ObjectId, Document};
use futures::{StreamExt, TryStreamExt};
use huddle_config::DatabaseSettings;
use mongodb::{
    change_stream::event::{ChangeStreamEvent, OperationType},
    options::{FullDocumentType, ReturnDocument},
    Collection, Database,
};
use tracing::{debug, info};

use super::{
    ChangeEvent, ChangeKind, ChangeStream, DocumentStore, Page, Query, StoreError, StoreResult,
};

/// [`DocumentStore`] backed by MongoDB. Change streams serve as the realtime
/// bus, so the deployment must be a replica set.
pub struct MongoStore {
    db: Database,
}

impl MongoStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub async fn connect(settings: &DatabaseSettings) -> StoreResult<Self> {
        let db = crate::connect(settings).await?;
        crate::indexes::ensure_indexes(&db).await?;
        Ok(Self::new(db))
    }

    fn collection(&self, name: &str) -> Collection<Document> {
        self.db.collection::<Document>(name)
    }
}

fn classify_insert_error(e: mongodb::error::Error, collection: &str, id: ObjectId) -> StoreError {
    if let mongodb::error::ErrorKind::Write(mongodb::error::WriteFailure::WriteError(
        ref write_error,
    )) = *e.kind
    {
        if write_error.code == 11000 {
            return StoreError::Conflict {
                collection: collection.to_string(),
                id,
            };
        }
    }
    StoreError::Mongo(e)
}

fn change_from_mongo(collection: &str, event: ChangeStreamEvent<Document>) -> Option<ChangeEvent> {
    change_from_parts(
        collection,
        &event.operation_type,
        event.document_key.as_ref(),
        event.full_document,
    )
}

/// Collection-level operations (drop, rename, invalidate) carry no document
/// and are skipped.
fn change_from_parts(
    collection: &str,
    operation: &OperationType,
    document_key: Option<&Document>,
    full_document: Option<Document>,
) -> Option<ChangeEvent> {
    let kind = match operation {
        OperationType::Insert => ChangeKind::Create,
        OperationType::Update | OperationType::Replace => ChangeKind::Update,
        OperationType::Delete => ChangeKind::Delete,
        _ => return None,
    };
    let id = document_key.and_then(|key| key.get_object_id("_id").ok())?;

    Some(ChangeEvent {
        kind,
        collection: collection.to_string(),
        id,
        payload: full_document,
    })
}

#[async_trait]
impl DocumentStore for MongoStore {
    async fn create_document(
        &self,
        collection: &str,
        id: ObjectId,
        fields: Document,
    ) -> StoreResult<Document> {
        let mut document = fields;
        document.insert("_id", id);

        self.collection(collection)
            .insert_one(&document)
            .await
            .map_err(|e| classify_insert_error(e, collection, id))?;

        debug!(collection, %id, "Inserted document");
        Ok(document)
    }

    async fn get_document(&self, collection: &str, id: ObjectId) -> StoreResult<Document> {
        self.collection(collection)
            .find_one(doc! { "_id": id })
            .await?
            .ok_or_else(|| StoreError::NotFound {
                collection: collection.to_string(),
                id,
            })
    }

    async fn update_document(
        &self,
        collection: &str,
        id: ObjectId,
        fields: Document,
    ) -> StoreResult<Document> {
        self.collection(collection)
            .find_one_and_update(doc! { "_id": id }, doc! { "$set": fields })
            .return_document(ReturnDocument::After)
            .await?
            .ok_or_else(|| StoreError::NotFound {
                collection: collection.to_string(),
                id,
            })
    }

    async fn delete_document(&self, collection: &str, id: ObjectId) -> StoreResult<()> {
        let result = self
            .collection(collection)
            .delete_one(doc! { "_id": id })
            .await?;

        if result.deleted_count == 0 {
            return Err(StoreError::NotFound {
                collection: collection.to_string(),
                id,
            });
        }
        Ok(())
    }

    async fn list_documents(&self, collection: &str, query: &Query) -> StoreResult<Page> {
        let filter = query.filter_document();
        let total = self
            .collection(collection)
            .count_documents(filter.clone())
            .await?;
        if query.limit == Some(0) {
            return Ok(Page {
                documents: Vec::new(),
                total,
            });
        }

        let sort = query.sort_document().unwrap_or_else(|| doc! { "_id": 1 });
        // A limit of 0 means "no limit" to the server.
        let limit = query
            .limit
            .and_then(|l| i64::try_from(l).ok())
            .unwrap_or(0);

        let documents: Vec<Document> = self
            .collection(collection)
            .find(filter)
            .sort(sort)
            .skip(query.offset)
            .limit(limit)
            .await?
            .try_collect()
            .await?;

        Ok(Page { documents, total })
    }

    async fn subscribe(&self, collection: &str) -> StoreResult<ChangeStream> {
        let stream = self
            .collection(collection)
            .watch()
            .full_document(FullDocumentType::UpdateLookup)
            .await?;
        info!(collection, "Opened change stream");

        let collection = collection.to_string();
        let events = stream.filter_map(move |event| {
            let mapped = match event {
                Ok(event) => change_from_mongo(&collection, event).map(Ok),
                Err(e) => Some(Err(StoreError::Mongo(e))),
            };
            futures::future::ready(mapped)
        });

        Ok(events.boxed())
    }
}
