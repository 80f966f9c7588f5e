use async_trait::async_trait;
use bson::{oid::ObjectId, Document};
use dashmap::DashMap;
use futures::StreamExt;
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tracing::{debug, warn};

use super::{
    ChangeEvent, ChangeKind, ChangeStream, DocumentStore, Page, Query, StoreError, StoreResult,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreOp {
    Create,
    Get,
    Update,
    Delete,
    List,
}

/// In-process document store with a broadcast change bus per collection.
///
/// Documents keep insertion order, which is also the tie-break order for
/// sorted listings.
pub struct MemoryStore {
    collections: DashMap<String, Vec<Document>>,
    channels: DashMap<String, broadcast::Sender<ChangeEvent>>,
    faults: Mutex<Vec<(String, StoreOp)>>,
    event_buffer: usize,
}

impl MemoryStore {
    pub fn new(event_buffer: usize) -> Self {
        Self {
            collections: DashMap::new(),
            channels: DashMap::new(),
            faults: Mutex::new(Vec::new()),
            event_buffer: event_buffer.max(1),
        }
    }

    /// Makes the next `op` against `collection` fail as if the store were
    /// unreachable.
    pub fn fail_next(&self, collection: &str, op: StoreOp) {
        self.faults.lock().push((collection.to_string(), op));
    }

    pub fn len(&self, collection: &str) -> usize {
        self.collections.get(collection).map(|docs| docs.len()).unwrap_or(0)
    }

    pub fn is_empty(&self, collection: &str) -> bool {
        self.len(collection) == 0
    }

    fn take_fault(&self, collection: &str, op: StoreOp) -> StoreResult<()> {
        let mut faults = self.faults.lock();
        if let Some(pos) = faults.iter().position(|(c, o)| c == collection && *o == op) {
            faults.remove(pos);
            warn!(collection, ?op, "Injected store failure");
            return Err(StoreError::Unavailable(format!(
                "injected {op:?} failure on {collection}"
            )));
        }
        Ok(())
    }

    fn sender(&self, collection: &str) -> broadcast::Sender<ChangeEvent> {
        self.channels
            .entry(collection.to_string())
            .or_insert_with(|| broadcast::channel(self.event_buffer).0)
            .clone()
    }

    /// Deletes publish no payload, as MongoDB change streams do.
    fn publish(&self, collection: &str, kind: ChangeKind, id: ObjectId, payload: Option<Document>) {
        let event = ChangeEvent {
            kind,
            collection: collection.to_string(),
            id,
            payload,
        };
        // No receivers is fine: nobody is listening yet.
        let receivers = self.sender(collection).send(event).unwrap_or(0);
        debug!(collection, ?kind, %id, receivers, "Published change");
    }

    fn not_found(collection: &str, id: ObjectId) -> StoreError {
        StoreError::NotFound {
            collection: collection.to_string(),
            id,
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new(256)
    }
}

fn id_of(document: &Document) -> Option<ObjectId> {
    document.get_object_id("_id").ok()
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn create_document(
        &self,
        collection: &str,
        id: ObjectId,
        fields: Document,
    ) -> StoreResult<Document> {
        self.take_fault(collection, StoreOp::Create)?;

        let mut document = fields;
        document.insert("_id", id);

        {
            let mut docs = self.collections.entry(collection.to_string()).or_default();
            if docs.iter().any(|d| id_of(d) == Some(id)) {
                return Err(StoreError::Conflict {
                    collection: collection.to_string(),
                    id,
                });
            }
            docs.push(document.clone());
        }

        self.publish(collection, ChangeKind::Create, id, Some(document.clone()));
        Ok(document)
    }

    async fn get_document(&self, collection: &str, id: ObjectId) -> StoreResult<Document> {
        self.take_fault(collection, StoreOp::Get)?;

        self.collections
            .get(collection)
            .and_then(|docs| docs.iter().find(|d| id_of(d) == Some(id)).cloned())
            .ok_or_else(|| Self::not_found(collection, id))
    }

    async fn update_document(
        &self,
        collection: &str,
        id: ObjectId,
        fields: Document,
    ) -> StoreResult<Document> {
        self.take_fault(collection, StoreOp::Update)?;

        let updated = {
            let mut docs = self
                .collections
                .get_mut(collection)
                .ok_or_else(|| Self::not_found(collection, id))?;
            let document = docs
                .iter_mut()
                .find(|d| id_of(d) == Some(id))
                .ok_or_else(|| Self::not_found(collection, id))?;
            for (key, value) in fields {
                if key != "_id" {
                    document.insert(key, value);
                }
            }
            document.clone()
        };

        self.publish(collection, ChangeKind::Update, id, Some(updated.clone()));
        Ok(updated)
    }

    async fn delete_document(&self, collection: &str, id: ObjectId) -> StoreResult<()> {
        self.take_fault(collection, StoreOp::Delete)?;

        {
            let mut docs = self
                .collections
                .get_mut(collection)
                .ok_or_else(|| Self::not_found(collection, id))?;
            let pos = docs
                .iter()
                .position(|d| id_of(d) == Some(id))
                .ok_or_else(|| Self::not_found(collection, id))?;
            docs.remove(pos);
        }

        self.publish(collection, ChangeKind::Delete, id, None);
        Ok(())
    }

    async fn list_documents(&self, collection: &str, query: &Query) -> StoreResult<Page> {
        self.take_fault(collection, StoreOp::List)?;

        let mut matching: Vec<Document> = self
            .collections
            .get(collection)
            .map(|docs| docs.iter().filter(|d| query.matches(d)).cloned().collect())
            .unwrap_or_default();

        query.sort_documents(&mut matching);
        let total = matching.len() as u64;

        let skip = usize::try_from(query.offset).unwrap_or(usize::MAX);
        let take = query
            .limit
            .and_then(|l| usize::try_from(l).ok())
            .unwrap_or(usize::MAX);
        let documents = matching.into_iter().skip(skip).take(take).collect();

        Ok(Page { documents, total })
    }

    async fn subscribe(&self, collection: &str) -> StoreResult<ChangeStream> {
        let receiver = self.sender(collection).subscribe();
        debug!(collection, "Subscribed to in-memory change bus");

        let stream = futures::stream::unfold(receiver, |mut receiver| async move {
            match receiver.recv().await {
                Ok(event) => Some((Ok(event), receiver)),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    Some((Err(StoreError::Lagged(skipped)), receiver))
                }
                Err(broadcast::error::RecvError::Closed) => None,
            }
        });

        Ok(stream.boxed())
    }
}
