//! In-memory store, used by tests and hosts that don't need durability.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::RwLock;

use super::{validate_id, Document, DocumentFilter, Store};
use crate::types::{StoreError, StoreResult};

type Collection = BTreeMap<String, (u64, Value)>;

#[derive(Debug, Default)]
pub struct MemoryStore {
    collections: RwLock<HashMap<String, Collection>>,
    unavailable: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate an outage: every call fails with `StoreError::Unavailable`
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub async fn len(&self, collection: &str) -> usize {
        self.collections
            .read()
            .await
            .get(collection)
            .map(|c| c.len())
            .unwrap_or(0)
    }

    fn check_available(&self) -> StoreResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            Err(StoreError::Unavailable("memory store marked unavailable".to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn put(&self, collection: &str, id: &str, body: Value) -> StoreResult<u64> {
        self.check_available()?;
        validate_id(collection, id)?;
        let mut collections = self.collections.write().await;
        let docs = collections.entry(collection.to_string()).or_default();
        let revision = docs.get(id).map(|(rev, _)| rev + 1).unwrap_or(1);
        docs.insert(id.to_string(), (revision, body));
        Ok(revision)
    }

    async fn get(&self, collection: &str, id: &str) -> StoreResult<Option<Document>> {
        self.check_available()?;
        let collections = self.collections.read().await;
        Ok(collections
            .get(collection)
            .and_then(|docs| docs.get(id))
            .map(|(revision, body)| Document {
                id: id.to_string(),
                revision: *revision,
                body: body.clone(),
            }))
    }

    async fn delete(&self, collection: &str, id: &str) -> StoreResult<bool> {
        self.check_available()?;
        let mut collections = self.collections.write().await;
        Ok(collections
            .get_mut(collection)
            .map(|docs| docs.remove(id).is_some())
            .unwrap_or(false))
    }

    async fn scan(&self, collection: &str, predicate: DocumentFilter<'_>) -> StoreResult<Vec<Document>> {
        self.check_available()?;
        let collections = self.collections.read().await;
        let Some(docs) = collections.get(collection) else {
            return Ok(Vec::new());
        };

        Ok(docs
            .iter()
            .map(|(id, (revision, body))| Document {
                id: id.clone(),
                revision: *revision,
                body: body.clone(),
            })
            .filter(|doc| predicate(doc))
            .collect())
    }

    async fn put_if_revision(
        &self,
        collection: &str,
        id: &str,
        expected: u64,
        body: Value,
    ) -> StoreResult<Option<u64>> {
        self.check_available()?;
        let mut collections = self.collections.write().await;
        let Some(entry) = collections.get_mut(collection).and_then(|docs| docs.get_mut(id)) else {
            return Ok(None);
        };
        if entry.0 != expected {
            return Ok(None);
        }
        entry.0 += 1;
        entry.1 = body;
        Ok(Some(entry.0))
    }

    async fn delete_if_revision(&self, collection: &str, id: &str, expected: u64) -> StoreResult<bool> {
        self.check_available()?;
        let mut collections = self.collections.write().await;
        let Some(docs) = collections.get_mut(collection) else {
            return Ok(false);
        };
        match docs.get(id) {
            Some((revision, _)) if *revision == expected => {
                docs.remove(id);
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}
