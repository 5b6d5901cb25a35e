//! Durable document storage used by the scheduler and the pattern set.
//!
//! Documents are JSON values grouped in collections and addressed by id.
//! Every write bumps a per-document revision so callers can do optimistic
//! read-modify-write (`put_if_revision` / `delete_if_revision`).

pub mod file;
pub mod memory;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::types::{StoreError, StoreResult};

pub use file::JsonFileStore;
pub use memory::MemoryStore;

/// A stored document together with its revision
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub id: String,
    pub revision: u64,
    pub body: Value,
}

pub type DocumentFilter<'a> = &'a (dyn Fn(&Document) -> bool + Send + Sync);

#[async_trait]
pub trait Store: Send + Sync {
    /// Insert or overwrite, returning the new revision
    async fn put(&self, collection: &str, id: &str, body: Value) -> StoreResult<u64>;

    async fn get(&self, collection: &str, id: &str) -> StoreResult<Option<Document>>;

    /// Returns whether a document was removed
    async fn delete(&self, collection: &str, id: &str) -> StoreResult<bool>;

    /// All documents of a collection accepted by `predicate`, ordered by id
    async fn scan(&self, collection: &str, predicate: DocumentFilter<'_>) -> StoreResult<Vec<Document>>;

    /// Overwrite only if the stored revision still equals `expected`
    async fn put_if_revision(
        &self,
        collection: &str,
        id: &str,
        expected: u64,
        body: Value,
    ) -> StoreResult<Option<u64>>;

    /// Delete only if the stored revision still equals `expected`
    async fn delete_if_revision(&self, collection: &str, id: &str, expected: u64) -> StoreResult<bool>;

    async fn scan_all(&self, collection: &str) -> StoreResult<Vec<Document>> {
        self.scan(collection, &|_| true).await
    }
}

pub fn encode<T: Serialize>(value: &T) -> StoreResult<Value> {
    Ok(serde_json::to_value(value)?)
}

/// Decode a document into a typed entity, flagging malformed documents as corrupt
pub fn decode<T: DeserializeOwned>(collection: &str, doc: &Document) -> StoreResult<T> {
    serde_json::from_value(doc.body.clone()).map_err(|e| StoreError::Corrupt {
        collection: collection.to_string(),
        id: doc.id.clone(),
        reason: e.to_string(),
    })
}

pub(crate) fn validate_id(collection: &str, id: &str) -> StoreResult<()> {
    let valid = !id.is_empty()
        && !collection.is_empty()
        && id != "."
        && id != ".."
        && id
            .chars()
            .chain(collection.chars())
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | ':'));
    if valid {
        Ok(())
    } else {
        Err(StoreError::Corrupt {
            collection: collection.to_string(),
            id: id.to_string(),
            reason: "invalid collection or document id".to_string(),
        })
    }
}
