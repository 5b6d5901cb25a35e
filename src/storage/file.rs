//! Directory-backed store: one JSON file per document.
//!
//! Layout is `<root>/<collection>/<id>.json`. Writes go to a temporary file
//! that is renamed into place, and all mutations are serialised through a
//! single async mutex so conditional writes are atomic within the process.

use async_trait::async_trait;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::sync::Mutex;

use super::{validate_id, Document, DocumentFilter, Store};
use crate::types::{StoreError, StoreResult};

#[derive(Debug, Serialize, Deserialize)]
struct StoredFile {
    revision: u64,
    body: Value,
}

pub struct JsonFileStore {
    root: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonFileStore {
    /// Open (and create if needed) a store rooted at `root`
    pub async fn open<P: AsRef<Path>>(root: P) -> StoreResult<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root).await?;
        debug!("Opened JSON file store at {}", root.display());
        Ok(Self {
            root,
            write_lock: Mutex::new(()),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn doc_path(&self, collection: &str, id: &str) -> PathBuf {
        self.root.join(collection).join(format!("{}.json", id))
    }

    async fn read_file(&self, collection: &str, id: &str) -> StoreResult<Option<StoredFile>> {
        validate_id(collection, id)?;
        let path = self.doc_path(collection, id);
        let raw = match fs::read(&path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        serde_json::from_slice(&raw)
            .map(Some)
            .map_err(|e| StoreError::Corrupt {
                collection: collection.to_string(),
                id: id.to_string(),
                reason: e.to_string(),
            })
    }

    async fn write_file(&self, collection: &str, id: &str, file: &StoredFile) -> StoreResult<()> {
        let dir = self.root.join(collection);
        fs::create_dir_all(&dir).await?;

        let path = self.doc_path(collection, id);
        let tmp = dir.join(format!(".{}.json.tmp", id));
        let bytes = serde_json::to_vec_pretty(file)?;
        fs::write(&tmp, bytes).await?;
        fs::rename(&tmp, &path).await?;
        Ok(())
    }

    async fn remove_file(&self, collection: &str, id: &str) -> StoreResult<bool> {
        match fs::remove_file(self.doc_path(collection, id)).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl Store for JsonFileStore {
    async fn put(&self, collection: &str, id: &str, body: Value) -> StoreResult<u64> {
        let _guard = self.write_lock.lock().await;
        let revision = self
            .read_file(collection, id)
            .await?
            .map(|f| f.revision + 1)
            .unwrap_or(1);
        self.write_file(collection, id, &StoredFile { revision, body }).await?;
        Ok(revision)
    }

    async fn get(&self, collection: &str, id: &str) -> StoreResult<Option<Document>> {
        Ok(self.read_file(collection, id).await?.map(|f| Document {
            id: id.to_string(),
            revision: f.revision,
            body: f.body,
        }))
    }

    async fn delete(&self, collection: &str, id: &str) -> StoreResult<bool> {
        validate_id(collection, id)?;
        let _guard = self.write_lock.lock().await;
        self.remove_file(collection, id).await
    }

    async fn scan(&self, collection: &str, predicate: DocumentFilter<'_>) -> StoreResult<Vec<Document>> {
        let dir = self.root.join(collection);
        let mut entries = match fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut ids = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                warn!("Skipping non UTF-8 file in store collection '{}'", collection);
                continue;
            };
            if name.starts_with('.') {
                continue;
            }
            if let Some(id) = name.strip_suffix(".json") {
                ids.push(id.to_string());
            }
        }
        ids.sort();

        let mut docs = Vec::with_capacity(ids.len());
        for id in ids {
            // A concurrent delete between listing and reading is fine
            match self.get(collection, &id).await {
                Ok(Some(doc)) => {
                    if predicate(&doc) {
                        docs.push(doc);
                    }
                }
                Ok(None) => {}
                Err(StoreError::Corrupt { reason, .. }) => {
                    warn!("Skipping unreadable document {}/{}: {}", collection, id, reason);
                }
                Err(e) => return Err(e),
            }
        }
        Ok(docs)
    }

    async fn put_if_revision(
        &self,
        collection: &str,
        id: &str,
        expected: u64,
        body: Value,
    ) -> StoreResult<Option<u64>> {
        let _guard = self.write_lock.lock().await;
        match self.read_file(collection, id).await? {
            Some(current) if current.revision == expected => {
                let revision = expected + 1;
                self.write_file(collection, id, &StoredFile { revision, body }).await?;
                Ok(Some(revision))
            }
            _ => Ok(None),
        }
    }

    async fn delete_if_revision(&self, collection: &str, id: &str, expected: u64) -> StoreResult<bool> {
        let _guard = self.write_lock.lock().await;
        match self.read_file(collection, id).await? {
            Some(current) if current.revision == expected => self.remove_file(collection, id).await,
            _ => Ok(false),
        }
    }
}
