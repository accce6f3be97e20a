use std::{
    io::ErrorKind,
    path::{Path, PathBuf},
};

use anyhow::Context;

use marble_common::{Document, DocumentStore, MemoryDocumentStore, StoreError, StructuredQuery};

/// Newest documents kept per append-only `live` / `history` collection.
pub const DEFAULT_RETENTION: usize = 2_000;

const APPEND_ONLY_COLLECTIONS: [&str; 2] = ["live", "history"];

/// Document store kept in memory and flushed to a JSON file.
///
/// Writes only mark the store dirty; [`FileDocumentStore::take_snapshot`]
/// hands the serialized state to the caller, which writes it with
/// [`write_snapshot`] outside any lock.
#[derive(Debug)]
pub struct FileDocumentStore {
    inner: MemoryDocumentStore,
    path: PathBuf,
    retention: usize,
    dirty: bool,
}

impl FileDocumentStore {
    pub async fn open(path: impl Into<PathBuf>) -> anyhow::Result<Self> {
        let path = path.into();
        let inner = match tokio::fs::read(&path).await {
            Ok(raw) => serde_json::from_slice::<MemoryDocumentStore>(&raw)
                .with_context(|| format!("invalid document file {}", path.display()))?,
            Err(err) if err.kind() == ErrorKind::NotFound => MemoryDocumentStore::new(),
            Err(err) => {
                return Err(err).with_context(|| format!("failed to read {}", path.display()))
            }
        };
        Ok(Self {
            inner,
            path,
            retention: DEFAULT_RETENTION,
            dirty: false,
        })
    }

    pub fn with_retention(mut self, retention: usize) -> Self {
        self.retention = retention.max(1);
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Serialized store when it changed since the last snapshot. Clears the
    /// dirty flag; call [`FileDocumentStore::mark_dirty`] if the write fails.
    pub fn take_snapshot(&mut self) -> anyhow::Result<Option<Vec<u8>>> {
        if !self.is_dirty() {
            return Ok(None);
        }
        let payload = serde_json::to_vec(&self.inner).context("failed to encode documents")?;
        self.dirty = false;
        Ok(Some(payload))
    }

    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }
}

/// Writes `payload` next to `path` and renames it into place.
pub async fn write_snapshot(path: &Path, payload: Vec<u8>) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let staging = path.with_extension("json.tmp");
    tokio::fs::write(&staging, payload)
        .await
        .with_context(|| format!("failed to write {}", staging.display()))?;
    tokio::fs::rename(&staging, path)
        .await
        .with_context(|| format!("failed to replace {}", path.display()))?;
    Ok(())
}

impl DocumentStore for FileDocumentStore {
    fn get_document(&mut self, path: &str) -> Result<Option<Document>, StoreError> {
        self.inner.get_document(path)
    }

    fn patch_document(&mut self, path: &str, fields: Document, mask: &[&str]) -> Result<(), StoreError> {
        self.inner.patch_document(path, fields, mask)?;
        self.dirty = true;
        Ok(())
    }

    fn create_document(&mut self, collection: &str, fields: Document) -> Result<String, StoreError> {
        let path = self.inner.create_document(collection, fields)?;
        let leaf = collection.trim_end_matches('/').rsplit('/').next();
        if leaf.is_some_and(|leaf| APPEND_ONLY_COLLECTIONS.contains(&leaf)) {
            self.inner.retain_newest(collection, self.retention);
        }
        self.dirty = true;
        Ok(path)
    }

    fn run_query(&mut self, parent: &str, query: &StructuredQuery) -> Result<Vec<Document>, StoreError> {
        self.inner.run_query(parent, query)
    }
}
