//! Port to the remote document database.
//!
//! Documents are flat JSON objects addressed by slash separated paths
//! (`collection/doc/collection/doc`). The machine only needs four calls:
//! fetch, masked patch, create-with-generated-id and a single-collection
//! structured query.

use std::{cmp::Ordering, collections::BTreeMap};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::StoreError;

pub type Document = Map<String, Value>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Direction {
    Ascending,
    Descending,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderBy {
    pub field: String,
    pub direction: Direction,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StructuredQuery {
    pub select: Vec<String>,
    pub collection_id: String,
    pub order_by: Option<OrderBy>,
    pub limit: Option<usize>,
}

impl StructuredQuery {
    /// Newest document of `collection_id` by its `time` field, projected to `fields`.
    pub fn latest(collection_id: &str, fields: &[&str]) -> Self {
        Self {
            select: fields.iter().map(|field| field.to_string()).collect(),
            collection_id: collection_id.to_string(),
            order_by: Some(OrderBy {
                field: "time".to_string(),
                direction: Direction::Descending,
            }),
            limit: Some(1),
        }
    }
}

pub trait DocumentStore {
    fn get_document(&mut self, path: &str) -> Result<Option<Document>, StoreError>;

    /// Writes only the fields named in `mask`; masked fields absent from
    /// `fields` are removed. An empty mask merges every field. Creates the
    /// document when it does not exist.
    fn patch_document(&mut self, path: &str, fields: Document, mask: &[&str]) -> Result<(), StoreError>;

    /// Adds a document with a generated id under `collection` and returns its path.
    fn create_document(&mut self, collection: &str, fields: Document) -> Result<String, StoreError>;

    /// Runs `query` over the direct children of `parent/<collection_id>`.
    fn run_query(&mut self, parent: &str, query: &StructuredQuery) -> Result<Vec<Document>, StoreError>;
}

pub fn normalize_path(path: &str) -> Result<String, StoreError> {
    let trimmed = path.trim_matches('/');
    if trimmed.is_empty() || trimmed.split('/').any(str::is_empty) {
        return Err(StoreError::InvalidPath(path.to_string()));
    }
    Ok(trimmed.to_string())
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MemoryDocumentStore {
    documents: BTreeMap<String, Document>,
    next_id: u64,
    #[serde(skip)]
    offline: bool,
}

impl MemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// While offline every call fails with [`StoreError::Unavailable`].
    pub fn set_offline(&mut self, offline: bool) {
        self.offline = offline;
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    /// Paths of every document directly under `collection`, in id order.
    pub fn list(&self, collection: &str) -> Vec<String> {
        let Ok(collection) = normalize_path(collection) else {
            return Vec::new();
        };
        self.documents
            .keys()
            .filter(|path| is_direct_child(path, &collection))
            .cloned()
            .collect()
    }

    /// Drops the oldest documents directly under `collection` until at most
    /// `keep` remain. Generated ids sort in creation order. Returns the number
    /// removed.
    pub fn retain_newest(&mut self, collection: &str, keep: usize) -> usize {
        let paths = self.list(collection);
        let excess = paths.len().saturating_sub(keep);
        for path in &paths[..excess] {
            self.documents.remove(path);
        }
        excess
    }

    fn ensure_online(&self) -> Result<(), StoreError> {
        if self.offline {
            return Err(StoreError::Unavailable("store offline".to_string()));
        }
        Ok(())
    }
}

impl DocumentStore for MemoryDocumentStore {
    fn get_document(&mut self, path: &str) -> Result<Option<Document>, StoreError> {
        self.ensure_online()?;
        let path = normalize_path(path)?;
        Ok(self.documents.get(&path).cloned())
    }

    fn patch_document(&mut self, path: &str, mut fields: Document, mask: &[&str]) -> Result<(), StoreError> {
        self.ensure_online()?;
        let path = normalize_path(path)?;
        let document = self.documents.entry(path).or_default();

        if mask.is_empty() {
            document.append(&mut fields);
            return Ok(());
        }

        for field in mask {
            match fields.remove(*field) {
                Some(value) => {
                    document.insert(field.to_string(), value);
                }
                None => {
                    document.remove(*field);
                }
            }
        }
        Ok(())
    }

    fn create_document(&mut self, collection: &str, fields: Document) -> Result<String, StoreError> {
        self.ensure_online()?;
        let collection = normalize_path(collection)?;
        self.next_id = self.next_id.saturating_add(1);
        let path = format!("{collection}/{:020}", self.next_id);
        self.documents.insert(path.clone(), fields);
        Ok(path)
    }

    fn run_query(&mut self, parent: &str, query: &StructuredQuery) -> Result<Vec<Document>, StoreError> {
        self.ensure_online()?;
        let collection = normalize_path(&format!("{parent}/{}", query.collection_id))?;

        let mut matched: Vec<&Document> = self
            .documents
            .iter()
            .filter(|(path, _)| is_direct_child(path, &collection))
            .map(|(_, document)| document)
            .collect();

        if let Some(order) = &query.order_by {
            matched.sort_by(|a, b| {
                let ordering = compare_fields(a.get(&order.field), b.get(&order.field));
                match order.direction {
                    Direction::Ascending => ordering,
                    Direction::Descending => ordering.reverse(),
                }
            });
        }

        let limit = query.limit.unwrap_or(usize::MAX);
        Ok(matched
            .into_iter()
            .take(limit)
            .map(|document| project(document, &query.select))
            .collect())
    }
}

fn is_direct_child(path: &str, collection: &str) -> bool {
    path.strip_prefix(collection)
        .and_then(|rest| rest.strip_prefix('/'))
        .map(|id| !id.is_empty() && !id.contains('/'))
        .unwrap_or(false)
}

fn project(document: &Document, select: &[String]) -> Document {
    if select.is_empty() {
        return document.clone();
    }
    select
        .iter()
        .filter_map(|field| document.get(field).map(|value| (field.clone(), value.clone())))
        .collect()
}

// Missing fields sort before present ones; numbers before strings.
fn compare_fields(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (Some(a), Some(b)) => match (a, b) {
            (Value::Number(x), Value::Number(y)) => {
                let x = x.as_f64().unwrap_or(f64::NAN);
                let y = y.as_f64().unwrap_or(f64::NAN);
                x.partial_cmp(&y).unwrap_or(Ordering::Equal)
            }
            (Value::String(x), Value::String(y)) => x.cmp(y),
            (Value::Number(_), _) => Ordering::Less,
            (_, Value::Number(_)) => Ordering::Greater,
            _ => Ordering::Equal,
        },
    }
}
