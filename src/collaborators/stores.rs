//! Key/value and document store collaborators
//!
//! Both stores hold caller-keyed JSON objects with no referential integrity
//! against the relational schema.

use std::collections::BTreeMap;
use std::sync::Mutex;

use anyhow::Context;
use serde_json::{Map, Value as JsonValue};

/// A JSON object
pub type Document = Map<String, JsonValue>;

/// Items addressed by an exact key (a subset of the item's attributes)
pub trait KeyValueStore: Send + Sync {
    fn put_item(&self, item: Document) -> anyhow::Result<()>;

    fn get_item(&self, key: &Document) -> anyhow::Result<Option<Document>>;

    /// Set `changes` on the item at `key`; `false` when there is none
    fn update_item(&self, key: &Document, changes: &Document) -> anyhow::Result<bool>;

    fn delete_item(&self, key: &Document) -> anyhow::Result<bool>;
}

/// Documents addressed by query: every field in the query must match
pub trait DocumentStore: Send + Sync {
    fn insert(&self, document: Document) -> anyhow::Result<()>;

    fn find_one(&self, query: &Document) -> anyhow::Result<Option<Document>>;

    /// Set `changes` on the first match; `false` when nothing matched
    fn update_one(&self, query: &Document, changes: &Document) -> anyhow::Result<bool>;

    fn delete_one(&self, query: &Document) -> anyhow::Result<bool>;
}

fn matches(document: &Document, query: &Document) -> bool {
    query.iter().all(|(k, v)| document.get(k) == Some(v))
}

fn merge(document: &mut Document, changes: &Document) {
    for (k, v) in changes {
        document.insert(k.clone(), v.clone());
    }
}

fn lock<T>(mutex: &Mutex<T>) -> anyhow::Result<std::sync::MutexGuard<'_, T>> {
    mutex.lock().map_err(|_| anyhow::anyhow!("store lock poisoned"))
}

/// Key/value store held in memory, keyed by a fixed set of attributes
#[derive(Debug)]
pub struct MemoryKeyValueStore {
    key_attributes: Vec<String>,
    items: Mutex<BTreeMap<String, Document>>,
}

impl MemoryKeyValueStore {
    pub fn new<S: AsRef<str>>(key_attributes: &[S]) -> Self {
        Self {
            key_attributes: key_attributes.iter().map(|k| k.as_ref().to_string()).collect(),
            items: Mutex::new(BTreeMap::new()),
        }
    }

    /// Canonical form of the key attributes of `source`
    fn key_of(&self, source: &Document) -> anyhow::Result<String> {
        let mut key = Document::new();
        for attr in &self.key_attributes {
            let value = source
                .get(attr)
                .with_context(|| format!("missing key attribute '{}'", attr))?;
            key.insert(attr.clone(), value.clone());
        }
        Ok(serde_json::to_string(&key)?)
    }

    pub fn len(&self) -> usize {
        self.items.lock().map(|items| items.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl KeyValueStore for MemoryKeyValueStore {
    fn put_item(&self, item: Document) -> anyhow::Result<()> {
        let key = self.key_of(&item)?;
        lock(&self.items)?.insert(key, item);
        Ok(())
    }

    fn get_item(&self, key: &Document) -> anyhow::Result<Option<Document>> {
        let key = self.key_of(key)?;
        Ok(lock(&self.items)?.get(&key).cloned())
    }

    fn update_item(&self, key: &Document, changes: &Document) -> anyhow::Result<bool> {
        if self.key_attributes.iter().any(|attr| changes.contains_key(attr)) {
            anyhow::bail!("key attributes cannot be updated");
        }
        let key = self.key_of(key)?;
        match lock(&self.items)?.get_mut(&key) {
            Some(item) => {
                merge(item, changes);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn delete_item(&self, key: &Document) -> anyhow::Result<bool> {
        let key = self.key_of(key)?;
        Ok(lock(&self.items)?.remove(&key).is_some())
    }
}

/// Document store held in memory, in insertion order
#[derive(Debug, Default)]
pub struct MemoryDocumentStore {
    documents: Mutex<Vec<Document>>,
}

impl MemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl DocumentStore for MemoryDocumentStore {
    fn insert(&self, document: Document) -> anyhow::Result<()> {
        lock(&self.documents)?.push(document);
        Ok(())
    }

    fn find_one(&self, query: &Document) -> anyhow::Result<Option<Document>> {
        Ok(lock(&self.documents)?.iter().find(|d| matches(d, query)).cloned())
    }

    fn update_one(&self, query: &Document, changes: &Document) -> anyhow::Result<bool> {
        let mut documents = lock(&self.documents)?;
        match documents.iter_mut().find(|d| matches(d, query)) {
            Some(document) => {
                merge(document, changes);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn delete_one(&self, query: &Document) -> anyhow::Result<bool> {
        let mut documents = lock(&self.documents)?;
        match documents.iter().position(|d| matches(d, query)) {
            Some(idx) => {
                documents.remove(idx);
                Ok(true)
            }
            None => Ok(false),
        }
    }
}
