//! Search index collaborator

use std::fmt;

use serde::Serialize;
use serde_json::{json, Value as JsonValue};

use crate::schema::Entity;

/// Where a document lives in the search index: entity table plus row id
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct DocumentKey {
    pub index: String,
    pub id: String,
}

impl DocumentKey {
    pub fn new(index: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            index: index.into(),
            id: id.into(),
        }
    }

    /// Key for a stored entity; `None` until the row has an id
    pub fn for_entity<E: Entity>(entity: &E) -> Option<Self> {
        entity.id().map(|id| Self::new(E::def().table, id.to_string()))
    }
}

impl fmt::Display for DocumentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.index, self.id)
    }
}

/// "More like this" similarity query
#[derive(Debug, Clone, PartialEq)]
pub struct MoreLikeThis {
    pub fields: Vec<String>,
    pub like: String,
    pub min_term_freq: u32,
    pub max_query_terms: u32,
}

impl MoreLikeThis {
    pub fn new<S: AsRef<str>>(like: impl Into<String>, fields: &[S]) -> Self {
        Self {
            fields: fields.iter().map(|f| f.as_ref().to_string()).collect(),
            like: like.into(),
            min_term_freq: 1,
            max_query_terms: 25,
        }
    }

    pub fn min_term_freq(mut self, n: u32) -> Self {
        self.min_term_freq = n;
        self
    }

    pub fn max_query_terms(mut self, n: u32) -> Self {
        self.max_query_terms = n;
        self
    }

    /// Request body for the index's search endpoint
    pub fn to_query(&self) -> JsonValue {
        json!({
            "query": {
                "more_like_this": {
                    "fields": self.fields,
                    "like": self.like,
                    "min_term_freq": self.min_term_freq,
                    "max_query_terms": self.max_query_terms,
                }
            }
        })
    }
}

/// Query body with the default term limits
pub fn more_like_this_query<S: AsRef<str>>(like: &str, fields: &[S]) -> JsonValue {
    MoreLikeThis::new(like, fields).to_query()
}

/// A full-text index of JSON documents.
///
/// The index has no referential link to the relational tables; callers keep
/// it in step themselves.
pub trait SearchIndexer: Send + Sync {
    fn index_exists(&self, index: &str) -> anyhow::Result<bool>;

    fn create_index(&self, index: &str, settings: Option<&JsonValue>) -> anyhow::Result<()>;

    fn put(&self, key: &DocumentKey, document: &JsonValue) -> anyhow::Result<()>;

    fn get(&self, key: &DocumentKey) -> anyhow::Result<Option<JsonValue>>;

    /// Merge `partial` into an existing document; `false` when absent
    fn update(&self, key: &DocumentKey, partial: &JsonValue) -> anyhow::Result<bool>;

    fn delete(&self, key: &DocumentKey) -> anyhow::Result<bool>;

    /// Run a raw query body and return the raw response
    fn search(&self, index: &str, query: &JsonValue) -> anyhow::Result<JsonValue>;

    fn more_like_this(&self, index: &str, fields: &[&str], like: &str) -> anyhow::Result<JsonValue> {
        self.search(index, &more_like_this_query(like, fields))
    }

    /// Index an entity under its table name
    fn index_entity<E: Entity + Serialize>(&self, entity: &E) -> anyhow::Result<DocumentKey>
    where
        Self: Sized,
    {
        let key = DocumentKey::for_entity(entity)
            .ok_or_else(|| anyhow::anyhow!("cannot index an unsaved {}", E::def().name))?;
        self.put(&key, &serde_json::to_value(entity)?)?;
        tracing::debug!("Indexed {}", key);
        Ok(key)
    }
}
