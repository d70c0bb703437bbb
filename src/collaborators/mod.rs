//! Interfaces to the services that sit next to the relational core
//!
//! - [`search`]: full-text index of entity documents
//! - [`stores`]: key/value and document stores over caller-supplied keys
//! - [`listener`]: channel subscription that forwards JSON payloads
//!
//! Each trait is a thin surface over one external call per operation. The
//! in-memory implementations back tests and local runs.

pub mod listener;
pub mod search;
pub mod stores;

pub use listener::{ChannelListener, ChannelSubscription, ListenerStats, Message, PayloadHandler, Publisher, Subscription};
pub use search::{more_like_this_query, DocumentKey, MoreLikeThis, SearchIndexer};
pub use stores::{Document, DocumentStore, KeyValueStore, MemoryDocumentStore, MemoryKeyValueStore};
