//! Document-store collaborator boundary.
//!
//! The framework core depends on a handful of verbs (`insert_one`, `find`,
//! `find_one`, `update_one`, `delete_one`, `delete_many`) plus cursor
//! iteration. Drivers plug in behind these traits; [`memory::MemoryStore`]
//! is the in-tree backend used by the test suite.

mod connections;
mod memory;

pub use connections::StoreConnections;
pub use memory::MemoryStore;

use crate::error::StoreError;
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// The record shape written to and read from the persistent store.
pub type Document = serde_json::Map<String, Value>;

/// Outcome of a single insert.
#[derive(Debug, Clone)]
pub struct InsertResult {
    pub inserted_count: u64,
    pub inserted_id: Value,
}

/// Outcome of a single update.
#[derive(Debug, Clone)]
pub struct UpdateResult {
    pub matched_count: u64,
    pub modified_count: u64,
}

/// Outcome of a delete.
#[derive(Debug, Clone)]
pub struct DeleteResult {
    pub deleted_count: u64,
}

/// A named store connection.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn connect(&self) -> StoreResult<()>;

    async fn disconnect(&self) -> StoreResult<()>;

    /// Hand out a collection handle. Collections spring into existence on
    /// first use; the store imposes no schema envelope.
    fn collection(&self, name: &str) -> Arc<dyn Collection>;
}

/// Per-collection operations the core depends on.
#[async_trait]
pub trait Collection: Send + Sync {
    async fn insert_one(&self, doc: Document) -> StoreResult<InsertResult>;

    /// An optional projection restricts returned fields and is applied by the
    /// backend untouched.
    async fn find(
        &self,
        filter: Document,
        projection: Option<Document>,
    ) -> StoreResult<Box<dyn StoreCursor>>;

    async fn find_one(&self, filter: Document) -> StoreResult<Option<Document>>;

    /// `update` is a `{"$set": {...}}` document.
    async fn update_one(&self, filter: Document, update: Document) -> StoreResult<UpdateResult>;

    async fn delete_one(&self, filter: Document) -> StoreResult<DeleteResult>;

    async fn delete_many(&self, filter: Document) -> StoreResult<DeleteResult>;
}

/// A backend cursor: pull-based, one document at a time.
#[async_trait]
pub trait StoreCursor: Send {
    async fn next(&mut self) -> StoreResult<Option<Document>>;

    /// Cap the number of documents this cursor will yield.
    fn set_limit(&mut self, limit: usize);
}
