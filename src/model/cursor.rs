//! Lazy, restartable cursor over a store collection.

use crate::error::ModelError;
use crate::store::{Collection, Document, StoreCursor};
use std::sync::Arc;

/// A pull-based sequence of storage documents.
///
/// Nothing is fetched until the first `next()`; `rewind()` discards the
/// backend cursor so iteration restarts from the store rather than replaying
/// a buffer. Documents are yielded in their storage shape (target field
/// names), un-mapped.
pub struct ModelCursor {
    collection: Arc<dyn Collection>,
    filter: Document,
    projection: Option<Document>,
    limit: Option<usize>,
    inner: Option<Box<dyn StoreCursor>>,
}

impl ModelCursor {
    pub(crate) fn new(
        collection: Arc<dyn Collection>,
        filter: Document,
        projection: Option<Document>,
    ) -> Self {
        Self {
            collection,
            filter,
            projection,
            limit: None,
            inner: None,
        }
    }

    /// Cap the number of documents yielded. Applies on the next (re)start of
    /// iteration.
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Restart iteration from the store.
    pub fn rewind(&mut self) {
        self.inner = None;
    }

    async fn ensure_started(&mut self) -> Result<&mut Box<dyn StoreCursor>, ModelError> {
        if self.inner.is_none() {
            let mut cursor = self
                .collection
                .find(self.filter.clone(), self.projection.clone())
                .await?;
            if let Some(limit) = self.limit {
                cursor.set_limit(limit);
            }
            self.inner = Some(cursor);
        }
        Ok(self.inner.as_mut().expect("cursor just set"))
    }

    /// Pull the next document, if any.
    pub async fn next(&mut self) -> Result<Option<Document>, ModelError> {
        let cursor = self.ensure_started().await?;
        Ok(cursor.next().await?)
    }

    /// Collect every remaining document from a fresh iteration.
    pub async fn to_array(&mut self) -> Result<Vec<Document>, ModelError> {
        self.rewind();
        let mut all = Vec::new();
        while let Some(doc) = self.next().await? {
            all.push(doc);
        }
        Ok(all)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{DocumentStore, MemoryStore};
    use serde_json::json;

    async fn seeded() -> Arc<dyn Collection> {
        let store = MemoryStore::new();
        let coll = store.collection("rows");
        for i in 0..3 {
            coll.insert_one(json!({"_id": format!("id-{i}"), "n": i}).as_object().cloned().unwrap())
                .await
                .unwrap();
        }
        coll
    }

    #[tokio::test]
    async fn next_pulls_one_at_a_time() {
        let coll = seeded().await;
        let mut cursor = ModelCursor::new(coll, Document::new(), None);
        assert_eq!(cursor.next().await.unwrap().unwrap()["n"], 0);
        assert_eq!(cursor.next().await.unwrap().unwrap()["n"], 1);
        assert_eq!(cursor.next().await.unwrap().unwrap()["n"], 2);
        assert!(cursor.next().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn rewind_restarts_from_the_store() {
        let coll = seeded().await;
        let mut cursor = ModelCursor::new(coll, Document::new(), None);
        cursor.next().await.unwrap();
        cursor.next().await.unwrap();
        cursor.rewind();
        assert_eq!(cursor.next().await.unwrap().unwrap()["n"], 0);
    }

    #[tokio::test]
    async fn to_array_collects_all_even_after_partial_iteration() {
        let coll = seeded().await;
        let mut cursor = ModelCursor::new(coll, Document::new(), None);
        cursor.next().await.unwrap();
        let all = cursor.to_array().await.unwrap();
        assert_eq!(all.len(), 3);
    }

    #[tokio::test]
    async fn limit_is_applied_on_start() {
        let coll = seeded().await;
        let mut cursor = ModelCursor::new(coll, Document::new(), None).limit(1);
        let all = cursor.to_array().await.unwrap();
        assert_eq!(all.len(), 1);
    }
}
