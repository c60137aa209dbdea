//! In-memory document store.
//!
//! Backs the test suite and small embedded deployments. Filter support covers
//! what the synthesized CRUD operations emit: top-level equality and `$or`.

use super::{
    Collection, DeleteResult, Document, DocumentStore, InsertResult, StoreCursor, StoreResult,
    UpdateResult,
};
use crate::error::StoreError;
use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

pub struct MemoryStore {
    collections: DashMap<String, Arc<MemoryCollection>>,
    connected: AtomicBool,
    fail_connect: bool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            collections: DashMap::new(),
            connected: AtomicBool::new(false),
            fail_connect: false,
        }
    }

    /// A store whose `connect` always fails. Used to exercise startup
    /// rejection paths.
    pub fn failing() -> Self {
        Self {
            fail_connect: true,
            ..Self::new()
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn connect(&self) -> StoreResult<()> {
        if self.fail_connect {
            return Err(StoreError::Connection("memory store refused".into()));
        }
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn disconnect(&self) -> StoreResult<()> {
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn collection(&self, name: &str) -> Arc<dyn Collection> {
        self.collections
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(MemoryCollection::default()))
            .clone()
    }
}

#[derive(Default)]
struct MemoryCollection {
    docs: Mutex<Vec<Document>>,
}

impl MemoryCollection {
    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<Document>> {
        self.docs.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl Collection for MemoryCollection {
    async fn insert_one(&self, mut doc: Document) -> StoreResult<InsertResult> {
        if !doc.contains_key("_id") {
            doc.insert(
                "_id".to_string(),
                Value::String(uuid::Uuid::new_v4().to_string()),
            );
        }
        let id = doc["_id"].clone();
        self.lock().push(doc);
        Ok(InsertResult {
            inserted_count: 1,
            inserted_id: id,
        })
    }

    async fn find(
        &self,
        filter: Document,
        projection: Option<Document>,
    ) -> StoreResult<Box<dyn StoreCursor>> {
        let docs: Vec<Document> = self
            .lock()
            .iter()
            .filter(|d| matches(d, &filter))
            .map(|d| project(d, projection.as_ref()))
            .collect();
        Ok(Box::new(MemoryCursor {
            docs,
            pos: 0,
            limit: None,
        }))
    }

    async fn find_one(&self, filter: Document) -> StoreResult<Option<Document>> {
        Ok(self.lock().iter().find(|d| matches(d, &filter)).cloned())
    }

    async fn update_one(&self, filter: Document, update: Document) -> StoreResult<UpdateResult> {
        let set = match update.get("$set") {
            Some(Value::Object(set)) => set.clone(),
            _ => Document::new(),
        };
        let mut docs = self.lock();
        if let Some(doc) = docs.iter_mut().find(|d| matches(d, &filter)) {
            for (k, v) in set {
                doc.insert(k, v);
            }
            Ok(UpdateResult {
                matched_count: 1,
                modified_count: 1,
            })
        } else {
            Ok(UpdateResult {
                matched_count: 0,
                modified_count: 0,
            })
        }
    }

    async fn delete_one(&self, filter: Document) -> StoreResult<DeleteResult> {
        let mut docs = self.lock();
        if let Some(idx) = docs.iter().position(|d| matches(d, &filter)) {
            docs.remove(idx);
            Ok(DeleteResult { deleted_count: 1 })
        } else {
            Ok(DeleteResult { deleted_count: 0 })
        }
    }

    async fn delete_many(&self, filter: Document) -> StoreResult<DeleteResult> {
        let mut docs = self.lock();
        let before = docs.len();
        docs.retain(|d| !matches(d, &filter));
        Ok(DeleteResult {
            deleted_count: (before - docs.len()) as u64,
        })
    }
}

struct MemoryCursor {
    docs: Vec<Document>,
    pos: usize,
    limit: Option<usize>,
}

#[async_trait]
impl StoreCursor for MemoryCursor {
    async fn next(&mut self) -> StoreResult<Option<Document>> {
        if let Some(limit) = self.limit {
            if self.pos >= limit {
                return Ok(None);
            }
        }
        let doc = self.docs.get(self.pos).cloned();
        if doc.is_some() {
            self.pos += 1;
        }
        Ok(doc)
    }

    fn set_limit(&mut self, limit: usize) {
        self.limit = Some(limit);
    }
}

/// Top-level equality plus `$or`. An empty filter matches every document.
fn matches(doc: &Document, filter: &Document) -> bool {
    filter.iter().all(|(key, expected)| match key.as_str() {
        "$or" => match expected {
            Value::Array(branches) => branches.iter().any(|branch| match branch {
                Value::Object(branch) => matches(doc, branch),
                _ => false,
            }),
            _ => false,
        },
        _ => doc.get(key) == Some(expected),
    })
}

fn project(doc: &Document, projection: Option<&Document>) -> Document {
    let Some(projection) = projection else {
        return doc.clone();
    };
    let included = |v: &Value| v == &Value::from(1) || v == &Value::Bool(true);
    let mut out = Document::new();
    for (k, v) in doc {
        let keep = match projection.get(k) {
            Some(flag) => included(flag),
            // _id rides along unless explicitly excluded
            None => k == "_id",
        };
        if keep {
            out.insert(k.clone(), v.clone());
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(v: Value) -> Document {
        v.as_object().cloned().unwrap_or_default()
    }

    #[tokio::test]
    async fn insert_assigns_id_when_absent() {
        let store = MemoryStore::new();
        let coll = store.collection("things");
        let result = coll.insert_one(doc(json!({"a": 1}))).await.unwrap();
        assert_eq!(result.inserted_count, 1);
        assert!(result.inserted_id.is_string());
    }

    #[tokio::test]
    async fn filter_supports_equality_and_or() {
        let store = MemoryStore::new();
        let coll = store.collection("things");
        coll.insert_one(doc(json!({"_id": "a", "n": 1}))).await.unwrap();
        coll.insert_one(doc(json!({"_id": "b", "n": 2}))).await.unwrap();
        coll.insert_one(doc(json!({"_id": "c", "n": 3}))).await.unwrap();

        let found = coll.find_one(doc(json!({"n": 2}))).await.unwrap().unwrap();
        assert_eq!(found["_id"], "b");

        let removed = coll
            .delete_many(doc(json!({"$or": [{"_id": "a"}, {"_id": "c"}]})))
            .await
            .unwrap();
        assert_eq!(removed.deleted_count, 2);
    }

    #[tokio::test]
    async fn projection_restricts_fields() {
        let store = MemoryStore::new();
        let coll = store.collection("things");
        coll.insert_one(doc(json!({"_id": "a", "x": 1, "y": 2})))
            .await
            .unwrap();

        let mut cursor = coll
            .find(Document::new(), Some(doc(json!({"x": 1}))))
            .await
            .unwrap();
        let row = cursor.next().await.unwrap().unwrap();
        assert_eq!(row.get("x"), Some(&json!(1)));
        assert_eq!(row.get("y"), None);
        assert!(row.contains_key("_id"));
    }

    #[tokio::test]
    async fn cursor_limit_caps_iteration() {
        let store = MemoryStore::new();
        let coll = store.collection("things");
        for i in 0..5 {
            coll.insert_one(doc(json!({"n": i}))).await.unwrap();
        }
        let mut cursor = coll.find(Document::new(), None).await.unwrap();
        cursor.set_limit(2);
        assert!(cursor.next().await.unwrap().is_some());
        assert!(cursor.next().await.unwrap().is_some());
        assert!(cursor.next().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn update_one_applies_set() {
        let store = MemoryStore::new();
        let coll = store.collection("things");
        coll.insert_one(doc(json!({"_id": "a", "x": 1}))).await.unwrap();

        let result = coll
            .update_one(doc(json!({"_id": "a"})), doc(json!({"$set": {"x": 9}})))
            .await
            .unwrap();
        assert_eq!(result.modified_count, 1);

        let found = coll.find_one(doc(json!({"_id": "a"}))).await.unwrap().unwrap();
        assert_eq!(found["x"], 9);
    }

    #[tokio::test]
    async fn failing_store_rejects_connect() {
        let store = MemoryStore::failing();
        assert!(store.connect().await.is_err());
    }
}
