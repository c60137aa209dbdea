//! Synthesized default persistence operations.
//!
//! `Crud<T>` is the composition rendition of method injection: the
//! synthesizer consults the class metadata once and hands back a bound
//! operation set. Operations the class author suppressed, or declared they
//! provide themselves, are absent from the set and fail with a dedicated
//! error when invoked through it.

use super::{DocumentId, FieldMapper, Model, ModelCursor};
use crate::error::ModelError;
use crate::metadata::DefaultOp;
use crate::store::{
    Collection, DeleteResult, Document, InsertResult, StoreConnections, UpdateResult,
};
use serde_json::Value;
use std::collections::HashSet;
use std::sync::Arc;

pub struct Crud<T: Model> {
    mapper: FieldMapper<T>,
    collection: Arc<dyn Collection>,
    enabled: HashSet<DefaultOp>,
}

impl<T: Model> Crud<T> {
    /// Build the default operation set for `T` against its configured store.
    ///
    /// Fails when `T` has no registered metadata or no `DbConfig`, or when
    /// the named store connection does not exist.
    pub fn synthesize(stores: &StoreConnections) -> Result<Self, ModelError> {
        let mapper = FieldMapper::<T>::for_model()?;
        let meta = mapper.metadata();
        let db = meta.db.clone().ok_or_else(|| ModelError::NoDbConfig {
            type_name: meta.type_name.to_string(),
        })?;

        let enabled = DefaultOp::ALL
            .into_iter()
            .filter(|op| !meta.suppressed.contains(op) && !meta.user_defined.contains(op))
            .collect();

        let collection = stores.collection(&db.store, &db.collection)?;
        Ok(Self {
            mapper,
            collection,
            enabled,
        })
    }

    /// Whether a default operation was synthesized for `T`.
    pub fn supports(&self, op: DefaultOp) -> bool {
        self.enabled.contains(&op)
    }

    fn ensure(&self, op: DefaultOp) -> Result<(), ModelError> {
        if self.enabled.contains(&op) {
            Ok(())
        } else {
            Err(ModelError::OperationSuppressed {
                type_name: self.mapper.metadata().type_name.to_string(),
                operation: op.name().to_string(),
            })
        }
    }

    fn type_name(&self) -> String {
        self.mapper.metadata().type_name.to_string()
    }

    fn id_filter(id: &DocumentId) -> Document {
        let mut filter = Document::new();
        filter.insert("_id".to_string(), id.to_value());
        filter
    }

    /// Fetch every matching document, mapped back into instances.
    pub async fn get(&self, filter: Document) -> Result<Vec<T>, ModelError> {
        self.ensure(DefaultOp::Get)?;
        let mut cursor = self.collection.find(filter, None).await?;
        let mut results = Vec::new();
        while let Some(doc) = cursor.next().await? {
            results.push(self.mapper.from_document(&doc)?);
        }
        Ok(results)
    }

    pub async fn get_one(&self, filter: Document) -> Result<Option<T>, ModelError> {
        self.ensure(DefaultOp::GetOne)?;
        match self.collection.find_one(filter).await? {
            Some(doc) => Ok(Some(self.mapper.from_document(&doc)?)),
            None => Ok(None),
        }
    }

    pub async fn get_by_id(&self, id: &DocumentId) -> Result<Option<T>, ModelError> {
        self.ensure(DefaultOp::GetById)?;
        match self.collection.find_one(Self::id_filter(id)).await? {
            Some(doc) => Ok(Some(self.mapper.from_document(&doc)?)),
            None => Ok(None),
        }
    }

    /// Lazy cursor over matching documents in their storage shape. The
    /// optional projection is passed through to the store untouched.
    pub fn get_cursor(
        &self,
        filter: Document,
        projection: Option<Document>,
    ) -> Result<ModelCursor, ModelError> {
        self.ensure(DefaultOp::GetCursor)?;
        Ok(ModelCursor::new(
            self.collection.clone(),
            filter,
            projection,
        ))
    }

    pub fn get_cursor_by_id(
        &self,
        id: &DocumentId,
        projection: Option<Document>,
    ) -> Result<ModelCursor, ModelError> {
        self.ensure(DefaultOp::GetCursorById)?;
        Ok(ModelCursor::new(
            self.collection.clone(),
            Self::id_filter(id),
            projection,
        ))
    }

    pub async fn remove_all(&self, filter: Document) -> Result<DeleteResult, ModelError> {
        self.ensure(DefaultOp::RemoveAll)?;
        Ok(self.collection.delete_many(filter).await?)
    }

    pub async fn remove_by_id(&self, id: &DocumentId) -> Result<DeleteResult, ModelError> {
        self.ensure(DefaultOp::RemoveById)?;
        Ok(self.collection.delete_one(Self::id_filter(id)).await?)
    }

    /// Insert the instance. Assigns a fresh identity first when unset; the
    /// instance's identity is populated either way after a successful insert.
    pub async fn create(&self, instance: &mut T) -> Result<InsertResult, ModelError> {
        self.ensure(DefaultOp::Create)?;
        if instance.id().is_none() {
            instance.set_id(DocumentId::new());
        }
        let doc = self.mapper.to_document(instance)?;
        Ok(self.collection.insert_one(doc).await?)
    }

    /// Update the persisted document.
    ///
    /// Without `partial`, writes the full `to_document` projection. With
    /// `partial`, writes only the supplied keys (already in storage field
    /// names) and mirrors them onto the in-memory instance so its state
    /// reflects the partial update.
    pub async fn save(
        &self,
        instance: &mut T,
        partial: Option<Document>,
    ) -> Result<UpdateResult, ModelError> {
        self.ensure(DefaultOp::Save)?;
        let id = instance
            .id()
            .cloned()
            .ok_or_else(|| ModelError::MissingIdentity {
                type_name: self.type_name(),
            })?;

        let set = match partial {
            Some(partial) => {
                self.mirror_partial(instance, &partial, &id)?;
                partial
            }
            None => {
                let mut doc = self.mapper.to_document(instance)?;
                doc.remove("_id");
                doc
            }
        };

        let mut update = Document::new();
        update.insert("$set".to_string(), Value::Object(set));
        Ok(self
            .collection
            .update_one(Self::id_filter(&id), update)
            .await?)
    }

    /// Write the partial update back onto the in-memory instance, reversing
    /// each storage key through the field rules.
    fn mirror_partial(
        &self,
        instance: &mut T,
        partial: &Document,
        id: &DocumentId,
    ) -> Result<(), ModelError> {
        let mut fields = match serde_json::to_value(&*instance) {
            Ok(Value::Object(map)) => map,
            Ok(_) => Document::new(),
            Err(source) => {
                return Err(ModelError::Mapping {
                    type_name: self.type_name(),
                    source,
                })
            }
        };

        let rules = self.mapper.metadata().effective_rules();
        for (key, value) in partial {
            let rule = rules
                .iter()
                .find(|r| r.visibility.maps_document() && r.doc_target() == key);
            let (source_name, value) = match rule {
                Some(rule) => {
                    let mut value = value.clone();
                    if let Some(transform) = &rule.transform {
                        if let Some(backward) = &transform.backward {
                            value = backward(value);
                        }
                    }
                    (rule.source.clone(), value)
                }
                None => (key.clone(), value.clone()),
            };
            if fields.contains_key(&source_name) {
                fields.insert(source_name, value);
            }
        }

        let mut updated: T =
            serde_json::from_value(Value::Object(fields)).map_err(|source| ModelError::Mapping {
                type_name: self.type_name(),
                source,
            })?;
        updated.set_id(id.clone());
        *instance = updated;
        Ok(())
    }

    /// Remove documents.
    ///
    /// Without a filter, removes exactly the instance's own document by
    /// identity. With a filter, the filter is used verbatim and the
    /// instance's identity is ignored — intentional asymmetry that enables
    /// bulk removal through an instance method.
    pub async fn remove(
        &self,
        instance: &T,
        filter: Option<Document>,
    ) -> Result<DeleteResult, ModelError> {
        self.ensure(DefaultOp::Remove)?;
        match filter {
            Some(filter) => Ok(self.collection.delete_many(filter).await?),
            None => {
                let id = instance
                    .id()
                    .cloned()
                    .ok_or_else(|| ModelError::MissingIdentity {
                        type_name: self.type_name(),
                    })?;
                Ok(self.collection.delete_one(Self::id_filter(&id)).await?)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::{model, FieldRule};
    use crate::store::MemoryStore;
    use serde::{Deserialize, Serialize};
    use serde_json::json;

    #[derive(Default, Serialize, Deserialize, Clone)]
    struct User {
        #[serde(skip)]
        id: Option<DocumentId>,
        first_name: String,
        last_name: String,
    }

    impl Model for User {
        fn id(&self) -> Option<&DocumentId> {
            self.id.as_ref()
        }
        fn set_id(&mut self, id: DocumentId) {
            self.id = Some(id);
        }
    }

    fn stores() -> StoreConnections {
        let connections = StoreConnections::new();
        connections.add("userDb", Arc::new(MemoryStore::new()));
        connections
    }

    fn register_user() {
        let _ = model::<User>()
            .db("userDb", "users")
            .promiscuous(true)
            .field(FieldRule::new("first_name").store_as("fn"))
            .register();
    }

    fn george() -> User {
        User {
            id: None,
            first_name: "George".into(),
            last_name: "Washington".into(),
        }
    }

    #[tokio::test]
    async fn create_assigns_identity_and_writes_renamed_fields() {
        register_user();
        let stores = stores();
        let crud = Crud::<User>::synthesize(&stores).unwrap();

        let mut user = george();
        assert!(user.id().is_none());
        let result = crud.create(&mut user).await.unwrap();
        assert_eq!(result.inserted_count, 1);
        let id = user.id().cloned().expect("identity populated by create");

        // reading back by id yields a document keyed `fn`, not `first_name`
        let mut cursor = crud.get_cursor_by_id(&id, None).unwrap();
        let doc = cursor.next().await.unwrap().unwrap();
        assert_eq!(doc["fn"], "George");
        assert_eq!(doc["last_name"], "Washington");
        assert_eq!(doc["_id"], id.as_str());
        assert!(!doc.contains_key("first_name"));

        let found = crud.get_by_id(&id).await.unwrap().unwrap();
        assert_eq!(found.first_name, "George");
        assert_eq!(found.id().unwrap(), &id);
    }

    #[tokio::test]
    async fn save_without_identity_is_missing_identity() {
        register_user();
        let stores = stores();
        let crud = Crud::<User>::synthesize(&stores).unwrap();

        let mut user = george();
        let err = crud.save(&mut user, None).await.unwrap_err();
        assert!(matches!(err, ModelError::MissingIdentity { .. }));
    }

    #[tokio::test]
    async fn save_full_writes_every_ruled_field() {
        register_user();
        let stores = stores();
        let crud = Crud::<User>::synthesize(&stores).unwrap();

        let mut user = george();
        crud.create(&mut user).await.unwrap();
        user.first_name = "Martha".into();
        user.last_name = "Custis".into();

        let result = crud.save(&mut user, None).await.unwrap();
        assert_eq!(result.modified_count, 1);

        let id = user.id().cloned().unwrap();
        let doc = crud
            .get_cursor_by_id(&id, None)
            .unwrap()
            .next()
            .await
            .unwrap()
            .unwrap();
        assert_eq!(doc["fn"], "Martha");
        assert_eq!(doc["last_name"], "Custis");
    }

    #[tokio::test]
    async fn save_partial_updates_exactly_the_supplied_keys_and_mirrors() {
        register_user();
        let stores = stores();
        let crud = Crud::<User>::synthesize(&stores).unwrap();

        let mut user = george();
        crud.create(&mut user).await.unwrap();

        let partial = json!({"fn": "Updated"}).as_object().cloned().unwrap();
        let result = crud.save(&mut user, Some(partial)).await.unwrap();
        assert_eq!(result.modified_count, 1);

        // mirrored onto the in-memory instance through the reverse mapping
        assert_eq!(user.first_name, "Updated");
        assert_eq!(user.last_name, "Washington");

        let id = user.id().cloned().unwrap();
        let doc = crud
            .get_cursor_by_id(&id, None)
            .unwrap()
            .next()
            .await
            .unwrap()
            .unwrap();
        assert_eq!(doc["fn"], "Updated");
        assert_eq!(doc["last_name"], "Washington");
    }

    #[tokio::test]
    async fn remove_without_filter_targets_only_the_instance() {
        register_user();
        let stores = stores();
        let crud = Crud::<User>::synthesize(&stores).unwrap();

        let mut a = george();
        let mut b = george();
        crud.create(&mut a).await.unwrap();
        crud.create(&mut b).await.unwrap();

        let removed = crud.remove(&a, None).await.unwrap();
        assert_eq!(removed.deleted_count, 1);
        assert!(crud.get_by_id(a.id().unwrap()).await.unwrap().is_none());
        assert!(crud.get_by_id(b.id().unwrap()).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn remove_with_filter_ignores_identity() {
        register_user();
        let stores = stores();
        let crud = Crud::<User>::synthesize(&stores).unwrap();

        let mut a = george();
        let mut b = george();
        crud.create(&mut a).await.unwrap();
        crud.create(&mut b).await.unwrap();

        let filter = json!({
            "$or": [
                {"_id": a.id().unwrap().as_str()},
                {"_id": b.id().unwrap().as_str()},
            ]
        })
        .as_object()
        .cloned()
        .unwrap();

        let removed = crud.remove(&a, Some(filter)).await.unwrap();
        assert_eq!(removed.deleted_count, 2);
    }

    #[tokio::test]
    async fn remove_without_filter_requires_identity() {
        register_user();
        let stores = stores();
        let crud = Crud::<User>::synthesize(&stores).unwrap();

        let err = crud.remove(&george(), None).await.unwrap_err();
        assert!(matches!(err, ModelError::MissingIdentity { .. }));
    }

    #[tokio::test]
    async fn remove_by_id_deletes_exactly_the_named_document() {
        register_user();
        let stores = stores();
        let crud = Crud::<User>::synthesize(&stores).unwrap();

        let mut a = george();
        let mut b = george();
        crud.create(&mut a).await.unwrap();
        crud.create(&mut b).await.unwrap();

        let removed = crud.remove_by_id(a.id().unwrap()).await.unwrap();
        assert_eq!(removed.deleted_count, 1);
        assert!(crud.get_by_id(a.id().unwrap()).await.unwrap().is_none());
        assert!(crud.get_by_id(b.id().unwrap()).await.unwrap().is_some());

        // removing the same id again matches nothing
        let removed = crud.remove_by_id(a.id().unwrap()).await.unwrap();
        assert_eq!(removed.deleted_count, 0);
    }

    #[tokio::test]
    async fn get_and_remove_all_operate_on_filters() {
        register_user();
        let stores = stores();
        let crud = Crud::<User>::synthesize(&stores).unwrap();

        let mut a = george();
        let mut b = george();
        crud.create(&mut a).await.unwrap();
        crud.create(&mut b).await.unwrap();

        let all = crud.get(Document::new()).await.unwrap();
        assert_eq!(all.len(), 2);

        let one = crud
            .get_one(json!({"fn": "George"}).as_object().cloned().unwrap())
            .await
            .unwrap();
        assert!(one.is_some());

        let removed = crud.remove_all(Document::new()).await.unwrap();
        assert_eq!(removed.deleted_count, 2);
    }

    #[tokio::test]
    async fn cursor_projection_passes_through() {
        register_user();
        let stores = stores();
        let crud = Crud::<User>::synthesize(&stores).unwrap();

        let mut user = george();
        crud.create(&mut user).await.unwrap();
        let id = user.id().cloned().unwrap();

        let projection = json!({"_id": 1}).as_object().cloned().unwrap();
        let doc = crud
            .get_cursor_by_id(&id, Some(projection))
            .unwrap()
            .next()
            .await
            .unwrap()
            .unwrap();
        assert_eq!(doc["_id"], id.as_str());
        assert!(!doc.contains_key("fn"));
        assert!(!doc.contains_key("last_name"));
    }

    #[tokio::test]
    async fn suppressed_operations_are_absent() {
        #[derive(Default, Serialize, Deserialize)]
        struct Quiet {
            #[serde(skip)]
            id: Option<DocumentId>,
            note: String,
        }
        impl Model for Quiet {
            fn id(&self) -> Option<&DocumentId> {
                self.id.as_ref()
            }
            fn set_id(&mut self, id: DocumentId) {
                self.id = Some(id);
            }
        }

        let _ = model::<Quiet>()
            .db("userDb", "quiet")
            .suppress([DefaultOp::Get, DefaultOp::Save])
            .provides(DefaultOp::GetById)
            .register();

        let stores = stores();
        let crud = Crud::<Quiet>::synthesize(&stores).unwrap();
        assert!(!crud.supports(DefaultOp::Get));
        assert!(!crud.supports(DefaultOp::Save));
        // user-defined operations win silently; the synthesizer stays out
        assert!(!crud.supports(DefaultOp::GetById));
        assert!(crud.supports(DefaultOp::Create));

        let err = crud.get(Document::new()).await.err().unwrap();
        assert!(matches!(err, ModelError::OperationSuppressed { .. }));
    }

    #[tokio::test]
    async fn synthesize_requires_db_config() {
        #[derive(Default, Serialize, Deserialize)]
        struct Free {
            #[serde(skip)]
            id: Option<DocumentId>,
        }
        impl Model for Free {
            fn id(&self) -> Option<&DocumentId> {
                self.id.as_ref()
            }
            fn set_id(&mut self, id: DocumentId) {
                self.id = Some(id);
            }
        }

        let _ = model::<Free>().register();
        let stores = stores();
        let err = Crud::<Free>::synthesize(&stores).err().unwrap();
        assert!(matches!(err, ModelError::NoDbConfig { .. }));
    }
}
