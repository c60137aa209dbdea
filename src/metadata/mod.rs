//! Process-wide class metadata registry.
//!
//! Rust has no decorator syntax, so the declarative surface is an explicit
//! registration API invoked once per model at module-load (or test-setup)
//! time. Metadata lives in a side table keyed by `TypeId`; nothing is ever
//! attached to the entity value itself, so generic serialization cannot
//! observe framework bookkeeping.
//!
//! ```rust,ignore
//! model::<User>()
//!     .db("userDb", "users")
//!     .promiscuous(true)
//!     .field(FieldRule::new("first_name").store_as("fn"))
//!     .register()?;
//! ```

use crate::error::ConfigError;
use dashmap::DashMap;
use serde_json::Value;
use std::any::TypeId;
use std::collections::HashSet;
use std::marker::PhantomData;
use std::sync::{Arc, LazyLock};
use uuid::Uuid;

static REGISTRY: LazyLock<DashMap<TypeId, Arc<ClassMetadata>>> = LazyLock::new(DashMap::new);

/// The default persistence operations the CRUD synthesizer can inject.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DefaultOp {
    Get,
    GetOne,
    GetById,
    GetCursor,
    GetCursorById,
    RemoveAll,
    RemoveById,
    Create,
    Save,
    Remove,
}

impl DefaultOp {
    pub const ALL: [DefaultOp; 10] = [
        DefaultOp::Get,
        DefaultOp::GetOne,
        DefaultOp::GetById,
        DefaultOp::GetCursor,
        DefaultOp::GetCursorById,
        DefaultOp::RemoveAll,
        DefaultOp::RemoveById,
        DefaultOp::Create,
        DefaultOp::Save,
        DefaultOp::Remove,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            DefaultOp::Get => "get",
            DefaultOp::GetOne => "get_one",
            DefaultOp::GetById => "get_by_id",
            DefaultOp::GetCursor => "get_cursor",
            DefaultOp::GetCursorById => "get_cursor_by_id",
            DefaultOp::RemoveAll => "remove_all",
            DefaultOp::RemoveById => "remove_by_id",
            DefaultOp::Create => "create",
            DefaultOp::Save => "save",
            DefaultOp::Remove => "remove",
        }
    }
}

/// Persistence configuration for a model class.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DbConfig {
    pub store: String,
    pub collection: String,
    /// When set, fields with no explicit rule still pass through unchanged
    /// into the document representation.
    pub promiscuous: bool,
}

/// Which representations a field rule participates in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visibility {
    Document,
    Payload,
    Both,
}

impl Visibility {
    pub fn maps_document(self) -> bool {
        matches!(self, Visibility::Document | Visibility::Both)
    }

    pub fn maps_payload(self) -> bool {
        matches!(self, Visibility::Payload | Visibility::Both)
    }
}

pub type TransformFn = Arc<dyn Fn(Value) -> Value + Send + Sync>;

/// A pure, direction-aware value transform. `forward` runs on `to_*`,
/// `backward` on `from_*`.
#[derive(Clone)]
pub struct Transform {
    pub forward: Option<TransformFn>,
    pub backward: Option<TransformFn>,
}

/// Per-field mapping rule. Target names default to the source field name.
#[derive(Clone)]
pub struct FieldRule {
    pub source: String,
    doc_name: Option<String>,
    payload_name: Option<String>,
    pub visibility: Visibility,
    pub transform: Option<Transform>,
}

impl FieldRule {
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            doc_name: None,
            payload_name: None,
            visibility: Visibility::Both,
            transform: None,
        }
    }

    /// Target name in the document representation.
    pub fn store_as(mut self, name: impl Into<String>) -> Self {
        self.doc_name = Some(name.into());
        self
    }

    /// Target name in the wire-payload representation.
    pub fn payload_as(mut self, name: impl Into<String>) -> Self {
        self.payload_name = Some(name.into());
        self
    }

    pub fn document_only(mut self) -> Self {
        self.visibility = Visibility::Document;
        self
    }

    pub fn payload_only(mut self) -> Self {
        self.visibility = Visibility::Payload;
        self
    }

    pub fn transform<F, B>(mut self, forward: F, backward: B) -> Self
    where
        F: Fn(Value) -> Value + Send + Sync + 'static,
        B: Fn(Value) -> Value + Send + Sync + 'static,
    {
        self.transform = Some(Transform {
            forward: Some(Arc::new(forward)),
            backward: Some(Arc::new(backward)),
        });
        self
    }

    /// Half-specified transform; rejected at registration when the missing
    /// direction is reachable.
    pub fn transform_forward<F>(mut self, forward: F) -> Self
    where
        F: Fn(Value) -> Value + Send + Sync + 'static,
    {
        self.transform = Some(Transform {
            forward: Some(Arc::new(forward)),
            backward: None,
        });
        self
    }

    pub fn doc_target(&self) -> &str {
        self.doc_name.as_deref().unwrap_or(&self.source)
    }

    pub fn payload_target(&self) -> &str {
        self.payload_name.as_deref().unwrap_or(&self.source)
    }
}

/// One per registered model class.
pub struct ClassMetadata {
    /// Unique identity marker, assigned at registration.
    pub id: Uuid,
    pub type_id: TypeId,
    pub type_name: &'static str,
    pub parent: Option<TypeId>,
    pub db: Option<DbConfig>,
    pub suppressed: HashSet<DefaultOp>,
    pub user_defined: HashSet<DefaultOp>,
    /// Payload name for the identity accessor; `None` suppresses it.
    pub payload_id: Option<String>,
    fields: Vec<FieldRule>,
}

impl ClassMetadata {
    /// Rules declared directly on this class.
    pub fn own_rules(&self) -> &[FieldRule] {
        &self.fields
    }

    /// Rules merged along the derivation chain, parent first. A subclass rule
    /// for the same source field overrides the parent's for that field only.
    pub fn effective_rules(&self) -> Vec<FieldRule> {
        let mut chain = Vec::new();
        let mut cursor = Some(self.type_id);
        while let Some(type_id) = cursor {
            match metadata_by_id(type_id) {
                Some(meta) => {
                    cursor = meta.parent;
                    chain.push(meta);
                }
                None => break,
            }
        }

        let mut merged: Vec<FieldRule> = Vec::new();
        for meta in chain.iter().rev() {
            for rule in meta.own_rules() {
                match merged.iter_mut().find(|r| r.source == rule.source) {
                    Some(existing) => *existing = rule.clone(),
                    None => merged.push(rule.clone()),
                }
            }
        }
        merged
    }
}

/// Look up the metadata registered for `T`, if any.
pub fn metadata_of<T: 'static>() -> Option<Arc<ClassMetadata>> {
    metadata_by_id(TypeId::of::<T>())
}

pub(crate) fn metadata_by_id(type_id: TypeId) -> Option<Arc<ClassMetadata>> {
    REGISTRY.get(&type_id).map(|m| m.clone())
}

/// Start a model registration for `T`.
pub fn model<T: 'static>() -> ModelBuilder<T> {
    ModelBuilder {
        db: None,
        parent: None,
        suppressed: HashSet::new(),
        user_defined: HashSet::new(),
        payload_id: Some("id".to_string()),
        fields: Vec::new(),
        _marker: PhantomData,
    }
}

pub struct ModelBuilder<T> {
    db: Option<DbConfig>,
    parent: Option<TypeId>,
    suppressed: HashSet<DefaultOp>,
    user_defined: HashSet<DefaultOp>,
    payload_id: Option<String>,
    fields: Vec<FieldRule>,
    _marker: PhantomData<fn() -> T>,
}

impl<T: 'static> ModelBuilder<T> {
    pub fn db(mut self, store: impl Into<String>, collection: impl Into<String>) -> Self {
        let promiscuous = self.db.as_ref().map(|c| c.promiscuous).unwrap_or(false);
        self.db = Some(DbConfig {
            store: store.into(),
            collection: collection.into(),
            promiscuous,
        });
        self
    }

    pub fn promiscuous(mut self, promiscuous: bool) -> Self {
        if let Some(db) = self.db.as_mut() {
            db.promiscuous = promiscuous;
        }
        self
    }

    /// Exclude default operations from synthesis.
    pub fn suppress(mut self, ops: impl IntoIterator<Item = DefaultOp>) -> Self {
        self.suppressed.extend(ops);
        self
    }

    /// Declare that the class author supplies this operation; the synthesizer
    /// will leave it alone (explicit definitions win silently).
    pub fn provides(mut self, op: DefaultOp) -> Self {
        self.user_defined.insert(op);
        self
    }

    /// Payload name for the identity accessor (defaults to `"id"`).
    pub fn payload_id(mut self, name: impl Into<String>) -> Self {
        self.payload_id = Some(name.into());
        self
    }

    /// Never include the identity in the payload representation.
    pub fn suppress_payload_id(mut self) -> Self {
        self.payload_id = None;
        self
    }

    /// Inherit (and extend) the field rules of an already-registered parent.
    pub fn extends<P: 'static>(mut self) -> Self {
        self.parent = Some(TypeId::of::<P>());
        self
    }

    pub fn field(mut self, rule: FieldRule) -> Self {
        self.fields.push(rule);
        self
    }

    /// Validate and publish the metadata. Fails fast on bad persistence
    /// config, duplicate targets, or half-specified transforms.
    pub fn register(self) -> Result<Arc<ClassMetadata>, ConfigError> {
        let type_name = std::any::type_name::<T>();
        let model = short_name(type_name);

        if let Some(db) = &self.db {
            if db.store.is_empty() {
                return Err(ConfigError::MissingStoreName {
                    model: model.to_string(),
                });
            }
            if db.collection.is_empty() {
                return Err(ConfigError::MissingCollectionName {
                    model: model.to_string(),
                });
            }
        }

        validate_targets(model, &self.fields)?;
        validate_transforms(model, &self.fields)?;

        let type_id = TypeId::of::<T>();
        if let Some(existing) = metadata_by_id(type_id) {
            // Idempotent when the required options agree; conflicting
            // re-registration is fatal.
            if existing.db == self.db {
                return Ok(existing);
            }
            return Err(ConfigError::ConflictingRegistration {
                model: model.to_string(),
            });
        }

        let meta = Arc::new(ClassMetadata {
            id: Uuid::new_v4(),
            type_id,
            type_name,
            parent: self.parent,
            db: self.db,
            suppressed: self.suppressed,
            user_defined: self.user_defined,
            payload_id: self.payload_id,
            fields: self.fields,
        });
        REGISTRY.insert(type_id, meta.clone());
        tracing::debug!(model = %model, "registered model metadata");
        Ok(meta)
    }
}

fn validate_targets(model: &str, fields: &[FieldRule]) -> Result<(), ConfigError> {
    let mut doc_targets = HashSet::new();
    let mut payload_targets = HashSet::new();
    for rule in fields {
        if rule.visibility.maps_document() && !doc_targets.insert(rule.doc_target().to_string()) {
            return Err(ConfigError::DuplicateFieldTarget {
                model: model.to_string(),
                target: rule.doc_target().to_string(),
                representation: "document".to_string(),
            });
        }
        if rule.visibility.maps_payload()
            && !payload_targets.insert(rule.payload_target().to_string())
        {
            return Err(ConfigError::DuplicateFieldTarget {
                model: model.to_string(),
                target: rule.payload_target().to_string(),
                representation: "payload".to_string(),
            });
        }
    }
    Ok(())
}

fn validate_transforms(model: &str, fields: &[FieldRule]) -> Result<(), ConfigError> {
    for rule in fields {
        let Some(transform) = &rule.transform else {
            continue;
        };
        // Every reachable representation has both a to_* and a from_* path,
        // so a present transform needs both directions.
        if transform.forward.is_none() {
            return Err(ConfigError::MissingTransformDirection {
                model: model.to_string(),
                field: rule.source.clone(),
                direction: "forward".to_string(),
            });
        }
        if transform.backward.is_none() {
            return Err(ConfigError::MissingTransformDirection {
                model: model.to_string(),
                field: rule.source.clone(),
                direction: "backward".to_string(),
            });
        }
    }
    Ok(())
}

pub(crate) fn short_name(type_name: &str) -> &str {
    type_name.rsplit("::").next().unwrap_or(type_name)
}
