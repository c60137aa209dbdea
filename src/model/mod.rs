//! Mapped entities: identity, field mapping, synthesized persistence.

mod crud;
mod cursor;
mod mapper;

pub use crud::Crud;
pub use cursor::ModelCursor;
pub use mapper::FieldMapper;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque document identifier.
///
/// Wraps whatever identifier string the store assigns (the in-memory backend
/// uses UUIDs). Once an entity is persisted its identity never changes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DocumentId(String);

impl DocumentId {
    /// Mint a fresh identifier. Used by `create` when the instance's identity
    /// is unset.
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub(crate) fn to_value(&self) -> serde_json::Value {
        serde_json::Value::String(self.0.clone())
    }
}

impl Default for DocumentId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for DocumentId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for DocumentId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// A mapped entity.
///
/// The identity accessor is backed by a `#[serde(skip)]` field, decoupled
/// from the entity's serializable fields, so serialization never leaks the
/// internal identity store. The `Default` bound gives `from_document` /
/// `from_payload` their no-argument construction path; fields absent from a
/// partial record keep their class defaults.
///
/// ```rust,ignore
/// #[derive(Default, Serialize, Deserialize)]
/// struct User {
///     #[serde(skip)]
///     id: Option<DocumentId>,
///     first_name: String,
/// }
///
/// impl Model for User {
///     fn id(&self) -> Option<&DocumentId> {
///         self.id.as_ref()
///     }
///     fn set_id(&mut self, id: DocumentId) {
///         self.id = Some(id);
///     }
/// }
/// ```
pub trait Model: Default + Serialize + DeserializeOwned + Send + Sync + 'static {
    fn id(&self) -> Option<&DocumentId>;

    fn set_id(&mut self, id: DocumentId);
}
