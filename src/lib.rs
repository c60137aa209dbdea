//! # Tsubaki
//!
//! A declarative model-mapping, routing, and dependency injection framework
//! for Rust.
//!
//! Tsubaki synthesizes persistence operations from class metadata, maps
//! entities between their code, document, and payload representations, and
//! wires services together through a container with contract-based
//! substitution for testing.
//!
//! ## Features
//!
//! - **Model metadata**: register models once, with field renames, transforms
//!   and representation-specific rules that inherit down a class chain
//! - **Field mapping**: bidirectional object/document and object/payload
//!   conversion driven entirely by the registered rules
//! - **CRUD synthesis**: a full persistence surface (`get`, `get_by_id`,
//!   cursors, `create`, `save`, `remove`, ...) generated per model, with
//!   per-operation suppression
//! - **Dependency injection**: lazily resolved singleton providers with
//!   contract bindings, so a mock implementation substitutes everywhere its
//!   contract is consumed
//! - **Routing**: declarative route sets with before/after handler chains
//!   and authenticators, bound onto an axum router at listen time
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use tsubaki::prelude::*;
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Default, Serialize, Deserialize)]
//! struct User {
//!     #[serde(skip)]
//!     id: Option<DocumentId>,
//!     first_name: String,
//! }
//!
//! impl Model for User {
//!     fn id(&self) -> Option<&DocumentId> {
//!         self.id.as_ref()
//!     }
//!     fn set_id(&mut self, id: DocumentId) {
//!         self.id = Some(id);
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> tsubaki::Result<()> {
//!     model::<User>()
//!         .db("userDb", "users")
//!         .field(FieldRule::new("first_name").store_as("fName"))
//!         .register()?;
//!
//!     let app = Tsubaki::builder()
//!         .store("userDb", Arc::new(MemoryStore::new()))
//!         .routable(
//!             Routable::new("UserApi")
//!                 .base_path("/user")
//!                 .route(Route::new("list", |_req| async { "users" })),
//!         )
//!         .build()?;
//!
//!     app.listen(ListenOptions::default()).await?;
//!     app.close().await
//! }
//! ```

pub mod app;
pub mod config;
pub mod di;
pub mod error;
pub mod metadata;
pub mod model;
pub mod routable;
pub mod store;

// Re-export core types
pub use app::{ListenOptions, Tsubaki, TsubakiBuilder};
pub use di::{injectable, Container, Provide};
pub use error::{Result, TsubakiError};
pub use metadata::{model, DbConfig, DefaultOp, FieldRule};
pub use model::{Crud, DocumentId, FieldMapper, Model, ModelCursor};
pub use routable::{Routable, Route};

// Re-export commonly used types from dependencies
pub use async_trait::async_trait;
pub use axum;

/// Prelude module for convenient imports
///
/// ```
/// use tsubaki::prelude::*;
/// ```
pub mod prelude {
    pub use crate::app::{ListenOptions, Tsubaki, TsubakiBuilder};
    pub use crate::config::ServerConfig;
    pub use crate::di::{injectable, Container, Deps, Provide};
    pub use crate::error::{
        ConfigError, DiError, ModelError, Result, StoreError, TsubakiError,
    };
    pub use crate::metadata::{metadata_of, model, DbConfig, DefaultOp, FieldRule, Visibility};
    pub use crate::model::{Crud, DocumentId, FieldMapper, Model, ModelCursor};
    pub use crate::routable::{
        AuthError, AuthResult, Authenticator, Routable, Route, RouteDescriptor,
    };
    pub use crate::store::{
        Collection, Document, DocumentStore, MemoryStore, StoreConnections, StoreCursor,
    };
    pub use async_trait::async_trait;
    pub use axum::{
        extract::{Path, Query},
        http::StatusCode,
        response::{IntoResponse, Response},
        Json, Router,
    };
    pub use std::sync::Arc;
}
