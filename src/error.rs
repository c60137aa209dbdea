use thiserror::Error;

pub type Result<T> = std::result::Result<T, TsubakiError>;

/// Top-level error for the framework.
///
/// Each subsystem keeps its own error enum (configuration, injection, model
/// state, store); this type aggregates them for callers that work at the
/// framework-instance level.
#[derive(Debug, Error)]
pub enum TsubakiError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Di(#[from] DiError),

    #[error(transparent)]
    Model(#[from] ModelError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Startup failed: {0}")]
    Startup(String),

    #[error("Shutdown failed: {0}")]
    Shutdown(String),
}

/// Fatal configuration errors.
///
/// Raised synchronously at registration or router-bind time, never retried.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Model '{model}' requests persistence but has no store name")]
    MissingStoreName { model: String },

    #[error("Model '{model}' requests persistence but has no collection name")]
    MissingCollectionName { model: String },

    #[error("Model '{model}' was already registered with conflicting options")]
    ConflictingRegistration { model: String },

    #[error("Model '{model}' maps two fields to '{target}' in its {representation} representation")]
    DuplicateFieldTarget {
        model: String,
        target: String,
        representation: String,
    },

    #[error("Field '{field}' on '{model}' has a transform missing its {direction} direction")]
    MissingTransformDirection {
        model: String,
        field: String,
        direction: String,
    },

    #[error("Route '{route}' on '{class}' declares invalid HTTP method '{method}'")]
    InvalidHttpMethod {
        class: String,
        route: String,
        method: String,
    },

    #[error("Duplicate route {method} {path}: declared by both '{first}' and '{second}'")]
    DuplicateRoute {
        method: String,
        path: String,
        first: String,
        second: String,
    },
}

/// Injection errors, distinguishable by kind for caller branching.
#[derive(Debug, Error)]
pub enum DiError {
    #[error("Constructor parameter {index} ({param}) of '{class}' is not annotated injectable")]
    NonInjectableConstructorParameter {
        class: String,
        index: usize,
        param: String,
    },

    #[error("Provider '{type_name}' is not registered with this container")]
    ProviderNotRegistered { type_name: String },

    #[error("'{type_name}' must be annotated injectable before it can be requested")]
    MustBeAnnotatedInjectable { type_name: String },

    #[error("Circular dependency detected: {cycle}")]
    CircularDependency { cycle: String },

    #[error("Injectable '{type_name}' is already owned by another container")]
    OwnerAlreadyAssigned { type_name: String },

    #[error("'{type_name}' already appears as the key of a binding in this container")]
    DuplicateBinding { type_name: String },

    #[error("Failed to downcast provider '{type_name}'")]
    DowncastFailed { type_name: String },

    #[error("Construction of '{type_name}' failed: {message}")]
    ConstructionFailed { type_name: String, message: String },
}

/// Entity-state and mapping errors.
#[derive(Debug, Error)]
pub enum ModelError {
    /// A persistence operation that requires an identity was attempted on an
    /// entity whose identity is unset. Carries the entity's type name; the
    /// caller still holds the offending instance.
    #[error("'{type_name}' has no identity; cannot update an unpersisted entity")]
    MissingIdentity { type_name: String },

    #[error("Default operation '{operation}' is suppressed for '{type_name}'")]
    OperationSuppressed {
        type_name: String,
        operation: String,
    },

    #[error("'{type_name}' has no registered model metadata")]
    NotRegistered { type_name: String },

    #[error("'{type_name}' does not request persistence defaults (no DbConfig)")]
    NoDbConfig { type_name: String },

    #[error("Field mapping failed for '{type_name}': {source}")]
    Mapping {
        type_name: String,
        #[source]
        source: serde_json::Error,
    },

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Errors surfaced by the document-store collaborator.
///
/// The core adds no retry or recovery of its own; backend failures pass
/// through unmodified.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("No store connection named '{name}'")]
    UnknownStore { name: String },

    #[error("Store connection failed: {0}")]
    Connection(String),

    #[error("Store backend error: {0}")]
    Backend(String),
}
