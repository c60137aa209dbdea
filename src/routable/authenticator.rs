use async_trait::async_trait;
use axum::{body::Body, http::Request};

/// Standard Result type for an Authenticator.
/// Ok(()) means the request may proceed.
/// Err(AuthError) short-circuits the handler chain.
pub type AuthResult = Result<(), AuthError>;

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),
}

/// Implement this to protect routes. Authenticators run first, in the order
/// they were attached, before any before-handler sees the request.
#[async_trait]
pub trait Authenticator: Send + Sync + 'static {
    async fn authenticate(&self, request: &Request<Body>) -> AuthResult;
}
