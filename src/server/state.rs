//! Application state shared across handlers.

use crate::auth::AuthService;
use crate::catalog::BookService;
use crate::config::Config;
use crate::error::{AppError, Result};
use axum::http::{HeaderMap, header};
use std::sync::Arc;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    /// Application configuration.
    pub config: Arc<Config>,
    /// Authentication service.
    pub auth: Arc<AuthService>,
    /// Book catalog service.
    pub books: BookService,
}

impl AppState {
    /// Create application state from already constructed services.
    pub fn new(config: Config, auth: AuthService, books: BookService) -> Self {
        Self {
            config: Arc::new(config),
            auth: Arc::new(auth),
            books,
        }
    }

    /// Resolve the bearer token in `headers` to a user ID.
    pub fn authenticate(&self, headers: &HeaderMap) -> Result<String> {
        let token = extract_token(headers)
            .ok_or_else(|| AppError::Unauthorized("Missing Authorization header".to_string()))?;

        self.auth.verify(&token)
    }
}

/// Extract token from Authorization header. The scheme is case-insensitive.
fn extract_token(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.trim().split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }

    let token = token.trim();
    (!token.is_empty()).then(|| token.to_string())
}
