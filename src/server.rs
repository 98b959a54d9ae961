//! HTTP server and routes.

mod handlers;
mod state;

pub use state::AppState;

use crate::images::PUBLIC_PREFIX;
use axum::{
    Router,
    extract::DefaultBodyLimit,
    routing::{get, post},
};
use tower_http::{cors::CorsLayer, services::ServeDir, trace::TraceLayer};

/// Create the application router.
pub fn create_router(state: AppState) -> Router {
    let auth_routes = Router::new()
        .route("/signup", post(handlers::auth_signup))
        .route("/login", post(handlers::auth_login));

    let book_routes = Router::new()
        .route("/", get(handlers::books_list).post(handlers::books_create))
        // Static segment wins over /{id}
        .route("/bestrating", get(handlers::books_best_rated))
        .route(
            "/{id}",
            get(handlers::books_get)
                .put(handlers::books_update)
                .delete(handlers::books_delete),
        )
        .route("/{id}/rating", post(handlers::books_rate));

    let images_dir = state.books.images().dir().to_path_buf();
    let body_limit = state.config.uploads.max_upload_bytes;

    Router::new()
        .nest("/api/auth", auth_routes)
        .nest("/api/books", book_routes)
        .route("/api/protected-route", get(handlers::protected_route))
        .nest_service(PUBLIC_PREFIX, ServeDir::new(images_dir))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
