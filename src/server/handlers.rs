//! HTTP request handlers.

use crate::catalog::{BookInput, TOP_RATED_LIMIT};
use crate::db::Book;
use crate::error::{AppError, Result};
use crate::server::AppState;
use axum::{
    Json,
    extract::{FromRequest, Multipart, Path, Request, State, rejection::JsonRejection},
    http::{HeaderMap, StatusCode, header},
};
use serde::{Deserialize, Serialize};

/// Plain acknowledgement body.
#[derive(Debug, Serialize)]
pub struct MessageResponse {
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    warning: Option<String>,
}

impl MessageResponse {
    fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            warning: None,
        }
    }
}

// ============================================================================
// AUTH
// ============================================================================

/// Credentials body shared by signup and login.
#[derive(Debug, Deserialize)]
pub struct CredentialsRequest {
    #[serde(default)]
    email: String,
    #[serde(default)]
    password: String,
}

/// Login response.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginResponse {
    token: String,
    user_id: String,
}

/// Auth signup.
pub async fn auth_signup(
    State(state): State<AppState>,
    payload: std::result::Result<Json<CredentialsRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<MessageResponse>)> {
    let Json(req) = payload?;
    state.auth.signup(&req.email, &req.password)?;

    Ok((StatusCode::CREATED, Json(MessageResponse::new("User created"))))
}

/// Auth login.
pub async fn auth_login(
    State(state): State<AppState>,
    payload: std::result::Result<Json<CredentialsRequest>, JsonRejection>,
) -> Result<Json<LoginResponse>> {
    let Json(req) = payload?;
    let session = state.auth.login(&req.email, &req.password)?;

    Ok(Json(LoginResponse {
        token: session.token,
        user_id: session.user_id,
    }))
}

/// Token check endpoint.
pub async fn protected_route(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<MessageResponse>> {
    state.authenticate(&headers)?;
    Ok(Json(MessageResponse::new("Access granted")))
}

// ============================================================================
// BOOKS
// ============================================================================

/// Cover file pulled from a multipart body.
struct Upload {
    data: Vec<u8>,
    filename: String,
}

/// Parsed create/update body.
struct BookSubmission {
    input: BookInput,
    image: Option<Upload>,
}

fn is_multipart(headers: &HeaderMap) -> bool {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.to_ascii_lowercase().starts_with("multipart/form-data"))
}

/// Read either a multipart body (`book` JSON string + optional `image`) or
/// plain JSON book fields.
async fn read_submission(
    state: &AppState,
    headers: &HeaderMap,
    request: Request,
) -> Result<BookSubmission> {
    if !is_multipart(headers) {
        let Json(input) = Json::<BookInput>::from_request(request, state).await?;
        return Ok(BookSubmission { input, image: None });
    }

    let mut multipart = Multipart::from_request(request, state).await?;
    let mut input = None;
    let mut image = None;

    while let Some(field) = multipart.next_field().await? {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "book" => {
                let text = field.text().await?;
                let parsed: BookInput = serde_json::from_str(&text)
                    .map_err(|e| AppError::InvalidInput(format!("Invalid book data: {}", e)))?;
                input = Some(parsed);
            }
            "image" => {
                let filename = field.file_name().unwrap_or("cover").to_string();
                let data = field.bytes().await?;
                if !data.is_empty() {
                    image = Some(Upload {
                        data: data.to_vec(),
                        filename,
                    });
                }
            }
            other => tracing::debug!(field = %other, "Ignoring multipart field"),
        }
    }

    let input =
        input.ok_or_else(|| AppError::InvalidInput("Book data is missing".to_string()))?;
    Ok(BookSubmission { input, image })
}

/// List all books.
pub async fn books_list(State(state): State<AppState>) -> Result<Json<Vec<Book>>> {
    Ok(Json(state.books.list()?))
}

/// Get one book.
pub async fn books_get(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Book>> {
    Ok(Json(state.books.get(&id)?))
}

/// Best-rated books.
pub async fn books_best_rated(State(state): State<AppState>) -> Result<Json<Vec<Book>>> {
    Ok(Json(state.books.top_rated(TOP_RATED_LIMIT)?))
}

/// Create a book with its cover.
pub async fn books_create(
    State(state): State<AppState>,
    headers: HeaderMap,
    request: Request,
) -> Result<(StatusCode, Json<Book>)> {
    let user_id = state.authenticate(&headers)?;
    let submission = read_submission(&state, &headers, request).await?;

    // Validate before touching the upload directory.
    submission.input.validate()?;
    submission.input.initial_ratings()?;
    let upload = submission
        .image
        .ok_or_else(|| AppError::InvalidInput("A cover image is required".to_string()))?;

    let images = state.books.images();
    let image_url = images.store(upload.data, &upload.filename).await?;

    match state
        .books
        .create(&user_id, &submission.input, Some(image_url.clone()))
    {
        Ok(book) => Ok((StatusCode::CREATED, Json(book))),
        Err(e) => {
            images.spawn_removal(image_url);
            Err(e)
        }
    }
}

/// Update a book, optionally replacing its cover.
pub async fn books_update(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    request: Request,
) -> Result<Json<Book>> {
    let user_id = state.authenticate(&headers)?;
    let submission = read_submission(&state, &headers, request).await?;

    state.books.owned(&id, &user_id)?;
    submission.input.validate()?;

    let images = state.books.images();
    let new_image = match submission.image {
        Some(upload) => Some(images.store(upload.data, &upload.filename).await?),
        None => None,
    };

    match state
        .books
        .update(&id, &user_id, &submission.input, new_image.clone())
    {
        Ok(book) => Ok(Json(book)),
        Err(e) => {
            if let Some(url) = new_image {
                images.spawn_removal(url);
            }
            Err(e)
        }
    }
}

/// Delete a book and its cover.
pub async fn books_delete(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<MessageResponse>> {
    let user_id = state.authenticate(&headers)?;
    let outcome = state.books.delete(&id, &user_id).await?;

    Ok(Json(MessageResponse {
        message: "Book deleted".to_string(),
        warning: outcome.image_warning,
    }))
}

/// Rating request.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RatingRequest {
    /// Must match the authenticated user when present.
    user_id: Option<String>,
    #[serde(alias = "grade")]
    rating: f64,
}

/// Rate a book.
pub async fn books_rate(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    payload: std::result::Result<Json<RatingRequest>, JsonRejection>,
) -> Result<Json<Book>> {
    let user_id = state.authenticate(&headers)?;
    let Json(req) = payload?;

    if let Some(claimed) = req.user_id.as_deref()
        && claimed != user_id
    {
        return Err(AppError::InvalidInput(
            "userId does not match the authenticated user".to_string(),
        ));
    }

    Ok(Json(state.books.add_rating(&id, &user_id, req.rating)?))
}
