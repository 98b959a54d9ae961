//! Book catalog: CRUD and ratings.

use crate::db::{Book, Database, Rating, RatingOutcome, now_timestamp};
use crate::error::{AppError, Result};
use crate::images::ImageStore;
use serde::Deserialize;
use std::collections::HashSet;

/// Number of books returned by the best-rated listing.
pub const TOP_RATED_LIMIT: usize = 3;

/// Highest accepted grade.
pub const MAX_GRADE: f64 = 5.0;

/// Year sent either as a JSON number or as a numeric string.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum YearInput {
    /// `"year": 1954`
    Number(i64),
    /// `"year": "1954"`
    Text(String),
}

/// Book fields as submitted by the client, before validation.
///
/// Derived fields (`averageRating`, `id`, `userId`) are not part of it, so
/// clients cannot set them.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct BookInput {
    /// Title.
    pub title: Option<String>,
    /// Author.
    pub author: Option<String>,
    /// Publication year, always positive.
    pub year: Option<YearInput>,
    /// Genre.
    pub genre: Option<String>,
    /// Ratings supplied at creation.
    pub ratings: Option<Vec<Rating>>,
}

/// Validated editable fields of a book.
#[derive(Debug, Clone, PartialEq)]
pub struct BookFields {
    /// Title.
    pub title: String,
    /// Author.
    pub author: String,
    /// Publication year, always positive.
    pub year: i32,
    /// Genre.
    pub genre: String,
}

impl BookInput {
    /// Check that title, author and genre are non-empty and year is a positive integer.
    pub fn validate(&self) -> Result<BookFields> {
        Ok(BookFields {
            title: required(&self.title, "title")?,
            author: required(&self.author, "author")?,
            year: self.parsed_year()?,
            genre: required(&self.genre, "genre")?,
        })
    }

    fn parsed_year(&self) -> Result<i32> {
        let year = match &self.year {
            Some(YearInput::Number(n)) => i32::try_from(*n).ok(),
            Some(YearInput::Text(s)) if s.trim().is_empty() => return Err(missing("year")),
            Some(YearInput::Text(s)) => s.trim().parse::<i32>().ok(),
            None => return Err(missing("year")),
        };

        match year {
            Some(year) if year > 0 => Ok(year),
            _ => Err(AppError::InvalidInput(
                "Field 'year' must be a positive integer".to_string(),
            )),
        }
    }

    /// Initial ratings, each grade in range and at most one per user.
    pub fn initial_ratings(&self) -> Result<Vec<Rating>> {
        let ratings = self.ratings.clone().unwrap_or_default();

        let mut seen = HashSet::new();
        for rating in &ratings {
            if rating.user_id.trim().is_empty() {
                return Err(AppError::InvalidInput(
                    "Every rating needs a userId".to_string(),
                ));
            }
            validate_grade(rating.grade)?;
            if !seen.insert(rating.user_id.as_str()) {
                return Err(AppError::InvalidInput(format!(
                    "User '{}' appears more than once in ratings",
                    rating.user_id
                )));
            }
        }

        Ok(ratings)
    }
}

fn missing(field: &str) -> AppError {
    AppError::InvalidInput(format!("Field '{}' is required", field))
}

fn required(value: &Option<String>, field: &str) -> Result<String> {
    match value.as_deref().map(str::trim) {
        Some(v) if !v.is_empty() => Ok(v.to_string()),
        _ => Err(missing(field)),
    }
}

/// Reject grades outside `[0, 5]`.
pub fn validate_grade(grade: f64) -> Result<f64> {
    if grade.is_finite() && (0.0..=MAX_GRADE).contains(&grade) {
        Ok(grade)
    } else {
        Err(AppError::InvalidInput(format!(
            "Rating must be between 0 and {}",
            MAX_GRADE
        )))
    }
}

/// Mean of all grades, 0 when there are none.
pub fn average_rating(ratings: &[Rating]) -> f64 {
    if ratings.is_empty() {
        return 0.0;
    }
    ratings.iter().map(|r| r.grade).sum::<f64>() / ratings.len() as f64
}

fn not_found(id: &str) -> AppError {
    AppError::NotFound(format!("Book not found: {}", id))
}

/// What happened to the cover when a book was deleted.
#[derive(Debug, Default)]
pub struct DeleteOutcome {
    /// Set when the record is gone but its image could not be removed.
    pub image_warning: Option<String>,
}

/// Book service.
#[derive(Clone)]
pub struct BookService {
    db: Database,
    images: ImageStore,
}

impl BookService {
    /// Create a new book service.
    pub fn new(db: Database, images: ImageStore) -> Self {
        Self { db, images }
    }

    /// Image store used for covers.
    pub fn images(&self) -> &ImageStore {
        &self.images
    }

    /// Add a book owned by `owner_id`.
    pub fn create(
        &self,
        owner_id: &str,
        input: &BookInput,
        image_url: Option<String>,
    ) -> Result<Book> {
        let fields = input.validate()?;
        let ratings = input.initial_ratings()?;
        let image_url = image_url
            .filter(|url| !url.trim().is_empty())
            .ok_or_else(|| AppError::InvalidInput("A cover image is required".to_string()))?;

        let now = now_timestamp();
        let book = Book {
            id: uuid::Uuid::new_v4().to_string(),
            owner_id: owner_id.to_string(),
            title: fields.title,
            author: fields.author,
            year: fields.year,
            genre: fields.genre,
            image_url,
            average_rating: average_rating(&ratings),
            ratings,
            created_at: now,
            updated_at: now,
        };

        self.db.create_book(&book)?;
        tracing::info!(book_id = %book.id, owner = %owner_id, "Book created");
        Ok(book)
    }

    /// All books, oldest first.
    pub fn list(&self) -> Result<Vec<Book>> {
        self.db.list_books()
    }

    /// Get book by ID.
    pub fn get(&self, id: &str) -> Result<Book> {
        self.db.get_book(id)?.ok_or_else(|| not_found(id))
    }

    /// Up to `limit` books by descending average rating.
    ///
    /// An empty catalog is reported as `NotFound`.
    pub fn top_rated(&self, limit: usize) -> Result<Vec<Book>> {
        let books = self.db.top_rated_books(limit)?;
        if books.is_empty() {
            return Err(AppError::NotFound("No books found".to_string()));
        }
        Ok(books)
    }

    /// Fetch a book and check that `requester_id` owns it.
    pub fn owned(&self, id: &str, requester_id: &str) -> Result<Book> {
        let book = self.get(id)?;
        if book.owner_id != requester_id {
            tracing::debug!(book_id = %id, requester = %requester_id, "Ownership check failed");
            return Err(AppError::Forbidden(
                "You are not allowed to modify this book".to_string(),
            ));
        }
        Ok(book)
    }

    /// Replace the editable fields, and the cover when `new_image_url` is set.
    ///
    /// The previous cover is removed in the background.
    pub fn update(
        &self,
        id: &str,
        requester_id: &str,
        input: &BookInput,
        new_image_url: Option<String>,
    ) -> Result<Book> {
        let mut book = self.owned(id, requester_id)?;
        let fields = input.validate()?;

        let replaced = new_image_url.map(|url| std::mem::replace(&mut book.image_url, url));
        book.title = fields.title;
        book.author = fields.author;
        book.year = fields.year;
        book.genre = fields.genre;
        book.updated_at = now_timestamp();

        if !self.db.update_book(&book)? {
            return Err(not_found(id));
        }

        if let Some(old) = replaced
            && !old.is_empty()
            && old != book.image_url
        {
            self.images.spawn_removal(old);
        }

        tracing::info!(book_id = %id, "Book updated");
        self.get(id)
    }

    /// Delete a book, then its cover.
    pub async fn delete(&self, id: &str, requester_id: &str) -> Result<DeleteOutcome> {
        let book = self.owned(id, requester_id)?;

        if !self.db.delete_book(id, requester_id)? {
            return Err(not_found(id));
        }
        tracing::info!(book_id = %id, "Book deleted");

        let mut outcome = DeleteOutcome::default();
        if !book.image_url.is_empty()
            && let Err(e) = self.images.remove(&book.image_url).await
        {
            tracing::warn!(book_id = %id, image = %book.image_url, error = %e, "Failed to remove cover image");
            outcome.image_warning = Some(format!(
                "Book deleted, but its cover image could not be removed: {}",
                e
            ));
        }

        Ok(outcome)
    }

    /// Record `rater_id`'s grade and return the book with its new average.
    pub fn add_rating(&self, id: &str, rater_id: &str, grade: f64) -> Result<Book> {
        let grade = validate_grade(grade)?;
        let rating = Rating {
            user_id: rater_id.to_string(),
            grade,
        };

        match self.db.add_rating(id, &rating)? {
            RatingOutcome::Added(book) => {
                tracing::info!(book_id = %id, rater = %rater_id, grade, average = book.average_rating, "Rating added");
                Ok(book)
            }
            RatingOutcome::BookMissing => Err(not_found(id)),
            RatingOutcome::AlreadyRated => Err(AppError::Conflict(
                "You have already rated this book".to_string(),
            )),
        }
    }
}
