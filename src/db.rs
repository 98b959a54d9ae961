mod schema;

pub use schema::{Database, RatingOutcome};

use chrono::Utc;
use serde::{Deserialize, Serialize};

/// User account.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    /// Unique user ID.
    pub id: String,
    /// Login email, stored lowercased.
    pub email: String,
    /// Argon2 password hash.
    #[serde(skip_serializing)]
    pub password_hash: String,
    /// Account creation timestamp.
    pub created_at: i64,
}

/// One user's grade for a book.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Rating {
    /// Rater.
    pub user_id: String,
    /// Grade between 0 and 5.
    pub grade: f64,
}

/// Book record with its embedded ratings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Book {
    /// Unique book ID.
    pub id: String,
    /// Owner (the user who created it).
    #[serde(rename = "userId")]
    pub owner_id: String,
    /// Title.
    pub title: String,
    /// Author.
    pub author: String,
    /// Publication year.
    pub year: i32,
    /// Genre.
    pub genre: String,
    /// Public URL of the cover image.
    pub image_url: String,
    /// Ratings in the order they were given.
    pub ratings: Vec<Rating>,
    /// Mean of all grades, 0 when unrated.
    pub average_rating: f64,
    /// Creation timestamp.
    pub created_at: i64,
    /// Last update timestamp.
    pub updated_at: i64,
}

/// Timestamp helper.
pub fn now_timestamp() -> i64 {
    Utc::now().timestamp()
}
