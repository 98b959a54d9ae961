use crate::db::*;
use crate::error::{AppError, Result};
use parking_lot::Mutex;
use rusqlite::{Connection, OptionalExtension, Row, params};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

const BOOK_COLUMNS: &str =
    "id, owner_id, title, author, year, genre, image_url, average_rating, created_at, updated_at";

/// Result of recording a rating.
#[derive(Debug)]
pub enum RatingOutcome {
    /// Rating stored; carries the book with its new average.
    Added(Book),
    /// No book with that ID.
    BookMissing,
    /// The user already rated this book; nothing changed.
    AlreadyRated,
}

/// Database wrapper for thread-safe access.
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Open or create database at the given path.
    pub fn open(path: &Path) -> Result<Self> {
        // Create parent directories if needed
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)
            .map_err(|e| AppError::Internal(format!("Failed to open database: {}", e)))?;

        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };

        db.initialize_schema()?;
        Ok(db)
    }

    /// Open in-memory database (for testing).
    pub fn open_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| AppError::Internal(format!("Failed to open database: {}", e)))?;

        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };

        db.initialize_schema()?;
        Ok(db)
    }

    /// Initialize database schema.
    fn initialize_schema(&self) -> Result<()> {
        let conn = self.conn.lock();

        conn.pragma_update(None, "foreign_keys", true)
            .map_err(|e| AppError::Internal(format!("Failed to enable foreign keys: {}", e)))?;

        conn.execute_batch(
            r#"
            -- Users table
            CREATE TABLE IF NOT EXISTS users (
                id TEXT PRIMARY KEY,
                email TEXT UNIQUE NOT NULL,
                password_hash TEXT NOT NULL,
                created_at INTEGER NOT NULL
            );

            -- Books table; seq keeps insertion order stable
            CREATE TABLE IF NOT EXISTS books (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                id TEXT UNIQUE NOT NULL,
                owner_id TEXT NOT NULL,
                title TEXT NOT NULL,
                author TEXT NOT NULL,
                year INTEGER NOT NULL,
                genre TEXT NOT NULL,
                image_url TEXT NOT NULL,
                average_rating REAL NOT NULL DEFAULT 0,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            );

            -- Ratings, one per (book, user)
            CREATE TABLE IF NOT EXISTS ratings (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                book_id TEXT NOT NULL,
                user_id TEXT NOT NULL,
                grade REAL NOT NULL,
                created_at INTEGER NOT NULL,
                UNIQUE (book_id, user_id),
                FOREIGN KEY (book_id) REFERENCES books(id) ON DELETE CASCADE
            );

            -- Indexes
            CREATE INDEX IF NOT EXISTS idx_books_owner ON books(owner_id);
            CREATE INDEX IF NOT EXISTS idx_books_rating ON books(average_rating);
            CREATE INDEX IF NOT EXISTS idx_ratings_book ON ratings(book_id);
            "#,
        )
        .map_err(|e| AppError::Internal(format!("Failed to initialize schema: {}", e)))?;

        Ok(())
    }

    // ========== USER OPERATIONS ==========

    /// Create a new user.
    pub fn create_user(&self, user: &User) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO users (id, email, password_hash, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![user.id, user.email, user.password_hash, user.created_at],
        )
        .map_err(|e| {
            if is_unique_violation(&e) {
                AppError::Conflict(format!("Email '{}' is already registered", user.email))
            } else {
                AppError::Internal(format!("Failed to create user: {}", e))
            }
        })?;
        Ok(())
    }

    /// Get user by email.
    pub fn get_user_by_email(&self, email: &str) -> Result<Option<User>> {
        let conn = self.conn.lock();
        conn.query_row(
            "SELECT id, email, password_hash, created_at FROM users WHERE email = ?1",
            params![email],
            user_from_row,
        )
        .optional()
        .map_err(|e| AppError::Internal(format!("Failed to get user: {}", e)))
    }

    /// List all users.
    pub fn list_users(&self) -> Result<Vec<User>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare("SELECT id, email, password_hash, created_at FROM users ORDER BY email")
            .map_err(|e| AppError::Internal(format!("Failed to prepare query: {}", e)))?;

        let users = stmt
            .query_map([], user_from_row)
            .map_err(|e| AppError::Internal(format!("Failed to list users: {}", e)))?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| AppError::Internal(format!("Failed to collect users: {}", e)))?;

        Ok(users)
    }

    // ========== BOOK OPERATIONS ==========

    /// Insert a book together with its initial ratings.
    pub fn create_book(&self, book: &Book) -> Result<()> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;

        tx.execute(
            "INSERT INTO books (id, owner_id, title, author, year, genre, image_url,
                                average_rating, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                book.id,
                book.owner_id,
                book.title,
                book.author,
                book.year,
                book.genre,
                book.image_url,
                book.average_rating,
                book.created_at,
                book.updated_at,
            ],
        )?;

        for rating in &book.ratings {
            tx.execute(
                "INSERT INTO ratings (book_id, user_id, grade, created_at)
                 VALUES (?1, ?2, ?3, ?4)",
                params![book.id, rating.user_id, rating.grade, book.created_at],
            )
            .map_err(|e| {
                if is_unique_violation(&e) {
                    AppError::InvalidInput(format!(
                        "User '{}' appears more than once in ratings",
                        rating.user_id
                    ))
                } else {
                    AppError::Database(e)
                }
            })?;
        }

        tx.commit()?;
        Ok(())
    }

    /// Get book by ID.
    pub fn get_book(&self, id: &str) -> Result<Option<Book>> {
        let conn = self.conn.lock();
        load_book(&conn, id)
    }

    /// All books in insertion order.
    pub fn list_books(&self) -> Result<Vec<Book>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM books ORDER BY seq",
            BOOK_COLUMNS
        ))?;
        let mut books = stmt
            .query_map([], book_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let mut ratings = all_ratings(&conn)?;
        for book in &mut books {
            book.ratings = ratings.remove(&book.id).unwrap_or_default();
        }

        Ok(books)
    }

    /// Highest average first; equal averages keep insertion order.
    pub fn top_rated_books(&self, limit: usize) -> Result<Vec<Book>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM books ORDER BY average_rating DESC, seq ASC LIMIT ?1",
            BOOK_COLUMNS
        ))?;
        let mut books = stmt
            .query_map(params![limit as i64], book_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        for book in &mut books {
            book.ratings = book_ratings(&conn, &book.id)?;
        }

        Ok(books)
    }

    /// Overwrite the editable fields of a book owned by `book.owner_id`.
    ///
    /// Ratings and the average are left alone. Returns false when no row
    /// matched.
    pub fn update_book(&self, book: &Book) -> Result<bool> {
        let conn = self.conn.lock();
        let rows = conn.execute(
            "UPDATE books
             SET title = ?3, author = ?4, year = ?5, genre = ?6, image_url = ?7, updated_at = ?8
             WHERE id = ?1 AND owner_id = ?2",
            params![
                book.id,
                book.owner_id,
                book.title,
                book.author,
                book.year,
                book.genre,
                book.image_url,
                book.updated_at,
            ],
        )?;
        Ok(rows > 0)
    }

    /// Delete a book and its ratings if `owner_id` owns it.
    pub fn delete_book(&self, id: &str, owner_id: &str) -> Result<bool> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;

        tx.execute("DELETE FROM ratings WHERE book_id = ?1", params![id])?;
        let rows = tx.execute(
            "DELETE FROM books WHERE id = ?1 AND owner_id = ?2",
            params![id, owner_id],
        )?;

        if rows == 0 {
            // Leave the ratings of a book we did not delete.
            tx.rollback()?;
            return Ok(false);
        }

        tx.commit()?;
        Ok(true)
    }

    /// Append a rating and recompute the average in one transaction.
    pub fn add_rating(&self, book_id: &str, rating: &Rating) -> Result<RatingOutcome> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;

        let exists = tx
            .query_row(
                "SELECT 1 FROM books WHERE id = ?1",
                params![book_id],
                |_| Ok(()),
            )
            .optional()?
            .is_some();
        if !exists {
            return Ok(RatingOutcome::BookMissing);
        }

        let now = now_timestamp();
        let inserted = tx.execute(
            "INSERT INTO ratings (book_id, user_id, grade, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![book_id, rating.user_id, rating.grade, now],
        );
        match inserted {
            Ok(_) => {}
            Err(e) if is_unique_violation(&e) => return Ok(RatingOutcome::AlreadyRated),
            Err(e) => return Err(e.into()),
        }

        tx.execute(
            "UPDATE books
             SET average_rating = (SELECT AVG(grade) FROM ratings WHERE book_id = ?1),
                 updated_at = ?2
             WHERE id = ?1",
            params![book_id, now],
        )?;

        let book = load_book(&tx, book_id)?
            .ok_or_else(|| AppError::Internal(format!("Book {} vanished mid-rating", book_id)))?;
        tx.commit()?;

        Ok(RatingOutcome::Added(book))
    }

    /// Number of stored books.
    pub fn book_count(&self) -> Result<usize> {
        let conn = self.conn.lock();
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM books", [], |row| row.get(0))?;
        Ok(count as usize)
    }
}

fn is_unique_violation(e: &rusqlite::Error) -> bool {
    matches!(
        e,
        rusqlite::Error::SqliteFailure(err, _)
            if err.code == rusqlite::ErrorCode::ConstraintViolation
    )
}

fn user_from_row(row: &Row<'_>) -> rusqlite::Result<User> {
    Ok(User {
        id: row.get(0)?,
        email: row.get(1)?,
        password_hash: row.get(2)?,
        created_at: row.get(3)?,
    })
}

fn book_from_row(row: &Row<'_>) -> rusqlite::Result<Book> {
    Ok(Book {
        id: row.get(0)?,
        owner_id: row.get(1)?,
        title: row.get(2)?,
        author: row.get(3)?,
        year: row.get(4)?,
        genre: row.get(5)?,
        image_url: row.get(6)?,
        average_rating: row.get(7)?,
        created_at: row.get(8)?,
        updated_at: row.get(9)?,
        ratings: Vec::new(),
    })
}

fn load_book(conn: &Connection, id: &str) -> Result<Option<Book>> {
    let book = conn
        .query_row(
            &format!("SELECT {} FROM books WHERE id = ?1", BOOK_COLUMNS),
            params![id],
            book_from_row,
        )
        .optional()?;

    match book {
        Some(mut book) => {
            book.ratings = book_ratings(conn, id)?;
            Ok(Some(book))
        }
        None => Ok(None),
    }
}

fn book_ratings(conn: &Connection, book_id: &str) -> Result<Vec<Rating>> {
    let mut stmt =
        conn.prepare_cached("SELECT user_id, grade FROM ratings WHERE book_id = ?1 ORDER BY seq")?;
    let ratings = stmt
        .query_map(params![book_id], |row| {
            Ok(Rating {
                user_id: row.get(0)?,
                grade: row.get(1)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(ratings)
}

fn all_ratings(conn: &Connection) -> Result<HashMap<String, Vec<Rating>>> {
    let mut stmt = conn.prepare("SELECT book_id, user_id, grade FROM ratings ORDER BY seq")?;
    let rows = stmt.query_map([], |row| {
        Ok((
            row.get::<_, String>(0)?,
            Rating {
                user_id: row.get(1)?,
                grade: row.get(2)?,
            },
        ))
    })?;

    let mut grouped: HashMap<String, Vec<Rating>> = HashMap::new();
    for row in rows {
        let (book_id, rating) = row?;
        grouped.entry(book_id).or_default().push(rating);
    }
    Ok(grouped)
}
