//! bookshelf: a lightweight REST backend for a shared book catalog.
//!
//! Users sign up with an email and password, log in for a short-lived bearer
//! token, and then add, edit and delete their own books. Every authenticated
//! user can rate any book once; each book keeps the average of its ratings.
//!
//! # Features
//!
//! - Email/password accounts with Argon2 hashing
//! - HS256 bearer tokens
//! - Book CRUD with owner-only edits
//! - Cover uploads, resized and re-encoded as JPEG
//! - One rating per user and book, averaged atomically
//! - Best-rated listing

#![forbid(unsafe_code)]
#![warn(missing_docs)]

/// Authentication and user management.
pub mod auth;
/// Book catalog operations.
pub mod catalog;
/// Configuration and CLI.
pub mod config;
/// Database operations.
pub mod db;
/// Error types.
pub mod error;
/// Cover image storage.
pub mod images;
/// HTTP server.
pub mod server;

#[cfg(test)]
mod tests;

pub use config::{Cli, Command, Config};
pub use db::Database;
pub use error::{AppError, Result};
pub use server::AppState;
