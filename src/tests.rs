use crate::auth::{AuthService, HashCost};
use crate::catalog::{BookInput, BookService, TOP_RATED_LIMIT};
use crate::config::Config;
use crate::db::{Book, Database, Rating, RatingOutcome, User, now_timestamp};
use crate::error::AppError;
use crate::images::ImageStore;
use std::time::Duration;
use tempfile::TempDir;

const FAST: HashCost = HashCost {
    memory_kib: 1024,
    iterations: 1,
};

fn test_db() -> Database {
    Database::open_memory().unwrap()
}

fn test_auth(db: &Database) -> AuthService {
    AuthService::new(db.clone(), b"integration-test-secret-42", 60, FAST)
}

fn test_books(db: &Database) -> (BookService, TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let images = ImageStore::new(dir.path(), "http://localhost:4000", 800, 80).unwrap();
    (BookService::new(db.clone(), images), dir)
}

fn input(title: &str) -> BookInput {
    serde_json::from_value(serde_json::json!({
        "title": title,
        "author": "Ursula K. Le Guin",
        "year": 1969,
        "genre": "Science fiction",
    }))
    .unwrap()
}

fn create_user(db: &Database, id: &str, email: &str) {
    let user = User {
        id: id.to_string(),
        email: email.to_string(),
        password_hash: "hash".to_string(),
        created_at: now_timestamp(),
    };
    db.create_user(&user).unwrap();
}

fn stored_book(id: &str, owner: &str, ratings: Vec<Rating>) -> Book {
    Book {
        id: id.to_string(),
        owner_id: owner.to_string(),
        title: format!("Title {}", id),
        author: "Author".to_string(),
        year: 2000,
        genre: "Essay".to_string(),
        image_url: format!("http://localhost:4000/images/{}.jpg", id),
        average_rating: crate::catalog::average_rating(&ratings),
        ratings,
        created_at: now_timestamp(),
        updated_at: now_timestamp(),
    }
}

fn rating(user: &str, grade: f64) -> Rating {
    Rating {
        user_id: user.to_string(),
        grade,
    }
}

/// Place a file in the upload dir and return its public URL.
fn fake_cover(dir: &TempDir, name: &str) -> String {
    std::fs::write(dir.path().join(name), b"jpeg").unwrap();
    format!("http://localhost:4000/images/{}", name)
}

// ========== DATABASE ==========

#[test]
fn db_create_and_get_user() {
    let db = test_db();
    create_user(&db, "user-1", "alice@example.com");

    let found = db.get_user_by_email("alice@example.com").unwrap().unwrap();
    assert_eq!(found.id, "user-1");
    assert!(db.get_user_by_email("bob@example.com").unwrap().is_none());
}

#[test]
fn db_duplicate_email_is_conflict() {
    let db = test_db();
    create_user(&db, "user-1", "alice@example.com");

    let dup = User {
        id: "user-2".to_string(),
        email: "alice@example.com".to_string(),
        password_hash: "hash2".to_string(),
        created_at: now_timestamp(),
    };
    assert!(matches!(db.create_user(&dup), Err(AppError::Conflict(_))));
}

#[test]
fn db_book_round_trip_keeps_rating_order() {
    let db = test_db();
    let book = stored_book(
        "book-1",
        "user-1",
        vec![rating("u2", 1.0), rating("u1", 5.0), rating("u3", 3.0)],
    );
    db.create_book(&book).unwrap();

    let found = db.get_book("book-1").unwrap().unwrap();
    assert_eq!(found, book);
    assert!(db.get_book("missing").unwrap().is_none());
}

#[test]
fn db_list_books_in_insertion_order() {
    let db = test_db();
    for id in ["c", "a", "b"] {
        db.create_book(&stored_book(id, "user-1", vec![rating("u1", 2.0)]))
            .unwrap();
    }

    let ids: Vec<_> = db.list_books().unwrap().into_iter().map(|b| b.id).collect();
    assert_eq!(ids, ["c", "a", "b"]);
    assert_eq!(db.book_count().unwrap(), 3);
}

#[test]
fn db_delete_book_requires_owner() {
    let db = test_db();
    db.create_book(&stored_book("book-1", "owner", vec![rating("u1", 4.0)]))
        .unwrap();

    assert!(!db.delete_book("book-1", "intruder").unwrap());
    assert_eq!(db.get_book("book-1").unwrap().unwrap().ratings.len(), 1);

    assert!(db.delete_book("book-1", "owner").unwrap());
    assert!(db.get_book("book-1").unwrap().is_none());
}

#[test]
fn db_add_rating_outcomes() {
    let db = test_db();
    db.create_book(&stored_book("book-1", "owner", vec![]))
        .unwrap();

    match db.add_rating("book-1", &rating("u1", 4.0)).unwrap() {
        RatingOutcome::Added(book) => assert_eq!(book.average_rating, 4.0),
        other => panic!("unexpected outcome: {:?}", other),
    }
    assert!(matches!(
        db.add_rating("book-1", &rating("u1", 1.0)).unwrap(),
        RatingOutcome::AlreadyRated
    ));
    assert!(matches!(
        db.add_rating("nope", &rating("u1", 1.0)).unwrap(),
        RatingOutcome::BookMissing
    ));
}

// ========== AUTH ==========

#[test]
fn signup_then_login() {
    let db = test_db();
    let auth = test_auth(&db);

    let user = auth.signup("reader@example.com", "secret1").unwrap();
    let session = auth.login("reader@example.com", "secret1").unwrap();

    assert_eq!(session.user_id, user.id);
    assert_eq!(auth.verify(&session.token).unwrap(), user.id);
}

#[test]
fn signup_normalizes_email() {
    let db = test_db();
    let auth = test_auth(&db);

    auth.signup("  Reader@Example.com", "secret1").unwrap();
    assert!(auth.login("reader@example.com", "secret1").is_ok());
    assert!(matches!(
        auth.signup("READER@example.com", "other-password"),
        Err(AppError::Conflict(_))
    ));
}

#[test]
fn signup_duplicate_email_conflicts_regardless_of_password() {
    let db = test_db();
    let auth = test_auth(&db);
    auth.signup("reader@example.com", "secret1").unwrap();

    for password in ["secret1", "different-password", "x", ""] {
        assert!(matches!(
            auth.signup("reader@example.com", password),
            Err(AppError::Conflict(_))
        ));
    }
}

#[test]
fn signup_rejects_bad_input() {
    let db = test_db();
    let auth = test_auth(&db);

    assert!(matches!(
        auth.signup("reader@example.com", "12345"),
        Err(AppError::InvalidInput(_))
    ));
    assert!(matches!(
        auth.signup("not-an-email", "secret1"),
        Err(AppError::InvalidInput(_))
    ));
    assert!(auth.list_users().unwrap().is_empty());
}

#[test]
fn login_failures_are_indistinguishable() {
    let db = test_db();
    let auth = test_auth(&db);
    auth.signup("reader@example.com", "secret1").unwrap();

    let unknown = auth.login("ghost@example.com", "secret1").unwrap_err();
    let wrong = auth.login("reader@example.com", "wrong-password").unwrap_err();

    assert!(matches!(unknown, AppError::Unauthorized(_)));
    assert!(matches!(wrong, AppError::Unauthorized(_)));
    assert_eq!(unknown.to_string(), wrong.to_string());
}

// ========== CATALOG ==========

#[test]
fn create_then_get_round_trip() {
    let db = test_db();
    let (books, dir) = test_books(&db);
    let cover = fake_cover(&dir, "earthsea.jpg");

    let created = books
        .create("owner", &input("A Wizard of Earthsea"), Some(cover.clone()))
        .unwrap();
    let found = books.get(&created.id).unwrap();

    assert_eq!(found, created);
    assert_eq!(found.owner_id, "owner");
    assert_eq!(found.title, "A Wizard of Earthsea");
    assert_eq!(found.author, "Ursula K. Le Guin");
    assert_eq!(found.year, 1969);
    assert_eq!(found.genre, "Science fiction");
    assert_eq!(found.image_url, cover);
    assert!(found.ratings.is_empty());
    assert_eq!(found.average_rating, 0.0);
}

#[test]
fn create_requires_cover_and_fields() {
    let db = test_db();
    let (books, _dir) = test_books(&db);

    assert!(matches!(
        books.create("owner", &input("No cover"), None),
        Err(AppError::InvalidInput(_))
    ));

    let incomplete: BookInput = serde_json::from_str(r#"{"title":"Only a title"}"#).unwrap();
    assert!(matches!(
        books.create("owner", &incomplete, Some("http://x/images/a.jpg".into())),
        Err(AppError::InvalidInput(_))
    ));
    assert!(books.list().unwrap().is_empty());
}

#[test]
fn create_with_initial_ratings_computes_average() {
    let db = test_db();
    let (books, _dir) = test_books(&db);

    let with_ratings: BookInput = serde_json::from_value(serde_json::json!({
        "title": "Rated",
        "author": "Someone",
        "year": "2010",
        "genre": "Poetry",
        "ratings": [{"userId": "u1", "grade": 4}, {"userId": "u2", "grade": 2}],
        "averageRating": 5,
    }))
    .unwrap();

    let book = books
        .create("owner", &with_ratings, Some("http://x/images/r.jpg".into()))
        .unwrap();
    assert_eq!(book.average_rating, 3.0);
    assert_eq!(books.get(&book.id).unwrap().average_rating, 3.0);
}

#[test]
fn get_missing_book_is_not_found() {
    let db = test_db();
    let (books, _dir) = test_books(&db);
    assert!(matches!(books.get("missing"), Err(AppError::NotFound(_))));
}

#[test]
fn rating_recomputes_average() {
    let db = test_db();
    let (books, _dir) = test_books(&db);
    db.create_book(&stored_book(
        "book-1",
        "owner",
        vec![rating("u1", 4.0), rating("u2", 2.0)],
    ))
    .unwrap();
    assert_eq!(books.get("book-1").unwrap().average_rating, 3.0);

    let book = books.add_rating("book-1", "u3", 3.0).unwrap();
    let grades: Vec<f64> = book.ratings.iter().map(|r| r.grade).collect();
    assert_eq!(grades, [4.0, 2.0, 3.0]);
    assert_eq!(book.average_rating, 3.0);

    let book = books.add_rating("book-1", "u4", 5.0).unwrap();
    assert_eq!(book.average_rating, 3.5);
}

#[test]
fn duplicate_rating_leaves_book_unchanged() {
    let db = test_db();
    let (books, _dir) = test_books(&db);
    db.create_book(&stored_book("book-1", "owner", vec![]))
        .unwrap();

    books.add_rating("book-1", "u1", 4.0).unwrap();
    let before = books.get("book-1").unwrap();

    assert!(matches!(
        books.add_rating("book-1", "u1", 1.0),
        Err(AppError::Conflict(_))
    ));
    assert_eq!(books.get("book-1").unwrap(), before);
}

#[test]
fn rating_validation_and_missing_book() {
    let db = test_db();
    let (books, _dir) = test_books(&db);
    db.create_book(&stored_book("book-1", "owner", vec![]))
        .unwrap();

    assert!(matches!(
        books.add_rating("book-1", "u1", 7.0),
        Err(AppError::InvalidInput(_))
    ));
    assert!(matches!(
        books.add_rating("missing", "u1", 3.0),
        Err(AppError::NotFound(_))
    ));
    assert!(books.get("book-1").unwrap().ratings.is_empty());
}

#[test]
fn concurrent_ratings_are_all_counted() {
    let db = test_db();
    let (books, _dir) = test_books(&db);
    db.create_book(&stored_book("book-1", "owner", vec![]))
        .unwrap();

    std::thread::scope(|s| {
        for i in 0..8i32 {
            let books = books.clone();
            s.spawn(move || {
                books
                    .add_rating("book-1", &format!("user-{}", i), f64::from(i % 5))
                    .unwrap();
            });
        }
    });

    let book = books.get("book-1").unwrap();
    assert_eq!(book.ratings.len(), 8);
    let expected = (0..8i32).map(|i| f64::from(i % 5)).sum::<f64>() / 8.0;
    assert!((book.average_rating - expected).abs() < 1e-9);
}

#[test]
fn top_rated_returns_three_sorted() {
    let db = test_db();
    let (books, _dir) = test_books(&db);
    let grades = [2.0, 5.0, 1.0, 4.0, 3.0];
    for (i, grade) in grades.iter().enumerate() {
        db.create_book(&stored_book(
            &format!("book-{}", i),
            "owner",
            vec![rating("u1", *grade)],
        ))
        .unwrap();
    }

    let top = books.top_rated(TOP_RATED_LIMIT).unwrap();
    let averages: Vec<f64> = top.iter().map(|b| b.average_rating).collect();
    assert_eq!(averages, [5.0, 4.0, 3.0]);
}

#[test]
fn top_rated_ties_keep_insertion_order() {
    let db = test_db();
    let (books, _dir) = test_books(&db);
    for id in ["first", "second", "third", "fourth"] {
        db.create_book(&stored_book(id, "owner", vec![rating("u1", 4.0)]))
            .unwrap();
    }

    let ids: Vec<_> = books
        .top_rated(3)
        .unwrap()
        .into_iter()
        .map(|b| b.id)
        .collect();
    assert_eq!(ids, ["first", "second", "third"]);
}

#[test]
fn top_rated_on_empty_catalog_is_not_found() {
    let db = test_db();
    let (books, _dir) = test_books(&db);
    assert!(matches!(books.top_rated(3), Err(AppError::NotFound(_))));
}

#[tokio::test]
async fn update_by_non_owner_is_forbidden() {
    let db = test_db();
    let (books, dir) = test_books(&db);
    let cover = fake_cover(&dir, "mine.jpg");
    let book = books.create("owner", &input("Mine"), Some(cover)).unwrap();

    assert!(matches!(
        books.update(&book.id, "intruder", &input("Stolen"), None),
        Err(AppError::Forbidden(_))
    ));
    assert!(matches!(
        books.update("missing", "owner", &input("Nothing"), None),
        Err(AppError::NotFound(_))
    ));
    assert_eq!(books.get(&book.id).unwrap().title, "Mine");
}

#[tokio::test]
async fn update_by_owner_keeps_ratings() {
    let db = test_db();
    let (books, dir) = test_books(&db);
    let cover = fake_cover(&dir, "orig.jpg");
    let book = books.create("owner", &input("Draft"), Some(cover.clone())).unwrap();
    books.add_rating(&book.id, "u1", 5.0).unwrap();

    let updated = books
        .update(&book.id, "owner", &input("Final"), None)
        .unwrap();

    assert_eq!(updated.title, "Final");
    assert_eq!(updated.image_url, cover);
    assert_eq!(updated.ratings.len(), 1);
    assert_eq!(updated.average_rating, 5.0);
    assert_eq!(books.get(&book.id).unwrap(), updated);
}

#[tokio::test]
async fn update_with_new_cover_removes_old_file() {
    let db = test_db();
    let (books, dir) = test_books(&db);
    let old = fake_cover(&dir, "old.jpg");
    let new = fake_cover(&dir, "new.jpg");
    let book = books.create("owner", &input("Covered"), Some(old)).unwrap();

    let updated = books
        .update(&book.id, "owner", &input("Covered"), Some(new.clone()))
        .unwrap();
    assert_eq!(updated.image_url, new);

    let old_path = dir.path().join("old.jpg");
    for _ in 0..50 {
        if !old_path.exists() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(!old_path.exists());
    assert!(dir.path().join("new.jpg").exists());
}

#[tokio::test]
async fn delete_by_non_owner_is_forbidden() {
    let db = test_db();
    let (books, dir) = test_books(&db);
    let cover = fake_cover(&dir, "keep.jpg");
    let book = books.create("owner", &input("Keep"), Some(cover)).unwrap();

    assert!(matches!(
        books.delete(&book.id, "intruder").await,
        Err(AppError::Forbidden(_))
    ));
    assert!(books.get(&book.id).is_ok());
    assert!(dir.path().join("keep.jpg").exists());
}

#[tokio::test]
async fn delete_by_owner_removes_record_and_cover() {
    let db = test_db();
    let (books, dir) = test_books(&db);
    let cover = fake_cover(&dir, "gone.jpg");
    let book = books.create("owner", &input("Gone"), Some(cover)).unwrap();

    let outcome = books.delete(&book.id, "owner").await.unwrap();

    assert!(outcome.image_warning.is_none());
    assert!(matches!(books.get(&book.id), Err(AppError::NotFound(_))));
    assert!(!dir.path().join("gone.jpg").exists());
    assert!(matches!(
        books.delete(&book.id, "owner").await,
        Err(AppError::NotFound(_))
    ));
}

#[tokio::test]
async fn delete_with_missing_cover_warns_but_succeeds() {
    let db = test_db();
    let (books, _dir) = test_books(&db);
    let book = books
        .create(
            "owner",
            &input("Orphan"),
            Some("http://localhost:4000/images/never-written.jpg".into()),
        )
        .unwrap();

    let outcome = books.delete(&book.id, "owner").await.unwrap();

    assert!(outcome.image_warning.is_some());
    assert!(matches!(books.get(&book.id), Err(AppError::NotFound(_))));
}

// ========== CONFIG ==========

#[test]
fn config_parse_toml() {
    let toml = r#"
[server]
bind = "127.0.0.1:9090"
public_url = "https://books.example.com"

[database]
path = "/tmp/test.db"

[auth]
jwt_secret = "a-sufficiently-long-secret"
token_ttl_minutes = 15
hash_memory_kib = 4096
hash_iterations = 3

[uploads]
dir = "/tmp/covers"
max_dimension = 600
quality = 70
"#;
    let config: Config = toml::from_str(toml).unwrap();
    assert_eq!(config.server.bind.port(), 9090);
    assert_eq!(config.server.public_url, "https://books.example.com");
    assert_eq!(config.auth.token_ttl_minutes, 15);
    assert_eq!(
        config.auth.hash_cost(),
        HashCost {
            memory_kib: 4096,
            iterations: 3
        }
    );
    assert_eq!(config.uploads.max_dimension, 600);
    assert_eq!(config.uploads.quality, 70);
    assert!(config.validate().is_ok());
}

#[test]
fn config_default_values() {
    let config = Config::default();
    assert_eq!(config.server.bind.port(), 4000);
    assert_eq!(config.auth.token_ttl_minutes, 60);
    assert!(config.auth.jwt_secret.is_none());
    assert_eq!(config.uploads.max_dimension, 800);
    assert_eq!(config.uploads.quality, 80);
    assert_eq!(config.auth.hash_cost(), HashCost::default());
    assert!(config.validate().is_ok());
}

#[test]
fn config_generated_default_parses() {
    let config: Config = toml::from_str(&Config::generate_default()).unwrap();
    assert_eq!(config.server.bind.port(), 4000);
    assert!(config.validate().is_ok());
}

#[test]
fn config_rejects_bad_values() {
    let mut config = Config::default();
    config.uploads.quality = 0;
    assert!(config.validate().is_err());

    let mut config = Config::default();
    config.auth.jwt_secret = Some("short".to_string());
    assert!(config.validate().is_err());
}
