//! Authentication module.

use crate::db::{Database, User, now_timestamp};
use crate::error::{AppError, Result};
use argon2::{
    Argon2, Params, Version,
    password_hash::{
        PasswordHash, PasswordHasher, PasswordVerifier, SaltString,
        rand_core::{OsRng, RngCore},
    },
};
use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;

/// Shared by both login failure paths so callers cannot tell them apart.
const INVALID_CREDENTIALS: &str = "Invalid email or password";

/// Minimum password length, in characters.
pub const MIN_PASSWORD_LEN: usize = 6;

static EMAIL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\S+@\S+\.\S+$").expect("email pattern compiles"));

/// Argon2 cost parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HashCost {
    /// Memory cost in KiB.
    pub memory_kib: u32,
    /// Number of passes.
    pub iterations: u32,
}

impl Default for HashCost {
    fn default() -> Self {
        Self {
            memory_kib: Params::DEFAULT_M_COST,
            iterations: Params::DEFAULT_T_COST,
        }
    }
}

fn hasher(cost: HashCost) -> Result<Argon2<'static>> {
    let params = Params::new(cost.memory_kib, cost.iterations, Params::DEFAULT_P_COST, None)
        .map_err(|e| AppError::Config(format!("Invalid Argon2 cost: {}", e)))?;
    Ok(Argon2::new(argon2::Algorithm::Argon2id, Version::V0x13, params))
}

/// Hash a password using Argon2id.
pub fn hash_password(password: &str, cost: HashCost) -> Result<String> {
    let salt = SaltString::generate(&mut OsRng);

    hasher(cost)?
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| AppError::Internal(format!("Failed to hash password: {}", e)))
}

/// Verify a password against a hash.
///
/// The cost parameters are read back from the PHC string.
pub fn verify_password(password: &str, hash: &str) -> Result<bool> {
    let parsed_hash = PasswordHash::new(hash)
        .map_err(|e| AppError::Internal(format!("Invalid password hash: {}", e)))?;

    Ok(Argon2::default()
        .verify_password(password.as_bytes(), &parsed_hash)
        .is_ok())
}

/// Generate a random signing secret.
pub fn generate_secret() -> String {
    let mut bytes = [0u8; 32];
    OsRng.fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Canonical form used for storage and lookup.
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Basic `local@domain.tld` shape check.
pub fn is_valid_email(email: &str) -> bool {
    EMAIL_RE.is_match(email)
}

/// Bearer token claims.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// User ID.
    pub sub: String,
    /// Issued at (unix seconds).
    pub iat: i64,
    /// Expiry (unix seconds).
    pub exp: i64,
}

/// Token handed out by a successful login.
#[derive(Debug, Clone)]
pub struct Session {
    /// Signed bearer token.
    pub token: String,
    /// Authenticated user ID.
    pub user_id: String,
    /// Expiration timestamp.
    pub expires_at: i64,
}

/// Authentication service.
pub struct AuthService {
    db: Database,
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
    token_ttl_minutes: u32,
    hash_cost: HashCost,
}

impl AuthService {
    /// Create a new auth service.
    pub fn new(db: Database, secret: &[u8], token_ttl_minutes: u32, hash_cost: HashCost) -> Self {
        Self {
            db,
            encoding_key: EncodingKey::from_secret(secret),
            decoding_key: DecodingKey::from_secret(secret),
            validation: Validation::new(Algorithm::HS256),
            token_ttl_minutes,
            hash_cost,
        }
    }

    /// Register a new user.
    pub fn signup(&self, email: &str, password: &str) -> Result<User> {
        let email = normalize_email(email);
        if !is_valid_email(&email) {
            return Err(AppError::InvalidInput("Invalid email address".to_string()));
        }

        // Checked before the password rule: a taken email always conflicts.
        if self.db.get_user_by_email(&email)?.is_some() {
            return Err(AppError::Conflict("User already exists".to_string()));
        }

        if password.chars().count() < MIN_PASSWORD_LEN {
            return Err(AppError::InvalidInput(format!(
                "Password must be at least {} characters",
                MIN_PASSWORD_LEN
            )));
        }

        let password_hash = hash_password(password, self.hash_cost)?;

        let user = User {
            id: uuid::Uuid::new_v4().to_string(),
            email,
            password_hash,
            created_at: now_timestamp(),
        };

        self.db.create_user(&user)?;
        tracing::info!(user_id = %user.id, "User registered");
        Ok(user)
    }

    /// Check credentials and issue a bearer token.
    pub fn login(&self, email: &str, password: &str) -> Result<Session> {
        let user = self
            .db
            .get_user_by_email(&normalize_email(email))?
            .ok_or_else(|| AppError::Unauthorized(INVALID_CREDENTIALS.to_string()))?;

        if !verify_password(password, &user.password_hash)? {
            return Err(AppError::Unauthorized(INVALID_CREDENTIALS.to_string()));
        }

        self.issue_token(&user.id)
    }

    /// Sign a token for `user_id`.
    pub fn issue_token(&self, user_id: &str) -> Result<Session> {
        let iat = now_timestamp();
        let exp = iat + i64::from(self.token_ttl_minutes) * 60;
        let claims = Claims {
            sub: user_id.to_string(),
            iat,
            exp,
        };

        let token = encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(|e| AppError::Internal(format!("Failed to sign token: {}", e)))?;

        Ok(Session {
            token,
            user_id: claims.sub,
            expires_at: exp,
        })
    }

    /// Validate a bearer token and return the user ID it carries.
    pub fn verify(&self, token: &str) -> Result<String> {
        let token = token.trim();
        if token.is_empty() {
            return Err(AppError::Unauthorized("Missing token".to_string()));
        }

        let data = decode::<Claims>(token, &self.decoding_key, &self.validation).map_err(|e| {
            tracing::debug!(error = %e, "Token rejected");
            AppError::Unauthorized("Invalid or expired token".to_string())
        })?;

        if data.claims.sub.is_empty() {
            return Err(AppError::Unauthorized("Invalid or expired token".to_string()));
        }

        Ok(data.claims.sub)
    }

    /// List all users.
    pub fn list_users(&self) -> Result<Vec<User>> {
        self.db.list_users()
    }
}
