use crate::auth::HashCost;
use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;

/// REST backend for a shared book catalog.
#[derive(Parser, Debug, Clone)]
#[command(name = "bookshelf")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to config file.
    #[arg(short, long, env = "BOOKSHELF_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Subcommand to run.
    #[command(subcommand)]
    pub command: Option<Command>,
}

/// CLI subcommands.
#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Start the server (default if no command given).
    Serve {
        /// Address to bind the server to.
        #[arg(short, long)]
        bind: Option<SocketAddr>,

        /// Secret used to sign bearer tokens.
        #[arg(long, env = "BOOKSHELF_JWT_SECRET", hide_env_values = true)]
        jwt_secret: Option<String>,
    },

    /// User management commands.
    User {
        /// User subcommand action.
        #[command(subcommand)]
        action: UserCommand,
    },

    /// Initialize database and create default config.
    Init {
        /// Force overwrite existing config.
        #[arg(short, long)]
        force: bool,
    },
}

/// User management subcommands.
#[derive(Subcommand, Debug, Clone)]
pub enum UserCommand {
    /// Add a new user.
    Add {
        /// Email address.
        email: String,
        /// Password (will prompt if not provided).
        #[arg(short, long)]
        password: Option<String>,
    },

    /// List all users.
    List,
}

/// Main configuration from TOML file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Server configuration.
    #[serde(default)]
    pub server: ServerConfig,

    /// Database configuration.
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Authentication configuration.
    #[serde(default)]
    pub auth: AuthConfig,

    /// Cover upload configuration.
    #[serde(default)]
    pub uploads: UploadConfig,
}

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Address to bind to.
    #[serde(default = "default_bind")]
    pub bind: SocketAddr,

    /// Public base URL used to build image links.
    #[serde(default = "default_public_url")]
    pub public_url: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            public_url: default_public_url(),
        }
    }
}

fn default_bind() -> SocketAddr {
    SocketAddr::new(
        std::net::IpAddr::V4(std::net::Ipv4Addr::new(0, 0, 0, 0)),
        4000,
    )
}

fn default_public_url() -> String {
    "http://localhost:4000".to_string()
}

/// Database configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Path to SQLite database file.
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

fn default_db_path() -> PathBuf {
    PathBuf::from("data/bookshelf.db")
}

/// Authentication configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Token signing secret. Generated at startup when unset.
    #[serde(default)]
    pub jwt_secret: Option<String>,

    /// Bearer token lifetime in minutes.
    #[serde(default = "default_token_ttl")]
    pub token_ttl_minutes: u32,

    /// Argon2 memory cost in KiB.
    #[serde(default = "default_hash_memory")]
    pub hash_memory_kib: u32,

    /// Argon2 iteration count.
    #[serde(default = "default_hash_iterations")]
    pub hash_iterations: u32,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            jwt_secret: None,
            token_ttl_minutes: default_token_ttl(),
            hash_memory_kib: default_hash_memory(),
            hash_iterations: default_hash_iterations(),
        }
    }
}

fn default_token_ttl() -> u32 {
    60
}

fn default_hash_memory() -> u32 {
    argon2::Params::DEFAULT_M_COST
}

fn default_hash_iterations() -> u32 {
    argon2::Params::DEFAULT_T_COST
}

impl AuthConfig {
    /// Password hashing cost.
    pub fn hash_cost(&self) -> HashCost {
        HashCost {
            memory_kib: self.hash_memory_kib,
            iterations: self.hash_iterations,
        }
    }
}

/// Cover upload configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadConfig {
    /// Directory where optimized covers are written.
    #[serde(default = "default_upload_dir")]
    pub dir: PathBuf,

    /// Covers are scaled down to fit in a square of this size.
    #[serde(default = "default_max_dimension")]
    pub max_dimension: u32,

    /// JPEG quality 1-100.
    #[serde(default = "default_quality")]
    pub quality: u8,

    /// Maximum request body size in bytes.
    #[serde(default = "default_max_upload")]
    pub max_upload_bytes: usize,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            dir: default_upload_dir(),
            max_dimension: default_max_dimension(),
            quality: default_quality(),
            max_upload_bytes: default_max_upload(),
        }
    }
}

fn default_upload_dir() -> PathBuf {
    PathBuf::from("data/images")
}

fn default_max_dimension() -> u32 {
    800
}

fn default_quality() -> u8 {
    80
}

fn default_max_upload() -> usize {
    10 * 1024 * 1024
}

impl Config {
    /// Load configuration from file.
    pub fn load(path: &PathBuf) -> crate::error::Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            crate::error::AppError::Config(format!("Failed to read config file: {}", e))
        })?;

        let config: Config = toml::from_str(&content).map_err(|e| {
            crate::error::AppError::Config(format!("Failed to parse config file: {}", e))
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Reject values the services cannot work with.
    pub fn validate(&self) -> crate::error::Result<()> {
        use crate::error::AppError;

        if self.auth.token_ttl_minutes == 0 {
            return Err(AppError::Config(
                "auth.token_ttl_minutes must be positive".to_string(),
            ));
        }
        if self.uploads.max_dimension == 0 {
            return Err(AppError::Config(
                "uploads.max_dimension must be positive".to_string(),
            ));
        }
        if !(1..=100).contains(&self.uploads.quality) {
            return Err(AppError::Config(
                "uploads.quality must be between 1 and 100".to_string(),
            ));
        }
        if let Some(secret) = &self.auth.jwt_secret
            && secret.len() < 16
        {
            return Err(AppError::Config(
                "auth.jwt_secret must be at least 16 bytes".to_string(),
            ));
        }
        Ok(())
    }

    /// Find config file in default locations.
    pub fn find_config_file() -> Option<PathBuf> {
        let candidates = [
            PathBuf::from("config.toml"),
            PathBuf::from("bookshelf.toml"),
            dirs::config_dir()
                .map(|p| p.join("bookshelf").join("config.toml"))
                .unwrap_or_default(),
            PathBuf::from("/etc/bookshelf/config.toml"),
        ];

        candidates.into_iter().find(|p| p.exists())
    }

    /// Generate default config file content.
    pub fn generate_default() -> String {
        r#"# bookshelf configuration

[server]
bind = "0.0.0.0:4000"
# Base URL the front-end uses to reach this server (image links)
public_url = "http://localhost:4000"

[database]
# path = "/var/lib/bookshelf/bookshelf.db"

[auth]
# Token signing secret (or set BOOKSHELF_JWT_SECRET).
# Without one, a random secret is generated and tokens die on restart.
# jwt_secret = "change-me-to-a-long-random-string"
token_ttl_minutes = 60
# Argon2 cost
# hash_memory_kib = 19456
# hash_iterations = 2

[uploads]
# dir = "/var/lib/bookshelf/images"
max_dimension = 800
quality = 80
max_upload_bytes = 10485760
"#
        .to_string()
    }
}
