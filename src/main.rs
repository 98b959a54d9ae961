//! bookshelf server entry point.

use bookshelf::{
    auth::{self, AuthService},
    catalog::BookService,
    config::{Cli, Command, Config, UserCommand},
    db::Database,
    images::ImageStore,
    server,
};
use clap::Parser;
use std::io::{self, Write};
use std::path::PathBuf;
use tokio::net::TcpListener;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Find or load config
    let config_path = cli.config.clone().or_else(Config::find_config_file);

    let config = if let Some(ref path) = config_path {
        Config::load(path)?
    } else {
        Config::default()
    };

    // Handle command
    match cli.command {
        Some(Command::Init { force }) => cmd_init(force).await,
        Some(Command::User { action }) => cmd_user(action, &config).await,
        Some(Command::Serve { bind, jwt_secret }) => cmd_serve(config, bind, jwt_secret).await,
        None => {
            // Default: start server
            cmd_serve(config, None, None).await
        }
    }
}

/// Initialize config, database and upload directory.
async fn cmd_init(force: bool) -> anyhow::Result<()> {
    let config_path = PathBuf::from("config.toml");

    if config_path.exists() && !force {
        anyhow::bail!(
            "Config file already exists: {}. Use --force to overwrite.",
            config_path.display()
        );
    }

    // Write default config
    std::fs::write(&config_path, Config::generate_default())?;
    println!("Created config file: {}", config_path.display());

    let config = Config::default();
    let _db = Database::open(&config.database.path)?;
    println!("Initialized database: {}", config.database.path.display());

    std::fs::create_dir_all(&config.uploads.dir)?;
    println!("Created upload directory: {}", config.uploads.dir.display());

    println!("\nEdit config.toml and set auth.jwt_secret.");
    println!("Then run: bookshelf serve");

    Ok(())
}

/// User management commands.
async fn cmd_user(action: UserCommand, config: &Config) -> anyhow::Result<()> {
    let db = Database::open(&config.database.path)?;
    // Tokens are never issued from the CLI, so any secret will do.
    let auth = AuthService::new(
        db,
        auth::generate_secret().as_bytes(),
        config.auth.token_ttl_minutes,
        config.auth.hash_cost(),
    );

    match action {
        UserCommand::Add { email, password } => {
            let password = match password {
                Some(p) => p,
                None => prompt_password("Password: ")?,
            };

            let user = auth.signup(&email, &password)?;
            println!("Created user: {} (id: {})", user.email, user.id);
        }

        UserCommand::List => {
            let users = auth.list_users()?;
            if users.is_empty() {
                println!("No users found.");
            } else {
                println!("{:<40} {:<36} CREATED", "EMAIL", "ID");
                println!("{}", "-".repeat(90));
                for user in users {
                    let created = chrono::DateTime::from_timestamp(user.created_at, 0)
                        .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
                        .unwrap_or_else(|| "unknown".to_string());
                    println!("{:<40} {:<36} {}", user.email, user.id, created);
                }
            }
        }
    }

    Ok(())
}

/// Start the server.
async fn cmd_serve(
    mut config: Config,
    bind: Option<std::net::SocketAddr>,
    jwt_secret: Option<String>,
) -> anyhow::Result<()> {
    // Override bind address if specified
    if let Some(addr) = bind {
        config.server.bind = addr;
    }
    if jwt_secret.is_some() {
        config.auth.jwt_secret = jwt_secret;
    }
    config.validate()?;

    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "bookshelf=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let secret = match config.auth.jwt_secret.clone() {
        Some(secret) => secret,
        None => {
            tracing::warn!(
                "No auth.jwt_secret configured; using a random secret, tokens will not survive a restart"
            );
            auth::generate_secret()
        }
    };

    // Open database
    let db = Database::open(&config.database.path)?;

    let auth = AuthService::new(
        db.clone(),
        secret.as_bytes(),
        config.auth.token_ttl_minutes,
        config.auth.hash_cost(),
    );

    let images = ImageStore::new(
        &config.uploads.dir,
        &config.server.public_url,
        config.uploads.max_dimension,
        config.uploads.quality,
    )?;
    let books = BookService::new(db.clone(), images);

    tracing::info!(
        bind = %config.server.bind,
        database = %config.database.path.display(),
        uploads = %config.uploads.dir.display(),
        books = db.book_count()?,
        "Starting bookshelf server"
    );

    let bind_addr = config.server.bind;
    let state = server::AppState::new(config, auth, books);
    let app = server::create_router(state);

    let listener = TcpListener::bind(bind_addr).await?;
    tracing::info!(address = %bind_addr, "Server listening");

    axum::serve(listener, app).await?;

    Ok(())
}

/// Prompt for password input.
fn prompt_password(prompt: &str) -> anyhow::Result<String> {
    print!("{}", prompt);
    io::stdout().flush()?;

    let mut password = String::new();
    io::stdin().read_line(&mut password)?;

    Ok(password.trim().to_string())
}
