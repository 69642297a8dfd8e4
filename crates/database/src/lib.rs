//! SQLite persistence for the support portal.
//!
//! This crate stores the three durable records of the portal:
//!
//! - [`Case`] - one per support room
//! - [`ControlEvent`] - control room status messages for a case
//! - [`CaseAccept`] - an agent's claim on a case
//!
//! It contains no business logic. Every write is a single statement (or a
//! single transaction for [`case::open_case`]), so readers never observe a
//! partially written row.
//!
//! # Example
//!
//! ```no_run
//! use database::{case, Case, Database};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let db = Database::connect("sqlite:portal.db?mode=rwc").await?;
//!     db.migrate().await?;
//!
//!     let case = Case {
//!         id: "!room:example.org".to_string(),
//!         user_id: Some("@alice:example.org".to_string()),
//!         displayname: "Alice".to_string(),
//!         room_name: "Billing question".to_string(),
//!         last_bot_msg: 0,
//!     };
//!     case::insert_case(db.pool(), &case).await?;
//!
//!     Ok(())
//! }
//! ```

pub mod case;
pub mod case_accept;
pub mod control_event;
pub mod error;
pub mod models;
pub mod sync_state;

pub use error::{DatabaseError, Result};
pub use models::{Case, CaseAccept, CaseChanges, ControlEvent};

use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::str::FromStr;

/// Database connection wrapper.
#[derive(Debug, Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Default pool size. Handlers for different rooms run concurrently.
    const DEFAULT_POOL_SIZE: u32 = 10;

    /// Connect to a SQLite database.
    ///
    /// The URL should be in the format `sqlite:path/to/db.sqlite?mode=rwc`,
    /// or `sqlite::memory:` for tests.
    pub async fn connect(url: &str) -> Result<Self> {
        Self::connect_with_pool_size(url, Self::DEFAULT_POOL_SIZE).await
    }

    /// Connect to a SQLite database with a custom pool size.
    pub async fn connect_with_pool_size(url: &str, pool_size: u32) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(url)?
            .create_if_missing(true)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(pool_size)
            .acquire_timeout(std::time::Duration::from_secs(30))
            .connect_with(options)
            .await?;

        tracing::info!("Connected to database: {} (pool size: {})", url, pool_size);

        Ok(Self { pool })
    }

    /// Run database migrations.
    pub async fn migrate(&self) -> Result<()> {
        tracing::info!("Running database migrations...");

        sqlx::migrate!("./migrations").run(&self.pool).await?;

        tracing::info!("Migrations complete");
        Ok(())
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Close the database connection pool.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

/// Turn a filesystem path into a SQLite URL. URLs are passed through.
pub fn sqlite_url_from_path(path: &str) -> String {
    if path.starts_with("sqlite:") {
        path.to_string()
    } else {
        format!("sqlite:{}?mode=rwc", path)
    }
}
