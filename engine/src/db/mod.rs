/// SQLite persistence
///
/// Ideas, research documents, memo artifacts, weekly bundles, run records and
/// prompt-call telemetry all live in one SQLite file opened in WAL mode.
use anyhow::{Context, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::ConnectOptions;
use std::path::Path;
use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, info};

pub mod artifacts;
pub mod bundles;
pub mod calls;
pub mod research;
pub mod runs;

pub use artifacts::{Artifact, ArtifactRepository};
pub use bundles::{BundleRepository, WeeklyBundle};
pub use calls::CallRepository;
pub use research::{Idea, ResearchDocument, ResearchRepository};
pub use runs::{RunRecord, RunRepository};

/// Database connection pool
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Open (or create) the database at `db_path` and apply the schema.
    ///
    /// SQLite replays any leftover WAL on open, so an unclean shutdown needs
    /// no extra handling here. Call [`Database::close`] on shutdown to
    /// checkpoint the WAL into the main file.
    pub async fn new(db_path: &Path) -> Result<Self> {
        info!("Initializing database at: {}", db_path.display());

        if let Some(parent) = db_path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .context("Failed to create database directory")?;
        }

        let connection_string = format!("sqlite:{}", db_path.display());
        let options = SqliteConnectOptions::from_str(&connection_string)?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
            .foreign_keys(true)
            .busy_timeout(std::time::Duration::from_secs(5))
            .disable_statement_logging();

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .context("Failed to connect to database")?;

        debug!("Database connection established");

        let db = Self { pool };
        db.run_migrations().await?;

        Ok(db)
    }

    /// Statements are idempotent, so this runs on every open.
    async fn run_migrations(&self) -> Result<()> {
        info!("Running database migrations");

        sqlx::raw_sql(include_str!("../../migrations/001_initial.sql"))
            .execute(&self.pool)
            .await
            .context("Failed to execute migration 001_initial.sql")?;

        info!("Database migrations completed successfully");
        Ok(())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Checkpoint the WAL into the main database file
    pub async fn flush_wal(&self) -> Result<()> {
        info!("Flushing WAL to disk");

        sqlx::query("PRAGMA wal_checkpoint(TRUNCATE)")
            .execute(&self.pool)
            .await
            .context("Failed to flush WAL")?;

        debug!("WAL flushed successfully");
        Ok(())
    }

    /// Flush the WAL and close every pooled connection
    pub async fn close(self) -> Result<()> {
        info!("Closing database connection");

        self.flush_wal().await?;
        self.pool.close().await;

        info!("Database connection closed");
        Ok(())
    }

    pub fn artifacts(&self) -> ArtifactRepository {
        ArtifactRepository::new(self.pool.clone())
    }

    pub fn research(&self) -> ResearchRepository {
        ResearchRepository::new(self.pool.clone())
    }

    pub fn runs(&self) -> RunRepository {
        RunRepository::new(self.pool.clone())
    }

    pub fn calls(&self) -> CallRepository {
        CallRepository::new(self.pool.clone())
    }

    pub fn bundles(&self) -> BundleRepository {
        BundleRepository::new(self.pool.clone())
    }
}

/// Seconds since the Unix epoch
pub(crate) fn now_secs() -> Result<i64> {
    Ok(SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .context("Failed to get current time")?
        .as_secs() as i64)
}

/// Serialize a value for a TEXT column.
pub(crate) fn to_json_text<T: serde::Serialize>(value: &T, what: &str) -> Result<String> {
    serde_json::to_string(value).with_context(|| format!("Failed to serialize {}", what))
}

/// Decode a TEXT column written by [`to_json_text`].
pub(crate) fn from_json_text<T: serde::de::DeserializeOwned>(text: &str, what: &str) -> Result<T> {
    serde_json::from_str(text).with_context(|| format!("Failed to decode stored {}", what))
}
