//! Database module for SQLite persistence.
//!
//! SQLite backs the shared document store: cached datasets and user records
//! live in a single versioned `documents` table.

mod document_store;

pub use document_store::*;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use std::str::FromStr;

/// Initialize the database connection pool and run migrations.
pub async fn init_database(db_path: &Path) -> Result<SqlitePool, sqlx::Error> {
    // Ensure the parent directory exists
    if let Some(parent) = db_path.parent() {
        tokio::fs::create_dir_all(parent).await.ok();
    }

    let db_url = format!("sqlite:{}?mode=rwc", db_path.display());

    let options = SqliteConnectOptions::from_str(&db_url)?
        .create_if_missing(true)
        .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
        .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
        .busy_timeout(std::time::Duration::from_secs(30));

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await?;

    run_migrations(&pool).await?;

    Ok(pool)
}

/// Run database migrations.
async fn run_migrations(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS documents (
            path TEXT PRIMARY KEY,
            value TEXT NOT NULL,
            version INTEGER NOT NULL,
            updated_at TEXT NOT NULL
        );
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS document_versions (
            id INTEGER PRIMARY KEY CHECK (id = 1),
            last_version INTEGER NOT NULL DEFAULT 0
        );

        INSERT OR IGNORE INTO document_versions (id, last_version) VALUES (1, 0);
        "#,
    )
    .execute(pool)
    .await?;

    // Versions come from a store-wide counter so a deleted and recreated
    // document never reuses a version a stale writer might still hold.
    sqlx::query(
        r#"
        CREATE TRIGGER IF NOT EXISTS documents_version_on_insert
        AFTER INSERT ON documents
        BEGIN
            UPDATE document_versions SET last_version = NEW.version WHERE id = 1;
        END;

        CREATE TRIGGER IF NOT EXISTS documents_version_on_update
        AFTER UPDATE OF version ON documents
        BEGIN
            UPDATE document_versions SET last_version = NEW.version WHERE id = 1;
        END;
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}
