use anyhow::{Context, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use std::str::FromStr;
use std::time::Duration;
use tracing::info;

/// Shared handle to the pipeline database.
///
/// Holds the URL registry, the missing-key ledger and the progress records.
/// Catalogs live on disk as JSON files, not here.
#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Connect and create tables if they do not exist yet.
    ///
    /// An in-memory URL (`sqlite::memory:`) is limited to a single connection,
    /// since every SQLite memory connection is its own database.
    pub async fn new(database_url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(database_url)
            .with_context(|| format!("Invalid database URL: {}", database_url))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(10));

        let max_connections = if database_url.contains(":memory:") { 1 } else { 5 };

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await
            .with_context(|| format!("Failed to open database at {}", database_url))?;

        let db = Self { pool };
        db.create_tables().await?;

        info!("✓ Database ready ({})", database_url);
        Ok(db)
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn create_tables(&self) -> Result<()> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS translation_urls (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                url TEXT NOT NULL UNIQUE,
                active INTEGER NOT NULL DEFAULT 1,
                is_api INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL
            )",
        )
        .execute(&self.pool)
        .await
        .context("Failed to create translation_urls table")?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_translation_urls_active_kind
             ON translation_urls (active, is_api)",
        )
        .execute(&self.pool)
        .await
        .context("Failed to create translation_urls index")?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS missing_translations (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                key TEXT NOT NULL CHECK (length(key) <= 500),
                locale TEXT NOT NULL CHECK (length(locale) <= 10),
                occurrences INTEGER NOT NULL DEFAULT 1,
                first_seen TEXT NOT NULL,
                last_seen TEXT NOT NULL,
                UNIQUE (key, locale)
            )",
        )
        .execute(&self.pool)
        .await
        .context("Failed to create missing_translations table")?;

        // Extraction rows store locale as '' so the unique constraint applies
        // (SQLite treats NULLs as distinct)
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS translation_progress (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                type TEXT NOT NULL,
                locale TEXT NOT NULL DEFAULT '',
                total INTEGER NOT NULL DEFAULT 0,
                completed INTEGER NOT NULL DEFAULT 0,
                failed INTEGER NOT NULL DEFAULT 0,
                started_at TEXT,
                updated_at TEXT,
                completed_at TEXT,
                UNIQUE (type, locale)
            )",
        )
        .execute(&self.pool)
        .await
        .context("Failed to create translation_progress table")?;

        Ok(())
    }
}

/// Escape `%`, `_` and the escape character itself for a LIKE pattern
/// used with `ESCAPE '\\'`.
pub fn escape_like(raw: &str) -> String {
    let mut escaped = String::with_capacity(raw.len());
    for c in raw.chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_memory_database_creates_tables() {
        let db = Database::new("sqlite::memory:")
            .await
            .expect("Should open memory database");

        let tables: Vec<(String,)> = sqlx::query_as(
            "SELECT name FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name",
        )
        .fetch_all(db.pool())
        .await
        .expect("Should list tables");

        let names: Vec<&str> = tables.iter().map(|(n,)| n.as_str()).collect();
        assert_eq!(
            names,
            vec!["missing_translations", "translation_progress", "translation_urls"]
        );
    }

    #[tokio::test]
    async fn test_database_reopening_keeps_data() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let url = format!("sqlite://{}", temp_dir.path().join("test.db").display());

        {
            let db = Database::new(&url).await.expect("Should create database");
            sqlx::query("INSERT INTO translation_urls (url, created_at) VALUES ('https://a.test/', '2024-01-01T00:00:00Z')")
                .execute(db.pool())
                .await
                .expect("Should insert");
        }

        let db = Database::new(&url).await.expect("Should reopen database");
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM translation_urls")
            .fetch_one(db.pool())
            .await
            .expect("Should count");
        assert_eq!(count, 1, "Row should persist");
    }

    #[test]
    fn test_escape_like() {
        assert_eq!(escape_like("50%_off\\"), "50\\%\\_off\\\\");
        assert_eq!(escape_like("plain"), "plain");
    }

    #[tokio::test]
    async fn test_invalid_database_path() {
        let result = Database::new("sqlite:///non/existent/path/db.db").await;
        assert!(result.is_err());
    }
}
