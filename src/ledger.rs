//! Missing-key ledger: how often each key was requested in a target locale
//! without a translation.
//!
//! Rows only exist for target locales. `record` is a single
//! `INSERT … ON CONFLICT DO UPDATE`, so concurrent scans observing the same
//! key never create duplicates or lose an increment.

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::debug;

use crate::catalog::{is_translated, CatalogStore};
use crate::db::{escape_like, Database};
use crate::locales::MAX_LOCALE_LEN;

/// Longest key the ledger accepts (matches the column constraint).
pub const MAX_KEY_LEN: usize = 500;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, sqlx::FromRow)]
pub struct MissingKeyRecord {
    pub id: i64,
    pub key: String,
    pub locale: String,
    pub occurrences: i64,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

#[derive(Clone)]
pub struct MissingKeyLedger {
    db: Database,
}

impl MissingKeyLedger {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Insert the (key, locale) pair or bump its occurrence count.
    pub async fn record(&self, key: &str, locale: &str) -> Result<()> {
        if key.chars().count() > MAX_KEY_LEN {
            bail!("Key is longer than {} characters", MAX_KEY_LEN);
        }
        if locale.is_empty() || locale.len() > MAX_LOCALE_LEN {
            bail!("Invalid locale for ledger: '{}'", locale);
        }

        let now = Utc::now();
        sqlx::query(
            "INSERT INTO missing_translations (key, locale, occurrences, first_seen, last_seen)
             VALUES (?1, ?2, 1, ?3, ?3)
             ON CONFLICT (key, locale) DO UPDATE SET
                occurrences = occurrences + 1,
                last_seen = excluded.last_seen",
        )
        .bind(key)
        .bind(locale)
        .bind(now)
        .execute(self.db.pool())
        .await
        .context("Failed to record missing key")?;

        Ok(())
    }

    /// Records for one locale, most frequently requested first.
    pub async fn list_for_locale(&self, locale: &str) -> Result<Vec<MissingKeyRecord>> {
        let records = sqlx::query_as::<_, MissingKeyRecord>(
            "SELECT id, key, locale, occurrences, first_seen, last_seen
             FROM missing_translations
             WHERE locale = ?1
             ORDER BY occurrences DESC, key ASC",
        )
        .bind(locale)
        .fetch_all(self.db.pool())
        .await
        .context("Failed to list missing keys")?;

        Ok(records)
    }

    /// Records across all locales, most recently seen first.
    ///
    /// `locale` restricts to one locale; `search` is a substring match on the key.
    pub async fn list(
        &self,
        locale: Option<&str>,
        search: Option<&str>,
    ) -> Result<Vec<MissingKeyRecord>> {
        let pattern = search
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|s| format!("%{}%", escape_like(s)));

        let records = sqlx::query_as::<_, MissingKeyRecord>(
            "SELECT id, key, locale, occurrences, first_seen, last_seen
             FROM missing_translations
             WHERE (?1 IS NULL OR locale = ?1)
               AND (?2 IS NULL OR key LIKE ?2 ESCAPE '\\')
             ORDER BY last_seen DESC, id DESC",
        )
        .bind(locale)
        .bind(pattern)
        .fetch_all(self.db.pool())
        .await
        .context("Failed to list missing keys")?;

        Ok(records)
    }

    pub async fn get(&self, id: i64) -> Result<Option<MissingKeyRecord>> {
        let record = sqlx::query_as::<_, MissingKeyRecord>(
            "SELECT id, key, locale, occurrences, first_seen, last_seen
             FROM missing_translations WHERE id = ?1",
        )
        .bind(id)
        .fetch_optional(self.db.pool())
        .await
        .context("Failed to load missing key")?;

        Ok(record)
    }

    pub async fn delete(&self, id: i64) -> Result<bool> {
        let result = sqlx::query("DELETE FROM missing_translations WHERE id = ?1")
            .bind(id)
            .execute(self.db.pool())
            .await
            .context("Failed to delete missing key")?;

        Ok(result.rows_affected() > 0)
    }

    pub async fn count(&self) -> Result<i64> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM missing_translations")
            .fetch_one(self.db.pool())
            .await
            .context("Failed to count missing keys")?;

        Ok(count)
    }

    /// Remove the rows for `keys` in `locale`, e.g. after they were translated.
    pub async fn remove_keys<'a, I>(&self, locale: &str, keys: I) -> Result<u64>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut tx = self.db.pool().begin().await?;
        let mut removed = 0;

        for key in keys {
            removed += sqlx::query("DELETE FROM missing_translations WHERE locale = ?1 AND key = ?2")
                .bind(locale)
                .bind(key)
                .execute(&mut *tx)
                .await
                .context("Failed to remove missing key")?
                .rows_affected();
        }

        tx.commit().await?;
        Ok(removed)
    }

    pub async fn clear_locale(&self, locale: &str) -> Result<u64> {
        let result = sqlx::query("DELETE FROM missing_translations WHERE locale = ?1")
            .bind(locale)
            .execute(self.db.pool())
            .await
            .context("Failed to clear missing keys for locale")?;

        Ok(result.rows_affected())
    }

    pub async fn clear_all(&self) -> Result<u64> {
        let result = sqlx::query("DELETE FROM missing_translations")
            .execute(self.db.pool())
            .await
            .context("Failed to clear missing keys")?;

        Ok(result.rows_affected())
    }

    /// Delete every record whose key now has a real translation in its
    /// locale's catalog. Returns how many rows were removed.
    pub async fn purge_resolved(&self, catalogs: &CatalogStore) -> Result<u64> {
        let locales: Vec<(String,)> =
            sqlx::query_as("SELECT DISTINCT locale FROM missing_translations")
                .fetch_all(self.db.pool())
                .await
                .context("Failed to list ledger locales")?;

        let mut purged = 0;
        for (locale,) in locales {
            let catalog = catalogs.read(&locale).await;
            let resolved: Vec<String> = self
                .list_for_locale(&locale)
                .await?
                .into_iter()
                .map(|record| record.key)
                .filter(|key| {
                    catalog
                        .get(key)
                        .map(|value| is_translated(key, value))
                        .unwrap_or(false)
                })
                .collect();

            if !resolved.is_empty() {
                purged += self
                    .remove_keys(&locale, resolved.iter().map(String::as_str))
                    .await?;
            }
        }

        debug!("Purged {} resolved missing keys", purged);
        Ok(purged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tempfile::TempDir;

    async fn create_ledger() -> MissingKeyLedger {
        let db = Database::new("sqlite::memory:")
            .await
            .expect("Failed to create database");
        MissingKeyLedger::new(db)
    }

    // ==================== record Tests ====================

    #[tokio::test]
    async fn test_record_inserts_first_observation() {
        let ledger = create_ledger().await;

        ledger.record("Hello", "es").await.expect("Should record");

        let records = ledger.list_for_locale("es").await.expect("Should list");
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].key, "Hello");
        assert_eq!(records[0].occurrences, 1);
        assert_eq!(records[0].first_seen, records[0].last_seen);
    }

    #[tokio::test]
    async fn test_record_increments_repeat_observation() {
        let ledger = create_ledger().await;

        ledger.record("Hello", "es").await.expect("first");
        ledger.record("Hello", "es").await.expect("second");
        ledger.record("Hello", "ar").await.expect("other locale");

        let es = ledger.list_for_locale("es").await.expect("list");
        assert_eq!(es.len(), 1);
        assert_eq!(es[0].occurrences, 2);
        assert!(es[0].last_seen >= es[0].first_seen);

        assert_eq!(ledger.count().await.expect("count"), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_records_lose_no_increment() {
        let ledger = Arc::new(create_ledger().await);

        let handles: Vec<_> = (0..50)
            .map(|_| {
                let ledger = Arc::clone(&ledger);
                tokio::spawn(async move { ledger.record("Checkout", "es").await })
            })
            .collect();

        for handle in handles {
            handle.await.expect("join").expect("record");
        }

        let records = ledger.list_for_locale("es").await.expect("list");
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].occurrences, 50);
    }

    #[tokio::test]
    async fn test_record_rejects_oversized_input() {
        let ledger = create_ledger().await;

        assert!(ledger.record(&"x".repeat(MAX_KEY_LEN + 1), "es").await.is_err());
        assert!(ledger.record("Hello", "abcdefghijk").await.is_err());
        assert!(ledger.record("Hello", "").await.is_err());
        assert_eq!(ledger.count().await.expect("count"), 0);
    }

    // ==================== list / delete Tests ====================

    #[tokio::test]
    async fn test_list_filters_by_locale_and_search() {
        let ledger = create_ledger().await;
        ledger.record("Sign in", "es").await.expect("record");
        ledger.record("Sign out", "es").await.expect("record");
        ledger.record("Sign in", "ar").await.expect("record");
        ledger.record("100% free", "es").await.expect("record");

        assert_eq!(ledger.list(None, None).await.expect("list").len(), 4);
        assert_eq!(ledger.list(Some("es"), None).await.expect("list").len(), 3);
        assert_eq!(ledger.list(Some("es"), Some("sign")).await.expect("list").len(), 2);
        assert_eq!(ledger.list(None, Some("Sign in")).await.expect("list").len(), 2);

        let percent = ledger.list(None, Some("%")).await.expect("list");
        assert_eq!(percent.len(), 1);
        assert_eq!(percent[0].key, "100% free");
    }

    #[tokio::test]
    async fn test_get_and_delete() {
        let ledger = create_ledger().await;
        ledger.record("Hello", "es").await.expect("record");
        let id = ledger.list_for_locale("es").await.expect("list")[0].id;

        assert!(ledger.get(id).await.expect("get").is_some());
        assert!(ledger.delete(id).await.expect("delete"));
        assert!(!ledger.delete(id).await.expect("delete again"));
        assert!(ledger.get(id).await.expect("get").is_none());
    }

    #[tokio::test]
    async fn test_clear_locale_and_all() {
        let ledger = create_ledger().await;
        ledger.record("A", "es").await.expect("record");
        ledger.record("B", "es").await.expect("record");
        ledger.record("A", "ar").await.expect("record");

        assert_eq!(ledger.clear_locale("es").await.expect("clear"), 2);
        assert_eq!(ledger.count().await.expect("count"), 1);
        assert_eq!(ledger.clear_all().await.expect("clear all"), 1);
        assert_eq!(ledger.count().await.expect("count"), 0);
    }

    // ==================== purge_resolved Tests ====================

    #[tokio::test]
    async fn test_purge_resolved_removes_only_translated_keys() {
        let ledger = create_ledger().await;
        let temp_dir = TempDir::new().expect("temp dir");
        let catalogs = CatalogStore::new(temp_dir.path());

        catalogs.upsert_value("es", "Hello", "Hola").await.expect("upsert");
        catalogs.upsert_value("es", "Bye", "Bye").await.expect("upsert");
        catalogs.upsert_value("es", "Thanks", "").await.expect("upsert");

        for key in ["Hello", "Bye", "Thanks", "Unknown"] {
            ledger.record(key, "es").await.expect("record");
        }
        ledger.record("Hello", "ar").await.expect("record");

        let purged = ledger.purge_resolved(&catalogs).await.expect("purge");
        assert_eq!(purged, 1);

        let remaining: Vec<String> = ledger
            .list_for_locale("es")
            .await
            .expect("list")
            .into_iter()
            .map(|r| r.key)
            .collect();
        assert_eq!(remaining, vec!["Bye", "Thanks", "Unknown"]);
        assert_eq!(ledger.list_for_locale("ar").await.expect("list").len(), 1);
    }

}
