//! Progress tracker: per (task type, locale) counters shown to the operator.
//!
//! Every mutation is a single SQL statement, so `completed` and `completed_at`
//! always change together and concurrent workers never lose an increment.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::catalog::percentage;
use crate::db::Database;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskType {
    Extraction,
    Translation,
}

impl TaskType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskType::Extraction => "extraction",
            TaskType::Translation => "translation",
        }
    }

    fn parse(raw: &str) -> Option<Self> {
        match raw {
            "extraction" => Some(TaskType::Extraction),
            "translation" => Some(TaskType::Translation),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProgressStatus {
    Idle,
    Running,
    Completed,
}

impl ProgressStatus {
    /// `completed` once `completed >= total > 0`, `running` while partially
    /// done, `idle` otherwise (including a batch that has not started yet).
    pub fn derive(total: i64, completed: i64) -> Self {
        if total <= 0 {
            ProgressStatus::Idle
        } else if completed >= total {
            ProgressStatus::Completed
        } else if completed > 0 {
            ProgressStatus::Running
        } else {
            ProgressStatus::Idle
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct ProgressRow {
    task_type: String,
    locale: String,
    total: i64,
    completed: i64,
    failed: i64,
    started_at: Option<DateTime<Utc>>,
    updated_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
}

/// Read-only view of one progress record.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProgressSnapshot {
    pub task_type: TaskType,
    pub locale: Option<String>,
    pub total: i64,
    pub completed: i64,
    pub failed: i64,
    pub percentage: f64,
    pub status: ProgressStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl ProgressSnapshot {
    /// Snapshot for a record that does not exist (yet).
    pub fn idle(task_type: TaskType, locale: Option<&str>) -> Self {
        Self {
            task_type,
            locale: locale.map(str::to_string),
            total: 0,
            completed: 0,
            failed: 0,
            percentage: 0.0,
            status: ProgressStatus::Idle,
            started_at: None,
            updated_at: None,
            completed_at: None,
        }
    }

    fn from_row(row: ProgressRow) -> Option<Self> {
        let task_type = TaskType::parse(&row.task_type)?;
        Some(Self {
            task_type,
            locale: Some(row.locale).filter(|l| !l.is_empty()),
            total: row.total,
            completed: row.completed,
            failed: row.failed,
            percentage: percentage(row.completed.max(0) as usize, row.total.max(0) as usize),
            status: ProgressStatus::derive(row.total, row.completed),
            started_at: row.started_at,
            updated_at: row.updated_at,
            completed_at: row.completed_at,
        })
    }
}

#[derive(Clone)]
pub struct ProgressTracker {
    db: Database,
}

impl ProgressTracker {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Create or reset the record for a new batch of work.
    pub async fn start_batch(&self, task_type: TaskType, locale: Option<&str>, total: u64) -> Result<()> {
        let now = Utc::now();
        sqlx::query(
            "INSERT INTO translation_progress
                (type, locale, total, completed, failed, started_at, updated_at, completed_at)
             VALUES (?1, ?2, ?3, 0, 0, ?4, ?4, NULL)
             ON CONFLICT (type, locale) DO UPDATE SET
                total = excluded.total,
                completed = 0,
                failed = 0,
                started_at = excluded.started_at,
                updated_at = excluded.updated_at,
                completed_at = NULL",
        )
        .bind(task_type.as_str())
        .bind(locale.unwrap_or(""))
        .bind(total as i64)
        .bind(now)
        .execute(self.db.pool())
        .await
        .context("Failed to start progress batch")?;

        Ok(())
    }

    /// Add `n` to `completed`; stamps `completed_at` in the same statement once
    /// the total is reached. A missing record is left alone.
    pub async fn increment_completed(&self, task_type: TaskType, locale: Option<&str>, n: u64) -> Result<()> {
        let now = Utc::now();
        sqlx::query(
            "UPDATE translation_progress SET
                completed = completed + ?3,
                updated_at = ?4,
                completed_at = CASE
                    WHEN completed + ?3 >= total THEN COALESCE(completed_at, ?4)
                    ELSE NULL
                END
             WHERE type = ?1 AND locale = ?2",
        )
        .bind(task_type.as_str())
        .bind(locale.unwrap_or(""))
        .bind(n as i64)
        .bind(now)
        .execute(self.db.pool())
        .await
        .context("Failed to increment completed count")?;

        Ok(())
    }

    /// Add `n` to `failed`. A missing record is left alone.
    pub async fn increment_failed(&self, task_type: TaskType, locale: Option<&str>, n: u64) -> Result<()> {
        sqlx::query(
            "UPDATE translation_progress SET
                failed = failed + ?3,
                updated_at = ?4
             WHERE type = ?1 AND locale = ?2",
        )
        .bind(task_type.as_str())
        .bind(locale.unwrap_or(""))
        .bind(n as i64)
        .bind(Utc::now())
        .execute(self.db.pool())
        .await
        .context("Failed to increment failed count")?;

        Ok(())
    }

    /// Current state of a record, or an idle snapshot if none exists.
    pub async fn get(&self, task_type: TaskType, locale: Option<&str>) -> Result<ProgressSnapshot> {
        let row = sqlx::query_as::<_, ProgressRow>(
            "SELECT type AS task_type, locale, total, completed, failed, started_at, updated_at, completed_at
             FROM translation_progress
             WHERE type = ?1 AND locale = ?2",
        )
        .bind(task_type.as_str())
        .bind(locale.unwrap_or(""))
        .fetch_optional(self.db.pool())
        .await
        .context("Failed to load progress")?;

        Ok(row
            .and_then(ProgressSnapshot::from_row)
            .unwrap_or_else(|| ProgressSnapshot::idle(task_type, locale)))
    }

    pub async fn list(&self) -> Result<Vec<ProgressSnapshot>> {
        let rows = sqlx::query_as::<_, ProgressRow>(
            "SELECT type AS task_type, locale, total, completed, failed, started_at, updated_at, completed_at
             FROM translation_progress
             ORDER BY type, locale",
        )
        .fetch_all(self.db.pool())
        .await
        .context("Failed to list progress")?;

        Ok(rows.into_iter().filter_map(ProgressSnapshot::from_row).collect())
    }

    /// Clear every record. In-flight workers keep running; their later
    /// increments hit no row and are dropped.
    pub async fn reset_all(&self) -> Result<u64> {
        let result = sqlx::query("DELETE FROM translation_progress")
            .execute(self.db.pool())
            .await
            .context("Failed to reset progress")?;

        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::sync::Arc;

    async fn create_tracker() -> ProgressTracker {
        let db = Database::new("sqlite::memory:")
            .await
            .expect("Failed to create database");
        ProgressTracker::new(db)
    }

    // ==================== Status Derivation Tests ====================

    #[test]
    fn test_status_derivation() {
        assert_eq!(ProgressStatus::derive(0, 0), ProgressStatus::Idle);
        assert_eq!(ProgressStatus::derive(0, 5), ProgressStatus::Idle);
        assert_eq!(ProgressStatus::derive(3, 0), ProgressStatus::Idle);
        assert_eq!(ProgressStatus::derive(3, 1), ProgressStatus::Running);
        assert_eq!(ProgressStatus::derive(3, 3), ProgressStatus::Completed);
        assert_eq!(ProgressStatus::derive(3, 4), ProgressStatus::Completed);
    }

    proptest! {
        #[test]
        fn prop_completed_exactly_when_done(total in 0i64..500, completed in 0i64..600) {
            let status = ProgressStatus::derive(total, completed);
            prop_assert_eq!(
                status == ProgressStatus::Completed,
                completed >= total && total > 0
            );
        }

        #[test]
        fn prop_percentage_matches_rounding(total in 0usize..1000, completed in 0usize..1000) {
            let pct = percentage(completed, total);
            if total == 0 {
                prop_assert_eq!(pct, 0.0);
            } else {
                let expected = (completed as f64 / total as f64 * 1000.0).round() / 10.0;
                prop_assert!((pct - expected).abs() < 1e-9);
            }
        }
    }

    // ==================== Tracker Tests ====================

    #[tokio::test]
    async fn test_get_missing_record_is_idle() {
        let tracker = create_tracker().await;

        let snapshot = tracker.get(TaskType::Translation, Some("es")).await.expect("get");
        assert_eq!(snapshot, ProgressSnapshot::idle(TaskType::Translation, Some("es")));
    }

    #[tokio::test]
    async fn test_batch_lifecycle() {
        let tracker = create_tracker().await;
        tracker.start_batch(TaskType::Extraction, None, 3).await.expect("start");

        tracker.increment_completed(TaskType::Extraction, None, 1).await.expect("inc");
        let running = tracker.get(TaskType::Extraction, None).await.expect("get");
        assert_eq!(running.status, ProgressStatus::Running);
        assert_eq!(running.percentage, 33.3);
        assert!(running.completed_at.is_none());
        assert!(running.locale.is_none());

        tracker.increment_failed(TaskType::Extraction, None, 1).await.expect("fail");
        tracker.increment_completed(TaskType::Extraction, None, 2).await.expect("inc");

        let done = tracker.get(TaskType::Extraction, None).await.expect("get");
        assert_eq!(done.total, 3);
        assert_eq!(done.completed, 3);
        assert_eq!(done.failed, 1);
        assert_eq!(done.percentage, 100.0);
        assert_eq!(done.status, ProgressStatus::Completed);
        assert!(done.completed_at.is_some());
    }

    #[tokio::test]
    async fn test_start_batch_resets_existing_record() {
        let tracker = create_tracker().await;
        tracker.start_batch(TaskType::Translation, Some("es"), 2).await.expect("start");
        tracker.increment_completed(TaskType::Translation, Some("es"), 2).await.expect("inc");
        tracker.increment_failed(TaskType::Translation, Some("es"), 1).await.expect("fail");

        tracker.start_batch(TaskType::Translation, Some("es"), 10).await.expect("restart");

        let snapshot = tracker.get(TaskType::Translation, Some("es")).await.expect("get");
        assert_eq!(snapshot.total, 10);
        assert_eq!(snapshot.completed, 0);
        assert_eq!(snapshot.failed, 0);
        assert!(snapshot.completed_at.is_none());
        assert_eq!(tracker.list().await.expect("list").len(), 1);
    }

    #[tokio::test]
    async fn test_locales_are_tracked_separately() {
        let tracker = create_tracker().await;
        tracker.start_batch(TaskType::Translation, Some("es"), 2).await.expect("start");
        tracker.start_batch(TaskType::Translation, Some("ar"), 4).await.expect("start");
        tracker.start_batch(TaskType::Extraction, None, 1).await.expect("start");

        tracker.increment_completed(TaskType::Translation, Some("ar"), 1).await.expect("inc");

        let es = tracker.get(TaskType::Translation, Some("es")).await.expect("get");
        let ar = tracker.get(TaskType::Translation, Some("ar")).await.expect("get");
        assert_eq!(es.completed, 0);
        assert_eq!(ar.completed, 1);
        assert_eq!(tracker.list().await.expect("list").len(), 3);
    }

    #[tokio::test]
    async fn test_increment_without_record_is_noop() {
        let tracker = create_tracker().await;

        tracker.increment_completed(TaskType::Extraction, None, 1).await.expect("inc");
        tracker.increment_failed(TaskType::Extraction, None, 1).await.expect("fail");

        assert!(tracker.list().await.expect("list").is_empty());
    }

    #[tokio::test]
    async fn test_reset_all() {
        let tracker = create_tracker().await;
        tracker.start_batch(TaskType::Extraction, None, 1).await.expect("start");
        tracker.start_batch(TaskType::Translation, Some("es"), 1).await.expect("start");

        assert_eq!(tracker.reset_all().await.expect("reset"), 2);
        let snapshot = tracker.get(TaskType::Extraction, None).await.expect("get");
        assert_eq!(snapshot.status, ProgressStatus::Idle);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_increments_are_not_lost() {
        let tracker = Arc::new(create_tracker().await);
        tracker.start_batch(TaskType::Extraction, None, 40).await.expect("start");

        let handles: Vec<_> = (0..40)
            .map(|_| {
                let tracker = Arc::clone(&tracker);
                tokio::spawn(async move {
                    tracker.increment_completed(TaskType::Extraction, None, 1).await
                })
            })
            .collect();
        for handle in handles {
            handle.await.expect("join").expect("inc");
        }

        let snapshot = tracker.get(TaskType::Extraction, None).await.expect("get");
        assert_eq!(snapshot.completed, 40);
        assert_eq!(snapshot.status, ProgressStatus::Completed);
        assert!(snapshot.completed_at.is_some());
    }
}
