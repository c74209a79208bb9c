//! URL registry: the deduplicated set of pages to scan and of API endpoints
//! that return further page URLs.
//!
//! A URL is unique across the whole registry whatever its kind. Endpoints are
//! never scanned themselves; fetching one yields a JSON array of page URLs.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tracing::{error, info, warn};

use crate::db::{escape_like, Database};
use crate::retry::{with_retry_if, RetryConfig};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UrlKind {
    Page,
    ApiEndpoint,
}

impl UrlKind {
    fn is_api(self) -> bool {
        matches!(self, UrlKind::ApiEndpoint)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UrlEntry {
    pub id: i64,
    pub url: String,
    pub active: bool,
    pub kind: UrlKind,
    pub created_at: DateTime<Utc>,
}

#[derive(sqlx::FromRow)]
struct UrlRow {
    id: i64,
    url: String,
    active: bool,
    is_api: bool,
    created_at: DateTime<Utc>,
}

impl From<UrlRow> for UrlEntry {
    fn from(row: UrlRow) -> Self {
        Self {
            id: row.id,
            url: row.url,
            active: row.active,
            kind: if row.is_api {
                UrlKind::ApiEndpoint
            } else {
                UrlKind::Page
            },
            created_at: row.created_at,
        }
    }
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("endpoint returned HTTP {0}")]
    Status(reqwest::StatusCode),
}

impl FetchError {
    /// Client errors other than 429 will not change on retry
    fn is_retryable(&self) -> bool {
        match self {
            FetchError::Request(_) => true,
            FetchError::Status(status) => {
                status.as_u16() == 429 || status.is_server_error()
            }
        }
    }
}

#[derive(Clone)]
pub struct UrlRegistry {
    db: Database,
    client: reqwest::Client,
    retry: RetryConfig,
}

impl UrlRegistry {
    pub fn new(db: Database, fetch_timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(fetch_timeout)
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            db,
            client,
            retry: RetryConfig::endpoint_fetch(),
        })
    }

    /// Override the retry policy used for endpoint fetches.
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Register a URL. Returns false if it is empty after trimming or already
    /// registered (as any kind).
    pub async fn add(&self, url: &str, kind: UrlKind) -> Result<bool> {
        let url = url.trim();
        if url.is_empty() {
            return Ok(false);
        }

        let result = sqlx::query(
            "INSERT INTO translation_urls (url, active, is_api, created_at)
             VALUES (?1, 1, ?2, ?3)
             ON CONFLICT (url) DO NOTHING",
        )
        .bind(url)
        .bind(kind.is_api())
        .bind(Utc::now())
        .execute(self.db.pool())
        .await
        .context("Failed to add URL")?;

        Ok(result.rows_affected() > 0)
    }

    /// Register many page URLs; returns how many were new.
    pub async fn add_bulk<I, S>(&self, urls: I) -> Result<usize>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut added = 0;
        for url in urls {
            if self.add(url.as_ref(), UrlKind::Page).await? {
                added += 1;
            }
        }
        info!("Bulk added {} URLs", added);
        Ok(added)
    }

    /// Active page URLs in insertion order.
    pub async fn list_scannable(&self) -> Result<Vec<String>> {
        let urls: Vec<(String,)> = sqlx::query_as(
            "SELECT url FROM translation_urls WHERE active = 1 AND is_api = 0 ORDER BY id",
        )
        .fetch_all(self.db.pool())
        .await
        .context("Failed to list scannable URLs")?;

        Ok(urls.into_iter().map(|(url,)| url).collect())
    }

    pub async fn count_scannable(&self) -> Result<i64> {
        let (count,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM translation_urls WHERE active = 1 AND is_api = 0")
                .fetch_one(self.db.pool())
                .await
                .context("Failed to count scannable URLs")?;

        Ok(count)
    }

    pub async fn count_by_kind(&self, kind: UrlKind) -> Result<i64> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM translation_urls WHERE is_api = ?1")
            .bind(kind.is_api())
            .fetch_one(self.db.pool())
            .await
            .context("Failed to count URLs")?;

        Ok(count)
    }

    /// Entries of one kind, newest first, optionally filtered by substring.
    pub async fn list(&self, kind: UrlKind, filter: Option<&str>) -> Result<Vec<UrlEntry>> {
        let pattern = filter
            .map(str::trim)
            .filter(|f| !f.is_empty())
            .map(|f| format!("%{}%", escape_like(f)));

        let rows = sqlx::query_as::<_, UrlRow>(
            "SELECT id, url, active, is_api, created_at
             FROM translation_urls
             WHERE is_api = ?1 AND (?2 IS NULL OR url LIKE ?2 ESCAPE '\\')
             ORDER BY id DESC",
        )
        .bind(kind.is_api())
        .bind(pattern)
        .fetch_all(self.db.pool())
        .await
        .context("Failed to list URLs")?;

        Ok(rows.into_iter().map(UrlEntry::from).collect())
    }

    /// Flip the active flag. Returns false if the id does not exist.
    pub async fn toggle_active(&self, id: i64) -> Result<bool> {
        let result = sqlx::query("UPDATE translation_urls SET active = 1 - active WHERE id = ?1")
            .bind(id)
            .execute(self.db.pool())
            .await
            .context("Failed to toggle URL")?;

        Ok(result.rows_affected() > 0)
    }

    pub async fn remove(&self, id: i64) -> Result<bool> {
        let result = sqlx::query("DELETE FROM translation_urls WHERE id = ?1")
            .bind(id)
            .execute(self.db.pool())
            .await
            .context("Failed to remove URL")?;

        Ok(result.rows_affected() > 0)
    }

    pub async fn clear_by_kind(&self, kind: UrlKind) -> Result<u64> {
        let result = sqlx::query("DELETE FROM translation_urls WHERE is_api = ?1")
            .bind(kind.is_api())
            .execute(self.db.pool())
            .await
            .context("Failed to clear URLs")?;

        Ok(result.rows_affected())
    }

    pub async fn clear_all(&self) -> Result<u64> {
        let result = sqlx::query("DELETE FROM translation_urls")
            .execute(self.db.pool())
            .await
            .context("Failed to clear URLs")?;

        Ok(result.rows_affected())
    }

    /// Register `endpoint` as an API endpoint, fetch it, and add every URL it
    /// returns as a page. Never fails: errors are logged and count as zero.
    pub async fn import_from_endpoint(&self, endpoint: &str) -> usize {
        let endpoint = endpoint.trim();
        if endpoint.is_empty() {
            return 0;
        }

        if let Err(e) = self.add(endpoint, UrlKind::ApiEndpoint).await {
            error!("Failed to register endpoint {}: {:#}", endpoint, e);
            return 0;
        }

        let added = self.import_urls(endpoint).await;
        info!("Collected {} new URLs from {}", added, endpoint);
        added
    }

    pub async fn import_from_endpoints<I, S>(&self, endpoints: I) -> usize
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut total = 0;
        for endpoint in endpoints {
            total += self.import_from_endpoint(endpoint.as_ref()).await;
        }
        total
    }

    /// Re-fetch every active endpoint. Already known URLs are skipped by the
    /// uniqueness constraint, so only new pages are counted.
    pub async fn refresh_all(&self) -> usize {
        let endpoints: Vec<(String,)> = match sqlx::query_as(
            "SELECT url FROM translation_urls WHERE active = 1 AND is_api = 1 ORDER BY id",
        )
        .fetch_all(self.db.pool())
        .await
        {
            Ok(endpoints) => endpoints,
            Err(e) => {
                error!("Failed to list API endpoints: {}", e);
                return 0;
            }
        };

        let mut total = 0;
        for (endpoint,) in &endpoints {
            total += self.import_urls(endpoint).await;
        }

        info!(
            "Refreshed {} API endpoints, added {} new URLs",
            endpoints.len(),
            total
        );
        total
    }

    async fn import_urls(&self, endpoint: &str) -> usize {
        let urls = match self.fetch_urls(endpoint).await {
            Ok(urls) => urls,
            Err(e) => {
                error!("Failed to collect URLs from {}: {}", endpoint, e);
                return 0;
            }
        };

        let mut added = 0;
        for url in urls {
            match self.add(&url, UrlKind::Page).await {
                Ok(true) => added += 1,
                Ok(false) => {}
                Err(e) => warn!("Failed to add URL {} from {}: {:#}", url, endpoint, e),
            }
        }
        added
    }

    /// GET the endpoint and return the non-empty strings of its JSON array.
    /// Any other JSON shape yields no URLs.
    async fn fetch_urls(&self, endpoint: &str) -> Result<Vec<String>, FetchError> {
        let body: serde_json::Value = with_retry_if(
            &self.retry,
            &format!("Fetch {}", endpoint),
            || async {
                let response = self.client.get(endpoint).send().await?;
                if !response.status().is_success() {
                    return Err(FetchError::Status(response.status()));
                }
                Ok(response.json::<serde_json::Value>().await?)
            },
            FetchError::is_retryable,
        )
        .await?;

        let Some(items) = body.as_array() else {
            warn!("Endpoint {} did not return a JSON array", endpoint);
            return Ok(Vec::new());
        };

        Ok(items
            .iter()
            .filter_map(|item| item.as_str())
            .map(|url| url.trim().to_string())
            .filter(|url| !url.is_empty())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::{
        matchers::{method, path},
        Mock, MockServer, ResponseTemplate,
    };

    // ==================== Helper Functions ====================

    async fn create_registry() -> UrlRegistry {
        let db = Database::new("sqlite::memory:")
            .await
            .expect("Failed to create database");
        UrlRegistry::new(db, Duration::from_secs(5))
            .expect("Should build registry")
            .with_retry(RetryConfig::new(2, Duration::from_millis(10)))
    }

    // ==================== add Tests ====================

    #[tokio::test]
    async fn test_add_trims_and_dedups() {
        let registry = create_registry().await;

        assert!(registry.add("  https://site.test/about  ", UrlKind::Page).await.expect("add"));
        assert!(!registry.add("https://site.test/about", UrlKind::Page).await.expect("dup"));
        assert!(!registry.add("   ", UrlKind::Page).await.expect("empty"));

        assert_eq!(
            registry.list_scannable().await.expect("list"),
            vec!["https://site.test/about"]
        );
    }

    #[tokio::test]
    async fn test_url_unique_across_kinds() {
        let registry = create_registry().await;

        assert!(registry.add("https://site.test/api/pages", UrlKind::ApiEndpoint).await.expect("add"));
        assert!(!registry.add("https://site.test/api/pages", UrlKind::Page).await.expect("dup"));
        assert!(registry.list_scannable().await.expect("list").is_empty());
    }

    #[tokio::test]
    async fn test_add_bulk_counts_new_only() {
        let registry = create_registry().await;

        let added = registry
            .add_bulk(["https://a.test/", "https://b.test/", "https://a.test/", ""])
            .await
            .expect("bulk");

        assert_eq!(added, 2);
        assert_eq!(registry.count_scannable().await.expect("count"), 2);
    }

    // ==================== toggle / remove / clear Tests ====================

    #[tokio::test]
    async fn test_toggle_active_excludes_from_scan() {
        let registry = create_registry().await;
        registry.add_bulk(["https://a.test/", "https://b.test/"]).await.expect("bulk");
        let entries = registry.list(UrlKind::Page, None).await.expect("list");
        let a = entries.iter().find(|e| e.url == "https://a.test/").expect("a");

        assert!(registry.toggle_active(a.id).await.expect("toggle"));
        assert_eq!(registry.list_scannable().await.expect("list"), vec!["https://b.test/"]);

        assert!(registry.toggle_active(a.id).await.expect("toggle back"));
        assert_eq!(registry.list_scannable().await.expect("list").len(), 2);

        assert!(!registry.toggle_active(9999).await.expect("missing"));
    }

    #[tokio::test]
    async fn test_remove_and_clear() {
        let registry = create_registry().await;
        registry.add_bulk(["https://a.test/", "https://b.test/"]).await.expect("bulk");
        registry.add("https://a.test/api", UrlKind::ApiEndpoint).await.expect("api");

        let id = registry.list(UrlKind::Page, None).await.expect("list")[0].id;
        assert!(registry.remove(id).await.expect("remove"));
        assert!(!registry.remove(id).await.expect("remove again"));

        assert_eq!(registry.clear_by_kind(UrlKind::ApiEndpoint).await.expect("clear"), 1);
        assert_eq!(registry.count_by_kind(UrlKind::Page).await.expect("count"), 1);
        assert_eq!(registry.clear_all().await.expect("clear all"), 1);
        assert_eq!(registry.count_by_kind(UrlKind::Page).await.expect("count"), 0);
    }

    #[tokio::test]
    async fn test_list_newest_first_with_filter() {
        let registry = create_registry().await;
        registry
            .add_bulk(["https://a.test/blog/1", "https://a.test/about", "https://a.test/blog/2"])
            .await
            .expect("bulk");

        let blog = registry.list(UrlKind::Page, Some("blog")).await.expect("list");
        let urls: Vec<&str> = blog.iter().map(|e| e.url.as_str()).collect();
        assert_eq!(urls, vec!["https://a.test/blog/2", "https://a.test/blog/1"]);
        assert!(blog.iter().all(|e| e.active && e.kind == UrlKind::Page));
    }

    #[tokio::test]
    async fn test_list_filter_treats_wildcards_literally() {
        let registry = create_registry().await;
        registry
            .add_bulk(["https://a.test/sale_2024", "https://a.test/saleX2024", "https://a.test/100%"])
            .await
            .expect("bulk");

        let underscore = registry.list(UrlKind::Page, Some("sale_")).await.expect("list");
        let urls: Vec<&str> = underscore.iter().map(|e| e.url.as_str()).collect();
        assert_eq!(urls, vec!["https://a.test/sale_2024"]);

        let percent = registry.list(UrlKind::Page, Some("%")).await.expect("list");
        assert_eq!(percent.len(), 1);
        assert_eq!(percent[0].url, "https://a.test/100%");
    }

    // ==================== Endpoint Import Tests ====================

    #[tokio::test]
    async fn test_import_from_endpoint_adds_pages_and_registers_endpoint() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/pages"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
                "https://site.test/a",
                " https://site.test/b ",
                "",
                42,
                "https://site.test/a"
            ])))
            .mount(&mock_server)
            .await;

        let registry = create_registry().await;
        let endpoint = format!("{}/api/pages", mock_server.uri());

        let added = registry.import_from_endpoint(&endpoint).await;

        assert_eq!(added, 2);
        assert_eq!(
            registry.list_scannable().await.expect("list"),
            vec!["https://site.test/a", "https://site.test/b"]
        );
        let endpoints = registry.list(UrlKind::ApiEndpoint, None).await.expect("list");
        assert_eq!(endpoints.len(), 1);
        assert_eq!(endpoints[0].url, endpoint);
    }

    #[tokio::test]
    async fn test_import_from_failing_endpoint_adds_nothing() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/broken"))
            .respond_with(ResponseTemplate::new(500))
            .expect(2)
            .mount(&mock_server)
            .await;

        let registry = create_registry().await;
        let endpoint = format!("{}/api/broken", mock_server.uri());

        assert_eq!(registry.import_from_endpoint(&endpoint).await, 0);
        // The endpoint is still registered for later refreshes
        assert_eq!(registry.count_by_kind(UrlKind::ApiEndpoint).await.expect("count"), 1);
    }

    #[tokio::test]
    async fn test_import_does_not_retry_not_found() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/missing"))
            .respond_with(ResponseTemplate::new(404))
            .expect(1)
            .mount(&mock_server)
            .await;

        let registry = create_registry().await;
        let endpoint = format!("{}/api/missing", mock_server.uri());

        assert_eq!(registry.import_from_endpoint(&endpoint).await, 0);
    }

    #[tokio::test]
    async fn test_import_non_array_body_adds_nothing() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/object"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"urls": []})))
            .mount(&mock_server)
            .await;

        let registry = create_registry().await;
        let endpoint = format!("{}/api/object", mock_server.uri());

        assert_eq!(registry.import_from_endpoint(&endpoint).await, 0);
    }

    #[tokio::test]
    async fn test_refresh_all_accumulates_new_urls() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/pages"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!(["https://site.test/a"])),
            )
            .up_to_n_times(1)
            .mount(&mock_server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/pages"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
                "https://site.test/a",
                "https://site.test/new"
            ])))
            .mount(&mock_server)
            .await;

        let registry = create_registry().await;
        let endpoint = format!("{}/api/pages", mock_server.uri());

        assert_eq!(registry.import_from_endpoint(&endpoint).await, 1);
        assert_eq!(registry.refresh_all().await, 1);
        assert_eq!(registry.count_scannable().await.expect("count"), 2);
    }

    #[tokio::test]
    async fn test_refresh_all_skips_inactive_endpoints() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/pages"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!(["https://site.test/a"])),
            )
            .expect(0)
            .mount(&mock_server)
            .await;

        let registry = create_registry().await;
        let endpoint = format!("{}/api/pages", mock_server.uri());
        registry.add(&endpoint, UrlKind::ApiEndpoint).await.expect("add");
        let id = registry.list(UrlKind::ApiEndpoint, None).await.expect("list")[0].id;
        registry.toggle_active(id).await.expect("toggle");

        assert_eq!(registry.refresh_all().await, 0);
    }
}
