use anyhow::{anyhow, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, warn};
use url::Url;

use super::buffer::flush_keys;
use super::context::{CollectionContext, CollectionMode};
use super::filter::KeyFilter;
use crate::bookkeeping::best_effort;
use crate::catalog::CatalogStore;
use crate::ledger::MissingKeyLedger;
use crate::progress::{ProgressTracker, TaskType};
use crate::render::Renderer;

/// Scans one page URL for translatable strings.
pub struct PageScanner {
    renderer: Arc<dyn Renderer>,
    filter: Arc<dyn KeyFilter>,
    catalogs: Arc<CatalogStore>,
    ledger: MissingKeyLedger,
    progress: ProgressTracker,
    source_locale: String,
    /// Present when the renderer cannot run concurrently
    gate: Option<Mutex<()>>,
    render_timeout: Option<Duration>,
}

impl PageScanner {
    pub fn new(
        renderer: Arc<dyn Renderer>,
        filter: Arc<dyn KeyFilter>,
        catalogs: Arc<CatalogStore>,
        ledger: MissingKeyLedger,
        progress: ProgressTracker,
        source_locale: impl Into<String>,
    ) -> Self {
        let gate = if renderer.supports_concurrent_renders() {
            None
        } else {
            Some(Mutex::new(()))
        };

        Self {
            renderer,
            filter,
            catalogs,
            ledger,
            progress,
            source_locale: source_locale.into(),
            gate,
            render_timeout: None,
        }
    }

    /// Give up on a render after `timeout`. Keys reported before that are
    /// still flushed.
    pub fn with_render_timeout(mut self, timeout: Duration) -> Self {
        self.render_timeout = Some(timeout);
        self
    }

    /// Render `url` in collection mode and flush what it reported.
    ///
    /// The flush happens whether the render succeeded, failed or timed out.
    /// On success the
    /// extraction `completed` counter moves by one; on failure `failed` does
    /// and the error is returned for the retry layer. Returns the number of
    /// keys new to the source catalog.
    pub async fn scan(&self, url: &str) -> Result<usize> {
        let ctx = CollectionContext::new(
            CollectionMode::Scan,
            self.source_locale.as_str(),
            Arc::clone(&self.filter),
        );

        let result = match path_and_query(url) {
            Ok(target) => {
                let _gate = match &self.gate {
                    Some(gate) => Some(gate.lock().await),
                    None => None,
                };
                self.render(&target, &ctx).await
            }
            Err(e) => Err(e),
        };
        ctx.finish();

        let added = flush_keys(ctx.take_keys(), &self.catalogs, &self.ledger, &self.source_locale).await;

        match result {
            Ok(()) => {
                debug!("Scanned {} ({} new keys)", url, added);
                best_effort(
                    "Extraction progress update",
                    self.progress.increment_completed(TaskType::Extraction, None, 1),
                )
                .await;
                Ok(added)
            }
            Err(e) => {
                warn!("Failed to scan {}: {:#}", url, e);
                best_effort(
                    "Extraction progress update",
                    self.progress.increment_failed(TaskType::Extraction, None, 1),
                )
                .await;
                Err(e.context(format!("Failed to scan {}", url)))
            }
        }
    }

    async fn render(&self, target: &str, ctx: &CollectionContext) -> Result<()> {
        let Some(limit) = self.render_timeout else {
            return self.renderer.render(target, ctx).await;
        };

        match tokio::time::timeout(limit, self.renderer.render(target, ctx)).await {
            Ok(result) => result,
            Err(_) => Err(anyhow!("Render of {} timed out after {:?}", target, limit)),
        }
    }
}

/// The part of a URL handed to the renderer: path plus query, no host.
/// Bare paths are accepted as they are.
fn path_and_query(url: &str) -> Result<String> {
    let url = url.trim();
    if url.starts_with('/') {
        return Ok(url.to_string());
    }

    let parsed = Url::parse(url).map_err(|e| anyhow!("Invalid URL '{}': {}", url, e))?;
    let mut target = parsed.path().to_string();
    if target.is_empty() {
        target.push('/');
    }
    if let Some(query) = parsed.query() {
        target.push('?');
        target.push_str(query);
    }
    Ok(target)
}
