//! Operator actions.
//!
//! [`Pipeline`] wires the stores, the job queue and the collaborators
//! together and exposes every dashboard action. Actions never fail outright:
//! they report a [`StatusMessage`] for the operator instead.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info};

use crate::bookkeeping::best_effort;
use crate::catalog::{Catalog, CatalogStore, EditableEntry, TranslationStatus};
use crate::config::Config;
use crate::db::Database;
use crate::jobs::{Job, JobHandler, JobPolicy, WorkerPool};
use crate::ledger::{MissingKeyLedger, MissingKeyRecord};
use crate::locales::LocaleSet;
use crate::pipeline::{
    flush_keys, CollectionContext, CollectionMode, KeyFilter, PageScanner, TranslationBatch,
    TranslationWorker,
};
use crate::progress::{ProgressSnapshot, ProgressTracker, TaskType};
use crate::registry::{UrlEntry, UrlKind, UrlRegistry};
use crate::render::Renderer;
use crate::translator::{MetricsReport, Translate};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StatusLevel {
    Success,
    Info,
    Warning,
    Error,
}

/// Outcome of an operator action, shown as a one-line notice.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusMessage {
    pub level: StatusLevel,
    pub text: String,
}

impl StatusMessage {
    pub fn success(text: impl Into<String>) -> Self {
        Self { level: StatusLevel::Success, text: text.into() }
    }

    pub fn info(text: impl Into<String>) -> Self {
        Self { level: StatusLevel::Info, text: text.into() }
    }

    pub fn warning(text: impl Into<String>) -> Self {
        Self { level: StatusLevel::Warning, text: text.into() }
    }

    pub fn error(text: impl Into<String>) -> Self {
        Self { level: StatusLevel::Error, text: text.into() }
    }

    fn from_error(e: anyhow::Error) -> Self {
        error!("Operator action failed: {:#}", e);
        Self::error(format!("Error: {:#}", e))
    }

    pub fn is_error(&self) -> bool {
        self.level == StatusLevel::Error
    }
}

/// Pluggable parts of the pipeline.
pub struct Collaborators {
    pub renderer: Arc<dyn Renderer>,
    pub translator: Arc<dyn Translate>,
    pub filter: Arc<dyn KeyFilter>,
}

/// One text lookup made while the live site rendered a page.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Lookup {
    pub key: String,
    pub locale: String,
    /// Whether the locale's catalog had a value for the key
    #[serde(default)]
    pub found: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct LocaleOverview {
    pub locale: String,
    pub name: String,
    pub status: TranslationStatus,
    pub progress: ProgressSnapshot,
}

/// Everything the dashboard shows at a glance.
#[derive(Debug, Clone, Serialize)]
pub struct Overview {
    pub source_locale: String,
    pub source_keys: usize,
    pub page_urls: i64,
    pub scannable_urls: i64,
    pub api_endpoints: i64,
    pub missing_keys: i64,
    pub translator_configured: bool,
    /// `None` for translators that keep no counters
    pub translator_metrics: Option<MetricsReport>,
    pub extraction: ProgressSnapshot,
    pub locales: Vec<LocaleOverview>,
}

pub struct Pipeline {
    locales: LocaleSet,
    batch_size: usize,
    catalogs: Arc<CatalogStore>,
    ledger: MissingKeyLedger,
    progress: ProgressTracker,
    registry: UrlRegistry,
    translator: Arc<dyn Translate>,
    filter: Arc<dyn KeyFilter>,
    jobs: WorkerPool,
}

impl Pipeline {
    /// Build every store on `db` and start the job workers.
    ///
    /// Must be called inside a tokio runtime.
    pub fn build(config: &Config, db: Database, collaborators: Collaborators) -> Result<Self> {
        let locales = config.locales()?;
        let catalogs = Arc::new(CatalogStore::new(&config.lang_dir));
        let ledger = MissingKeyLedger::new(db.clone());
        let progress = ProgressTracker::new(db.clone());
        let registry = UrlRegistry::new(db, config.url_fetch_timeout())?;

        let scanner = Arc::new(PageScanner::new(
            collaborators.renderer,
            Arc::clone(&collaborators.filter),
            Arc::clone(&catalogs),
            ledger.clone(),
            progress.clone(),
            locales.source(),
        )
        .with_render_timeout(config.scan_timeout()));
        let worker = Arc::new(TranslationWorker::new(
            Arc::clone(&collaborators.translator),
            Arc::clone(&catalogs),
            ledger.clone(),
            progress.clone(),
            Duration::from_millis(config.translation_call_delay_ms),
        ));
        let handler = Arc::new(JobHandler::new(
            scanner,
            worker,
            progress.clone(),
            JobPolicy::from_config(config),
        ));
        let jobs = WorkerPool::start(config.worker_count, handler);

        Ok(Self {
            locales,
            batch_size: config.translation_batch_size.max(1),
            catalogs,
            ledger,
            progress,
            registry,
            translator: collaborators.translator,
            filter: collaborators.filter,
            jobs,
        })
    }

    pub fn locales(&self) -> &LocaleSet {
        &self.locales
    }

    pub fn catalogs(&self) -> &CatalogStore {
        &self.catalogs
    }

    pub fn ledger(&self) -> &MissingKeyLedger {
        &self.ledger
    }

    pub fn progress(&self) -> &ProgressTracker {
        &self.progress
    }

    pub fn registry(&self) -> &UrlRegistry {
        &self.registry
    }

    /// Resolve once every dispatched job has finished.
    pub async fn wait_idle(&self) {
        self.jobs.wait_idle().await
    }

    // ==================== URLs ====================

    /// One URL per line; blank lines are ignored.
    pub async fn add_bulk_urls(&self, input: &str) -> StatusMessage {
        let lines = non_empty_lines(input);
        if lines.is_empty() {
            return StatusMessage::warning("Please enter at least one URL.");
        }

        match self.registry.add_bulk(&lines).await {
            Ok(added) => {
                let skipped = lines.len() - added;
                let mut text = format!("Added {} new URL(s).", added);
                if skipped > 0 {
                    text.push_str(&format!(" {} duplicate(s) skipped.", skipped));
                }
                StatusMessage::success(text)
            }
            Err(e) => StatusMessage::from_error(e),
        }
    }

    pub async fn add_api_endpoints(&self, input: &str) -> StatusMessage {
        let lines = non_empty_lines(input);
        if lines.is_empty() {
            return StatusMessage::warning("Please enter at least one API endpoint.");
        }

        let added = self.registry.import_from_endpoints(&lines).await;
        StatusMessage::success(format!(
            "Processed {} API endpoint(s). {} new URL(s) collected.",
            lines.len(),
            added
        ))
    }

    pub async fn refresh_api_endpoints(&self) -> StatusMessage {
        let added = self.registry.refresh_all().await;
        StatusMessage::success(format!("Refreshed all API endpoints. {} new URL(s) added.", added))
    }

    pub async fn toggle_url(&self, id: i64) -> StatusMessage {
        match self.registry.toggle_active(id).await {
            Ok(true) => StatusMessage::success("URL updated."),
            Ok(false) => StatusMessage::warning("URL not found."),
            Err(e) => StatusMessage::from_error(e),
        }
    }

    pub async fn remove_url(&self, id: i64) -> StatusMessage {
        match self.registry.remove(id).await {
            Ok(true) => StatusMessage::success("URL removed."),
            Ok(false) => StatusMessage::warning("URL not found."),
            Err(e) => StatusMessage::from_error(e),
        }
    }

    /// Clear one kind of entry, or everything when `kind` is `None`.
    pub async fn clear_urls(&self, kind: Option<UrlKind>) -> StatusMessage {
        let result = match kind {
            Some(kind) => self.registry.clear_by_kind(kind).await,
            None => self.registry.clear_all().await,
        };

        match (result, kind) {
            (Ok(_), Some(UrlKind::Page)) => StatusMessage::success("All regular URLs cleared."),
            (Ok(_), Some(UrlKind::ApiEndpoint)) => StatusMessage::success("All API endpoints cleared."),
            (Ok(_), None) => StatusMessage::success("Everything cleared."),
            (Err(e), _) => StatusMessage::from_error(e),
        }
    }

    pub async fn list_urls(&self, kind: UrlKind, filter: Option<&str>) -> Result<Vec<UrlEntry>> {
        self.registry.list(kind, filter).await
    }

    // ==================== Extraction ====================

    /// Reset extraction progress and queue one scan per active page URL.
    pub async fn start_extraction(&self) -> StatusMessage {
        self.try_start_extraction()
            .await
            .unwrap_or_else(StatusMessage::from_error)
    }

    async fn try_start_extraction(&self) -> Result<StatusMessage> {
        let urls = self.registry.list_scannable().await?;
        if urls.is_empty() {
            return Ok(StatusMessage::error("No active URLs to extract from."));
        }

        let count = urls.len();
        self.progress
            .start_batch(TaskType::Extraction, None, count as u64)
            .await?;
        self.jobs.dispatch_all(urls.into_iter().map(Job::ScanUrl))?;

        info!("✓ Queued {} scan jobs", count);
        Ok(StatusMessage::success(format!(
            "Started collecting strings from {} URLs!",
            count
        )))
    }

    // ==================== Translation ====================

    /// Queue translation batches for every untranslated source string in
    /// every target locale.
    pub async fn start_translation(&self) -> StatusMessage {
        self.try_start_translation()
            .await
            .unwrap_or_else(StatusMessage::from_error)
    }

    async fn try_start_translation(&self) -> Result<StatusMessage> {
        let source_locale = self.locales.source();
        if self.catalogs.read(source_locale).await.is_empty() {
            return Ok(StatusMessage::error(format!(
                "No strings found in {}.json.",
                source_locale
            )));
        }
        if !self.translator.is_configured() {
            return Ok(StatusMessage::error("OpenAI API key not configured."));
        }

        let mut total = 0;
        for locale in self.locales.targets() {
            let untranslated = self.catalogs.untranslated(source_locale, locale).await;
            if untranslated.is_empty() {
                continue;
            }
            total += untranslated.len();
            self.queue_locale(locale, untranslated).await?;
        }

        if total == 0 {
            return Ok(StatusMessage::info("All strings are already translated!"));
        }
        Ok(StatusMessage::success(format!(
            "Started translating {} strings to {} languages!",
            total,
            self.locales.targets().len()
        )))
    }

    /// Reset the locale's progress to `strings.len()` and dispatch one job
    /// per chunk.
    async fn queue_locale(&self, locale: &str, strings: Catalog) -> Result<usize> {
        self.progress
            .start_batch(TaskType::Translation, Some(locale), strings.len() as u64)
            .await?;

        let batches = chunk(strings, self.batch_size);
        let count = self.jobs.dispatch_all(
            batches
                .into_iter()
                .map(|strings| Job::TranslateBatch(TranslationBatch::new(locale, strings))),
        )?;

        info!("✓ Queued {} translation jobs for {}", count, locale);
        Ok(count)
    }

    /// Queue every ledger key of `locale` for translation and clear those
    /// ledger rows.
    pub async fn translate_missing_for_locale(&self, locale: &str) -> StatusMessage {
        self.try_translate_missing_for_locale(locale)
            .await
            .unwrap_or_else(StatusMessage::from_error)
    }

    async fn try_translate_missing_for_locale(&self, locale: &str) -> Result<StatusMessage> {
        if !self.locales.is_target(locale) {
            return Ok(StatusMessage::error(format!("Unknown locale: {}", locale)));
        }
        if !self.translator.is_configured() {
            return Ok(StatusMessage::error("OpenAI API key not configured."));
        }

        let records = self.ledger.list_for_locale(locale).await?;
        if records.is_empty() {
            return Ok(StatusMessage::info(format!("No missing keys for {}.", locale)));
        }

        let source = self.catalogs.read(self.locales.source()).await;
        let strings: Catalog = records
            .into_iter()
            .map(|record| {
                let text = source.get(&record.key).cloned().unwrap_or_else(|| record.key.clone());
                (record.key, text)
            })
            .collect();
        let count = strings.len();

        self.queue_locale(locale, strings).await?;
        self.ledger.clear_locale(locale).await?;

        Ok(StatusMessage::success(format!(
            "Queued {} missing keys for {}.",
            count,
            self.locales.name(locale)
        )))
    }

    /// Queue one ledger key as a single-item batch and drop its row.
    pub async fn translate_missing_key(&self, id: i64) -> StatusMessage {
        self.try_translate_missing_key(id)
            .await
            .unwrap_or_else(StatusMessage::from_error)
    }

    async fn try_translate_missing_key(&self, id: i64) -> Result<StatusMessage> {
        let Some(record) = self.ledger.get(id).await? else {
            return Ok(StatusMessage::warning("Missing key not found."));
        };
        if !self.translator.is_configured() {
            return Ok(StatusMessage::error("OpenAI API key not configured."));
        }

        let source = self.catalogs.read(self.locales.source()).await;
        let text = source.get(&record.key).cloned().unwrap_or_else(|| record.key.clone());
        let strings: Catalog = [(record.key.clone(), text)].into_iter().collect();

        self.jobs
            .dispatch(Job::TranslateBatch(TranslationBatch::new(&record.locale, strings)))?;
        self.ledger.delete(id).await?;

        Ok(StatusMessage::success(format!(
            "Queued \"{}\" for {} translation.",
            record.key, record.locale
        )))
    }

    // ==================== String editor ====================

    pub async fn entries(&self, locale: &str, search: Option<&str>) -> Vec<EditableEntry> {
        self.catalogs
            .entries(self.locales.source(), locale, search)
            .await
    }

    /// Store a manual translation, replacing whatever was there.
    pub async fn save_translation(&self, locale: &str, key: &str, value: &str) -> StatusMessage {
        if !self.locales.is_target(locale) {
            return StatusMessage::error(format!("Unknown locale: {}", locale));
        }
        if key.is_empty() {
            return StatusMessage::warning("Key must not be empty.");
        }

        if let Err(e) = self.catalogs.upsert_value(locale, key, value).await {
            return StatusMessage::from_error(e.into());
        }
        best_effort("Ledger cleanup", self.ledger.remove_keys(locale, [key])).await;

        StatusMessage::success("Translation saved.")
    }

    /// Translate one source string right away and store the result.
    pub async fn translate_single(&self, locale: &str, key: &str) -> StatusMessage {
        if !self.locales.is_target(locale) {
            return StatusMessage::error(format!("Unknown locale: {}", locale));
        }
        if !self.translator.is_configured() {
            return StatusMessage::error("OpenAI API key not configured.");
        }

        let source = self.catalogs.read(self.locales.source()).await;
        let text = source.get(key).map(String::as_str).unwrap_or(key);

        match self.translator.translate(text, locale).await {
            Some(translated) if !translated.is_empty() => {
                let saved = self.save_translation(locale, key, &translated).await;
                if saved.is_error() {
                    return saved;
                }
                StatusMessage::success("AI translated successfully.")
            }
            _ => StatusMessage::error("AI translation failed."),
        }
    }

    // ==================== Missing keys ====================

    /// Collect lookups reported by the live site.
    ///
    /// Source-locale misses become new source keys and target-locale misses
    /// go to the ledger. Lookups in locales that are not configured are
    /// dropped, as are keys the filter rejects.
    pub async fn report_lookups(&self, lookups: &[Lookup]) -> StatusMessage {
        let source_locale = self.locales.source();
        let ctx = CollectionContext::new(
            CollectionMode::Runtime,
            source_locale,
            Arc::clone(&self.filter),
        );

        let mut ignored = 0;
        for lookup in lookups {
            let locale = lookup.locale.as_str();
            if self.locales.is_source(locale) || self.locales.is_target(locale) {
                ctx.record_lookup(&lookup.key, locale, lookup.found);
            } else {
                ignored += 1;
            }
        }
        ctx.finish();
        if ignored > 0 {
            debug!("Ignored {} lookup(s) in unconfigured locales", ignored);
        }

        let keys = ctx.take_keys();
        let missing = keys.target_keys.len();
        let added = flush_keys(keys, &self.catalogs, &self.ledger, source_locale).await;

        StatusMessage::success(format!(
            "Recorded {} new source key(s) and {} missing translation(s).",
            added, missing
        ))
    }

    pub async fn missing_keys(
        &self,
        locale: Option<&str>,
        search: Option<&str>,
    ) -> Result<Vec<MissingKeyRecord>> {
        self.ledger.list(locale, search).await
    }

    pub async fn purge_resolved(&self) -> StatusMessage {
        match self.ledger.purge_resolved(&self.catalogs).await {
            Ok(cleared) => {
                StatusMessage::success(format!("Cleared {} resolved missing key(s).", cleared))
            }
            Err(e) => StatusMessage::from_error(e),
        }
    }

    pub async fn clear_missing(&self) -> StatusMessage {
        match self.ledger.clear_all().await {
            Ok(_) => StatusMessage::success("All missing keys cleared."),
            Err(e) => StatusMessage::from_error(e),
        }
    }

    // ==================== Progress ====================

    /// Clear all progress records. Jobs already running keep going.
    pub async fn reset_progress(&self) -> StatusMessage {
        match self.progress.reset_all().await {
            Ok(_) => StatusMessage::success("Progress reset successfully!"),
            Err(e) => StatusMessage::from_error(e),
        }
    }

    pub async fn overview(&self) -> Result<Overview> {
        let source_locale = self.locales.source();
        let source_keys = self.catalogs.read(source_locale).await.len();

        let mut locales = Vec::with_capacity(self.locales.targets().len());
        for locale in self.locales.targets() {
            locales.push(LocaleOverview {
                locale: locale.clone(),
                name: self.locales.name(locale).to_string(),
                status: self.catalogs.translation_status(source_locale, locale).await,
                progress: self
                    .progress
                    .get(TaskType::Translation, Some(locale))
                    .await
                    .context("Failed to load translation progress")?,
            });
        }

        Ok(Overview {
            source_locale: source_locale.to_string(),
            source_keys,
            page_urls: self.registry.count_by_kind(UrlKind::Page).await?,
            scannable_urls: self.registry.count_scannable().await?,
            api_endpoints: self.registry.count_by_kind(UrlKind::ApiEndpoint).await?,
            missing_keys: self.ledger.count().await?,
            translator_configured: self.translator.is_configured(),
            translator_metrics: self.translator.metrics_report(),
            extraction: self.progress.get(TaskType::Extraction, None).await?,
            locales,
        })
    }
}

fn non_empty_lines(input: &str) -> Vec<String> {
    input
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}

/// Split into maps of at most `size` entries, in key order.
fn chunk(strings: Catalog, size: usize) -> Vec<BTreeMap<String, String>> {
    let size = size.max(1);
    let mut chunks = Vec::with_capacity(strings.len().div_ceil(size));
    let mut current = BTreeMap::new();

    for (key, value) in strings {
        current.insert(key, value);
        if current.len() == size {
            chunks.push(std::mem::take(&mut current));
        }
    }
    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}
