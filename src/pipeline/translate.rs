use anyhow::{Context, Result};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use crate::bookkeeping::best_effort;
use crate::catalog::{is_translated, CatalogStore};
use crate::ledger::MissingKeyLedger;
use crate::progress::{ProgressTracker, TaskType};
use crate::translator::Translate;

/// Source strings to translate into one locale.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranslationBatch {
    pub locale: String,
    /// key -> source text
    pub strings: BTreeMap<String, String>,
}

impl TranslationBatch {
    pub fn new(locale: impl Into<String>, strings: BTreeMap<String, String>) -> Self {
        Self {
            locale: locale.into(),
            strings,
        }
    }

    pub fn len(&self) -> usize {
        self.strings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.strings.is_empty()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchOutcome {
    pub translated: usize,
    pub skipped: usize,
    pub failed: usize,
}

pub struct TranslationWorker {
    translator: Arc<dyn Translate>,
    catalogs: Arc<CatalogStore>,
    ledger: MissingKeyLedger,
    progress: ProgressTracker,
    call_delay: Duration,
}

impl TranslationWorker {
    pub fn new(
        translator: Arc<dyn Translate>,
        catalogs: Arc<CatalogStore>,
        ledger: MissingKeyLedger,
        progress: ProgressTracker,
        call_delay: Duration,
    ) -> Self {
        Self {
            translator,
            catalogs,
            ledger,
            progress,
            call_delay,
        }
    }

    pub fn translator(&self) -> &Arc<dyn Translate> {
        &self.translator
    }

    /// Translate one batch and record the result in the catalog, the ledger
    /// and the locale's translation progress.
    ///
    /// Keys that already have a real translation are skipped. A string the
    /// translator returns nothing for is counted as failed and left alone.
    /// `completed` moves by the full batch size once the batch produced
    /// translations (or had nothing left to translate).
    ///
    /// An error here adds the batch size to `failed` before it is returned.
    pub async fn run(&self, batch: &TranslationBatch) -> Result<BatchOutcome> {
        match self.translate_batch(batch).await {
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                best_effort(
                    "Translation progress update",
                    self.progress.increment_failed(
                        TaskType::Translation,
                        Some(&batch.locale),
                        batch.len() as u64,
                    ),
                )
                .await;
                Err(e)
            }
        }
    }

    async fn translate_batch(&self, batch: &TranslationBatch) -> Result<BatchOutcome> {
        let locale = batch.locale.as_str();
        let current = self.catalogs.read(locale).await;

        let mut outcome = BatchOutcome::default();
        let mut translations = BTreeMap::new();
        let mut first_call = true;

        for (key, source) in &batch.strings {
            if current.get(key).is_some_and(|value| is_translated(key, value)) {
                outcome.skipped += 1;
                continue;
            }

            if !first_call && !self.call_delay.is_zero() {
                tokio::time::sleep(self.call_delay).await;
            }
            first_call = false;

            match self.translator.translate(source, locale).await {
                Some(text) if !text.is_empty() => {
                    translations.insert(key.clone(), text);
                }
                _ => {
                    debug!("No translation for '{}' ({})", key, locale);
                    outcome.failed += 1;
                }
            }
        }

        if outcome.failed > 0 {
            best_effort(
                "Translation progress update",
                self.progress.increment_failed(
                    TaskType::Translation,
                    Some(locale),
                    outcome.failed as u64,
                ),
            )
            .await;
        }

        if !translations.is_empty() {
            outcome.translated = self
                .catalogs
                .merge_translated_batch(locale, &translations)
                .await
                .with_context(|| format!("Failed to merge translations into {}", locale))?;

            best_effort(
                "Ledger cleanup",
                self.ledger
                    .remove_keys(locale, translations.keys().map(String::as_str)),
            )
            .await;
        }

        let nothing_to_do = outcome.skipped == batch.len();
        if !translations.is_empty() || nothing_to_do {
            best_effort(
                "Translation progress update",
                self.progress.increment_completed(
                    TaskType::Translation,
                    Some(locale),
                    batch.len() as u64,
                ),
            )
            .await;
        }

        info!(
            "✓ Batch for {}: {} translated, {} skipped, {} failed",
            locale, outcome.translated, outcome.skipped, outcome.failed
        );
        Ok(outcome)
    }
}
