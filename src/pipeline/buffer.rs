use std::collections::BTreeSet;
use tracing::{debug, warn};

use crate::bookkeeping::best_effort;
use crate::catalog::CatalogStore;
use crate::ledger::MissingKeyLedger;

/// Keys observed during one unit of work.
///
/// Source keys are deduplicated; target misses are kept as a list since the
/// ledger counts repeats itself.
#[derive(Debug, Default)]
pub struct KeyBuffer {
    source_keys: BTreeSet<String>,
    target_keys: Vec<(String, String)>,
}

/// Contents of a buffer after [`KeyBuffer::drain`].
#[derive(Debug, Default, PartialEq, Eq)]
pub struct DrainedKeys {
    pub source_keys: BTreeSet<String>,
    /// (key, locale) pairs
    pub target_keys: Vec<(String, String)>,
}

impl KeyBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_source_key(&mut self, key: impl Into<String>) {
        self.source_keys.insert(key.into());
    }

    pub fn add_target_key(&mut self, key: impl Into<String>, locale: impl Into<String>) {
        self.target_keys.push((key.into(), locale.into()));
    }

    pub fn has_keys(&self) -> bool {
        !self.source_keys.is_empty() || !self.target_keys.is_empty()
    }

    /// Take everything buffered so far, leaving the buffer empty.
    pub fn drain(&mut self) -> DrainedKeys {
        DrainedKeys {
            source_keys: std::mem::take(&mut self.source_keys),
            target_keys: std::mem::take(&mut self.target_keys),
        }
    }
}

/// Write drained keys to their stores: source keys into the source catalog,
/// target misses into the ledger.
///
/// Never fails. Every error is logged and the remaining writes still run.
/// Returns how many new keys reached the source catalog.
pub async fn flush_keys(
    keys: DrainedKeys,
    catalogs: &CatalogStore,
    ledger: &MissingKeyLedger,
    source_locale: &str,
) -> usize {
    let mut added = 0;

    if !keys.source_keys.is_empty() {
        match catalogs.merge_new_keys(source_locale, keys.source_keys).await {
            Ok(count) => added = count,
            Err(e) => warn!("Failed to merge keys into {} catalog (ignored): {}", source_locale, e),
        }
    }

    for (key, locale) in &keys.target_keys {
        best_effort(
            &format!("Recording missing key for {}", locale),
            ledger.record(key, locale),
        )
        .await;
    }

    debug!(
        "Flushed {} new source keys, {} target misses",
        added,
        keys.target_keys.len()
    );
    added
}
