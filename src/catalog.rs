//! Per-locale catalogs persisted as flat JSON files.
//!
//! Each locale has one `<locale>.json` file mapping source key to text. A value
//! equal to its key (or an empty value) means "not translated yet".
//!
//! Writers take an exclusive per-locale lock for the full read-modify-write
//! cycle. Files are replaced atomically (temp file + rename), so snapshot
//! readers never need the lock and never observe a half-written file.

use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::{debug, warn};

use crate::locales::validate_code;

/// Key → text mapping for one locale, always ordered by key.
pub type Catalog = BTreeMap<String, String>;

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("Invalid locale code: {0}")]
    InvalidLocale(String),

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Catalog {path} is not a flat JSON object of strings: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// True when `value` is a real translation of `key`.
pub fn is_translated(key: &str, value: &str) -> bool {
    !value.is_empty() && value != key
}

/// Per-locale completion figures for the operator view.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TranslationStatus {
    pub locale: String,
    pub total_source: usize,
    pub total_target: usize,
    pub translated: usize,
    pub missing: usize,
    pub percentage: f64,
}

/// One row of the string editor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EditableEntry {
    pub key: String,
    pub source: String,
    pub target: String,
    pub is_translated: bool,
}

pub struct CatalogStore {
    dir: PathBuf,
    locks: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl CatalogStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, locale: &str) -> Result<PathBuf, CatalogError> {
        validate_code(locale).map_err(|_| CatalogError::InvalidLocale(locale.to_string()))?;
        Ok(self.dir.join(format!("{}.json", locale)))
    }

    async fn lock(&self, locale: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = match self.locks.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            Arc::clone(locks.entry(locale.to_string()).or_default())
        };
        lock.lock_owned().await
    }

    /// Snapshot of a locale's catalog.
    ///
    /// Never fails: a missing, unreadable or malformed file yields an empty
    /// catalog (malformed files are logged).
    pub async fn read(&self, locale: &str) -> Catalog {
        match self.load(locale).await {
            Ok(catalog) => catalog,
            Err(e) => {
                warn!("Reading catalog for {} failed, treating as empty: {}", locale, e);
                Catalog::new()
            }
        }
    }

    /// Strict load used under the lock: a corrupt file is an error, so a write
    /// never silently replaces it.
    async fn load(&self, locale: &str) -> Result<Catalog, CatalogError> {
        let path = self.path_for(locale)?;
        let contents = match tokio::fs::read_to_string(&path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Catalog::new()),
            Err(source) => return Err(CatalogError::Io { path, source }),
        };

        if contents.trim().is_empty() {
            return Ok(Catalog::new());
        }

        serde_json::from_str(&contents).map_err(|source| CatalogError::Parse { path, source })
    }

    async fn save(&self, locale: &str, catalog: &Catalog) -> Result<(), CatalogError> {
        let path = self.path_for(locale)?;
        let body = serialize_catalog(catalog).map_err(|source| CatalogError::Parse {
            path: path.clone(),
            source,
        })?;

        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|source| CatalogError::Io {
                path: self.dir.clone(),
                source,
            })?;

        let tmp_path = self.dir.join(format!(".{}.json.tmp", locale));
        tokio::fs::write(&tmp_path, body)
            .await
            .map_err(|source| CatalogError::Io {
                path: tmp_path.clone(),
                source,
            })?;
        tokio::fs::rename(&tmp_path, &path)
            .await
            .map_err(|source| CatalogError::Io { path, source })?;

        Ok(())
    }

    /// Add every key not yet present as `key -> key`.
    ///
    /// Returns how many keys were inserted. The file is only rewritten when at
    /// least one key was new.
    pub async fn merge_new_keys<I, S>(&self, locale: &str, keys: I) -> Result<usize, CatalogError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let _guard = self.lock(locale).await;
        let mut catalog = self.load(locale).await?;

        let mut added = 0;
        for key in keys {
            let key = key.into();
            if !catalog.contains_key(&key) {
                catalog.insert(key.clone(), key);
                added += 1;
            }
        }

        if added > 0 {
            self.save(locale, &catalog).await?;
            debug!("Added {} new keys to {}.json", added, locale);
        }

        Ok(added)
    }

    /// Overwrite one entry unconditionally (manual edits, single-key translations).
    pub async fn upsert_value(&self, locale: &str, key: &str, value: &str) -> Result<(), CatalogError> {
        let _guard = self.lock(locale).await;
        let mut catalog = self.load(locale).await?;
        catalog.insert(key.to_string(), value.to_string());
        self.save(locale, &catalog).await
    }

    /// Write translations for keys that are absent or still untranslated.
    ///
    /// An existing real translation is never replaced. Returns how many
    /// entries changed.
    pub async fn merge_translated_batch(
        &self,
        locale: &str,
        translations: &BTreeMap<String, String>,
    ) -> Result<usize, CatalogError> {
        let _guard = self.lock(locale).await;
        let mut catalog = self.load(locale).await?;

        let mut changed = 0;
        for (key, text) in translations {
            let replaceable = match catalog.get(key) {
                None => true,
                Some(current) => !is_translated(key, current),
            };
            if replaceable && catalog.get(key) != Some(text) {
                catalog.insert(key.clone(), text.clone());
                changed += 1;
            }
        }

        if changed > 0 {
            self.save(locale, &catalog).await?;
            debug!("Merged {} translations into {}.json", changed, locale);
        }

        Ok(changed)
    }

    /// Source entries that have no real translation in `locale`.
    pub async fn untranslated(&self, source_locale: &str, locale: &str) -> Catalog {
        let source = self.read(source_locale).await;
        let target = self.read(locale).await;

        source
            .into_iter()
            .filter(|(key, _)| {
                target
                    .get(key)
                    .map(|value| !is_translated(key, value))
                    .unwrap_or(true)
            })
            .collect()
    }

    /// Completion figures for `locale` measured against the source catalog.
    pub async fn translation_status(&self, source_locale: &str, locale: &str) -> TranslationStatus {
        let source = self.read(source_locale).await;
        let target = self.read(locale).await;

        let translated = target
            .iter()
            .filter(|(key, value)| is_translated(key, value))
            .count();
        let total_source = source.len();

        TranslationStatus {
            locale: locale.to_string(),
            total_source,
            total_target: target.len(),
            translated,
            missing: total_source.saturating_sub(translated),
            percentage: percentage(translated, total_source),
        }
    }

    /// Editor rows for `locale`, one per source key, optionally filtered by a
    /// case-insensitive substring of the key or the target text.
    pub async fn entries(
        &self,
        source_locale: &str,
        locale: &str,
        search: Option<&str>,
    ) -> Vec<EditableEntry> {
        let source = self.read(source_locale).await;
        let target = self.read(locale).await;
        let needle = search
            .map(|s| s.trim().to_lowercase())
            .filter(|s| !s.is_empty());

        source
            .into_iter()
            .filter_map(|(key, source_text)| {
                let target_text = target.get(&key).cloned().unwrap_or_default();
                if let Some(needle) = &needle {
                    if !key.to_lowercase().contains(needle)
                        && !target_text.to_lowercase().contains(needle)
                    {
                        return None;
                    }
                }
                Some(EditableEntry {
                    is_translated: is_translated(&key, &target_text),
                    key,
                    source: source_text,
                    target: target_text,
                })
            })
            .collect()
    }
}

/// `round(part / total * 100, 1)`, or 0 when `total` is 0.
pub fn percentage(part: usize, total: usize) -> f64 {
    if total == 0 {
        return 0.0;
    }
    ((part as f64 / total as f64) * 1000.0).round() / 10.0
}

/// Pretty JSON with 4-space indentation; serde_json keeps non-ASCII text and
/// slashes literal.
fn serialize_catalog(catalog: &Catalog) -> Result<Vec<u8>, serde_json::Error> {
    let mut out = Vec::new();
    let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
    let mut serializer = serde_json::Serializer::with_formatter(&mut out, formatter);
    catalog.serialize(&mut serializer)?;
    out.push(b'\n');
    Ok(out)
}
