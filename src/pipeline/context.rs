use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use super::buffer::{DrainedKeys, KeyBuffer};
use super::filter::KeyFilter;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollectionMode {
    /// A page scan: every source-locale lookup is collected, found or not.
    Scan,
    /// Ordinary rendering: only lookups that missed are collected.
    Runtime,
}

/// Per-render collection state passed to the render collaborator.
///
/// Each scan owns its own context, so concurrent scans never see each other's
/// keys. Lookups reported after [`finish`](Self::finish) are ignored.
pub struct CollectionContext {
    mode: CollectionMode,
    source_locale: String,
    filter: Arc<dyn KeyFilter>,
    buffer: Mutex<KeyBuffer>,
    collecting: AtomicBool,
}

impl CollectionContext {
    pub fn new(mode: CollectionMode, source_locale: impl Into<String>, filter: Arc<dyn KeyFilter>) -> Self {
        Self {
            mode,
            source_locale: source_locale.into(),
            filter,
            buffer: Mutex::new(KeyBuffer::new()),
            collecting: AtomicBool::new(true),
        }
    }

    pub fn mode(&self) -> CollectionMode {
        self.mode
    }

    pub fn source_locale(&self) -> &str {
        &self.source_locale
    }

    pub fn is_collecting(&self) -> bool {
        self.collecting.load(Ordering::Acquire)
    }

    /// Report one text lookup.
    ///
    /// # Arguments
    /// * `key` - the lookup key, which is also the source-language text
    /// * `locale` - the locale the lookup was made in
    /// * `found` - whether that locale's catalog had a value for the key
    pub fn record_lookup(&self, key: &str, locale: &str, found: bool) {
        if !self.is_collecting() || !self.filter.accept(key) {
            return;
        }

        if locale == self.source_locale {
            if self.mode == CollectionMode::Scan || !found {
                self.buffer().add_source_key(key);
            }
        } else if !found {
            self.buffer().add_target_key(key, locale);
        }
    }

    /// Leave collection mode.
    pub fn finish(&self) {
        self.collecting.store(false, Ordering::Release);
    }

    pub fn has_keys(&self) -> bool {
        self.buffer().has_keys()
    }

    pub fn take_keys(&self) -> DrainedKeys {
        self.buffer().drain()
    }

    fn buffer(&self) -> MutexGuard<'_, KeyBuffer> {
        match self.buffer.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}
