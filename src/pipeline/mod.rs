//! Extraction and translation pipeline.
//!
//! A page scan renders one URL inside a [`CollectionContext`], which filters
//! every reported lookup through a [`KeyFilter`] into a per-scan
//! [`KeyBuffer`]. When the render ends the buffer is flushed exactly once:
//! source-locale keys are merged into the source catalog and target-locale
//! misses are recorded in the missing-key ledger.
//!
//! Translation runs per batch of source strings for one target locale, see
//! [`TranslationWorker`].
//!
//! # Architecture
//!
//! - `filter`: decides which reported lookups are real user-facing text
//! - `buffer`: per-scan key accumulator and its flush
//! - `context`: the collection context handed to the render collaborator
//! - `scan`: the page scan worker
//! - `translate`: the translation batch worker

mod buffer;
mod context;
mod filter;
mod scan;
mod translate;

pub use buffer::{flush_keys, DrainedKeys, KeyBuffer};
pub use context::{CollectionContext, CollectionMode};
pub use filter::{AcceptAll, DefaultKeyFilter, KeyFilter};
pub use scan::PageScanner;
pub use translate::{BatchOutcome, TranslationBatch, TranslationWorker};
