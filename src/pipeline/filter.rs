use regex::Regex;
use std::sync::OnceLock;

/// Decides whether a reported lookup key is user-facing text worth keeping.
///
/// Applied before a key enters the scan buffer.
pub trait KeyFilter: Send + Sync {
    fn accept(&self, key: &str) -> bool;
}

static IDENTIFIER_REGEX: OnceLock<Regex> = OnceLock::new();

/// Drops keys that cannot be literal sentences.
///
/// - empty or whitespace-only keys
/// - keys containing `/` or `\`, left over from a misresolved lookup
/// - short dot-delimited identifiers such as `auth.failed` or
///   `validation.required`, which name framework messages rather than text
///
/// Dotted keys longer than `max_identifier_len` are kept.
#[derive(Debug, Clone)]
pub struct DefaultKeyFilter {
    max_identifier_len: usize,
}

impl DefaultKeyFilter {
    pub fn new(max_identifier_len: usize) -> Self {
        Self { max_identifier_len }
    }

    fn is_identifier(&self, key: &str) -> bool {
        if key.len() > self.max_identifier_len {
            return false;
        }
        let regex = IDENTIFIER_REGEX.get_or_init(|| {
            Regex::new(r"^[A-Za-z0-9_-]+(\.[A-Za-z0-9_-]+)+$").expect("identifier regex is valid")
        });
        regex.is_match(key)
    }
}

impl Default for DefaultKeyFilter {
    fn default() -> Self {
        Self::new(64)
    }
}

impl KeyFilter for DefaultKeyFilter {
    fn accept(&self, key: &str) -> bool {
        if key.trim().is_empty() {
            return false;
        }
        if key.contains('/') || key.contains('\\') {
            return false;
        }
        !self.is_identifier(key)
    }
}

/// Keeps every non-empty key.
#[derive(Debug, Clone, Copy, Default)]
pub struct AcceptAll;

impl KeyFilter for AcceptAll {
    fn accept(&self, key: &str) -> bool {
        !key.is_empty()
    }
}
