//! Locale set: the source locale, the target locales, and their display names.
//!
//! The source locale's catalog is the ground truth of strings to translate.
//! Every other configured locale is a translation target. Language names are
//! only used to build natural prompts for the AI translator.

use anyhow::{bail, Result};
use std::collections::BTreeMap;

/// Longest locale code accepted anywhere in the pipeline (matches the ledger column).
pub const MAX_LOCALE_LEN: usize = 10;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocaleSet {
    source: String,
    targets: Vec<String>,
    names: BTreeMap<String, String>,
}

impl LocaleSet {
    /// Build a validated locale set.
    ///
    /// # Errors
    /// Fails if any code is malformed, if the source locale is also listed as a
    /// target, or if a target is listed twice.
    pub fn new<I>(source: &str, targets: &[String], names: I) -> Result<Self>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        validate_code(source)?;

        let mut unique_targets: Vec<String> = Vec::with_capacity(targets.len());
        for target in targets {
            validate_code(target)?;
            if target == source {
                bail!("Source locale '{}' cannot also be a target locale", source);
            }
            if unique_targets.contains(target) {
                bail!("Target locale '{}' is listed twice", target);
            }
            unique_targets.push(target.clone());
        }

        Ok(Self {
            source: source.to_string(),
            targets: unique_targets,
            names: names.into_iter().collect(),
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn targets(&self) -> &[String] {
        &self.targets
    }

    pub fn is_source(&self, code: &str) -> bool {
        self.source == code
    }

    pub fn is_target(&self, code: &str) -> bool {
        self.targets.iter().any(|t| t == code)
    }

    /// Language name for prompts, falling back to the code itself.
    pub fn name<'a>(&'a self, code: &'a str) -> &'a str {
        self.names.get(code).map(String::as_str).unwrap_or(code)
    }
}

/// Check that a locale code is safe to use as a file stem and a column value.
pub fn validate_code(code: &str) -> Result<()> {
    if code.is_empty() {
        bail!("Locale code cannot be empty");
    }
    if code.len() > MAX_LOCALE_LEN {
        bail!("Locale code '{}' is longer than {} characters", code, MAX_LOCALE_LEN);
    }
    if !code
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        bail!("Locale code '{}' contains invalid characters", code);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names() -> Vec<(String, String)> {
        vec![
            ("en".to_string(), "English".to_string()),
            ("es".to_string(), "Spanish".to_string()),
        ]
    }

    #[test]
    fn test_locale_set_basics() {
        let set = LocaleSet::new("en", &["es".to_string(), "ar".to_string()], names())
            .expect("Should build");

        assert_eq!(set.source(), "en");
        assert_eq!(set.targets(), &["es".to_string(), "ar".to_string()]);
        assert!(set.is_source("en"));
        assert!(!set.is_source("es"));
        assert!(set.is_target("ar"));
        assert!(!set.is_target("en"));
    }

    #[test]
    fn test_name_falls_back_to_code() {
        let set = LocaleSet::new("en", &["ar".to_string()], names()).expect("Should build");
        assert_eq!(set.name("es"), "Spanish");
        assert_eq!(set.name("ar"), "ar");
    }

    #[test]
    fn test_rejects_source_as_target() {
        assert!(LocaleSet::new("en", &["en".to_string()], names()).is_err());
    }

    #[test]
    fn test_rejects_duplicate_target() {
        assert!(LocaleSet::new("en", &["es".to_string(), "es".to_string()], names()).is_err());
    }

    #[test]
    fn test_validate_code() {
        assert!(validate_code("pt-BR").is_ok());
        assert!(validate_code("zh_Hant").is_ok());
        assert!(validate_code("").is_err());
        assert!(validate_code("../etc").is_err());
        assert!(validate_code("a/b").is_err());
        assert!(validate_code("abcdefghijk").is_err());
    }
}
