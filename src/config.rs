use anyhow::{Context, Result};
use std::path::PathBuf;
use std::time::Duration;

use crate::locales::LocaleSet;

/// Default prompt sent as the system message for every translation call.
/// `{language}` is replaced with the target language name.
pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a professional translator. Translate the following text to {language}. Return ONLY the translated text with no explanations, greetings, or additional commentary. Preserve any HTML tags, placeholders like :name, and formatting.";

#[derive(Debug, Clone)]
pub struct Config {
    pub environment: String,

    // Operator API
    pub port: u16,
    pub api_key: Option<String>,

    // Storage
    pub database_url: String,
    pub lang_dir: PathBuf,

    // Locales
    pub source_locale: String,
    pub target_locales: Vec<String>,
    pub language_names: Vec<(String, String)>,

    // OpenAI
    pub openai_api_key: Option<String>,
    pub openai_model: String,
    pub openai_api_url: String,
    pub system_prompt: String,
    pub rate_limit_per_minute: u32,
    pub translation_batch_size: usize,
    pub translation_call_delay_ms: u64,

    // Workers
    pub worker_count: usize,
    pub scan_delay_ms: u64,
    pub scan_timeout_secs: u64,
    pub translation_timeout_secs: u64,
    pub job_max_attempts: u32,

    // URL collection
    pub url_fetch_timeout_secs: u64,

    // Render collaborator
    pub render_base_url: String,
    pub render_concurrent: bool,

    // Scheduled endpoint refresh (HH:MM, UTC)
    pub refresh_times: Vec<String>,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let config = Self {
            environment: std::env::var("ENVIRONMENT").unwrap_or_else(|_| "development".to_string()),

            port: parse_env("PORT", 8080),
            api_key: optional_env("API_KEY"),

            database_url: std::env::var("DATABASE_URL")
                .unwrap_or_else(|_| "sqlite://data/translate.db".to_string()),
            lang_dir: PathBuf::from(std::env::var("LANG_DIR").unwrap_or_else(|_| "lang".to_string())),

            source_locale: std::env::var("SOURCE_LOCALE").unwrap_or_else(|_| "en".to_string()),
            target_locales: split_list(
                &std::env::var("TARGET_LOCALES").unwrap_or_else(|_| "ar".to_string()),
            ),
            language_names: parse_language_names(
                &std::env::var("LANGUAGE_NAMES")
                    .unwrap_or_else(|_| "en:English,ar:Arabic".to_string()),
            )
            .context("LANGUAGE_NAMES must look like en:English,ar:Arabic")?,

            openai_api_key: optional_env("OPENAI_API_KEY"),
            openai_model: std::env::var("OPENAI_MODEL")
                .unwrap_or_else(|_| "gpt-4o-mini".to_string()),
            openai_api_url: std::env::var("OPENAI_API_URL")
                .unwrap_or_else(|_| "https://api.openai.com/v1/chat/completions".to_string()),
            system_prompt: std::env::var("TRANSLATION_SYSTEM_PROMPT")
                .unwrap_or_else(|_| DEFAULT_SYSTEM_PROMPT.to_string()),
            rate_limit_per_minute: parse_env("RATE_LIMIT_PER_MINUTE", 300),
            translation_batch_size: parse_env("TRANSLATION_BATCH_SIZE", 20),
            translation_call_delay_ms: parse_env("TRANSLATION_CALL_DELAY_MS", 100),

            worker_count: parse_env("WORKER_COUNT", 5),
            scan_delay_ms: parse_env("SCAN_DELAY_MS", 1000),
            scan_timeout_secs: parse_env("SCAN_TIMEOUT_SECS", 60),
            translation_timeout_secs: parse_env("TRANSLATION_TIMEOUT_SECS", 120),
            job_max_attempts: parse_env("JOB_MAX_ATTEMPTS", 3),

            url_fetch_timeout_secs: parse_env("URL_FETCH_TIMEOUT_SECS", 20),

            render_base_url: std::env::var("RENDER_BASE_URL")
                .unwrap_or_else(|_| "http://127.0.0.1:8000".to_string()),
            render_concurrent: parse_env("RENDER_CONCURRENT", true),

            refresh_times: split_list(&std::env::var("REFRESH_TIMES").unwrap_or_default()),
        };

        if config.translation_batch_size == 0 {
            anyhow::bail!("TRANSLATION_BATCH_SIZE must be at least 1");
        }
        if config.worker_count == 0 {
            anyhow::bail!("WORKER_COUNT must be at least 1");
        }
        if config.job_max_attempts == 0 {
            anyhow::bail!("JOB_MAX_ATTEMPTS must be at least 1");
        }

        // Fail early on a bad locale setup rather than on the first job
        config.locales()?;

        Ok(config)
    }

    /// Build the validated locale set (source, targets, display names).
    pub fn locales(&self) -> Result<LocaleSet> {
        LocaleSet::new(
            &self.source_locale,
            &self.target_locales,
            self.language_names.iter().cloned(),
        )
    }

    pub fn scan_timeout(&self) -> Duration {
        Duration::from_secs(self.scan_timeout_secs)
    }

    pub fn translation_timeout(&self) -> Duration {
        Duration::from_secs(self.translation_timeout_secs)
    }

    pub fn url_fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.url_fetch_timeout_secs)
    }
}

fn optional_env(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parse_env<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

/// Split a comma separated list, dropping blanks
fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

/// Parse `code:Name` pairs separated by commas
fn parse_language_names(raw: &str) -> Result<Vec<(String, String)>> {
    split_list(raw)
        .into_iter()
        .map(|pair| {
            let (code, name) = pair
                .split_once(':')
                .with_context(|| format!("Invalid language entry: {}", pair))?;
            let (code, name) = (code.trim(), name.trim());
            if code.is_empty() || name.is_empty() {
                anyhow::bail!("Invalid language entry: {}", pair);
            }
            Ok((code.to_string(), name.to_string()))
        })
        .collect()
}
