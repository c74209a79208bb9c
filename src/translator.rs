use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, warn};

use crate::config::Config;
use crate::locales::LocaleSet;
use crate::rate_limit::RateLimiter;

/// Something that can turn source text into a target locale.
///
/// `None` means "no translation yet": not configured, rate limited, or the
/// call failed. Callers never see the cause, only the absence.
#[async_trait]
pub trait Translate: Send + Sync {
    async fn translate(&self, text: &str, locale: &str) -> Option<String>;

    fn is_configured(&self) -> bool;

    /// Call counters, for translators that keep them.
    fn metrics_report(&self) -> Option<MetricsReport> {
        None
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<Message>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Message {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: Message,
}

/// Check if a model is a reasoning model that doesn't support temperature
fn is_reasoning_model(model: &str) -> bool {
    model.starts_with("gpt-5")
        || model.starts_with("o1")
        || model.starts_with("o3")
        || model.starts_with("o4")
}

/// Counters for outbound translation calls.
#[derive(Debug, Default)]
pub struct TranslatorMetrics {
    /// Calls that reached the API
    api_calls: AtomicUsize,

    /// Calls that reached the API and produced no translation
    api_failures: AtomicUsize,

    /// Calls refused by the rate limiter before any request was made
    rate_limited: AtomicUsize,
}

impl TranslatorMetrics {
    fn record_api_call(&self) {
        self.api_calls.fetch_add(1, Ordering::Relaxed);
    }

    fn record_api_failure(&self) {
        self.api_failures.fetch_add(1, Ordering::Relaxed);
    }

    fn record_rate_limited(&self) {
        self.rate_limited.fetch_add(1, Ordering::Relaxed);
    }

    pub fn report(&self) -> MetricsReport {
        let calls = self.api_calls.load(Ordering::Relaxed);
        let failures = self.api_failures.load(Ordering::Relaxed);
        let api_success_rate = if calls > 0 {
            (calls.saturating_sub(failures) as f64 / calls as f64) * 100.0
        } else {
            0.0
        };

        MetricsReport {
            api_calls: calls,
            api_failures: failures,
            rate_limited: self.rate_limited.load(Ordering::Relaxed),
            api_success_rate,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct MetricsReport {
    pub api_calls: usize,
    pub api_failures: usize,
    pub rate_limited: usize,

    /// Percentage (0-100) of API calls that returned a translation
    pub api_success_rate: f64,
}

/// Translator backed by an OpenAI-compatible chat completions endpoint.
pub struct OpenAiTranslator {
    client: reqwest::Client,
    api_key: Option<String>,
    model: String,
    api_url: String,
    system_prompt: String,
    locales: LocaleSet,
    limiter: Arc<RateLimiter>,
    metrics: TranslatorMetrics,
}

impl OpenAiTranslator {
    /// # Arguments
    /// * `config` - API key, model, endpoint URL and prompt template
    /// * `locales` - used to resolve locale codes to language names for the prompt
    /// * `limiter` - shared token bucket; every call takes one token
    pub fn new(config: &Config, locales: LocaleSet, limiter: Arc<RateLimiter>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            client,
            api_key: config.openai_api_key.clone().filter(|k| !k.is_empty()),
            model: config.openai_model.clone(),
            api_url: config.openai_api_url.clone(),
            system_prompt: config.system_prompt.clone(),
            locales,
            limiter,
            metrics: TranslatorMetrics::default(),
        })
    }

    fn build_system_prompt(&self, locale: &str) -> String {
        self.system_prompt
            .replace("{language}", self.locales.name(locale))
    }

    fn build_request(&self, text: &str, locale: &str) -> ChatRequest {
        ChatRequest {
            model: self.model.clone(),
            messages: vec![
                Message {
                    role: "system".to_string(),
                    content: self.build_system_prompt(locale),
                },
                Message {
                    role: "user".to_string(),
                    content: text.to_string(),
                },
            ],
            // Reasoning models don't support temperature
            temperature: if is_reasoning_model(&self.model) {
                None
            } else {
                Some(0.3)
            },
        }
    }

    async fn call_api(&self, api_key: &str, text: &str, locale: &str) -> Result<String> {
        let request = self.build_request(text, locale);

        let response = self
            .client
            .post(&self.api_url)
            .header("Authorization", format!("Bearer {}", api_key))
            .header("Content-Type", "application/json")
            .json(&request)
            .send()
            .await
            .context("Failed to send translation request to OpenAI API")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response
                .text()
                .await
                .unwrap_or_else(|e| format!("<failed to read body: {}>", e));
            bail!("OpenAI API error ({}): {}", status, body);
        }

        let chat_response: ChatResponse = response
            .json()
            .await
            .context("Failed to parse OpenAI translation response")?;

        let translated = chat_response
            .choices
            .first()
            .map(|c| c.message.content.trim().to_string())
            .unwrap_or_default();

        if translated.is_empty() {
            bail!("OpenAI translation response was empty");
        }

        Ok(translated)
    }
}

#[async_trait]
impl Translate for OpenAiTranslator {
    async fn translate(&self, text: &str, locale: &str) -> Option<String> {
        let Some(api_key) = self.api_key.as_deref() else {
            warn!("OpenAI API key not configured, skipping translation");
            return None;
        };

        if !self.limiter.try_acquire() {
            self.metrics.record_rate_limited();
            warn!("Translation rate limit reached, skipping '{}' ({})", text, locale);
            return None;
        }

        self.metrics.record_api_call();
        match self.call_api(api_key, text, locale).await {
            Ok(translated) => {
                debug!("Translated '{}' to {}: '{}'", text, locale, translated);
                Some(translated)
            }
            Err(e) => {
                self.metrics.record_api_failure();
                error!("Translation failed for '{}' to {}: {:#}", text, locale, e);
                None
            }
        }
    }

    fn is_configured(&self) -> bool {
        self.api_key.is_some()
    }

    fn metrics_report(&self) -> Option<MetricsReport> {
        Some(self.metrics.report())
    }
}
