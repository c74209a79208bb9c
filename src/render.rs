//! Render collaborators.
//!
//! The pipeline never renders pages itself. A [`Renderer`] renders one path
//! and reports each text lookup into the [`CollectionContext`] it was given.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use regex::Regex;
use std::sync::OnceLock;
use std::time::Duration;
use tracing::debug;

use crate::pipeline::CollectionContext;

/// Header sent with marker renders so the site emits lookup markers.
pub const COLLECT_HEADER: &str = "X-Translation-Collect";

#[async_trait]
pub trait Renderer: Send + Sync {
    /// Render `path_and_query` (e.g. `/about?tab=team`), reporting lookups
    /// into `ctx` while it is collecting.
    async fn render(&self, path_and_query: &str, ctx: &CollectionContext) -> Result<()>;

    /// Whether several renders may run at once in this process. Scans are
    /// serialized when this is false.
    fn supports_concurrent_renders(&self) -> bool {
        true
    }
}

static MARKER_REGEX: OnceLock<Regex> = OnceLock::new();

/// Renders through the site's own HTTP server and reads back lookup markers.
///
/// In collection mode the site wraps every translated string as
/// `<!--T_START:text:T_END-->`, with the text HTML-escaped. Each marker is
/// reported as a source-locale lookup.
pub struct HttpMarkerRenderer {
    client: reqwest::Client,
    base_url: String,
    concurrent: bool,
}

impl HttpMarkerRenderer {
    pub fn new(base_url: &str, timeout: Duration, concurrent: bool) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            concurrent,
        })
    }
}

#[async_trait]
impl Renderer for HttpMarkerRenderer {
    async fn render(&self, path_and_query: &str, ctx: &CollectionContext) -> Result<()> {
        let url = format!("{}{}", self.base_url, path_and_query);

        let response = self
            .client
            .get(&url)
            .header(COLLECT_HEADER, "1")
            .send()
            .await
            .with_context(|| format!("Failed to render {}", url))?;

        if !response.status().is_success() {
            bail!("Render of {} returned HTTP {}", url, response.status());
        }

        let html = response
            .text()
            .await
            .with_context(|| format!("Failed to read body of {}", url))?;

        let markers = extract_markers(&html);
        debug!("Found {} markers in {}", markers.len(), url);
        for key in &markers {
            ctx.record_lookup(key, ctx.source_locale(), true);
        }

        Ok(())
    }

    fn supports_concurrent_renders(&self) -> bool {
        self.concurrent
    }
}

/// Marker texts in document order, entities decoded.
fn extract_markers(html: &str) -> Vec<String> {
    let regex = MARKER_REGEX
        .get_or_init(|| Regex::new(r"(?s)<!--T_START:(.*?):T_END-->").expect("marker regex is valid"));

    regex
        .captures_iter(html)
        .filter_map(|caps| caps.get(1))
        .map(|m| decode_entities(m.as_str()))
        .collect()
}

/// Decode the entities produced by HTML escaping with quotes: the five named
/// ones plus numeric references.
fn decode_entities(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;

    while let Some(start) = rest.find('&') {
        out.push_str(&rest[..start]);
        let tail = &rest[start..];

        let decoded = tail.find(';').and_then(|end| {
            let entity = &tail[1..end];
            let ch = match entity {
                "amp" => Some('&'),
                "lt" => Some('<'),
                "gt" => Some('>'),
                "quot" => Some('"'),
                "apos" => Some('\''),
                _ => entity
                    .strip_prefix("#x")
                    .or_else(|| entity.strip_prefix("#X"))
                    .and_then(|hex| u32::from_str_radix(hex, 16).ok())
                    .or_else(|| entity.strip_prefix('#').and_then(|dec| dec.parse().ok()))
                    .and_then(char::from_u32),
            };
            ch.map(|c| (c, end))
        });

        match decoded {
            Some((c, end)) => {
                out.push(c);
                rest = &tail[end + 1..];
            }
            None => {
                out.push('&');
                rest = &tail[1..];
            }
        }
    }

    out.push_str(rest);
    out
}
