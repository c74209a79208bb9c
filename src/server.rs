//! Operator HTTP API.
//!
//! ## Endpoints
//! - GET    /health
//! - GET    /api/overview
//! - GET    /api/urls?kind=page|api_endpoint&filter=
//! - POST   /api/urls                              add page URLs, one per line
//! - DELETE /api/urls?kind=                        clear one kind, or all
//! - POST   /api/urls/:id/toggle
//! - DELETE /api/urls/:id
//! - POST   /api/endpoints                         import API endpoints, one per line
//! - POST   /api/endpoints/refresh
//! - POST   /api/extraction
//! - POST   /api/translation
//! - GET    /api/progress
//! - DELETE /api/progress
//! - GET    /api/missing?locale=&search=
//! - DELETE /api/missing
//! - POST   /api/missing/purge
//! - POST   /api/lookups                           runtime lookups from the live site
//! - POST   /api/missing/:id/translate
//! - POST   /api/locales/:locale/missing/translate
//! - GET    /api/locales/:locale/entries?search=
//! - PUT    /api/locales/:locale/entries           save a manual translation
//! - POST   /api/locales/:locale/translate         AI-translate one key now
//!
//! Everything under `/api` requires `Authorization: Bearer <API_KEY>` when an
//! API key is configured.

use axum::{
    extract::{Path, Query, Request, State},
    http::{header, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Json, Response},
    routing::{delete, get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::{error, warn};

use crate::catalog::EditableEntry;
use crate::ledger::MissingKeyRecord;
use crate::progress::ProgressSnapshot;
use crate::registry::{UrlEntry, UrlKind};
use crate::security::{bearer_token, constant_time_compare};
use crate::service::{Lookup, Overview, Pipeline, StatusMessage};

#[derive(Clone)]
pub struct AppState {
    pipeline: Arc<Pipeline>,
    api_key: Option<Arc<str>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

impl IntoResponse for ErrorResponse {
    fn into_response(self) -> Response {
        (StatusCode::INTERNAL_SERVER_ERROR, Json(self)).into_response()
    }
}

impl From<anyhow::Error> for ErrorResponse {
    fn from(e: anyhow::Error) -> Self {
        error!("API request failed: {:#}", e);
        Self {
            error: format!("{:#}", e),
        }
    }
}

type ApiResult<T> = Result<Json<T>, ErrorResponse>;

#[derive(Debug, Deserialize)]
pub struct UrlQuery {
    kind: Option<UrlKind>,
    filter: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ClearQuery {
    kind: Option<UrlKind>,
}

#[derive(Debug, Deserialize)]
pub struct MissingQuery {
    locale: Option<String>,
    search: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SearchQuery {
    search: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct LinesBody {
    /// Newline separated
    lines: String,
}

#[derive(Debug, Deserialize)]
pub struct SaveBody {
    key: String,
    value: String,
}

#[derive(Debug, Deserialize)]
pub struct KeyBody {
    key: String,
}

/// Build the operator router. With `api_key` set, every `/api` route
/// requires it as a bearer token.
pub fn router(pipeline: Arc<Pipeline>, api_key: Option<String>) -> Router {
    let api_key = api_key.filter(|k| !k.is_empty()).map(Arc::<str>::from);
    if api_key.is_none() {
        warn!("API_KEY not set, operator API is unauthenticated");
    }
    let state = AppState { pipeline, api_key };

    let api = Router::new()
        .route("/overview", get(overview))
        .route("/urls", get(list_urls).post(add_urls).delete(clear_urls))
        .route("/urls/:id/toggle", post(toggle_url))
        .route("/urls/:id", delete(remove_url))
        .route("/endpoints", post(add_endpoints))
        .route("/endpoints/refresh", post(refresh_endpoints))
        .route("/extraction", post(start_extraction))
        .route("/translation", post(start_translation))
        .route("/progress", get(list_progress).delete(reset_progress))
        .route("/missing", get(list_missing).delete(clear_missing))
        .route("/missing/purge", post(purge_resolved))
        .route("/lookups", post(report_lookups))
        .route("/missing/:id/translate", post(translate_missing_key))
        .route("/locales/:locale/missing/translate", post(translate_missing_for_locale))
        .route("/locales/:locale/entries", get(list_entries).put(save_entry))
        .route("/locales/:locale/translate", post(translate_single))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_api_key));

    Router::new()
        .route("/health", get(health))
        .nest("/api", api)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn require_api_key(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let Some(expected) = state.api_key.as_deref() else {
        return next.run(request).await;
    };

    let provided = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(bearer_token);

    match provided {
        Some(token) if constant_time_compare(token, expected) => next.run(request).await,
        _ => {
            warn!("Rejected API request with missing or invalid API key");
            (
                StatusCode::UNAUTHORIZED,
                Json(ErrorResponse {
                    error: "Unauthorized".to_string(),
                }),
            )
                .into_response()
        }
    }
}

async fn health() -> &'static str {
    "OK"
}

async fn overview(State(state): State<AppState>) -> ApiResult<Overview> {
    Ok(Json(state.pipeline.overview().await?))
}

async fn list_urls(State(state): State<AppState>, Query(query): Query<UrlQuery>) -> ApiResult<Vec<UrlEntry>> {
    let kind = query.kind.unwrap_or(UrlKind::Page);
    Ok(Json(state.pipeline.list_urls(kind, query.filter.as_deref()).await?))
}

async fn add_urls(State(state): State<AppState>, Json(body): Json<LinesBody>) -> Json<StatusMessage> {
    Json(state.pipeline.add_bulk_urls(&body.lines).await)
}

async fn clear_urls(State(state): State<AppState>, Query(query): Query<ClearQuery>) -> Json<StatusMessage> {
    Json(state.pipeline.clear_urls(query.kind).await)
}

async fn toggle_url(State(state): State<AppState>, Path(id): Path<i64>) -> Json<StatusMessage> {
    Json(state.pipeline.toggle_url(id).await)
}

async fn remove_url(State(state): State<AppState>, Path(id): Path<i64>) -> Json<StatusMessage> {
    Json(state.pipeline.remove_url(id).await)
}

async fn add_endpoints(State(state): State<AppState>, Json(body): Json<LinesBody>) -> Json<StatusMessage> {
    Json(state.pipeline.add_api_endpoints(&body.lines).await)
}

async fn refresh_endpoints(State(state): State<AppState>) -> Json<StatusMessage> {
    Json(state.pipeline.refresh_api_endpoints().await)
}

async fn start_extraction(State(state): State<AppState>) -> Json<StatusMessage> {
    Json(state.pipeline.start_extraction().await)
}

async fn start_translation(State(state): State<AppState>) -> Json<StatusMessage> {
    Json(state.pipeline.start_translation().await)
}

async fn list_progress(State(state): State<AppState>) -> ApiResult<Vec<ProgressSnapshot>> {
    Ok(Json(state.pipeline.progress().list().await?))
}

async fn reset_progress(State(state): State<AppState>) -> Json<StatusMessage> {
    Json(state.pipeline.reset_progress().await)
}

async fn list_missing(
    State(state): State<AppState>,
    Query(query): Query<MissingQuery>,
) -> ApiResult<Vec<MissingKeyRecord>> {
    let records = state
        .pipeline
        .missing_keys(query.locale.as_deref(), query.search.as_deref())
        .await?;
    Ok(Json(records))
}

async fn clear_missing(State(state): State<AppState>) -> Json<StatusMessage> {
    Json(state.pipeline.clear_missing().await)
}

async fn purge_resolved(State(state): State<AppState>) -> Json<StatusMessage> {
    Json(state.pipeline.purge_resolved().await)
}

async fn report_lookups(State(state): State<AppState>, Json(lookups): Json<Vec<Lookup>>) -> Json<StatusMessage> {
    Json(state.pipeline.report_lookups(&lookups).await)
}

async fn translate_missing_key(State(state): State<AppState>, Path(id): Path<i64>) -> Json<StatusMessage> {
    Json(state.pipeline.translate_missing_key(id).await)
}

async fn translate_missing_for_locale(
    State(state): State<AppState>,
    Path(locale): Path<String>,
) -> Json<StatusMessage> {
    Json(state.pipeline.translate_missing_for_locale(&locale).await)
}

async fn list_entries(
    State(state): State<AppState>,
    Path(locale): Path<String>,
    Query(query): Query<SearchQuery>,
) -> Json<Vec<EditableEntry>> {
    Json(state.pipeline.entries(&locale, query.search.as_deref()).await)
}

async fn save_entry(
    State(state): State<AppState>,
    Path(locale): Path<String>,
    Json(body): Json<SaveBody>,
) -> Json<StatusMessage> {
    Json(state.pipeline.save_translation(&locale, &body.key, &body.value).await)
}

async fn translate_single(
    State(state): State<AppState>,
    Path(locale): Path<String>,
    Json(body): Json<KeyBody>,
) -> Json<StatusMessage> {
    Json(state.pipeline.translate_single(&locale, &body.key).await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Config, DEFAULT_SYSTEM_PROMPT};
    use crate::db::Database;
    use crate::pipeline::{CollectionContext, DefaultKeyFilter};
    use crate::render::Renderer;
    use crate::service::{Collaborators, StatusLevel};
    use crate::translator::Translate;
    use async_trait::async_trait;
    use tempfile::TempDir;

    // ==================== Helper Functions ====================

    struct NoopRenderer;

    #[async_trait]
    impl Renderer for NoopRenderer {
        async fn render(&self, _path_and_query: &str, _ctx: &CollectionContext) -> anyhow::Result<()> {
            Ok(())
        }
    }

    struct ShoutTranslator;

    #[async_trait]
    impl Translate for ShoutTranslator {
        async fn translate(&self, text: &str, _locale: &str) -> Option<String> {
            Some(text.to_uppercase())
        }

        fn is_configured(&self) -> bool {
            true
        }
    }

    fn create_test_config(dir: &TempDir) -> Config {
        Config {
            environment: "test".to_string(),
            port: 0,
            api_key: None,
            database_url: "sqlite::memory:".to_string(),
            lang_dir: dir.path().to_path_buf(),
            source_locale: "en".to_string(),
            target_locales: vec!["es".to_string()],
            language_names: vec![],
            openai_api_key: None,
            openai_model: "gpt-4o-mini".to_string(),
            openai_api_url: "http://127.0.0.1:9".to_string(),
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            rate_limit_per_minute: 300,
            translation_batch_size: 20,
            translation_call_delay_ms: 0,
            worker_count: 1,
            scan_delay_ms: 0,
            scan_timeout_secs: 5,
            translation_timeout_secs: 5,
            job_max_attempts: 1,
            url_fetch_timeout_secs: 5,
            render_base_url: "http://127.0.0.1:9".to_string(),
            render_concurrent: true,
            refresh_times: vec![],
        }
    }

    /// Serve the router on an ephemeral port; returns its base URL.
    async fn spawn_server(dir: &TempDir, api_key: Option<&str>) -> String {
        let config = create_test_config(dir);
        let db = Database::new("sqlite::memory:").await.expect("db");
        let pipeline = Pipeline::build(
            &config,
            db,
            Collaborators {
                renderer: Arc::new(NoopRenderer),
                translator: Arc::new(ShoutTranslator),
                filter: Arc::new(DefaultKeyFilter::default()),
            },
        )
        .expect("Should build pipeline");

        let app = router(Arc::new(pipeline), api_key.map(str::to_string));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Should bind");
        let addr = listener.local_addr().expect("Should have address");
        tokio::spawn(async move {
            axum::serve(listener, app).await.expect("Server failed");
        });

        format!("http://{}", addr)
    }

    // ==================== Auth Tests ====================

    #[tokio::test]
    async fn test_health_is_public() {
        let dir = TempDir::new().expect("temp dir");
        let base = spawn_server(&dir, Some("secret")).await;

        let response = reqwest::get(format!("{}/health", base)).await.expect("request");
        assert_eq!(response.status(), 200);
        assert_eq!(response.text().await.expect("body"), "OK");
    }

    #[tokio::test]
    async fn test_api_requires_bearer_token() {
        let dir = TempDir::new().expect("temp dir");
        let base = spawn_server(&dir, Some("secret")).await;
        let client = reqwest::Client::new();

        let response = client.get(format!("{}/api/overview", base)).send().await.expect("request");
        assert_eq!(response.status(), 401);

        let response = client
            .get(format!("{}/api/overview", base))
            .bearer_auth("wrong")
            .send()
            .await
            .expect("request");
        assert_eq!(response.status(), 401);

        let response = client
            .get(format!("{}/api/overview", base))
            .bearer_auth("secret")
            .send()
            .await
            .expect("request");
        assert_eq!(response.status(), 200);
    }

    #[tokio::test]
    async fn test_api_open_without_configured_key() {
        let dir = TempDir::new().expect("temp dir");
        let base = spawn_server(&dir, None).await;

        let response = reqwest::get(format!("{}/api/progress", base)).await.expect("request");
        assert_eq!(response.status(), 200);
        let body: serde_json::Value = response.json().await.expect("json");
        assert_eq!(body, serde_json::json!([]));
    }

    // ==================== Action Tests ====================

    #[tokio::test]
    async fn test_add_and_list_urls() {
        let dir = TempDir::new().expect("temp dir");
        let base = spawn_server(&dir, None).await;
        let client = reqwest::Client::new();

        let message: StatusMessage = client
            .post(format!("{}/api/urls", base))
            .json(&serde_json::json!({"lines": "https://a.test/\nhttps://b.test/"}))
            .send()
            .await
            .expect("request")
            .json()
            .await
            .expect("json");
        assert_eq!(message.level, StatusLevel::Success);

        let urls: serde_json::Value = client
            .get(format!("{}/api/urls?kind=page&filter=b.test", base))
            .send()
            .await
            .expect("request")
            .json()
            .await
            .expect("json");
        assert_eq!(urls.as_array().map(Vec::len), Some(1));
        assert_eq!(urls[0]["url"], "https://b.test/");
        assert_eq!(urls[0]["kind"], "page");
    }

    #[tokio::test]
    async fn test_save_and_list_entries() {
        let dir = TempDir::new().expect("temp dir");
        std::fs::write(dir.path().join("en.json"), r#"{"Hello": "Hello"}"#).expect("write");
        let base = spawn_server(&dir, None).await;
        let client = reqwest::Client::new();

        let message: StatusMessage = client
            .put(format!("{}/api/locales/es/entries", base))
            .json(&serde_json::json!({"key": "Hello", "value": "Hola"}))
            .send()
            .await
            .expect("request")
            .json()
            .await
            .expect("json");
        assert_eq!(message.text, "Translation saved.");

        let entries: serde_json::Value = client
            .get(format!("{}/api/locales/es/entries?search=hol", base))
            .send()
            .await
            .expect("request")
            .json()
            .await
            .expect("json");
        assert_eq!(entries[0]["target"], "Hola");
        assert_eq!(entries[0]["is_translated"], true);
    }

    #[tokio::test]
    async fn test_reported_target_miss_reaches_ledger() {
        let dir = TempDir::new().expect("temp dir");
        let base = spawn_server(&dir, Some("secret")).await;
        let client = reqwest::Client::new();

        let message: StatusMessage = client
            .post(format!("{}/api/lookups", base))
            .bearer_auth("secret")
            .json(&serde_json::json!([
                {"key": "Checkout", "locale": "es", "found": false},
                {"key": "Checkout", "locale": "en"},
                {"key": "Checkout", "locale": "de", "found": false}
            ]))
            .send()
            .await
            .expect("request")
            .json()
            .await
            .expect("json");
        assert_eq!(message.level, StatusLevel::Success);

        let missing: serde_json::Value = client
            .get(format!("{}/api/missing?locale=es", base))
            .bearer_auth("secret")
            .send()
            .await
            .expect("request")
            .json()
            .await
            .expect("json");
        assert_eq!(missing.as_array().map(Vec::len), Some(1));
        assert_eq!(missing[0]["key"], "Checkout");
        assert_eq!(missing[0]["occurrences"], 1);

        let all: serde_json::Value = client
            .get(format!("{}/api/missing", base))
            .bearer_auth("secret")
            .send()
            .await
            .expect("request")
            .json()
            .await
            .expect("json");
        assert_eq!(all.as_array().map(Vec::len), Some(1), "Unconfigured locale must not be recorded");
    }

    #[tokio::test]
    async fn test_overview_shape() {
        let dir = TempDir::new().expect("temp dir");
        let base = spawn_server(&dir, None).await;

        let overview: serde_json::Value = reqwest::get(format!("{}/api/overview", base))
            .await
            .expect("request")
            .json()
            .await
            .expect("json");

        assert_eq!(overview["source_locale"], "en");
        assert_eq!(overview["extraction"]["status"], "idle");
        assert_eq!(overview["locales"][0]["locale"], "es");
        assert_eq!(overview["translator_configured"], true);
        assert!(overview["translator_metrics"].is_null());
    }
}
