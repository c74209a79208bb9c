use ai_translate::config::Config;
use ai_translate::db::Database;
use ai_translate::pipeline::DefaultKeyFilter;
use ai_translate::rate_limit::RateLimiter;
use ai_translate::render::HttpMarkerRenderer;
use ai_translate::scheduler;
use ai_translate::server;
use ai_translate::service::{Collaborators, Pipeline};
use ai_translate::translator::OpenAiTranslator;
use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file (ignored in production)
    let _ = dotenvy::dotenv();

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("ai_translate=info".parse()?),
        )
        .init();

    info!("Starting AI translation service");

    let config = Config::from_env()?;
    info!(
        "Environment: {}, source locale: {}, targets: {}",
        config.environment,
        config.source_locale,
        config.target_locales.join(", ")
    );

    let db = Database::new(&config.database_url).await?;

    let limiter = Arc::new(RateLimiter::per_minute(config.rate_limit_per_minute));
    let translator = OpenAiTranslator::new(&config, config.locales()?, limiter)?;
    if config.openai_api_key.is_none() {
        warn!("OPENAI_API_KEY not set, translation actions will be refused");
    }
    let renderer = HttpMarkerRenderer::new(
        &config.render_base_url,
        config.scan_timeout(),
        config.render_concurrent,
    )?;

    let pipeline = Arc::new(Pipeline::build(
        &config,
        db,
        Collaborators {
            renderer: Arc::new(renderer),
            translator: Arc::new(translator),
            filter: Arc::new(DefaultKeyFilter::default()),
        },
    )?);

    let _scheduler = scheduler::start_scheduler(Arc::clone(&pipeline), &config.refresh_times).await?;

    let app = server::router(pipeline, config.api_key.clone());

    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!("✓ Listening on {}", addr);

    axum::serve(listener, app).await.context("Server error")?;
    Ok(())
}
