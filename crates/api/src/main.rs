mod config;
mod handlers;
mod metrics;

use analysis::AnalysisOrchestrator;
use anyhow::{Context, Result};
use config::{AppConfig, ModelConfig, ModelProvider};
use extract::{AnthropicClient, ModelInvoker, OllamaClient};
use handlers::{AppState, create_router};
use ingest::ChunkerConfig;
use metrics::Metrics;
use std::sync::Arc;
use std::time::Duration;
use store::Store;
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

const DEFAULT_LOG_FILTER: &str =
    "api=info,analysis=info,store=info,extract=info,ingest=info,tower_http=info";

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let config = AppConfig::from_env()?;
    init_tracing(config.log_json);
    config.validate()?;

    let store = Store::open(&config.database.path).context("Failed to open database")?;
    let invoker = build_invoker(&config.model)?;
    info!(
        provider = ?config.model.provider,
        model = %config.model.name,
        max_chunk_chars = config.analysis.max_chunk_chars,
        "Model client ready"
    );

    let orchestrator = AnalysisOrchestrator::new(
        store.clone(),
        invoker,
        ChunkerConfig {
            max_chars: config.analysis.max_chunk_chars,
        },
    );

    let state = AppState {
        store,
        orchestrator: Arc::new(orchestrator),
        metrics: Metrics::new(),
    };
    let app = create_router(state);

    let listener = tokio::net::TcpListener::bind(&config.server.bind_addr)
        .await
        .with_context(|| format!("Failed to bind {}", config.server.bind_addr))?;

    info!("Server listening on http://{}", config.server.bind_addr);

    axum::serve(listener, app).await?;
    Ok(())
}

fn init_tracing(json: bool) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| DEFAULT_LOG_FILTER.into());
    let registry = tracing_subscriber::registry().with(filter);

    if json {
        registry.with(fmt::layer().json()).init();
    } else {
        registry.with(fmt::layer()).init();
    }
}

fn build_invoker(config: &ModelConfig) -> Result<Arc<dyn ModelInvoker>> {
    let timeout = Duration::from_secs(config.request_timeout_secs);

    let invoker: Arc<dyn ModelInvoker> = match config.provider {
        ModelProvider::Anthropic => {
            let api_key = config
                .api_key
                .clone()
                .context("ANTHROPIC_API_KEY is not set")?;
            Arc::new(AnthropicClient::new(
                config.base_url.clone(),
                config.name.clone(),
                api_key,
                config.max_tokens,
                timeout,
            )?)
        }
        ModelProvider::Ollama => Arc::new(OllamaClient::new(
            config.base_url.clone(),
            config.name.clone(),
            timeout,
        )?),
    };

    Ok(invoker)
}
