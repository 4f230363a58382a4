//! MedStack Backend - Device Compatibility Orchestrator
//!
//! SSE-streaming API for multi-agent medical device compatibility
//! reasoning: intent classification, equipment extraction, deterministic
//! chain evaluation, and streamed answers.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use medstack_backend::{
    api::{build_router, AppState},
    catalog::DeviceStore,
    config::Config,
    engines::vector::VectorEngine,
    llm::provider_from_config,
    orchestrator::Orchestrator,
    session::{SessionDb, SessionManager},
    vector::VectorStoreClient,
};

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    init_tracing();

    info!("🚀 MedStack backend starting");

    let config = Arc::new(Config::from_env()?);

    // Device catalog: read-only snapshot loaded once at startup.
    let catalog = Arc::new(
        DeviceStore::load_from_file(&config.catalog_path)
            .with_context(|| format!("Failed to load device catalog from {}", config.catalog_path))?,
    );
    info!("📦 Catalog ready: {} device records", catalog.len());

    // Session store.
    let session_db = Arc::new(SessionDb::new(&config.session_db_path)?);
    let sessions = Arc::new(SessionManager::new(session_db));
    info!("💾 Session store initialized at: {}", config.session_db_path);

    // LLM provider.
    let provider = provider_from_config(&config)?;
    info!("🧠 LLM provider: {}", config.llm_provider);

    // Vector stores (optional).
    let vector_engine = match &config.vector_store_id {
        Some(store_id) => {
            let api_key = config
                .openai_api_key
                .clone()
                .context("OPENAI_API_KEY required for the vector store")?;
            let http = reqwest::Client::builder()
                .timeout(Duration::from_secs(config.external_timeout_secs))
                .build()
                .context("Failed to build vector store HTTP client")?;

            let docs = Arc::new(VectorStoreClient::new(
                http.clone(),
                api_key.clone(),
                store_id.clone(),
            ));
            let guidelines = config.guideline_store_id.as_ref().map(|id| {
                info!("📚 Guideline store configured: {id}");
                Arc::new(VectorStoreClient::new(http.clone(), api_key.clone(), id.clone()))
            });
            info!("📄 Vector store configured: {store_id}");
            Some(Arc::new(VectorEngine::new(docs, guidelines)))
        }
        None => {
            warn!("Vector store NOT configured (set VECTOR_STORE_ID); documentation queries degrade");
            None
        }
    };

    let orchestrator = Arc::new(Orchestrator::new(
        provider,
        config.clone(),
        catalog.clone(),
        vector_engine,
    ));

    let state = AppState {
        orchestrator,
        sessions,
        catalog,
    };
    let app = build_router(state).layer(CorsLayer::permissive());

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    info!("🌐 Listening on {addr}");
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    axum::serve(listener, app).await.context("Server exited")?;

    Ok(())
}

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}
