//! The public HTTP API binary: builds every external-capability client and
//! repository, wires them into an [`server::AppState`], and serves the
//! route table until a shutdown signal arrives.
//!
//! Grounded on `worker/src/main.rs`'s provider-wiring pattern; the axum
//! `serve`/graceful-shutdown shape is grounded on the teacher's
//! `backend/api/src/server.rs::start_server`.

use drivescout_core::config::AppConfig;
use drivescout_core::oauth::HttpTokenRefresher;
use drivescout_embeddings::embedder::HttpEmbedder;
use drivescout_embeddings::reranker::HttpReranker;
use drivescout_ingestion::drive::GoogleDriveClient;
use drivescout_ingestion::extract::ChatVisionProvider;
use drivescout_ingestion::ocr::HttpOcrProvider;
use drivescout_llm::client::HttpChatClient;
use drivescout_storage::session::OwnedSecretCrypto;
use drivescout_storage::{FusionStrategy, HybridRetriever, PgStore};
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;

mod agent_tools;
mod auth;
mod handlers;
mod job_manager;
mod server;

use agent_tools::{ApiAgentTools, ApiConversationSink};
use job_manager::JobManager;
use server::AppState;

const SYNC_CONCURRENCY: usize = 4;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    setup_tracing();

    let config = AppConfig::from_env()?;
    let port: u16 = std::env::var("PORT").ok().and_then(|v| v.parse().ok()).unwrap_or(8080);
    tracing::info!(port, "starting drivescout api");

    let pool = PgPoolOptions::new()
        .max_connections(config.db_pool_size)
        .acquire_timeout(config.db_pool_timeout)
        .connect(&config.database_url)
        .await?;
    let store = Arc::new(PgStore::new(pool.clone()));

    let drive = Arc::new(GoogleDriveClient::new(&config));
    let vision_chat = Arc::new(HttpChatClient::new(&config, config.claude_fast_model.clone()));
    let chat = Arc::new(HttpChatClient::new(&config, config.claude_model.clone()));
    let embedder = Arc::new(HttpEmbedder::new(&config));
    let reranker = Arc::new(HttpReranker::new(&config));
    let ocr = Arc::new(HttpOcrProvider::new(&config));
    let vision = Arc::new(ChatVisionProvider::new(vision_chat));
    let token_refresher = Arc::new(HttpTokenRefresher::new(
        std::env::var("OAUTH_TOKEN_URL").unwrap_or_default(),
        std::env::var("OAUTH_CLIENT_ID").unwrap_or_default(),
        std::env::var("OAUTH_CLIENT_SECRET").unwrap_or_default(),
    ));
    let token_crypto = Arc::new(OwnedSecretCrypto { secret_key: config.secret_key.clone() });

    let retriever = Arc::new(HybridRetriever::new(
        pool,
        embedder.clone(),
        reranker.clone(),
        FusionStrategy::default(),
    ));

    let agent_tools = Arc::new(ApiAgentTools {
        folders: store.clone(),
        files: store.clone(),
        chunks: store.clone(),
        sessions: store.clone(),
        retriever: retriever.clone(),
        drive: drive.clone(),
        ocr: ocr.clone(),
        vision: vision.clone(),
        token_refresher: token_refresher.clone(),
        token_crypto: token_crypto.clone(),
    });
    let conversation_sink = Arc::new(ApiConversationSink { conversations: store.clone() });

    let state = Arc::new(AppState {
        config: Arc::new(config.clone()),
        users: store.clone(),
        folders: store.clone(),
        files: store.clone(),
        chunks: store.clone(),
        jobs: store.clone(),
        sessions: store.clone(),
        conversations: store.clone(),
        retriever,
        drive,
        ocr,
        vision,
        embedder,
        reranker,
        chat,
        token_refresher,
        token_crypto,
        agent_tools,
        conversation_sink,
        sync_limiter: JobManager::new(SYNC_CONCURRENCY),
    });

    server::start_server(state, port).await
}

fn setup_tracing() {
    tracing_subscriber::fmt()
        .with_target(false)
        .with_thread_ids(false)
        .with_thread_names(false)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .compact()
        .init();
}
