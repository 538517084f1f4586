//! The indexing worker process binary: builds every external-capability
//! client, wires them into a `PgStore`-backed `PipelineDeps`, and runs the
//! executor supervisor until a shutdown signal arrives.
//!
//! Grounded on `api/src/main.rs`'s tracing setup and `examples/other_examples`'
//! codetriever `worker.rs` for the standalone-binary supervisor shape.

use drivescout_core::config::AppConfig;
use drivescout_embeddings::embedder::HttpEmbedder;
use drivescout_ingestion::drive::GoogleDriveClient;
use drivescout_ingestion::extract::ChatVisionProvider;
use drivescout_ingestion::ocr::HttpOcrProvider;
use drivescout_llm::client::HttpChatClient;
use drivescout_storage::session::OwnedSecretCrypto;
use drivescout_storage::PgStore;
use drivescout_worker::{PipelineDeps, Supervisor};
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    setup_tracing();

    let config = AppConfig::from_env()?;
    tracing::info!(worker_concurrency = config.worker_concurrency, "starting worker");

    let pool = PgPoolOptions::new()
        .max_connections(config.worker_concurrency as u32)
        .acquire_timeout(config.db_pool_timeout)
        .connect(&config.database_url)
        .await?;
    let store = Arc::new(PgStore::new(pool));

    let drive = Arc::new(GoogleDriveClient::new(&config));
    let vision_chat = Arc::new(HttpChatClient::new(&config, config.claude_fast_model.clone()));
    let chat = Arc::new(HttpChatClient::new(&config, config.claude_model.clone()));
    let embedder = Arc::new(HttpEmbedder::new(&config));
    let ocr = Arc::new(HttpOcrProvider::new(&config));
    let vision = Arc::new(ChatVisionProvider::new(vision_chat));
    let token_refresher = drivescout_core::oauth::HttpTokenRefresher::new(
        std::env::var("OAUTH_TOKEN_URL").unwrap_or_default(),
        std::env::var("OAUTH_CLIENT_ID").unwrap_or_default(),
        std::env::var("OAUTH_CLIENT_SECRET").unwrap_or_default(),
    );

    let deps = Arc::new(PipelineDeps {
        config: Arc::new(config.clone()),
        sessions: store.clone(),
        folders: store.clone(),
        files: store.clone(),
        chunks: store.clone(),
        jobs: store.clone(),
        dlq: store.clone(),
        drive,
        ocr,
        vision,
        embedder,
        chat,
        token_refresher: Arc::new(token_refresher),
        token_crypto: Arc::new(OwnedSecretCrypto { secret_key: config.secret_key.clone() }),
    });

    let supervisor = Supervisor::new(deps, config.worker_concurrency);
    let shutdown = supervisor.shutdown_handle();

    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        tracing::info!("shutdown signal received, draining executors");
        shutdown.store(true, std::sync::atomic::Ordering::Relaxed);
    });

    supervisor.run().await;
    Ok(())
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
