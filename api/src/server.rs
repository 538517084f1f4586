//! Builds the axum application: the shared [`AppState`], the route table,
//! and `start_server`, grounded on the teacher's `create_router`/
//! `start_server` split in `backend/api/src/server.rs` (a CORS layer, a
//! single `with_state` router, `axum::serve` over a `TcpListener`).

use axum::extract::DefaultBodyLimit;
use axum::routing::{delete, get, post};
use axum::Router;
use drivescout_core::config::AppConfig;
use drivescout_core::oauth::TokenRefresher;
use drivescout_embeddings::{Embedder, Reranker};
use drivescout_ingestion::extract::VisionProvider;
use drivescout_ingestion::{DriveClient, OcrProvider};
use drivescout_llm::agent::{AgentTools, ConversationSink};
use drivescout_llm::ChatClient;
use drivescout_storage::session::TokenCrypto;
use drivescout_storage::{
    ChunkStore, ConversationStore, FileStore, FolderStore, HybridRetriever, JobStore, SessionStore, UserStore,
};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::job_manager::JobManager;

/// Every dependency a handler might need, built once at startup and
/// shared behind an `Arc` (spec.md §9: config is an immutable record
/// passed by reference, never a mutable global).
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub users: Arc<dyn UserStore>,
    pub folders: Arc<dyn FolderStore>,
    pub files: Arc<dyn FileStore>,
    pub chunks: Arc<dyn ChunkStore>,
    pub jobs: Arc<dyn JobStore>,
    pub sessions: Arc<dyn SessionStore>,
    pub conversations: Arc<dyn ConversationStore>,
    pub retriever: Arc<HybridRetriever>,
    pub drive: Arc<dyn DriveClient>,
    pub ocr: Arc<dyn OcrProvider>,
    pub vision: Arc<dyn VisionProvider>,
    pub embedder: Arc<dyn Embedder>,
    pub reranker: Arc<dyn Reranker>,
    pub chat: Arc<dyn ChatClient>,
    pub token_refresher: Arc<dyn TokenRefresher>,
    pub token_crypto: Arc<dyn TokenCrypto>,
    pub agent_tools: Arc<dyn AgentTools>,
    pub conversation_sink: Arc<dyn ConversationSink>,
    pub sync_limiter: JobManager,
}

pub fn create_router(state: Arc<AppState>) -> Router {
    let body_limit = state.config.max_request_size_bytes;

    let folder_routes = Router::new()
        .route("/api/folders", post(crate::handlers::folders::create_folder))
        .route("/api/folders", get(crate::handlers::folders::list_folders))
        .route("/api/folders/:folder_id", get(crate::handlers::folders::get_folder))
        .route("/api/folders/:folder_id", delete(crate::handlers::folders::delete_folder))
        .route("/api/folders/:folder_id/status", get(crate::handlers::folders::folder_status))
        .route("/api/folders/:folder_id/sync", post(crate::handlers::folders::trigger_sync))
        .route(
            "/api/folders/:folder_id/conversations",
            post(crate::handlers::conversations::create_conversation),
        )
        .route(
            "/api/folders/:folder_id/conversations",
            get(crate::handlers::conversations::list_conversations),
        )
        .route(
            "/api/folders/:folder_id/files/:file_id/chunks",
            get(crate::handlers::chunks::get_file_chunk_context),
        );

    let conversation_routes = Router::new()
        .route(
            "/api/conversations/:conversation_id/messages",
            get(crate::handlers::conversations::list_messages),
        )
        .route("/api/conversations/:conversation_id/chat", post(crate::handlers::chat::chat_stream));

    Router::new()
        .route("/healthz", get(crate::handlers::health::healthz))
        .merge(folder_routes)
        .merge(conversation_routes)
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn start_server(state: Arc<AppState>, port: u16) -> anyhow::Result<()> {
    let app = create_router(state);
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port)).await?;
    tracing::info!(port, "drivescout api listening");
    axum::serve(listener, app).await?;
    Ok(())
}
