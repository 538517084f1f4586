//! Immutable configuration record built once at startup from environment
//! variables and passed around as `Arc<AppConfig>`. No global mutable
//! settings anywhere in the workspace.

use crate::error::Error;
use std::env;
use std::time::Duration;

fn env_var(key: &str) -> Result<String, Error> {
    env::var(key).map_err(|_| Error::Validation(format!("missing required env var {key}")))
}

fn env_var_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parse_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub redis_url: Option<String>,
    pub secret_key: String,
    pub session_expire_hours: i64,

    pub worker_concurrency: usize,
    pub max_request_size_bytes: usize,
    pub max_chat_message_length: usize,
    pub max_conversation_title_length: usize,
    pub sync_interval: Duration,
    pub job_soft_deadline: Duration,
    pub job_hard_deadline: Duration,

    pub db_pool_size: u32,
    pub db_max_overflow: u32,
    pub db_pool_recycle_secs: u64,
    pub db_pool_timeout: Duration,
    pub db_statement_timeout_ms: u64,

    pub contextual_chunking_enabled: bool,
    pub claude_model: String,
    pub claude_fast_model: String,

    pub posthog_enabled: bool,
    pub posthog_api_key: Option<String>,
    pub posthog_host: Option<String>,

    pub drive_api_base_url: String,
    pub llm_api_base_url: String,
    pub llm_api_key: String,
    pub embedder_api_base_url: String,
    pub embedder_api_key: String,
    pub reranker_api_base_url: String,
    pub reranker_api_key: String,
    pub ocr_api_base_url: String,
    pub ocr_api_key: String,

    pub http_timeout_standard: Duration,
    pub http_timeout_ocr: Duration,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, Error> {
        Ok(Self {
            database_url: env_var("DATABASE_URL")?,
            redis_url: env::var("REDIS_URL").ok(),
            secret_key: env_var("SECRET_KEY")?,
            session_expire_hours: env_parse_or("SESSION_EXPIRE_HOURS", 24),

            worker_concurrency: env_parse_or("WORKER_CONCURRENCY", 20),
            max_request_size_bytes: env_parse_or("MAX_REQUEST_SIZE_BYTES", 1024 * 1024),
            max_chat_message_length: env_parse_or("MAX_CHAT_MESSAGE_LENGTH", 32_000),
            max_conversation_title_length: env_parse_or("MAX_CONVERSATION_TITLE_LENGTH", 255),
            sync_interval: Duration::from_secs(env_parse_or("SYNC_INTERVAL_SECS", 3600)),
            job_soft_deadline: Duration::from_secs(env_parse_or("JOB_SOFT_DEADLINE_SECS", 14 * 60)),
            job_hard_deadline: Duration::from_secs(env_parse_or("JOB_HARD_DEADLINE_SECS", 15 * 60)),

            db_pool_size: env_parse_or("CELERY_DB_POOL_SIZE", 10),
            db_max_overflow: env_parse_or("CELERY_DB_MAX_OVERFLOW", 5),
            db_pool_recycle_secs: env_parse_or("CELERY_DB_POOL_RECYCLE", 1800),
            db_pool_timeout: Duration::from_secs(env_parse_or("DB_POOL_TIMEOUT", 30)),
            db_statement_timeout_ms: env_parse_or("CELERY_DB_STATEMENT_TIMEOUT_MS", 30_000),

            contextual_chunking_enabled: env_parse_or("CONTEXTUAL_CHUNKING_ENABLED", true),
            claude_model: env_var_or("CLAUDE_MODEL", "claude-sonnet-4-5"),
            claude_fast_model: env_var_or("CLAUDE_FAST_MODEL", "claude-haiku-4-5"),

            posthog_enabled: env_parse_or("POSTHOG_ENABLED", false),
            posthog_api_key: env::var("POSTHOG_API_KEY").ok(),
            posthog_host: env::var("POSTHOG_HOST").ok(),

            drive_api_base_url: env_var_or(
                "DRIVE_API_BASE_URL",
                "https://www.googleapis.com/drive/v3",
            ),
            llm_api_base_url: env_var("LLM_API_BASE_URL")?,
            llm_api_key: env_var("LLM_API_KEY")?,
            embedder_api_base_url: env_var("EMBEDDER_API_BASE_URL")?,
            embedder_api_key: env_var("EMBEDDER_API_KEY")?,
            reranker_api_base_url: env_var("RERANKER_API_BASE_URL")?,
            reranker_api_key: env_var("RERANKER_API_KEY")?,
            ocr_api_base_url: env_var("OCR_API_BASE_URL")?,
            ocr_api_key: env_var("OCR_API_KEY")?,

            http_timeout_standard: Duration::from_secs(30),
            http_timeout_ocr: Duration::from_secs(60),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_parse_or_falls_back_on_missing_or_bad_value() {
        assert_eq!(env_parse_or::<usize>("DRIVESCOUT_TEST_DOES_NOT_EXIST", 20), 20);
    }
}
