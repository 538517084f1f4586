//! Postgres-backed persistence (spec.md §6 "Persistence") and the hybrid
//! retriever (spec.md §4.5) built on top of it.

pub mod postgres;
pub mod retriever;
pub mod session;
pub mod traits;

pub use postgres::PgStore;
pub use retriever::{FusionStrategy, HybridRetriever, RankedChunk};
pub use session::{AppSecretCrypto, OwnedSecretCrypto, TokenCrypto};
pub use traits::{
    ChunkStore, ClaimedJob, ConversationStore, FailedTaskStore, FileStore, FolderStore, JobStore, SessionStore,
    UserStore,
};
