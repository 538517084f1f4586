//! The indexing worker (spec.md §4.1, §5): job-level retry backoff,
//! contextual chunk enrichment, the per-file ingest pipeline, and the
//! executor supervisor that runs `worker_concurrency` of them concurrently.

pub mod backoff;
pub mod contextualize;
pub mod pipeline;
pub mod supervisor;

pub use pipeline::{run_ingest, IngestOutcome, PipelineDeps};
pub use supervisor::Supervisor;
