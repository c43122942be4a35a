// ============================================================================
// Messaging - ingestion entrypoint
// ============================================================================
//
// - kafka:    topic consumer (transport)
// - pipeline: decode/validate, bounded work queue, create workers
//
// ============================================================================

mod kafka;
mod pipeline;

pub use kafka::OrderConsumer;
pub use pipeline::{start_workers, IngestConfig, IngestError, IngestPipeline, WorkerPool};
