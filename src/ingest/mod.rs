//! Document ingestion: the pipeline itself and the worker queue that runs
//! it out of band.

mod pipeline;
mod queue;

pub use pipeline::{IngestOutcome, IngestionPipeline, ObjectRef};
pub use queue::IngestQueue;
