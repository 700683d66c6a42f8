use std::sync::Arc;

use tokio::sync::{mpsc, Semaphore};

use super::pipeline::{IngestOutcome, IngestionPipeline, ObjectRef};
use crate::core::errors::ApiError;

#[derive(Debug)]
struct IngestJob {
    document_id: String,
    object: ObjectRef,
}

/// Out-of-band ingestion workers.
///
/// `submit` never waits; a dispatcher task pulls jobs and runs at most
/// `concurrency` pipelines at once.
#[derive(Clone)]
pub struct IngestQueue {
    tx: mpsc::UnboundedSender<IngestJob>,
}

impl IngestQueue {
    /// Spawn the dispatcher. Must be called inside a tokio runtime.
    pub fn start(pipeline: Arc<IngestionPipeline>, concurrency: usize) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<IngestJob>();
        let permits = Arc::new(Semaphore::new(concurrency.max(1)));

        tokio::spawn(async move {
            while let Some(job) = rx.recv().await {
                let Ok(permit) = permits.clone().acquire_owned().await else {
                    break;
                };
                let pipeline = pipeline.clone();
                tokio::spawn(async move {
                    let outcome = pipeline.run(&job.document_id, &job.object).await;
                    match outcome {
                        IngestOutcome::Ready { chunks } => {
                            tracing::debug!("Ingest job {} indexed {} chunks", job.document_id, chunks)
                        }
                        IngestOutcome::Empty => {
                            tracing::debug!("Ingest job {} produced no chunks", job.document_id)
                        }
                        IngestOutcome::Failed { reason } => {
                            tracing::debug!("Ingest job {} failed: {}", job.document_id, reason)
                        }
                    }
                    drop(permit);
                });
            }
            tracing::info!("Ingest queue closed");
        });

        Self { tx }
    }

    pub fn submit(&self, document_id: &str, object: ObjectRef) -> Result<(), ApiError> {
        self.tx
            .send(IngestJob {
                document_id: document_id.to_string(),
                object,
            })
            .map_err(|_| ApiError::ServiceUnavailable("Ingest queue is not running".to_string()))?;
        tracing::info!("Queued document {} for ingestion", document_id);
        Ok(())
    }
}
