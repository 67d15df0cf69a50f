use anyhow::anyhow;
use futures::stream::{self, StreamExt};
use ingest::TextChunk;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{error, info, warn};

use crate::backend::ExtractionBackend;
use crate::retry::RetryPolicy;
use crate::schema::ExtractionFragment;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub batch_size: usize,
    /// Batches in flight at once; 1 dispatches strictly in order.
    pub max_concurrency: usize,
    pub batch_timeout_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            batch_size: 5,
            max_concurrency: 3,
            batch_timeout_secs: 300,
        }
    }
}

#[derive(Debug, Clone)]
pub enum BatchResult {
    Extracted(Vec<ExtractionFragment>),
    Failed { error: String },
}

#[derive(Debug, Clone)]
pub struct BatchOutcome {
    pub batch_index: usize,
    pub chunk_indices: Vec<usize>,
    pub result: BatchResult,
}

impl BatchOutcome {
    pub fn is_failed(&self) -> bool {
        matches!(self.result, BatchResult::Failed { .. })
    }

    /// Fragments of this batch; a failed batch yields one empty fragment per chunk.
    pub fn fragments(&self) -> Vec<ExtractionFragment> {
        match &self.result {
            BatchResult::Extracted(fragments) => fragments.clone(),
            BatchResult::Failed { .. } => self
                .chunk_indices
                .iter()
                .map(|&index| ExtractionFragment::empty(index))
                .collect(),
        }
    }
}

/// Per-batch outcomes of one scheduling run, ordered by batch index.
#[derive(Debug, Clone, Default)]
pub struct ScheduleReport {
    pub outcomes: Vec<BatchOutcome>,
}

impl ScheduleReport {
    pub fn batch_count(&self) -> usize {
        self.outcomes.len()
    }

    pub fn failed_batches(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_failed()).count()
    }

    pub fn fragments(&self) -> Vec<ExtractionFragment> {
        self.outcomes.iter().flat_map(BatchOutcome::fragments).collect()
    }
}

pub struct BatchScheduler {
    backend: Arc<dyn ExtractionBackend>,
    config: SchedulerConfig,
    retry: RetryPolicy,
}

impl BatchScheduler {
    pub fn new(backend: Arc<dyn ExtractionBackend>, config: SchedulerConfig) -> Self {
        Self {
            backend,
            config,
            retry: RetryPolicy::none(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Extract every chunk in contiguous batches. Never fails: a batch that
    /// errors or times out is reported as failed and the rest carry on.
    pub async fn run(&self, chunks: &[TextChunk]) -> ScheduleReport {
        let batch_size = self.config.batch_size.max(1);
        let concurrency = self.config.max_concurrency.max(1);

        let batches: Vec<_> = chunks
            .chunks(batch_size)
            .enumerate()
            .map(|(batch_index, batch)| self.run_batch(batch_index, batch))
            .collect();
        let mut outcomes: Vec<BatchOutcome> = stream::iter(batches)
            .buffer_unordered(concurrency)
            .collect()
            .await;

        // Completion order depends on the backend; callers get batch order.
        outcomes.sort_by_key(|outcome| outcome.batch_index);

        let report = ScheduleReport { outcomes };
        info!(
            chunks = chunks.len(),
            batches = report.batch_count(),
            failed_batches = report.failed_batches(),
            batch_size,
            concurrency,
            "extraction batches finished"
        );
        report
    }

    async fn run_batch(&self, batch_index: usize, batch: &[TextChunk]) -> BatchOutcome {
        let chunk_indices: Vec<usize> = batch.iter().map(|chunk| chunk.index).collect();
        let backend = &self.backend;
        let limit = Duration::from_secs(self.config.batch_timeout_secs);
        let operation = format!("extract batch {batch_index}");

        let attempt = self
            .retry
            .retry(&operation, move || async move {
                match timeout(limit, backend.extract_batch(batch)).await {
                    Ok(result) => result,
                    Err(_) => Err(anyhow!("batch timed out after {}s", limit.as_secs_f32())),
                }
            })
            .await;

        let result = match attempt {
            Ok(fragments) => {
                if fragments.len() != batch.len() {
                    warn!(
                        batch = batch_index,
                        chunks = batch.len(),
                        fragments = fragments.len(),
                        "fragment count does not match chunk count"
                    );
                }
                let nodes: usize = fragments.iter().map(|f| f.nodes.len()).sum();
                let relationships: usize = fragments.iter().map(|f| f.relationships.len()).sum();
                info!(batch = batch_index, nodes, relationships, "batch extracted");
                BatchResult::Extracted(fragments)
            }
            Err(e) => {
                error!(
                    batch = batch_index,
                    chunks = ?chunk_indices,
                    error = %e,
                    "batch extraction failed, continuing with remaining batches"
                );
                BatchResult::Failed {
                    error: format!("{e:#}"),
                }
            }
        };

        BatchOutcome {
            batch_index,
            chunk_indices,
            result,
        }
    }
}
