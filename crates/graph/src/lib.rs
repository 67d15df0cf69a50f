pub mod merge;
pub mod render;

pub use merge::{GraphMerger, MergeStats, MergedGraph};
pub use render::{GraphRenderer, RenderConfig, node_color};

use extract::{
    BatchScheduler, ContextLengthResolver, DEFAULT_MODEL, ExtractorFactory, RetryPolicy, SchedulerConfig,
};
use ingest::{ChunkPlanner, PlannerConfig, clean_text, content_hash, prepare_cleaned};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{Instrument, info, info_span, warn};
use uuid::Uuid;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PipelineError {
    #[error("input text is empty after cleaning")]
    EmptyInput,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub default_model: String,
    pub planner: PlannerConfig,
    pub scheduler: SchedulerConfig,
    pub max_nodes: Option<usize>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            default_model: DEFAULT_MODEL.to_string(),
            planner: PlannerConfig::default(),
            scheduler: SchedulerConfig::default(),
            max_nodes: None,
        }
    }
}

/// Counters describing one pipeline run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PipelineDiagnostics {
    pub run_id: Uuid,
    pub model: String,
    pub text_length: usize,
    pub context_length: usize,
    pub context_fallback: bool,
    pub needs_split: bool,
    pub chunk_count: usize,
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub batch_size: usize,
    pub batch_count: usize,
    pub failed_batches: usize,
    pub node_count: usize,
    pub relationship_count: usize,
    pub dropped_relationships: usize,
    pub duplicate_relationships: usize,
    pub truncated_nodes: usize,
    pub truncated_relationships: usize,
    pub elapsed_ms: u64,
}

#[derive(Debug, Clone)]
pub struct GraphBuild {
    pub doc_id: String,
    pub graph: MergedGraph,
    pub diagnostics: PipelineDiagnostics,
}

/// Text in, merged graph out: clean, plan, segment, extract in batches, merge.
pub struct GraphPipeline {
    resolver: Arc<dyn ContextLengthResolver>,
    factory: Arc<dyn ExtractorFactory>,
    planner: ChunkPlanner,
    merger: GraphMerger,
    retry: RetryPolicy,
    config: PipelineConfig,
}

impl GraphPipeline {
    pub fn new(
        resolver: Arc<dyn ContextLengthResolver>,
        factory: Arc<dyn ExtractorFactory>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            resolver,
            factory,
            planner: ChunkPlanner::new(config.planner.clone()),
            merger: GraphMerger::new().with_max_nodes(config.max_nodes),
            retry: RetryPolicy::none(),
            config,
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Model used when a request does not name one.
    pub fn resolve_model<'a>(&'a self, model: Option<&'a str>) -> &'a str {
        model
            .map(str::trim)
            .filter(|m| !m.is_empty())
            .unwrap_or(self.config.default_model.as_str())
    }

    pub async fn generate(
        &self,
        text: &str,
        model: Option<&str>,
        batch_size: Option<usize>,
    ) -> Result<GraphBuild, PipelineError> {
        let run_id = Uuid::new_v4();
        let model = self.resolve_model(model).to_string();
        let span = info_span!("pipeline", %run_id, model = %model);

        self.run(run_id, text, model, batch_size).instrument(span).await
    }

    async fn run(
        &self,
        run_id: Uuid,
        text: &str,
        model: String,
        batch_size: Option<usize>,
    ) -> Result<GraphBuild, PipelineError> {
        let started = Instant::now();

        // Nothing reaches the model server for text that cleans to nothing.
        let cleaned = clean_text(text);
        if cleaned.is_empty() {
            warn!("input is empty after cleaning");
            return Err(PipelineError::EmptyInput);
        }

        let lookup = self.resolver.context_length(&model).await;
        let (context_length, context_fallback) = self.planner.resolve_context_length(&model, lookup);

        let prepared = prepare_cleaned(content_hash(text), cleaned, context_length, &self.planner);

        info!(
            text_length = prepared.text_length,
            context_length,
            needs_split = prepared.plan.needs_split,
            chunk_size = prepared.plan.chunk_size,
            chunk_overlap = prepared.plan.chunk_overlap,
            chunks = prepared.chunks.len(),
            "text segmented"
        );

        let mut scheduler_config = self.config.scheduler.clone();
        if let Some(batch_size) = batch_size {
            scheduler_config.batch_size = batch_size.max(1);
        }
        let batch_size = scheduler_config.batch_size;

        let backend = self.factory.for_model(&model);
        let report = BatchScheduler::new(backend, scheduler_config)
            .with_retry(self.retry.clone())
            .run(&prepared.chunks)
            .await;

        let (graph, stats) = self.merger.merge_with_stats(&report.fragments());

        let diagnostics = PipelineDiagnostics {
            run_id,
            model,
            text_length: prepared.text_length,
            context_length,
            context_fallback,
            needs_split: prepared.plan.needs_split,
            chunk_count: prepared.chunks.len(),
            chunk_size: prepared.plan.chunk_size,
            chunk_overlap: prepared.plan.chunk_overlap,
            batch_size,
            batch_count: report.batch_count(),
            failed_batches: report.failed_batches(),
            node_count: graph.node_count(),
            relationship_count: graph.relationship_count(),
            dropped_relationships: stats.dangling_relationships,
            duplicate_relationships: stats.duplicate_relationships,
            truncated_nodes: stats.truncated_nodes,
            truncated_relationships: stats.truncated_relationships,
            elapsed_ms: started.elapsed().as_millis() as u64,
        };

        info!(
            nodes = diagnostics.node_count,
            relationships = diagnostics.relationship_count,
            failed_batches = diagnostics.failed_batches,
            dropped_relationships = diagnostics.dropped_relationships,
            elapsed_ms = diagnostics.elapsed_ms,
            "graph generated"
        );

        Ok(GraphBuild {
            doc_id: prepared.doc_id,
            graph,
            diagnostics,
        })
    }
}
