pub mod backend;
pub mod llm;
pub mod normalizer;
pub mod prompt;
pub mod retry;
pub mod scheduler;
pub mod schema;

pub use backend::{ContextLengthResolver, ExtractionBackend, ExtractorFactory, ModelCatalog};
pub use llm::{DEFAULT_BASE_URL, DEFAULT_MODEL, OllamaClient};
pub use normalizer::EntityNormalizer;
pub use retry::RetryPolicy;
pub use scheduler::{BatchOutcome, BatchResult, BatchScheduler, ScheduleReport, SchedulerConfig};
pub use schema::{ExtractionFragment, ExtractionResult, GraphNode, GraphRelationship};

use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::future::try_join_all;
use ingest::TextChunk;
use std::sync::Arc;
use tracing::debug;

/// Ollama-backed extraction: one JSON-mode prompt per chunk, normalized ids.
#[derive(Clone)]
pub struct Extractor {
    llm_client: OllamaClient,
    normalizer: EntityNormalizer,
    json_retries: usize,
}

impl Extractor {
    pub fn new(llm_client: OllamaClient) -> Self {
        Self {
            llm_client,
            normalizer: EntityNormalizer::new(),
            json_retries: 3,
        }
    }

    pub fn with_json_retries(mut self, json_retries: usize) -> Self {
        self.json_retries = json_retries.max(1);
        self
    }

    /// Extract nodes and relationships from a chunk of text
    pub async fn extract_from_text(&self, text: &str) -> Result<ExtractionResult> {
        // Build prompt
        let prompt = prompt::build_extraction_prompt(text);

        // Get JSON response with retry
        let json_str = self
            .llm_client
            .generate_json_with_retry(&prompt, self.json_retries)
            .await
            .context("Failed to extract graph after retries")?;

        let result: ExtractionResult =
            serde_json::from_str(&json_str).context("Failed to parse extraction result")?;

        Ok(self.normalizer.normalize_result(result))
    }

    /// Extract from a chunk, keeping its sequence index
    pub async fn extract_chunk(&self, chunk: &TextChunk) -> Result<ExtractionFragment> {
        let result = self
            .extract_from_text(&chunk.text)
            .await
            .with_context(|| format!("chunk {} ({})", chunk.index, chunk.chunk_id))?;

        debug!(
            chunk = chunk.index,
            nodes = result.nodes.len(),
            relationships = result.relationships.len(),
            "chunk extracted"
        );
        Ok(ExtractionFragment::new(chunk.index, result))
    }
}

#[async_trait]
impl ExtractionBackend for Extractor {
    /// Chunks of a batch are prompted concurrently; any chunk failure fails the batch.
    async fn extract_batch(&self, batch: &[TextChunk]) -> Result<Vec<ExtractionFragment>> {
        try_join_all(batch.iter().map(|chunk| self.extract_chunk(chunk))).await
    }
}

/// Hands out an [`Extractor`] per model, all sharing one HTTP client.
#[derive(Clone)]
pub struct OllamaExtractorFactory {
    client: OllamaClient,
    json_retries: usize,
}

impl OllamaExtractorFactory {
    pub fn new(client: OllamaClient) -> Self {
        Self {
            client,
            json_retries: 3,
        }
    }

    pub fn with_json_retries(mut self, json_retries: usize) -> Self {
        self.json_retries = json_retries;
        self
    }
}

impl ExtractorFactory for OllamaExtractorFactory {
    fn for_model(&self, model: &str) -> Arc<dyn ExtractionBackend> {
        Arc::new(Extractor::new(self.client.with_model(model)).with_json_retries(self.json_retries))
    }
}
