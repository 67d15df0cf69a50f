use anyhow::Result;
use async_trait::async_trait;
use ingest::TextChunk;
use std::sync::Arc;

use crate::schema::ExtractionFragment;

/// Turns a batch of chunks into one fragment per chunk.
///
/// Implementations may fail as a whole; the scheduler treats any error as a failed batch.
#[async_trait]
pub trait ExtractionBackend: Send + Sync {
    async fn extract_batch(&self, batch: &[TextChunk]) -> Result<Vec<ExtractionFragment>>;
}

/// Builds the extraction backend for a selected model.
pub trait ExtractorFactory: Send + Sync {
    fn for_model(&self, model: &str) -> Arc<dyn ExtractionBackend>;
}

/// Looks up how much input a model accepts in one call.
#[async_trait]
pub trait ContextLengthResolver: Send + Sync {
    async fn context_length(&self, model: &str) -> Result<usize>;
}

/// Lists the models a server can run.
#[async_trait]
pub trait ModelCatalog: Send + Sync {
    async fn list_models(&self) -> Result<Vec<String>>;
}
