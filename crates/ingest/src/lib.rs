pub mod chunk;
pub mod chunker;
pub mod clean;
pub mod planner;
pub mod reader;

pub use chunk::TextChunk;
pub use chunker::{Chunker, segment};
pub use clean::clean_text;
pub use planner::{ChunkPlan, ChunkPlanner, DEFAULT_CONTEXT_LENGTH, PlannerConfig};
pub use reader::FileReader;

use sha2::{Digest, Sha256};

/// Content fingerprint of a text: full sha256 as lowercase hex.
pub fn content_hash(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    hex::encode(hasher.finalize())
}

/// Cleaned text together with the plan and chunks derived from it.
#[derive(Debug, Clone)]
pub struct PreparedText {
    pub doc_id: String,
    pub cleaned: String,
    pub text_length: usize,
    pub plan: ChunkPlan,
    pub chunks: Vec<TextChunk>,
}

/// Clean, plan and segment a document for a model with the given context window.
pub fn prepare_text(raw: &str, context_length: usize, planner: &ChunkPlanner) -> PreparedText {
    prepare_cleaned(content_hash(raw), clean_text(raw), context_length, planner)
}

/// Plan and segment text that already went through [`clean_text`].
pub fn prepare_cleaned(
    doc_id: String,
    cleaned: String,
    context_length: usize,
    planner: &ChunkPlanner,
) -> PreparedText {
    let text_length = cleaned.chars().count();
    let plan = planner.plan(text_length, context_length);
    let chunks = segment(&doc_id, &cleaned, &plan);

    PreparedText {
        doc_id,
        cleaned,
        text_length,
        plan,
        chunks,
    }
}
