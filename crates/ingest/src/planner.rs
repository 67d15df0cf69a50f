use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Context length assumed when the model server cannot report one.
pub const DEFAULT_CONTEXT_LENGTH: usize = 2048;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlannerConfig {
    /// Share of the context window a chunk may use; the rest is left for the prompt and output.
    pub safety_factor: f64,
    /// Absolute ceiling on chunk size, regardless of the context window.
    pub max_chunk: usize,
    pub overlap_ratio: f64,
    pub max_overlap: usize,
    pub fallback_context_length: usize,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            safety_factor: 0.8,
            max_chunk: 2000,
            overlap_ratio: 0.05,
            max_overlap: 256,
            fallback_context_length: DEFAULT_CONTEXT_LENGTH,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ChunkPlan {
    pub needs_split: bool,
    pub chunk_size: usize,
    pub chunk_overlap: usize,
}

impl ChunkPlan {
    /// Plan that keeps the whole text as a single chunk.
    pub fn full_text(text_length: usize) -> Self {
        Self {
            needs_split: false,
            chunk_size: text_length,
            chunk_overlap: 0,
        }
    }
}

pub struct ChunkPlanner {
    config: PlannerConfig,
}

impl ChunkPlanner {
    pub fn new(config: PlannerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &PlannerConfig {
        &self.config
    }

    /// Decide whether `text_length` characters fit the context window and how to split them if not.
    pub fn plan(&self, text_length: usize, context_length: usize) -> ChunkPlan {
        if context_length > text_length {
            debug!(text_length, context_length, "text fits context window");
            return ChunkPlan::full_text(text_length);
        }

        let budget = (context_length as f64 * self.config.safety_factor).floor() as usize;
        let chunk_size = budget.min(self.config.max_chunk).max(1);
        let chunk_overlap = ((chunk_size as f64 * self.config.overlap_ratio).floor() as usize)
            .min(self.config.max_overlap);

        debug!(text_length, context_length, chunk_size, chunk_overlap, "planned chunking");

        ChunkPlan {
            needs_split: true,
            chunk_size,
            chunk_overlap,
        }
    }

    /// Resolve a looked-up context length, falling back to the configured default.
    ///
    /// Returns the length and whether the fallback was used.
    pub fn resolve_context_length<E: std::fmt::Display>(
        &self,
        model: &str,
        lookup: Result<usize, E>,
    ) -> (usize, bool) {
        match lookup {
            Ok(length) if length > 0 => (length, false),
            Ok(_) => {
                warn!(
                    model,
                    fallback = self.config.fallback_context_length,
                    "model reported zero context length, using fallback"
                );
                (self.config.fallback_context_length, true)
            }
            Err(e) => {
                warn!(
                    model,
                    fallback = self.config.fallback_context_length,
                    error = %e,
                    "context length lookup failed, using fallback"
                );
                (self.config.fallback_context_length, true)
            }
        }
    }
}

impl Default for ChunkPlanner {
    fn default() -> Self {
        Self::new(PlannerConfig::default())
    }
}
