use anyhow::{Context, Result, bail};
use extract::{DEFAULT_BASE_URL, DEFAULT_MODEL, RetryPolicy, SchedulerConfig};
use graph::{PipelineConfig, RenderConfig};
use ingest::PlannerConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::info;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub mode: OperationMode,
    pub server: ServerConfig,
    pub ollama: OllamaConfig,
    pub chunking: PlannerConfig,
    pub extraction: SchedulerConfig,
    pub retry: RetryConfig,
    pub graph: GraphConfig,
    pub cache: CacheConfig,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum OperationMode {
    Fast,     // More batches in flight, fewer retries
    Accurate, // Always regenerate, patient retries
    Balanced, // Default: serve cached graphs, moderate concurrency
}

impl FromStr for OperationMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "fast" => Ok(Self::Fast),
            "accurate" => Ok(Self::Accurate),
            "balanced" => Ok(Self::Balanced),
            other => bail!("unknown operation mode '{other}' (expected fast, balanced or accurate)"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Directory that `path` requests may read from; unset disables them.
    pub input_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OllamaConfig {
    pub base_url: String,
    pub default_model: String,
    pub request_timeout_secs: u64,
    /// Attempts per chunk at getting valid JSON out of the model.
    pub json_retries: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_retries: usize,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GraphConfig {
    pub max_nodes: Option<usize>,
    pub render: RenderConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Serve stored graphs for text that was already processed.
    pub enabled: bool,
    pub dir: PathBuf,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            input_dir: None,
        }
    }
}

impl Default for OllamaConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            default_model: DEFAULT_MODEL.to_string(),
            request_timeout_secs: 120,
            json_retries: 3,
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff_ms: 1000,
            max_backoff_ms: 10000,
        }
    }
}

impl RetryConfig {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_retries, self.initial_backoff_ms, self.max_backoff_ms)
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            dir: PathBuf::from("Data"),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            mode: OperationMode::Balanced,
            server: ServerConfig::default(),
            ollama: OllamaConfig::default(),
            chunking: PlannerConfig::default(),
            extraction: SchedulerConfig::default(),
            retry: RetryConfig::default(),
            graph: GraphConfig::default(),
            cache: CacheConfig::default(),
        }
    }
}

impl AppConfig {
    /// Overwrite the mode-controlled settings with the preset for `mode`.
    pub fn apply_mode(&mut self, mode: OperationMode) {
        self.mode = mode;
        match mode {
            OperationMode::Fast => {
                self.extraction.max_concurrency = 6;
                self.extraction.batch_timeout_secs = 120;
                self.retry = RetryConfig {
                    max_retries: 1,
                    initial_backoff_ms: 500,
                    max_backoff_ms: 5000,
                };
                self.ollama.json_retries = 2;
                self.cache.enabled = true;
            }
            OperationMode::Accurate => {
                self.extraction.max_concurrency = 1;
                self.extraction.batch_timeout_secs = 600;
                self.retry = RetryConfig {
                    max_retries: 5,
                    initial_backoff_ms: 2000,
                    max_backoff_ms: 20000,
                };
                self.ollama.json_retries = 5;
                self.cache.enabled = false;
            }
            OperationMode::Balanced => {
                let defaults = Self::default();
                self.extraction.max_concurrency = defaults.extraction.max_concurrency;
                self.extraction.batch_timeout_secs = defaults.extraction.batch_timeout_secs;
                self.retry = defaults.retry;
                self.ollama.json_retries = defaults.ollama.json_retries;
                self.cache.enabled = true;
            }
        }
    }

    /// Defaults, then the YAML file named by `APP_CONFIG_PATH`, then environment overrides.
    pub fn load() -> Result<Self> {
        let yaml = match std::env::var("APP_CONFIG_PATH") {
            Ok(path) => Some(read_config_file(Path::new(&path))?),
            Err(_) => None,
        };

        let config = Self::from_sources(yaml.as_deref(), |key| std::env::var(key).ok())?;
        info!(
            mode = ?config.mode,
            ollama = %config.ollama.base_url,
            graph_dir = %config.cache.dir.display(),
            "configuration loaded"
        );
        Ok(config)
    }

    pub fn from_sources(yaml: Option<&str>, env: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config: Self = match yaml {
            Some(contents) => serde_yaml::from_str(contents).context("Failed to parse config file")?,
            None => Self::default(),
        };
        config.apply_env(env)?;
        config.validate()?;
        Ok(config)
    }

    fn apply_env(&mut self, env: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(mode) = env("KG_MODE") {
            self.apply_mode(mode.parse()?);
        }
        if let Some(host) = env("OLLAMA_HOST") {
            self.ollama.base_url = normalize_base_url(&host);
        }
        if let Some(dir) = env("GRAPH_DIR") {
            self.cache.dir = PathBuf::from(dir);
        }
        if let Some(dir) = env("KG_INPUT_DIR") {
            self.server.input_dir = Some(PathBuf::from(dir));
        }
        if let Some(host) = env("KG_HOST") {
            self.server.host = host;
        }
        if let Some(port) = env("KG_PORT") {
            self.server.port = port
                .trim()
                .parse()
                .with_context(|| format!("KG_PORT is not a valid port: {port}"))?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.ollama.base_url.trim().is_empty() {
            bail!("ollama.base_url must not be empty");
        }
        if self.ollama.default_model.trim().is_empty() {
            bail!("ollama.default_model must not be empty");
        }
        if self.ollama.json_retries == 0 {
            bail!("ollama.json_retries must be at least 1");
        }
        if !(self.chunking.safety_factor > 0.0 && self.chunking.safety_factor <= 1.0) {
            bail!("chunking.safety_factor must be in (0, 1], got {}", self.chunking.safety_factor);
        }
        if !(0.0..1.0).contains(&self.chunking.overlap_ratio) {
            bail!("chunking.overlap_ratio must be in [0, 1), got {}", self.chunking.overlap_ratio);
        }
        if self.chunking.max_chunk == 0 || self.chunking.fallback_context_length == 0 {
            bail!("chunking.max_chunk and chunking.fallback_context_length must be positive");
        }
        if self.extraction.batch_size == 0 || self.extraction.max_concurrency == 0 {
            bail!("extraction.batch_size and extraction.max_concurrency must be positive");
        }
        if self.extraction.batch_timeout_secs == 0 {
            bail!("extraction.batch_timeout_secs must be positive");
        }
        if self.graph.max_nodes == Some(0) {
            bail!("graph.max_nodes must be positive when set");
        }
        if self.graph.render.min_node_size > self.graph.render.max_node_size {
            bail!("graph.render.min_node_size must not exceed max_node_size");
        }
        Ok(())
    }

    pub fn pipeline_config(&self) -> PipelineConfig {
        PipelineConfig {
            default_model: self.ollama.default_model.clone(),
            planner: self.chunking.clone(),
            scheduler: self.extraction.clone(),
            max_nodes: self.graph.max_nodes,
        }
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

fn read_config_file(path: &Path) -> Result<String> {
    std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file at {}", path.display()))
}

/// `OLLAMA_HOST` is often given as `host:port` without a scheme.
fn normalize_base_url(host: &str) -> String {
    let host = host.trim().trim_end_matches('/');
    if host.starts_with("http://") || host.starts_with("https://") {
        host.to_string()
    } else {
        format!("http://{host}")
    }
}
