use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, warn};

use crate::backend::{ContextLengthResolver, ModelCatalog};
use crate::prompt;

pub const DEFAULT_BASE_URL: &str = "http://localhost:11434";
pub const DEFAULT_MODEL: &str = "gemma";
const DEFAULT_TIMEOUT_SECS: u64 = 120;

#[derive(Clone)]
pub struct OllamaClient {
    base_url: String,
    model: String,
    timeout: Duration,
    client: reqwest::Client,
}

#[derive(Serialize)]
struct OllamaRequest {
    model: String,
    prompt: String,
    stream: bool,
    format: String, // "json" for structured output
    options: GenerateOptions,
}

#[derive(Serialize)]
struct GenerateOptions {
    temperature: f32,
}

#[derive(Deserialize)]
struct OllamaResponse {
    response: String,
}

#[derive(Serialize)]
struct ShowRequest<'a> {
    model: &'a str,
}

#[derive(Deserialize)]
struct ShowResponse {
    #[serde(default)]
    details: ShowDetails,
    #[serde(default)]
    model_info: serde_json::Map<String, Value>,
}

#[derive(Deserialize, Default)]
struct ShowDetails {
    #[serde(default)]
    family: String,
}

#[derive(Deserialize)]
struct TagsResponse {
    #[serde(default)]
    models: Vec<TagEntry>,
}

#[derive(Deserialize)]
struct TagEntry {
    #[serde(default)]
    name: String,
    #[serde(default)]
    model: Option<String>,
}

impl OllamaClient {
    pub fn new(base_url: String, model: String) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            model,
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            client: reqwest::Client::new(),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Same server and connection pool, different model.
    pub fn with_model(&self, model: &str) -> Self {
        Self {
            model: model.to_string(),
            ..self.clone()
        }
    }

    pub async fn generate(&self, prompt: &str) -> Result<String> {
        let url = format!("{}/api/generate", self.base_url);

        let request = OllamaRequest {
            model: self.model.clone(),
            prompt: prompt.to_string(),
            stream: false,
            format: "json".to_string(), // Force JSON output
            options: GenerateOptions { temperature: 0.0 },
        };

        let response = self
            .client
            .post(&url)
            .timeout(self.timeout)
            .json(&request)
            .send()
            .await
            .context("Failed to send request to Ollama")?;

        if !response.status().is_success() {
            anyhow::bail!("Ollama request failed: {}", response.status());
        }

        let ollama_response: OllamaResponse = response
            .json()
            .await
            .context("Failed to parse Ollama response")?;

        Ok(ollama_response.response)
    }

    /// Generate with retry for invalid JSON
    pub async fn generate_json_with_retry(&self, prompt: &str, max_retries: usize) -> Result<String> {
        for attempt in 0..max_retries {
            let response = self.generate(prompt).await?;

            // Try to parse as JSON
            if serde_json::from_str::<Value>(&response).is_ok() {
                return Ok(response);
            }

            // If invalid, retry with correction prompt
            if attempt < max_retries - 1 {
                warn!(model = %self.model, attempt = attempt + 1, "model returned invalid JSON, asking for a fix");
                let corrected = self.generate(&prompt::build_retry_prompt(&response)).await?;
                if serde_json::from_str::<Value>(&corrected).is_ok() {
                    return Ok(corrected);
                }
            }
        }

        anyhow::bail!("Failed to get valid JSON after {} retries", max_retries)
    }

    /// Names of the models installed on the server, sorted and deduplicated.
    pub async fn list_models(&self) -> Result<Vec<String>> {
        let url = format!("{}/api/tags", self.base_url);

        let response = self
            .client
            .get(&url)
            .timeout(self.timeout)
            .send()
            .await
            .context("Failed to list Ollama models")?;

        if !response.status().is_success() {
            anyhow::bail!("Ollama model listing failed: {}", response.status());
        }

        let tags: TagsResponse = response
            .json()
            .await
            .context("Failed to parse Ollama model list")?;

        let mut names: Vec<String> = tags
            .models
            .into_iter()
            .map(|m| m.model.filter(|m| !m.is_empty()).unwrap_or(m.name))
            .filter(|name| !name.is_empty())
            .collect();
        names.sort();
        names.dedup();
        Ok(names)
    }

    /// Context window of `model` as reported by `/api/show`.
    pub async fn show_context_length(&self, model: &str) -> Result<usize> {
        let url = format!("{}/api/show", self.base_url);

        let response = self
            .client
            .post(&url)
            .timeout(self.timeout)
            .json(&ShowRequest { model })
            .send()
            .await
            .context("Failed to query Ollama model info")?;

        if !response.status().is_success() {
            anyhow::bail!("Ollama show request failed for '{}': {}", model, response.status());
        }

        let show: ShowResponse = response
            .json()
            .await
            .context("Failed to parse Ollama model info")?;

        let length = find_context_length(&show.details.family, &show.model_info)
            .with_context(|| format!("No context_length found for model '{}'", model))?;
        debug!(model, context_length = length, "resolved context length");
        Ok(length)
    }
}

#[async_trait]
impl ContextLengthResolver for OllamaClient {
    async fn context_length(&self, model: &str) -> Result<usize> {
        self.show_context_length(model).await
    }
}

#[async_trait]
impl ModelCatalog for OllamaClient {
    async fn list_models(&self) -> Result<Vec<String>> {
        OllamaClient::list_models(self).await
    }
}

/// Prefer `{family}.context_length`, else the first key ending in `context_length`.
fn find_context_length(family: &str, model_info: &serde_json::Map<String, Value>) -> Option<usize> {
    let exact_key = format!("{}.context_length", family);
    model_info
        .get(&exact_key)
        .and_then(Value::as_u64)
        .or_else(|| {
            model_info
                .iter()
                .find(|(key, _)| key.ends_with("context_length"))
                .and_then(|(_, value)| value.as_u64())
        })
        .map(|length| length as usize)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn info(value: Value) -> serde_json::Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_context_length_exact_family_key() {
        let model_info = info(json!({
            "general.architecture": "llama",
            "bert.context_length": 512,
            "llama.context_length": 8192
        }));
        assert_eq!(find_context_length("llama", &model_info), Some(8192));
    }

    #[test]
    fn test_context_length_suffix_fallback() {
        let model_info = info(json!({
            "general.architecture": "gemma3",
            "gemma3.context_length": 131072
        }));
        assert_eq!(find_context_length("gemma", &model_info), Some(131072));
    }

    #[test]
    fn test_context_length_missing() {
        let model_info = info(json!({"general.architecture": "llama"}));
        assert_eq!(find_context_length("llama", &model_info), None);
    }

    #[test]
    fn test_with_model_keeps_server() {
        let client = OllamaClient::new("http://ollama:11434/".to_string(), "gemma".to_string());
        let other = client.with_model("llama3");

        assert_eq!(other.base_url, "http://ollama:11434");
        assert_eq!(other.model, "llama3");
        assert_eq!(client.model, "gemma");
    }

    #[test]
    fn test_parse_tags_response() {
        let tags: TagsResponse = serde_json::from_str(
            r#"{"models": [{"name": "llama3:latest", "model": "llama3:latest"}, {"name": "gemma:2b"}]}"#,
        )
        .unwrap();
        assert_eq!(tags.models.len(), 2);
        assert_eq!(tags.models[1].model, None);
    }
}
