// Thin client for the local Ollama generate endpoint. Generation is
// best-effort: any transport or decode failure yields an empty string and
// the calling tool falls back to its template.

use std::time::Duration;

use serde_json::{json, Value};

const DEFAULT_MODEL: &str = "qwen2.5-coder:1.5b";
const DEFAULT_BASE_URL: &str = "http://localhost:11434";
const GENERATE_TIMEOUT: Duration = Duration::from_secs(30);

pub struct OllamaClient {
    client: reqwest::Client,
    base_url: String,
}

impl Default for OllamaClient {
    fn default() -> Self {
        Self::new()
    }
}

impl OllamaClient {
    pub fn new() -> Self {
        Self::with_base_url(DEFAULT_BASE_URL)
    }

    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
        }
    }

    /// Run one non-streaming generation. The model comes from
    /// `OLLAMA_AUTONOMY_MODEL` when set.
    pub async fn generate(&self, prompt: &str) -> String {
        let model = std::env::var("OLLAMA_AUTONOMY_MODEL")
            .ok()
            .filter(|m| !m.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_MODEL.to_string());

        let response = self
            .client
            .post(format!("{}/api/generate", self.base_url))
            .timeout(GENERATE_TIMEOUT)
            .json(&json!({
                "model": model,
                "prompt": prompt,
                "stream": false,
                "options": {"temperature": 0.2, "num_predict": 1000},
            }))
            .send()
            .await;

        let body: Value = match response {
            Ok(resp) => match resp.json().await {
                Ok(body) => body,
                Err(err) => {
                    tracing::debug!(error = %err, "ollama response decode failed");
                    return String::new();
                }
            },
            Err(err) => {
                tracing::debug!(error = %err, "ollama request failed");
                return String::new();
            }
        };

        body.get("response")
            .and_then(Value::as_str)
            .map(|s| s.trim().to_string())
            .unwrap_or_default()
    }
}
