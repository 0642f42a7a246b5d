// GitHub REST adapters for the high-risk repository tools. Transport
// failures are transient (the engine may retry once); missing credentials
// and HTTP error statuses are terminal.

use std::time::Duration;

use serde_json::{json, Value};

use codemate_core::inputs::{GithubCreateRepoInput, GithubUpdateDescriptionInput};
use codemate_core::types::JsonMap;
use codemate_core::{ToolOutcome, ToolResult};

const DEFAULT_BASE_URL: &str = "https://api.github.com";
const API_VERSION: &str = "2022-11-28";
const USER_AGENT: &str = "codemate-gateway";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(20);

pub struct GithubClient {
    client: reqwest::Client,
    base_url: String,
}

impl Default for GithubClient {
    fn default() -> Self {
        Self::new()
    }
}

impl GithubClient {
    pub fn new() -> Self {
        Self::with_base_url(DEFAULT_BASE_URL)
    }

    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
        }
    }

    pub async fn create_repo(&self, input: &GithubCreateRepoInput) -> ToolOutcome {
        let Some(token) = auth_token() else {
            return ToolOutcome::Fatal(ToolResult::failure("Missing GITHUB_TOKEN"));
        };
        let name = input.name.trim();
        if name.is_empty() {
            return ToolOutcome::Fatal(ToolResult::failure("Repository name is required"));
        }

        let payload = json!({
            "name": name,
            "private": input.private,
            "description": input.description,
        });
        let response = self
            .request(reqwest::Method::POST, "/user/repos", &token, &payload)
            .await;
        match response {
            Ok(body) => {
                let mut artifacts = JsonMap::new();
                artifacts.insert(
                    "full_name".to_string(),
                    body.get("full_name").cloned().unwrap_or(Value::Null),
                );
                artifacts.insert(
                    "html_url".to_string(),
                    body.get("html_url").cloned().unwrap_or(Value::Null),
                );
                ToolOutcome::Success(
                    ToolResult::success("Repository created").with_artifacts(artifacts),
                )
            }
            Err(outcome) => outcome,
        }
    }

    pub async fn update_description(&self, input: &GithubUpdateDescriptionInput) -> ToolOutcome {
        let token = auth_token();
        let owner = input.owner.trim();
        let repo = input.repo.trim();
        let Some(token) = token else {
            return ToolOutcome::Fatal(ToolResult::failure("Missing GITHUB_TOKEN or owner/repo"));
        };
        if owner.is_empty() || repo.is_empty() {
            return ToolOutcome::Fatal(ToolResult::failure("Missing GITHUB_TOKEN or owner/repo"));
        }

        let payload = json!({"description": input.description.trim()});
        let path = format!("/repos/{owner}/{repo}");
        let response = self
            .request(reqwest::Method::PATCH, &path, &token, &payload)
            .await;
        match response {
            Ok(body) => {
                let mut artifacts = JsonMap::new();
                artifacts.insert(
                    "full_name".to_string(),
                    body.get("full_name").cloned().unwrap_or(Value::Null),
                );
                ToolOutcome::Success(
                    ToolResult::success("Description updated").with_artifacts(artifacts),
                )
            }
            Err(outcome) => outcome,
        }
    }

    async fn request(
        &self,
        method: reqwest::Method,
        path: &str,
        token: &str,
        payload: &Value,
    ) -> Result<Value, ToolOutcome> {
        let response = self
            .client
            .request(method, format!("{}{path}", self.base_url))
            .timeout(REQUEST_TIMEOUT)
            .bearer_auth(token)
            .header("Accept", "application/vnd.github+json")
            .header("X-GitHub-Api-Version", API_VERSION)
            .header("User-Agent", USER_AGENT)
            .json(payload)
            .send()
            .await
            .map_err(|err| ToolOutcome::Transient(ToolResult::failure(err.to_string())))?;

        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(ToolOutcome::Fatal(ToolResult::failure(format!(
                "HTTP {}: {body}",
                status.as_u16()
            ))));
        }
        Ok(serde_json::from_str(&body).unwrap_or_else(|_| json!({})))
    }
}

fn auth_token() -> Option<String> {
    std::env::var("GITHUB_TOKEN")
        .ok()
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
}
