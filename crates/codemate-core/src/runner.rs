// Capability boundary between the engine and side-effecting tools. The
// engine persists every attempt's result map and never interprets artifacts.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::types::JsonMap;

/// Uniform result shape produced by every tool invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    pub ok: bool,
    pub output: String,
    pub error: String,
    #[serde(default)]
    pub artifacts: JsonMap,
    #[serde(default)]
    pub duration_ms: i64,
}

impl ToolResult {
    pub fn success(output: impl Into<String>) -> Self {
        Self {
            ok: true,
            output: output.into(),
            error: String::new(),
            artifacts: JsonMap::new(),
            duration_ms: 0,
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            ok: false,
            output: String::new(),
            error: error.into(),
            artifacts: JsonMap::new(),
            duration_ms: 0,
        }
    }

    pub fn with_artifacts(mut self, artifacts: JsonMap) -> Self {
        self.artifacts = artifacts;
        self
    }

    /// Canonical map form for persistence (tool_runs rows, step output).
    pub fn to_map(&self) -> JsonMap {
        match serde_json::to_value(self) {
            Ok(Value::Object(map)) => map,
            _ => JsonMap::new(),
        }
    }
}

/// Outcome of one tool invocation. `Transient` failures may be retried once;
/// `Fatal` failures terminate the step immediately.
#[derive(Debug, Clone)]
pub enum ToolOutcome {
    Success(ToolResult),
    Transient(ToolResult),
    Fatal(ToolResult),
}

impl ToolOutcome {
    pub fn result(&self) -> &ToolResult {
        match self {
            ToolOutcome::Success(r) | ToolOutcome::Transient(r) | ToolOutcome::Fatal(r) => r,
        }
    }

    pub fn result_mut(&mut self) -> &mut ToolResult {
        match self {
            ToolOutcome::Success(r) | ToolOutcome::Transient(r) | ToolOutcome::Fatal(r) => r,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, ToolOutcome::Success(_))
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, ToolOutcome::Transient(_))
    }
}

/// A named side-effecting capability. Implementations stamp `duration_ms`
/// on the result; timeouts and network faults surface as `Transient`,
/// argument-validation failures as `Fatal`.
#[async_trait]
pub trait ToolRunner: Send + Sync {
    async fn run(&self, tool_name: &str, args: &JsonMap) -> ToolOutcome;
}
