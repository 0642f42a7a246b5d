// Typed inputs for the known tools. Steps persist inputs as plain JSON
// objects; the tag is the step's `tool_name`, so the stored wire format is
// an untagged map. Every struct carries a flattened extension map so callers
// may attach fields this version does not know about.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::types::JsonMap;

fn default_repo_path() -> String {
    ".".to_string()
}

fn default_test_command() -> String {
    "pytest -q".to_string()
}

fn default_remote() -> String {
    "origin".to_string()
}

fn default_branch() -> String {
    "main".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitStatusInput {
    #[serde(default = "default_repo_path")]
    pub repo_path: String,
    #[serde(flatten, skip_serializing_if = "JsonMap::is_empty")]
    pub extra: JsonMap,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerateReadmeInput {
    #[serde(default = "default_repo_path")]
    pub repo_path: String,
    #[serde(default)]
    pub goal: String,
    #[serde(flatten, skip_serializing_if = "JsonMap::is_empty")]
    pub extra: JsonMap,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WriteFileInput {
    #[serde(default = "default_repo_path")]
    pub repo_path: String,
    #[serde(default)]
    pub relative_path: String,
    #[serde(default)]
    pub goal: String,
    #[serde(flatten, skip_serializing_if = "JsonMap::is_empty")]
    pub extra: JsonMap,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunTestsInput {
    #[serde(default = "default_repo_path")]
    pub repo_path: String,
    #[serde(default = "default_test_command")]
    pub command: String,
    #[serde(flatten, skip_serializing_if = "JsonMap::is_empty")]
    pub extra: JsonMap,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitCommitInput {
    #[serde(default = "default_repo_path")]
    pub repo_path: String,
    #[serde(default)]
    pub message: String,
    #[serde(flatten, skip_serializing_if = "JsonMap::is_empty")]
    pub extra: JsonMap,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitPushInput {
    #[serde(default = "default_repo_path")]
    pub repo_path: String,
    #[serde(default = "default_remote")]
    pub remote: String,
    #[serde(default = "default_branch")]
    pub branch: String,
    #[serde(flatten, skip_serializing_if = "JsonMap::is_empty")]
    pub extra: JsonMap,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GithubCreateRepoInput {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub private: bool,
    #[serde(default)]
    pub description: String,
    #[serde(flatten, skip_serializing_if = "JsonMap::is_empty")]
    pub extra: JsonMap,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GithubUpdateDescriptionInput {
    #[serde(default)]
    pub owner: String,
    #[serde(default)]
    pub repo: String,
    #[serde(default)]
    pub description: String,
    #[serde(flatten, skip_serializing_if = "JsonMap::is_empty")]
    pub extra: JsonMap,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SummarizeTaskInput {
    #[serde(default)]
    pub goal: String,
    #[serde(flatten, skip_serializing_if = "JsonMap::is_empty")]
    pub extra: JsonMap,
}

/// Sum over the known tool inputs. The discriminant lives outside the value
/// (the step's `tool_name`), so serialization stays a bare object.
#[derive(Debug, Clone)]
pub enum ToolInput {
    GitStatus(GitStatusInput),
    GenerateReadme(GenerateReadmeInput),
    WriteFile(WriteFileInput),
    RunTests(RunTestsInput),
    GitCommit(GitCommitInput),
    GitPush(GitPushInput),
    GithubCreateRepo(GithubCreateRepoInput),
    GithubUpdateDescription(GithubUpdateDescriptionInput),
    SummarizeTask(SummarizeTaskInput),
    Other(JsonMap),
}

impl ToolInput {
    /// Interpret a stored args object for the named tool. Args that do not
    /// fit the known shape fall back to the raw map.
    pub fn parse(tool_name: &str, args: &JsonMap) -> ToolInput {
        let value = Value::Object(args.clone());
        match tool_name {
            "git_status" => serde_json::from_value(value)
                .map(ToolInput::GitStatus)
                .unwrap_or_else(|_| ToolInput::Other(args.clone())),
            "generate_readme" => serde_json::from_value(value)
                .map(ToolInput::GenerateReadme)
                .unwrap_or_else(|_| ToolInput::Other(args.clone())),
            "write_file" => serde_json::from_value(value)
                .map(ToolInput::WriteFile)
                .unwrap_or_else(|_| ToolInput::Other(args.clone())),
            "run_tests" => serde_json::from_value(value)
                .map(ToolInput::RunTests)
                .unwrap_or_else(|_| ToolInput::Other(args.clone())),
            "git_commit" => serde_json::from_value(value)
                .map(ToolInput::GitCommit)
                .unwrap_or_else(|_| ToolInput::Other(args.clone())),
            "git_push" => serde_json::from_value(value)
                .map(ToolInput::GitPush)
                .unwrap_or_else(|_| ToolInput::Other(args.clone())),
            "github_create_repo" => serde_json::from_value(value)
                .map(ToolInput::GithubCreateRepo)
                .unwrap_or_else(|_| ToolInput::Other(args.clone())),
            "github_update_description" => serde_json::from_value(value)
                .map(ToolInput::GithubUpdateDescription)
                .unwrap_or_else(|_| ToolInput::Other(args.clone())),
            "summarize_task" => serde_json::from_value(value)
                .map(ToolInput::SummarizeTask)
                .unwrap_or_else(|_| ToolInput::Other(args.clone())),
            _ => ToolInput::Other(args.clone()),
        }
    }

    /// Canonical JSON object for persistence.
    pub fn to_map(&self) -> JsonMap {
        let value = match self {
            ToolInput::GitStatus(v) => serde_json::to_value(v),
            ToolInput::GenerateReadme(v) => serde_json::to_value(v),
            ToolInput::WriteFile(v) => serde_json::to_value(v),
            ToolInput::RunTests(v) => serde_json::to_value(v),
            ToolInput::GitCommit(v) => serde_json::to_value(v),
            ToolInput::GitPush(v) => serde_json::to_value(v),
            ToolInput::GithubCreateRepo(v) => serde_json::to_value(v),
            ToolInput::GithubUpdateDescription(v) => serde_json::to_value(v),
            ToolInput::SummarizeTask(v) => serde_json::to_value(v),
            ToolInput::Other(map) => return map.clone(),
        };
        match value {
            Ok(Value::Object(map)) => map,
            _ => JsonMap::new(),
        }
    }
}
