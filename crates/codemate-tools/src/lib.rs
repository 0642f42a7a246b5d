// Local tool adapters behind the gateway's ToolRunner capability: git and
// shell commands via subprocesses, README/file generation via a local Ollama
// endpoint, and repository management via the GitHub REST API.

mod github;
mod ollama;

pub use github::GithubClient;
pub use ollama::OllamaClient;

use std::path::{Component, Path, PathBuf};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde_json::json;
use tokio::process::Command;
use tokio::time::timeout;

use codemate_core::inputs::{
    GenerateReadmeInput, GitCommitInput, GitPushInput, GitStatusInput, RunTestsInput,
    SummarizeTaskInput, ToolInput, WriteFileInput,
};
use codemate_core::types::JsonMap;
use codemate_core::{ToolOutcome, ToolResult, ToolRunner};

const KNOWN_TOOLS: &[&str] = &[
    "git_status",
    "git_commit",
    "git_push",
    "run_tests",
    "generate_readme",
    "write_file",
    "github_create_repo",
    "github_update_description",
    "summarize_task",
];

pub struct LocalToolRunner {
    ollama: OllamaClient,
    github: GithubClient,
}

impl Default for LocalToolRunner {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalToolRunner {
    pub fn new() -> Self {
        Self {
            ollama: OllamaClient::new(),
            github: GithubClient::new(),
        }
    }
}

#[async_trait]
impl ToolRunner for LocalToolRunner {
    async fn run(&self, tool_name: &str, args: &JsonMap) -> ToolOutcome {
        let started = Instant::now();
        let mut outcome = match ToolInput::parse(tool_name, args) {
            ToolInput::GitStatus(input) => git_status(&input).await,
            ToolInput::GitCommit(input) => git_commit(&input).await,
            ToolInput::GitPush(input) => git_push(&input).await,
            ToolInput::RunTests(input) => run_tests(&input).await,
            ToolInput::GenerateReadme(input) => generate_readme(&self.ollama, &input).await,
            ToolInput::WriteFile(input) => write_file(&self.ollama, &input).await,
            ToolInput::GithubCreateRepo(input) => self.github.create_repo(&input).await,
            ToolInput::GithubUpdateDescription(input) => {
                self.github.update_description(&input).await
            }
            ToolInput::SummarizeTask(input) => summarize_task(&input),
            // Other covers both unknown tools and known tools whose args
            // failed to parse into the typed shape.
            ToolInput::Other(_) if KNOWN_TOOLS.contains(&tool_name) => ToolOutcome::Fatal(
                ToolResult::failure(format!("Invalid arguments for {tool_name}")),
            ),
            ToolInput::Other(_) => ToolOutcome::Fatal(ToolResult::failure(format!(
                "Unknown tool: {tool_name}"
            ))),
        };
        outcome.result_mut().duration_ms = started.elapsed().as_millis() as i64;
        outcome
    }
}

async fn git_status(input: &GitStatusInput) -> ToolOutcome {
    run_command(
        "git",
        &["-C", &input.repo_path, "status", "--short"],
        30,
    )
    .await
}

async fn git_commit(input: &GitCommitInput) -> ToolOutcome {
    let message = input.message.trim();
    if message.is_empty() {
        return ToolOutcome::Fatal(ToolResult::failure("Missing commit message"));
    }
    let add = run_command("git", &["-C", &input.repo_path, "add", "-A"], 40).await;
    if !add.is_success() {
        return add;
    }
    run_command(
        "git",
        &["-C", &input.repo_path, "commit", "-m", message],
        60,
    )
    .await
}

async fn git_push(input: &GitPushInput) -> ToolOutcome {
    run_command(
        "git",
        &["-C", &input.repo_path, "push", &input.remote, &input.branch],
        90,
    )
    .await
}

async fn run_tests(input: &RunTestsInput) -> ToolOutcome {
    let started = Instant::now();
    let mut command = Command::new("sh");
    command
        .arg("-c")
        .arg(&input.command)
        .current_dir(&input.repo_path);
    match timeout(Duration::from_secs(180), command.output()).await {
        Err(_) => ToolOutcome::Transient(ToolResult::failure(format!(
            "Command timeout after 180s: {}",
            input.command
        ))),
        Ok(Err(err)) => ToolOutcome::Fatal(ToolResult::failure(err.to_string())),
        Ok(Ok(output)) => {
            let ok = output.status.success();
            let result = ToolResult {
                ok,
                output: String::from_utf8_lossy(&output.stdout).trim().to_string(),
                error: if ok {
                    String::new()
                } else {
                    String::from_utf8_lossy(&output.stderr).trim().to_string()
                },
                artifacts: obj(json!({
                    "command": input.command,
                    "returncode": output.status.code(),
                })),
                duration_ms: started.elapsed().as_millis() as i64,
            };
            if ok {
                ToolOutcome::Success(result)
            } else {
                ToolOutcome::Fatal(result)
            }
        }
    }
}

async fn generate_readme(ollama: &OllamaClient, input: &GenerateReadmeInput) -> ToolOutcome {
    let repo = Path::new(&input.repo_path);
    let name = repo
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| input.repo_path.clone());
    let prompt = format!(
        "Write a concise README markdown with sections Overview, Features, Quickstart, License.\n\
         Project: {name}\nGoal: {}\nReturn only markdown.",
        input.goal
    );
    let mut content = ollama.generate(&prompt).await;
    if content.trim().is_empty() {
        content = format!(
            "# {name}\n\n## Overview\n\nGenerated by CodeMate autonomy.\n\n## Features\n\n\
             - Autonomous workflow\n\n## Quickstart\n\nRun project setup commands.\n\n\
             ## License\n\nMIT\n"
        );
    }
    let target = repo.join("README.md");
    match tokio::fs::write(&target, content).await {
        Ok(()) => ToolOutcome::Success(
            ToolResult::success(format!("Wrote {}", target.display()))
                .with_artifacts(obj(json!({"path": target.to_string_lossy()}))),
        ),
        Err(err) => ToolOutcome::Fatal(ToolResult::failure(err.to_string())),
    }
}

async fn write_file(ollama: &OllamaClient, input: &WriteFileInput) -> ToolOutcome {
    let rel = input.relative_path.trim();
    if rel.is_empty() {
        return ToolOutcome::Fatal(ToolResult::failure("relative_path is required"));
    }
    let repo = Path::new(&input.repo_path);
    let Some(target) = resolve_within(repo, rel) else {
        return ToolOutcome::Fatal(ToolResult::failure("Path escapes repo root"));
    };

    let prompt = format!(
        "Generate useful starter content for file {rel}.\nRequest: {}\nReturn only file contents.",
        input.goal
    );
    let mut body = ollama.generate(&prompt).await;
    if body.trim().is_empty() {
        body = format!("# Generated by CodeMate\n# {}\n", input.goal);
    }

    if let Some(parent) = target.parent() {
        if let Err(err) = tokio::fs::create_dir_all(parent).await {
            return ToolOutcome::Fatal(ToolResult::failure(err.to_string()));
        }
    }
    match tokio::fs::write(&target, body).await {
        Ok(()) => ToolOutcome::Success(
            ToolResult::success(format!("Wrote {}", target.display()))
                .with_artifacts(obj(json!({"path": target.to_string_lossy()}))),
        ),
        Err(err) => ToolOutcome::Fatal(ToolResult::failure(err.to_string())),
    }
}

fn summarize_task(_input: &SummarizeTaskInput) -> ToolOutcome {
    ToolOutcome::Success(ToolResult::success(
        "Task complete. Review step timeline.",
    ))
}

/// Run an argv-style command with a timeout. Non-zero exit is a terminal
/// failure; hitting the timeout is transient.
async fn run_command(program: &str, args: &[&str], timeout_sec: u64) -> ToolOutcome {
    let started = Instant::now();
    let rendered = std::iter::once(program)
        .chain(args.iter().copied())
        .collect::<Vec<_>>()
        .join(" ");

    let mut command = Command::new(program);
    command.args(args);
    match timeout(Duration::from_secs(timeout_sec), command.output()).await {
        Err(_) => ToolOutcome::Transient(ToolResult::failure(format!(
            "Command timeout after {timeout_sec}s: {rendered}"
        ))),
        Ok(Err(err)) => ToolOutcome::Fatal(ToolResult::failure(err.to_string())),
        Ok(Ok(output)) => {
            let ok = output.status.success();
            let result = ToolResult {
                ok,
                output: String::from_utf8_lossy(&output.stdout).trim().to_string(),
                error: if ok {
                    String::new()
                } else {
                    String::from_utf8_lossy(&output.stderr).trim().to_string()
                },
                artifacts: obj(json!({
                    "command": rendered,
                    "returncode": output.status.code(),
                })),
                duration_ms: started.elapsed().as_millis() as i64,
            };
            if ok {
                ToolOutcome::Success(result)
            } else {
                ToolOutcome::Fatal(result)
            }
        }
    }
}

/// Lexically resolve `rel` under `repo`, refusing absolute paths and any
/// `..` traversal that would leave the root.
fn resolve_within(repo: &Path, rel: &str) -> Option<PathBuf> {
    let rel_path = Path::new(rel);
    if rel_path.is_absolute() {
        return None;
    }
    let mut depth: i32 = 0;
    for component in rel_path.components() {
        match component {
            Component::Normal(_) => depth += 1,
            Component::ParentDir => {
                depth -= 1;
                if depth < 0 {
                    return None;
                }
            }
            Component::CurDir => {}
            _ => return None,
        }
    }
    Some(repo.join(rel_path))
}

fn obj(value: serde_json::Value) -> JsonMap {
    match value {
        serde_json::Value::Object(map) => map,
        _ => JsonMap::new(),
    }
}

// ============================================================================
// Tests
// ============================================================================
