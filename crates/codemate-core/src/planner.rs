// Deterministic plan synthesis: keyword rules over the lowercased goal
// produce a small ordered list of tool steps. Pure — no clock, no I/O.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::inputs::{
    GenerateReadmeInput, GitCommitInput, GitPushInput, GitStatusInput, GithubCreateRepoInput,
    RunTestsInput, SummarizeTaskInput, ToolInput, WriteFileInput,
};
use crate::types::{JsonMap, PlannedStep, RiskLevel, StepRole};

static PATH_TOKEN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b([\w\-./\\]+\.[A-Za-z0-9]{1,8})\b").expect("path token pattern")
});

pub struct Planner;

impl Planner {
    /// Synthesize the plan for a goal. Always opens with `git_status` and
    /// closes with `summarize_task`; the middle comes from keyword matches.
    /// The result is truncated to `max_steps`.
    pub fn plan(task_id: &str, goal: &str, context: &JsonMap, max_steps: usize) -> Vec<PlannedStep> {
        let lowered = goal.to_lowercase();
        let repo_path = context
            .get("repo_path")
            .and_then(|v| v.as_str())
            .filter(|s| !s.is_empty())
            .unwrap_or(".")
            .to_string();

        let mut builder = PlanBuilder::new(task_id);

        builder.add(
            StepRole::Planner,
            "Inspect git status",
            "git_status",
            ToolInput::GitStatus(GitStatusInput {
                repo_path: repo_path.clone(),
                extra: JsonMap::new(),
            }),
            true,
        );

        if lowered.contains("readme") {
            builder.add(
                StepRole::Coder,
                "Generate README",
                "generate_readme",
                ToolInput::GenerateReadme(GenerateReadmeInput {
                    repo_path: repo_path.clone(),
                    goal: goal.to_string(),
                    extra: JsonMap::new(),
                }),
                true,
            );
        }

        if let Some(path) = PATH_TOKEN.captures(goal).and_then(|c| c.get(1)) {
            let wants_file = ["create", "write", "generate", "make"]
                .iter()
                .any(|k| lowered.contains(k));
            if wants_file {
                let relative_path = path.as_str().replace('\\', "/");
                builder.add(
                    StepRole::Coder,
                    &format!("Write file {}", path.as_str()),
                    "write_file",
                    ToolInput::WriteFile(WriteFileInput {
                        repo_path: repo_path.clone(),
                        relative_path,
                        goal: goal.to_string(),
                        extra: JsonMap::new(),
                    }),
                    true,
                );
            }
        }

        if ["test", "pytest", "unit test"]
            .iter()
            .any(|k| lowered.contains(k))
        {
            builder.add(
                StepRole::Executor,
                "Run tests",
                "run_tests",
                ToolInput::RunTests(RunTestsInput {
                    repo_path: repo_path.clone(),
                    command: "pytest -q".to_string(),
                    extra: JsonMap::new(),
                }),
                true,
            );
        }

        if lowered.contains("commit") {
            builder.add(
                StepRole::GitAgent,
                "Commit changes",
                "git_commit",
                ToolInput::GitCommit(GitCommitInput {
                    repo_path: repo_path.clone(),
                    message: commit_message(goal),
                    extra: JsonMap::new(),
                }),
                false,
            );
        }

        if lowered.contains("push") || lowered.contains("publish") {
            builder.add(
                StepRole::GitAgent,
                "Push changes",
                "git_push",
                ToolInput::GitPush(GitPushInput {
                    repo_path: repo_path.clone(),
                    remote: "origin".to_string(),
                    branch: "main".to_string(),
                    extra: JsonMap::new(),
                }),
                false,
            );
        }

        if lowered.contains("create repo") || lowered.contains("create repository") {
            builder.add(
                StepRole::GitAgent,
                "Create GitHub repository",
                "github_create_repo",
                ToolInput::GithubCreateRepo(GithubCreateRepoInput {
                    name: basename(&repo_path),
                    private: false,
                    description: String::new(),
                    extra: JsonMap::new(),
                }),
                false,
            );
        }

        builder.add(
            StepRole::Reviewer,
            "Summarize outcome",
            "summarize_task",
            ToolInput::SummarizeTask(SummarizeTaskInput {
                goal: goal.to_string(),
                extra: JsonMap::new(),
            }),
            true,
        );

        let mut steps = builder.finish();
        steps.truncate(max_steps);
        steps
    }
}

struct PlanBuilder {
    task_id: String,
    next_index: u32,
    steps: Vec<PlannedStep>,
}

impl PlanBuilder {
    fn new(task_id: &str) -> Self {
        Self {
            task_id: task_id.to_string(),
            next_index: 1,
            steps: Vec::new(),
        }
    }

    fn add(
        &mut self,
        role: StepRole,
        action: &str,
        tool_name: &str,
        input: ToolInput,
        idempotent: bool,
    ) {
        let index = self.next_index;
        self.next_index += 1;
        self.steps.push(PlannedStep {
            id: format!("{}_step_{:02}", self.task_id, index),
            step_index: index,
            role,
            action: action.to_string(),
            tool_name: tool_name.to_string(),
            risk_level: RiskLevel::for_tool(tool_name),
            idempotent,
            input: input.to_map(),
        });
    }

    fn finish(self) -> Vec<PlannedStep> {
        self.steps
    }
}

/// Derive a conventional commit message from the goal: collapse whitespace,
/// keep the first 72 characters, lowercase the leading character.
fn commit_message(goal: &str) -> String {
    let collapsed = goal.split_whitespace().collect::<Vec<_>>().join(" ");
    let short: String = if collapsed.is_empty() {
        "update project".to_string()
    } else {
        collapsed.chars().take(72).collect()
    };
    let mut chars = short.chars();
    match chars.next() {
        Some(first) if short.chars().count() > 1 => {
            format!("feat: {}{}", first.to_lowercase(), chars.as_str())
        }
        _ => format!("feat: {short}"),
    }
}

fn basename(path: &str) -> String {
    std::path::Path::new(path)
        .file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_else(|| path.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn context(repo_path: &str) -> JsonMap {
        json!({"repo_path": repo_path})
            .as_object()
            .cloned()
            .unwrap_or_default()
    }

    fn tool_names(steps: &[PlannedStep]) -> Vec<&str> {
        steps.iter().map(|s| s.tool_name.as_str()).collect()
    }

    #[test]
    fn readme_and_commit_goal_plans_expected_steps() {
        let steps = Planner::plan("task_a", "create README and commit", &context("."), 8);
        assert_eq!(
            tool_names(&steps),
            vec!["git_status", "generate_readme", "git_commit", "summarize_task"]
        );
        let commit = &steps[2];
        assert_eq!(commit.risk_level, RiskLevel::Medium);
        assert!(!commit.idempotent);
        assert_eq!(
            commit.input.get("message").and_then(|v| v.as_str()),
            Some("feat: create README and commit")
        );
    }

    #[test]
    fn push_goal_includes_high_risk_step() {
        let steps = Planner::plan("task_b", "push latest changes to remote", &JsonMap::new(), 8);
        assert_eq!(
            tool_names(&steps),
            vec!["git_status", "git_push", "summarize_task"]
        );
        assert_eq!(steps[1].risk_level, RiskLevel::High);
        assert!(!steps[1].idempotent);
        assert_eq!(
            steps[1].input.get("remote").and_then(|v| v.as_str()),
            Some("origin")
        );
        assert_eq!(
            steps[1].input.get("branch").and_then(|v| v.as_str()),
            Some("main")
        );
    }

    #[test]
    fn file_token_with_write_verb_adds_write_file() {
        let steps = Planner::plan("task_c", r"create src\main.py for the parser", &context("."), 8);
        assert!(tool_names(&steps).contains(&"write_file"));
        let write = steps.iter().find(|s| s.tool_name == "write_file").unwrap();
        assert_eq!(
            write.input.get("relative_path").and_then(|v| v.as_str()),
            Some("src/main.py"),
            "backslashes normalize to forward slashes"
        );
    }

    #[test]
    fn file_token_without_verb_is_ignored() {
        let steps = Planner::plan("task_d", "inspect src/main.py closely", &context("."), 8);
        assert!(!tool_names(&steps).contains(&"write_file"));
    }

    #[test]
    fn test_keyword_adds_run_tests_with_default_command() {
        let steps = Planner::plan("task_e", "run the unit tests", &context("."), 8);
        let run = steps.iter().find(|s| s.tool_name == "run_tests").unwrap();
        assert_eq!(
            run.input.get("command").and_then(|v| v.as_str()),
            Some("pytest -q")
        );
    }

    #[test]
    fn create_repo_uses_repo_basename() {
        let steps = Planner::plan(
            "task_f",
            "create repository for this project",
            &context("/home/dev/projects/acme"),
            8,
        );
        let create = steps
            .iter()
            .find(|s| s.tool_name == "github_create_repo")
            .unwrap();
        assert_eq!(
            create.input.get("name").and_then(|v| v.as_str()),
            Some("acme")
        );
    }

    #[test]
    fn step_ids_and_indexes_are_contiguous() {
        let steps = Planner::plan("task_g", "write README, run tests and commit", &context("."), 8);
        for (i, step) in steps.iter().enumerate() {
            assert_eq!(step.step_index as usize, i + 1);
            assert_eq!(step.id, format!("task_g_step_{:02}", i + 1));
        }
    }

    #[test]
    fn plan_truncates_to_max_steps() {
        let goal = "create README notes.txt, write it, run tests, commit and push to publish";
        let full = Planner::plan("task_h", goal, &context("."), 30);
        assert!(full.len() > 2);
        let truncated = Planner::plan("task_h", goal, &context("."), 2);
        assert_eq!(truncated.len(), 2);
        assert_eq!(truncated[0].tool_name, "git_status");
    }

    #[test]
    fn commit_message_rules() {
        assert_eq!(
            commit_message("Add   a new\tparser"),
            "feat: add a new parser"
        );
        let long = "Rework the ingestion pipeline so that it batches writes and retries failures with backoff";
        let msg = commit_message(long);
        assert!(msg.len() <= "feat: ".len() + 72);
        assert!(msg.starts_with("feat: rework the ingestion"));
        assert_eq!(commit_message("   "), "feat: update project");
    }

    #[test]
    fn minimal_goal_still_brackets_with_status_and_summary() {
        let steps = Planner::plan("task_i", "do the thing", &JsonMap::new(), 8);
        assert_eq!(tool_names(&steps), vec!["git_status", "summarize_task"]);
    }
}
