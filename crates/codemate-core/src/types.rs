// Core type definitions for the task gateway: task and step state machines,
// the static tool risk table, and the create-request contract.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::GatewayError;

/// JSON object payload as stored and served (context, step input/output,
/// event payloads, tool args and results).
pub type JsonMap = serde_json::Map<String, Value>;

/// Wall-clock seconds since the epoch. Budget math and row timestamps share
/// this clock so persisted values stay comparable.
pub fn now_ts() -> f64 {
    chrono::Utc::now().timestamp_micros() as f64 / 1_000_000.0
}

// ============================================================================
// Statuses
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Queued,
    Planning,
    Running,
    WaitingApproval,
    Completed,
    Failed,
    Cancelled,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Queued => "queued",
            TaskStatus::Planning => "planning",
            TaskStatus::Running => "running",
            TaskStatus::WaitingApproval => "waiting_approval",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::Cancelled => "cancelled",
        }
    }

    /// Terminal tasks never change again apart from `updated_at`.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }
}

impl std::str::FromStr for TaskStatus {
    type Err = GatewayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(TaskStatus::Queued),
            "planning" => Ok(TaskStatus::Planning),
            "running" => Ok(TaskStatus::Running),
            "waiting_approval" => Ok(TaskStatus::WaitingApproval),
            "completed" => Ok(TaskStatus::Completed),
            "failed" => Ok(TaskStatus::Failed),
            "cancelled" => Ok(TaskStatus::Cancelled),
            other => Err(GatewayError::InvalidStatus(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    InProgress,
    WaitingApproval,
    Completed,
    Failed,
    Denied,
}

impl StepStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            StepStatus::Pending => "pending",
            StepStatus::InProgress => "in_progress",
            StepStatus::WaitingApproval => "waiting_approval",
            StepStatus::Completed => "completed",
            StepStatus::Failed => "failed",
            StepStatus::Denied => "denied",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            StepStatus::Completed | StepStatus::Failed | StepStatus::Denied
        )
    }
}

impl std::str::FromStr for StepStatus {
    type Err = GatewayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(StepStatus::Pending),
            "in_progress" => Ok(StepStatus::InProgress),
            "waiting_approval" => Ok(StepStatus::WaitingApproval),
            "completed" => Ok(StepStatus::Completed),
            "failed" => Ok(StepStatus::Failed),
            "denied" => Ok(StepStatus::Denied),
            other => Err(GatewayError::InvalidStatus(other.to_string())),
        }
    }
}

// ============================================================================
// Risk
// ============================================================================

/// Static classification gating human approval. High-risk steps pause the
/// task until an approve or deny arrives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

impl RiskLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            RiskLevel::Low => "low",
            RiskLevel::Medium => "medium",
            RiskLevel::High => "high",
        }
    }

    /// Unknown tools default to medium.
    pub fn for_tool(tool_name: &str) -> RiskLevel {
        match tool_name {
            "git_status" | "run_tests" | "summarize_task" => RiskLevel::Low,
            "write_file" | "generate_readme" | "git_commit" => RiskLevel::Medium,
            "git_push" | "github_create_repo" | "github_update_description" => RiskLevel::High,
            _ => RiskLevel::Medium,
        }
    }
}

impl std::str::FromStr for RiskLevel {
    type Err = GatewayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "low" => Ok(RiskLevel::Low),
            "medium" => Ok(RiskLevel::Medium),
            "high" => Ok(RiskLevel::High),
            other => Err(GatewayError::InvalidStatus(other.to_string())),
        }
    }
}

/// Advisory label describing which kind of agent a step belongs to. The
/// engine never branches on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepRole {
    Planner,
    Coder,
    Executor,
    GitAgent,
    Reviewer,
}

impl StepRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            StepRole::Planner => "planner",
            StepRole::Coder => "coder",
            StepRole::Executor => "executor",
            StepRole::GitAgent => "git_agent",
            StepRole::Reviewer => "reviewer",
        }
    }
}

impl std::str::FromStr for StepRole {
    type Err = GatewayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "planner" => Ok(StepRole::Planner),
            "coder" => Ok(StepRole::Coder),
            "executor" => Ok(StepRole::Executor),
            "git_agent" => Ok(StepRole::GitAgent),
            "reviewer" => Ok(StepRole::Reviewer),
            other => Err(GatewayError::InvalidStatus(other.to_string())),
        }
    }
}

// ============================================================================
// Records
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub goal: String,
    pub status: TaskStatus,
    pub context: JsonMap,
    pub current_step_id: Option<String>,
    pub error: Option<String>,
    pub created_at: f64,
    pub updated_at: f64,
    pub max_steps: u32,
    pub time_budget_sec: u32,
    pub token_budget: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Step {
    pub id: String,
    pub step_index: u32,
    pub role: StepRole,
    pub action: String,
    pub tool_name: String,
    pub risk_level: RiskLevel,
    pub idempotent: bool,
    pub status: StepStatus,
    pub input: JsonMap,
    pub output: Option<JsonMap>,
    pub created_at: f64,
    pub updated_at: f64,
}

/// A step as synthesized by the planner, before insertion gives it status
/// and timestamps.
#[derive(Debug, Clone)]
pub struct PlannedStep {
    pub id: String,
    pub step_index: u32,
    pub role: StepRole,
    pub action: String,
    pub tool_name: String,
    pub risk_level: RiskLevel,
    pub idempotent: bool,
    pub input: JsonMap,
}

/// Persisted event. `id` is assigned by the store; ids for one task are
/// strictly increasing in emission order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventRecord {
    pub id: i64,
    pub task_id: String,
    pub event_type: String,
    pub payload: JsonMap,
    pub created_at: f64,
}

/// Point-in-time view of a task, its ordered steps, and its event log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskSnapshot {
    pub task: Task,
    pub steps: Vec<Step>,
    pub events: Vec<EventRecord>,
}

// ============================================================================
// Create request
// ============================================================================

fn default_max_steps() -> u32 {
    8
}

fn default_time_budget_sec() -> u32 {
    300
}

fn default_token_budget() -> u32 {
    12_000
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskCreateRequest {
    pub goal: String,
    #[serde(default)]
    pub context: JsonMap,
    #[serde(default = "default_max_steps")]
    pub max_steps: u32,
    #[serde(default = "default_time_budget_sec")]
    pub time_budget_sec: u32,
    #[serde(default = "default_token_budget")]
    pub token_budget: u32,
}

impl TaskCreateRequest {
    pub fn validate(&self) -> crate::error::Result<()> {
        if self.goal.trim().len() < 3 {
            return Err(GatewayError::Validation(
                "goal must be at least 3 characters".to_string(),
            ));
        }
        if !(2..=30).contains(&self.max_steps) {
            return Err(GatewayError::Validation(
                "max_steps must be between 2 and 30".to_string(),
            ));
        }
        if !(30..=3600).contains(&self.time_budget_sec) {
            return Err(GatewayError::Validation(
                "time_budget_sec must be between 30 and 3600".to_string(),
            ));
        }
        if !(1000..=250_000).contains(&self.token_budget) {
            return Err(GatewayError::Validation(
                "token_budget must be between 1000 and 250000".to_string(),
            ));
        }
        Ok(())
    }
}
