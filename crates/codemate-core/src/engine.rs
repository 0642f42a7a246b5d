// Orchestration engine: owns the task lifecycle, spawns one worker per
// active task, enforces the risk policy and the time budget, and mediates
// approval. Every state transition is persisted first, then fanned out.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::{json, Value};

use crate::error::{GatewayError, Result};
use crate::hub::EventHub;
use crate::planner::Planner;
use crate::runner::{ToolResult, ToolRunner};
use crate::store::Store;
use crate::types::{
    now_ts, JsonMap, PlannedStep, RiskLevel, Step, StepStatus, TaskCreateRequest, TaskSnapshot,
    TaskStatus,
};

const MAX_ATTEMPTS: usize = 2;
const RETRY_DELAY: Duration = Duration::from_millis(750);

#[derive(Clone)]
pub struct Engine {
    store: Arc<Store>,
    hub: EventHub,
    runner: Arc<dyn ToolRunner>,
    /// task_id -> step_id awaiting human input. One entry per task at most.
    pending_approval: Arc<Mutex<HashMap<String, String>>>,
}

impl Engine {
    pub fn new(store: Arc<Store>, hub: EventHub, runner: Arc<dyn ToolRunner>) -> Self {
        Self {
            store,
            hub,
            runner,
            pending_approval: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Persist a new task, emit its first event, and hand it to a worker.
    pub async fn create_task(&self, req: &TaskCreateRequest) -> Result<TaskSnapshot> {
        let task_id = self.store.create_task(req).await?;
        self.emit(&task_id, "task_updated", obj(json!({"status": "queued"})))
            .await?;

        let engine = self.clone();
        let worker_task = task_id.clone();
        tokio::spawn(async move {
            if let Err(err) = engine.plan_and_run(&worker_task).await {
                engine.record_worker_failure(&worker_task, err).await;
            }
        });

        self.store.snapshot(&task_id).await
    }

    /// Resume a task whose high-risk step was approved. The previous worker
    /// returned right after recording the pending step, so the fresh worker
    /// spawned here is the only one touching the task.
    pub async fn approve(&self, task_id: &str) -> Result<TaskSnapshot> {
        let step_id = self
            .take_pending(task_id)
            .ok_or(GatewayError::NoPendingApproval)?;

        self.store.set_step(&step_id, StepStatus::Pending, None).await?;
        self.store
            .set_task(task_id, TaskStatus::Running, Some(&step_id), None)
            .await?;
        self.emit(
            task_id,
            "task_updated",
            obj(json!({"status": "running", "approved_step_id": step_id})),
        )
        .await?;

        let engine = self.clone();
        let worker_task = task_id.to_string();
        tokio::spawn(async move {
            if let Err(err) = engine.run_steps(&worker_task).await {
                engine.record_worker_failure(&worker_task, err).await;
            }
        });

        self.store.snapshot(task_id).await
    }

    /// Reject the pending high-risk step and fail the task.
    pub async fn deny(&self, task_id: &str, reason: &str) -> Result<TaskSnapshot> {
        let task = self
            .store
            .get_task(task_id)
            .await?
            .ok_or_else(|| GatewayError::TaskNotFound(task_id.to_string()))?;
        if task.status.is_terminal() {
            return self.store.snapshot(task_id).await;
        }

        let step_id = self.take_pending(task_id);
        if let Some(step_id) = &step_id {
            self.store
                .set_step(
                    step_id,
                    StepStatus::Denied,
                    Some(&obj(json!({"reason": reason}))),
                )
                .await?;
        }
        self.store
            .set_task(task_id, TaskStatus::Failed, step_id.as_deref(), Some(reason))
            .await?;
        self.emit(
            task_id,
            "task_failed",
            obj(json!({"reason": reason, "step_id": step_id})),
        )
        .await?;
        self.store.snapshot(task_id).await
    }

    /// Cooperative cancellation: clears any pending approval and marks the
    /// task cancelled; a worker notices between steps. Terminal tasks are
    /// left untouched.
    pub async fn cancel(&self, task_id: &str) -> Result<TaskSnapshot> {
        let task = self
            .store
            .get_task(task_id)
            .await?
            .ok_or_else(|| GatewayError::TaskNotFound(task_id.to_string()))?;
        if task.status.is_terminal() {
            return self.store.snapshot(task_id).await;
        }

        self.take_pending(task_id);
        self.store
            .set_task(
                task_id,
                TaskStatus::Cancelled,
                task.current_step_id.as_deref(),
                None,
            )
            .await?;
        self.emit(task_id, "task_updated", obj(json!({"status": "cancelled"})))
            .await?;
        self.store.snapshot(task_id).await
    }

    async fn plan_and_run(&self, task_id: &str) -> Result<()> {
        let Some(task) = self.store.get_task(task_id).await? else {
            return Ok(());
        };

        self.store
            .set_task(task_id, TaskStatus::Planning, None, None)
            .await?;
        self.emit(task_id, "task_updated", obj(json!({"status": "planning"})))
            .await?;

        let steps = Planner::plan(task_id, &task.goal, &task.context, task.max_steps as usize);
        if let Err(reason) = validate_plan(&steps, task.max_steps as usize) {
            self.store
                .set_task(task_id, TaskStatus::Failed, None, Some(&reason))
                .await?;
            self.emit(task_id, "task_failed", obj(json!({"reason": reason})))
                .await?;
            return Ok(());
        }

        self.store.add_steps(task_id, &steps).await?;
        self.store
            .set_task(task_id, TaskStatus::Running, None, None)
            .await?;
        self.emit(
            task_id,
            "task_updated",
            obj(json!({"status": "running", "planned_steps": steps.len()})),
        )
        .await?;

        self.run_steps(task_id).await
    }

    /// The worker loop: drive steps in index order until the task parks on
    /// an approval, fails, or completes.
    async fn run_steps(&self, task_id: &str) -> Result<()> {
        let snap = self.store.snapshot(task_id).await?;
        let started = snap.task.created_at;
        let time_budget = snap.task.time_budget_sec as f64;

        for step in &snap.steps {
            let Some(current) = self.store.get_task(task_id).await? else {
                return Ok(());
            };
            if current.status == TaskStatus::Cancelled {
                self.emit(task_id, "task_updated", obj(json!({"status": "cancelled"})))
                    .await?;
                return Ok(());
            }
            if !matches!(
                current.status,
                TaskStatus::Running | TaskStatus::WaitingApproval
            ) {
                return Ok(());
            }

            if now_ts() - started > time_budget {
                let reason = "Time budget exceeded";
                self.store
                    .set_step(
                        &step.id,
                        StepStatus::Failed,
                        Some(&obj(json!({"error": reason}))),
                    )
                    .await?;
                self.store
                    .set_task(task_id, TaskStatus::Failed, Some(&step.id), Some(reason))
                    .await?;
                self.emit(
                    task_id,
                    "task_failed",
                    obj(json!({"reason": reason, "step_id": step.id})),
                )
                .await?;
                return Ok(());
            }

            if matches!(step.status, StepStatus::Completed | StepStatus::Denied) {
                continue;
            }

            self.store
                .set_step(&step.id, StepStatus::InProgress, None)
                .await?;
            self.store
                .set_task(task_id, TaskStatus::Running, Some(&step.id), None)
                .await?;
            self.emit(
                task_id,
                "task_updated",
                obj(json!({
                    "status": "running",
                    "current_step_id": step.id,
                    "tool_name": step.tool_name,
                    "step_action": step.action,
                })),
            )
            .await?;

            if step.risk_level == RiskLevel::High {
                self.store
                    .set_step(&step.id, StepStatus::WaitingApproval, None)
                    .await?;
                self.store
                    .set_task(task_id, TaskStatus::WaitingApproval, Some(&step.id), None)
                    .await?;
                {
                    let mut pending = self
                        .pending_approval
                        .lock()
                        .unwrap_or_else(|e| e.into_inner());
                    pending.insert(task_id.to_string(), step.id.clone());
                }
                // Final act of this worker: after the event below it performs
                // no store writes, so approve() can spawn a successor safely.
                self.emit(
                    task_id,
                    "approval_requested",
                    obj(json!({
                        "task_id": task_id,
                        "step_id": step.id,
                        "tool_name": step.tool_name,
                        "action": step.action,
                        "risk_level": step.risk_level,
                    })),
                )
                .await?;
                return Ok(());
            }

            let result = self.run_with_retry(task_id, step).await?;
            let ok = result.get("ok").and_then(Value::as_bool).unwrap_or(false);
            if !ok {
                let reason = result
                    .get("error")
                    .and_then(Value::as_str)
                    .filter(|s| !s.is_empty())
                    .unwrap_or("Step failed")
                    .to_string();
                self.store
                    .set_step(&step.id, StepStatus::Failed, Some(&result))
                    .await?;
                self.store
                    .set_task(task_id, TaskStatus::Failed, Some(&step.id), Some(&reason))
                    .await?;
                self.emit(
                    task_id,
                    "task_failed",
                    obj(json!({"reason": reason, "step_id": step.id, "result": result})),
                )
                .await?;
                self.store.memory(task_id, "failure", &reason, 0.2).await?;
                return Ok(());
            }

            self.store
                .set_step(&step.id, StepStatus::Completed, Some(&result))
                .await?;
            self.emit(
                task_id,
                "task_updated",
                obj(json!({"status": "running", "completed_step_id": step.id})),
            )
            .await?;
        }

        self.store
            .set_task(task_id, TaskStatus::Completed, None, None)
            .await?;
        self.emit(task_id, "task_completed", obj(json!({"task_id": task_id})))
            .await?;
        self.store.memory(task_id, "goal", &snap.task.goal, 1.0).await?;
        self.store
            .memory(task_id, "outcome", "completed", 0.9)
            .await?;
        Ok(())
    }

    /// Up to two attempts per step; a transient first failure sleeps 750 ms
    /// and tries once more. Every attempt appends a tool_run row; the last
    /// result becomes the step output.
    async fn run_with_retry(&self, task_id: &str, step: &Step) -> Result<JsonMap> {
        let mut last = ToolResult::failure("Unknown failure").to_map();
        for attempt in 0..MAX_ATTEMPTS {
            let outcome = self.runner.run(&step.tool_name, &step.input).await;
            let result = outcome.result().to_map();
            self.store
                .tool_run(task_id, &step.id, &step.tool_name, &step.input, &result)
                .await?;
            last = result;
            if outcome.is_success() {
                return Ok(last);
            }
            if !outcome.is_retryable() || attempt + 1 == MAX_ATTEMPTS {
                break;
            }
            tokio::time::sleep(RETRY_DELAY).await;
        }
        Ok(last)
    }

    /// Persist the event, then fan it out. Store order therefore matches
    /// delivery order for a task.
    async fn emit(&self, task_id: &str, event_type: &str, payload: JsonMap) -> Result<()> {
        let event = self.store.event(task_id, event_type, payload).await?;
        self.hub.publish(task_id, &event);
        Ok(())
    }

    fn take_pending(&self, task_id: &str) -> Option<String> {
        let mut pending = self
            .pending_approval
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        pending.remove(task_id)
    }

    /// Workers never propagate errors upward; a broken worker fails its task.
    async fn record_worker_failure(&self, task_id: &str, err: GatewayError) {
        tracing::error!(task_id, error = %err, "task worker aborted");
        let reason = err.to_string();
        if let Err(store_err) = self
            .store
            .set_task(task_id, TaskStatus::Failed, None, Some(&reason))
            .await
        {
            tracing::error!(task_id, error = %store_err, "failed to record worker failure");
            return;
        }
        let _ = self
            .emit(task_id, "task_failed", obj(json!({"reason": reason})))
            .await;
    }
}

fn validate_plan(steps: &[PlannedStep], max_steps: usize) -> std::result::Result<(), String> {
    if steps.is_empty() {
        return Err("Planner returned zero steps".to_string());
    }
    if steps.len() > max_steps {
        return Err("Planner exceeded max steps".to_string());
    }
    if steps.iter().any(|s| s.tool_name.is_empty()) {
        return Err("Step missing tool intent".to_string());
    }
    Ok(())
}

fn obj(value: Value) -> JsonMap {
    match value {
        Value::Object(map) => map,
        _ => JsonMap::new(),
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::ToolOutcome;
    use async_trait::async_trait;
    use rusqlite::Connection;
    use std::collections::VecDeque;
    use tempfile::{tempdir, TempDir};
    use tokio::time::{sleep, timeout};

    /// Runner that replays scripted outcomes per tool and succeeds for
    /// anything unscripted.
    struct ScriptedRunner {
        script: Mutex<HashMap<String, VecDeque<ToolOutcome>>>,
    }

    impl ScriptedRunner {
        fn all_ok() -> Self {
            Self {
                script: Mutex::new(HashMap::new()),
            }
        }

        fn with(tool: &str, outcomes: Vec<ToolOutcome>) -> Self {
            let mut script = HashMap::new();
            script.insert(tool.to_string(), VecDeque::from(outcomes));
            Self {
                script: Mutex::new(script),
            }
        }
    }

    #[async_trait]
    impl ToolRunner for ScriptedRunner {
        async fn run(&self, tool_name: &str, _args: &JsonMap) -> ToolOutcome {
            let mut script = self.script.lock().unwrap_or_else(|e| e.into_inner());
            script
                .get_mut(tool_name)
                .and_then(|queue| queue.pop_front())
                .unwrap_or_else(|| {
                    ToolOutcome::Success(ToolResult::success(format!("{tool_name} ok")))
                })
        }
    }

    async fn engine_with(runner: Arc<dyn ToolRunner>) -> (TempDir, Engine, Arc<Store>) {
        let temp = tempdir().unwrap();
        let store = Arc::new(Store::new(&temp.path().join("gateway.db")).await.unwrap());
        let engine = Engine::new(store.clone(), EventHub::new(), runner);
        (temp, engine, store)
    }

    fn request(goal: &str) -> TaskCreateRequest {
        TaskCreateRequest {
            goal: goal.to_string(),
            context: JsonMap::new(),
            max_steps: 8,
            time_budget_sec: 300,
            token_budget: 12_000,
        }
    }

    async fn wait_for_status(store: &Store, task_id: &str, status: TaskStatus) {
        timeout(Duration::from_secs(5), async {
            loop {
                if let Some(task) = store.get_task(task_id).await.unwrap() {
                    if task.status == status {
                        return;
                    }
                    assert!(
                        !(task.status.is_terminal() && task.status != status),
                        "task settled in {:?} while waiting for {:?}",
                        task.status,
                        status
                    );
                }
                sleep(Duration::from_millis(20)).await;
            }
        })
        .await
        .unwrap_or_else(|_| panic!("timed out waiting for {status:?}"));
    }

    fn count_rows(store: &Store, sql: &str, param: &str) -> i64 {
        let conn = Connection::open(store.db_path()).unwrap();
        conn.query_row(sql, [param], |row| row.get(0)).unwrap()
    }

    #[tokio::test]
    async fn low_risk_goal_runs_to_completion() {
        let (_tmp, engine, store) = engine_with(Arc::new(ScriptedRunner::all_ok())).await;
        let snap = engine
            .create_task(&request("create README and commit"))
            .await
            .unwrap();
        let task_id = snap.task.id.clone();

        wait_for_status(&store, &task_id, TaskStatus::Completed).await;

        let snap = store.snapshot(&task_id).await.unwrap();
        assert_eq!(
            snap.steps
                .iter()
                .map(|s| s.tool_name.as_str())
                .collect::<Vec<_>>(),
            vec!["git_status", "generate_readme", "git_commit", "summarize_task"]
        );
        assert!(snap.steps.iter().all(|s| s.status == StepStatus::Completed));
        assert!(snap
            .events
            .iter()
            .any(|e| e.event_type == "task_completed"));

        // one tool_run per step, goal + outcome memory entries
        let runs = count_rows(
            &store,
            "SELECT COUNT(*) FROM tool_runs WHERE task_id = ?1",
            &task_id,
        );
        assert_eq!(runs, snap.steps.len() as i64);
        let memories = count_rows(
            &store,
            "SELECT COUNT(*) FROM memory_items WHERE task_id = ?1",
            &task_id,
        );
        assert_eq!(memories, 2);
    }

    #[tokio::test]
    async fn event_ids_are_strictly_increasing() {
        let (_tmp, engine, store) = engine_with(Arc::new(ScriptedRunner::all_ok())).await;
        let snap = engine.create_task(&request("run the tests")).await.unwrap();
        wait_for_status(&store, &snap.task.id, TaskStatus::Completed).await;

        let events = store.snapshot(&snap.task.id).await.unwrap().events;
        assert_eq!(events[0].event_type, "task_updated");
        assert!(events.windows(2).all(|w| w[0].id < w[1].id));
    }

    #[tokio::test]
    async fn high_risk_step_parks_without_running_the_tool() {
        let (_tmp, engine, store) = engine_with(Arc::new(ScriptedRunner::all_ok())).await;
        let snap = engine
            .create_task(&request("push latest changes to remote"))
            .await
            .unwrap();
        let task_id = snap.task.id.clone();

        wait_for_status(&store, &task_id, TaskStatus::WaitingApproval).await;

        let snap = store.snapshot(&task_id).await.unwrap();
        let push = snap
            .steps
            .iter()
            .find(|s| s.tool_name == "git_push")
            .unwrap();
        assert_eq!(push.status, StepStatus::WaitingApproval);
        assert_eq!(snap.task.current_step_id.as_deref(), Some(push.id.as_str()));
        assert!(snap
            .events
            .iter()
            .any(|e| e.event_type == "approval_requested"));

        let push_runs = count_rows(
            &store,
            "SELECT COUNT(*) FROM tool_runs WHERE step_id = ?1",
            &push.id,
        );
        assert_eq!(push_runs, 0, "gated tool must not run before approval");
    }

    #[tokio::test]
    async fn approval_resumes_and_completes() {
        let (_tmp, engine, store) = engine_with(Arc::new(ScriptedRunner::all_ok())).await;
        let snap = engine
            .create_task(&request("push latest changes to remote"))
            .await
            .unwrap();
        let task_id = snap.task.id.clone();
        wait_for_status(&store, &task_id, TaskStatus::WaitingApproval).await;

        // The fresh worker may already be past the approved step by the time
        // approve() snapshots, so only assert the task is no longer parked.
        let snap = engine.approve(&task_id).await.unwrap();
        assert_ne!(snap.task.status, TaskStatus::WaitingApproval);

        wait_for_status(&store, &task_id, TaskStatus::Completed).await;

        let push_id = format!("{task_id}_step_02");
        let push_runs = count_rows(
            &store,
            "SELECT COUNT(*) FROM tool_runs WHERE step_id = ?1",
            &push_id,
        );
        assert_eq!(push_runs, 1);
    }

    #[tokio::test]
    async fn second_approve_conflicts() {
        let (_tmp, engine, store) = engine_with(Arc::new(ScriptedRunner::all_ok())).await;
        let snap = engine
            .create_task(&request("push latest changes to remote"))
            .await
            .unwrap();
        wait_for_status(&store, &snap.task.id, TaskStatus::WaitingApproval).await;

        engine.approve(&snap.task.id).await.unwrap();
        assert!(matches!(
            engine.approve(&snap.task.id).await,
            Err(GatewayError::NoPendingApproval)
        ));
    }

    #[tokio::test]
    async fn denial_fails_task_and_records_reason() {
        let (_tmp, engine, store) = engine_with(Arc::new(ScriptedRunner::all_ok())).await;
        let snap = engine
            .create_task(&request("push latest changes to remote"))
            .await
            .unwrap();
        let task_id = snap.task.id.clone();
        wait_for_status(&store, &task_id, TaskStatus::WaitingApproval).await;

        let snap = engine.deny(&task_id, "blocked").await.unwrap();
        assert_eq!(snap.task.status, TaskStatus::Failed);
        assert_eq!(snap.task.error.as_deref(), Some("blocked"));

        let push = snap
            .steps
            .iter()
            .find(|s| s.tool_name == "git_push")
            .unwrap();
        assert_eq!(push.status, StepStatus::Denied);
        assert_eq!(
            push.output.as_ref().and_then(|o| o.get("reason")),
            Some(&json!("blocked"))
        );
        let push_runs = count_rows(
            &store,
            "SELECT COUNT(*) FROM tool_runs WHERE step_id = ?1",
            &push.id,
        );
        assert_eq!(push_runs, 0);
        assert!(snap.events.iter().any(|e| e.event_type == "task_failed"));
    }

    #[tokio::test]
    async fn transient_failure_retries_once_then_succeeds() {
        let runner = ScriptedRunner::with(
            "git_status",
            vec![
                ToolOutcome::Transient(ToolResult::failure("connection reset")),
                ToolOutcome::Success(ToolResult::success("clean")),
            ],
        );
        let (_tmp, engine, store) = engine_with(Arc::new(runner)).await;
        let snap = engine.create_task(&request("do the thing")).await.unwrap();
        let task_id = snap.task.id.clone();

        wait_for_status(&store, &task_id, TaskStatus::Completed).await;

        let step_id = format!("{task_id}_step_01");
        let runs = count_rows(
            &store,
            "SELECT COUNT(*) FROM tool_runs WHERE step_id = ?1",
            &step_id,
        );
        assert_eq!(runs, 2, "one row per attempt");

        let snap = store.snapshot(&task_id).await.unwrap();
        assert_eq!(snap.steps[0].status, StepStatus::Completed);
    }

    #[tokio::test]
    async fn fatal_failure_stops_after_one_attempt() {
        let runner = ScriptedRunner::with(
            "git_status",
            vec![ToolOutcome::Fatal(ToolResult::failure("repo not found"))],
        );
        let (_tmp, engine, store) = engine_with(Arc::new(runner)).await;
        let snap = engine.create_task(&request("do the thing")).await.unwrap();
        let task_id = snap.task.id.clone();

        wait_for_status(&store, &task_id, TaskStatus::Failed).await;

        let snap = store.snapshot(&task_id).await.unwrap();
        assert_eq!(snap.task.error.as_deref(), Some("repo not found"));
        assert_eq!(snap.steps[0].status, StepStatus::Failed);
        let runs = count_rows(
            &store,
            "SELECT COUNT(*) FROM tool_runs WHERE step_id = ?1",
            &snap.steps[0].id,
        );
        assert_eq!(runs, 1);
        let failures = count_rows(
            &store,
            "SELECT COUNT(*) FROM memory_items WHERE task_id = ?1 AND key = 'failure'",
            &task_id,
        );
        assert_eq!(failures, 1);
    }

    #[tokio::test]
    async fn transient_failures_exhaust_after_two_attempts() {
        let runner = ScriptedRunner::with(
            "git_status",
            vec![
                ToolOutcome::Transient(ToolResult::failure("timeout a")),
                ToolOutcome::Transient(ToolResult::failure("timeout b")),
            ],
        );
        let (_tmp, engine, store) = engine_with(Arc::new(runner)).await;
        let snap = engine.create_task(&request("do the thing")).await.unwrap();
        let task_id = snap.task.id.clone();

        wait_for_status(&store, &task_id, TaskStatus::Failed).await;

        let snap = store.snapshot(&task_id).await.unwrap();
        assert_eq!(snap.task.error.as_deref(), Some("timeout b"));
        let runs = count_rows(
            &store,
            "SELECT COUNT(*) FROM tool_runs WHERE step_id = ?1",
            &snap.steps[0].id,
        );
        assert_eq!(runs, 2);
    }

    #[tokio::test]
    async fn elapsed_budget_fails_the_next_step() {
        let (_tmp, engine, store) = engine_with(Arc::new(ScriptedRunner::all_ok())).await;
        let task_id = store.create_task(&request("do the thing")).await.unwrap();

        // Age the task past its budget before any worker runs.
        {
            let conn = Connection::open(store.db_path()).unwrap();
            conn.execute(
                "UPDATE tasks SET created_at = created_at - 1000 WHERE id = ?1",
                [&task_id],
            )
            .unwrap();
        }

        engine.plan_and_run(&task_id).await.unwrap();

        let snap = store.snapshot(&task_id).await.unwrap();
        assert_eq!(snap.task.status, TaskStatus::Failed);
        assert_eq!(snap.task.error.as_deref(), Some("Time budget exceeded"));
        assert_eq!(snap.steps[0].status, StepStatus::Failed);
        assert_eq!(
            snap.steps[0].output.as_ref().and_then(|o| o.get("error")),
            Some(&json!("Time budget exceeded"))
        );
        // nothing beyond the first step was attempted
        assert!(snap.steps[1..]
            .iter()
            .all(|s| s.status == StepStatus::Pending));
    }

    #[tokio::test]
    async fn cancel_clears_pending_approval() {
        let (_tmp, engine, store) = engine_with(Arc::new(ScriptedRunner::all_ok())).await;
        let snap = engine
            .create_task(&request("push latest changes to remote"))
            .await
            .unwrap();
        let task_id = snap.task.id.clone();
        wait_for_status(&store, &task_id, TaskStatus::WaitingApproval).await;

        let before = store.get_task(&task_id).await.unwrap().unwrap();
        let snap = engine.cancel(&task_id).await.unwrap();
        assert_eq!(snap.task.status, TaskStatus::Cancelled);
        assert_eq!(snap.task.current_step_id, before.current_step_id);
        assert!(matches!(
            engine.approve(&task_id).await,
            Err(GatewayError::NoPendingApproval)
        ));
        assert!(!snap.events.iter().any(|e| e.event_type == "task_failed"));
    }

    #[tokio::test]
    async fn cancel_unknown_task_is_not_found() {
        let (_tmp, engine, _store) = engine_with(Arc::new(ScriptedRunner::all_ok())).await;
        assert!(matches!(
            engine.cancel("task_missing").await,
            Err(GatewayError::TaskNotFound(_))
        ));
    }

    #[tokio::test]
    async fn cancel_after_completion_leaves_terminal_state_alone() {
        let (_tmp, engine, store) = engine_with(Arc::new(ScriptedRunner::all_ok())).await;
        let snap = engine.create_task(&request("do the thing")).await.unwrap();
        let task_id = snap.task.id.clone();
        wait_for_status(&store, &task_id, TaskStatus::Completed).await;

        let snap = engine.cancel(&task_id).await.unwrap();
        assert_eq!(snap.task.status, TaskStatus::Completed);
    }

    #[tokio::test]
    async fn deny_unknown_task_is_not_found() {
        let (_tmp, engine, _store) = engine_with(Arc::new(ScriptedRunner::all_ok())).await;
        assert!(matches!(
            engine.deny("task_missing", "nope").await,
            Err(GatewayError::TaskNotFound(_))
        ));
    }
}
