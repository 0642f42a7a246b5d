// Persistence layer: tasks, steps, tool runs, events, and scratch memory in
// a single embedded SQLite file. One connection behind a mutex serializes
// writers; every operation commits before returning.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::error::{GatewayError, Result};
use crate::types::{
    now_ts, EventRecord, JsonMap, PlannedStep, Step, StepStatus, Task, TaskCreateRequest,
    TaskSnapshot, TaskStatus,
};

pub struct Store {
    conn: Arc<Mutex<Connection>>,
    db_path: PathBuf,
}

impl Store {
    /// Open (or create) the gateway database and initialize its schema.
    pub async fn new(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(db_path)?;
        conn.busy_timeout(Duration::from_secs(10))?;
        // PRAGMA journal_mode returns a row, so query_row and ignore it.
        conn.query_row("PRAGMA journal_mode = WAL", [], |_| Ok(()))?;
        conn.execute("PRAGMA synchronous = NORMAL", [])?;

        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
            db_path: db_path.to_path_buf(),
        };
        store.init_schema().await?;
        Ok(store)
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    async fn init_schema(&self) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS tasks (
                id TEXT PRIMARY KEY,
                goal TEXT NOT NULL,
                status TEXT NOT NULL,
                context_json TEXT NOT NULL,
                current_step_id TEXT,
                error TEXT,
                created_at REAL NOT NULL,
                updated_at REAL NOT NULL,
                max_steps INTEGER NOT NULL,
                time_budget_sec INTEGER NOT NULL,
                token_budget INTEGER NOT NULL
            );
            CREATE TABLE IF NOT EXISTS task_steps (
                id TEXT PRIMARY KEY,
                task_id TEXT NOT NULL,
                step_index INTEGER NOT NULL,
                role TEXT NOT NULL,
                action TEXT NOT NULL,
                tool_name TEXT NOT NULL,
                risk_level TEXT NOT NULL,
                idempotent INTEGER NOT NULL,
                status TEXT NOT NULL,
                input_json TEXT NOT NULL,
                output_json TEXT,
                created_at REAL NOT NULL,
                updated_at REAL NOT NULL,
                UNIQUE(task_id, step_index)
            );
            CREATE TABLE IF NOT EXISTS tool_runs (
                id TEXT PRIMARY KEY,
                task_id TEXT NOT NULL,
                step_id TEXT NOT NULL,
                tool_name TEXT NOT NULL,
                args_json TEXT NOT NULL,
                result_json TEXT NOT NULL,
                duration_ms INTEGER NOT NULL,
                created_at REAL NOT NULL
            );
            CREATE TABLE IF NOT EXISTS task_events (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                task_id TEXT NOT NULL,
                event_type TEXT NOT NULL,
                payload_json TEXT NOT NULL,
                created_at REAL NOT NULL
            );
            CREATE TABLE IF NOT EXISTS memory_items (
                id TEXT PRIMARY KEY,
                task_id TEXT NOT NULL,
                key TEXT NOT NULL,
                value TEXT NOT NULL,
                score REAL NOT NULL,
                created_at REAL NOT NULL
            );",
        )?;
        Ok(())
    }

    /// Insert a new task with status `queued` and return its id.
    pub async fn create_task(&self, req: &TaskCreateRequest) -> Result<String> {
        let now = now_ts();
        let task_id = format!("task_{}", short_id());
        let context = serde_json::to_string(&req.context)?;
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO tasks(id, goal, status, context_json, current_step_id, error,
                               created_at, updated_at, max_steps, time_budget_sec, token_budget)
             VALUES(?1, ?2, ?3, ?4, NULL, NULL, ?5, ?6, ?7, ?8, ?9)",
            params![
                task_id,
                req.goal.trim(),
                TaskStatus::Queued.as_str(),
                context,
                now,
                now,
                req.max_steps,
                req.time_budget_sec,
                req.token_budget,
            ],
        )?;
        Ok(task_id)
    }

    /// Insert a full plan atomically. Every step starts `pending` with a null
    /// output; a duplicate step_index aborts the whole batch.
    pub async fn add_steps(&self, task_id: &str, steps: &[PlannedStep]) -> Result<()> {
        let now = now_ts();
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction()?;
        for step in steps {
            let input = serde_json::to_string(&Value::Object(step.input.clone()))?;
            tx.execute(
                "INSERT INTO task_steps(id, task_id, step_index, role, action, tool_name,
                                        risk_level, idempotent, status, input_json, output_json,
                                        created_at, updated_at)
                 VALUES(?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, NULL, ?11, ?12)",
                params![
                    step.id,
                    task_id,
                    step.step_index,
                    step.role.as_str(),
                    step.action,
                    step.tool_name,
                    step.risk_level.as_str(),
                    step.idempotent as i64,
                    StepStatus::Pending.as_str(),
                    input,
                    now,
                    now,
                ],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    pub async fn set_task(
        &self,
        task_id: &str,
        status: TaskStatus,
        current_step_id: Option<&str>,
        error: Option<&str>,
    ) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "UPDATE tasks SET status = ?1, current_step_id = ?2, error = ?3, updated_at = ?4
             WHERE id = ?5",
            params![status.as_str(), current_step_id, error, now_ts(), task_id],
        )?;
        Ok(())
    }

    pub async fn set_step(
        &self,
        step_id: &str,
        status: StepStatus,
        output: Option<&JsonMap>,
    ) -> Result<()> {
        let output_json = match output {
            Some(map) => Some(serde_json::to_string(&Value::Object(map.clone()))?),
            None => None,
        };
        let conn = self.conn.lock().await;
        conn.execute(
            "UPDATE task_steps SET status = ?1, output_json = ?2, updated_at = ?3 WHERE id = ?4",
            params![status.as_str(), output_json, now_ts(), step_id],
        )?;
        Ok(())
    }

    /// Append an event and return the persisted record with its assigned id.
    pub async fn event(
        &self,
        task_id: &str,
        event_type: &str,
        payload: JsonMap,
    ) -> Result<EventRecord> {
        let now = now_ts();
        let payload_json = serde_json::to_string(&Value::Object(payload.clone()))?;
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO task_events(task_id, event_type, payload_json, created_at)
             VALUES(?1, ?2, ?3, ?4)",
            params![task_id, event_type, payload_json, now],
        )?;
        let id = conn.last_insert_rowid();
        Ok(EventRecord {
            id,
            task_id: task_id.to_string(),
            event_type: event_type.to_string(),
            payload,
            created_at: now,
        })
    }

    /// Append one tool invocation record. `duration_ms` is lifted from the
    /// result map.
    pub async fn tool_run(
        &self,
        task_id: &str,
        step_id: &str,
        tool_name: &str,
        args: &JsonMap,
        result: &JsonMap,
    ) -> Result<()> {
        let duration_ms = result
            .get("duration_ms")
            .and_then(Value::as_i64)
            .unwrap_or(0);
        let args_json = serde_json::to_string(&Value::Object(args.clone()))?;
        let result_json = serde_json::to_string(&Value::Object(result.clone()))?;
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO tool_runs(id, task_id, step_id, tool_name, args_json, result_json,
                                   duration_ms, created_at)
             VALUES(?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                format!("run_{}", short_id()),
                task_id,
                step_id,
                tool_name,
                args_json,
                result_json,
                duration_ms,
                now_ts(),
            ],
        )?;
        Ok(())
    }

    pub async fn memory(&self, task_id: &str, key: &str, value: &str, score: f64) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO memory_items(id, task_id, key, value, score, created_at)
             VALUES(?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                format!("mem_{}", short_id()),
                task_id,
                key,
                value,
                score,
                now_ts(),
            ],
        )?;
        Ok(())
    }

    pub async fn get_task(&self, task_id: &str) -> Result<Option<Task>> {
        let conn = self.conn.lock().await;
        let row = conn
            .query_row(
                "SELECT id, goal, status, context_json, current_step_id, error,
                        created_at, updated_at, max_steps, time_budget_sec, token_budget
                 FROM tasks WHERE id = ?1",
                params![task_id],
                raw_task,
            )
            .optional()?;
        row.map(RawTask::into_task).transpose()
    }

    pub async fn list_tasks(&self, limit: usize) -> Result<Vec<Task>> {
        let limit = limit.clamp(1, 100);
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(
            "SELECT id, goal, status, context_json, current_step_id, error,
                    created_at, updated_at, max_steps, time_budget_sec, token_budget
             FROM tasks ORDER BY updated_at DESC LIMIT ?1",
        )?;
        let rows = stmt.query_map(params![limit as i64], raw_task)?;
        let mut tasks = Vec::new();
        for row in rows {
            tasks.push(row?.into_task()?);
        }
        Ok(tasks)
    }

    /// Full view of a task: the row itself, steps ordered by step_index, and
    /// events ordered by id.
    pub async fn snapshot(&self, task_id: &str) -> Result<TaskSnapshot> {
        let conn = self.conn.lock().await;
        let task = conn
            .query_row(
                "SELECT id, goal, status, context_json, current_step_id, error,
                        created_at, updated_at, max_steps, time_budget_sec, token_budget
                 FROM tasks WHERE id = ?1",
                params![task_id],
                raw_task,
            )
            .optional()?
            .ok_or_else(|| GatewayError::TaskNotFound(task_id.to_string()))?
            .into_task()?;

        let mut stmt = conn.prepare(
            "SELECT id, step_index, role, action, tool_name, risk_level, idempotent,
                    status, input_json, output_json, created_at, updated_at
             FROM task_steps WHERE task_id = ?1 ORDER BY step_index ASC",
        )?;
        let step_rows = stmt.query_map(params![task_id], raw_step)?;
        let mut steps = Vec::new();
        for row in step_rows {
            steps.push(row?.into_step()?);
        }

        let mut stmt = conn.prepare(
            "SELECT id, task_id, event_type, payload_json, created_at
             FROM task_events WHERE task_id = ?1 ORDER BY id ASC",
        )?;
        let event_rows = stmt.query_map(params![task_id], |row| {
            Ok(EventRecord {
                id: row.get(0)?,
                task_id: row.get(1)?,
                event_type: row.get(2)?,
                payload: lenient_map(row.get::<_, Option<String>>(3)?),
                created_at: row.get(4)?,
            })
        })?;
        let mut events = Vec::new();
        for row in event_rows {
            events.push(row?);
        }

        Ok(TaskSnapshot {
            task,
            steps,
            events,
        })
    }
}

fn short_id() -> String {
    let id = Uuid::new_v4().simple().to_string();
    id[..12].to_string()
}

/// Payload columns tolerate junk: anything that is not a JSON object reads
/// back as an empty map.
fn lenient_map(raw: Option<String>) -> JsonMap {
    let Some(raw) = raw else {
        return JsonMap::new();
    };
    match serde_json::from_str::<Value>(&raw) {
        Ok(Value::Object(map)) => map,
        _ => JsonMap::new(),
    }
}

struct RawTask {
    id: String,
    goal: String,
    status: String,
    context_json: Option<String>,
    current_step_id: Option<String>,
    error: Option<String>,
    created_at: f64,
    updated_at: f64,
    max_steps: u32,
    time_budget_sec: u32,
    token_budget: u32,
}

impl RawTask {
    fn into_task(self) -> Result<Task> {
        Ok(Task {
            id: self.id,
            goal: self.goal,
            status: self.status.parse()?,
            context: lenient_map(self.context_json),
            current_step_id: self.current_step_id,
            error: self.error,
            created_at: self.created_at,
            updated_at: self.updated_at,
            max_steps: self.max_steps,
            time_budget_sec: self.time_budget_sec,
            token_budget: self.token_budget,
        })
    }
}

fn raw_task(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawTask> {
    Ok(RawTask {
        id: row.get(0)?,
        goal: row.get(1)?,
        status: row.get(2)?,
        context_json: row.get(3)?,
        current_step_id: row.get(4)?,
        error: row.get(5)?,
        created_at: row.get(6)?,
        updated_at: row.get(7)?,
        max_steps: row.get(8)?,
        time_budget_sec: row.get(9)?,
        token_budget: row.get(10)?,
    })
}

struct RawStep {
    id: String,
    step_index: u32,
    role: String,
    action: String,
    tool_name: String,
    risk_level: String,
    idempotent: i64,
    status: String,
    input_json: Option<String>,
    output_json: Option<String>,
    created_at: f64,
    updated_at: f64,
}

impl RawStep {
    fn into_step(self) -> Result<Step> {
        Ok(Step {
            id: self.id,
            step_index: self.step_index,
            role: self.role.parse()?,
            action: self.action,
            tool_name: self.tool_name,
            risk_level: self.risk_level.parse()?,
            idempotent: self.idempotent != 0,
            status: self.status.parse()?,
            input: lenient_map(self.input_json),
            output: self.output_json.map(|raw| lenient_map(Some(raw))),
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

fn raw_step(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawStep> {
    Ok(RawStep {
        id: row.get(0)?,
        step_index: row.get(1)?,
        role: row.get(2)?,
        action: row.get(3)?,
        tool_name: row.get(4)?,
        risk_level: row.get(5)?,
        idempotent: row.get(6)?,
        status: row.get(7)?,
        input_json: row.get(8)?,
        output_json: row.get(9)?,
        created_at: row.get(10)?,
        updated_at: row.get(11)?,
    })
}

// ============================================================================
// Tests
// ============================================================================
