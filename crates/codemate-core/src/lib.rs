pub mod engine;
pub mod error;
pub mod hub;
pub mod inputs;
pub mod planner;
pub mod runner;
pub mod store;
pub mod types;

pub use engine::Engine;
pub use error::{GatewayError, Result};
pub use hub::EventHub;
pub use inputs::ToolInput;
pub use planner::Planner;
pub use runner::{ToolOutcome, ToolResult, ToolRunner};
pub use store::Store;
pub use types::{
    now_ts, EventRecord, PlannedStep, RiskLevel, Step, StepRole, StepStatus, Task,
    TaskCreateRequest, TaskSnapshot, TaskStatus,
};
