//! Task execution backend seam.
//!
//! The backend is opaque: it receives a task and the identity of the agent
//! running it and eventually reports success or failure. The engine bounds
//! every call with a hard deadline.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

use crate::agent::{AgentId, AgentRole};
use crate::task::Task;

/// Why a backend call did not produce output.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ExecutionError {
    #[error("backend error: {0}")]
    Backend(String),

    #[error("deadline of {0:?} elapsed")]
    DeadlineElapsed(Duration),
}

/// Identity of the agent a task runs on.
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    pub agent_id: AgentId,
    pub agent_name: String,
    pub role: AgentRole,
    pub lease: u64,
    pub deadline: Duration,
}

/// Output of a successful backend call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TaskOutput {
    pub result: Value,
}

impl TaskOutput {
    #[must_use]
    pub const fn new(result: Value) -> Self {
        Self { result }
    }
}

/// Performs the actual work of a task.
#[async_trait]
pub trait TaskExecutor: Send + Sync {
    /// Run `task` on behalf of the agent described by `ctx`.
    async fn execute(&self, task: &Task, ctx: &ExecutionContext)
    -> Result<TaskOutput, ExecutionError>;
}

/// Backend that sleeps and then succeeds, unless the payload asks it to fail.
///
/// A payload of `{"fail": true}` fails the task; `{"duration_ms": n}`
/// overrides the default sleep.
#[derive(Debug, Clone)]
pub struct SimulatedExecutor {
    duration: Duration,
}

impl Default for SimulatedExecutor {
    fn default() -> Self {
        Self {
            duration: Duration::from_millis(50),
        }
    }
}

impl SimulatedExecutor {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub const fn with_duration(mut self, duration: Duration) -> Self {
        self.duration = duration;
        self
    }

    fn duration_for(&self, task: &Task) -> Duration {
        task.payload
            .get("duration_ms")
            .and_then(Value::as_u64)
            .map_or(self.duration, Duration::from_millis)
    }
}

#[async_trait]
impl TaskExecutor for SimulatedExecutor {
    async fn execute(
        &self,
        task: &Task,
        ctx: &ExecutionContext,
    ) -> Result<TaskOutput, ExecutionError> {
        let duration = self.duration_for(task);
        debug!(
            task_id = %task.id,
            agent = %ctx.agent_name,
            duration_ms = duration.as_millis(),
            "Simulating task execution"
        );
        tokio::time::sleep(duration).await;

        if task.payload.get("fail").and_then(Value::as_bool) == Some(true) {
            return Err(ExecutionError::Backend(format!(
                "simulated failure of {} task",
                task.task_type
            )));
        }

        Ok(TaskOutput::new(serde_json::json!({
            "task_id": task.id.to_string(),
            "agent": ctx.agent_name,
            "task_type": task.task_type,
        })))
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    fn ctx() -> ExecutionContext {
        ExecutionContext {
            agent_id: AgentId::new(0),
            agent_name: "engineer-1".to_string(),
            role: AgentRole::Engineer,
            lease: 1,
            deadline: Duration::from_secs(5),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_simulated_executor_succeeds() {
        let executor = SimulatedExecutor::new();
        let task = Task::new("development");
        let output = executor.execute(&task, &ctx()).await.unwrap();
        assert_eq!(output.result["agent"], "engineer-1");
    }

    #[tokio::test(start_paused = true)]
    async fn test_simulated_executor_fails_on_request() {
        let executor = SimulatedExecutor::new();
        let task = Task::new("development").with_payload(serde_json::json!({ "fail": true }));
        let err = executor.execute(&task, &ctx()).await.unwrap_err();
        assert!(matches!(err, ExecutionError::Backend(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_payload_duration_override() {
        let executor = SimulatedExecutor::new().with_duration(Duration::from_secs(60));
        let task =
            Task::new("development").with_payload(serde_json::json!({ "duration_ms": 10 }));
        let start = tokio::time::Instant::now();
        executor.execute(&task, &ctx()).await.unwrap();
        assert!(start.elapsed() < Duration::from_secs(1));
    }
}
