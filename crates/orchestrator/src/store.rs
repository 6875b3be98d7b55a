//! Task store seam and an in-memory implementation.
//!
//! The store is the single source of truth for task existence. The engine
//! only reads pending tasks from it and writes statuses and agent metadata
//! back.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::agent::{Agent, AgentId, AgentRole, AgentStatus};
use crate::task::{Task, TaskId, TaskStatus};

/// Errors reported by a task store.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("task store unavailable")]
    Unavailable,

    #[error("task not found: {0}")]
    TaskNotFound(TaskId),

    #[error("task store backend error: {0}")]
    Backend(String),
}

/// Health snapshot of one agent, persisted for external observability.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentSnapshot {
    pub agent_id: AgentId,
    pub name: String,
    pub role: AgentRole,
    pub status: AgentStatus,
    pub queue_length: usize,
    pub current_task: Option<TaskId>,
    pub success_rate: f64,
    pub tasks_completed: u64,
    pub tasks_failed: u64,
    pub average_execution_ms: f64,
    pub healing_attempts: u32,
    pub restarts: u32,
    pub paused: bool,
    pub spawned_from: Option<AgentId>,
    pub taken_at: DateTime<Utc>,
}

impl AgentSnapshot {
    #[must_use]
    pub fn of(agent: &Agent) -> Self {
        let performance = agent.performance();
        Self {
            agent_id: agent.id(),
            name: agent.name().to_string(),
            role: agent.role(),
            status: agent.status(),
            queue_length: agent.queue_len(),
            current_task: agent.current_task().map(|t| t.id),
            success_rate: performance.success_rate,
            tasks_completed: performance.tasks_completed,
            tasks_failed: performance.tasks_failed,
            average_execution_ms: performance.average_execution_ms,
            healing_attempts: agent.healing_attempts(),
            restarts: agent.restarts(),
            paused: agent.is_paused(),
            spawned_from: agent.spawned_from(),
            taken_at: Utc::now(),
        }
    }
}

/// Persistence backend for tasks and agent metadata.
#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Up to `limit` pending tasks, oldest first.
    async fn fetch_pending(&self, limit: usize) -> Result<Vec<Task>, StoreError>;

    /// Record a task's new status.
    async fn set_status(&self, task_id: TaskId, status: TaskStatus) -> Result<(), StoreError>;

    /// Insert or replace the metadata snapshot of an agent.
    async fn upsert_agent_metadata(
        &self,
        agent_id: AgentId,
        snapshot: AgentSnapshot,
    ) -> Result<(), StoreError>;

    /// Add a new task. Its status is forced to `pending`.
    async fn submit(&self, task: Task) -> Result<TaskId, StoreError>;
}

#[derive(Default)]
struct TaskTable {
    order: Vec<TaskId>,
    tasks: HashMap<TaskId, Task>,
}

/// In-memory task store for tests and the demo binary.
///
/// Tasks are served in insertion order. [`set_available`](Self::set_available)
/// simulates an outage: every call fails with [`StoreError::Unavailable`].
pub struct InMemoryTaskStore {
    table: RwLock<TaskTable>,
    agents: RwLock<HashMap<AgentId, AgentSnapshot>>,
    available: AtomicBool,
}

impl Default for InMemoryTaskStore {
    fn default() -> Self {
        Self {
            table: RwLock::new(TaskTable::default()),
            agents: RwLock::new(HashMap::new()),
            available: AtomicBool::new(true),
        }
    }
}

impl InMemoryTaskStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn new_arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Toggle simulated availability.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
        if available {
            debug!("In-memory task store back online");
        } else {
            warn!("In-memory task store marked unavailable");
        }
    }

    fn ensure_available(&self) -> Result<(), StoreError> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(StoreError::Unavailable)
        }
    }

    /// Current copy of a task.
    pub async fn task(&self, task_id: TaskId) -> Option<Task> {
        self.table.read().await.tasks.get(&task_id).cloned()
    }

    /// Current status of a task.
    pub async fn status_of(&self, task_id: TaskId) -> Option<TaskStatus> {
        self.table.read().await.tasks.get(&task_id).map(|t| t.status)
    }

    /// Number of tasks in the given status.
    pub async fn count_by_status(&self, status: TaskStatus) -> usize {
        self.table
            .read()
            .await
            .tasks
            .values()
            .filter(|t| t.status == status)
            .count()
    }

    /// Total number of tasks.
    pub async fn len(&self) -> usize {
        self.table.read().await.order.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Last snapshot persisted for an agent.
    pub async fn agent_snapshot(&self, agent_id: AgentId) -> Option<AgentSnapshot> {
        self.agents.read().await.get(&agent_id).cloned()
    }
}

#[async_trait]
impl TaskStore for InMemoryTaskStore {
    async fn fetch_pending(&self, limit: usize) -> Result<Vec<Task>, StoreError> {
        self.ensure_available()?;
        let table = self.table.read().await;
        Ok(table
            .order
            .iter()
            .filter_map(|id| table.tasks.get(id))
            .filter(|t| t.status == TaskStatus::Pending)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn set_status(&self, task_id: TaskId, status: TaskStatus) -> Result<(), StoreError> {
        self.ensure_available()?;
        let mut table = self.table.write().await;
        let task = table
            .tasks
            .get_mut(&task_id)
            .ok_or(StoreError::TaskNotFound(task_id))?;
        task.status = status;
        Ok(())
    }

    async fn upsert_agent_metadata(
        &self,
        agent_id: AgentId,
        snapshot: AgentSnapshot,
    ) -> Result<(), StoreError> {
        self.ensure_available()?;
        self.agents.write().await.insert(agent_id, snapshot);
        Ok(())
    }

    async fn submit(&self, mut task: Task) -> Result<TaskId, StoreError> {
        self.ensure_available()?;
        task.status = TaskStatus::Pending;
        let id = task.id;
        let mut table = self.table.write().await;
        if table.tasks.insert(id, task).is_none() {
            table.order.push(id);
        }
        Ok(id)
    }
}

/// A store wrapper that logs every call.
pub struct TracingTaskStore<S: TaskStore> {
    inner: S,
}

impl<S: TaskStore> TracingTaskStore<S> {
    pub const fn new(inner: S) -> Self {
        Self { inner }
    }

    pub const fn inner(&self) -> &S {
        &self.inner
    }
}

#[async_trait]
impl<S: TaskStore> TaskStore for TracingTaskStore<S> {
    async fn fetch_pending(&self, limit: usize) -> Result<Vec<Task>, StoreError> {
        let result = self.inner.fetch_pending(limit).await;
        match &result {
            Ok(tasks) => debug!(limit, fetched = tasks.len(), "Fetched pending tasks"),
            Err(e) => warn!(limit, error = %e, "Fetching pending tasks failed"),
        }
        result
    }

    async fn set_status(&self, task_id: TaskId, status: TaskStatus) -> Result<(), StoreError> {
        let result = self.inner.set_status(task_id, status).await;
        match &result {
            Ok(()) => debug!(task_id = %task_id, status = status.as_str(), "Task status persisted"),
            Err(e) => warn!(task_id = %task_id, status = status.as_str(), error = %e, "Persisting task status failed"),
        }
        result
    }

    async fn upsert_agent_metadata(
        &self,
        agent_id: AgentId,
        snapshot: AgentSnapshot,
    ) -> Result<(), StoreError> {
        let result = self.inner.upsert_agent_metadata(agent_id, snapshot).await;
        if let Err(e) = &result {
            warn!(agent_id = %agent_id, error = %e, "Persisting agent snapshot failed");
        }
        result
    }

    async fn submit(&self, task: Task) -> Result<TaskId, StoreError> {
        let task_type = task.task_type.clone();
        let result = self.inner.submit(task).await;
        match &result {
            Ok(id) => debug!(task_id = %id, task_type = %task_type, "Task submitted"),
            Err(e) => warn!(task_type = %task_type, error = %e, "Submitting task failed"),
        }
        result
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    #[tokio::test]
    async fn test_fetch_pending_respects_order_and_limit() {
        let store = InMemoryTaskStore::new();
        let ids: Vec<TaskId> = futures::future::join_all(
            (0..4).map(|i| store.submit(Task::new(format!("t{i}")))),
        )
        .await
        .into_iter()
        .map(Result::unwrap)
        .collect();

        store.set_status(ids[0], TaskStatus::Processing).await.unwrap();

        let pending = store.fetch_pending(2).await.unwrap();
        let fetched: Vec<TaskId> = pending.iter().map(|t| t.id).collect();
        assert_eq!(fetched, vec![ids[1], ids[2]]);
    }

    #[tokio::test]
    async fn test_submit_forces_pending() {
        let store = InMemoryTaskStore::new();
        let mut task = Task::new("development");
        task.status = TaskStatus::Completed;
        let id = store.submit(task).await.unwrap();
        assert_eq!(store.status_of(id).await, Some(TaskStatus::Pending));
    }

    #[tokio::test]
    async fn test_unavailable_store_rejects_calls() {
        let store = InMemoryTaskStore::new();
        store.set_available(false);
        assert_eq!(store.fetch_pending(10).await, Err(StoreError::Unavailable));
        assert_eq!(
            store.submit(Task::new("x")).await,
            Err(StoreError::Unavailable)
        );

        store.set_available(true);
        assert!(store.fetch_pending(10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_set_status_unknown_task() {
        let store = InMemoryTaskStore::new();
        let id = TaskId::new();
        assert_eq!(
            store.set_status(id, TaskStatus::Completed).await,
            Err(StoreError::TaskNotFound(id))
        );
    }
}
