//! Side effects collected under the state lock and applied after it is released.
//!
//! No store call is made while the engine state is locked. Mutating code records
//! what the outside world must learn (task statuses, events, agent snapshots)
//! and the engine flushes it after the lock is released, in lock order.

use homeo_events::{EngineEvent, EventBus};
use tracing::warn;

use crate::agent::{AgentId, AgentRegistry};
use crate::store::{AgentSnapshot, StoreError, TaskStore};
use crate::task::{Task, TaskId, TaskStatus};

#[derive(Debug, Default)]
pub struct Effects {
    status_updates: Vec<(TaskId, TaskStatus)>,
    events: Vec<EngineEvent>,
    snapshots: Vec<AgentSnapshot>,
}

impl Effects {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_status(&mut self, task_id: TaskId, status: TaskStatus) {
        self.status_updates.push((task_id, status));
    }

    /// Hand tasks back to the store as `pending`.
    pub fn return_to_pending(&mut self, tasks: impl IntoIterator<Item = Task>) {
        self.status_updates
            .extend(tasks.into_iter().map(|t| (t.id, TaskStatus::Pending)));
    }

    pub fn emit(&mut self, event: EngineEvent) {
        self.events.push(event);
    }

    pub fn snapshot(&mut self, snapshot: AgentSnapshot) {
        self.snapshots.push(snapshot);
    }

    /// Queue a metadata snapshot of `agent_id` as it is now.
    pub fn snapshot_of(&mut self, registry: &AgentRegistry, agent_id: AgentId) {
        if let Some(agent) = registry.get(agent_id) {
            self.snapshots.push(AgentSnapshot::of(agent));
        }
    }

    #[must_use]
    pub fn events(&self) -> &[EngineEvent] {
        &self.events
    }

    #[must_use]
    pub fn status_updates(&self) -> &[(TaskId, TaskStatus)] {
        &self.status_updates
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.status_updates.is_empty() && self.events.is_empty() && self.snapshots.is_empty()
    }

    /// Persist statuses and snapshots, then publish events.
    ///
    /// Every write is attempted even after a failure; events are published
    /// regardless.
    ///
    /// # Errors
    ///
    /// Returns the first store error encountered.
    pub async fn flush(self, store: &dyn TaskStore, bus: &EventBus) -> Result<(), StoreError> {
        let mut first_error = None;

        for (task_id, status) in self.status_updates {
            if let Err(e) = store.set_status(task_id, status).await {
                warn!(task_id = %task_id, status = status.as_str(), error = %e, "Task status not persisted");
                first_error.get_or_insert(e);
            }
        }

        for snapshot in self.snapshots {
            if let Err(e) = store
                .upsert_agent_metadata(snapshot.agent_id, snapshot)
                .await
            {
                first_error.get_or_insert(e);
            }
        }

        bus.publish_all(self.events);

        first_error.map_or(Ok(()), Err)
    }
}
