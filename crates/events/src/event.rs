//! Engine lifecycle events.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{AgentId, EventId, TaskId};

/// Lifecycle events emitted by the engine for external observers.
///
/// Kinds, severities and strategies travel as their stable snake_case names so
/// observers do not need the orchestrator's types.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EngineEvent {
    /// An agent joined the registry (roster start-up or backup spawn).
    AgentRegistered {
        event_id: EventId,
        agent_id: AgentId,
        name: String,
        role: String,
        timestamp: DateTime<Utc>,
    },
    /// A task was appended to an agent's queue.
    TaskDistributed {
        event_id: EventId,
        task_id: TaskId,
        agent_id: AgentId,
        score: f64,
        timestamp: DateTime<Utc>,
    },
    /// The backend finished a task successfully.
    TaskCompleted {
        event_id: EventId,
        task_id: TaskId,
        agent_id: AgentId,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },
    /// The backend failed a task or its deadline elapsed.
    TaskFailed {
        event_id: EventId,
        task_id: TaskId,
        agent_id: AgentId,
        error: String,
        timestamp: DateTime<Utc>,
    },
    /// The conflict monitor recorded a conflict.
    ConflictDetected {
        event_id: EventId,
        conflict_id: u64,
        kind: String,
        severity: String,
        agents: Vec<AgentId>,
        timestamp: DateTime<Utc>,
    },
    /// A conflict resolution changed the registry.
    ConflictResolved {
        event_id: EventId,
        conflict_id: u64,
        kind: String,
        timestamp: DateTime<Utc>,
    },
    /// A healing strategy recovered an agent.
    HealingSuccessful {
        event_id: EventId,
        action_id: u64,
        agent_id: AgentId,
        issue: String,
        strategy: String,
        recovery_ms: u64,
        timestamp: DateTime<Utc>,
    },
    /// Healing failed and the agent was terminated.
    HealingFailed {
        event_id: EventId,
        action_id: u64,
        agent_id: AgentId,
        issue: String,
        strategy: String,
        reason: String,
        timestamp: DateTime<Utc>,
    },
    /// The periodic drivers were started.
    ExecutionStarted {
        event_id: EventId,
        timestamp: DateTime<Utc>,
    },
    /// The periodic drivers were stopped.
    ExecutionStopped {
        event_id: EventId,
        timestamp: DateTime<Utc>,
    },
}

impl EngineEvent {
    /// Create an `AgentRegistered` event.
    #[must_use]
    pub fn agent_registered(agent_id: AgentId, name: impl Into<String>, role: impl Into<String>) -> Self {
        Self::AgentRegistered {
            event_id: EventId::new(),
            agent_id,
            name: name.into(),
            role: role.into(),
            timestamp: Utc::now(),
        }
    }

    /// Create a `TaskDistributed` event.
    #[must_use]
    pub fn task_distributed(task_id: TaskId, agent_id: AgentId, score: f64) -> Self {
        Self::TaskDistributed {
            event_id: EventId::new(),
            task_id,
            agent_id,
            score,
            timestamp: Utc::now(),
        }
    }

    /// Create a `TaskCompleted` event.
    #[must_use]
    pub fn task_completed(task_id: TaskId, agent_id: AgentId, duration_ms: u64) -> Self {
        Self::TaskCompleted {
            event_id: EventId::new(),
            task_id,
            agent_id,
            duration_ms,
            timestamp: Utc::now(),
        }
    }

    /// Create a `TaskFailed` event.
    #[must_use]
    pub fn task_failed(task_id: TaskId, agent_id: AgentId, error: impl Into<String>) -> Self {
        Self::TaskFailed {
            event_id: EventId::new(),
            task_id,
            agent_id,
            error: error.into(),
            timestamp: Utc::now(),
        }
    }

    /// Create a `ConflictDetected` event.
    #[must_use]
    pub fn conflict_detected(
        conflict_id: u64,
        kind: impl Into<String>,
        severity: impl Into<String>,
        agents: Vec<AgentId>,
    ) -> Self {
        Self::ConflictDetected {
            event_id: EventId::new(),
            conflict_id,
            kind: kind.into(),
            severity: severity.into(),
            agents,
            timestamp: Utc::now(),
        }
    }

    /// Create a `ConflictResolved` event.
    #[must_use]
    pub fn conflict_resolved(conflict_id: u64, kind: impl Into<String>) -> Self {
        Self::ConflictResolved {
            event_id: EventId::new(),
            conflict_id,
            kind: kind.into(),
            timestamp: Utc::now(),
        }
    }

    /// Create a `HealingSuccessful` event.
    #[must_use]
    pub fn healing_successful(
        action_id: u64,
        agent_id: AgentId,
        issue: impl Into<String>,
        strategy: impl Into<String>,
        recovery_ms: u64,
    ) -> Self {
        Self::HealingSuccessful {
            event_id: EventId::new(),
            action_id,
            agent_id,
            issue: issue.into(),
            strategy: strategy.into(),
            recovery_ms,
            timestamp: Utc::now(),
        }
    }

    /// Create a `HealingFailed` event.
    #[must_use]
    pub fn healing_failed(
        action_id: u64,
        agent_id: AgentId,
        issue: impl Into<String>,
        strategy: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::HealingFailed {
            event_id: EventId::new(),
            action_id,
            agent_id,
            issue: issue.into(),
            strategy: strategy.into(),
            reason: reason.into(),
            timestamp: Utc::now(),
        }
    }

    /// Create an `ExecutionStarted` event.
    #[must_use]
    pub fn execution_started() -> Self {
        Self::ExecutionStarted {
            event_id: EventId::new(),
            timestamp: Utc::now(),
        }
    }

    /// Create an `ExecutionStopped` event.
    #[must_use]
    pub fn execution_stopped() -> Self {
        Self::ExecutionStopped {
            event_id: EventId::new(),
            timestamp: Utc::now(),
        }
    }

    /// Stable event name, as used by observers and pattern filters.
    #[must_use]
    pub const fn event_type(&self) -> &'static str {
        match self {
            Self::AgentRegistered { .. } => "agent_registered",
            Self::TaskDistributed { .. } => "task_distributed",
            Self::TaskCompleted { .. } => "task_completed",
            Self::TaskFailed { .. } => "task_failed",
            Self::ConflictDetected { .. } => "conflict_detected",
            Self::ConflictResolved { .. } => "conflict_resolved",
            Self::HealingSuccessful { .. } => "healing_successful",
            Self::HealingFailed { .. } => "healing_failed",
            Self::ExecutionStarted { .. } => "execution_started",
            Self::ExecutionStopped { .. } => "execution_stopped",
        }
    }

    /// Get the event ID.
    #[must_use]
    pub const fn event_id(&self) -> EventId {
        match self {
            Self::AgentRegistered { event_id, .. }
            | Self::TaskDistributed { event_id, .. }
            | Self::TaskCompleted { event_id, .. }
            | Self::TaskFailed { event_id, .. }
            | Self::ConflictDetected { event_id, .. }
            | Self::ConflictResolved { event_id, .. }
            | Self::HealingSuccessful { event_id, .. }
            | Self::HealingFailed { event_id, .. }
            | Self::ExecutionStarted { event_id, .. }
            | Self::ExecutionStopped { event_id, .. } => *event_id,
        }
    }

    /// The single agent this event is about, if any.
    #[must_use]
    pub const fn agent_id(&self) -> Option<AgentId> {
        match self {
            Self::AgentRegistered { agent_id, .. }
            | Self::TaskDistributed { agent_id, .. }
            | Self::TaskCompleted { agent_id, .. }
            | Self::TaskFailed { agent_id, .. }
            | Self::HealingSuccessful { agent_id, .. }
            | Self::HealingFailed { agent_id, .. } => Some(*agent_id),
            _ => None,
        }
    }

    /// The task this event is about, if any.
    #[must_use]
    pub const fn task_id(&self) -> Option<TaskId> {
        match self {
            Self::TaskDistributed { task_id, .. }
            | Self::TaskCompleted { task_id, .. }
            | Self::TaskFailed { task_id, .. } => Some(*task_id),
            _ => None,
        }
    }

    /// Whether the event involves the given agent (conflicts list several).
    #[must_use]
    pub fn involves(&self, agent: AgentId) -> bool {
        match self {
            Self::ConflictDetected { agents, .. } => agents.contains(&agent),
            other => other.agent_id() == Some(agent),
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    #[test]
    fn test_event_type_names() {
        let task = TaskId::new();
        let agent = AgentId::new(0);
        assert_eq!(
            EngineEvent::agent_registered(agent, "a", "engineer").event_type(),
            "agent_registered"
        );
        assert_eq!(
            EngineEvent::task_distributed(task, agent, 0.8).event_type(),
            "task_distributed"
        );
        assert_eq!(EngineEvent::execution_started().event_type(), "execution_started");
        assert_eq!(EngineEvent::execution_stopped().event_type(), "execution_stopped");
    }

    #[test]
    fn test_conflict_event_involves_all_agents() {
        let event = EngineEvent::conflict_detected(
            1,
            "resource",
            "medium",
            vec![AgentId::new(1), AgentId::new(4)],
        );
        assert!(event.involves(AgentId::new(4)));
        assert!(!event.involves(AgentId::new(2)));
        assert_eq!(event.agent_id(), None);
    }

    #[test]
    fn test_event_serializes_with_type_tag() {
        let event = EngineEvent::task_failed(TaskId::new(), AgentId::new(2), "boom");
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "task_failed");
        assert_eq!(json["error"], "boom");
    }
}
