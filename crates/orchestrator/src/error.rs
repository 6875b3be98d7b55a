//! Engine error taxonomy.
//!
//! Only `HealingExhausted` is fatal, and only to one agent. Everything else is
//! either recovered by self-healing or logged and retried on a later tick.

use thiserror::Error;

use crate::agent::{AgentId, AgentStatus};
use crate::executor::ExecutionError;
use crate::store::StoreError;
use crate::task::TaskId;

/// Errors produced by the engine and its drivers.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The backend failed a task or its deadline elapsed.
    #[error("task {task_id} failed on agent '{agent}': {source}")]
    TaskExecution {
        task_id: TaskId,
        agent: String,
        #[source]
        source: ExecutionError,
    },

    /// An agent has been executing longer than the soft timeout.
    #[error("agent '{agent}' unresponsive: executing for {elapsed_secs}s")]
    AgentUnresponsive { agent: String, elapsed_secs: u64 },

    /// No idle/active capable agent with queue room exists right now.
    #[error("no suitable agent for task {task_id} of type '{task_type}'")]
    NoSuitableAgent { task_id: TaskId, task_type: String },

    /// A detected conflict could not be resolved on this pass.
    #[error("conflict {conflict_id} ({kind}) unresolved: {reason}")]
    ConflictUnresolved {
        conflict_id: u64,
        kind: String,
        reason: String,
    },

    /// Healing attempts ran out; the agent is terminated.
    #[error("healing exhausted for agent '{agent}' after {attempts} attempts")]
    HealingExhausted { agent: String, attempts: u32 },

    #[error("agent not found: {0}")]
    AgentNotFound(AgentId),

    #[error("agent {0} is terminated")]
    AgentTerminated(AgentId),

    #[error("invalid transition for {agent}: {from} -> {to}")]
    InvalidTransition {
        agent: AgentId,
        from: AgentStatus,
        to: AgentStatus,
    },

    #[error("task {task_id} is already held by {agent}")]
    TaskAlreadyAssigned { task_id: TaskId, agent: AgentId },

    #[error("task store error: {0}")]
    Store(#[from] StoreError),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("engine is already running")]
    AlreadyRunning,

    #[error("engine is not running")]
    NotRunning,

    #[error("internal error: {0}")]
    Internal(String),
}

impl EngineError {
    /// Create an invalid transition error.
    #[must_use]
    pub const fn invalid_transition(agent: AgentId, from: AgentStatus, to: AgentStatus) -> Self {
        Self::InvalidTransition { agent, from, to }
    }

    /// Whether the condition clears up by itself on a later tick.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::NoSuitableAgent { .. } | Self::ConflictUnresolved { .. } | Self::Store(_)
        )
    }
}

/// Result type for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_errors() {
        let err = EngineError::NoSuitableAgent {
            task_id: TaskId::new(),
            task_type: "development".to_string(),
        };
        assert!(err.is_transient());
        assert!(EngineError::Store(StoreError::Unavailable).is_transient());
        assert!(
            !EngineError::HealingExhausted {
                agent: "a".to_string(),
                attempts: 4
            }
            .is_transient()
        );
    }

    #[test]
    fn test_invalid_transition_display() {
        let err = EngineError::invalid_transition(
            AgentId::new(2),
            AgentStatus::Terminated,
            AgentStatus::Idle,
        );
        assert_eq!(
            err.to_string(),
            "invalid transition for agent#2: terminated -> idle"
        );
    }
}
