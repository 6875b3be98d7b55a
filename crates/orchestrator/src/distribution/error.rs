//! Distribution error types.

use std::fmt;

use crate::agent::AgentId;
use crate::task::TaskId;

/// Errors that can occur during task distribution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DistributionError {
    /// No assignable agent with the required capabilities and queue room.
    NoSuitableAgent {
        /// The task that could not be placed
        task_id: TaskId,
        /// Its type tag
        task_type: String,
    },

    /// The task is already queued or running somewhere.
    AlreadyAssigned {
        /// The task ID
        task_id: TaskId,
        /// The agent holding it
        agent: AgentId,
    },

    /// Internal error.
    Internal {
        /// Error message
        message: String,
    },
}

impl fmt::Display for DistributionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoSuitableAgent { task_id, task_type } => write!(
                f,
                "no suitable agent for task {task_id} of type '{task_type}'"
            ),
            Self::AlreadyAssigned { task_id, agent } => {
                write!(f, "task {task_id} is already assigned to {agent}")
            }
            Self::Internal { message } => write!(f, "internal error: {message}"),
        }
    }
}

impl std::error::Error for DistributionError {}

impl DistributionError {
    /// Create a no suitable agent error.
    #[must_use]
    pub fn no_suitable_agent(task_id: TaskId, task_type: impl Into<String>) -> Self {
        Self::NoSuitableAgent {
            task_id,
            task_type: task_type.into(),
        }
    }

    /// Create an internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Check if error is retryable.
    ///
    /// A task without a suitable agent stays pending and is offered again on
    /// the next tick.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::NoSuitableAgent { .. })
    }
}

impl From<DistributionError> for crate::error::EngineError {
    fn from(err: DistributionError) -> Self {
        match err {
            DistributionError::NoSuitableAgent { task_id, task_type } => {
                Self::NoSuitableAgent { task_id, task_type }
            }
            DistributionError::AlreadyAssigned { task_id, agent } => {
                Self::TaskAlreadyAssigned { task_id, agent }
            }
            DistributionError::Internal { message } => Self::Internal(message),
        }
    }
}

/// Result type for distribution operations.
pub type DistributionResult<T> = Result<T, DistributionError>;
