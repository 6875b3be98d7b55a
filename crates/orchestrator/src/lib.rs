//! # Orchestrator
//!
//! Self-healing task scheduling for a pool of role-specialised agents.
//!
//! The [`Engine`] runs three periodic drivers over one shared
//! [`EngineContext`]:
//!
//! - the execution cycle pulls pending tasks from a [`TaskStore`], scores and
//!   distributes them, and runs queued work through a [`TaskExecutor`]
//! - the health monitor finds unresponsive, failing and overloaded agents and
//!   hands them to [`SelfHealing`]
//! - the conflict monitor detects resource, overlap and priority conflicts and
//!   resolves the ones agent policy allows
//!
//! Everything observable is published on the [`homeo_events::EventBus`].

#![forbid(unsafe_code)]
#![deny(clippy::unwrap_used)]
#![deny(clippy::panic)]
#![deny(clippy::expect_used)]

pub mod agent;
pub mod config;
pub mod conflict;
mod cycle;
pub mod distribution;
pub mod effects;
pub mod engine;
pub mod error;
pub mod executor;
pub mod healing;
pub mod health;
pub mod shutdown;
pub mod store;
pub mod task;

pub use agent::{
    Agent, AgentId, AgentRegistry, AgentRole, AgentSpec, AgentStatus, HealingPolicy,
    HealingStrategy, PerformanceRecord,
};
pub use config::EngineConfig;
pub use conflict::{ConflictKind, ConflictMonitor, ConflictRecord, Severity};
pub use cycle::CycleReport;
pub use distribution::{DistributionError, Distributor, ScoreWeights};
pub use engine::{Engine, EngineContext, EngineState};
pub use error::{EngineError, EngineResult};
pub use executor::{ExecutionContext, ExecutionError, SimulatedExecutor, TaskExecutor, TaskOutput};
pub use healing::{HealingAction, IssueKind, SelfHealing};
pub use health::{HealthMonitor, HealthReport};
pub use shutdown::{ShutdownSignal, wait_for_signal};
pub use store::{AgentSnapshot, InMemoryTaskStore, StoreError, TaskStore, TracingTaskStore};
pub use task::{Priority, Task, TaskId, TaskStatus};
