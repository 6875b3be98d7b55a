//! Agents and the registry that owns them.

mod info;
mod registry;

pub use info::{
    Agent, AgentId, AgentRole, AgentSpec, AgentStatus, HealingPolicy, HealingStrategy, InFlight,
    PerformanceRecord,
};
pub use registry::AgentRegistry;
