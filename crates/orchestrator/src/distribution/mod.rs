//! Capability- and performance-based task distribution.
//!
//! # Example
//!
//! ```ignore
//! use orchestrator::distribution::{DistributionRound, Distributor};
//!
//! let distributor = Distributor::from_config(&config);
//! let mut round = distributor.round();
//! let assignment = distributor.distribute(&mut registry, task, &mut round, &mut effects)?;
//! ```

mod error;
mod score;

use std::collections::{BTreeMap, BTreeSet, HashMap};

use homeo_events::EngineEvent;
use tracing::debug;

pub use error::{DistributionError, DistributionResult};
pub use score::ScoreWeights;

use crate::agent::{Agent, AgentId, AgentRegistry};
use crate::config::EngineConfig;
use crate::effects::Effects;
use crate::task::{Task, TaskStatus};

/// The agent chosen for a task and its score at selection time.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Assignment {
    pub agent_id: AgentId,
    pub score: f64,
}

/// Bookkeeping for one distribution pass.
///
/// Caps how many new tasks each agent may receive and excludes agents that
/// must not receive anything (for example the loser of an overlap conflict).
#[derive(Debug, Clone, Default)]
pub struct DistributionRound {
    cap: Option<usize>,
    assigned: HashMap<AgentId, usize>,
    excluded: BTreeSet<AgentId>,
}

impl DistributionRound {
    /// A round where each agent receives at most `cap` tasks.
    #[must_use]
    pub fn capped(cap: usize) -> Self {
        Self {
            cap: Some(cap),
            ..Self::default()
        }
    }

    /// A round without a per-agent cap.
    #[must_use]
    pub fn unbounded() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn excluding(mut self, agent: AgentId) -> Self {
        self.excluded.insert(agent);
        self
    }

    /// Whether `agent` may still receive a task in this round.
    #[must_use]
    pub fn allows(&self, agent: AgentId) -> bool {
        if self.excluded.contains(&agent) {
            return false;
        }
        self.cap
            .is_none_or(|cap| self.assigned.get(&agent).copied().unwrap_or(0) < cap)
    }

    fn record(&mut self, agent: AgentId) {
        *self.assigned.entry(agent).or_insert(0) += 1;
    }

    /// Tasks handed out in this round.
    #[must_use]
    pub fn total_assigned(&self) -> usize {
        self.assigned.values().sum()
    }
}

/// Chooses an agent for each task.
#[derive(Debug, Clone)]
pub struct Distributor {
    weights: ScoreWeights,
    max_queue_length: usize,
    per_tick_cap: usize,
    requirements: BTreeMap<String, BTreeSet<String>>,
}

impl Default for Distributor {
    fn default() -> Self {
        Self::from_config(&EngineConfig::default())
    }
}

impl Distributor {
    #[must_use]
    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            weights: ScoreWeights::new(config.success_rate_weight, config.queue_length_weight),
            max_queue_length: config.max_queue_length,
            per_tick_cap: config.max_assignments_per_agent_per_tick,
            requirements: config.task_requirements.clone(),
        }
    }

    #[must_use]
    pub const fn with_weights(mut self, weights: ScoreWeights) -> Self {
        self.weights = weights;
        self
    }

    #[must_use]
    pub const fn max_queue_length(&self) -> usize {
        self.max_queue_length
    }

    /// A fresh round using the configured per-tick cap.
    #[must_use]
    pub fn round(&self) -> DistributionRound {
        DistributionRound::capped(self.per_tick_cap)
    }

    /// Capabilities a task needs: its own list, else the list configured for
    /// its type, else none.
    #[must_use]
    pub fn required_capabilities(&self, task: &Task) -> BTreeSet<String> {
        if task.required_capabilities.is_empty() {
            self.requirements
                .get(&task.task_type)
                .cloned()
                .unwrap_or_default()
        } else {
            task.required_capabilities.clone()
        }
    }

    /// Whether `agent` could take `task` right now, ignoring round limits.
    #[must_use]
    pub fn is_eligible(&self, agent: &Agent, required: &BTreeSet<String>) -> bool {
        agent.is_assignable()
            && agent.satisfies(required)
            && agent.queue_len() < self.max_queue_length
    }

    /// Eligible agents for `task` with their scores, in registration order.
    pub fn candidates<'a>(
        &'a self,
        registry: &'a AgentRegistry,
        task: &Task,
        round: &'a DistributionRound,
    ) -> impl Iterator<Item = (&'a Agent, f64)> + 'a {
        let required = self.required_capabilities(task);
        registry
            .agents()
            .filter(move |a| round.allows(a.id()) && self.is_eligible(a, &required))
            .map(move |a| (a, self.weights.score(a)))
    }

    /// Pick the best agent for a task.
    ///
    /// Highest score wins; ties go to the earliest registered agent.
    ///
    /// # Errors
    ///
    /// Returns `NoSuitableAgent` when no agent qualifies.
    pub fn find_suitable_agent(
        &self,
        registry: &AgentRegistry,
        task: &Task,
        round: &DistributionRound,
    ) -> DistributionResult<Assignment> {
        self.candidates(registry, task, round)
            .max_by(|(a, sa), (b, sb)| sa.total_cmp(sb).then_with(|| b.id().cmp(&a.id())))
            .map(|(agent, score)| Assignment {
                agent_id: agent.id(),
                score,
            })
            .ok_or_else(|| DistributionError::no_suitable_agent(task.id, &task.task_type))
    }

    /// Place a task on the best agent.
    ///
    /// On success the task is queued, `processing` is recorded for the store
    /// and a `task_distributed` event is emitted. On failure nothing changes.
    ///
    /// # Errors
    ///
    /// Returns `AlreadyAssigned` if an agent already holds the task and
    /// `NoSuitableAgent` if no agent qualifies.
    pub fn distribute(
        &self,
        registry: &mut AgentRegistry,
        task: Task,
        round: &mut DistributionRound,
        effects: &mut Effects,
    ) -> DistributionResult<Assignment> {
        if let Some(agent) = registry.holder_of(task.id) {
            return Err(DistributionError::AlreadyAssigned {
                task_id: task.id,
                agent,
            });
        }

        let assignment = self.find_suitable_agent(registry, &task, round)?;
        let task_id = task.id;
        registry
            .enqueue(assignment.agent_id, task)
            .map_err(|e| DistributionError::internal(e.to_string()))?;
        round.record(assignment.agent_id);

        debug!(
            task_id = %task_id,
            agent_id = %assignment.agent_id,
            score = assignment.score,
            "Task distributed"
        );
        effects.set_status(task_id, TaskStatus::Processing);
        effects.emit(EngineEvent::task_distributed(
            task_id,
            assignment.agent_id,
            assignment.score,
        ));
        Ok(assignment)
    }

    /// Place tasks taken off an agent elsewhere, excluding that agent.
    ///
    /// Tasks no other agent can take go back to `pending` in the store.
    /// Returns how many were placed.
    pub fn redistribute(
        &self,
        registry: &mut AgentRegistry,
        tasks: Vec<Task>,
        exclude: AgentId,
        effects: &mut Effects,
    ) -> usize {
        let mut round = DistributionRound::unbounded().excluding(exclude);
        let mut placed = 0;
        for task in tasks {
            let task_id = task.id;
            match self.find_suitable_agent(registry, &task, &round) {
                Ok(assignment) => match registry.enqueue(assignment.agent_id, task) {
                    Ok(()) => {
                        round.record(assignment.agent_id);
                        effects.emit(EngineEvent::task_distributed(
                            task_id,
                            assignment.agent_id,
                            assignment.score,
                        ));
                        placed += 1;
                    }
                    Err(e) => {
                        debug!(task_id = %task_id, error = %e, "Redistribution rejected");
                    }
                },
                Err(_) => {
                    debug!(task_id = %task_id, "No agent for redistributed task, returning to pending");
                    effects.set_status(task_id, TaskStatus::Pending);
                }
            }
        }
        placed
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use crate::agent::{AgentRole, AgentSpec, AgentStatus};

    fn coder(name: &str) -> AgentSpec {
        AgentSpec::new(name, AgentRole::Engineer).with_capability("code_generation")
    }

    fn distributor() -> Distributor {
        Distributor::from_config(&EngineConfig::default())
    }

    #[test]
    fn test_required_capabilities_fall_back_to_type_table() {
        let d = distributor();
        let task = Task::new("development");
        assert!(d.required_capabilities(&task).contains("code_generation"));

        let explicit = Task::new("development").with_required_capability("rust");
        assert_eq!(
            d.required_capabilities(&explicit),
            BTreeSet::from(["rust".to_string()])
        );

        assert!(d.required_capabilities(&Task::new("unknown")).is_empty());
    }

    #[test]
    fn test_lowest_queue_wins() {
        let d = distributor();
        let mut registry = AgentRegistry::new();
        let busy = registry.register(coder("busy"));
        let free = registry.register(coder("free"));
        registry.enqueue(busy, Task::new("development")).unwrap();

        let assignment = d
            .find_suitable_agent(&registry, &Task::new("development"), &d.round())
            .unwrap();
        assert_eq!(assignment.agent_id, free);
    }

    #[test]
    fn test_tie_goes_to_earliest_registered() {
        let d = distributor();
        let mut registry = AgentRegistry::new();
        let first = registry.register(coder("first"));
        registry.register(coder("second"));

        let assignment = d
            .find_suitable_agent(&registry, &Task::new("development"), &d.round())
            .unwrap();
        assert_eq!(assignment.agent_id, first);
    }

    #[test]
    fn test_capability_superset_required() {
        let d = distributor();
        let mut registry = AgentRegistry::new();
        registry.register(AgentSpec::new("writer", AgentRole::Specialist).with_capability("content_creation"));

        let err = d
            .find_suitable_agent(&registry, &Task::new("development"), &d.round())
            .unwrap_err();
        assert!(err.is_retryable());
    }

    #[test]
    fn test_full_queue_and_busy_states_are_skipped() {
        let d = distributor();
        let mut registry = AgentRegistry::new();
        let full = registry.register(coder("full"));
        let executing = registry.register(coder("executing"));
        for _ in 0..5 {
            registry.enqueue(full, Task::new("development")).unwrap();
        }
        registry.enqueue(executing, Task::new("development")).unwrap();
        registry.dequeue(executing).unwrap();
        assert_eq!(registry.get(executing).unwrap().status(), AgentStatus::Executing);

        assert!(
            d.find_suitable_agent(&registry, &Task::new("development"), &d.round())
                .is_err()
        );
    }

    #[test]
    fn test_paused_agent_is_skipped() {
        let d = distributor();
        let mut registry = AgentRegistry::new();
        let paused = registry.register(coder("paused"));
        let other = registry.register(coder("other"));
        registry.set_paused(paused, true).unwrap();

        let assignment = d
            .find_suitable_agent(&registry, &Task::new("development"), &d.round())
            .unwrap();
        assert_eq!(assignment.agent_id, other);
    }

    #[test]
    fn test_distribute_records_effects_and_is_idempotent() {
        let d = distributor();
        let mut registry = AgentRegistry::new();
        let agent = registry.register(coder("a"));
        let task = Task::new("development");
        let mut effects = Effects::new();

        let assignment = d
            .distribute(&mut registry, task.clone(), &mut d.round(), &mut effects)
            .unwrap();
        assert_eq!(assignment.agent_id, agent);
        assert_eq!(effects.status_updates(), &[(task.id, TaskStatus::Processing)]);
        assert_eq!(effects.events().len(), 1);

        let err = d
            .distribute(&mut registry, task, &mut d.round(), &mut effects)
            .unwrap_err();
        assert!(matches!(err, DistributionError::AlreadyAssigned { .. }));
        assert_eq!(registry.get(agent).unwrap().queue_len(), 1);
        assert_eq!(effects.events().len(), 1);
    }

    #[test]
    fn test_round_cap_spreads_a_batch() {
        let d = distributor();
        let mut registry = AgentRegistry::new();
        let a = registry.register(coder("a"));
        let b = registry.register(coder("b"));
        let mut round = d.round();
        let mut effects = Effects::new();

        let first = d
            .distribute(&mut registry, Task::new("development"), &mut round, &mut effects)
            .unwrap();
        let second = d
            .distribute(&mut registry, Task::new("development"), &mut round, &mut effects)
            .unwrap();
        assert_eq!((first.agent_id, second.agent_id), (a, b));

        let third = d.distribute(&mut registry, Task::new("development"), &mut round, &mut effects);
        assert!(third.is_err());
        assert_eq!(round.total_assigned(), 2);
    }

    #[test]
    fn test_redistribute_excludes_source_and_returns_leftovers() {
        let d = distributor();
        let mut registry = AgentRegistry::new();
        let source = registry.register(coder("source"));
        let peer = registry.register(coder("peer"));
        let code = Task::new("development");
        let content = Task::new("content");
        let mut effects = Effects::new();

        let placed = d.redistribute(
            &mut registry,
            vec![code.clone(), content.clone()],
            source,
            &mut effects,
        );
        assert_eq!(placed, 1);
        assert_eq!(registry.holder_of(code.id), Some(peer));
        assert_eq!(effects.status_updates(), &[(content.id, TaskStatus::Pending)]);
    }
}
