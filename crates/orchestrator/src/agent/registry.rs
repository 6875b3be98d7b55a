//! Agent registry.
//!
//! Agents live in an append-only arena indexed by [`AgentId`]. Terminated
//! agents keep their slot for audit, so ids never dangle. A task location
//! index maps every held task (queued or in flight) to its single holder.

use std::collections::{BTreeSet, HashMap};

use chrono::{DateTime, Utc};
use tracing::{debug, trace};

use super::info::{Agent, AgentId, AgentRole, AgentSpec, AgentStatus, InFlight, PerformanceRecord};
use crate::error::{EngineError, EngineResult};
use crate::task::{Task, TaskId};

/// The set of agents and their mutable state.
#[derive(Debug, Default)]
pub struct AgentRegistry {
    agents: Vec<Agent>,
    locations: HashMap<TaskId, AgentId>,
    next_lease: u64,
}

impl AgentRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an agent; ids are handed out in registration order.
    pub fn register(&mut self, spec: AgentSpec) -> AgentId {
        self.insert(spec, None)
    }

    /// Register a clone of `origin` (same role, capabilities and policy).
    ///
    /// # Errors
    ///
    /// Returns `AgentNotFound` if `origin` does not exist.
    pub fn spawn_clone(&mut self, origin: AgentId, name: String) -> EngineResult<AgentId> {
        let mut spec = self.agent(origin)?.spec();
        spec.name = name;
        Ok(self.insert(spec, Some(origin)))
    }

    fn insert(&mut self, spec: AgentSpec, spawned_from: Option<AgentId>) -> AgentId {
        let slot = u32::try_from(self.agents.len()).unwrap_or(u32::MAX);
        let id = AgentId::new(slot);
        debug!(agent_id = %id, name = %spec.name, role = spec.role.as_str(), "Registering agent");
        self.agents.push(Agent::from_spec(id, spec, spawned_from));
        id
    }

    #[must_use]
    pub fn get(&self, id: AgentId) -> Option<&Agent> {
        self.agents.get(id.index())
    }

    fn agent(&self, id: AgentId) -> EngineResult<&Agent> {
        self.get(id).ok_or(EngineError::AgentNotFound(id))
    }

    fn agent_mut(&mut self, id: AgentId) -> EngineResult<&mut Agent> {
        self.agents
            .get_mut(id.index())
            .ok_or(EngineError::AgentNotFound(id))
    }

    fn live_agent_mut(&mut self, id: AgentId) -> EngineResult<&mut Agent> {
        let agent = self.agent_mut(id)?;
        if agent.status.is_terminal() {
            return Err(EngineError::AgentTerminated(id));
        }
        Ok(agent)
    }

    /// All agents in registration order, terminated ones included.
    pub fn agents(&self) -> impl Iterator<Item = &Agent> {
        self.agents.iter()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.agents.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }

    /// Number of agents that are not terminated.
    #[must_use]
    pub fn live_count(&self) -> usize {
        self.agents
            .iter()
            .filter(|a| !a.status.is_terminal())
            .count()
    }

    /// Ids of agents advertising `capability`, terminated ones excluded.
    #[must_use]
    pub fn list_by_capability(&self, capability: &str) -> Vec<AgentId> {
        self.agents
            .iter()
            .filter(|a| !a.status.is_terminal() && a.has_capability(capability))
            .map(Agent::id)
            .collect()
    }

    #[must_use]
    pub fn find_by_name(&self, name: &str) -> Option<AgentId> {
        self.agents.iter().find(|a| a.name == name).map(Agent::id)
    }

    /// First live agent with the given role.
    #[must_use]
    pub fn first_with_role(&self, role: AgentRole) -> Option<AgentId> {
        self.agents
            .iter()
            .find(|a| a.role == role && !a.status.is_terminal())
            .map(Agent::id)
    }

    /// Which agent holds a task, queued or in flight.
    #[must_use]
    pub fn holder_of(&self, task_id: TaskId) -> Option<AgentId> {
        self.locations.get(&task_id).copied()
    }

    /// Total queued tasks across all agents.
    #[must_use]
    pub fn total_queued(&self) -> usize {
        self.agents.iter().map(Agent::queue_len).sum()
    }

    /// Set an agent's status.
    ///
    /// # Errors
    ///
    /// Returns `InvalidTransition` if the state machine forbids the move or the
    /// result would contradict the agent's queue or in-flight task.
    pub fn set_status(&mut self, id: AgentId, status: AgentStatus) -> EngineResult<()> {
        let agent = self.agent_mut(id)?;
        let from = agent.status;
        let executing_ok = (status == AgentStatus::Executing) == agent.in_flight.is_some();
        let queue_ok = match status {
            AgentStatus::Idle => agent.queue.is_empty(),
            AgentStatus::Active => !agent.queue.is_empty(),
            _ => true,
        };
        if !from.can_transition_to(status) || !executing_ok || !queue_ok {
            return Err(EngineError::invalid_transition(id, from, status));
        }
        agent.status = status;
        trace!(agent_id = %id, from = %from, to = %status, "Agent status changed");
        Ok(())
    }

    /// Append a task to an agent's queue.
    ///
    /// # Errors
    ///
    /// Returns `TaskAlreadyAssigned` if any agent already holds the task and
    /// `AgentTerminated` if the target is terminated.
    pub fn enqueue(&mut self, id: AgentId, task: Task) -> EngineResult<()> {
        self.insert_task(id, task, false)
    }

    /// Put a task at the head of an agent's queue.
    ///
    /// # Errors
    ///
    /// Same as [`enqueue`](Self::enqueue).
    pub fn enqueue_front(&mut self, id: AgentId, task: Task) -> EngineResult<()> {
        self.insert_task(id, task, true)
    }

    fn insert_task(&mut self, id: AgentId, task: Task, front: bool) -> EngineResult<()> {
        if let Some(holder) = self.holder_of(task.id) {
            return Err(EngineError::TaskAlreadyAssigned {
                task_id: task.id,
                agent: holder,
            });
        }
        let task_id = task.id;
        let agent = self.live_agent_mut(id)?;
        if front {
            agent.queue.push_front(task);
        } else {
            agent.queue.push_back(task);
        }
        if agent.status.accepts_work() {
            agent.status = agent.resting_status();
        }
        self.locations.insert(task_id, id);
        Ok(())
    }

    /// Pop the queue head into the in-flight slot and mark the agent executing.
    ///
    /// Returns `Ok(None)` when the queue is empty or the agent is not in a
    /// state that starts work.
    ///
    /// # Errors
    ///
    /// Returns `AgentNotFound` for an unknown id.
    pub fn dequeue(&mut self, id: AgentId) -> EngineResult<Option<InFlight>> {
        let lease = self.next_lease.saturating_add(1);
        let agent = self.agent_mut(id)?;
        if !agent.status.accepts_work() || agent.in_flight.is_some() {
            return Ok(None);
        }
        let Some(task) = agent.queue.pop_front() else {
            return Ok(None);
        };
        let started_at = Utc::now();
        let in_flight = InFlight {
            task,
            lease,
            started_at,
        };
        agent.in_flight = Some(in_flight.clone());
        agent.status = AgentStatus::Executing;
        agent.performance.last_execution_at = Some(started_at);
        self.next_lease = lease;
        Ok(Some(in_flight))
    }

    /// Take the in-flight task if it still carries `lease`.
    fn take_leased(&mut self, id: AgentId, lease: u64) -> Option<(&mut Agent, Task)> {
        let agent = self.agents.get_mut(id.index())?;
        if agent.in_flight.as_ref().map(|f| f.lease) != Some(lease) {
            return None;
        }
        let task = agent.in_flight.take()?.task;
        Some((agent, task))
    }

    /// Apply a successful backend result.
    ///
    /// Returns the finished task, or `None` if the lease is stale (the task was
    /// taken away while the backend was running).
    pub fn complete(&mut self, id: AgentId, lease: u64, duration_ms: f64) -> Option<Task> {
        let (agent, task) = self.take_leased(id, lease)?;
        agent.performance.record_success(duration_ms);
        agent.healing_attempts = 0;
        agent.status = agent.resting_status();
        self.locations.remove(&task.id);
        Some(task)
    }

    /// Apply a failed backend result and move the agent to `healing`.
    ///
    /// Returns `None` if the lease is stale.
    pub fn fail(&mut self, id: AgentId, lease: u64) -> Option<Task> {
        let (agent, task) = self.take_leased(id, lease)?;
        agent.performance.record_failure();
        agent.status = AgentStatus::Healing;
        self.locations.remove(&task.id);
        Some(task)
    }

    /// Free an executing agent, handing back its in-flight task.
    pub fn release_in_flight(&mut self, id: AgentId) -> Option<Task> {
        let agent = self.agents.get_mut(id.index())?;
        let task = agent.in_flight.take()?.task;
        if agent.status == AgentStatus::Executing {
            agent.status = agent.resting_status();
        }
        self.locations.remove(&task.id);
        Some(task)
    }

    /// Push the in-flight task back to the queue head and free the agent.
    ///
    /// Returns whether anything was requeued.
    pub fn requeue_in_flight(&mut self, id: AgentId) -> bool {
        let Some(agent) = self.agents.get_mut(id.index()) else {
            return false;
        };
        let Some(in_flight) = agent.in_flight.take() else {
            return false;
        };
        agent.queue.push_front(in_flight.task);
        if agent.status == AgentStatus::Executing {
            agent.status = agent.resting_status();
        }
        true
    }

    /// Stable sort of the queue by descending priority.
    pub fn sort_queue_by_priority(&mut self, id: AgentId) {
        if let Some(agent) = self.agents.get_mut(id.index()) {
            agent
                .queue
                .make_contiguous()
                .sort_by(|a, b| b.priority.cmp(&a.priority));
        }
    }

    /// Remove and return every queued task.
    pub fn take_queue(&mut self, id: AgentId) -> Vec<Task> {
        let Some(agent) = self.agents.get_mut(id.index()) else {
            return Vec::new();
        };
        let tasks: Vec<Task> = agent.queue.drain(..).collect();
        if agent.status.accepts_work() {
            agent.status = agent.resting_status();
        }
        tasks.iter().for_each(|t| {
            self.locations.remove(&t.id);
        });
        tasks
    }

    /// Remove one queued task by id.
    pub fn remove_queued(&mut self, id: AgentId, task_id: TaskId) -> Option<Task> {
        let agent = self.agents.get_mut(id.index())?;
        let position = agent.queue.iter().position(|t| t.id == task_id)?;
        let task = agent.queue.remove(position)?;
        if agent.status.accepts_work() {
            agent.status = agent.resting_status();
        }
        self.locations.remove(&task_id);
        Some(task)
    }

    /// Mark the start of a healing attempt.
    ///
    /// A task still in flight goes back to the queue head and its lease is
    /// revoked. A `budgeted` attempt is counted; the count since the last
    /// successful task is returned either way.
    ///
    /// # Errors
    ///
    /// Returns `AgentNotFound` or `AgentTerminated`.
    pub fn begin_healing(&mut self, id: AgentId, budgeted: bool) -> EngineResult<u32> {
        let agent = self.live_agent_mut(id)?;
        if let Some(in_flight) = agent.in_flight.take() {
            agent.queue.push_front(in_flight.task);
        }
        agent.status = AgentStatus::Healing;
        if budgeted {
            agent.healing_attempts = agent.healing_attempts.saturating_add(1);
        }
        Ok(agent.healing_attempts)
    }

    /// Forget past healing attempts of a live agent.
    pub fn clear_healing_attempts(&mut self, id: AgentId) {
        if let Some(agent) = self.agents.get_mut(id.index()) {
            if !agent.status.is_terminal() {
                agent.healing_attempts = 0;
            }
        }
    }

    /// Leave `healing` (or any non-terminal state) for the resting status.
    pub fn settle(&mut self, id: AgentId) {
        if let Some(agent) = self.agents.get_mut(id.index()) {
            if !agent.status.is_terminal() {
                agent.status = agent.resting_status();
            }
        }
    }

    /// Wipe queue, in-flight task and performance for a restart.
    ///
    /// Returns the tasks the agent was holding.
    pub fn reset(&mut self, id: AgentId) -> Vec<Task> {
        let Some(agent) = self.agents.get_mut(id.index()) else {
            return Vec::new();
        };
        let mut dropped: Vec<Task> = agent.in_flight.take().map(|f| f.task).into_iter().collect();
        dropped.extend(agent.queue.drain(..));
        agent.performance = PerformanceRecord::new();
        agent.conflict_flag = false;
        agent.restarts = agent.restarts.saturating_add(1);
        dropped.iter().for_each(|t| {
            self.locations.remove(&t.id);
        });
        dropped
    }

    /// Terminate an agent permanently.
    ///
    /// Returns the tasks it was holding so they can be handed back.
    pub fn terminate(&mut self, id: AgentId) -> Vec<Task> {
        let Some(agent) = self.agents.get_mut(id.index()) else {
            return Vec::new();
        };
        let mut dropped: Vec<Task> = agent.in_flight.take().map(|f| f.task).into_iter().collect();
        dropped.extend(agent.queue.drain(..));
        agent.status = AgentStatus::Terminated;
        agent.conflict_flag = false;
        dropped.iter().for_each(|t| {
            self.locations.remove(&t.id);
        });
        dropped
    }

    /// Operator override of assignment eligibility.
    ///
    /// # Errors
    ///
    /// Returns `AgentNotFound` or `AgentTerminated`.
    pub fn set_paused(&mut self, id: AgentId, paused: bool) -> EngineResult<()> {
        self.live_agent_mut(id)?.paused = paused;
        Ok(())
    }

    /// Replace an agent's performance record.
    ///
    /// # Errors
    ///
    /// Returns `AgentNotFound` for an unknown id.
    pub fn set_performance(&mut self, id: AgentId, performance: PerformanceRecord) -> EngineResult<()> {
        self.agent_mut(id)?.performance = performance;
        Ok(())
    }

    /// Set the conflicted marker on exactly the agents in `flagged`.
    pub fn set_conflict_flags(&mut self, flagged: &BTreeSet<AgentId>) {
        for agent in self.agents.iter_mut().filter(|a| !a.status.is_terminal()) {
            agent.conflict_flag = flagged.contains(&agent.id);
            if agent.status.accepts_work() {
                agent.status = agent.resting_status();
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn backdate_in_flight(&mut self, id: AgentId, started_at: DateTime<Utc>) {
        if let Some(f) = self
            .agents
            .get_mut(id.index())
            .and_then(|a| a.in_flight.as_mut())
        {
            f.started_at = started_at;
        }
    }

    /// Verify the registry invariants.
    ///
    /// # Errors
    ///
    /// Returns a description of the first violation found.
    pub fn check_invariants(&self) -> Result<(), String> {
        let mut seen: HashMap<TaskId, AgentId> = HashMap::new();
        for agent in &self.agents {
            let executing = agent.status == AgentStatus::Executing;
            if executing != agent.in_flight.is_some() {
                return Err(format!(
                    "{} is {} but in-flight is {}",
                    agent.id,
                    agent.status,
                    if agent.in_flight.is_some() { "set" } else { "empty" }
                ));
            }
            let held = agent
                .in_flight
                .iter()
                .map(|f| &f.task)
                .chain(agent.queue.iter());
            for task in held {
                if let Some(other) = seen.insert(task.id, agent.id) {
                    return Err(format!(
                        "task {} held by both {} and {}",
                        task.id, other, agent.id
                    ));
                }
            }
        }
        if seen != self.locations {
            return Err(format!(
                "location index out of sync: {} held, {} indexed",
                seen.len(),
                self.locations.len()
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    #![allow(clippy::expect_used)]

    use super::*;
    use crate::task::Priority;

    fn registry_with(n: usize) -> (AgentRegistry, Vec<AgentId>) {
        let mut registry = AgentRegistry::new();
        let ids = (0..n)
            .map(|i| {
                registry.register(
                    AgentSpec::new(format!("agent-{i}"), AgentRole::Engineer)
                        .with_capability("code_generation"),
                )
            })
            .collect();
        (registry, ids)
    }

    #[test]
    fn test_register_assigns_sequential_ids() {
        let (registry, ids) = registry_with(3);
        assert_eq!(ids, vec![AgentId::new(0), AgentId::new(1), AgentId::new(2)]);
        assert_eq!(registry.len(), 3);
        assert_eq!(registry.get(ids[1]).unwrap().status(), AgentStatus::Idle);
    }

    #[test]
    fn test_enqueue_moves_idle_to_active() {
        let (mut registry, ids) = registry_with(1);
        registry.enqueue(ids[0], Task::new("development")).unwrap();
        assert_eq!(registry.get(ids[0]).unwrap().status(), AgentStatus::Active);
        registry.check_invariants().unwrap();
    }

    #[test]
    fn test_same_task_cannot_be_held_twice() {
        let (mut registry, ids) = registry_with(2);
        let task = Task::new("development");
        registry.enqueue(ids[0], task.clone()).unwrap();

        let err = registry.enqueue(ids[1], task.clone()).unwrap_err();
        assert!(matches!(err, EngineError::TaskAlreadyAssigned { agent, .. } if agent == ids[0]));
        assert_eq!(registry.get(ids[1]).unwrap().queue_len(), 0);
        assert_eq!(registry.holder_of(task.id), Some(ids[0]));
    }

    #[test]
    fn test_dequeue_sets_executing_and_complete_settles() {
        let (mut registry, ids) = registry_with(1);
        registry.enqueue(ids[0], Task::new("development")).unwrap();
        registry.enqueue(ids[0], Task::new("development")).unwrap();

        let in_flight = registry.dequeue(ids[0]).unwrap().unwrap();
        assert_eq!(registry.get(ids[0]).unwrap().status(), AgentStatus::Executing);
        registry.check_invariants().unwrap();

        let done = registry.complete(ids[0], in_flight.lease, 40.0).unwrap();
        assert_eq!(done.id, in_flight.task.id);
        assert_eq!(registry.get(ids[0]).unwrap().status(), AgentStatus::Active);
        assert_eq!(registry.holder_of(done.id), None);
        registry.check_invariants().unwrap();
    }

    #[test]
    fn test_stale_lease_is_ignored() {
        let (mut registry, ids) = registry_with(1);
        registry.enqueue(ids[0], Task::new("development")).unwrap();
        let in_flight = registry.dequeue(ids[0]).unwrap().unwrap();

        assert!(registry.requeue_in_flight(ids[0]));
        assert!(registry.complete(ids[0], in_flight.lease, 5.0).is_none());
        assert_eq!(registry.get(ids[0]).unwrap().queue_len(), 1);

        let again = registry.dequeue(ids[0]).unwrap().unwrap();
        assert_ne!(again.lease, in_flight.lease);
        registry.check_invariants().unwrap();
    }

    #[test]
    fn test_fail_moves_to_healing() {
        let (mut registry, ids) = registry_with(1);
        registry.enqueue(ids[0], Task::new("development")).unwrap();
        let in_flight = registry.dequeue(ids[0]).unwrap().unwrap();

        registry.fail(ids[0], in_flight.lease).unwrap();
        let agent = registry.get(ids[0]).unwrap();
        assert_eq!(agent.status(), AgentStatus::Healing);
        assert_eq!(agent.performance().tasks_failed, 1);
        registry.check_invariants().unwrap();
    }

    #[test]
    fn test_set_status_rejects_executing_without_task() {
        let (mut registry, ids) = registry_with(1);
        let err = registry.set_status(ids[0], AgentStatus::Executing).unwrap_err();
        assert!(matches!(err, EngineError::InvalidTransition { .. }));
    }

    #[test]
    fn test_set_status_follows_queue_length() {
        let (mut registry, ids) = registry_with(1);
        assert!(registry.set_status(ids[0], AgentStatus::Active).is_err());

        registry.enqueue(ids[0], Task::new("development")).unwrap();
        assert!(registry.set_status(ids[0], AgentStatus::Idle).is_err());
        registry.set_status(ids[0], AgentStatus::Active).unwrap();
        assert_eq!(registry.get(ids[0]).unwrap().status(), AgentStatus::Active);
    }

    #[test]
    fn test_terminated_rejects_work_and_transitions() {
        let (mut registry, ids) = registry_with(1);
        registry.enqueue(ids[0], Task::new("development")).unwrap();
        registry.begin_healing(ids[0], true).unwrap();
        let dropped = registry.terminate(ids[0]);
        assert_eq!(dropped.len(), 1);

        assert!(matches!(
            registry.enqueue(ids[0], Task::new("development")),
            Err(EngineError::AgentTerminated(_))
        ));
        assert!(registry.set_status(ids[0], AgentStatus::Idle).is_err());
        assert!(registry.list_by_capability("code_generation").is_empty());
        registry.check_invariants().unwrap();
    }

    #[test]
    fn test_sort_queue_by_priority_is_stable() {
        let (mut registry, ids) = registry_with(1);
        let low = Task::new("a").with_priority(Priority::Low);
        let high_1 = Task::new("b").with_priority(Priority::High);
        let high_2 = Task::new("c").with_priority(Priority::High);
        for t in [low.clone(), high_1.clone(), high_2.clone()] {
            registry.enqueue(ids[0], t).unwrap();
        }

        registry.sort_queue_by_priority(ids[0]);
        let order: Vec<TaskId> = registry.get(ids[0]).unwrap().queue().iter().map(|t| t.id).collect();
        assert_eq!(order, vec![high_1.id, high_2.id, low.id]);
    }

    #[test]
    fn test_conflict_flag_marks_only_resting_agents() {
        let (mut registry, ids) = registry_with(2);
        registry.enqueue(ids[1], Task::new("x")).unwrap();
        registry.dequeue(ids[1]).unwrap();

        registry.set_conflict_flags(&ids.iter().copied().collect::<BTreeSet<_>>());
        assert_eq!(registry.get(ids[0]).unwrap().status(), AgentStatus::Conflicted);
        assert_eq!(registry.get(ids[1]).unwrap().status(), AgentStatus::Executing);

        registry.set_conflict_flags(&BTreeSet::new());
        assert_eq!(registry.get(ids[0]).unwrap().status(), AgentStatus::Idle);
        registry.check_invariants().unwrap();
    }

    #[test]
    fn test_spawn_clone_copies_capabilities() {
        let (mut registry, ids) = registry_with(1);
        let clone = registry.spawn_clone(ids[0], "agent-0-backup-1".to_string()).unwrap();
        let agent = registry.get(clone).unwrap();
        assert!(agent.has_capability("code_generation"));
        assert_eq!(agent.spawned_from(), Some(ids[0]));
        assert_eq!(agent.name(), "agent-0-backup-1");
    }
}

#[cfg(test)]
mod invariant_tests {
    #![allow(clippy::unwrap_used)]

    use proptest::prelude::*;

    use super::*;

    #[derive(Debug, Clone)]
    enum Op {
        Enqueue(u8),
        Dequeue(u8),
        Complete(u8),
        Fail(u8),
        Requeue(u8),
        TakeQueue(u8),
        Reset(u8),
        Heal(u8),
        Settle(u8),
        Terminate(u8),
        Flag(u8),
    }

    fn op() -> impl Strategy<Value = Op> {
        prop_oneof![
            (0u8..4).prop_map(Op::Enqueue),
            (0u8..4).prop_map(Op::Dequeue),
            (0u8..4).prop_map(Op::Complete),
            (0u8..4).prop_map(Op::Fail),
            (0u8..4).prop_map(Op::Requeue),
            (0u8..4).prop_map(Op::TakeQueue),
            (0u8..4).prop_map(Op::Reset),
            (0u8..4).prop_map(Op::Heal),
            (0u8..4).prop_map(Op::Settle),
            (0u8..4).prop_map(Op::Terminate),
            (0u8..4).prop_map(Op::Flag),
        ]
    }

    proptest! {
        #[test]
        fn prop_registry_invariants_hold(ops in prop::collection::vec(op(), 1..60)) {
            let mut registry = AgentRegistry::new();
            for i in 0..4 {
                registry.register(AgentSpec::new(format!("a{i}"), AgentRole::Engineer));
            }
            let id = |n: u8| AgentId::new(u32::from(n));

            for op in ops {
                match op {
                    Op::Enqueue(n) => { let _ = registry.enqueue(id(n), Task::new("t")); }
                    Op::Dequeue(n) => { let _ = registry.dequeue(id(n)); }
                    Op::Complete(n) => {
                        if let Some(lease) = registry.get(id(n)).and_then(|a| a.in_flight()).map(|f| f.lease) {
                            registry.complete(id(n), lease, 1.0);
                        }
                    }
                    Op::Fail(n) => {
                        if let Some(lease) = registry.get(id(n)).and_then(|a| a.in_flight()).map(|f| f.lease) {
                            registry.fail(id(n), lease);
                        }
                    }
                    Op::Requeue(n) => { registry.requeue_in_flight(id(n)); }
                    Op::TakeQueue(n) => { registry.take_queue(id(n)); }
                    Op::Reset(n) => { registry.reset(id(n)); registry.settle(id(n)); }
                    Op::Heal(n) => { let _ = registry.begin_healing(id(n), true); }
                    Op::Settle(n) => registry.settle(id(n)),
                    Op::Terminate(n) => {
                        if registry.begin_healing(id(n), true).is_ok() {
                            registry.terminate(id(n));
                        }
                    }
                    Op::Flag(n) => registry.set_conflict_flags(&BTreeSet::from([id(n)])),
                }
                prop_assert!(registry.check_invariants().is_ok(), "{:?}", registry.check_invariants());
            }
        }
    }
}
