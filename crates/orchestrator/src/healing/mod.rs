//! Self-healing.
//!
//! [`SelfHealing::trigger`] picks a strategy for an agent's issue, applies it
//! to the registry and records a [`HealingAction`]. An agent that runs out of
//! healing attempts, or whose strategy fails, is terminated.
//!
//! Only faults (`task_failure`, `communication_failure`) spend the healing
//! budget. A detected condition that is still there on the next pass, after
//! its preferred strategy succeeded, escalates to `restart`, which wipes the
//! performance record the condition was read from.

mod strategy;

use std::collections::BTreeMap;
use std::time::Instant;

use chrono::{DateTime, Utc};
use homeo_events::EngineEvent;
use im::Vector;
use serde::Serialize;
use tracing::{error, info, warn};

pub use strategy::{IssueKind, select_strategy};

use crate::agent::{AgentId, AgentRegistry, HealingStrategy};
use crate::config::EngineConfig;
use crate::distribution::{DistributionRound, Distributor};
use crate::effects::Effects;
use crate::error::{EngineError, EngineResult};

/// One healing attempt.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealingAction {
    pub id: u64,
    pub agent_id: AgentId,
    pub agent_name: String,
    pub issue: IssueKind,
    pub strategy: HealingStrategy,
    /// Budgeted attempts since the agent's last successful task.
    pub attempt: u32,
    pub success: bool,
    /// Terminated for running out of budget; no strategy was applied.
    pub exhausted: bool,
    pub detail: String,
    pub started_at: DateTime<Utc>,
    pub recovery_ms: u64,
}

/// Bounded healing history plus lifetime per-strategy tallies.
#[derive(Debug, Clone)]
pub struct HealingLog {
    actions: Vector<HealingAction>,
    limit: usize,
    next_id: u64,
    tallies: BTreeMap<HealingStrategy, (u64, u64)>,
}

impl Default for HealingLog {
    fn default() -> Self {
        Self::new(200)
    }
}

impl HealingLog {
    #[must_use]
    pub fn new(limit: usize) -> Self {
        Self {
            actions: Vector::new(),
            limit: limit.max(1),
            next_id: 1,
            tallies: BTreeMap::new(),
        }
    }

    fn next_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn push(&mut self, action: HealingAction) {
        if !action.exhausted {
            let (successes, total) = self.tallies.entry(action.strategy).or_insert((0, 0));
            *total += 1;
            if action.success {
                *successes += 1;
            }
        }
        self.actions.push_back(action);
        while self.actions.len() > self.limit {
            self.actions.pop_front();
        }
    }

    /// Fraction of successful attempts with `strategy`, `None` if never used.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn success_rate(&self, strategy: HealingStrategy) -> Option<f64> {
        self.tallies
            .get(&strategy)
            .filter(|(_, total)| *total > 0)
            .map(|(successes, total)| *successes as f64 / *total as f64)
    }

    /// Snapshot of the retained history.
    #[must_use]
    pub fn actions(&self) -> Vector<HealingAction> {
        self.actions.clone()
    }

    /// Most recent retained action for `agent`.
    #[must_use]
    pub fn latest_for(&self, agent: AgentId) -> Option<&HealingAction> {
        self.actions.iter().rev().find(|a| a.agent_id == agent)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.actions.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }
}

/// A strategy that had nothing to work with; the caller falls back to restart.
struct NotApplicable(String);

enum StrategyError {
    NotApplicable(NotApplicable),
    Failed(String),
}

impl From<NotApplicable> for StrategyError {
    fn from(e: NotApplicable) -> Self {
        Self::NotApplicable(e)
    }
}

/// Applies healing strategies to agents.
#[derive(Debug, Clone)]
pub struct SelfHealing {
    distributor: Distributor,
    max_agents: usize,
}

impl Default for SelfHealing {
    fn default() -> Self {
        Self::from_config(&EngineConfig::default())
    }
}

impl SelfHealing {
    #[must_use]
    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            distributor: Distributor::from_config(config),
            max_agents: config.max_agents,
        }
    }

    /// Heal `agent_id` for `issue`.
    ///
    /// Returns the recorded action; `success == false` means the agent was
    /// terminated and its tasks went back to `pending`.
    ///
    /// # Errors
    ///
    /// Returns `AgentNotFound` or `AgentTerminated` if there is nothing to heal.
    pub fn trigger(
        &self,
        registry: &mut AgentRegistry,
        log: &mut HealingLog,
        agent_id: AgentId,
        issue: IssueKind,
        effects: &mut Effects,
    ) -> EngineResult<HealingAction> {
        let started = Instant::now();
        let started_at = Utc::now();
        let budgeted = issue.is_fault();
        let attempt = registry.begin_healing(agent_id, budgeted)?;
        let agent = registry
            .get(agent_id)
            .ok_or(EngineError::AgentNotFound(agent_id))?;
        let agent_name = agent.name().to_string();
        let policy = agent.policy().clone();
        let mut strategy = select_strategy(&policy, issue);
        if !budgeted
            && strategy != HealingStrategy::Restart
            && Self::persisted(log, agent_id, issue, strategy)
        {
            info!(
                agent = %agent_name,
                issue = issue.as_str(),
                previous = strategy.as_str(),
                "Condition persisted, escalating to restart"
            );
            strategy = HealingStrategy::Restart;
        }

        info!(
            agent = %agent_name,
            issue = issue.as_str(),
            strategy = strategy.as_str(),
            attempt,
            "Healing triggered"
        );

        let exhausted = budgeted && attempt > policy.max_retries;
        let outcome = if exhausted {
            let err = EngineError::HealingExhausted {
                agent: agent_name.clone(),
                attempts: attempt.saturating_sub(1),
            };
            Err(err.to_string())
        } else {
            match self.apply(registry, agent_id, strategy, effects) {
                Ok(detail) => Ok(detail),
                Err(StrategyError::NotApplicable(NotApplicable(reason))) => {
                    warn!(
                        agent = %agent_name,
                        strategy = strategy.as_str(),
                        reason = %reason,
                        "Strategy not applicable, restarting instead"
                    );
                    strategy = HealingStrategy::Restart;
                    Ok(self.restart(registry, agent_id, effects))
                }
                Err(StrategyError::Failed(reason)) => Err(reason),
            }
        };

        let id = log.next_id();
        let recovery_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        let (success, detail) = match outcome {
            Ok(detail) => {
                registry.settle(agent_id);
                info!(
                    agent = %agent_name,
                    strategy = strategy.as_str(),
                    recovery_ms,
                    detail = %detail,
                    "Healing successful"
                );
                effects.emit(EngineEvent::healing_successful(
                    id,
                    agent_id,
                    issue.as_str(),
                    strategy.as_str(),
                    recovery_ms,
                ));
                (true, detail)
            }
            Err(reason) => {
                let dropped = registry.terminate(agent_id);
                error!(
                    agent = %agent_name,
                    strategy = strategy.as_str(),
                    reason = %reason,
                    returned_tasks = dropped.len(),
                    "Healing failed, agent terminated"
                );
                effects.return_to_pending(dropped);
                effects.emit(EngineEvent::healing_failed(
                    id,
                    agent_id,
                    issue.as_str(),
                    strategy.as_str(),
                    reason.clone(),
                ));
                (false, reason)
            }
        };

        let action = HealingAction {
            id,
            agent_id,
            agent_name,
            issue,
            strategy,
            attempt,
            success,
            exhausted,
            detail,
            started_at,
            recovery_ms,
        };
        log.push(action.clone());
        effects.snapshot_of(registry, agent_id);
        Ok(action)
    }

    /// Whether the last healing of `agent_id` already answered `issue` with
    /// `strategy` and succeeded.
    fn persisted(
        log: &HealingLog,
        agent_id: AgentId,
        issue: IssueKind,
        strategy: HealingStrategy,
    ) -> bool {
        log.latest_for(agent_id)
            .is_some_and(|last| last.issue == issue && last.strategy == strategy && last.success)
    }

    fn apply(
        &self,
        registry: &mut AgentRegistry,
        agent_id: AgentId,
        strategy: HealingStrategy,
        effects: &mut Effects,
    ) -> Result<String, StrategyError> {
        match strategy {
            HealingStrategy::Restart => Ok(self.restart(registry, agent_id, effects)),
            HealingStrategy::ResourceReallocation => {
                Ok(self.reallocate(registry, agent_id, effects))
            }
            HealingStrategy::BackupAgent => self.spawn_backup(registry, agent_id, effects),
            HealingStrategy::LoadBalancing => Ok(self.balance(registry, agent_id, effects)?),
        }
    }

    /// Clear queue and in-flight task, reset performance.
    fn restart(&self, registry: &mut AgentRegistry, agent_id: AgentId, effects: &mut Effects) -> String {
        let dropped = registry.reset(agent_id);
        let count = dropped.len();
        effects.return_to_pending(dropped);
        format!("restarted; {count} tasks returned to pending")
    }

    /// Drain the queue back through the distributor.
    fn reallocate(
        &self,
        registry: &mut AgentRegistry,
        agent_id: AgentId,
        effects: &mut Effects,
    ) -> String {
        let tasks = registry.take_queue(agent_id);
        let total = tasks.len();
        let placed = self
            .distributor
            .redistribute(registry, tasks, agent_id, effects);
        format!("reallocated {placed} of {total} queued tasks")
    }

    /// Clone the agent and hand the clone its queue.
    fn spawn_backup(
        &self,
        registry: &mut AgentRegistry,
        agent_id: AgentId,
        effects: &mut Effects,
    ) -> Result<String, StrategyError> {
        if registry.len() >= self.max_agents {
            return Err(NotApplicable(format!("agent limit {} reached", self.max_agents)).into());
        }
        let (name, backups) = registry
            .get(agent_id)
            .map(|a| {
                let backups = registry
                    .agents()
                    .filter(|b| b.spawned_from() == Some(agent_id))
                    .count();
                (a.name().to_string(), backups)
            })
            .ok_or_else(|| StrategyError::Failed(format!("{agent_id} vanished")))?;

        let backup_name = format!("{name}-backup-{}", backups + 1);
        let backup = registry
            .spawn_clone(agent_id, backup_name.clone())
            .map_err(|e| StrategyError::Failed(e.to_string()))?;
        if let Some(b) = registry.get(backup) {
            effects.emit(EngineEvent::agent_registered(
                backup,
                b.name(),
                b.role().as_str(),
            ));
        }

        let tasks = registry.take_queue(agent_id);
        let moved = tasks.len();
        for task in tasks {
            registry
                .enqueue(backup, task)
                .map_err(|e| StrategyError::Failed(e.to_string()))?;
        }
        Ok(format!("spawned {backup_name} ({backup}) with {moved} queued tasks"))
    }

    /// Move half of the queue (rounded up) to the least loaded capable peers.
    fn balance(
        &self,
        registry: &mut AgentRegistry,
        agent_id: AgentId,
        effects: &mut Effects,
    ) -> Result<String, NotApplicable> {
        let has_peer = registry
            .agents()
            .any(|a| a.id() != agent_id && a.is_assignable());
        if !has_peer {
            return Err(NotApplicable("no assignable peer".to_string()));
        }

        let queued: Vec<_> = registry
            .get(agent_id)
            .map(|a| a.queue().iter().rev().map(|t| t.id).collect())
            .unwrap_or_default();
        let to_move = queued.len().div_ceil(2);
        let round = DistributionRound::unbounded().excluding(agent_id);

        let mut moved = 0;
        for task_id in queued.into_iter().take(to_move) {
            let Some(task) = registry.remove_queued(agent_id, task_id) else {
                continue;
            };
            match self.distributor.find_suitable_agent(registry, &task, &round) {
                Ok(assignment) => {
                    if let Err(e) = registry.enqueue(assignment.agent_id, task.clone()) {
                        warn!(task_id = %task_id, error = %e, "Load balancing move rejected");
                        let _ = registry.enqueue(agent_id, task);
                        continue;
                    }
                    effects.emit(EngineEvent::task_distributed(
                        task_id,
                        assignment.agent_id,
                        assignment.score,
                    ));
                    moved += 1;
                }
                Err(_) => {
                    let _ = registry.enqueue(agent_id, task);
                }
            }
        }
        Ok(format!("moved {moved} of {to_move} tasks to peers"))
    }
}
