use std::collections::{BTreeSet, VecDeque};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::conflict::Severity;
use crate::task::Task;

pub use homeo_events::AgentId;

/// Agent role tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentRole {
    Orchestrator,
    Manager,
    Engineer,
    Specialist,
}

impl AgentRole {
    /// Stable string identifier.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Orchestrator => "orchestrator",
            Self::Manager => "manager",
            Self::Engineer => "engineer",
            Self::Specialist => "specialist",
        }
    }
}

/// Agent state representing the lifecycle phase of an agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    /// Nothing queued, nothing running.
    Idle,
    /// Work queued, nothing running.
    Active,
    /// Running a task.
    Executing,
    /// Recovering from a failure.
    Healing,
    /// Part of an unresolved conflict; still assignable.
    Conflicted,
    /// Permanently excluded. Terminal.
    Terminated,
}

impl AgentStatus {
    /// Returns all agent states.
    pub fn all_states() -> impl Iterator<Item = Self> {
        [
            Self::Idle,
            Self::Active,
            Self::Executing,
            Self::Healing,
            Self::Conflicted,
            Self::Terminated,
        ]
        .into_iter()
    }

    /// Stable string identifier.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Active => "active",
            Self::Executing => "executing",
            Self::Healing => "healing",
            Self::Conflicted => "conflicted",
            Self::Terminated => "terminated",
        }
    }

    /// Checks if the agent state is terminal.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Terminated)
    }

    /// Checks if the distributor may hand the agent new work.
    #[must_use]
    pub const fn accepts_work(self) -> bool {
        matches!(self, Self::Idle | Self::Active | Self::Conflicted)
    }

    /// Whether moving from `self` to `next` is a legal transition.
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        use AgentStatus::{Active, Conflicted, Executing, Healing, Idle, Terminated};
        match (self, next) {
            (Terminated, _) => false,
            (_, Healing) => true,
            (Healing, Terminated) => true,
            (_, Terminated) => false,
            (Idle | Active | Conflicted, Idle | Active | Conflicted | Executing) => true,
            (Executing, Idle | Active | Conflicted | Executing) => true,
            (Healing, Idle | Active | Conflicted | Executing) => true,
        }
    }
}

impl std::fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Running performance figures for one agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceRecord {
    /// Successful executions.
    pub tasks_completed: u64,
    /// Failed executions (backend error or deadline).
    pub tasks_failed: u64,
    /// Two-point moving average of execution time in milliseconds.
    pub average_execution_ms: f64,
    /// `tasks_completed / (tasks_completed + tasks_failed)`; 1.0 with no history.
    pub success_rate: f64,
    /// Start of the most recent execution.
    pub last_execution_at: Option<DateTime<Utc>>,
}

impl Default for PerformanceRecord {
    fn default() -> Self {
        Self::new()
    }
}

impl PerformanceRecord {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            tasks_completed: 0,
            tasks_failed: 0,
            average_execution_ms: 0.0,
            success_rate: 1.0,
            last_execution_at: None,
        }
    }

    /// Record a successful execution that took `duration_ms`.
    pub fn record_success(&mut self, duration_ms: f64) {
        self.average_execution_ms = if self.tasks_completed == 0 {
            duration_ms
        } else {
            (self.average_execution_ms + duration_ms) / 2.0
        };
        self.tasks_completed = self.tasks_completed.saturating_add(1);
        self.recompute_rate();
    }

    /// Record a failed execution.
    pub fn record_failure(&mut self) {
        self.tasks_failed = self.tasks_failed.saturating_add(1);
        self.recompute_rate();
    }

    /// Total executions that reached an outcome.
    #[must_use]
    pub const fn attempts(&self) -> u64 {
        self.tasks_completed.saturating_add(self.tasks_failed)
    }

    #[allow(clippy::cast_precision_loss)]
    fn recompute_rate(&mut self) {
        let attempts = self.attempts();
        self.success_rate = if attempts == 0 {
            1.0
        } else {
            self.tasks_completed as f64 / attempts as f64
        };
    }
}

/// Recovery strategies the self-healing subsystem can apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealingStrategy {
    Restart,
    ResourceReallocation,
    BackupAgent,
    LoadBalancing,
}

impl HealingStrategy {
    /// Stable string identifier.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Restart => "restart",
            Self::ResourceReallocation => "resource_reallocation",
            Self::BackupAgent => "backup_agent",
            Self::LoadBalancing => "load_balancing",
        }
    }

    /// All strategies.
    #[must_use]
    pub const fn all() -> [Self; 4] {
        [
            Self::Restart,
            Self::ResourceReallocation,
            Self::BackupAgent,
            Self::LoadBalancing,
        ]
    }
}

/// Per-agent self-healing policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealingPolicy {
    /// Healing attempts allowed before the agent is terminated.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Strategies this agent may be healed with.
    #[serde(default = "default_allowed_strategies")]
    pub allowed_strategies: BTreeSet<HealingStrategy>,

    /// Most severe conflict this agent lets the monitor resolve automatically.
    #[serde(default = "default_conflict_resolution_level")]
    pub conflict_resolution_level: Severity,
}

impl Default for HealingPolicy {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            allowed_strategies: default_allowed_strategies(),
            conflict_resolution_level: default_conflict_resolution_level(),
        }
    }
}

impl HealingPolicy {
    #[must_use]
    pub const fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    #[must_use]
    pub fn with_allowed_strategies(
        mut self,
        strategies: impl IntoIterator<Item = HealingStrategy>,
    ) -> Self {
        self.allowed_strategies = strategies.into_iter().collect();
        self
    }

    #[must_use]
    pub const fn with_conflict_resolution_level(mut self, level: Severity) -> Self {
        self.conflict_resolution_level = level;
        self
    }

    #[must_use]
    pub fn allows(&self, strategy: HealingStrategy) -> bool {
        self.allowed_strategies.contains(&strategy)
    }
}

const fn default_max_retries() -> u32 {
    3
}

fn default_allowed_strategies() -> BTreeSet<HealingStrategy> {
    HealingStrategy::all().into_iter().collect()
}

const fn default_conflict_resolution_level() -> Severity {
    Severity::High
}

/// Everything needed to register an agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentSpec {
    pub name: String,
    pub role: AgentRole,
    #[serde(default)]
    pub capabilities: BTreeSet<String>,
    #[serde(default)]
    pub policy: HealingPolicy,
}

impl AgentSpec {
    #[must_use]
    pub fn new(name: impl Into<String>, role: AgentRole) -> Self {
        Self {
            name: name.into(),
            role,
            capabilities: BTreeSet::new(),
            policy: HealingPolicy::default(),
        }
    }

    #[must_use]
    pub fn with_capability(mut self, capability: impl Into<String>) -> Self {
        self.capabilities.insert(capability.into());
        self
    }

    #[must_use]
    pub fn with_capabilities<I, S>(mut self, capabilities: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.capabilities
            .extend(capabilities.into_iter().map(Into::into));
        self
    }

    #[must_use]
    pub fn with_policy(mut self, policy: HealingPolicy) -> Self {
        self.policy = policy;
        self
    }
}

/// A task an agent is currently running.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InFlight {
    pub task: Task,
    /// Stamp issued at dequeue; results carrying another lease are stale.
    pub lease: u64,
    pub started_at: DateTime<Utc>,
}

/// A worker agent.
///
/// Fields are read through accessors; every mutation goes through
/// [`AgentRegistry`](super::AgentRegistry) so the status/in-flight invariant
/// and the task location index stay consistent.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Agent {
    pub(super) id: AgentId,
    pub(super) name: String,
    pub(super) role: AgentRole,
    pub(super) capabilities: BTreeSet<String>,
    pub(super) status: AgentStatus,
    pub(super) in_flight: Option<InFlight>,
    pub(super) queue: VecDeque<Task>,
    pub(super) performance: PerformanceRecord,
    pub(super) policy: HealingPolicy,
    pub(super) paused: bool,
    pub(super) conflict_flag: bool,
    pub(super) healing_attempts: u32,
    pub(super) restarts: u32,
    pub(super) spawned_from: Option<AgentId>,
}

impl Agent {
    pub(super) fn from_spec(id: AgentId, spec: AgentSpec, spawned_from: Option<AgentId>) -> Self {
        Self {
            id,
            name: spec.name,
            role: spec.role,
            capabilities: spec.capabilities,
            status: AgentStatus::Idle,
            in_flight: None,
            queue: VecDeque::new(),
            performance: PerformanceRecord::new(),
            policy: spec.policy,
            paused: false,
            conflict_flag: false,
            healing_attempts: 0,
            restarts: 0,
            spawned_from,
        }
    }

    #[must_use]
    pub const fn id(&self) -> AgentId {
        self.id
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub const fn role(&self) -> AgentRole {
        self.role
    }

    #[must_use]
    pub const fn capabilities(&self) -> &BTreeSet<String> {
        &self.capabilities
    }

    #[must_use]
    pub fn has_capability(&self, capability: &str) -> bool {
        self.capabilities.contains(capability)
    }

    /// Whether the agent holds every capability in `required`.
    #[must_use]
    pub fn satisfies(&self, required: &BTreeSet<String>) -> bool {
        required.is_subset(&self.capabilities)
    }

    #[must_use]
    pub const fn status(&self) -> AgentStatus {
        self.status
    }

    #[must_use]
    pub const fn in_flight(&self) -> Option<&InFlight> {
        self.in_flight.as_ref()
    }

    #[must_use]
    pub fn current_task(&self) -> Option<&Task> {
        self.in_flight.as_ref().map(|f| &f.task)
    }

    #[must_use]
    pub const fn queue(&self) -> &VecDeque<Task> {
        &self.queue
    }

    #[must_use]
    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    #[must_use]
    pub const fn performance(&self) -> &PerformanceRecord {
        &self.performance
    }

    #[must_use]
    pub const fn policy(&self) -> &HealingPolicy {
        &self.policy
    }

    #[must_use]
    pub const fn is_paused(&self) -> bool {
        self.paused
    }

    #[must_use]
    pub const fn healing_attempts(&self) -> u32 {
        self.healing_attempts
    }

    #[must_use]
    pub const fn restarts(&self) -> u32 {
        self.restarts
    }

    #[must_use]
    pub const fn spawned_from(&self) -> Option<AgentId> {
        self.spawned_from
    }

    /// Eligible to receive new tasks from the distributor.
    #[must_use]
    pub const fn is_assignable(&self) -> bool {
        self.status.accepts_work() && !self.paused
    }

    /// The status the agent settles into when nothing special is going on.
    #[must_use]
    pub(super) fn resting_status(&self) -> AgentStatus {
        if self.in_flight.is_some() {
            AgentStatus::Executing
        } else if self.conflict_flag {
            AgentStatus::Conflicted
        } else if self.queue.is_empty() {
            AgentStatus::Idle
        } else {
            AgentStatus::Active
        }
    }

    pub(super) fn spec(&self) -> AgentSpec {
        AgentSpec {
            name: self.name.clone(),
            role: self.role,
            capabilities: self.capabilities.clone(),
            policy: self.policy.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_performance_first_sample_sets_average() {
        let mut perf = PerformanceRecord::new();
        perf.record_success(120.0);
        assert!((perf.average_execution_ms - 120.0).abs() < f64::EPSILON);

        perf.record_success(80.0);
        assert!((perf.average_execution_ms - 100.0).abs() < f64::EPSILON);
        assert_eq!(perf.tasks_completed, 2);
    }

    #[test]
    fn test_performance_success_rate_is_running_fraction() {
        let mut perf = PerformanceRecord::new();
        assert!((perf.success_rate - 1.0).abs() < f64::EPSILON);

        perf.record_success(10.0);
        perf.record_failure();
        perf.record_success(10.0);
        perf.record_failure();
        assert!((perf.success_rate - 0.5).abs() < f64::EPSILON);
        assert_eq!(perf.attempts(), 4);
    }

    #[test]
    fn test_terminated_has_no_exits() {
        for next in AgentStatus::all_states() {
            assert!(!AgentStatus::Terminated.can_transition_to(next));
        }
    }

    #[test]
    fn test_only_healing_reaches_terminated() {
        for from in AgentStatus::all_states() {
            let allowed = from.can_transition_to(AgentStatus::Terminated);
            assert_eq!(allowed, from == AgentStatus::Healing, "from {from}");
        }
    }

    #[test]
    fn test_accepts_work_excludes_busy_states() {
        assert!(AgentStatus::Idle.accepts_work());
        assert!(AgentStatus::Active.accepts_work());
        assert!(AgentStatus::Conflicted.accepts_work());
        assert!(!AgentStatus::Executing.accepts_work());
        assert!(!AgentStatus::Healing.accepts_work());
        assert!(!AgentStatus::Terminated.accepts_work());
    }

    #[test]
    fn test_default_policy_allows_every_strategy() {
        let policy = HealingPolicy::default();
        for strategy in HealingStrategy::all() {
            assert!(policy.allows(strategy));
        }
        assert_eq!(policy.max_retries, 3);
    }
}
