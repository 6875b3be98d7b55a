//! Conflict monitor.
//!
//! Three detectors run over the executing agents on every pass:
//!
//! - **Resource**: more than one agent executing tasks of the same type
//! - **Task overlap**: two running tasks whose descriptions share too many words
//! - **Priority**: a queued task outranks the one being executed
//!
//! Each detection is resolved at most once per pass, and only when every
//! involved agent's policy permits automatic resolution at that severity.
//! Anything left unresolved is logged and picked up again next pass.

mod detect;
mod resolve;

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use homeo_events::EngineEvent;
use im::Vector;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

pub use detect::{overlap_conflicts, priority_conflicts, resource_conflicts};

use crate::agent::{AgentId, AgentRegistry};
use crate::config::EngineConfig;
use crate::distribution::Distributor;
use crate::effects::Effects;
use crate::error::EngineError;
use crate::task::TaskId;

/// Conflict severity.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    #[default]
    Medium,
    High,
}

impl Severity {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictKind {
    Resource,
    TaskOverlap,
    Priority,
}

impl ConflictKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Resource => "resource",
            Self::TaskOverlap => "task_overlap",
            Self::Priority => "priority",
        }
    }
}

/// A conflict found by one detector pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Detection {
    pub kind: ConflictKind,
    pub severity: Severity,
    pub agents: Vec<AgentId>,
    pub tasks: Vec<TaskId>,
    pub description: String,
}

impl Detection {
    #[must_use]
    pub fn new(
        kind: ConflictKind,
        severity: Severity,
        involved: impl IntoIterator<Item = (AgentId, TaskId)>,
        description: impl Into<String>,
    ) -> Self {
        let (agents, tasks) = involved.into_iter().unzip();
        Self {
            kind,
            severity,
            agents,
            tasks,
            description: description.into(),
        }
    }

    /// Every involved agent still runs the task it was detected with.
    fn is_current(&self, registry: &AgentRegistry) -> bool {
        self.agents.iter().zip(&self.tasks).all(|(agent, task)| {
            registry
                .get(*agent)
                .and_then(|a| a.current_task())
                .is_some_and(|t| t.id == *task)
        })
    }
}

/// A detected conflict and its resolution state.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConflictRecord {
    pub id: u64,
    pub kind: ConflictKind,
    pub severity: Severity,
    pub agents: Vec<AgentId>,
    pub tasks: Vec<TaskId>,
    pub description: String,
    pub detected_at: DateTime<Utc>,
    pub resolved: bool,
    pub resolution: Option<String>,
    pub resolved_at: Option<DateTime<Utc>>,
    /// Resolution attempts, one per monitor pass that saw it.
    pub attempts: u32,
}

impl ConflictRecord {
    fn matches(&self, detection: &Detection) -> bool {
        self.kind == detection.kind
            && self.agents == detection.agents
            && self.tasks == detection.tasks
    }
}

/// Bounded conflict history, oldest first.
#[derive(Debug, Clone)]
pub struct ConflictLog {
    records: Vector<ConflictRecord>,
    limit: usize,
    next_id: u64,
}

impl Default for ConflictLog {
    fn default() -> Self {
        Self::new(100)
    }
}

impl ConflictLog {
    #[must_use]
    pub fn new(limit: usize) -> Self {
        Self {
            records: Vector::new(),
            limit: limit.max(1),
            next_id: 1,
        }
    }

    fn record(&mut self, detection: &Detection) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        self.records.push_back(ConflictRecord {
            id,
            kind: detection.kind,
            severity: detection.severity,
            agents: detection.agents.clone(),
            tasks: detection.tasks.clone(),
            description: detection.description.clone(),
            detected_at: Utc::now(),
            resolved: false,
            resolution: None,
            resolved_at: None,
            attempts: 0,
        });
        while self.records.len() > self.limit {
            self.records.pop_front();
        }
        id
    }

    fn find_open(&self, detection: &Detection) -> Option<u64> {
        self.records
            .iter()
            .rev()
            .find(|r| !r.resolved && r.matches(detection))
            .map(|r| r.id)
    }

    fn update(&mut self, id: u64, f: impl FnOnce(&mut ConflictRecord)) {
        if let Some(record) = self.records.iter_mut().find(|r| r.id == id) {
            f(record);
        }
    }

    #[must_use]
    pub fn get(&self, id: u64) -> Option<&ConflictRecord> {
        self.records.iter().find(|r| r.id == id)
    }

    /// Snapshot of the retained history.
    #[must_use]
    pub fn records(&self) -> Vector<ConflictRecord> {
        self.records.clone()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Outcome of one monitor pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanReport {
    /// Conflicts seen for the first time.
    pub detected: usize,
    pub resolved: usize,
    pub unresolved: usize,
}

/// Detects and resolves conflicts between executing agents.
#[derive(Debug, Clone)]
pub struct ConflictMonitor {
    overlap_threshold: usize,
    min_word_len: usize,
}

impl Default for ConflictMonitor {
    fn default() -> Self {
        Self::from_config(&EngineConfig::default())
    }
}

impl ConflictMonitor {
    #[must_use]
    pub const fn from_config(config: &EngineConfig) -> Self {
        Self {
            overlap_threshold: config.overlap_threshold,
            min_word_len: config.min_significant_word_len,
        }
    }

    /// Run all three detectors. Priority first, then overlap, then resource.
    #[must_use]
    pub fn detect(&self, registry: &AgentRegistry) -> Vec<Detection> {
        let mut found = priority_conflicts(registry);
        found.extend(overlap_conflicts(
            registry,
            self.overlap_threshold,
            self.min_word_len,
        ));
        found.extend(resource_conflicts(registry));
        found
    }

    /// One monitor pass: detect, record, try to resolve, mark conflicted agents.
    pub fn scan(
        &self,
        registry: &mut AgentRegistry,
        log: &mut ConflictLog,
        distributor: &Distributor,
        effects: &mut Effects,
    ) -> ScanReport {
        let mut report = ScanReport::default();
        let mut flagged = BTreeSet::new();

        for detection in self.detect(registry) {
            let id = match log.find_open(&detection) {
                Some(id) => id,
                None => {
                    let id = log.record(&detection);
                    report.detected += 1;
                    info!(
                        conflict_id = id,
                        kind = detection.kind.as_str(),
                        severity = detection.severity.as_str(),
                        agents = ?detection.agents,
                        "Conflict detected"
                    );
                    effects.emit(EngineEvent::conflict_detected(
                        id,
                        detection.kind.as_str(),
                        detection.severity.as_str(),
                        detection.agents.clone(),
                    ));
                    id
                }
            };
            log.update(id, |r| r.attempts = r.attempts.saturating_add(1));

            match self.resolve(registry, distributor, &detection, effects) {
                Ok(note) => {
                    debug!(conflict_id = id, resolution = %note, "Conflict resolved");
                    log.update(id, |r| {
                        r.resolved = true;
                        r.resolution = Some(note);
                        r.resolved_at = Some(Utc::now());
                    });
                    effects.emit(EngineEvent::conflict_resolved(id, detection.kind.as_str()));
                    report.resolved += 1;
                }
                Err(reason) => {
                    let err = EngineError::ConflictUnresolved {
                        conflict_id: id,
                        kind: detection.kind.as_str().to_string(),
                        reason,
                    };
                    warn!(error = %err, "Conflict left for next pass");
                    flagged.extend(detection.agents.iter().copied());
                    report.unresolved += 1;
                }
            }
        }

        registry.set_conflict_flags(&flagged);
        report
    }

    fn resolve(
        &self,
        registry: &mut AgentRegistry,
        distributor: &Distributor,
        detection: &Detection,
        effects: &mut Effects,
    ) -> Result<String, String> {
        if !detection.is_current(registry) {
            return Ok("cleared by an earlier resolution".to_string());
        }

        let permitted = detection.agents.iter().all(|id| {
            registry
                .get(*id)
                .is_some_and(|a| a.policy().conflict_resolution_level >= detection.severity)
        });
        if !permitted {
            return Err(format!(
                "automatic resolution of {} conflicts not permitted by agent policy",
                detection.severity.as_str()
            ));
        }

        match detection.kind {
            ConflictKind::Resource => resolve::resource(registry, distributor, detection),
            ConflictKind::TaskOverlap => resolve::overlap(registry, distributor, detection, effects),
            ConflictKind::Priority => resolve::priority(registry, detection),
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use crate::agent::{AgentRole, AgentSpec, AgentStatus, HealingPolicy};
    use crate::task::{Priority, Task, TaskStatus};

    fn coder(name: &str, level: Severity) -> AgentSpec {
        AgentSpec::new(name, AgentRole::Engineer)
            .with_capability("code_generation")
            .with_policy(HealingPolicy::default().with_conflict_resolution_level(level))
    }

    fn start(registry: &mut AgentRegistry, id: AgentId, task: Task) {
        registry.enqueue(id, task).unwrap();
        registry.dequeue(id).unwrap().unwrap();
    }

    #[test]
    fn test_severity_ordering() {
        assert!(Severity::Low < Severity::Medium);
        assert!(Severity::Medium < Severity::High);
    }

    #[test]
    fn test_log_is_bounded() {
        let mut log = ConflictLog::new(2);
        let detection = Detection::new(
            ConflictKind::Priority,
            Severity::High,
            Vec::<(AgentId, TaskId)>::new(),
            "x",
        );
        for _ in 0..5 {
            log.record(&detection);
        }
        assert_eq!(log.len(), 2);
        assert!(log.get(1).is_none());
        assert!(log.get(5).is_some());
    }

    #[test]
    fn test_resource_conflict_moves_queued_task() {
        let monitor = ConflictMonitor::default();
        let distributor = Distributor::default();
        let mut registry = AgentRegistry::new();
        let loaded = registry.register(coder("loaded", Severity::High));
        let light = registry.register(coder("light", Severity::High));
        start(&mut registry, loaded, Task::new("development"));
        start(&mut registry, light, Task::new("development"));
        registry.enqueue(loaded, Task::new("development")).unwrap();
        registry.enqueue(loaded, Task::new("development")).unwrap();

        let mut log = ConflictLog::default();
        let mut effects = Effects::new();
        let report = monitor.scan(&mut registry, &mut log, &distributor, &mut effects);

        assert_eq!(report, ScanReport { detected: 1, resolved: 1, unresolved: 0 });
        assert_eq!(registry.get(loaded).unwrap().queue_len(), 1);
        assert_eq!(registry.get(light).unwrap().queue_len(), 1);
        let record = log.records().back().cloned().unwrap();
        assert_eq!(record.severity, Severity::Medium);
        assert!(record.resolved);
        registry.check_invariants().unwrap();
    }

    #[test]
    fn test_resource_conflict_skips_paused_receiver() {
        let monitor = ConflictMonitor::default();
        let distributor = Distributor::default();
        let mut registry = AgentRegistry::new();
        let loaded = registry.register(coder("loaded", Severity::High));
        let paused = registry.register(coder("paused", Severity::High));
        start(&mut registry, loaded, Task::new("development"));
        start(&mut registry, paused, Task::new("development"));
        registry.enqueue(loaded, Task::new("development")).unwrap();
        registry.enqueue(loaded, Task::new("development")).unwrap();
        registry.set_paused(paused, true).unwrap();

        let mut log = ConflictLog::default();
        let mut effects = Effects::new();
        let report = monitor.scan(&mut registry, &mut log, &distributor, &mut effects);

        assert_eq!(report.unresolved, 1);
        assert_eq!(registry.get(loaded).unwrap().queue_len(), 2);
        assert_eq!(registry.get(paused).unwrap().queue_len(), 0);
        registry.check_invariants().unwrap();
    }

    #[test]
    fn test_balanced_resource_conflict_stays_open_and_flags() {
        let monitor = ConflictMonitor::default();
        let distributor = Distributor::default();
        let mut registry = AgentRegistry::new();
        let a = registry.register(coder("a", Severity::High));
        let b = registry.register(coder("b", Severity::High));
        start(&mut registry, a, Task::new("development"));
        start(&mut registry, b, Task::new("development"));

        let mut log = ConflictLog::default();
        let mut effects = Effects::new();
        let first = monitor.scan(&mut registry, &mut log, &distributor, &mut effects);
        let second = monitor.scan(&mut registry, &mut log, &distributor, &mut effects);

        assert_eq!(first.detected, 1);
        assert_eq!(first.unresolved, 1);
        assert_eq!(second.detected, 0);
        assert_eq!(log.len(), 1);
        assert_eq!(log.get(1).unwrap().attempts, 2);

        let lease = registry.get(a).unwrap().in_flight().unwrap().lease;
        registry.complete(a, lease, 1.0);
        assert_eq!(registry.get(a).unwrap().status(), AgentStatus::Conflicted);
    }

    #[test]
    fn test_policy_level_blocks_resolution() {
        let monitor = ConflictMonitor::default();
        let distributor = Distributor::default();
        let mut registry = AgentRegistry::new();
        let a = registry.register(coder("a", Severity::Medium));
        start(&mut registry, a, Task::new("x").with_priority(Priority::Low));
        registry
            .enqueue(a, Task::new("y").with_priority(Priority::Emergency))
            .unwrap();

        let mut log = ConflictLog::default();
        let report = monitor.scan(&mut registry, &mut log, &distributor, &mut Effects::new());
        assert_eq!(report.unresolved, 1);
        assert_eq!(registry.get(a).unwrap().status(), AgentStatus::Executing);
    }

    #[test]
    fn test_priority_resolution_frees_agent_and_reorders() {
        let monitor = ConflictMonitor::default();
        let distributor = Distributor::default();
        let mut registry = AgentRegistry::new();
        let a = registry.register(coder("a", Severity::High));
        let low = Task::new("x").with_priority(Priority::Low);
        let urgent = Task::new("y").with_priority(Priority::Emergency);
        start(&mut registry, a, low.clone());
        registry.enqueue(a, urgent.clone()).unwrap();

        let mut log = ConflictLog::default();
        let report = monitor.scan(&mut registry, &mut log, &distributor, &mut Effects::new());

        assert_eq!(report.resolved, 1);
        let agent = registry.get(a).unwrap();
        assert_eq!(agent.status(), AgentStatus::Active);
        let order: Vec<TaskId> = agent.queue().iter().map(|t| t.id).collect();
        assert_eq!(order, vec![urgent.id, low.id]);
        registry.check_invariants().unwrap();
    }

    #[test]
    fn test_overlap_keeps_task_on_better_agent() {
        let monitor = ConflictMonitor::default();
        let distributor = Distributor::default();
        let mut registry = AgentRegistry::new();
        let weak = registry.register(coder("weak", Severity::High));
        let strong = registry.register(coder("strong", Severity::High));
        let mut perf = crate::agent::PerformanceRecord::new();
        perf.record_success(1.0);
        perf.record_failure();
        registry.set_performance(weak, perf).unwrap();

        let a = Task::new("alpha").with_description("migrate billing ledger schema safely");
        let b = Task::new("beta").with_description("audit billing ledger schema drift");
        start(&mut registry, weak, a.clone());
        start(&mut registry, strong, b.clone());

        let mut log = ConflictLog::default();
        let mut effects = Effects::new();
        let report = monitor.scan(&mut registry, &mut log, &distributor, &mut effects);

        assert_eq!(report.resolved, 1);
        assert_eq!(registry.get(strong).unwrap().current_task().unwrap().id, b.id);
        assert!(registry.get(weak).unwrap().current_task().is_none());
        assert_eq!(registry.holder_of(a.id), None);
        assert!(effects.status_updates().contains(&(a.id, TaskStatus::Pending)));
        registry.check_invariants().unwrap();
    }
}
