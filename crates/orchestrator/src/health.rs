//! Health monitor.
//!
//! Each pass looks at every live agent once and raises at most one issue per
//! agent:
//!
//! 1. executing longer than the soft timeout: unresponsive, `performance_degradation`
//! 2. more than `min_tasks_for_rate_check` completions with a success rate
//!    below `min_success_rate`: `performance_degradation`
//! 3. queue at its maximum length: `resource_exhaustion`
//!
//! After the checks a metadata snapshot of every agent is queued for the store.

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::agent::{Agent, AgentId, AgentRegistry};
use crate::config::EngineConfig;
use crate::effects::Effects;
use crate::error::EngineError;
use crate::healing::{HealingLog, IssueKind, SelfHealing};
use crate::store::AgentSnapshot;

/// An issue found by a health pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealthIssue {
    pub agent_id: AgentId,
    pub kind: IssueKind,
    pub reason: String,
}

/// Outcome of one health pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HealthReport {
    pub checked: usize,
    pub issues: Vec<HealthIssue>,
    pub healed: usize,
    pub terminated: usize,
}

#[derive(Debug, Clone)]
pub struct HealthMonitor {
    soft_timeout: chrono::Duration,
    min_tasks: u64,
    min_success_rate: f64,
    max_queue_length: usize,
}

impl Default for HealthMonitor {
    fn default() -> Self {
        Self::from_config(&EngineConfig::default())
    }
}

impl HealthMonitor {
    #[must_use]
    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            soft_timeout: chrono::Duration::seconds(
                i64::try_from(config.soft_timeout_secs).unwrap_or(i64::MAX),
            ),
            min_tasks: config.min_tasks_for_rate_check,
            min_success_rate: config.min_success_rate,
            max_queue_length: config.max_queue_length,
        }
    }

    /// The issue, if any, `agent` shows at `now`.
    #[must_use]
    pub fn assess(&self, agent: &Agent, now: DateTime<Utc>) -> Option<HealthIssue> {
        if agent.status().is_terminal() {
            return None;
        }

        if let Some(in_flight) = agent.in_flight() {
            let elapsed = now.signed_duration_since(in_flight.started_at);
            if elapsed > self.soft_timeout {
                let err = EngineError::AgentUnresponsive {
                    agent: agent.name().to_string(),
                    elapsed_secs: u64::try_from(elapsed.num_seconds()).unwrap_or(0),
                };
                return Some(HealthIssue {
                    agent_id: agent.id(),
                    kind: IssueKind::PerformanceDegradation,
                    reason: err.to_string(),
                });
            }
        }

        let performance = agent.performance();
        if performance.tasks_completed > self.min_tasks
            && performance.success_rate < self.min_success_rate
        {
            return Some(HealthIssue {
                agent_id: agent.id(),
                kind: IssueKind::PerformanceDegradation,
                reason: format!(
                    "success rate {:.2} after {} completed tasks",
                    performance.success_rate, performance.tasks_completed
                ),
            });
        }

        if agent.queue_len() >= self.max_queue_length {
            return Some(HealthIssue {
                agent_id: agent.id(),
                kind: IssueKind::ResourceExhaustion,
                reason: format!("queue at maximum length {}", self.max_queue_length),
            });
        }

        None
    }

    /// Issues across the whole registry, in registration order.
    #[must_use]
    pub fn check(&self, registry: &AgentRegistry, now: DateTime<Utc>) -> Vec<HealthIssue> {
        registry
            .agents()
            .filter_map(|a| self.assess(a, now))
            .collect()
    }

    /// One monitor pass: check, heal, snapshot.
    pub fn run(
        &self,
        registry: &mut AgentRegistry,
        log: &mut HealingLog,
        healing: &SelfHealing,
        effects: &mut Effects,
    ) -> HealthReport {
        let issues = self.check(registry, Utc::now());
        let mut report = HealthReport {
            checked: registry.live_count(),
            ..HealthReport::default()
        };

        for issue in &issues {
            warn!(
                agent_id = %issue.agent_id,
                issue = issue.kind.as_str(),
                reason = %issue.reason,
                "Health check failed"
            );
            match healing.trigger(registry, log, issue.agent_id, issue.kind, effects) {
                Ok(action) if action.success => report.healed += 1,
                Ok(_) => report.terminated += 1,
                Err(e) => debug!(agent_id = %issue.agent_id, error = %e, "Healing skipped"),
            }
        }

        registry
            .agents()
            .map(AgentSnapshot::of)
            .for_each(|s| effects.snapshot(s));
        report.issues = issues;
        report
    }
}
