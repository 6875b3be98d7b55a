//! Engine configuration.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::agent::{AgentRole, AgentSpec, HealingPolicy, HealingStrategy};
use crate::conflict::Severity;
use crate::error::{EngineError, EngineResult};

/// Configuration for the scheduling engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Execution cycle period in milliseconds.
    #[serde(default = "default_execution_interval_ms")]
    pub execution_interval_ms: u64,

    /// Health monitor period in milliseconds.
    #[serde(default = "default_health_interval_ms")]
    pub health_interval_ms: u64,

    /// Conflict monitor period in milliseconds.
    #[serde(default = "default_conflict_interval_ms")]
    pub conflict_interval_ms: u64,

    /// Pending tasks fetched from the store per tick.
    #[serde(default = "default_fetch_batch_size")]
    pub fetch_batch_size: usize,

    /// An agent whose queue is this long receives no more tasks.
    #[serde(default = "default_max_queue_length")]
    pub max_queue_length: usize,

    /// New tasks a single agent may receive in one distribution pass.
    #[serde(default = "default_max_assignments_per_agent_per_tick")]
    pub max_assignments_per_agent_per_tick: usize,

    /// Upper bound on registered agents, backups included.
    #[serde(default = "default_max_agents")]
    pub max_agents: usize,

    #[serde(default = "default_success_rate_weight")]
    pub success_rate_weight: f64,

    #[serde(default = "default_queue_length_weight")]
    pub queue_length_weight: f64,

    /// Executing longer than this marks an agent unresponsive.
    #[serde(default = "default_soft_timeout_secs")]
    pub soft_timeout_secs: u64,

    /// Success-rate check applies once more than this many tasks completed.
    #[serde(default = "default_min_tasks_for_rate_check")]
    pub min_tasks_for_rate_check: u64,

    #[serde(default = "default_min_success_rate")]
    pub min_success_rate: f64,

    /// Shared significant words above which two tasks overlap.
    #[serde(default = "default_overlap_threshold")]
    pub overlap_threshold: usize,

    #[serde(default = "default_min_significant_word_len")]
    pub min_significant_word_len: usize,

    #[serde(default = "default_conflict_history_limit")]
    pub conflict_history_limit: usize,

    #[serde(default = "default_healing_history_limit")]
    pub healing_history_limit: usize,

    /// Hard deadline on each backend call.
    #[serde(default = "default_execution_deadline_secs")]
    pub execution_deadline_secs: u64,

    /// Task type to required capability tags.
    #[serde(default = "default_task_requirements")]
    pub task_requirements: BTreeMap<String, BTreeSet<String>>,

    /// Agents registered at start.
    #[serde(default = "default_roster")]
    pub roster: Vec<AgentSpec>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            execution_interval_ms: default_execution_interval_ms(),
            health_interval_ms: default_health_interval_ms(),
            conflict_interval_ms: default_conflict_interval_ms(),
            fetch_batch_size: default_fetch_batch_size(),
            max_queue_length: default_max_queue_length(),
            max_assignments_per_agent_per_tick: default_max_assignments_per_agent_per_tick(),
            max_agents: default_max_agents(),
            success_rate_weight: default_success_rate_weight(),
            queue_length_weight: default_queue_length_weight(),
            soft_timeout_secs: default_soft_timeout_secs(),
            min_tasks_for_rate_check: default_min_tasks_for_rate_check(),
            min_success_rate: default_min_success_rate(),
            overlap_threshold: default_overlap_threshold(),
            min_significant_word_len: default_min_significant_word_len(),
            conflict_history_limit: default_conflict_history_limit(),
            healing_history_limit: default_healing_history_limit(),
            execution_deadline_secs: default_execution_deadline_secs(),
            task_requirements: default_task_requirements(),
            roster: default_roster(),
        }
    }
}

impl EngineConfig {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Load from a TOML file and validate.
    ///
    /// # Errors
    ///
    /// Returns `Config` if the file cannot be read or parsed, or fails
    /// validation.
    pub fn load(path: impl AsRef<Path>) -> EngineResult<Self> {
        let path = path.as_ref();
        let config: Self =
            homeo_core::load_toml(path).map_err(|e| EngineError::Config(e.to_string()))?;
        config.validate().map_err(EngineError::Config)?;
        info!(
            path = %path.display(),
            agents = config.roster.len(),
            "Loaded engine configuration"
        );
        Ok(config)
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns error if configuration is invalid.
    pub fn validate(&self) -> Result<(), String> {
        let intervals = [
            ("execution_interval_ms", self.execution_interval_ms),
            ("health_interval_ms", self.health_interval_ms),
            ("conflict_interval_ms", self.conflict_interval_ms),
        ];
        if let Some((name, _)) = intervals.iter().find(|(_, ms)| *ms == 0) {
            return Err(format!("{name} must be greater than 0"));
        }

        if self.fetch_batch_size == 0 {
            return Err("fetch_batch_size must be greater than 0".to_string());
        }

        if self.max_queue_length == 0 {
            return Err("max_queue_length must be greater than 0".to_string());
        }

        if self.max_assignments_per_agent_per_tick == 0 {
            return Err("max_assignments_per_agent_per_tick must be greater than 0".to_string());
        }

        if self.roster.len() > self.max_agents {
            return Err(format!(
                "roster has {} agents but max_agents is {}",
                self.roster.len(),
                self.max_agents
            ));
        }

        if !(0.0..=1.0).contains(&self.min_success_rate) {
            return Err("min_success_rate must be within 0.0..=1.0".to_string());
        }

        if !self.success_rate_weight.is_finite() || !self.queue_length_weight.is_finite() {
            return Err("scoring weights must be finite".to_string());
        }

        if self.execution_deadline_secs == 0 {
            return Err("execution_deadline_secs must be greater than 0".to_string());
        }

        let mut names = BTreeSet::new();
        if let Some(dup) = self.roster.iter().find(|a| !names.insert(a.name.as_str())) {
            return Err(format!("duplicate agent name '{}' in roster", dup.name));
        }

        Ok(())
    }

    #[must_use]
    pub const fn execution_interval(&self) -> Duration {
        Duration::from_millis(self.execution_interval_ms)
    }

    #[must_use]
    pub const fn health_interval(&self) -> Duration {
        Duration::from_millis(self.health_interval_ms)
    }

    #[must_use]
    pub const fn conflict_interval(&self) -> Duration {
        Duration::from_millis(self.conflict_interval_ms)
    }

    #[must_use]
    pub const fn execution_deadline(&self) -> Duration {
        Duration::from_secs(self.execution_deadline_secs)
    }

    #[must_use]
    pub const fn soft_timeout(&self) -> Duration {
        Duration::from_secs(self.soft_timeout_secs)
    }

    #[must_use]
    pub const fn with_execution_interval_ms(mut self, ms: u64) -> Self {
        self.execution_interval_ms = ms;
        self
    }

    #[must_use]
    pub const fn with_health_interval_ms(mut self, ms: u64) -> Self {
        self.health_interval_ms = ms;
        self
    }

    #[must_use]
    pub const fn with_conflict_interval_ms(mut self, ms: u64) -> Self {
        self.conflict_interval_ms = ms;
        self
    }

    #[must_use]
    pub const fn with_fetch_batch_size(mut self, size: usize) -> Self {
        self.fetch_batch_size = size;
        self
    }

    #[must_use]
    pub const fn with_max_queue_length(mut self, len: usize) -> Self {
        self.max_queue_length = len;
        self
    }

    #[must_use]
    pub const fn with_max_assignments_per_agent_per_tick(mut self, cap: usize) -> Self {
        self.max_assignments_per_agent_per_tick = cap;
        self
    }

    #[must_use]
    pub const fn with_max_agents(mut self, max: usize) -> Self {
        self.max_agents = max;
        self
    }

    #[must_use]
    pub const fn with_soft_timeout_secs(mut self, secs: u64) -> Self {
        self.soft_timeout_secs = secs;
        self
    }

    #[must_use]
    pub const fn with_execution_deadline_secs(mut self, secs: u64) -> Self {
        self.execution_deadline_secs = secs;
        self
    }

    #[must_use]
    pub fn with_task_requirement<I, S>(mut self, task_type: impl Into<String>, capabilities: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.task_requirements.insert(
            task_type.into(),
            capabilities.into_iter().map(Into::into).collect(),
        );
        self
    }

    #[must_use]
    pub fn with_roster(mut self, roster: Vec<AgentSpec>) -> Self {
        self.roster = roster;
        self
    }
}

const fn default_execution_interval_ms() -> u64 {
    2000
}

const fn default_health_interval_ms() -> u64 {
    10_000
}

const fn default_conflict_interval_ms() -> u64 {
    5000
}

const fn default_fetch_batch_size() -> usize {
    10
}

const fn default_max_queue_length() -> usize {
    5
}

const fn default_max_assignments_per_agent_per_tick() -> usize {
    1
}

const fn default_max_agents() -> usize {
    32
}

const fn default_success_rate_weight() -> f64 {
    1.0
}

const fn default_queue_length_weight() -> f64 {
    0.2
}

const fn default_soft_timeout_secs() -> u64 {
    300 // 5 minutes
}

const fn default_min_tasks_for_rate_check() -> u64 {
    5
}

const fn default_min_success_rate() -> f64 {
    0.7
}

const fn default_overlap_threshold() -> usize {
    2
}

const fn default_min_significant_word_len() -> usize {
    4
}

const fn default_conflict_history_limit() -> usize {
    100
}

const fn default_healing_history_limit() -> usize {
    200
}

const fn default_execution_deadline_secs() -> u64 {
    600
}

fn default_task_requirements() -> BTreeMap<String, BTreeSet<String>> {
    [
        ("development", "code_generation"),
        ("content", "content_creation"),
        ("analysis", "data_analysis"),
        ("review", "code_review"),
    ]
    .into_iter()
    .map(|(task_type, cap)| (task_type.to_string(), BTreeSet::from([cap.to_string()])))
    .collect()
}

fn default_roster() -> Vec<AgentSpec> {
    let supervisor_policy = HealingPolicy::default()
        .with_max_retries(5)
        .with_conflict_resolution_level(Severity::High);
    let worker_policy = HealingPolicy::default().with_conflict_resolution_level(Severity::Medium);

    vec![
        AgentSpec::new("orchestrator", AgentRole::Orchestrator)
            .with_capabilities(["coordination", "planning"])
            .with_policy(supervisor_policy.clone()),
        AgentSpec::new("project-manager", AgentRole::Manager)
            .with_capabilities(["planning", "code_review"])
            .with_policy(supervisor_policy),
        AgentSpec::new("engineer-1", AgentRole::Engineer)
            .with_capabilities(["code_generation", "code_review"])
            .with_policy(worker_policy.clone()),
        AgentSpec::new("engineer-2", AgentRole::Engineer)
            .with_capabilities(["code_generation", "testing"])
            .with_policy(worker_policy.clone()),
        AgentSpec::new("content-specialist", AgentRole::Specialist)
            .with_capabilities(["content_creation"])
            .with_policy(worker_policy.clone().with_allowed_strategies([
                HealingStrategy::Restart,
                HealingStrategy::LoadBalancing,
            ])),
        AgentSpec::new("data-specialist", AgentRole::Specialist)
            .with_capabilities(["data_analysis"])
            .with_policy(worker_policy),
    ]
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use std::io::Write;

    use super::*;

    #[test]
    fn test_default_config() {
        let config = EngineConfig::default();
        assert_eq!(config.execution_interval_ms, 2000);
        assert_eq!(config.health_interval_ms, 10_000);
        assert_eq!(config.fetch_batch_size, 10);
        assert_eq!(config.max_queue_length, 5);
        assert_eq!(config.roster.len(), 6);
        assert_eq!(config.soft_timeout(), Duration::from_secs(300));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_zero_interval() {
        let config = EngineConfig::default().with_health_interval_ms(0);
        let err = config.validate().unwrap_err();
        assert!(err.contains("health_interval_ms"));
    }

    #[test]
    fn test_validate_rejects_oversized_roster() {
        let config = EngineConfig::default().with_max_agents(3);
        assert!(config.validate().unwrap_err().contains("max_agents"));
    }

    #[test]
    fn test_validate_rejects_duplicate_names() {
        let roster = vec![
            AgentSpec::new("a", AgentRole::Engineer),
            AgentSpec::new("a", AgentRole::Manager),
        ];
        let config = EngineConfig::default().with_roster(roster);
        assert!(config.validate().unwrap_err().contains("duplicate"));
    }

    #[test]
    fn test_load_partial_toml_fills_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
execution_interval_ms = 500
max_queue_length = 3

[task_requirements]
deploy = ["ops"]

[[roster]]
name = "ops-1"
role = "engineer"
capabilities = ["ops"]

[roster.policy]
max_retries = 1
allowed_strategies = ["restart"]
"#
        )
        .unwrap();

        let config = EngineConfig::load(file.path()).unwrap();
        assert_eq!(config.execution_interval_ms, 500);
        assert_eq!(config.max_queue_length, 3);
        assert_eq!(config.health_interval_ms, 10_000);
        assert_eq!(config.roster.len(), 1);
        assert_eq!(config.roster[0].policy.max_retries, 1);
        assert_eq!(
            config.roster[0].policy.conflict_resolution_level,
            Severity::High
        );
        assert!(config.task_requirements["deploy"].contains("ops"));
    }

    #[test]
    fn test_load_invalid_config_is_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "fetch_batch_size = 0").unwrap();
        let err = EngineConfig::load(file.path()).unwrap_err();
        assert!(matches!(err, EngineError::Config(msg) if msg.contains("fetch_batch_size")));
    }
}
