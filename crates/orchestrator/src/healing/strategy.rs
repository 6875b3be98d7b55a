//! Issue kinds and strategy selection.

use serde::{Deserialize, Serialize};

use crate::agent::{HealingPolicy, HealingStrategy};

/// What went wrong with an agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueKind {
    /// Low success rate or unresponsive execution.
    PerformanceDegradation,
    /// Queue saturated.
    ResourceExhaustion,
    /// The backend failed a task.
    TaskFailure,
    /// Any other fault; always healed by restart.
    CommunicationFailure,
}

impl IssueKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::PerformanceDegradation => "performance_degradation",
            Self::ResourceExhaustion => "resource_exhaustion",
            Self::TaskFailure => "task_failure",
            Self::CommunicationFailure => "communication_failure",
        }
    }

    /// Faults spend the healing budget; detected conditions do not.
    #[must_use]
    pub const fn is_fault(self) -> bool {
        matches!(self, Self::TaskFailure | Self::CommunicationFailure)
    }

    /// The strategy tried first for this issue.
    #[must_use]
    pub const fn preferred_strategy(self) -> HealingStrategy {
        match self {
            Self::PerformanceDegradation => HealingStrategy::LoadBalancing,
            Self::ResourceExhaustion => HealingStrategy::ResourceReallocation,
            Self::TaskFailure => HealingStrategy::BackupAgent,
            Self::CommunicationFailure => HealingStrategy::Restart,
        }
    }
}

impl std::fmt::Display for IssueKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Pick the strategy for `issue` under `policy`.
///
/// The issue's preferred strategy if the policy allows it, `restart` otherwise.
/// Restart is always available, even when a policy omits it.
#[must_use]
pub fn select_strategy(policy: &HealingPolicy, issue: IssueKind) -> HealingStrategy {
    let preferred = issue.preferred_strategy();
    if policy.allows(preferred) {
        preferred
    } else {
        HealingStrategy::Restart
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_policy_uses_preferred() {
        let policy = HealingPolicy::default();
        assert_eq!(
            select_strategy(&policy, IssueKind::PerformanceDegradation),
            HealingStrategy::LoadBalancing
        );
        assert_eq!(
            select_strategy(&policy, IssueKind::ResourceExhaustion),
            HealingStrategy::ResourceReallocation
        );
        assert_eq!(
            select_strategy(&policy, IssueKind::TaskFailure),
            HealingStrategy::BackupAgent
        );
        assert_eq!(
            select_strategy(&policy, IssueKind::CommunicationFailure),
            HealingStrategy::Restart
        );
    }

    #[test]
    fn test_disallowed_strategy_falls_back_to_restart() {
        let policy = HealingPolicy::default().with_allowed_strategies([HealingStrategy::Restart]);
        for issue in [
            IssueKind::PerformanceDegradation,
            IssueKind::ResourceExhaustion,
            IssueKind::TaskFailure,
        ] {
            assert_eq!(select_strategy(&policy, issue), HealingStrategy::Restart);
        }
    }
}
