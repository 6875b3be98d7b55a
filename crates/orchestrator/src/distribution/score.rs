//! Composite agent score.

use crate::agent::Agent;

/// Weights of the composite distribution score.
///
/// `score = success_rate * success_rate_weight - queue_length * queue_length_weight`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoreWeights {
    /// Weight for the agent's running success rate.
    success_rate: f64,
    /// Penalty per queued task.
    queue_length: f64,
}

impl Default for ScoreWeights {
    fn default() -> Self {
        Self {
            success_rate: 1.0,
            queue_length: 0.2,
        }
    }
}

impl ScoreWeights {
    #[must_use]
    pub fn new(success_rate: f64, queue_length: f64) -> Self {
        Self {
            success_rate: success_rate.max(0.0),
            queue_length: queue_length.max(0.0),
        }
    }

    /// Score an agent; higher is better.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn score(&self, agent: &Agent) -> f64 {
        let success = agent.performance().success_rate;
        let success = if success.is_finite() { success } else { 0.0 };
        success * self.success_rate - agent.queue_len() as f64 * self.queue_length
    }
}
