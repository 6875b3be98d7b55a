//! Conflict detectors. Pure reads of the registry.

use std::collections::BTreeMap;

use itertools::Itertools;

use super::{ConflictKind, Detection, Severity};
use crate::agent::{Agent, AgentRegistry};

/// Executing agents and their in-flight task, in registration order.
fn executing(registry: &AgentRegistry) -> impl Iterator<Item = (&Agent, &crate::task::Task)> {
    registry
        .agents()
        .filter_map(|a| a.current_task().map(|t| (a, t)))
}

/// Agents executing tasks of the same type.
///
/// Severity is `high` for groups of more than three, `medium` otherwise.
#[must_use]
pub fn resource_conflicts(registry: &AgentRegistry) -> Vec<Detection> {
    let groups: BTreeMap<&str, Vec<(&Agent, &crate::task::Task)>> = executing(registry)
        .map(|(a, t)| (t.task_type.as_str(), (a, t)))
        .into_group_map()
        .into_iter()
        .collect();

    groups
        .into_iter()
        .filter(|(_, members)| members.len() > 1)
        .map(|(task_type, members)| {
            let severity = if members.len() > 3 {
                Severity::High
            } else {
                Severity::Medium
            };
            Detection::new(
                ConflictKind::Resource,
                severity,
                members.iter().map(|(a, t)| (a.id(), t.id)),
                format!("{} agents executing '{task_type}' tasks", members.len()),
            )
        })
        .collect()
}

/// Pairs of executing agents whose task descriptions share more than
/// `threshold` significant words.
#[must_use]
pub fn overlap_conflicts(
    registry: &AgentRegistry,
    threshold: usize,
    min_word_len: usize,
) -> Vec<Detection> {
    let running: Vec<_> = executing(registry)
        .map(|(a, t)| (a, t, t.significant_words(min_word_len)))
        .collect();

    running
        .iter()
        .tuple_combinations()
        .filter_map(|((a, ta, wa), (b, tb, wb))| {
            let shared = wa.intersection(wb).count();
            (shared > threshold).then(|| {
                Detection::new(
                    ConflictKind::TaskOverlap,
                    Severity::Medium,
                    [(a.id(), ta.id), (b.id(), tb.id)],
                    format!("{shared} shared words between tasks {} and {}", ta.id, tb.id),
                )
            })
        })
        .collect()
}

/// Executing agents whose queue head outranks the task they are running.
#[must_use]
pub fn priority_conflicts(registry: &AgentRegistry) -> Vec<Detection> {
    executing(registry)
        .filter_map(|(a, current)| {
            let head = a.queue().front()?;
            (head.priority > current.priority).then(|| {
                Detection::new(
                    ConflictKind::Priority,
                    Severity::High,
                    [(a.id(), current.id)],
                    format!(
                        "queued {} task waits behind running {} task",
                        head.priority.as_str(),
                        current.priority.as_str()
                    ),
                )
            })
        })
        .collect()
}
