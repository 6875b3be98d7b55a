//! Conflict resolutions. Each either applies a structural change or reports
//! why it could not.

use super::Detection;
use crate::agent::{AgentId, AgentRegistry};
use crate::distribution::Distributor;
use crate::effects::Effects;

type Resolution = Result<String, String>;

/// Move one queued task from the most loaded involved agent to the least
/// loaded one that can take it. Paused agents never receive.
pub(super) fn resource(
    registry: &mut AgentRegistry,
    distributor: &Distributor,
    detection: &Detection,
) -> Resolution {
    let loads: Vec<(AgentId, usize)> = detection
        .agents
        .iter()
        .filter_map(|id| registry.get(*id).map(|a| (*id, a.queue_len())))
        .collect();

    let (most, most_len) = loads
        .iter()
        .copied()
        .max_by(|(a, la), (b, lb)| la.cmp(lb).then_with(|| b.cmp(a)))
        .ok_or("no live agents involved")?;

    let mut receivers: Vec<(AgentId, usize)> = loads
        .iter()
        .copied()
        .filter(|(id, len)| *id != most && *len < most_len && *len < distributor.max_queue_length())
        .collect();
    receivers.sort_by(|(a, la), (b, lb)| la.cmp(lb).then_with(|| a.cmp(b)));
    if receivers.is_empty() {
        return Err("queues already balanced".to_string());
    }

    let queued: Vec<_> = registry
        .get(most)
        .map(|a| a.queue().iter().rev().cloned().collect())
        .unwrap_or_default();

    for task in queued {
        let required = distributor.required_capabilities(&task);
        let target = receivers.iter().find(|(id, _)| {
            registry
                .get(*id)
                .is_some_and(|a| {
                    !a.status().is_terminal() && !a.is_paused() && a.satisfies(&required)
                })
        });
        let Some((target, _)) = target.copied() else {
            continue;
        };
        let Some(moved) = registry.remove_queued(most, task.id) else {
            continue;
        };
        let task_id = moved.id;
        if let Err(e) = registry.enqueue(target, moved) {
            return Err(format!("moving task {task_id} failed: {e}"));
        }
        return Ok(format!("moved task {task_id} from {most} to {target}"));
    }

    Err(format!("no queued task on {most} can move to a less loaded agent"))
}

/// Keep the overlapping task on the agent with the better success rate and
/// hand the other agent's task back to the distributor.
pub(super) fn overlap(
    registry: &mut AgentRegistry,
    distributor: &Distributor,
    detection: &Detection,
    effects: &mut Effects,
) -> Resolution {
    let [a, b] = detection.agents.as_slice() else {
        return Err("overlap conflicts involve exactly two agents".to_string());
    };
    let rate = |id: AgentId| {
        registry
            .get(id)
            .map_or(0.0, |agent| agent.performance().success_rate)
    };
    let (winner, loser) = if rate(*b) > rate(*a) { (*b, *a) } else { (*a, *b) };

    let task = registry
        .release_in_flight(loser)
        .ok_or_else(|| format!("{loser} is no longer executing"))?;
    let task_id = task.id;
    let placed = distributor.redistribute(registry, vec![task], loser, effects);

    Ok(if placed == 1 {
        format!("kept task on {winner}; reassigned {task_id} away from {loser}")
    } else {
        format!("kept task on {winner}; returned {task_id} from {loser} to pending")
    })
}

/// Put the running task back, reorder the queue by priority and free the agent.
pub(super) fn priority(registry: &mut AgentRegistry, detection: &Detection) -> Resolution {
    let agent = *detection.agents.first().ok_or("no agent involved")?;
    if !registry.requeue_in_flight(agent) {
        return Err(format!("{agent} is no longer executing"));
    }
    registry.sort_queue_by_priority(agent);
    Ok(format!("reordered queue of {agent} by priority"))
}
