//! Execution cycle.
//!
//! One tick fetches a bounded batch of pending tasks, distributes them, then
//! starts the head of every eligible agent's queue and awaits the results.
//! Backend calls run concurrently and the state lock is never held across
//! them. Store writes from a critical section are flushed in lock order.

use std::sync::atomic::Ordering;

use futures::future::join_all;
use homeo_events::EngineEvent;
use tokio::time::{Instant, timeout};
use tracing::{debug, error, info, warn};

use crate::agent::{AgentId, AgentRole, InFlight};
use crate::distribution::DistributionError;
use crate::effects::Effects;
use crate::engine::EngineContext;
use crate::error::{EngineError, EngineResult};
use crate::executor::{ExecutionContext, ExecutionError, TaskOutput};
use crate::healing::IssueKind;
use crate::task::TaskStatus;

/// Counters for one execution tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub fetched: usize,
    pub distributed: usize,
    /// Left pending for lack of a suitable agent.
    pub deferred: usize,
    pub started: usize,
    pub completed: usize,
    pub failed: usize,
    /// Results dropped because the task was taken away mid-flight.
    pub stale: usize,
}

enum JobOutcome {
    Completed,
    Failed,
    Stale,
}

struct Job {
    agent_id: AgentId,
    in_flight: InFlight,
    ctx: ExecutionContext,
}

impl EngineContext {
    /// Fetch pending tasks and hand them to the distributor.
    ///
    /// # Errors
    ///
    /// Returns `Store` if pending tasks cannot be fetched.
    pub async fn distribute_pending(&self, report: &mut CycleReport) -> EngineResult<()> {
        let tasks = self.store.fetch_pending(self.config.fetch_batch_size).await?;
        report.fetched = tasks.len();
        if tasks.is_empty() {
            return Ok(());
        }

        let mut effects = Effects::new();
        let mut state = self.state.lock().await;
        let mut round = self.distributor.round();
        for task in tasks {
            let task_id = task.id;
            match self
                .distributor
                .distribute(&mut state.registry, task, &mut round, &mut effects)
            {
                Ok(_) => report.distributed += 1,
                Err(e) if e.is_retryable() => {
                    debug!(error = %e, "Task left pending");
                    report.deferred += 1;
                }
                Err(DistributionError::AlreadyAssigned { agent, .. }) => {
                    debug!(task_id = %task_id, agent_id = %agent, "Task already held, skipping");
                }
                Err(e) => warn!(task_id = %task_id, error = %e, "Distribution failed"),
            }
        }

        if let Err(e) = self.release_and_flush(state, effects).await {
            warn!(error = %e, "Distribution effects partially persisted");
        }
        Ok(())
    }

    /// Start the head of every eligible queue and apply the results.
    pub async fn execute_queued(&self, report: &mut CycleReport) {
        let jobs = self.start_jobs().await;
        report.started = jobs.len();

        let outcomes = join_all(jobs.into_iter().map(|job| self.run_job(job))).await;
        for outcome in outcomes {
            match outcome {
                JobOutcome::Completed => report.completed += 1,
                JobOutcome::Failed => report.failed += 1,
                JobOutcome::Stale => report.stale += 1,
            }
        }
    }

    async fn start_jobs(&self) -> Vec<Job> {
        let deadline = self.config.execution_deadline();
        let mut state = self.state.lock().await;
        let ready: Vec<AgentId> = state
            .registry
            .agents()
            .filter(|a| a.is_assignable() && a.queue_len() > 0)
            .map(|a| a.id())
            .collect();

        ready
            .into_iter()
            .filter_map(|agent_id| {
                let in_flight = state.registry.dequeue(agent_id).ok().flatten()?;
                let agent = state.registry.get(agent_id)?;
                Some(Job {
                    agent_id,
                    ctx: ExecutionContext {
                        agent_id,
                        agent_name: agent.name().to_string(),
                        role: agent.role(),
                        lease: in_flight.lease,
                        deadline,
                    },
                    in_flight,
                })
            })
            .collect()
    }

    async fn run_job(&self, job: Job) -> JobOutcome {
        let started = Instant::now();
        let result: Result<TaskOutput, ExecutionError> =
            match timeout(job.ctx.deadline, self.executor.execute(&job.in_flight.task, &job.ctx))
                .await
            {
                Ok(result) => result,
                Err(_) => Err(ExecutionError::DeadlineElapsed(job.ctx.deadline)),
            };
        let elapsed = started.elapsed();
        let task_id = job.in_flight.task.id;

        let mut effects = Effects::new();
        let mut state = self.state.lock().await;
        let outcome = match result {
            Ok(_) => {
                let duration_ms = elapsed.as_secs_f64() * 1000.0;
                if state
                    .registry
                    .complete(job.agent_id, job.in_flight.lease, duration_ms)
                    .is_some()
                {
                    info!(
                        task_id = %task_id,
                        agent = %job.ctx.agent_name,
                        duration_ms = elapsed.as_millis(),
                        "Task completed"
                    );
                    effects.set_status(task_id, TaskStatus::Completed);
                    effects.emit(EngineEvent::task_completed(
                        task_id,
                        job.agent_id,
                        u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
                    ));
                    effects.snapshot_of(&state.registry, job.agent_id);
                    JobOutcome::Completed
                } else {
                    JobOutcome::Stale
                }
            }
            Err(source) => {
                if state
                    .registry
                    .fail(job.agent_id, job.in_flight.lease)
                    .is_some()
                {
                    let err = EngineError::TaskExecution {
                        task_id,
                        agent: job.ctx.agent_name.clone(),
                        source,
                    };
                    warn!(error = %err, "Task failed");
                    effects.set_status(task_id, TaskStatus::Failed);
                    effects.emit(EngineEvent::task_failed(
                        task_id,
                        job.agent_id,
                        err.to_string(),
                    ));
                    let state = &mut *state;
                    if let Err(e) = self.healing.trigger(
                        &mut state.registry,
                        &mut state.healing,
                        job.agent_id,
                        IssueKind::TaskFailure,
                        &mut effects,
                    ) {
                        warn!(agent_id = %job.agent_id, error = %e, "Healing after failure skipped");
                    }
                    JobOutcome::Failed
                } else {
                    JobOutcome::Stale
                }
            }
        };

        if matches!(outcome, JobOutcome::Stale) {
            debug!(task_id = %task_id, agent = %job.ctx.agent_name, "Dropping stale result");
        }
        if let Err(e) = self.release_and_flush(state, effects).await {
            warn!(task_id = %task_id, error = %e, "Task outcome not fully persisted");
        }
        outcome
    }

    /// One execution tick: distribute, then execute.
    ///
    /// # Errors
    ///
    /// Returns `Store` if the store cannot supply pending tasks.
    pub async fn execution_tick(&self) -> EngineResult<CycleReport> {
        let mut report = CycleReport::default();
        self.distribute_pending(&mut report).await?;
        self.execute_queued(&mut report).await;
        Ok(report)
    }

    /// Execution tick as run by the driver.
    ///
    /// A failed tick is logged and triggers a `performance_degradation`
    /// self-check on the first orchestrator agent; it never propagates.
    pub async fn run_execution_tick(&self) -> Option<CycleReport> {
        match self.execution_tick().await {
            Ok(report) => {
                if self.degraded.swap(false, Ordering::SeqCst) {
                    let mut state = self.state.lock().await;
                    if let Some(id) = state.registry.first_with_role(AgentRole::Orchestrator) {
                        state.registry.clear_healing_attempts(id);
                    }
                    info!("Execution cycle recovered");
                }
                debug!(
                    fetched = report.fetched,
                    distributed = report.distributed,
                    deferred = report.deferred,
                    completed = report.completed,
                    failed = report.failed,
                    "Execution tick finished"
                );
                Some(report)
            }
            Err(e) => {
                error!(error = %e, "Execution tick failed");
                self.degraded.store(true, Ordering::SeqCst);
                self.self_check().await;
                None
            }
        }
    }

    async fn self_check(&self) {
        let mut effects = Effects::new();
        let mut guard = self.state.lock().await;
        let state = &mut *guard;
        let Some(id) = state.registry.first_with_role(AgentRole::Orchestrator) else {
            debug!("No orchestrator agent for self-check");
            return;
        };
        if let Err(e) = self.healing.trigger(
            &mut state.registry,
            &mut state.healing,
            id,
            IssueKind::PerformanceDegradation,
            &mut effects,
        ) {
            warn!(error = %e, "Self-check healing skipped");
        }
        if let Err(e) = self.release_and_flush(guard, effects).await {
            debug!(error = %e, "Self-check effects not persisted");
        }
    }
}
