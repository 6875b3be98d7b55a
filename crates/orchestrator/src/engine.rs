//! Engine context, drivers and control surface.
//!
//! [`EngineContext`] owns everything the three drivers share: configuration,
//! the serialized engine state, the task store, the execution backend and the
//! event bus. [`Engine`] starts and stops the drivers.

use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::time::Duration;

use homeo_events::{EngineEvent, EventBus, EventPattern, EventSubscription};
use im::Vector;
use tokio::sync::{Mutex, MutexGuard, watch};
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval};
use tracing::{debug, info, warn};

use crate::agent::{AgentId, AgentRegistry, AgentSpec, HealingStrategy};
use crate::config::EngineConfig;
use crate::conflict::{ConflictLog, ConflictMonitor, ConflictRecord, ScanReport};
use crate::distribution::{Assignment, DistributionError, Distributor};
use crate::effects::Effects;
use crate::error::{EngineError, EngineResult};
use crate::executor::TaskExecutor;
use crate::healing::{HealingAction, HealingLog, IssueKind, SelfHealing};
use crate::health::{HealthMonitor, HealthReport};
use crate::shutdown::DRIVER_STOP_TIMEOUT;
use crate::store::{AgentSnapshot, StoreError, TaskStore};
use crate::task::{Task, TaskId, TaskStatus};

/// Mutable engine state. Every mutation happens under one lock.
#[derive(Debug, Default)]
pub struct EngineState {
    pub registry: AgentRegistry,
    pub conflicts: ConflictLog,
    pub healing: HealingLog,
}

/// Everything the drivers share.
pub struct EngineContext {
    pub(crate) config: EngineConfig,
    pub(crate) state: Mutex<EngineState>,
    /// Held from before the state lock is released until the effects of that
    /// critical section are flushed, so store writes land in lock order.
    flush_gate: Mutex<()>,
    pub(crate) store: Arc<dyn TaskStore>,
    pub(crate) executor: Arc<dyn TaskExecutor>,
    pub(crate) events: EventBus,
    pub(crate) distributor: Distributor,
    pub(crate) health: HealthMonitor,
    pub(crate) conflict_monitor: ConflictMonitor,
    pub(crate) healing: SelfHealing,
    /// Set when an execution tick failed; cleared by the next good tick.
    pub(crate) degraded: AtomicBool,
}

impl EngineContext {
    /// Validate `config` and register its roster.
    ///
    /// # Errors
    ///
    /// Returns `Config` if the configuration is invalid.
    pub fn new(
        config: EngineConfig,
        store: Arc<dyn TaskStore>,
        executor: Arc<dyn TaskExecutor>,
    ) -> EngineResult<Self> {
        Self::with_event_bus(config, store, executor, EventBus::new())
    }

    /// Like [`new`](Self::new) with a caller-built event bus.
    ///
    /// # Errors
    ///
    /// Returns `Config` if the configuration is invalid.
    pub fn with_event_bus(
        config: EngineConfig,
        store: Arc<dyn TaskStore>,
        executor: Arc<dyn TaskExecutor>,
        events: EventBus,
    ) -> EngineResult<Self> {
        config.validate().map_err(EngineError::Config)?;

        let mut state = EngineState {
            registry: AgentRegistry::new(),
            conflicts: ConflictLog::new(config.conflict_history_limit),
            healing: HealingLog::new(config.healing_history_limit),
        };
        for spec in config.roster.iter().cloned() {
            let name = spec.name.clone();
            let role = spec.role;
            let id = state.registry.register(spec);
            events.publish(EngineEvent::agent_registered(id, name, role.as_str()));
        }
        info!(agents = state.registry.len(), "Engine context ready");

        Ok(Self {
            distributor: Distributor::from_config(&config),
            health: HealthMonitor::from_config(&config),
            conflict_monitor: ConflictMonitor::from_config(&config),
            healing: SelfHealing::from_config(&config),
            config,
            state: Mutex::new(state),
            flush_gate: Mutex::new(()),
            store,
            executor,
            events,
            degraded: AtomicBool::new(false),
        })
    }

    #[must_use]
    pub const fn config(&self) -> &EngineConfig {
        &self.config
    }

    #[must_use]
    pub const fn events(&self) -> &EventBus {
        &self.events
    }

    #[must_use]
    pub fn store(&self) -> Arc<dyn TaskStore> {
        Arc::clone(&self.store)
    }

    /// Release `state` and apply `effects` after every earlier critical
    /// section's effects.
    ///
    /// # Errors
    ///
    /// Returns the first store error hit while flushing.
    pub(crate) async fn release_and_flush(
        &self,
        state: MutexGuard<'_, EngineState>,
        effects: Effects,
    ) -> Result<(), StoreError> {
        if effects.is_empty() {
            drop(state);
            return Ok(());
        }
        let _gate = self.flush_gate.lock().await;
        drop(state);
        effects.flush(self.store.as_ref(), &self.events).await
    }

    async fn flush(&self, state: MutexGuard<'_, EngineState>, effects: Effects) {
        if let Err(e) = self.release_and_flush(state, effects).await {
            warn!(error = %e, "Engine effects not fully persisted");
        }
    }

    /// Register an agent at runtime.
    ///
    /// # Errors
    ///
    /// Returns `Config` if the agent limit is reached or the name is taken.
    pub async fn register_agent(&self, spec: AgentSpec) -> EngineResult<AgentId> {
        let mut state = self.state.lock().await;
        if state.registry.len() >= self.config.max_agents {
            return Err(EngineError::Config(format!(
                "agent limit {} reached",
                self.config.max_agents
            )));
        }
        if state.registry.find_by_name(&spec.name).is_some() {
            return Err(EngineError::Config(format!(
                "agent name '{}' already registered",
                spec.name
            )));
        }
        let name = spec.name.clone();
        let role = spec.role;
        let id = state.registry.register(spec);
        drop(state);

        info!(agent_id = %id, agent = %name, "Agent registered");
        self.events
            .publish(EngineEvent::agent_registered(id, name, role.as_str()));
        Ok(id)
    }

    /// Submit a task and try to place it right away.
    ///
    /// A task no agent can take yet stays pending and is retried by the
    /// execution cycle; that is not an error.
    ///
    /// # Errors
    ///
    /// Returns `Store` if the store rejects the task.
    pub async fn add_task(&self, mut task: Task) -> EngineResult<TaskId> {
        let task_id = self.store.submit(task.clone()).await?;
        task.id = task_id;
        task.status = TaskStatus::Pending;
        let mut effects = Effects::new();
        let mut state = self.state.lock().await;
        let mut round = self.distributor.round();
        let placed = self
            .distributor
            .distribute(&mut state.registry, task, &mut round, &mut effects);
        self.flush(state, effects).await;
        match placed {
            Ok(Assignment { agent_id, .. }) => {
                debug!(task_id = %task_id, agent_id = %agent_id, "Added task placed immediately");
            }
            Err(e @ DistributionError::NoSuitableAgent { .. }) => {
                debug!(error = %e, "Added task left pending");
            }
            Err(e) => warn!(task_id = %task_id, error = %e, "Added task not placed"),
        }
        Ok(task_id)
    }

    /// Exclude an agent from distribution and from starting queued work.
    ///
    /// # Errors
    ///
    /// Returns `AgentNotFound` or `AgentTerminated`.
    pub async fn pause_agent(&self, id: AgentId) -> EngineResult<()> {
        self.state.lock().await.registry.set_paused(id, true)?;
        info!(agent_id = %id, "Agent paused");
        Ok(())
    }

    /// Undo [`pause_agent`](Self::pause_agent).
    ///
    /// # Errors
    ///
    /// Returns `AgentNotFound` or `AgentTerminated`.
    pub async fn resume_agent(&self, id: AgentId) -> EngineResult<()> {
        self.state.lock().await.registry.set_paused(id, false)?;
        info!(agent_id = %id, "Agent resumed");
        Ok(())
    }

    /// Heal an agent on operator request.
    ///
    /// # Errors
    ///
    /// Returns `AgentNotFound` or `AgentTerminated`.
    pub async fn trigger_healing(
        &self,
        id: AgentId,
        issue: IssueKind,
    ) -> EngineResult<HealingAction> {
        let mut effects = Effects::new();
        let mut guard = self.state.lock().await;
        let state = &mut *guard;
        let action = self.healing.trigger(
            &mut state.registry,
            &mut state.healing,
            id,
            issue,
            &mut effects,
        );
        self.flush(guard, effects).await;
        action
    }

    /// One health monitor pass.
    pub async fn health_tick(&self) -> HealthReport {
        let mut effects = Effects::new();
        let mut guard = self.state.lock().await;
        let state = &mut *guard;
        let report = self.health.run(
            &mut state.registry,
            &mut state.healing,
            &self.healing,
            &mut effects,
        );
        self.flush(guard, effects).await;
        if !report.issues.is_empty() {
            info!(
                issues = report.issues.len(),
                healed = report.healed,
                terminated = report.terminated,
                "Health pass finished"
            );
        }
        report
    }

    /// One conflict monitor pass.
    pub async fn conflict_tick(&self) -> ScanReport {
        let mut effects = Effects::new();
        let mut guard = self.state.lock().await;
        let state = &mut *guard;
        let report = self.conflict_monitor.scan(
            &mut state.registry,
            &mut state.conflicts,
            &self.distributor,
            &mut effects,
        );
        self.flush(guard, effects).await;
        report
    }

    /// Read engine state under the lock.
    pub async fn inspect<R>(&self, f: impl FnOnce(&EngineState) -> R) -> R {
        f(&*self.state.lock().await)
    }

    /// Mutate engine state directly under the lock.
    ///
    /// Nothing done here reaches the store or the event bus.
    pub async fn update<R>(&self, f: impl FnOnce(&mut EngineState) -> R) -> R {
        f(&mut *self.state.lock().await)
    }

    /// Snapshot of every agent, terminated ones included.
    pub async fn agent_snapshots(&self) -> Vec<AgentSnapshot> {
        self.inspect(|s| s.registry.agents().map(AgentSnapshot::of).collect())
            .await
    }

    pub async fn agent_snapshot(&self, id: AgentId) -> Option<AgentSnapshot> {
        self.inspect(|s| s.registry.get(id).map(AgentSnapshot::of))
            .await
    }

    pub async fn conflict_history(&self) -> Vector<ConflictRecord> {
        self.inspect(|s| s.conflicts.records()).await
    }

    pub async fn healing_history(&self) -> Vector<HealingAction> {
        self.inspect(|s| s.healing.actions()).await
    }

    pub async fn healing_success_rate(&self, strategy: HealingStrategy) -> Option<f64> {
        self.inspect(|s| s.healing.success_rate(strategy)).await
    }
}

struct Drivers {
    shutdown: watch::Sender<bool>,
    handles: Vec<JoinHandle<()>>,
}

/// The scheduling engine: a context plus its three periodic drivers.
pub struct Engine {
    ctx: Arc<EngineContext>,
    drivers: Mutex<Option<Drivers>>,
}

impl Engine {
    /// Build an engine and register the configured roster.
    ///
    /// # Errors
    ///
    /// Returns `Config` if the configuration is invalid.
    pub fn new(
        config: EngineConfig,
        store: Arc<dyn TaskStore>,
        executor: Arc<dyn TaskExecutor>,
    ) -> EngineResult<Self> {
        Ok(Self::from_context(EngineContext::new(config, store, executor)?))
    }

    #[must_use]
    pub fn from_context(ctx: EngineContext) -> Self {
        Self {
            ctx: Arc::new(ctx),
            drivers: Mutex::new(None),
        }
    }

    #[must_use]
    pub const fn context(&self) -> &Arc<EngineContext> {
        &self.ctx
    }

    pub async fn is_running(&self) -> bool {
        self.drivers.lock().await.is_some()
    }

    /// Start the execution cycle, health monitor and conflict monitor.
    ///
    /// # Errors
    ///
    /// Returns `AlreadyRunning` if the drivers are already started.
    pub async fn start(&self) -> EngineResult<()> {
        let mut drivers = self.drivers.lock().await;
        if drivers.is_some() {
            return Err(EngineError::AlreadyRunning);
        }

        let (shutdown, rx) = watch::channel(false);
        let config = &self.ctx.config;
        let handles = vec![
            spawn_driver("execution", config.execution_interval(), rx.clone(), {
                let ctx = Arc::clone(&self.ctx);
                move || {
                    let ctx = Arc::clone(&ctx);
                    async move {
                        ctx.run_execution_tick().await;
                    }
                }
            }),
            spawn_driver("health", config.health_interval(), rx.clone(), {
                let ctx = Arc::clone(&self.ctx);
                move || {
                    let ctx = Arc::clone(&ctx);
                    async move {
                        ctx.health_tick().await;
                    }
                }
            }),
            spawn_driver("conflict", config.conflict_interval(), rx, {
                let ctx = Arc::clone(&self.ctx);
                move || {
                    let ctx = Arc::clone(&ctx);
                    async move {
                        ctx.conflict_tick().await;
                    }
                }
            }),
        ];
        *drivers = Some(Drivers { shutdown, handles });
        drop(drivers);

        info!(
            execution_ms = config.execution_interval_ms,
            health_ms = config.health_interval_ms,
            conflict_ms = config.conflict_interval_ms,
            "Engine started"
        );
        self.ctx.events.publish(EngineEvent::execution_started());
        Ok(())
    }

    /// Stop the drivers and wait for in-progress ticks to finish.
    ///
    /// # Errors
    ///
    /// Returns `NotRunning` if the drivers are not started.
    pub async fn stop(&self) -> EngineResult<()> {
        let Some(Drivers { shutdown, handles }) = self.drivers.lock().await.take() else {
            return Err(EngineError::NotRunning);
        };
        if shutdown.send(true).is_err() {
            debug!("All drivers already gone");
        }

        for handle in handles {
            let abort = handle.abort_handle();
            match tokio::time::timeout(DRIVER_STOP_TIMEOUT, handle).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!(error = %e, "Driver ended abnormally"),
                Err(_) => {
                    warn!(
                        timeout_secs = DRIVER_STOP_TIMEOUT.as_secs(),
                        "Driver did not stop in time, aborting"
                    );
                    abort.abort();
                }
            }
        }

        info!("Engine stopped");
        self.ctx.events.publish(EngineEvent::execution_stopped());
        Ok(())
    }

    /// See [`EngineContext::add_task`].
    ///
    /// # Errors
    ///
    /// Returns `Store` if the store rejects the task.
    pub async fn add_task(&self, task: Task) -> EngineResult<TaskId> {
        self.ctx.add_task(task).await
    }

    /// See [`EngineContext::pause_agent`].
    ///
    /// # Errors
    ///
    /// Returns `AgentNotFound` or `AgentTerminated`.
    pub async fn pause_agent(&self, id: AgentId) -> EngineResult<()> {
        self.ctx.pause_agent(id).await
    }

    /// See [`EngineContext::resume_agent`].
    ///
    /// # Errors
    ///
    /// Returns `AgentNotFound` or `AgentTerminated`.
    pub async fn resume_agent(&self, id: AgentId) -> EngineResult<()> {
        self.ctx.resume_agent(id).await
    }

    /// See [`EngineContext::register_agent`].
    ///
    /// # Errors
    ///
    /// Returns `Config` if the agent limit is reached or the name is taken.
    pub async fn register_agent(&self, spec: AgentSpec) -> EngineResult<AgentId> {
        self.ctx.register_agent(spec).await
    }

    #[must_use]
    pub fn subscribe(&self) -> EventSubscription {
        self.ctx.events.subscribe()
    }

    #[must_use]
    pub fn subscribe_with_pattern(&self, pattern: EventPattern) -> EventSubscription {
        self.ctx.events.subscribe_with_pattern(pattern)
    }
}

/// Run `tick` every `period` until shutdown is signalled.
///
/// The first tick fires one full period after start. A slow tick delays the
/// following ones rather than bunching them up.
fn spawn_driver<F, Fut>(
    name: &'static str,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
    mut tick: F,
) -> JoinHandle<()>
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    tokio::spawn(async move {
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await;
        debug!(driver = name, period_ms = period.as_millis(), "Driver started");

        loop {
            tokio::select! {
                _ = ticker.tick() => tick().await,
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        debug!(driver = name, "Driver stopped");
    })
}
