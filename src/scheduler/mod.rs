//! Capability-and-priority task scheduler
//!
//! A single tick loop matches eligible pending tasks to idle agents and
//! hands the long-running prompt dispatch to worker tasks. All state
//! transitions happen under one critical section in store -> cache -> event
//! order; the lock is never held across multiplexer or adapter I/O.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use dashmap::DashMap;
use tokio::sync::{Mutex, Notify};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::adapter::{CliAdapter, PromptOptions, PromptOutcome};
use crate::cache::HotCache;
use crate::error::{MindmuxError, Result};
use crate::events::EventBus;
use crate::metrics::Metrics;
use crate::model::{Agent, AgentStatus, Task, TaskStatus};
use crate::store::Store;

/// Default scheduler tick cadence
pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_millis(200);

/// Report sent by a dispatch worker when its prompt call finishes
#[derive(Debug)]
struct DispatchOutcome {
    task_id: String,
    agent_id: String,
    outcome: PromptOutcome,
}

/// Tick-driven matcher binding pending tasks to idle agents
pub struct Scheduler {
    store: Arc<Store>,
    cache: Arc<HotCache>,
    bus: Arc<EventBus>,
    metrics: Arc<Metrics>,

    /// Adapter per spawned agent; agents without one are not dispatchable
    adapters: DashMap<String, Arc<dyn CliAdapter>>,

    /// Lifetime dispatch counts for the load-balancing tie-break
    dispatch_counts: DashMap<String, u64>,

    /// Cancellation handle per in-flight dispatch
    cancel_tokens: Arc<DashMap<String, CancellationToken>>,

    completions_tx: async_channel::Sender<DispatchOutcome>,
    completions_rx: async_channel::Receiver<DispatchOutcome>,

    /// Explicit wake on task-create / completion / agent change
    wake: Arc<Notify>,

    /// Serialises every state transition (store + cache + events)
    state_lock: Mutex<()>,

    shutdown: CancellationToken,
    tick_interval: Duration,
}

impl Scheduler {
    pub fn new(
        store: Arc<Store>,
        cache: Arc<HotCache>,
        bus: Arc<EventBus>,
        metrics: Arc<Metrics>,
    ) -> Self {
        let (completions_tx, completions_rx) = async_channel::unbounded();
        Self {
            store,
            cache,
            bus,
            metrics,
            adapters: DashMap::new(),
            dispatch_counts: DashMap::new(),
            cancel_tokens: Arc::new(DashMap::new()),
            completions_tx,
            completions_rx,
            wake: Arc::new(Notify::new()),
            state_lock: Mutex::new(()),
            shutdown: CancellationToken::new(),
            tick_interval: DEFAULT_TICK_INTERVAL,
        }
    }

    pub fn with_tick_interval(mut self, interval: Duration) -> Self {
        self.tick_interval = interval;
        self
    }

    /// Make an agent dispatchable by attaching its CLI adapter
    pub fn register_adapter(&self, agent_id: &str, adapter: Arc<dyn CliAdapter>) {
        self.adapters.insert(agent_id.to_string(), adapter);
    }

    pub fn unregister_adapter(&self, agent_id: &str) {
        self.adapters.remove(agent_id);
    }

    /// Wake the tick loop without waiting for the periodic timer
    pub fn wake(&self) {
        self.wake.notify_one();
    }

    pub fn shutdown(&self) {
        self.shutdown.cancel();
        for entry in self.cancel_tokens.iter() {
            entry.value().cancel();
        }
    }

    /// Scheduler loop: at most one tick in flight, overlapping triggers
    /// coalesce into the next run
    pub async fn run(self: Arc<Self>) {
        let mut interval = tokio::time::interval(self.tick_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!("scheduler loop started");

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                _ = interval.tick() => {},
                _ = self.wake.notified() => {},
            }
            self.tick().await;
        }

        info!("scheduler loop stopped");
    }

    /// One quantum of scheduler work: drain completions, then match
    pub async fn tick(&self) {
        while let Ok(outcome) = self.completions_rx.try_recv() {
            self.apply_completion(outcome).await;
        }
        self.match_and_dispatch().await;
    }

    /// Reset `running` tasks orphaned by a crash back to `pending` and
    /// release their agents; called once after the cache rebuild
    pub async fn recover(&self) {
        let _guard = self.state_lock.lock().await;

        for mut task in self.cache.tasks_by_status(TaskStatus::Running) {
            warn!(task = %task.id, "resetting orphaned running task");
            task.status = TaskStatus::Pending;
            task.assigned_agent_id = None;
            task.started_at = None;
            if let Err(e) = self.store.update_task(&task) {
                error!(task = %task.id, error = %e, "failed to reset task");
                continue;
            }
            self.cache.set_task(task);
        }

        for mut agent in self.cache.agents_by_status(AgentStatus::Busy) {
            agent.status = AgentStatus::Idle;
            agent.updated_at = Utc::now();
            if let Err(e) = self.store.update_agent(&agent) {
                error!(agent = %agent.id, error = %e, "failed to reset agent");
                continue;
            }
            self.cache.set_agent(agent);
        }
    }

    /// Cancel a task; pending tasks flip immediately, running tasks also
    /// interrupt their dispatch worker and release the agent
    pub async fn cancel_task(&self, task_id: &str) -> Result<Task> {
        let _guard = self.state_lock.lock().await;

        let mut task = self
            .cache
            .get_task(task_id)
            .ok_or_else(|| MindmuxError::not_found("Task", task_id))?;

        match task.status {
            TaskStatus::Pending => {
                task.status = TaskStatus::Cancelled;
                task.completed_at = Some(Utc::now());
                self.store.update_task(&task)?;
                self.cache.set_task(task.clone());
                Ok(task)
            }
            TaskStatus::Running => {
                let agent_id = task.assigned_agent_id.clone();
                task.status = TaskStatus::Cancelled;
                task.completed_at = Some(Utc::now());
                self.store.update_task(&task)?;
                self.cache.set_task(task.clone());

                if let Some(agent_id) = agent_id {
                    self.release_agent(&agent_id);
                }
                if let Some((_, token)) = self.cancel_tokens.remove(task_id) {
                    token.cancel();
                }
                self.wake();
                Ok(task)
            }
            other => Err(MindmuxError::validation(format!(
                "task {} is already {}",
                task_id, other
            ))),
        }
    }

    /// Set an agent idle after its task reached a terminal state; store
    /// first, then cache, then the status event
    fn release_agent(&self, agent_id: &str) {
        let Some(mut agent) = self.cache.get_agent(agent_id) else {
            return;
        };
        if agent.status != AgentStatus::Busy {
            return;
        }
        let old = agent.status;
        agent.status = AgentStatus::Idle;
        agent.updated_at = Utc::now();
        if let Err(e) = self.store.update_agent(&agent) {
            error!(agent = %agent_id, error = %e, "failed to release agent, rebuilding cache");
            self.rebuild_cache();
            return;
        }
        self.cache.set_agent(agent);
        self.bus
            .agent_status_changed(agent_id, old.as_str(), AgentStatus::Idle.as_str());
    }

    fn rebuild_cache(&self) {
        if let Err(e) = self.cache.rebuild_from_store(&self.store) {
            error!(error = %e, "cache rebuild failed");
        }
    }

    async fn apply_completion(&self, completion: DispatchOutcome) {
        let _guard = self.state_lock.lock().await;

        let Some(mut task) = self.cache.get_task(&completion.task_id) else {
            return;
        };
        // stale report: the task was cancelled or already transitioned
        if task.status != TaskStatus::Running
            || task.assigned_agent_id.as_deref() != Some(completion.agent_id.as_str())
        {
            debug!(task = %completion.task_id, "dropping stale dispatch report");
            return;
        }

        if completion.outcome.success {
            task.status = TaskStatus::Completed;
            task.result = Some(completion.outcome.output.clone());
            task.completed_at = Some(Utc::now());
            if let Err(e) = self.store.update_task(&task) {
                error!(task = %task.id, error = %e, "failed to persist completion");
                self.rebuild_cache();
                return;
            }
            self.cache.set_task(task.clone());
            self.bus.task_completed(&task);
            self.metrics
                .record_task_completed(completion.outcome.duration_ms);
            info!(task = %task.id, agent = %completion.agent_id, "task completed");
        } else {
            let reason = completion
                .outcome
                .error
                .clone()
                .unwrap_or_else(|| "dispatch failed".to_string());

            if task.retry_count < task.max_retries {
                task.retry_count += 1;
                task.status = TaskStatus::Pending;
                task.assigned_agent_id = None;
                task.started_at = None;
                if let Err(e) = self.store.update_task(&task) {
                    error!(task = %task.id, error = %e, "failed to persist retry");
                    self.rebuild_cache();
                    return;
                }
                self.cache.set_task(task.clone());
                warn!(
                    task = %task.id,
                    retry = task.retry_count,
                    reason = %reason,
                    "task failed, re-enqueueing"
                );
            } else {
                task.status = TaskStatus::Failed;
                task.error_message = Some(reason.clone());
                task.completed_at = Some(Utc::now());
                if let Err(e) = self.store.update_task(&task) {
                    error!(task = %task.id, error = %e, "failed to persist failure");
                    self.rebuild_cache();
                    return;
                }
                self.cache.set_task(task.clone());
                self.bus.task_failed(&task);
                self.metrics.record_task_failed();
                warn!(task = %task.id, reason = %reason, "task failed terminally");
            }
        }

        self.release_agent(&completion.agent_id);
    }

    async fn match_and_dispatch(&self) {
        let _guard = self.state_lock.lock().await;

        let eligible = eligible_tasks(&self.cache);
        if eligible.is_empty() {
            return;
        }

        // working pool of idle agents, shrunk as assignments are made
        let mut pool: Vec<Agent> = self
            .cache
            .agents_by_status(AgentStatus::Idle)
            .into_iter()
            .filter(|a| self.adapters.contains_key(&a.id))
            .collect();

        for task in eligible {
            if pool.is_empty() {
                break;
            }

            let Some(chosen) = self.pick_agent(&pool, &task) else {
                continue;
            };
            let agent_idx = match pool.iter().position(|a| a.id == chosen) {
                Some(idx) => idx,
                None => continue,
            };
            let agent = pool.swap_remove(agent_idx);

            if let Err(e) = self.assign(task, agent).await {
                error!(error = %e, "assignment failed, rebuilding cache");
                self.rebuild_cache();
                return;
            }
        }
    }

    /// Candidate with capability coverage, fewest lifetime dispatches,
    /// lexicographically smallest id on a tie
    fn pick_agent(&self, pool: &[Agent], task: &Task) -> Option<String> {
        pool.iter()
            .filter(|a| a.covers(&task.required_capabilities))
            .min_by(|a, b| {
                let da = self.dispatch_counts.get(&a.id).map(|c| *c).unwrap_or(0);
                let db = self.dispatch_counts.get(&b.id).map(|c| *c).unwrap_or(0);
                da.cmp(&db).then_with(|| a.id.cmp(&b.id))
            })
            .map(|a| a.id.clone())
    }

    /// Transition task -> running and agent -> busy, then spawn the
    /// dispatch worker
    async fn assign(&self, mut task: Task, mut agent: Agent) -> Result<()> {
        task.status = TaskStatus::Running;
        task.assigned_agent_id = Some(agent.id.clone());
        task.started_at = Some(Utc::now());
        self.store.update_task(&task)?;

        let old_status = agent.status;
        agent.status = AgentStatus::Busy;
        agent.updated_at = Utc::now();
        if let Err(e) = self.store.update_agent(&agent) {
            // roll the task row back so store and cache stay consistent
            task.status = TaskStatus::Pending;
            task.assigned_agent_id = None;
            task.started_at = None;
            let _ = self.store.update_task(&task);
            return Err(e.into());
        }

        self.cache.set_task(task.clone());
        self.cache.set_agent(agent.clone());
        self.bus
            .agent_status_changed(&agent.id, old_status.as_str(), AgentStatus::Busy.as_str());

        *self.dispatch_counts.entry(agent.id.clone()).or_insert(0) += 1;
        info!(task = %task.id, agent = %agent.id, "task assigned");

        self.spawn_dispatch(task, agent);
        Ok(())
    }

    fn spawn_dispatch(&self, task: Task, agent: Agent) {
        let Some(adapter) = self.adapters.get(&agent.id).map(|a| Arc::clone(a.value())) else {
            // unreachable in practice: candidates are filtered on adapters
            error!(agent = %agent.id, "no adapter for assigned agent");
            return;
        };

        let target = self
            .cache
            .active_session_for_agent(&agent.id)
            .map(|s| s.multiplexer_session_name)
            .unwrap_or_else(|| format!("mindmux-{}", agent.name));

        let token = CancellationToken::new();
        self.cancel_tokens.insert(task.id.clone(), token.clone());

        let completions = self.completions_tx.clone();
        let cancel_tokens = Arc::clone(&self.cancel_tokens);
        let wake = Arc::clone(&self.wake);
        let opts = PromptOptions::default().with_timeout_ms(task.timeout_ms);

        let task_id = task.id.clone();
        let agent_id = agent.id.clone();
        let prompt = task.prompt.clone();

        tokio::spawn(async move {
            let outcome = tokio::select! {
                _ = token.cancelled() => {
                    // cancellation already transitioned state; interrupt the
                    // tool and report nothing
                    if let Err(e) = adapter.terminate(&target).await {
                        warn!(agent = %agent_id, error = %e, "terminate after cancel failed");
                    }
                    cancel_tokens.remove(&task_id);
                    return;
                }
                outcome = adapter.send_prompt(&target, &prompt, &opts) => outcome,
            };

            cancel_tokens.remove(&task_id);
            let _ = completions
                .send(DispatchOutcome {
                    task_id,
                    agent_id,
                    outcome,
                })
                .await;
            wake.notify_one();
        });
    }
}

/// Pending tasks whose dependencies are all completed, in dispatch order:
/// priority descending, then FIFO by creation time, then id
pub fn eligible_tasks(cache: &HotCache) -> Vec<Task> {
    let mut eligible: Vec<Task> = cache
        .tasks_by_status(TaskStatus::Pending)
        .into_iter()
        .filter(|task| {
            task.retry_count <= task.max_retries
                && task.depends_on.iter().all(|dep| {
                    cache
                        .get_task(dep)
                        .map(|d| d.status == TaskStatus::Completed)
                        .unwrap_or(false)
                })
        })
        .collect();

    eligible.sort_by(|a, b| {
        b.priority
            .cmp(&a.priority)
            .then_with(|| a.created_at.cmp(&b.created_at))
            .then_with(|| a.id.cmp(&b.id))
    });
    eligible
}
