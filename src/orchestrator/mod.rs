//! Process-wide service wiring and entity operations
//!
//! One orchestrator owns one local multiplexer. All services are explicit
//! instances constructed once at startup and passed by reference; the only
//! reset hooks live in test harnesses.

use std::sync::Arc;

use anyhow::{Context, Result as AnyResult};
use chrono::Utc;
use tracing::{info, warn};

use crate::adapter::adapter_for;
use crate::auth::{AccessControl, RateLimiter};
use crate::cache::HotCache;
use crate::config::MindmuxConfig;
use crate::discovery::{DiscoveredAgent, DiscoveryScanner};
use crate::error::{MindmuxError, Result};
use crate::events::EventBus;
use crate::fork::SessionForker;
use crate::metrics::{register_default_checks, HealthChecker, Metrics};
use crate::model::{
    validate_agent_name, validate_capabilities, validate_prompt, Agent, AgentKind, AgentStatus,
    Session, Task, TaskStatus,
};
use crate::scheduler::Scheduler;
use crate::store::Store;
use crate::tmux::Multiplexer;

/// Top-level handle over every core service
pub struct Orchestrator {
    pub config: MindmuxConfig,
    pub store: Arc<Store>,
    pub cache: Arc<HotCache>,
    pub bus: Arc<EventBus>,
    pub metrics: Arc<Metrics>,
    pub health: Arc<HealthChecker>,
    pub scheduler: Arc<Scheduler>,
    pub access: Arc<AccessControl>,
    pub rate_limiter: Arc<RateLimiter>,
    scanner: DiscoveryScanner,
    forker: SessionForker,
    driver: Arc<dyn Multiplexer>,
}

impl Orchestrator {
    /// Open the durable store under the data directory and wire all
    /// services
    pub fn new(config: MindmuxConfig, driver: Arc<dyn Multiplexer>) -> AnyResult<Self> {
        config
            .ensure_data_dir()
            .context("failed to prepare data directory")?;
        let store = Store::open(&config.db_path()).context("failed to open database")?;
        Ok(Self::with_store(config, driver, Arc::new(store)))
    }

    /// Wire services around an existing store; used by tests with an
    /// in-memory database
    pub fn with_store(
        config: MindmuxConfig,
        driver: Arc<dyn Multiplexer>,
        store: Arc<Store>,
    ) -> Self {
        let cache = Arc::new(HotCache::new());
        let bus = Arc::new(EventBus::new());
        let metrics = Arc::new(Metrics::new());
        let health = Arc::new(HealthChecker::new());
        register_default_checks(&health, Arc::clone(&store), Arc::clone(&cache));

        let scheduler = Arc::new(
            Scheduler::new(
                Arc::clone(&store),
                Arc::clone(&cache),
                Arc::clone(&bus),
                Arc::clone(&metrics),
            )
            .with_tick_interval(std::time::Duration::from_millis(config.tick_interval_ms)),
        );

        let rate_limiter = Arc::new(RateLimiter::new(config.rate_limit()));

        Self {
            config,
            store,
            cache,
            bus,
            metrics,
            health,
            scheduler,
            access: Arc::new(AccessControl::new()),
            rate_limiter,
            scanner: DiscoveryScanner::new(Arc::clone(&driver)),
            forker: SessionForker::new(Arc::clone(&driver)),
            driver,
        }
    }

    /// Rebuild the cache from the store and repair crash leftovers, then
    /// start the background loops
    pub async fn start(&self) -> AnyResult<()> {
        self.cache
            .rebuild_from_store(&self.store)
            .context("failed to rebuild cache")?;
        self.scheduler.recover().await;

        tokio::spawn(Arc::clone(&self.scheduler).run());
        Arc::clone(&self.bus).spawn_heartbeat();
        info!("orchestrator started");
        Ok(())
    }

    /// Stop background loops and interrupt in-flight dispatches
    pub fn shutdown(&self) {
        info!("orchestrator shutting down");
        self.scheduler.shutdown();
    }

    // ----- agent operations -----

    /// Create a new idle agent
    pub fn create_agent(
        &self,
        name: &str,
        kind: AgentKind,
        capabilities: Vec<String>,
        config: serde_json::Value,
    ) -> Result<Agent> {
        validate_agent_name(name)?;
        validate_capabilities(&capabilities)?;
        if self.cache.all_agents().iter().any(|a| a.name == name) {
            return Err(MindmuxError::validation(format!(
                "agent name '{}' is already in use",
                name
            )));
        }

        let agent = Agent::new(name.to_string(), kind, capabilities).with_config(config);
        self.store.insert_agent(&agent)?;
        self.cache.set_agent(agent.clone());
        self.bus
            .agent_status_changed(&agent.id, "none", AgentStatus::Idle.as_str());
        info!(agent = %agent.id, name = %agent.name, "agent created");
        Ok(agent)
    }

    /// Spawn the agent's CLI in a fresh multiplexer session and bind a
    /// session record to it
    pub async fn start_agent(&self, agent_id: &str, work_dir: &str) -> Result<Session> {
        let agent = self
            .cache
            .get_agent(agent_id)
            .ok_or_else(|| MindmuxError::not_found("Agent", agent_id))?;
        if agent.status == AgentStatus::Stopped {
            return Err(MindmuxError::validation(format!(
                "agent {} is stopped",
                agent_id
            )));
        }

        let session_name = format!("mindmux-{}", agent.name);
        let adapter = adapter_for(agent.kind, Arc::clone(&self.driver));
        adapter
            .spawn_process(&session_name, work_dir, &agent.config)
            .await?;

        let pid = self
            .driver
            .list_panes(&session_name)
            .ok()
            .and_then(|panes| panes.first().and_then(|p| p.pid));

        let mut session = Session::new(agent.id.clone(), session_name);
        session.process_id = pid;
        self.store.insert_session(&session)?;
        self.cache.set_session(session.clone());
        self.scheduler.register_adapter(&agent.id, adapter);
        info!(agent = %agent.id, session = %session.id, "agent session started");
        Ok(session)
    }

    /// Stop an agent: cancel its running task, terminate the tool, end the
    /// session binding and mark the agent terminally stopped
    pub async fn stop_agent(&self, agent_id: &str) -> Result<Agent> {
        let mut agent = self
            .cache
            .get_agent(agent_id)
            .ok_or_else(|| MindmuxError::not_found("Agent", agent_id))?;
        if agent.status == AgentStatus::Stopped {
            return Ok(agent);
        }

        if let Some(running) = self
            .cache
            .tasks_by_status(TaskStatus::Running)
            .into_iter()
            .find(|t| t.assigned_agent_id.as_deref() == Some(agent_id))
        {
            if let Err(e) = self.scheduler.cancel_task(&running.id).await {
                warn!(task = %running.id, error = %e, "failed to cancel task while stopping agent");
            }
        }

        for mut session in self.cache.sessions_by_agent(agent_id) {
            if session.status != crate::model::SessionStatus::Active {
                continue;
            }
            let adapter = adapter_for(agent.kind, Arc::clone(&self.driver));
            if let Err(e) = adapter.terminate(&session.multiplexer_session_name).await {
                warn!(session = %session.id, error = %e, "graceful terminate failed");
            }
            if let Err(e) = self.driver.kill_session(&session.multiplexer_session_name) {
                warn!(session = %session.id, error = %e, "kill-session failed");
            }
            session.end();
            self.store.update_session(&session)?;
            self.cache.set_session(session);
        }

        self.scheduler.unregister_adapter(agent_id);

        let old = agent.status;
        agent.status = AgentStatus::Stopped;
        agent.updated_at = Utc::now();
        self.store.update_agent(&agent)?;
        self.cache.set_agent(agent.clone());
        self.bus
            .agent_status_changed(agent_id, old.as_str(), AgentStatus::Stopped.as_str());
        info!(agent = %agent_id, "agent stopped");
        Ok(agent)
    }

    /// Permanently remove an agent and its session history
    ///
    /// Refused while the agent is executing a task or still holds a live
    /// session; cancel or stop first. Terminal tasks keep their rows with
    /// the agent reference detached.
    pub fn remove_agent(&self, agent_id: &str) -> Result<Agent> {
        let agent = self
            .cache
            .get_agent(agent_id)
            .ok_or_else(|| MindmuxError::not_found("Agent", agent_id))?;

        if let Some(running) = self
            .cache
            .tasks_by_status(TaskStatus::Running)
            .into_iter()
            .find(|t| t.assigned_agent_id.as_deref() == Some(agent_id))
        {
            return Err(MindmuxError::validation(format!(
                "agent {} is executing task {}; cancel it or stop the agent first",
                agent_id, running.id
            )));
        }
        if self.cache.active_session_for_agent(agent_id).is_some() {
            return Err(MindmuxError::validation(format!(
                "agent {} still has a live session; stop it first",
                agent_id
            )));
        }

        self.scheduler.unregister_adapter(agent_id);
        self.store.delete_agent(agent_id)?;

        // mirror the store cascade so the cache stays a consistent subset
        for session in self.cache.sessions_by_agent(agent_id) {
            self.cache.delete_session(&session.id);
        }
        for mut task in self.cache.all_tasks() {
            if task.assigned_agent_id.as_deref() == Some(agent_id) {
                task.assigned_agent_id = None;
                self.cache.set_task(task);
            }
        }
        self.cache.delete_agent(agent_id);

        self.bus
            .agent_status_changed(agent_id, agent.status.as_str(), "none");
        info!(agent = %agent_id, "agent removed");
        Ok(agent)
    }

    // ----- task operations -----

    /// Queue a new pending task and wake the scheduler
    #[allow(clippy::too_many_arguments)]
    pub fn queue_task(
        &self,
        prompt: &str,
        required_capabilities: Vec<String>,
        priority: i64,
        depends_on: Vec<String>,
        max_retries: u32,
        timeout_ms: Option<u64>,
    ) -> Result<Task> {
        validate_prompt(prompt)?;
        for cap in &required_capabilities {
            if !crate::model::CAPABILITIES.contains(&cap.as_str()) {
                return Err(MindmuxError::validation(format!(
                    "unknown capability '{}'",
                    cap
                )));
            }
        }

        let mut task = Task::new(prompt.to_string(), required_capabilities, priority)
            .with_depends_on(depends_on)
            .with_max_retries(max_retries);
        if let Some(timeout_ms) = timeout_ms {
            task = task.with_timeout_ms(timeout_ms);
        }

        self.store.insert_task(&task)?;
        self.cache.set_task(task.clone());
        self.bus.task_queued(&task);
        self.scheduler.wake();
        info!(task = %task.id, priority = task.priority, "task queued");
        Ok(task)
    }

    /// Cancel a pending or running task
    pub async fn cancel_task(&self, task_id: &str) -> Result<Task> {
        self.scheduler.cancel_task(task_id).await
    }

    // ----- pane operations -----

    /// Snapshot of AI tools found across all multiplexer panes
    pub fn discover(&self) -> Result<Vec<DiscoveredAgent>> {
        Ok(self.scanner.scan()?)
    }

    /// Fork the conversation in `pane_id` into a new pane
    pub async fn fork_session(&self, pane_id: &str) -> Result<String> {
        let source = self
            .scanner
            .scan()?
            .into_iter()
            .find(|d| d.pane_id == pane_id)
            .ok_or_else(|| MindmuxError::not_found("Pane", pane_id))?;
        self.forker.fork(&source).await
    }

    pub fn get_agent(&self, id: &str) -> Option<Agent> {
        self.cache.get_agent(id)
    }

    pub fn get_task(&self, id: &str) -> Option<Task> {
        self.cache.get_task(id)
    }
}
