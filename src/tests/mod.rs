//! Cross-module integration tests and shared fixtures

mod scheduler_tests;

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::adapter::testing::ScriptedDriver;
use crate::adapter::{CliAdapter, PromptOptions, PromptOutcome};
use crate::config::MindmuxConfig;
use crate::model::{AgentKind, AgentStatus, TaskStatus};
use crate::orchestrator::Orchestrator;
use crate::store::Store;
use crate::tmux::{Multiplexer, MultiplexerError};

/// Scripted dispatch behavior for integration scenarios
#[derive(Debug, Clone)]
pub(crate) enum MockBehavior {
    /// Respond successfully with this output
    Succeed(String),
    /// Report a deadline expiry (retryable)
    Timeout,
    /// Block until cancelled
    Hang,
}

/// Adapter stub that skips the terminal entirely
pub(crate) struct MockAdapter {
    driver: Arc<dyn Multiplexer>,
    behavior: MockBehavior,
    pub calls: AtomicU32,
}

impl MockAdapter {
    pub fn new(behavior: MockBehavior) -> Arc<Self> {
        Arc::new(Self {
            driver: Arc::new(ScriptedDriver::new(vec![""])),
            behavior,
            calls: AtomicU32::new(0),
        })
    }
}

#[async_trait]
impl CliAdapter for MockAdapter {
    fn kind(&self) -> AgentKind {
        AgentKind::Claude
    }

    fn command_name(&self) -> &'static str {
        "claude"
    }

    fn install_instructions(&self) -> &'static str {
        "test stub"
    }

    fn ready_markers(&self) -> &'static [&'static str] {
        &["claude"]
    }

    fn startup_timeout(&self) -> Duration {
        Duration::from_secs(1)
    }

    fn exit_command(&self) -> &'static str {
        "/exit"
    }

    fn driver(&self) -> &Arc<dyn Multiplexer> {
        &self.driver
    }

    async fn send_prompt(
        &self,
        _target: &str,
        _prompt: &str,
        opts: &PromptOptions,
    ) -> PromptOutcome {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.behavior {
            MockBehavior::Succeed(output) => PromptOutcome {
                success: true,
                output: output.clone(),
                duration_ms: 5,
                error: None,
                timed_out: false,
            },
            MockBehavior::Timeout => {
                tokio::time::sleep(Duration::from_millis(5)).await;
                PromptOutcome {
                    success: false,
                    output: String::new(),
                    duration_ms: opts.timeout.as_millis() as u64,
                    error: Some(format!("timeout after {:?} awaiting response", opts.timeout)),
                    timed_out: true,
                }
            }
            MockBehavior::Hang => {
                tokio::time::sleep(Duration::from_secs(60)).await;
                PromptOutcome {
                    success: false,
                    output: String::new(),
                    duration_ms: 60_000,
                    error: Some("hung".to_string()),
                    timed_out: true,
                }
            }
        }
    }

    async fn terminate(&self, _target: &str) -> Result<(), MultiplexerError> {
        Ok(())
    }
}

/// Orchestrator over an in-memory store and a scripted driver
pub(crate) fn fixture() -> Orchestrator {
    let driver: Arc<dyn Multiplexer> = Arc::new(ScriptedDriver::new(vec![""]));
    let store = Arc::new(Store::open_in_memory().expect("in-memory store"));
    Orchestrator::with_store(MindmuxConfig::default(), driver, store)
}

/// Create an agent and register a scripted adapter for it
pub(crate) fn agent_with_adapter(
    orch: &Orchestrator,
    name: &str,
    capabilities: &[&str],
    behavior: MockBehavior,
) -> (crate::model::Agent, Arc<MockAdapter>) {
    let agent = orch
        .create_agent(
            name,
            AgentKind::Claude,
            capabilities.iter().map(|c| c.to_string()).collect(),
            serde_json::json!({}),
        )
        .expect("agent creation");
    let adapter = MockAdapter::new(behavior);
    orch.scheduler
        .register_adapter(&agent.id, Arc::clone(&adapter) as Arc<dyn CliAdapter>);
    (agent, adapter)
}

/// Drive ticks until `done` observes the expected state or time runs out
pub(crate) async fn tick_until<F>(orch: &Orchestrator, mut done: F)
where
    F: FnMut(&Orchestrator) -> bool,
{
    for _ in 0..100 {
        orch.scheduler.tick().await;
        if done(orch) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not reached within tick budget");
}

/// Structural invariants that must hold after every quiescent state
pub(crate) fn assert_invariants(orch: &Orchestrator) {
    let agents = orch.cache.all_agents();
    let tasks = orch.cache.all_tasks();

    for task in &tasks {
        assert!(
            task.retry_count <= task.max_retries,
            "task {} exceeded retry bound",
            task.id
        );
        if task.status == TaskStatus::Running {
            let agent_id = task
                .assigned_agent_id
                .as_ref()
                .unwrap_or_else(|| panic!("running task {} has no agent", task.id));
            let agent = agents
                .iter()
                .find(|a| &a.id == agent_id)
                .unwrap_or_else(|| panic!("running task {} references missing agent", task.id));
            assert_eq!(
                agent.status,
                AgentStatus::Busy,
                "agent {} should be busy",
                agent.id
            );
        }
    }

    for agent in &agents {
        let running = tasks
            .iter()
            .filter(|t| {
                t.status == TaskStatus::Running
                    && t.assigned_agent_id.as_deref() == Some(agent.id.as_str())
            })
            .count();
        match agent.status {
            AgentStatus::Busy => assert_eq!(running, 1, "busy agent {} has {} running tasks", agent.id, running),
            _ => assert_eq!(running, 0, "non-busy agent {} has running tasks", agent.id),
        }
    }
}
