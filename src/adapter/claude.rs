use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use super::CliAdapter;
use crate::model::AgentKind;
use crate::tmux::Multiplexer;

/// Adapter for the Claude Code CLI
pub struct ClaudeAdapter {
    driver: Arc<dyn Multiplexer>,
}

impl ClaudeAdapter {
    pub fn new(driver: Arc<dyn Multiplexer>) -> Self {
        Self { driver }
    }
}

#[async_trait]
impl CliAdapter for ClaudeAdapter {
    fn kind(&self) -> AgentKind {
        AgentKind::Claude
    }

    fn command_name(&self) -> &'static str {
        "claude"
    }

    fn install_instructions(&self) -> &'static str {
        "Install Claude Code: npm install -g @anthropic-ai/claude-code"
    }

    fn ready_markers(&self) -> &'static [&'static str] {
        &["claude", ">>>"]
    }

    fn startup_timeout(&self) -> Duration {
        Duration::from_secs(5)
    }

    fn exit_command(&self) -> &'static str {
        "/exit"
    }

    fn driver(&self) -> &Arc<dyn Multiplexer> {
        &self.driver
    }
}
