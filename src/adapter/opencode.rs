use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use super::CliAdapter;
use crate::model::AgentKind;
use crate::tmux::Multiplexer;

/// Adapter for the OpenCode CLI, also used for `gpt4` agents
pub struct OpenCodeAdapter {
    driver: Arc<dyn Multiplexer>,
}

impl OpenCodeAdapter {
    pub fn new(driver: Arc<dyn Multiplexer>) -> Self {
        Self { driver }
    }
}

#[async_trait]
impl CliAdapter for OpenCodeAdapter {
    fn kind(&self) -> AgentKind {
        AgentKind::Opencode
    }

    fn command_name(&self) -> &'static str {
        "opencode"
    }

    fn install_instructions(&self) -> &'static str {
        "Install OpenCode: npm install -g opencode-ai"
    }

    fn ready_markers(&self) -> &'static [&'static str] {
        &["opencode", "ready"]
    }

    fn startup_timeout(&self) -> Duration {
        Duration::from_secs(4)
    }

    fn exit_command(&self) -> &'static str {
        "/exit"
    }

    fn driver(&self) -> &Arc<dyn Multiplexer> {
        &self.driver
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::testing::ScriptedDriver;

    #[test]
    fn test_profile() {
        let a = OpenCodeAdapter::new(Arc::new(ScriptedDriver::new(vec![""])));
        assert_eq!(a.kind(), AgentKind::Opencode);
        assert_eq!(a.startup_timeout(), Duration::from_secs(4));
        assert!(a.is_ready_output("opencode v0.3"));
        assert!(a.is_ready_output("READY"));
    }
}
