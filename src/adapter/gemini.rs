use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use super::CliAdapter;
use crate::model::AgentKind;
use crate::tmux::Multiplexer;

/// Adapter for the Gemini CLI
pub struct GeminiAdapter {
    driver: Arc<dyn Multiplexer>,
}

impl GeminiAdapter {
    pub fn new(driver: Arc<dyn Multiplexer>) -> Self {
        Self { driver }
    }
}

#[async_trait]
impl CliAdapter for GeminiAdapter {
    fn kind(&self) -> AgentKind {
        AgentKind::Gemini
    }

    fn command_name(&self) -> &'static str {
        "gemini"
    }

    fn install_instructions(&self) -> &'static str {
        "Install Gemini CLI: npm install -g @google/gemini-cli"
    }

    fn ready_markers(&self) -> &'static [&'static str] {
        &["gemini", ">"]
    }

    fn startup_timeout(&self) -> Duration {
        Duration::from_secs(3)
    }

    fn exit_command(&self) -> &'static str {
        "/quit"
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
        let a = GeminiAdapter::new(Arc::new(ScriptedDriver::new(vec![""])));
        assert_eq!(a.kind(), AgentKind::Gemini);
        assert_eq!(a.startup_timeout(), Duration::from_secs(3));
        assert!(a.is_ready_output("gemini ready\n> "));
    }
}
