use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Kind of AI CLI tool an agent wraps
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum AgentKind {
    Claude,
    Gemini,
    Opencode,
    Gpt4,
}

impl AgentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentKind::Claude => "claude",
            AgentKind::Gemini => "gemini",
            AgentKind::Opencode => "opencode",
            AgentKind::Gpt4 => "gpt4",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "claude" => Some(AgentKind::Claude),
            "gemini" => Some(AgentKind::Gemini),
            "opencode" => Some(AgentKind::Opencode),
            "gpt4" => Some(AgentKind::Gpt4),
            _ => None,
        }
    }
}

impl std::fmt::Display for AgentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Current status of an agent
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum AgentStatus {
    /// Available for task assignment
    Idle,
    /// Working on exactly one running task
    Busy,
    /// Last dispatch hit an unrecoverable multiplexer failure
    Error,
    /// Terminal state after explicit removal
    Stopped,
}

impl AgentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentStatus::Idle => "idle",
            AgentStatus::Busy => "busy",
            AgentStatus::Error => "error",
            AgentStatus::Stopped => "stopped",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "idle" => Some(AgentStatus::Idle),
            "busy" => Some(AgentStatus::Busy),
            "error" => Some(AgentStatus::Error),
            "stopped" => Some(AgentStatus::Stopped),
            _ => None,
        }
    }
}

impl std::fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A long-running external AI CLI under control of the orchestrator
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Agent {
    /// Unique agent identifier
    pub id: String,

    /// Operator-chosen name, unique across the fleet
    pub name: String,

    /// Which CLI tool this agent drives
    #[serde(rename = "type")]
    pub kind: AgentKind,

    /// Capabilities this agent advertises
    pub capabilities: Vec<String>,

    /// Opaque per-tool configuration
    pub config: serde_json::Value,

    /// Current status
    pub status: AgentStatus,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Agent {
    /// Create a new idle agent
    pub fn new(name: String, kind: AgentKind, capabilities: Vec<String>) -> Self {
        let now = Utc::now();
        Self {
            id: format!("agent-{}", Uuid::new_v4()),
            name,
            kind,
            capabilities,
            config: serde_json::json!({}),
            status: AgentStatus::Idle,
            created_at: now,
            updated_at: now,
        }
    }

    /// Attach opaque tool configuration
    pub fn with_config(mut self, config: serde_json::Value) -> Self {
        self.config = config;
        self
    }

    /// Whether this agent can execute a task requiring `required`
    pub fn covers(&self, required: &[String]) -> bool {
        required
            .iter()
            .all(|cap| self.capabilities.iter().any(|have| have == cap))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_agent_creation() {
        let agent = Agent::new(
            "builder".to_string(),
            AgentKind::Claude,
            vec!["code-generation".to_string()],
        );

        assert!(agent.id.starts_with("agent-"));
        assert_eq!(agent.status, AgentStatus::Idle);
        assert_eq!(agent.kind, AgentKind::Claude);
        assert_eq!(agent.created_at, agent.updated_at);
    }

    #[test]
    fn test_capability_coverage() {
        let agent = Agent::new(
            "reviewer".to_string(),
            AgentKind::Gemini,
            vec!["code-review".to_string(), "debugging".to_string()],
        );

        assert!(agent.covers(&["code-review".to_string()]));
        assert!(agent.covers(&["code-review".to_string(), "debugging".to_string()]));
        assert!(!agent.covers(&["testing".to_string()]));
        assert!(agent.covers(&[]));
    }

    #[test]
    fn test_kind_round_trip() {
        for kind in [
            AgentKind::Claude,
            AgentKind::Gemini,
            AgentKind::Opencode,
            AgentKind::Gpt4,
        ] {
            assert_eq!(AgentKind::parse(kind.as_str()), Some(kind));
        }
        assert_eq!(AgentKind::parse("cursor"), None);
    }

    #[test]
    fn test_status_round_trip() {
        for status in [
            AgentStatus::Idle,
            AgentStatus::Busy,
            AgentStatus::Error,
            AgentStatus::Stopped,
        ] {
            assert_eq!(AgentStatus::parse(status.as_str()), Some(status));
        }
    }

    #[test]
    fn test_serde_field_names() {
        let agent = Agent::new(
            "n1".to_string(),
            AgentKind::Gpt4,
            vec!["testing".to_string()],
        );
        let json = serde_json::to_value(&agent).unwrap();
        assert_eq!(json["type"], "gpt4");
        assert_eq!(json["status"], "idle");
        assert!(json["createdAt"].is_string());
    }

    #[test]
    fn test_serde_round_trip_identity() {
        let agent = Agent::new(
            "n1".to_string(),
            AgentKind::Claude,
            vec!["debugging".to_string()],
        )
        .with_config(serde_json::json!({"model": "opus"}));

        let json = serde_json::to_string(&agent).unwrap();
        let parsed: Agent = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.id, agent.id);
        assert_eq!(parsed.name, agent.name);
        assert_eq!(parsed.kind, agent.kind);
        assert_eq!(parsed.capabilities, agent.capabilities);
        assert_eq!(parsed.config, agent.config);
        assert_eq!(parsed.status, agent.status);
        assert_eq!(parsed.created_at, agent.created_at);
    }
}
