use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Status of a binding between an agent and a live multiplexer pane
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Active,
    Ended,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Active => "active",
            SessionStatus::Ended => "ended",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "active" => Some(SessionStatus::Active),
            "ended" => Some(SessionStatus::Ended),
            _ => None,
        }
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A binding between an agent and a live multiplexer session
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: String,
    pub agent_id: String,

    /// Name of the multiplexer session hosting the agent's pane
    pub multiplexer_session_name: String,

    pub status: SessionStatus,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,

    /// Foreground process id when knowable
    pub process_id: Option<u32>,
}

impl Session {
    /// Create a new active session binding
    pub fn new(agent_id: String, multiplexer_session_name: String) -> Self {
        Self {
            id: format!("session-{}", Uuid::new_v4()),
            agent_id,
            multiplexer_session_name,
            status: SessionStatus::Active,
            started_at: Utc::now(),
            ended_at: None,
            process_id: None,
        }
    }

    pub fn with_process_id(mut self, pid: u32) -> Self {
        self.process_id = Some(pid);
        self
    }

    /// Mark this session ended now
    pub fn end(&mut self) {
        self.status = SessionStatus::Ended;
        self.ended_at = Some(Utc::now());
    }
}
