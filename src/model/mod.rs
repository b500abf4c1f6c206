//! Core entities of the orchestration engine
//!
//! Identifiers are opaque strings. Timestamps are `DateTime<Utc>` in memory,
//! epoch seconds in the durable store, and ISO-8601 at the API boundary.

pub mod agent;
pub mod audit;
pub mod session;
pub mod task;

pub use agent::{Agent, AgentKind, AgentStatus};
pub use audit::{AuditEntry, AuditResult};
pub use session::{Session, SessionStatus};
pub use task::{Task, TaskStatus};

use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::{MindmuxError, Result};

/// Closed vocabulary of capabilities an agent can advertise and a task can
/// require
pub const CAPABILITIES: &[&str] = &[
    "code-generation",
    "code-review",
    "debugging",
    "testing",
    "documentation",
    "refactoring",
    "planning",
    "research",
];

/// Maximum prompt size accepted from callers
pub const MAX_PROMPT_BYTES: usize = 100 * 1024;

static AGENT_NAME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9_-]{1,255}$").expect("valid agent name regex"));

/// Validate an agent name against the allowed charset and length
pub fn validate_agent_name(name: &str) -> Result<()> {
    if AGENT_NAME_RE.is_match(name) {
        Ok(())
    } else {
        Err(MindmuxError::validation(format!(
            "agent name must match [A-Za-z0-9_-]{{1,255}}, got '{}'",
            name
        )))
    }
}

/// Validate a capability list: non-empty and drawn from [`CAPABILITIES`]
pub fn validate_capabilities(capabilities: &[String]) -> Result<()> {
    if capabilities.is_empty() {
        return Err(MindmuxError::validation("capability list must not be empty"));
    }
    for cap in capabilities {
        if !CAPABILITIES.contains(&cap.as_str()) {
            return Err(MindmuxError::validation(format!(
                "unknown capability '{}'",
                cap
            )));
        }
    }
    Ok(())
}

/// Validate a task prompt: non-empty and within the size cap
pub fn validate_prompt(prompt: &str) -> Result<()> {
    if prompt.trim().is_empty() {
        return Err(MindmuxError::validation("prompt must not be empty"));
    }
    if prompt.len() > MAX_PROMPT_BYTES {
        return Err(MindmuxError::validation(format!(
            "prompt exceeds {} bytes",
            MAX_PROMPT_BYTES
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_agent_name_validation() {
        assert!(validate_agent_name("worker-1").is_ok());
        assert!(validate_agent_name("Agent_42").is_ok());
        assert!(validate_agent_name(&"a".repeat(255)).is_ok());

        assert!(validate_agent_name("").is_err());
        assert!(validate_agent_name("has space").is_err());
        assert!(validate_agent_name("semi;colon").is_err());
        assert!(validate_agent_name(&"a".repeat(256)).is_err());
    }

    #[test]
    fn test_capability_validation() {
        let good = vec!["code-generation".to_string(), "testing".to_string()];
        assert!(validate_capabilities(&good).is_ok());

        assert!(validate_capabilities(&[]).is_err());
        let bad = vec!["mind-reading".to_string()];
        assert!(validate_capabilities(&bad).is_err());
    }

    #[test]
    fn test_prompt_validation() {
        assert!(validate_prompt("hello").is_ok());
        assert!(validate_prompt("").is_err());
        assert!(validate_prompt("   ").is_err());
        assert!(validate_prompt(&"x".repeat(MAX_PROMPT_BYTES + 1)).is_err());
        assert!(validate_prompt(&"x".repeat(MAX_PROMPT_BYTES)).is_ok());
    }
}
