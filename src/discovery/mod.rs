//! Discovery of AI tools already running in multiplexer panes
//!
//! Walks every pane of every session, classifies foreground processes
//! against the known tool set and emits a snapshot with a heuristic
//! status read from recent scrollback.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::tmux::{Multiplexer, MultiplexerError};
use crate::utils::strip_ansi;

/// Foreground process names recognised as AI tools
pub const KNOWN_TOOLS: &[&str] = &["claude", "gemini", "opencode", "cursor", "aider", "codex"];

/// Scrollback lines inspected for status detection
const STATUS_WINDOW_LINES: usize = 20;

/// Heuristic pane status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DetectedStatus {
    Error,
    Processing,
    Waiting,
    Idle,
    Unknown,
}

/// One AI tool found in a pane
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscoveredAgent {
    /// Pane id doubles as the snapshot identifier
    pub id: String,
    pub session_name: String,
    pub pane_id: String,
    pub window_id: String,
    pub tool_type: String,
    pub process_name: String,
    pub project_path: String,
    pub status: DetectedStatus,
    pub last_updated: DateTime<Utc>,
    pub active_mcps: Vec<String>,
}

/// Classify a foreground process name against the known tool set
pub fn classify_tool(process_name: &str) -> Option<&'static str> {
    let lowered = process_name.to_lowercase();
    // strip any path prefix so `/usr/local/bin/claude` still matches
    let basename = lowered.rsplit('/').next().unwrap_or(&lowered);
    KNOWN_TOOLS
        .iter()
        .find(|tool| basename.starts_with(*tool))
        .copied()
}

/// Heuristic status detection over captured output
///
/// Checked in order: error markers, activity markers, a trailing prompt
/// character, then plain idle; blank output is unknown.
pub fn detect_status(output: &str) -> DetectedStatus {
    let cleaned = strip_ansi(output);
    let trimmed = cleaned.trim();
    if trimmed.is_empty() {
        return DetectedStatus::Unknown;
    }

    let lowered = trimmed.to_lowercase();
    if lowered.contains("error")
        || lowered.contains("traceback")
        || lowered.contains("fatal")
        || lowered.contains("exception")
    {
        return DetectedStatus::Error;
    }
    if lowered.contains("thinking")
        || lowered.contains("working")
        || lowered.contains("processing")
        || lowered.contains("esc to interrupt")
        || lowered.ends_with("...")
    {
        return DetectedStatus::Processing;
    }

    let last_line = trimmed.lines().last().unwrap_or("").trim_end();
    if last_line.ends_with('>')
        || last_line.ends_with('❯')
        || last_line.ends_with('$')
        || last_line.ends_with('?')
    {
        return DetectedStatus::Waiting;
    }

    DetectedStatus::Idle
}

/// Enumerates panes and reports the AI tools found in them
pub struct DiscoveryScanner {
    driver: Arc<dyn Multiplexer>,
}

impl DiscoveryScanner {
    pub fn new(driver: Arc<dyn Multiplexer>) -> Self {
        Self { driver }
    }

    /// Snapshot of every recognised tool across all sessions
    pub fn scan(&self) -> Result<Vec<DiscoveredAgent>, MultiplexerError> {
        let mut discovered = Vec::new();

        for session in self.driver.list_sessions()? {
            let panes = match self.driver.list_panes(&session.name) {
                Ok(panes) => panes,
                Err(e) => {
                    // session may have died between list calls
                    tracing::debug!(session = %session.name, error = %e, "skipping session");
                    continue;
                }
            };

            for pane in panes {
                let Some(tool) = classify_tool(&pane.current_command) else {
                    continue;
                };

                let status = self
                    .driver
                    .capture_output(&pane.id, STATUS_WINDOW_LINES)
                    .map(|out| detect_status(&out))
                    .unwrap_or(DetectedStatus::Unknown);

                discovered.push(DiscoveredAgent {
                    id: pane.id.clone(),
                    session_name: session.name.clone(),
                    pane_id: pane.id,
                    window_id: pane.window_id,
                    tool_type: tool.to_string(),
                    process_name: pane.current_command,
                    project_path: pane.current_path,
                    status,
                    last_updated: Utc::now(),
                    active_mcps: Vec::new(),
                });
            }
        }

        Ok(discovered)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_known_tools() {
        assert_eq!(classify_tool("claude"), Some("claude"));
        assert_eq!(classify_tool("/usr/local/bin/claude"), Some("claude"));
        assert_eq!(classify_tool("aider"), Some("aider"));
        assert_eq!(classify_tool("CODEX"), Some("codex"));
        assert_eq!(classify_tool("bash"), None);
        assert_eq!(classify_tool("vim"), None);
    }

    #[test]
    fn test_detect_error_takes_precedence() {
        assert_eq!(
            detect_status("Thinking...\nERROR: api quota exhausted"),
            DetectedStatus::Error
        );
        assert_eq!(
            detect_status("Traceback (most recent call last):"),
            DetectedStatus::Error
        );
    }

    #[test]
    fn test_detect_processing() {
        assert_eq!(detect_status("Thinking about your request"), DetectedStatus::Processing);
        assert_eq!(detect_status("compiling..."), DetectedStatus::Processing);
        assert_eq!(
            detect_status("Working (esc to interrupt)"),
            DetectedStatus::Processing
        );
    }

    #[test]
    fn test_detect_waiting_prompt() {
        assert_eq!(detect_status("claude 1.2\n> "), DetectedStatus::Waiting);
        assert_eq!(detect_status("done\nuser@host $"), DetectedStatus::Waiting);
        assert_eq!(detect_status("Continue? "), DetectedStatus::Waiting);
    }

    #[test]
    fn test_detect_idle_and_unknown() {
        assert_eq!(detect_status("finished writing output."), DetectedStatus::Idle);
        assert_eq!(detect_status(""), DetectedStatus::Unknown);
        assert_eq!(detect_status("   \n  "), DetectedStatus::Unknown);
    }

    #[test]
    fn test_detect_strips_ansi_first() {
        assert_eq!(
            detect_status("\x1b[31mERROR\x1b[0m something"),
            DetectedStatus::Error
        );
    }
}
