//! Forking a live conversation into a new pane
//!
//! Best-effort: the source pane's scrollback is parsed into turns by line
//! markers, compressed into a context prologue, and replayed into a fresh
//! instance of the tool started next to the original. Turn splitting is
//! intentionally lossy on unusual output.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::adapter::adapter_for;
use crate::discovery::DiscoveredAgent;
use crate::error::{MindmuxError, Result};
use crate::model::AgentKind;
use crate::tmux::Multiplexer;
use crate::utils::strip_ansi;

/// Scrollback lines captured from the source pane
pub const CAPTURE_LINES: usize = 10_000;

/// Character budget for the context prologue
pub const MAX_CONTEXT_CHARS: usize = 4_000;

/// Turns kept when the full transcript exceeds the budget
pub const RECENT_TURNS: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TurnRole {
    User,
    Assistant,
}

/// One conversational turn recovered from scrollback
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    pub role: TurnRole,
    pub text: String,
}

/// Split scrollback into turns by line-leading markers
///
/// `>` / `User:` open a user turn, `AI:` / `Assistant:` open an assistant
/// turn; other lines accrue to the current turn. Lines before the first
/// marker are dropped.
pub fn parse_turns(scrollback: &str) -> Vec<Turn> {
    let mut turns: Vec<Turn> = Vec::new();

    for raw_line in scrollback.lines() {
        let line = raw_line.trim_end();

        let (role, content) = if let Some(rest) = line.strip_prefix("User:") {
            (Some(TurnRole::User), rest.trim_start())
        } else if let Some(rest) = line.strip_prefix('>') {
            (Some(TurnRole::User), rest.trim_start())
        } else if let Some(rest) = line.strip_prefix("Assistant:") {
            (Some(TurnRole::Assistant), rest.trim_start())
        } else if let Some(rest) = line.strip_prefix("AI:") {
            (Some(TurnRole::Assistant), rest.trim_start())
        } else {
            (None, line)
        };

        match role {
            Some(role) => turns.push(Turn {
                role,
                text: content.to_string(),
            }),
            None => {
                if let Some(current) = turns.last_mut() {
                    if !current.text.is_empty() {
                        current.text.push('\n');
                    }
                    current.text.push_str(line);
                }
                // no current turn yet: drop the line
            }
        }
    }

    // trim whitespace-only turns left by prompt echoes
    turns.retain(|t| !t.text.trim().is_empty());
    turns
}

fn render_turns(turns: &[Turn], header: &str) -> String {
    let mut out = String::from(header);
    out.push('\n');
    for turn in turns {
        let label = match turn.role {
            TurnRole::User => "User",
            TurnRole::Assistant => "Assistant",
        };
        out.push_str(label);
        out.push_str(": ");
        out.push_str(&turn.text);
        out.push('\n');
    }
    out.push_str("\nPlease continue from this context.");
    out
}

/// Format the replayable context prologue within the character budget
///
/// Falls back to the most recent turns when the full transcript is over
/// budget, then hard-truncates from the front as a last resort.
pub fn build_context_prologue(turns: &[Turn]) -> String {
    let full = render_turns(turns, "Previous conversation:");
    if full.len() <= MAX_CONTEXT_CHARS {
        return full;
    }

    let recent_start = turns.len().saturating_sub(RECENT_TURNS);
    let mut recent = render_turns(&turns[recent_start..], "Recent conversation:");
    if recent.len() > MAX_CONTEXT_CHARS {
        let cut = recent.len() - MAX_CONTEXT_CHARS;
        // stay on a char boundary
        let mut cut_at = cut;
        while !recent.is_char_boundary(cut_at) {
            cut_at += 1;
        }
        recent = recent.split_off(cut_at);
    }
    recent
}

/// Clones a running conversation into a new pane
pub struct SessionForker {
    driver: Arc<dyn Multiplexer>,
}

impl SessionForker {
    pub fn new(driver: Arc<dyn Multiplexer>) -> Self {
        Self { driver }
    }

    /// Fork `source` into a fresh pane; returns the new pane id
    pub async fn fork(&self, source: &DiscoveredAgent) -> Result<String> {
        let kind = AgentKind::parse(&source.tool_type).ok_or_else(|| {
            MindmuxError::validation(format!(
                "tool '{}' cannot be forked",
                source.tool_type
            ))
        })?;

        let scrollback = self.driver.capture_output(&source.pane_id, CAPTURE_LINES)?;
        let turns = parse_turns(&strip_ansi(&scrollback));
        let prologue = build_context_prologue(&turns);
        info!(
            pane = %source.pane_id,
            turns = turns.len(),
            "forking session"
        );

        let new_pane = self.driver.split_pane(&source.pane_id, true)?;

        match self.bootstrap(kind, source, &new_pane, &prologue).await {
            Ok(()) => Ok(new_pane),
            Err(e) => {
                warn!(pane = %new_pane, error = %e, "fork bootstrap failed, interrupting new pane");
                let _ = self.driver.send_control(&new_pane, "C-c");
                Err(e)
            }
        }
    }

    async fn bootstrap(
        &self,
        kind: AgentKind,
        source: &DiscoveredAgent,
        new_pane: &str,
        prologue: &str,
    ) -> Result<()> {
        let adapter = adapter_for(kind, Arc::clone(&self.driver));

        // start the tool in the original working directory
        self.driver
            .send_keys(new_pane, &format!("cd {}", source.project_path))?;
        self.driver.send_control(new_pane, "Enter")?;
        let start = adapter.start_command(&serde_json::json!({}));
        self.driver.send_keys(new_pane, &start)?;
        self.driver.send_control(new_pane, "Enter")?;

        adapter.await_ready(new_pane).await?;

        self.driver.send_keys(new_pane, prologue)?;
        self.driver.send_control(new_pane, "Enter")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::testing::ScriptedDriver;
    use crate::discovery::DetectedStatus;

    fn source(tool: &str) -> DiscoveredAgent {
        DiscoveredAgent {
            id: "%1".to_string(),
            session_name: "work".to_string(),
            pane_id: "%1".to_string(),
            window_id: "@1".to_string(),
            tool_type: tool.to_string(),
            process_name: tool.to_string(),
            project_path: "/home/user/project".to_string(),
            status: DetectedStatus::Idle,
            last_updated: chrono::Utc::now(),
            active_mcps: Vec::new(),
        }
    }

    #[tokio::test]
    async fn test_fork_replays_context_into_new_pane() {
        let driver = Arc::new(ScriptedDriver::new(vec![
            "> build the parser\nAssistant: done, see parser.rs\n", // scrollback capture
            "claude>",                                              // new pane readiness
        ]));
        let forker = SessionForker::new(driver.clone() as Arc<dyn Multiplexer>);

        let new_pane = forker.fork(&source("claude")).await.unwrap();
        assert_eq!(new_pane, "%99");

        let sent: Vec<String> = driver.sent_log().into_iter().map(|(_, text)| text).collect();
        assert!(sent.contains(&"cd /home/user/project".to_string()));
        assert!(sent.contains(&"claude".to_string()));
        let prologue = sent
            .iter()
            .find(|s| s.starts_with("Previous conversation:"))
            .expect("prologue prompt was sent");
        assert!(prologue.contains("User: build the parser"));
        assert!(prologue.contains("Assistant: done, see parser.rs"));
        assert!(prologue.ends_with("Please continue from this context."));
    }

    #[tokio::test]
    async fn test_fork_rejects_unknown_tool() {
        let driver = Arc::new(ScriptedDriver::new(vec![""]));
        let forker = SessionForker::new(driver as Arc<dyn Multiplexer>);

        let err = forker.fork(&source("cursor")).await.unwrap_err();
        assert!(matches!(err, MindmuxError::Validation(_)));
    }

    #[test]
    fn test_parse_alternating_turns() {
        let scrollback = "\
claude 1.2 started
> write a hello world
Assistant: Sure, here it is:
fn main() {}
> now in python
AI: print(\"hello\")
";
        let turns = parse_turns(scrollback);
        assert_eq!(turns.len(), 4);
        assert_eq!(turns[0].role, TurnRole::User);
        assert_eq!(turns[0].text, "write a hello world");
        assert_eq!(turns[1].role, TurnRole::Assistant);
        assert_eq!(turns[1].text, "Sure, here it is:\nfn main() {}");
        assert_eq!(turns[2].text, "now in python");
        assert_eq!(turns[3].role, TurnRole::Assistant);
    }

    #[test]
    fn test_parse_user_prefix_variants() {
        let turns = parse_turns("User: via label\n> via chevron\n");
        assert_eq!(turns.len(), 2);
        assert!(turns.iter().all(|t| t.role == TurnRole::User));
    }

    #[test]
    fn test_parse_drops_preamble_and_blank_turns() {
        let turns = parse_turns("banner line\nno marker here\n> \n> real question\n");
        assert_eq!(turns.len(), 1);
        assert_eq!(turns[0].text, "real question");
    }

    #[test]
    fn test_prologue_under_budget() {
        let turns = vec![
            Turn {
                role: TurnRole::User,
                text: "hi".to_string(),
            },
            Turn {
                role: TurnRole::Assistant,
                text: "hello".to_string(),
            },
        ];
        let prologue = build_context_prologue(&turns);
        assert!(prologue.starts_with("Previous conversation:"));
        assert!(prologue.contains("User: hi"));
        assert!(prologue.contains("Assistant: hello"));
        assert!(prologue.ends_with("Please continue from this context."));
        assert!(prologue.len() <= MAX_CONTEXT_CHARS);
    }

    #[test]
    fn test_prologue_falls_back_to_recent_turns() {
        let turns: Vec<Turn> = (0..40)
            .map(|i| Turn {
                role: if i % 2 == 0 {
                    TurnRole::User
                } else {
                    TurnRole::Assistant
                },
                text: format!("turn {} {}", i, "x".repeat(200)),
            })
            .collect();

        let prologue = build_context_prologue(&turns);
        assert!(prologue.len() <= MAX_CONTEXT_CHARS);
        assert!(prologue.starts_with("Recent conversation:"));
        // oldest turns are gone, the most recent survives
        assert!(!prologue.contains("turn 0 "));
        assert!(prologue.contains("turn 39"));
        assert!(prologue.ends_with("Please continue from this context."));
    }

    #[test]
    fn test_prologue_hard_truncates_when_recent_still_over_budget() {
        let turns: Vec<Turn> = (0..12)
            .map(|i| Turn {
                role: TurnRole::User,
                text: format!("q{} {}", i, "y".repeat(400)),
            })
            .collect();
        let prologue = build_context_prologue(&turns);
        assert!(prologue.len() <= MAX_CONTEXT_CHARS);
        assert!(prologue.contains("q11"));
        assert!(!prologue.contains("q0 "));
        assert!(prologue.ends_with("Please continue from this context."));
    }
}
