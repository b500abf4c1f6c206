use serde::{Deserialize, Serialize};
use std::process::{Command, Output, Stdio};

/// Error types for multiplexer operations
///
/// Command failures carry the invoked argv and the tail of stderr so the
/// scheduler and logs can tell which subprocess call went wrong.
#[derive(Debug, thiserror::Error)]
pub enum MultiplexerError {
    #[error("tmux not found or not installed")]
    NotInstalled,
    #[error("Session '{0}' not found")]
    SessionNotFound(String),
    #[error("Pane '{0}' not found")]
    PaneNotFound(String),
    #[error("Invalid input: {0}")]
    InvalidInput(String),
    #[error("tmux {argv:?} failed: {stderr}")]
    CommandFailed { argv: Vec<String>, stderr: String },
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Shell metacharacters rejected in identifiers and paths before they are
/// interpolated into multiplexer invocations
const SHELL_DENYLIST: &[char] = &[
    ';', '&', '|', '`', '$', '(', ')', '<', '>', '\'', '"', '\\', '\n', '\r',
];

/// How many trailing stderr bytes to keep on a failed invocation
const STDERR_TAIL: usize = 512;

/// Information about a multiplexer session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MuxSession {
    pub name: String,
    pub id: String,
    pub attached: bool,
    pub created: String,
}

/// Information about a single pane
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MuxPane {
    pub id: String,
    pub window_id: String,
    pub active: bool,
    pub current_path: String,
    pub current_command: String,
    pub pid: Option<u32>,
}

/// Operations the core needs from the terminal multiplexer
///
/// `TmuxDriver` is the production implementation; tests substitute fakes.
pub trait Multiplexer: Send + Sync {
    fn is_available(&self) -> bool;
    fn list_sessions(&self) -> Result<Vec<MuxSession>, MultiplexerError>;
    fn list_panes(&self, session: &str) -> Result<Vec<MuxPane>, MultiplexerError>;
    fn create_session(&self, name: &str, work_dir: &str) -> Result<(), MultiplexerError>;
    /// Split the target pane, returning the new pane id
    fn split_pane(&self, target: &str, horizontal: bool) -> Result<String, MultiplexerError>;
    /// Send literal text to a pane (no key-name interpretation)
    fn send_keys(&self, pane_id: &str, text: &str) -> Result<(), MultiplexerError>;
    /// Send a named key such as `Enter` or `C-c`
    fn send_control(&self, pane_id: &str, key: &str) -> Result<(), MultiplexerError>;
    /// Capture the most recent `line_count` lines of scrollback
    fn capture_output(&self, pane_id: &str, line_count: usize) -> Result<String, MultiplexerError>;
    fn get_working_directory(&self, pane_id: &str) -> Result<String, MultiplexerError>;
    fn get_process_name(&self, pane_id: &str) -> Result<String, MultiplexerError>;
    fn kill_session(&self, name: &str) -> Result<(), MultiplexerError>;
}

/// Thin wrapper over the tmux binary
pub struct TmuxDriver {
    binary: String,
}

impl TmuxDriver {
    pub fn new() -> Result<Self, MultiplexerError> {
        let driver = Self {
            binary: "tmux".to_string(),
        };
        let output = Command::new(&driver.binary)
            .arg("-V")
            .output()
            .map_err(|_| MultiplexerError::NotInstalled)?;
        if !output.status.success() {
            return Err(MultiplexerError::NotInstalled);
        }
        Ok(driver)
    }

    /// Reject identifiers and paths containing shell metacharacters
    fn validate_input(value: &str, what: &str) -> Result<(), MultiplexerError> {
        if value.is_empty() {
            return Err(MultiplexerError::InvalidInput(format!(
                "{} must not be empty",
                what
            )));
        }
        if let Some(bad) = value.chars().find(|c| SHELL_DENYLIST.contains(c)) {
            return Err(MultiplexerError::InvalidInput(format!(
                "{} contains forbidden character {:?}",
                what, bad
            )));
        }
        Ok(())
    }

    fn run(&self, args: &[&str]) -> Result<Output, MultiplexerError> {
        let output = Command::new(&self.binary)
            .args(args)
            .stdin(Stdio::null())
            .output()?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let tail_start = stderr.len().saturating_sub(STDERR_TAIL);
            return Err(MultiplexerError::CommandFailed {
                argv: args.iter().map(|s| s.to_string()).collect(),
                stderr: stderr[tail_start..].trim().to_string(),
            });
        }

        Ok(output)
    }

    fn session_exists(&self, name: &str) -> bool {
        Command::new(&self.binary)
            .args(["has-session", "-t", name])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map(|s| s.success())
            .unwrap_or(false)
    }
}

impl Multiplexer for TmuxDriver {
    fn is_available(&self) -> bool {
        Command::new(&self.binary)
            .arg("-V")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map(|s| s.success())
            .unwrap_or(false)
    }

    fn list_sessions(&self) -> Result<Vec<MuxSession>, MultiplexerError> {
        let output = self.run(&[
            "list-sessions",
            "-F",
            "#{session_name}|#{session_id}|#{session_attached}|#{session_created}",
        ]);

        // No server running means no sessions, not an error
        let output = match output {
            Ok(o) => o,
            Err(MultiplexerError::CommandFailed { stderr, .. })
                if stderr.contains("no server running") || stderr.contains("No such file") =>
            {
                return Ok(Vec::new())
            }
            Err(e) => return Err(e),
        };

        let text = String::from_utf8_lossy(&output.stdout);
        let mut sessions = Vec::new();
        for line in text.lines() {
            let parts: Vec<&str> = line.split('|').collect();
            if parts.len() >= 4 {
                sessions.push(MuxSession {
                    name: parts[0].to_string(),
                    id: parts[1].to_string(),
                    attached: parts[2] == "1",
                    created: parts[3].to_string(),
                });
            }
        }
        Ok(sessions)
    }

    fn list_panes(&self, session: &str) -> Result<Vec<MuxPane>, MultiplexerError> {
        Self::validate_input(session, "session name")?;
        if !self.session_exists(session) {
            return Err(MultiplexerError::SessionNotFound(session.to_string()));
        }

        let output = self.run(&[
            "list-panes",
            "-s",
            "-t",
            session,
            "-F",
            "#{pane_id}|#{window_id}|#{pane_active}|#{pane_current_path}|#{pane_current_command}|#{pane_pid}",
        ])?;

        let text = String::from_utf8_lossy(&output.stdout);
        let mut panes = Vec::new();
        for line in text.lines() {
            let parts: Vec<&str> = line.split('|').collect();
            if parts.len() >= 6 {
                panes.push(MuxPane {
                    id: parts[0].to_string(),
                    window_id: parts[1].to_string(),
                    active: parts[2] == "1",
                    current_path: parts[3].to_string(),
                    current_command: parts[4].to_string(),
                    pid: parts[5].parse().ok(),
                });
            }
        }
        Ok(panes)
    }

    fn create_session(&self, name: &str, work_dir: &str) -> Result<(), MultiplexerError> {
        Self::validate_input(name, "session name")?;
        Self::validate_input(work_dir, "working directory")?;

        if self.session_exists(name) {
            return Err(MultiplexerError::InvalidInput(format!(
                "session '{}' already exists",
                name
            )));
        }

        self.run(&["new-session", "-d", "-s", name, "-c", work_dir])?;
        Ok(())
    }

    fn split_pane(&self, target: &str, horizontal: bool) -> Result<String, MultiplexerError> {
        Self::validate_input(target, "split target")?;

        let direction = if horizontal { "-h" } else { "-v" };
        let output = self.run(&[
            "split-window",
            direction,
            "-d",
            "-t",
            target,
            "-P",
            "-F",
            "#{pane_id}",
        ])?;

        let pane_id = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if pane_id.is_empty() {
            return Err(MultiplexerError::CommandFailed {
                argv: vec!["split-window".to_string()],
                stderr: "no pane id returned".to_string(),
            });
        }
        Ok(pane_id)
    }

    fn send_keys(&self, pane_id: &str, text: &str) -> Result<(), MultiplexerError> {
        Self::validate_input(pane_id, "pane id")?;
        // -l sends the text literally; the prompt itself may contain any
        // characters and is passed as a single argv element
        self.run(&["send-keys", "-t", pane_id, "-l", "--", text])?;
        Ok(())
    }

    fn send_control(&self, pane_id: &str, key: &str) -> Result<(), MultiplexerError> {
        Self::validate_input(pane_id, "pane id")?;
        Self::validate_input(key, "key name")?;
        self.run(&["send-keys", "-t", pane_id, key])?;
        Ok(())
    }

    fn capture_output(&self, pane_id: &str, line_count: usize) -> Result<String, MultiplexerError> {
        Self::validate_input(pane_id, "pane id")?;
        let start = format!("-{}", line_count);
        let output = self.run(&["capture-pane", "-p", "-t", pane_id, "-S", &start])?;
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }

    fn get_working_directory(&self, pane_id: &str) -> Result<String, MultiplexerError> {
        Self::validate_input(pane_id, "pane id")?;
        let output = self.run(&["display", "-p", "-t", pane_id, "#{pane_current_path}"])?;
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    fn get_process_name(&self, pane_id: &str) -> Result<String, MultiplexerError> {
        Self::validate_input(pane_id, "pane id")?;
        let output = self.run(&["display", "-p", "-t", pane_id, "#{pane_current_command}"])?;
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    fn kill_session(&self, name: &str) -> Result<(), MultiplexerError> {
        Self::validate_input(name, "session name")?;
        if !self.session_exists(name) {
            return Err(MultiplexerError::SessionNotFound(name.to_string()));
        }
        self.run(&["kill-session", "-t", name])?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_input_validation_denylist() {
        assert!(TmuxDriver::validate_input("agent-1", "session name").is_ok());
        assert!(TmuxDriver::validate_input("/home/user/project", "path").is_ok());

        for bad in [
            "a;b", "a&b", "a|b", "a`b", "a$b", "a(b", "a)b", "a<b", "a>b", "a'b", "a\"b", "a\\b",
        ] {
            assert!(
                TmuxDriver::validate_input(bad, "session name").is_err(),
                "expected rejection of {:?}",
                bad
            );
        }
        assert!(TmuxDriver::validate_input("", "session name").is_err());
    }

    #[test]
    fn test_command_failed_display_includes_argv_and_stderr() {
        let err = MultiplexerError::CommandFailed {
            argv: vec!["kill-session".to_string(), "-t".to_string(), "x".to_string()],
            stderr: "session not found: x".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("kill-session"));
        assert!(msg.contains("session not found"));
    }

    #[test]
    fn test_session_not_found_display() {
        let err = MultiplexerError::SessionNotFound("worker".to_string());
        assert_eq!(err.to_string(), "Session 'worker' not found");
    }
}
