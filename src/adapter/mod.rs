//! Polymorphic adapters over interactive AI CLI tools
//!
//! The assistants expose no machine API; everything the core knows about
//! them is inferred from pane scrollback. Each tool variant declares its
//! readiness markers and start command; the shared send-prompt state
//! machine (PREP -> TYPING -> AWAITING -> STABILIZING) lives here so all
//! callers see one completion contract.

pub mod claude;
pub mod gemini;
pub mod opencode;

pub use claude::ClaudeAdapter;
pub use gemini::GeminiAdapter;
pub use opencode::OpenCodeAdapter;

use async_trait::async_trait;
use std::process::{Command, Stdio};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::model::AgentKind;
use crate::tmux::{Multiplexer, MultiplexerError};
use crate::utils::{scrollback_delta, scrollback_line_count, strip_ansi};

/// Scrollback window inspected while awaiting a response
const CAPTURE_LINES: usize = 10_000;

/// Lowercased substrings that mark a hard failure in tool output
const ERROR_MARKERS: &[&str] = &[
    "traceback (most recent call last)",
    "fatal:",
    "fatal error",
    "i cannot assist",
    "i can't assist",
];

/// Tuning knobs for a single prompt dispatch
#[derive(Debug, Clone)]
pub struct PromptOptions {
    /// Absolute deadline for the whole dispatch
    pub timeout: Duration,
    /// Scrollback polling cadence while awaiting output
    pub poll_interval: Duration,
    /// Quiet period after which output is considered complete
    pub idle_threshold: Duration,
}

impl Default for PromptOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_millis(120_000),
            poll_interval: Duration::from_millis(500),
            idle_threshold: Duration::from_millis(2_000),
        }
    }
}

impl PromptOptions {
    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout = Duration::from_millis(timeout_ms);
        self
    }
}

/// Result of driving one prompt through a tool pane
#[derive(Debug, Clone)]
pub struct PromptOutcome {
    pub success: bool,
    /// ANSI-stripped scrollback delta produced by the tool
    pub output: String,
    pub duration_ms: u64,
    pub error: Option<String>,
    /// Deadline expiry is retryable; hard failures may not be
    pub timed_out: bool,
}

impl PromptOutcome {
    fn success(output: String, started: Instant) -> Self {
        Self {
            success: true,
            output,
            duration_ms: started.elapsed().as_millis() as u64,
            error: None,
            timed_out: false,
        }
    }

    fn failure(output: String, error: String, started: Instant, timed_out: bool) -> Self {
        Self {
            success: false,
            output,
            duration_ms: started.elapsed().as_millis() as u64,
            error: Some(error),
            timed_out,
        }
    }
}

fn contains_error_marker(output: &str) -> bool {
    let lowered = output.to_lowercase();
    ERROR_MARKERS.iter().any(|m| lowered.contains(m))
}

/// Capability surface of one AI CLI tool
///
/// Implementations provide the per-tool profile (binary name, readiness
/// markers, start command); the interaction machinery is shared through the
/// provided methods.
#[async_trait]
pub trait CliAdapter: Send + Sync {
    fn kind(&self) -> AgentKind;

    /// Binary invoked inside the pane
    fn command_name(&self) -> &'static str;

    fn install_instructions(&self) -> &'static str;

    /// Substrings in scrollback that indicate the tool is ready for input
    fn ready_markers(&self) -> &'static [&'static str];

    fn startup_timeout(&self) -> Duration;

    /// Tool-specific command sent after Ctrl-C to exit cleanly
    fn exit_command(&self) -> &'static str;

    fn driver(&self) -> &Arc<dyn Multiplexer>;

    /// Shell line that starts the tool, honoring opaque agent config
    fn start_command(&self, config: &serde_json::Value) -> String {
        match config.get("args").and_then(|v| v.as_str()) {
            Some(args) if !args.trim().is_empty() => {
                format!("{} {}", self.command_name(), args.trim())
            }
            _ => self.command_name().to_string(),
        }
    }

    /// Whether the tool binary is installed on this host
    fn check_installed(&self) -> bool {
        Command::new(self.command_name())
            .arg("--version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map(|s| s.success())
            .unwrap_or(false)
    }

    /// Whether captured output shows the tool's ready prompt
    fn is_ready_output(&self, output: &str) -> bool {
        let cleaned = strip_ansi(output).to_lowercase();
        self.ready_markers()
            .iter()
            .any(|m| cleaned.contains(&m.to_lowercase()))
    }

    /// Create a multiplexer session, start the tool in it and await the
    /// ready prompt
    async fn spawn_process(
        &self,
        session_name: &str,
        work_dir: &str,
        config: &serde_json::Value,
    ) -> crate::error::Result<()> {
        self.driver().create_session(session_name, work_dir)?;
        let start = self.start_command(config);
        self.driver().send_keys(session_name, &start)?;
        self.driver().send_control(session_name, "Enter")?;
        self.await_ready(session_name).await
    }

    /// Poll scrollback until the ready marker appears or the startup
    /// timeout elapses
    async fn await_ready(&self, target: &str) -> crate::error::Result<()> {
        let deadline = Instant::now() + self.startup_timeout();
        loop {
            let captured = self.driver().capture_output(target, 50)?;
            if self.is_ready_output(&captured) {
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(crate::error::MindmuxError::Timeout(format!(
                    "{} did not become ready within {:?}",
                    self.command_name(),
                    self.startup_timeout()
                )));
            }
            tokio::time::sleep(Duration::from_millis(500)).await;
        }
    }

    /// Send a prompt and await a stabilized response
    ///
    /// PREP snapshots the scrollback length, TYPING emits the prompt,
    /// AWAITING polls for new content, STABILIZING waits for the quiet
    /// period. The returned output is the ANSI-stripped delta past the
    /// snapshot.
    async fn send_prompt(
        &self,
        target: &str,
        prompt: &str,
        opts: &PromptOptions,
    ) -> PromptOutcome {
        let started = Instant::now();

        // PREP
        let baseline = match self.driver().capture_output(target, CAPTURE_LINES) {
            Ok(captured) => scrollback_line_count(&captured),
            Err(e) => {
                return PromptOutcome::failure(
                    String::new(),
                    format!("failed to snapshot scrollback: {}", e),
                    started,
                    false,
                )
            }
        };

        // TYPING
        if let Err(e) = self
            .driver()
            .send_keys(target, prompt)
            .and_then(|_| self.driver().send_control(target, "Enter"))
        {
            return PromptOutcome::failure(
                String::new(),
                format!("failed to type prompt: {}", e),
                started,
                false,
            );
        }

        // AWAITING / STABILIZING
        let mut last_count = baseline;
        let mut grown = false;
        let mut last_growth = Instant::now();

        loop {
            if started.elapsed() >= opts.timeout {
                let output = self
                    .driver()
                    .capture_output(target, CAPTURE_LINES)
                    .map(|c| scrollback_delta(&c, baseline))
                    .unwrap_or_default();
                return PromptOutcome::failure(
                    output,
                    format!("timeout after {:?} awaiting response", opts.timeout),
                    started,
                    true,
                );
            }

            tokio::time::sleep(opts.poll_interval).await;

            let captured = match self.driver().capture_output(target, CAPTURE_LINES) {
                Ok(c) => c,
                Err(e) => {
                    // Pane disappeared mid-dispatch
                    return PromptOutcome::failure(
                        String::new(),
                        format!("pane lost while awaiting output: {}", e),
                        started,
                        false,
                    );
                }
            };

            let delta = scrollback_delta(&captured, baseline);
            if contains_error_marker(&delta) {
                return PromptOutcome::failure(
                    delta,
                    "tool output contains an error marker".to_string(),
                    started,
                    false,
                );
            }

            let count = scrollback_line_count(&captured);
            if count > last_count {
                grown = true;
                last_count = count;
                last_growth = Instant::now();
            } else if grown && last_growth.elapsed() >= opts.idle_threshold {
                return PromptOutcome::success(delta, started);
            }
        }
    }

    /// Send a raw command line to the tool
    async fn send_command(&self, target: &str, raw: &str) -> Result<(), MultiplexerError> {
        self.driver().send_keys(target, raw)?;
        self.driver().send_control(target, "Enter")
    }

    /// Marker-based idleness probe over recent scrollback
    async fn is_idle(&self, target: &str) -> Result<bool, MultiplexerError> {
        let captured = self.driver().capture_output(target, 20)?;
        Ok(self.is_ready_output(&captured))
    }

    /// Most recent `lines` of scrollback, ANSI-stripped
    fn get_output(&self, target: &str, lines: usize) -> Result<String, MultiplexerError> {
        let captured = self.driver().capture_output(target, lines)?;
        Ok(strip_ansi(&captured))
    }

    /// Interrupt the tool and ask it to exit cleanly
    async fn terminate(&self, target: &str) -> Result<(), MultiplexerError> {
        self.driver().send_control(target, "C-c")?;
        tokio::time::sleep(Duration::from_millis(200)).await;
        self.driver().send_keys(target, self.exit_command())?;
        self.driver().send_control(target, "Enter")
    }
}

/// Adapter for an agent kind; `gpt4` shares the OpenCode adapter
pub fn adapter_for(kind: AgentKind, driver: Arc<dyn Multiplexer>) -> Arc<dyn CliAdapter> {
    match kind {
        AgentKind::Claude => Arc::new(ClaudeAdapter::new(driver)),
        AgentKind::Gemini => Arc::new(GeminiAdapter::new(driver)),
        AgentKind::Opencode | AgentKind::Gpt4 => Arc::new(OpenCodeAdapter::new(driver)),
    }
}
