use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Default absolute deadline for a single prompt dispatch
pub const DEFAULT_TIMEOUT_MS: u64 = 120_000;

/// Lifecycle status of a task
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Running => "running",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(TaskStatus::Pending),
            "running" => Some(TaskStatus::Running),
            "completed" => Some(TaskStatus::Completed),
            "failed" => Some(TaskStatus::Failed),
            "cancelled" => Some(TaskStatus::Cancelled),
            _ => None,
        }
    }

    /// Terminal states never transition again (except failed -> pending on
    /// a bounded retry)
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A unit of work scheduled onto an agent
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    /// Unique task identifier
    pub id: String,

    /// Prompt sent verbatim to the assigned agent's CLI
    pub prompt: String,

    /// Capabilities the executing agent must advertise
    pub required_capabilities: Vec<String>,

    /// Higher runs first; FIFO within equal priority
    pub priority: i64,

    pub status: TaskStatus,

    /// Agent currently executing this task, set while running
    pub assigned_agent_id: Option<String>,

    /// Task ids that must complete before this task becomes eligible
    pub depends_on: Vec<String>,

    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,

    /// Adapter output on completion
    pub result: Option<String>,

    /// Failure reason on terminal failure
    pub error_message: Option<String>,

    pub retry_count: u32,
    pub max_retries: u32,

    /// Absolute deadline for a single dispatch attempt
    pub timeout_ms: u64,
}

impl Task {
    /// Create a new pending task
    pub fn new(prompt: String, required_capabilities: Vec<String>, priority: i64) -> Self {
        Self {
            id: format!("task-{}", Uuid::new_v4()),
            prompt,
            required_capabilities,
            priority,
            status: TaskStatus::Pending,
            assigned_agent_id: None,
            depends_on: Vec::new(),
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            result: None,
            error_message: None,
            retry_count: 0,
            max_retries: 0,
            timeout_ms: DEFAULT_TIMEOUT_MS,
        }
    }

    /// Gate this task behind other tasks
    pub fn with_depends_on(mut self, depends_on: Vec<String>) -> Self {
        self.depends_on = depends_on;
        self
    }

    /// Allow up to `max_retries` re-dispatches after retryable failures
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Override the per-dispatch deadline
    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_defaults() {
        let task = Task::new(
            "write a parser".to_string(),
            vec!["code-generation".to_string()],
            5,
        );

        assert!(task.id.starts_with("task-"));
        assert_eq!(task.status, TaskStatus::Pending);
        assert!(task.assigned_agent_id.is_none());
        assert_eq!(task.retry_count, 0);
        assert_eq!(task.max_retries, 0);
        assert_eq!(task.timeout_ms, DEFAULT_TIMEOUT_MS);
    }

    #[test]
    fn test_task_builder() {
        let task = Task::new("t".to_string(), vec![], 0)
            .with_depends_on(vec!["task-a".to_string()])
            .with_max_retries(2)
            .with_timeout_ms(100);

        assert_eq!(task.depends_on, vec!["task-a".to_string()]);
        assert_eq!(task.max_retries, 2);
        assert_eq!(task.timeout_ms, 100);
    }

    #[test]
    fn test_terminal_states() {
        assert!(!TaskStatus::Pending.is_terminal());
        assert!(!TaskStatus::Running.is_terminal());
        assert!(TaskStatus::Completed.is_terminal());
        assert!(TaskStatus::Failed.is_terminal());
        assert!(TaskStatus::Cancelled.is_terminal());
    }

    #[test]
    fn test_serde_field_names() {
        let task = Task::new("p".to_string(), vec!["testing".to_string()], 1);
        let json = serde_json::to_value(&task).unwrap();
        assert!(json.get("requiredCapabilities").is_some());
        assert!(json.get("assignedAgentId").is_some());
        assert!(json.get("errorMessage").is_some());
        assert!(json.get("timeoutMs").is_some());
    }

    #[test]
    fn test_serde_round_trip_identity() {
        let mut task = Task::new("p".to_string(), vec!["testing".to_string()], 1)
            .with_max_retries(3)
            .with_timeout_ms(9_000);
        task.status = TaskStatus::Failed;
        task.error_message = Some("boom".to_string());
        task.retry_count = 3;

        let json = serde_json::to_string(&task).unwrap();
        let parsed: Task = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.id, task.id);
        assert_eq!(parsed.prompt, task.prompt);
        assert_eq!(parsed.status, task.status);
        assert_eq!(parsed.error_message, task.error_message);
        assert_eq!(parsed.retry_count, task.retry_count);
        assert_eq!(parsed.timeout_ms, task.timeout_ms);
        assert_eq!(parsed.created_at, task.created_at);
    }
}
