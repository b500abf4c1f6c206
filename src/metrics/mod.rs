//! Metrics counters, health aggregation and fleet status snapshots
//!
//! Gauges are derived from cache state at snapshot time; counters and the
//! task-duration histogram accumulate across the process lifetime.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use serde::Serialize;

use crate::cache::HotCache;
use crate::model::{AgentStatus, TaskStatus};
use crate::utils::sanitize_query_param;

/// Histogram bucket upper bounds for task duration, in milliseconds
const DURATION_BUCKETS_MS: &[u64] = &[100, 500, 1_000, 5_000, 15_000, 60_000, 120_000];

#[derive(Debug, Default)]
struct DurationHistogram {
    /// One count per bucket in `DURATION_BUCKETS_MS`, plus overflow
    counts: Vec<u64>,
    sum_ms: u64,
    total: u64,
}

impl DurationHistogram {
    fn new() -> Self {
        Self {
            counts: vec![0; DURATION_BUCKETS_MS.len() + 1],
            sum_ms: 0,
            total: 0,
        }
    }

    fn record(&mut self, duration_ms: u64) {
        let idx = DURATION_BUCKETS_MS
            .iter()
            .position(|&bound| duration_ms <= bound)
            .unwrap_or(DURATION_BUCKETS_MS.len());
        self.counts[idx] += 1;
        self.sum_ms += duration_ms;
        self.total += 1;
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct HistogramSnapshot {
    pub buckets_ms: Vec<u64>,
    pub counts: Vec<u64>,
    pub sum_ms: u64,
    pub count: u64,
}

/// Point-in-time metrics view surfaced at `/metrics`
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub agents_active: usize,
    pub agents_busy: usize,
    pub tasks_queued_pending: usize,
    pub tasks_running: usize,
    pub tasks_completed: u64,
    pub tasks_failed: u64,
    pub task_duration_ms: HistogramSnapshot,
    pub api_requests_total: u64,
}

/// Process-wide metrics registry
pub struct Metrics {
    tasks_completed: AtomicU64,
    tasks_failed: AtomicU64,
    api_requests: AtomicU64,
    durations: Mutex<DurationHistogram>,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            tasks_completed: AtomicU64::new(0),
            tasks_failed: AtomicU64::new(0),
            api_requests: AtomicU64::new(0),
            durations: Mutex::new(DurationHistogram::new()),
        }
    }

    pub fn record_task_completed(&self, duration_ms: u64) {
        self.tasks_completed.fetch_add(1, Ordering::Relaxed);
        if let Ok(mut durations) = self.durations.lock() {
            durations.record(duration_ms);
        }
    }

    pub fn record_task_failed(&self) {
        self.tasks_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_api_request(&self) {
        self.api_requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self, cache: &HotCache) -> MetricsSnapshot {
        let agents = cache.all_agents();
        let histogram = match self.durations.lock() {
            Ok(h) => HistogramSnapshot {
                buckets_ms: DURATION_BUCKETS_MS.to_vec(),
                counts: h.counts.clone(),
                sum_ms: h.sum_ms,
                count: h.total,
            },
            Err(_) => HistogramSnapshot {
                buckets_ms: DURATION_BUCKETS_MS.to_vec(),
                counts: vec![0; DURATION_BUCKETS_MS.len() + 1],
                sum_ms: 0,
                count: 0,
            },
        };

        MetricsSnapshot {
            agents_active: agents
                .iter()
                .filter(|a| a.status != AgentStatus::Stopped)
                .count(),
            agents_busy: agents
                .iter()
                .filter(|a| a.status == AgentStatus::Busy)
                .count(),
            tasks_queued_pending: cache.tasks_by_status(TaskStatus::Pending).len(),
            tasks_running: cache.tasks_by_status(TaskStatus::Running).len(),
            tasks_completed: self.tasks_completed.load(Ordering::Relaxed),
            tasks_failed: self.tasks_failed.load(Ordering::Relaxed),
            task_duration_ms: histogram,
            api_requests_total: self.api_requests.load(Ordering::Relaxed),
        }
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

// ----- health -----

/// Overall health classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthState {
    Healthy,
    Degraded,
    Unhealthy,
}

#[derive(Debug, Clone, Serialize)]
pub struct CheckResult {
    pub name: String,
    pub passed: bool,
    pub critical: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthStatus {
    pub status: HealthState,
    pub uptime_seconds: u64,
    pub version: &'static str,
    pub checks: Vec<CheckResult>,
    pub metrics: MetricsSnapshot,
}

type CheckFn = Box<dyn Fn() -> bool + Send + Sync>;

struct RegisteredCheck {
    name: String,
    critical: bool,
    check: CheckFn,
}

/// Aggregates dependency checks into one health verdict
///
/// A failing critical dependency (database) makes the process `unhealthy`;
/// a failing non-critical check (agents) only degrades it.
pub struct HealthChecker {
    started: Instant,
    checks: Mutex<Vec<RegisteredCheck>>,
}

impl HealthChecker {
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
            checks: Mutex::new(Vec::new()),
        }
    }

    pub fn register_check(
        &self,
        name: impl Into<String>,
        critical: bool,
        check: impl Fn() -> bool + Send + Sync + 'static,
    ) {
        if let Ok(mut checks) = self.checks.lock() {
            checks.push(RegisteredCheck {
                name: name.into(),
                critical,
                check: Box::new(check),
            });
        }
    }

    pub fn report(&self, metrics: MetricsSnapshot) -> HealthStatus {
        let results: Vec<CheckResult> = match self.checks.lock() {
            Ok(checks) => checks
                .iter()
                .map(|c| CheckResult {
                    name: c.name.clone(),
                    passed: (c.check)(),
                    critical: c.critical,
                })
                .collect(),
            Err(_) => Vec::new(),
        };

        let status = if results.iter().any(|r| r.critical && !r.passed) {
            HealthState::Unhealthy
        } else if results.iter().all(|r| r.passed) {
            HealthState::Healthy
        } else {
            HealthState::Degraded
        };

        HealthStatus {
            status,
            uptime_seconds: self.started.elapsed().as_secs(),
            version: env!("CARGO_PKG_VERSION"),
            checks: results,
            metrics,
        }
    }
}

impl Default for HealthChecker {
    fn default() -> Self {
        Self::new()
    }
}

/// Standard check wiring for a running orchestrator
pub fn register_default_checks(
    health: &HealthChecker,
    store: Arc<crate::store::Store>,
    cache: Arc<HotCache>,
) {
    health.register_check("database", true, move || store.list_agents().is_ok());
    health.register_check("agents", false, move || {
        cache
            .all_agents()
            .iter()
            .any(|a| a.status != AgentStatus::Stopped)
    });
}

// ----- status aggregation -----

#[derive(Debug, Clone, Serialize)]
pub struct FleetStats {
    pub total_agents: usize,
    pub idle_agents: usize,
    pub busy_agents: usize,
    pub pending_tasks: usize,
    pub running_tasks: usize,
    pub completed_tasks: usize,
    pub failed_tasks: usize,
    pub cancelled_tasks: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusSnapshot {
    pub agents: Vec<crate::model::Agent>,
    pub tasks: Vec<crate::model::Task>,
    pub stats: FleetStats,
}

/// Optional filters parsed from URL query parameters
#[derive(Debug, Clone, Default)]
pub struct StatusFilters {
    pub agent_status: Option<AgentStatus>,
    pub task_status: Option<TaskStatus>,
}

impl StatusFilters {
    /// Parse raw query values, tolerating junk by leaving the filter unset
    pub fn parse(agent_status: Option<&str>, task_status: Option<&str>) -> Self {
        Self {
            agent_status: agent_status
                .map(|s| sanitize_query_param(s))
                .and_then(|s| AgentStatus::parse(&s)),
            task_status: task_status
                .map(|s| sanitize_query_param(s))
                .and_then(|s| TaskStatus::parse(&s)),
        }
    }
}

/// Fleet snapshot for `/status`
pub fn status_snapshot(cache: &HotCache, filters: &StatusFilters) -> StatusSnapshot {
    let all_agents = cache.all_agents();
    let all_tasks = cache.all_tasks();

    let stats = FleetStats {
        total_agents: all_agents.len(),
        idle_agents: all_agents
            .iter()
            .filter(|a| a.status == AgentStatus::Idle)
            .count(),
        busy_agents: all_agents
            .iter()
            .filter(|a| a.status == AgentStatus::Busy)
            .count(),
        pending_tasks: all_tasks
            .iter()
            .filter(|t| t.status == TaskStatus::Pending)
            .count(),
        running_tasks: all_tasks
            .iter()
            .filter(|t| t.status == TaskStatus::Running)
            .count(),
        completed_tasks: all_tasks
            .iter()
            .filter(|t| t.status == TaskStatus::Completed)
            .count(),
        failed_tasks: all_tasks
            .iter()
            .filter(|t| t.status == TaskStatus::Failed)
            .count(),
        cancelled_tasks: all_tasks
            .iter()
            .filter(|t| t.status == TaskStatus::Cancelled)
            .count(),
    };

    let agents = match filters.agent_status {
        Some(status) => all_agents
            .into_iter()
            .filter(|a| a.status == status)
            .collect(),
        None => all_agents,
    };
    let tasks = match filters.task_status {
        Some(status) => all_tasks
            .into_iter()
            .filter(|t| t.status == status)
            .collect(),
        None => all_tasks,
    };

    StatusSnapshot {
        agents,
        tasks,
        stats,
    }
}
