//! Role-based access control, audit ledger and rate limiting
//!
//! Three roles with a fixed permission matrix; destructive actions also
//! require resource ownership (admin bypasses). Every permission check,
//! granted or denied, appends exactly one audit entry, including checks
//! made by unauthenticated principals, whose entries carry an empty userId.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Instant;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::error::{MindmuxError, Result};
use crate::model::{AuditEntry, AuditResult};

/// Environment variable consulted when a request carries no token
pub const AUTH_TOKEN_ENV: &str = "MINDMUX_AUTH_TOKEN";

/// Principal roles
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Operator,
    Viewer,
}

/// Actions subject to permission checks
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    AgentList,
    AgentRead,
    AgentCreate,
    AgentStart,
    AgentDelete,
    AgentStop,
    TaskList,
    TaskRead,
    TaskQueue,
    TaskCancel,
    SessionLogs,
    SessionAttach,
    ConfigRead,
    ConfigWrite,
    AuditRead,
    KeyRotate,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::AgentList => "agent:list",
            Action::AgentRead => "agent:read",
            Action::AgentCreate => "agent:create",
            Action::AgentStart => "agent:start",
            Action::AgentDelete => "agent:delete",
            Action::AgentStop => "agent:stop",
            Action::TaskList => "task:list",
            Action::TaskRead => "task:read",
            Action::TaskQueue => "task:queue",
            Action::TaskCancel => "task:cancel",
            Action::SessionLogs => "session:logs",
            Action::SessionAttach => "session:attach",
            Action::ConfigRead => "config:read",
            Action::ConfigWrite => "config:write",
            Action::AuditRead => "audit:read",
            Action::KeyRotate => "key:rotate",
        }
    }

    /// Destructive actions that additionally require resource ownership
    pub fn requires_ownership(&self) -> bool {
        matches!(self, Action::AgentDelete | Action::AgentStop | Action::TaskCancel)
    }
}

impl Role {
    /// Fixed permission matrix
    pub fn allows(&self, action: Action) -> bool {
        use Action::*;
        match action {
            // read family: everyone
            AgentList | AgentRead | TaskList | TaskRead | SessionLogs | ConfigRead => true,
            // mutate family: admin and operator
            AgentCreate | AgentStart | TaskQueue | TaskCancel | SessionAttach => {
                matches!(self, Role::Admin | Role::Operator)
            }
            // admin family
            AgentDelete | AgentStop | ConfigWrite | AuditRead | KeyRotate => {
                matches!(self, Role::Admin)
            }
        }
    }
}

/// Resolved identity of the caller for one request
#[derive(Debug, Clone)]
pub struct AuthContext {
    /// Empty when unauthenticated
    pub user_id: String,
    pub role: Option<Role>,
    pub owned_resources: Vec<String>,
}

impl AuthContext {
    pub fn unauthenticated() -> Self {
        Self {
            user_id: String::new(),
            role: None,
            owned_resources: Vec::new(),
        }
    }

    pub fn is_authenticated(&self) -> bool {
        self.role.is_some()
    }

    pub fn owns(&self, resource_id: &str) -> bool {
        self.owned_resources.iter().any(|r| r == resource_id)
    }
}

/// A registered token session
#[derive(Debug, Clone)]
pub struct TokenSession {
    pub user_id: String,
    pub role: Role,
    pub owned_resources: Vec<String>,
    pub expires_at: Option<DateTime<Utc>>,
}

// ----- audit ledger -----

/// Append-only, mutex-guarded audit ledger
///
/// Ids come from an atomic counter; timestamps are clamped to strictly
/// exceed the previous entry so both stay strictly monotonic even when the
/// wall clock ties.
pub struct AuditLedger {
    entries: Mutex<Vec<AuditEntry>>,
    next_id: AtomicU64,
    last_timestamp: Mutex<DateTime<Utc>>,
}

impl AuditLedger {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
            last_timestamp: Mutex::new(DateTime::<Utc>::MIN_UTC),
        }
    }

    pub fn append(
        &self,
        user_id: &str,
        action: &str,
        resource: &str,
        resource_type: &str,
        result: AuditResult,
        error: Option<String>,
    ) {
        let timestamp = {
            let mut last = match self.last_timestamp.lock() {
                Ok(guard) => guard,
                Err(_) => return,
            };
            let now = Utc::now();
            let ts = if now > *last {
                now
            } else {
                *last + ChronoDuration::milliseconds(1)
            };
            *last = ts;
            ts
        };

        let entry = AuditEntry {
            id: self.next_id.fetch_add(1, Ordering::SeqCst),
            timestamp,
            user_id: user_id.to_string(),
            action: action.to_string(),
            resource: resource.to_string(),
            resource_type: resource_type.to_string(),
            result,
            details: None,
            error,
            ip: None,
            token: None,
        };

        if let Ok(mut entries) = self.entries.lock() {
            entries.push(entry);
        }
    }

    /// Snapshot of all entries, oldest first
    pub fn read(&self) -> Vec<AuditEntry> {
        self.entries.lock().map(|e| e.clone()).unwrap_or_default()
    }

    /// Explicit admin-initiated wipe; the only permitted deletion
    pub fn clear(&self) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.clear();
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for AuditLedger {
    fn default() -> Self {
        Self::new()
    }
}

// ----- access control -----

/// Token-keyed session validation plus the permission matrix
pub struct AccessControl {
    tokens: DashMap<String, TokenSession>,
    pub audit: AuditLedger,
}

impl AccessControl {
    pub fn new() -> Self {
        Self {
            tokens: DashMap::new(),
            audit: AuditLedger::new(),
        }
    }

    pub fn register_token(&self, token: impl Into<String>, session: TokenSession) {
        self.tokens.insert(token.into(), session);
    }

    pub fn revoke_token(&self, token: &str) {
        self.tokens.remove(token);
    }

    /// Resolve a caller context from an explicit token, falling back to the
    /// `MINDMUX_AUTH_TOKEN` environment variable. Unknown or expired tokens
    /// yield an unauthenticated context.
    pub fn resolve(&self, token: Option<&str>) -> AuthContext {
        let from_env;
        let token = match token {
            Some(t) => t,
            None => match std::env::var(AUTH_TOKEN_ENV) {
                Ok(t) => {
                    from_env = t;
                    from_env.as_str()
                }
                Err(_) => return AuthContext::unauthenticated(),
            },
        };

        match self.tokens.get(token) {
            Some(session) => {
                if let Some(expires_at) = session.expires_at {
                    if expires_at <= Utc::now() {
                        return AuthContext::unauthenticated();
                    }
                }
                AuthContext {
                    user_id: session.user_id.clone(),
                    role: Some(session.role),
                    owned_resources: session.owned_resources.clone(),
                }
            }
            None => AuthContext::unauthenticated(),
        }
    }

    /// Check whether `ctx` may perform `action` on `resource`
    ///
    /// Appends one audit entry regardless of outcome.
    pub fn authorize(
        &self,
        ctx: &AuthContext,
        action: Action,
        resource: &str,
        resource_type: &str,
    ) -> Result<()> {
        let Some(role) = ctx.role else {
            self.audit.append(
                &ctx.user_id,
                "permission:denied",
                resource,
                resource_type,
                AuditResult::Failure,
                Some(format!("{} requires authentication", action.as_str())),
            );
            return Err(MindmuxError::Authentication(
                "missing or invalid token".to_string(),
            ));
        };

        if !role.allows(action) {
            self.audit.append(
                &ctx.user_id,
                "permission:denied",
                resource,
                resource_type,
                AuditResult::Failure,
                Some(format!("role denies {}", action.as_str())),
            );
            return Err(MindmuxError::Authorization(format!(
                "{:?} may not {}",
                role,
                action.as_str()
            )));
        }

        if action.requires_ownership() && role != Role::Admin && !ctx.owns(resource) {
            self.audit.append(
                &ctx.user_id,
                "permission:denied",
                resource,
                resource_type,
                AuditResult::Failure,
                Some(format!("not owner of {}", resource)),
            );
            return Err(MindmuxError::Authorization(format!(
                "{} is not owned by {}",
                resource, ctx.user_id
            )));
        }

        self.audit.append(
            &ctx.user_id,
            action.as_str(),
            resource,
            resource_type,
            AuditResult::Success,
            None,
        );
        Ok(())
    }
}

impl Default for AccessControl {
    fn default() -> Self {
        Self::new()
    }
}

// ----- rate limiting -----

#[derive(Debug, Clone, Copy)]
pub struct RateLimitConfig {
    pub max: u32,
    pub window_ms: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max: 100,
            window_ms: 1_000,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct LimitDecision {
    pub allowed: bool,
    pub remaining: u32,
    /// Milliseconds until the next token refills, when denied
    pub reset_ms: u64,
}

struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

/// Per-client-id token buckets with time-based refill
pub struct RateLimiter {
    config: RateLimitConfig,
    buckets: DashMap<String, Bucket>,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            buckets: DashMap::new(),
        }
    }

    pub fn check_limit(&self, client_id: &str) -> LimitDecision {
        let now = Instant::now();
        let rate_per_ms = self.config.max as f64 / self.config.window_ms as f64;

        let mut bucket = self
            .buckets
            .entry(client_id.to_string())
            .or_insert_with(|| Bucket {
                tokens: self.config.max as f64,
                last_refill: now,
            });

        let elapsed_ms = now.duration_since(bucket.last_refill).as_secs_f64() * 1_000.0;
        bucket.tokens = (bucket.tokens + elapsed_ms * rate_per_ms).min(self.config.max as f64);
        bucket.last_refill = now;

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            LimitDecision {
                allowed: true,
                remaining: bucket.tokens.floor() as u32,
                reset_ms: 0,
            }
        } else {
            let deficit = 1.0 - bucket.tokens;
            LimitDecision {
                allowed: false,
                remaining: 0,
                reset_ms: (deficit / rate_per_ms).ceil() as u64,
            }
        }
    }
}
