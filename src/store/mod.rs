//! Durable state store
//!
//! Embedded SQLite database holding the three entity tables. All mutations
//! go through a single mutex-guarded connection (one writer, WAL journal);
//! reads at runtime are served by the hot cache, so the store is only read
//! in full during rebuild.

use std::path::Path;
use std::sync::Mutex;

use chrono::{DateTime, TimeZone, Utc};
use rusqlite::{params, Connection, Row};

use crate::model::{
    Agent, AgentKind, AgentStatus, Session, SessionStatus, Task, TaskStatus,
};

/// Error types for store operations
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Corrupt row: {0}")]
    Corrupt(String),
    #[error("Lock poisoned")]
    Poisoned,
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

type Result<T> = std::result::Result<T, StoreError>;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS agents (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL UNIQUE,
    type TEXT NOT NULL,
    capabilities TEXT NOT NULL,
    config TEXT NOT NULL,
    status TEXT NOT NULL,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS tasks (
    id TEXT PRIMARY KEY,
    prompt TEXT NOT NULL,
    required_capabilities TEXT NOT NULL,
    priority INTEGER NOT NULL DEFAULT 0,
    status TEXT NOT NULL,
    assigned_agent_id TEXT REFERENCES agents(id),
    depends_on TEXT NOT NULL,
    created_at INTEGER NOT NULL,
    started_at INTEGER,
    completed_at INTEGER,
    result TEXT,
    error_message TEXT,
    retry_count INTEGER NOT NULL DEFAULT 0,
    max_retries INTEGER NOT NULL DEFAULT 0,
    timeout_ms INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS sessions (
    id TEXT PRIMARY KEY,
    agent_id TEXT NOT NULL REFERENCES agents(id),
    multiplexer_session TEXT NOT NULL,
    status TEXT NOT NULL,
    started_at INTEGER NOT NULL,
    ended_at INTEGER,
    process_id INTEGER
);
";

/// Mutex-guarded handle over the embedded database
pub struct Store {
    conn: Mutex<Connection>,
}

impl Store {
    /// Open (or create) the database at `path` and run migrations
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        Self::initialize(conn)
    }

    /// In-memory database for tests
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::initialize(conn)
    }

    fn initialize(conn: Connection) -> Result<Self> {
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "busy_timeout", 5000)?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| StoreError::Poisoned)
    }

    // ----- agents -----

    pub fn insert_agent(&self, agent: &Agent) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO agents (id, name, type, capabilities, config, status, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                agent.id,
                agent.name,
                agent.kind.as_str(),
                serde_json::to_string(&agent.capabilities)
                    .map_err(|e| StoreError::Corrupt(e.to_string()))?,
                agent.config.to_string(),
                agent.status.as_str(),
                agent.created_at.timestamp(),
                agent.updated_at.timestamp(),
            ],
        )?;
        Ok(())
    }

    pub fn update_agent(&self, agent: &Agent) -> Result<()> {
        let conn = self.lock()?;
        let changed = conn.execute(
            "UPDATE agents SET name=?2, type=?3, capabilities=?4, config=?5, status=?6, updated_at=?7
             WHERE id=?1",
            params![
                agent.id,
                agent.name,
                agent.kind.as_str(),
                serde_json::to_string(&agent.capabilities)
                    .map_err(|e| StoreError::Corrupt(e.to_string()))?,
                agent.config.to_string(),
                agent.status.as_str(),
                agent.updated_at.timestamp(),
            ],
        )?;
        if changed == 0 {
            return Err(StoreError::Corrupt(format!(
                "update of missing agent {}",
                agent.id
            )));
        }
        Ok(())
    }

    /// Remove an agent row for good
    ///
    /// Terminal task references are detached and the agent's session rows
    /// deleted in the same transaction, so the foreign keys stay satisfied.
    pub fn delete_agent(&self, id: &str) -> Result<()> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        tx.execute(
            "UPDATE tasks SET assigned_agent_id=NULL WHERE assigned_agent_id=?1",
            params![id],
        )?;
        tx.execute("DELETE FROM sessions WHERE agent_id=?1", params![id])?;
        let changed = tx.execute("DELETE FROM agents WHERE id=?1", params![id])?;
        tx.commit()?;
        if changed == 0 {
            return Err(StoreError::Corrupt(format!("delete of missing agent {}", id)));
        }
        Ok(())
    }

    pub fn get_agent(&self, id: &str) -> Result<Option<Agent>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare("SELECT * FROM agents WHERE id=?1")?;
        let mut rows = stmt.query_map(params![id], agent_from_row)?;
        rows.next().transpose().map_err(Into::into)
    }

    pub fn list_agents(&self) -> Result<Vec<Agent>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare("SELECT * FROM agents ORDER BY created_at")?;
        let rows = stmt.query_map([], agent_from_row)?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Into::into)
    }

    // ----- tasks -----

    pub fn insert_task(&self, task: &Task) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO tasks (id, prompt, required_capabilities, priority, status,
                                assigned_agent_id, depends_on, created_at, started_at,
                                completed_at, result, error_message, retry_count,
                                max_retries, timeout_ms)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
            params![
                task.id,
                task.prompt,
                serde_json::to_string(&task.required_capabilities)
                    .map_err(|e| StoreError::Corrupt(e.to_string()))?,
                task.priority,
                task.status.as_str(),
                task.assigned_agent_id,
                serde_json::to_string(&task.depends_on)
                    .map_err(|e| StoreError::Corrupt(e.to_string()))?,
                task.created_at.timestamp(),
                task.started_at.map(|t| t.timestamp()),
                task.completed_at.map(|t| t.timestamp()),
                task.result,
                task.error_message,
                task.retry_count,
                task.max_retries,
                task.timeout_ms as i64,
            ],
        )?;
        Ok(())
    }

    pub fn update_task(&self, task: &Task) -> Result<()> {
        let conn = self.lock()?;
        let changed = conn.execute(
            "UPDATE tasks SET status=?2, assigned_agent_id=?3, started_at=?4, completed_at=?5,
                              result=?6, error_message=?7, retry_count=?8
             WHERE id=?1",
            params![
                task.id,
                task.status.as_str(),
                task.assigned_agent_id,
                task.started_at.map(|t| t.timestamp()),
                task.completed_at.map(|t| t.timestamp()),
                task.result,
                task.error_message,
                task.retry_count,
            ],
        )?;
        if changed == 0 {
            return Err(StoreError::Corrupt(format!(
                "update of missing task {}",
                task.id
            )));
        }
        Ok(())
    }

    pub fn get_task(&self, id: &str) -> Result<Option<Task>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare("SELECT * FROM tasks WHERE id=?1")?;
        let mut rows = stmt.query_map(params![id], task_from_row)?;
        rows.next().transpose().map_err(Into::into)
    }

    pub fn list_tasks(&self) -> Result<Vec<Task>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare("SELECT * FROM tasks ORDER BY created_at")?;
        let rows = stmt.query_map([], task_from_row)?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Into::into)
    }

    // ----- sessions -----

    pub fn insert_session(&self, session: &Session) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO sessions (id, agent_id, multiplexer_session, status, started_at, ended_at, process_id)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                session.id,
                session.agent_id,
                session.multiplexer_session_name,
                session.status.as_str(),
                session.started_at.timestamp(),
                session.ended_at.map(|t| t.timestamp()),
                session.process_id,
            ],
        )?;
        Ok(())
    }

    pub fn update_session(&self, session: &Session) -> Result<()> {
        let conn = self.lock()?;
        let changed = conn.execute(
            "UPDATE sessions SET status=?2, ended_at=?3, process_id=?4 WHERE id=?1",
            params![
                session.id,
                session.status.as_str(),
                session.ended_at.map(|t| t.timestamp()),
                session.process_id,
            ],
        )?;
        if changed == 0 {
            return Err(StoreError::Corrupt(format!(
                "update of missing session {}",
                session.id
            )));
        }
        Ok(())
    }

    pub fn get_session(&self, id: &str) -> Result<Option<Session>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare("SELECT * FROM sessions WHERE id=?1")?;
        let mut rows = stmt.query_map(params![id], session_from_row)?;
        rows.next().transpose().map_err(Into::into)
    }

    pub fn list_sessions(&self) -> Result<Vec<Session>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare("SELECT * FROM sessions ORDER BY started_at")?;
        let rows = stmt.query_map([], session_from_row)?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Into::into)
    }
}

fn epoch_to_datetime(secs: i64) -> rusqlite::Result<DateTime<Utc>> {
    Utc.timestamp_opt(secs, 0).single().ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            0,
            rusqlite::types::Type::Integer,
            format!("invalid epoch timestamp {}", secs).into(),
        )
    })
}

fn parse_json_list(raw: String, column: usize) -> rusqlite::Result<Vec<String>> {
    serde_json::from_str(&raw).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(column, rusqlite::types::Type::Text, Box::new(e))
    })
}

fn agent_from_row(row: &Row<'_>) -> rusqlite::Result<Agent> {
    let kind_raw: String = row.get("type")?;
    let status_raw: String = row.get("status")?;
    let capabilities: String = row.get("capabilities")?;
    let config_raw: String = row.get("config")?;

    Ok(Agent {
        id: row.get("id")?,
        name: row.get("name")?,
        kind: AgentKind::parse(&kind_raw).ok_or_else(|| {
            rusqlite::Error::FromSqlConversionFailure(
                2,
                rusqlite::types::Type::Text,
                format!("unknown agent type '{}'", kind_raw).into(),
            )
        })?,
        capabilities: parse_json_list(capabilities, 3)?,
        config: serde_json::from_str(&config_raw).unwrap_or(serde_json::Value::Null),
        status: AgentStatus::parse(&status_raw).ok_or_else(|| {
            rusqlite::Error::FromSqlConversionFailure(
                5,
                rusqlite::types::Type::Text,
                format!("unknown agent status '{}'", status_raw).into(),
            )
        })?,
        created_at: epoch_to_datetime(row.get("created_at")?)?,
        updated_at: epoch_to_datetime(row.get("updated_at")?)?,
    })
}

fn task_from_row(row: &Row<'_>) -> rusqlite::Result<Task> {
    let status_raw: String = row.get("status")?;
    let required: String = row.get("required_capabilities")?;
    let depends: String = row.get("depends_on")?;
    let started: Option<i64> = row.get("started_at")?;
    let completed: Option<i64> = row.get("completed_at")?;

    Ok(Task {
        id: row.get("id")?,
        prompt: row.get("prompt")?,
        required_capabilities: parse_json_list(required, 2)?,
        priority: row.get("priority")?,
        status: TaskStatus::parse(&status_raw).ok_or_else(|| {
            rusqlite::Error::FromSqlConversionFailure(
                4,
                rusqlite::types::Type::Text,
                format!("unknown task status '{}'", status_raw).into(),
            )
        })?,
        assigned_agent_id: row.get("assigned_agent_id")?,
        depends_on: parse_json_list(depends, 6)?,
        created_at: epoch_to_datetime(row.get("created_at")?)?,
        started_at: started.map(epoch_to_datetime).transpose()?,
        completed_at: completed.map(epoch_to_datetime).transpose()?,
        result: row.get("result")?,
        error_message: row.get("error_message")?,
        retry_count: row.get("retry_count")?,
        max_retries: row.get("max_retries")?,
        timeout_ms: row.get::<_, i64>("timeout_ms")? as u64,
    })
}

fn session_from_row(row: &Row<'_>) -> rusqlite::Result<Session> {
    let status_raw: String = row.get("status")?;
    let ended: Option<i64> = row.get("ended_at")?;

    Ok(Session {
        id: row.get("id")?,
        agent_id: row.get("agent_id")?,
        multiplexer_session_name: row.get("multiplexer_session")?,
        status: SessionStatus::parse(&status_raw).ok_or_else(|| {
            rusqlite::Error::FromSqlConversionFailure(
                3,
                rusqlite::types::Type::Text,
                format!("unknown session status '{}'", status_raw).into(),
            )
        })?,
        started_at: epoch_to_datetime(row.get("started_at")?)?,
        ended_at: ended.map(epoch_to_datetime).transpose()?,
        process_id: row.get("process_id")?,
    })
}
