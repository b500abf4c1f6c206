//! In-memory hot cache mirroring the durable store
//!
//! Three id-keyed maps hold independent copies of the store's rows. The
//! scheduler's critical section is the only writer; everything else reads
//! freely. `rebuild_from_store` runs once at startup and defensively after
//! a detected inconsistency.

use dashmap::DashMap;

use crate::model::{Agent, AgentStatus, Session, SessionStatus, Task, TaskStatus};
use crate::store::{Store, StoreError};

#[derive(Default)]
pub struct HotCache {
    agents: DashMap<String, Agent>,
    tasks: DashMap<String, Task>,
    sessions: DashMap<String, Session>,
}

impl HotCache {
    pub fn new() -> Self {
        Self::default()
    }

    // ----- agents -----

    pub fn get_agent(&self, id: &str) -> Option<Agent> {
        self.agents.get(id).map(|a| a.clone())
    }

    pub fn all_agents(&self) -> Vec<Agent> {
        let mut agents: Vec<Agent> = self.agents.iter().map(|a| a.clone()).collect();
        agents.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        agents
    }

    pub fn agents_by_status(&self, status: AgentStatus) -> Vec<Agent> {
        self.all_agents()
            .into_iter()
            .filter(|a| a.status == status)
            .collect()
    }

    pub fn set_agent(&self, agent: Agent) {
        self.agents.insert(agent.id.clone(), agent);
    }

    pub fn delete_agent(&self, id: &str) {
        self.agents.remove(id);
    }

    // ----- tasks -----

    pub fn get_task(&self, id: &str) -> Option<Task> {
        self.tasks.get(id).map(|t| t.clone())
    }

    pub fn all_tasks(&self) -> Vec<Task> {
        let mut tasks: Vec<Task> = self.tasks.iter().map(|t| t.clone()).collect();
        tasks.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        tasks
    }

    pub fn tasks_by_status(&self, status: TaskStatus) -> Vec<Task> {
        self.all_tasks()
            .into_iter()
            .filter(|t| t.status == status)
            .collect()
    }

    pub fn set_task(&self, task: Task) {
        self.tasks.insert(task.id.clone(), task);
    }

    pub fn delete_task(&self, id: &str) {
        self.tasks.remove(id);
    }

    // ----- sessions -----

    pub fn get_session(&self, id: &str) -> Option<Session> {
        self.sessions.get(id).map(|s| s.clone())
    }

    pub fn all_sessions(&self) -> Vec<Session> {
        let mut sessions: Vec<Session> = self.sessions.iter().map(|s| s.clone()).collect();
        sessions.sort_by(|a, b| a.started_at.cmp(&b.started_at).then(a.id.cmp(&b.id)));
        sessions
    }

    pub fn sessions_by_agent(&self, agent_id: &str) -> Vec<Session> {
        self.all_sessions()
            .into_iter()
            .filter(|s| s.agent_id == agent_id)
            .collect()
    }

    pub fn active_session_for_agent(&self, agent_id: &str) -> Option<Session> {
        self.sessions_by_agent(agent_id)
            .into_iter()
            .find(|s| s.status == SessionStatus::Active)
    }

    pub fn set_session(&self, session: Session) {
        self.sessions.insert(session.id.clone(), session);
    }

    pub fn delete_session(&self, id: &str) {
        self.sessions.remove(id);
    }

    // ----- lifecycle -----

    pub fn clear(&self) {
        self.agents.clear();
        self.tasks.clear();
        self.sessions.clear();
    }

    /// Drop everything and reload all three tables from the store
    pub fn rebuild_from_store(&self, store: &Store) -> Result<(), StoreError> {
        let agents = store.list_agents()?;
        let tasks = store.list_tasks()?;
        let sessions = store.list_sessions()?;

        self.clear();
        for agent in agents {
            self.set_agent(agent);
        }
        for task in tasks {
            self.set_task(task);
        }
        for session in sessions {
            self.set_session(session);
        }
        Ok(())
    }
}
