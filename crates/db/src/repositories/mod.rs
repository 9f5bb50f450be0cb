use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use conductor_core::audit::AuditRecord;
use conductor_core::context::ContextEntry;
use conductor_core::domain::agent::{Agent, AgentId, TenantId};
use conductor_core::domain::task::{Task, TaskId, TaskState, TaskTransitionEvent};

pub mod agent;
pub mod audit;
pub mod context;
pub mod memory;
mod rows;
pub mod task;

pub use agent::SqlAgentRepository;
pub use audit::SqlAuditRepository;
pub use context::SqlContextRepository;
pub use memory::{
    InMemoryAgentRepository, InMemoryAuditRepository, InMemoryContextRepository,
    InMemoryTaskRepository,
};
pub use task::SqlTaskRepository;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
}

/// Keyset position in the oldest-first `(created_at, id)` task order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TaskCursor {
    pub created_at: DateTime<Utc>,
    pub id: TaskId,
}

impl TaskCursor {
    pub fn of(task: &Task) -> Self {
        Self { created_at: task.created_at, id: task.id.clone() }
    }

    /// True when `task` sorts strictly after this position.
    pub fn precedes(&self, task: &Task) -> bool {
        (task.created_at, task.id.0.as_str()) > (self.created_at, self.id.0.as_str())
    }
}

#[async_trait]
pub trait TaskRepository: Send + Sync {
    async fn find_by_id(&self, id: &TaskId) -> Result<Option<Task>, RepositoryError>;

    /// Inserts or overwrites the task together with its plan.
    async fn save(&self, task: Task) -> Result<(), RepositoryError>;

    /// Compare-and-set write: persists `task` only while the stored
    /// `state_version` still equals `expected_version`. Returns `false` when
    /// another writer got there first.
    async fn save_if_version(&self, task: Task, expected_version: u32)
        -> Result<bool, RepositoryError>;

    /// Oldest first.
    async fn list(
        &self,
        state: Option<TaskState>,
        tenant_id: Option<&TenantId>,
        limit: u32,
    ) -> Result<Vec<Task>, RepositoryError>;

    /// Tasks in `state` strictly after `after` in the oldest-first order.
    async fn list_after(
        &self,
        state: TaskState,
        after: Option<&TaskCursor>,
        limit: u32,
    ) -> Result<Vec<Task>, RepositoryError>;

    async fn append_transition(&self, transition: TaskTransitionEvent)
        -> Result<(), RepositoryError>;

    async fn list_transitions(
        &self,
        task_id: &TaskId,
    ) -> Result<Vec<TaskTransitionEvent>, RepositoryError>;
}

#[async_trait]
pub trait AgentRepository: Send + Sync {
    async fn find_by_id(&self, id: &AgentId) -> Result<Option<Agent>, RepositoryError>;
    async fn save(&self, agent: Agent) -> Result<(), RepositoryError>;
    async fn list_for_tenant(&self, tenant_id: &TenantId) -> Result<Vec<Agent>, RepositoryError>;
}

#[async_trait]
pub trait AuditRepository: Send + Sync {
    /// Upsert keyed by record id. A final record replaces its `attempted`
    /// form; an `attempted` record never overwrites a final one.
    async fn append(&self, record: AuditRecord) -> Result<(), RepositoryError>;
    async fn list_for_task(&self, task_id: &TaskId) -> Result<Vec<AuditRecord>, RepositoryError>;
}

#[async_trait]
pub trait ContextRepository: Send + Sync {
    async fn save(&self, entry: ContextEntry) -> Result<(), RepositoryError>;

    /// Newest first.
    async fn list_for_tenant(
        &self,
        tenant_id: &TenantId,
        limit: u32,
    ) -> Result<Vec<ContextEntry>, RepositoryError>;
}
