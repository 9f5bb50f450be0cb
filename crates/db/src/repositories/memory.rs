use std::collections::HashMap;

use tokio::sync::RwLock;

use conductor_core::audit::AuditRecord;
use conductor_core::context::{rank_entries, ContextEntry, ContextQuery, ContextSnippet, ContextSource};
use conductor_core::domain::agent::{Agent, AgentId, TenantId};
use conductor_core::domain::task::{Task, TaskId, TaskState, TaskTransitionEvent};

use super::{
    AgentRepository, AuditRepository, ContextRepository, RepositoryError, TaskCursor,
    TaskRepository,
};

#[derive(Default)]
pub struct InMemoryTaskRepository {
    tasks: RwLock<HashMap<String, Task>>,
    transitions: RwLock<Vec<TaskTransitionEvent>>,
}

#[async_trait::async_trait]
impl TaskRepository for InMemoryTaskRepository {
    async fn find_by_id(&self, id: &TaskId) -> Result<Option<Task>, RepositoryError> {
        let tasks = self.tasks.read().await;
        Ok(tasks.get(&id.0).cloned())
    }

    async fn save(&self, task: Task) -> Result<(), RepositoryError> {
        let mut tasks = self.tasks.write().await;
        tasks.insert(task.id.0.clone(), task);
        Ok(())
    }

    async fn save_if_version(
        &self,
        task: Task,
        expected_version: u32,
    ) -> Result<bool, RepositoryError> {
        let mut tasks = self.tasks.write().await;
        match tasks.get(&task.id.0) {
            Some(stored) if stored.state_version == expected_version => {
                tasks.insert(task.id.0.clone(), task);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn list(
        &self,
        state: Option<TaskState>,
        tenant_id: Option<&TenantId>,
        limit: u32,
    ) -> Result<Vec<Task>, RepositoryError> {
        let tasks = self.tasks.read().await;
        let mut matching: Vec<Task> = tasks
            .values()
            .filter(|task| state.map_or(true, |state| task.state == state))
            .filter(|task| tenant_id.map_or(true, |tenant| &task.tenant_id == tenant))
            .cloned()
            .collect();
        matching.sort_by(|left, right| {
            left.created_at.cmp(&right.created_at).then_with(|| left.id.0.cmp(&right.id.0))
        });
        matching.truncate(limit as usize);
        Ok(matching)
    }

    async fn list_after(
        &self,
        state: TaskState,
        after: Option<&TaskCursor>,
        limit: u32,
    ) -> Result<Vec<Task>, RepositoryError> {
        let tasks = self.tasks.read().await;
        let mut matching: Vec<Task> = tasks
            .values()
            .filter(|task| task.state == state)
            .filter(|task| after.map_or(true, |cursor| cursor.precedes(task)))
            .cloned()
            .collect();
        matching.sort_by(|left, right| {
            left.created_at.cmp(&right.created_at).then_with(|| left.id.0.cmp(&right.id.0))
        });
        matching.truncate(limit as usize);
        Ok(matching)
    }

    async fn append_transition(
        &self,
        transition: TaskTransitionEvent,
    ) -> Result<(), RepositoryError> {
        self.transitions.write().await.push(transition);
        Ok(())
    }

    async fn list_transitions(
        &self,
        task_id: &TaskId,
    ) -> Result<Vec<TaskTransitionEvent>, RepositoryError> {
        let transitions = self.transitions.read().await;
        let mut events: Vec<TaskTransitionEvent> =
            transitions.iter().filter(|event| &event.task_id == task_id).cloned().collect();
        events.sort_by_key(|event| event.state_version);
        Ok(events)
    }
}

#[derive(Default)]
pub struct InMemoryAgentRepository {
    agents: RwLock<HashMap<String, Agent>>,
}

#[async_trait::async_trait]
impl AgentRepository for InMemoryAgentRepository {
    async fn find_by_id(&self, id: &AgentId) -> Result<Option<Agent>, RepositoryError> {
        let agents = self.agents.read().await;
        Ok(agents.get(&id.0).cloned())
    }

    async fn save(&self, agent: Agent) -> Result<(), RepositoryError> {
        let mut agents = self.agents.write().await;
        agents.insert(agent.id.0.clone(), agent);
        Ok(())
    }

    async fn list_for_tenant(&self, tenant_id: &TenantId) -> Result<Vec<Agent>, RepositoryError> {
        let agents = self.agents.read().await;
        let mut matching: Vec<Agent> =
            agents.values().filter(|agent| &agent.tenant_id == tenant_id).cloned().collect();
        matching.sort_by(|left, right| left.id.0.cmp(&right.id.0));
        Ok(matching)
    }
}

#[derive(Default)]
pub struct InMemoryAuditRepository {
    records: RwLock<Vec<AuditRecord>>,
}

#[async_trait::async_trait]
impl AuditRepository for InMemoryAuditRepository {
    async fn append(&self, record: AuditRecord) -> Result<(), RepositoryError> {
        let mut records = self.records.write().await;
        match records.iter_mut().find(|stored| stored.id == record.id) {
            Some(stored) if !stored.is_final() => *stored = record,
            Some(_) => {}
            None => records.push(record),
        }
        Ok(())
    }

    async fn list_for_task(&self, task_id: &TaskId) -> Result<Vec<AuditRecord>, RepositoryError> {
        let records = self.records.read().await;
        let mut matching: Vec<AuditRecord> =
            records.iter().filter(|record| &record.task_id == task_id).cloned().collect();
        matching.sort_by(|left, right| {
            left.started_at
                .cmp(&right.started_at)
                .then_with(|| left.action_sequence.cmp(&right.action_sequence))
        });
        Ok(matching)
    }
}

#[derive(Default)]
pub struct InMemoryContextRepository {
    entries: RwLock<HashMap<String, ContextEntry>>,
}

#[async_trait::async_trait]
impl ContextRepository for InMemoryContextRepository {
    async fn save(&self, entry: ContextEntry) -> Result<(), RepositoryError> {
        let mut entries = self.entries.write().await;
        entries.insert(entry.id.clone(), entry);
        Ok(())
    }

    async fn list_for_tenant(
        &self,
        tenant_id: &TenantId,
        limit: u32,
    ) -> Result<Vec<ContextEntry>, RepositoryError> {
        let entries = self.entries.read().await;
        let mut matching: Vec<ContextEntry> =
            entries.values().filter(|entry| &entry.tenant_id == tenant_id).cloned().collect();
        matching.sort_by(|left, right| right.created_at.cmp(&left.created_at));
        matching.truncate(limit as usize);
        Ok(matching)
    }
}

#[async_trait::async_trait]
impl ContextSource for InMemoryContextRepository {
    async fn search(&self, tenant_id: &TenantId, query: &ContextQuery) -> Vec<ContextSnippet> {
        match self.list_for_tenant(tenant_id, u32::MAX).await {
            Ok(entries) => rank_entries(&entries, query),
            Err(_) => Vec::new(),
        }
    }
}
