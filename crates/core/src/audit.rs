use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::domain::agent::{AgentId, TenantId};
use crate::domain::capability::CapabilityCode;
use crate::domain::task::TaskId;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AuditRecordId(pub String);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditStatus {
    Attempted,
    Success,
    Failed,
}

impl AuditStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Attempted => "attempted",
            Self::Success => "success",
            Self::Failed => "failed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "attempted" => Some(Self::Attempted),
            "success" => Some(Self::Success),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

/// Trace of one capability dispatch. Emitted as `attempted` before the handler
/// runs and emitted again, under the same id, once the outcome is known.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub id: AuditRecordId,
    pub task_id: TaskId,
    pub action_sequence: u32,
    pub tenant_id: TenantId,
    pub agent_id: AgentId,
    pub capability_code: CapabilityCode,
    pub impersonation_identity: String,
    pub params: Value,
    pub status: AuditStatus,
    pub result: Option<String>,
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl AuditRecord {
    #[allow(clippy::too_many_arguments)]
    pub fn attempted(
        task_id: TaskId,
        action_sequence: u32,
        tenant_id: TenantId,
        agent_id: AgentId,
        capability_code: CapabilityCode,
        impersonation_identity: impl Into<String>,
        params: Value,
    ) -> Self {
        Self {
            id: AuditRecordId(Uuid::new_v4().to_string()),
            task_id,
            action_sequence,
            tenant_id,
            agent_id,
            capability_code,
            impersonation_identity: impersonation_identity.into(),
            params,
            status: AuditStatus::Attempted,
            result: None,
            error: None,
            started_at: Utc::now(),
            finished_at: None,
        }
    }

    pub fn succeeded(mut self, result: impl Into<String>) -> Self {
        self.status = AuditStatus::Success;
        self.result = Some(result.into());
        self.finished_at = Some(Utc::now());
        self
    }

    pub fn failed(mut self, error: impl Into<String>) -> Self {
        self.status = AuditStatus::Failed;
        self.error = Some(error.into());
        self.finished_at = Some(Utc::now());
        self
    }

    pub fn is_final(&self) -> bool {
        self.status != AuditStatus::Attempted
    }
}

/// Append-only destination for audit records. Implementations must not block
/// the caller or surface write failures to it.
pub trait AuditSink: Send + Sync {
    fn emit(&self, record: AuditRecord);
}

#[derive(Clone, Default)]
pub struct InMemoryAuditSink {
    records: Arc<Mutex<Vec<AuditRecord>>>,
}

impl InMemoryAuditSink {
    pub fn records(&self) -> Vec<AuditRecord> {
        match self.records.lock() {
            Ok(records) => records.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn records_for(&self, task_id: &TaskId) -> Vec<AuditRecord> {
        self.records().into_iter().filter(|record| &record.task_id == task_id).collect()
    }
}

impl AuditSink for InMemoryAuditSink {
    fn emit(&self, record: AuditRecord) {
        match self.records.lock() {
            Ok(mut records) => records.push(record),
            Err(poisoned) => poisoned.into_inner().push(record),
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use crate::audit::{AuditRecord, AuditSink, AuditStatus, InMemoryAuditSink};
    use crate::domain::agent::{AgentId, TenantId};
    use crate::domain::capability::CapabilityCode;
    use crate::domain::task::TaskId;

    fn attempted() -> AuditRecord {
        AuditRecord::attempted(
            TaskId("task-1".to_owned()),
            1,
            TenantId("acme".to_owned()),
            AgentId("sales-bot".to_owned()),
            CapabilityCode::new("crm.lookup_partner"),
            "svc-sales",
            json!({"partner_id": 7}),
        )
    }

    #[test]
    fn attempted_record_is_not_final_until_outcome_is_known() {
        let record = attempted();
        assert_eq!(record.status, AuditStatus::Attempted);
        assert!(!record.is_final());
        assert!(record.finished_at.is_none());

        let id = record.id.clone();
        let finished = record.failed("partner not found");
        assert_eq!(finished.id, id);
        assert_eq!(finished.status, AuditStatus::Failed);
        assert_eq!(finished.error.as_deref(), Some("partner not found"));
        assert!(finished.is_final());
    }

    #[test]
    fn in_memory_sink_keeps_both_phases_of_a_dispatch() {
        let sink = InMemoryAuditSink::default();
        let record = attempted();
        sink.emit(record.clone());
        sink.emit(record.succeeded("{\"name\":\"Acme\"}"));

        let records = sink.records_for(&TaskId("task-1".to_owned()));
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].id, records[1].id);
        assert_eq!(records[0].impersonation_identity, "svc-sales");
        assert_eq!(records[1].status, AuditStatus::Success);
    }

    #[test]
    fn audit_status_round_trips_from_storage_encoding() {
        for status in [AuditStatus::Attempted, AuditStatus::Success, AuditStatus::Failed] {
            assert_eq!(AuditStatus::parse(status.as_str()), Some(status));
        }
    }
}
