use sqlx::{sqlite::SqliteRow, Row};

use conductor_core::audit::{AuditRecord, AuditRecordId, AuditStatus};
use conductor_core::domain::agent::{AgentId, TenantId};
use conductor_core::domain::capability::CapabilityCode;
use conductor_core::domain::task::TaskId;

use super::rows::{encode_json, parse_json, parse_optional_timestamp, parse_timestamp, parse_u32};
use super::{AuditRepository, RepositoryError};
use crate::DbPool;

pub struct SqlAuditRepository {
    pool: DbPool,
}

impl SqlAuditRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl AuditRepository for SqlAuditRepository {
    async fn append(&self, record: AuditRecord) -> Result<(), RepositoryError> {
        let params = encode_json("params_json", &record.params)?;

        sqlx::query(
            "INSERT INTO audit_record (
                id,
                task_id,
                action_sequence,
                tenant_id,
                agent_id,
                capability_code,
                impersonation_identity,
                params_json,
                status,
                result,
                error,
                started_at,
                finished_at
             ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                status = excluded.status,
                result = excluded.result,
                error = excluded.error,
                finished_at = excluded.finished_at
             WHERE audit_record.status = 'attempted'",
        )
        .bind(&record.id.0)
        .bind(&record.task_id.0)
        .bind(i64::from(record.action_sequence))
        .bind(&record.tenant_id.0)
        .bind(&record.agent_id.0)
        .bind(record.capability_code.as_str())
        .bind(&record.impersonation_identity)
        .bind(params)
        .bind(record.status.as_str())
        .bind(record.result.as_deref())
        .bind(record.error.as_deref())
        .bind(record.started_at.to_rfc3339())
        .bind(record.finished_at.map(|value| value.to_rfc3339()))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn list_for_task(&self, task_id: &TaskId) -> Result<Vec<AuditRecord>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT
                id,
                task_id,
                action_sequence,
                tenant_id,
                agent_id,
                capability_code,
                impersonation_identity,
                params_json,
                status,
                result,
                error,
                started_at,
                finished_at
             FROM audit_record
             WHERE task_id = ?
             ORDER BY started_at ASC, action_sequence ASC",
        )
        .bind(&task_id.0)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(record_from_row).collect()
    }
}

fn record_from_row(row: SqliteRow) -> Result<AuditRecord, RepositoryError> {
    let status_raw = row.try_get::<String, _>("status")?;
    let status = AuditStatus::parse(&status_raw)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown audit status `{status_raw}`")))?;
    let params_raw = row.try_get::<String, _>("params_json")?;

    Ok(AuditRecord {
        id: AuditRecordId(row.try_get("id")?),
        task_id: TaskId(row.try_get("task_id")?),
        action_sequence: parse_u32("action_sequence", row.try_get("action_sequence")?)?,
        tenant_id: TenantId(row.try_get("tenant_id")?),
        agent_id: AgentId(row.try_get("agent_id")?),
        capability_code: CapabilityCode(row.try_get("capability_code")?),
        impersonation_identity: row.try_get("impersonation_identity")?,
        params: parse_json("params_json", &params_raw)?,
        status,
        result: row.try_get("result")?,
        error: row.try_get("error")?,
        started_at: parse_timestamp("started_at", row.try_get("started_at")?)?,
        finished_at: parse_optional_timestamp("finished_at", row.try_get("finished_at")?)?,
    })
}
