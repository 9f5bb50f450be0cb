use std::collections::BTreeSet;
use std::str::FromStr;

use conductor_core::chrono::Utc;
use rust_decimal::Decimal;
use sqlx::{sqlite::SqliteRow, Row};

use conductor_core::domain::agent::{Agent, AgentId, AgentLlmProvider, AutonomyLevel, TenantId};
use conductor_core::domain::capability::CapabilityCode;
use conductor_core::domain::policy::Policy;

use super::rows::{encode_json, parse_json};
use super::{AgentRepository, RepositoryError};
use crate::DbPool;

const AGENT_COLUMNS: &str = "id,
    tenant_id,
    name,
    active,
    role,
    manager_agent_id,
    impersonation_identity,
    policy_name,
    require_approval_high_risk,
    require_approval_over_amount,
    amount_limit,
    forbid_delete,
    allowed_capabilities_json,
    llm_provider,
    model_name,
    system_prompt,
    autonomy_level";

pub struct SqlAgentRepository {
    pool: DbPool,
}

impl SqlAgentRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl AgentRepository for SqlAgentRepository {
    async fn find_by_id(&self, id: &AgentId) -> Result<Option<Agent>, RepositoryError> {
        let row = sqlx::query(&format!("SELECT {AGENT_COLUMNS} FROM agent WHERE id = ?"))
            .bind(&id.0)
            .fetch_optional(&self.pool)
            .await?;

        row.map(agent_from_row).transpose()
    }

    async fn save(&self, agent: Agent) -> Result<(), RepositoryError> {
        let allowed: Vec<&str> =
            agent.allowed_capabilities.iter().map(CapabilityCode::as_str).collect();
        let allowed_json = encode_json("allowed_capabilities_json", &allowed)?;

        sqlx::query(
            "INSERT INTO agent (
                id,
                tenant_id,
                name,
                active,
                role,
                manager_agent_id,
                impersonation_identity,
                policy_name,
                require_approval_high_risk,
                require_approval_over_amount,
                amount_limit,
                forbid_delete,
                allowed_capabilities_json,
                llm_provider,
                model_name,
                system_prompt,
                autonomy_level,
                updated_at
             ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                tenant_id = excluded.tenant_id,
                name = excluded.name,
                active = excluded.active,
                role = excluded.role,
                manager_agent_id = excluded.manager_agent_id,
                impersonation_identity = excluded.impersonation_identity,
                policy_name = excluded.policy_name,
                require_approval_high_risk = excluded.require_approval_high_risk,
                require_approval_over_amount = excluded.require_approval_over_amount,
                amount_limit = excluded.amount_limit,
                forbid_delete = excluded.forbid_delete,
                allowed_capabilities_json = excluded.allowed_capabilities_json,
                llm_provider = excluded.llm_provider,
                model_name = excluded.model_name,
                system_prompt = excluded.system_prompt,
                autonomy_level = excluded.autonomy_level,
                updated_at = excluded.updated_at",
        )
        .bind(&agent.id.0)
        .bind(&agent.tenant_id.0)
        .bind(&agent.name)
        .bind(agent.active)
        .bind(agent.role.as_deref())
        .bind(agent.manager_agent_id.as_ref().map(|id| id.0.as_str()))
        .bind(&agent.impersonation_identity)
        .bind(&agent.policy.name)
        .bind(agent.policy.require_approval_high_risk)
        .bind(agent.policy.require_approval_over_amount)
        .bind(agent.policy.amount_limit.to_string())
        .bind(agent.policy.forbid_delete)
        .bind(allowed_json)
        .bind(agent.llm_provider.as_str())
        .bind(agent.model_name.as_deref())
        .bind(agent.system_prompt.as_deref())
        .bind(agent.autonomy_level.as_str())
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn list_for_tenant(&self, tenant_id: &TenantId) -> Result<Vec<Agent>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {AGENT_COLUMNS} FROM agent WHERE tenant_id = ? ORDER BY id ASC"
        ))
        .bind(&tenant_id.0)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(agent_from_row).collect()
    }
}

fn agent_from_row(row: SqliteRow) -> Result<Agent, RepositoryError> {
    let autonomy_raw = row.try_get::<String, _>("autonomy_level")?;
    let autonomy_level = AutonomyLevel::parse(&autonomy_raw).ok_or_else(|| {
        RepositoryError::Decode(format!("unknown autonomy level `{autonomy_raw}`"))
    })?;

    let provider_raw = row.try_get::<String, _>("llm_provider")?;
    let llm_provider = AgentLlmProvider::parse(&provider_raw)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown llm provider `{provider_raw}`")))?;

    let amount_raw = row.try_get::<String, _>("amount_limit")?;
    let amount_limit = Decimal::from_str(&amount_raw).map_err(|error| {
        RepositoryError::Decode(format!("invalid amount_limit `{amount_raw}` ({error})"))
    })?;

    let allowed_raw = row.try_get::<String, _>("allowed_capabilities_json")?;
    let allowed: Vec<String> = parse_json("allowed_capabilities_json", &allowed_raw)?;

    Ok(Agent {
        id: AgentId(row.try_get("id")?),
        tenant_id: TenantId(row.try_get("tenant_id")?),
        name: row.try_get("name")?,
        active: row.try_get("active")?,
        role: row.try_get("role")?,
        manager_agent_id: row.try_get::<Option<String>, _>("manager_agent_id")?.map(AgentId),
        impersonation_identity: row.try_get("impersonation_identity")?,
        policy: Policy {
            name: row.try_get("policy_name")?,
            require_approval_high_risk: row.try_get("require_approval_high_risk")?,
            require_approval_over_amount: row.try_get("require_approval_over_amount")?,
            amount_limit,
            forbid_delete: row.try_get("forbid_delete")?,
        },
        allowed_capabilities: allowed.into_iter().map(CapabilityCode).collect::<BTreeSet<_>>(),
        llm_provider,
        model_name: row.try_get("model_name")?,
        system_prompt: row.try_get("system_prompt")?,
        autonomy_level,
    })
}
