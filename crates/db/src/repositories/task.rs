use sqlx::sqlite::{SqliteArguments, SqliteRow};
use sqlx::{query::Query, Row, Sqlite, SqliteConnection};

use conductor_core::domain::agent::{AgentId, TenantId};
use conductor_core::domain::capability::CapabilityCode;
use conductor_core::domain::task::{
    ActionState, ApprovalFinding, PlannedAction, Task, TaskId, TaskState, TaskTransitionEvent,
    TaskTransitionId,
};

use super::rows::{encode_json, parse_json, parse_optional_timestamp, parse_timestamp, parse_u32};
use super::{RepositoryError, TaskCursor, TaskRepository};
use crate::DbPool;

const TASK_COLUMNS: &str = "id,
    tenant_id,
    requester,
    agent_id,
    router_agent_id,
    executing_agent_id,
    user_request,
    retrieved_context,
    router_output,
    plan_output,
    state,
    has_destructive_actions,
    approval_required,
    approval_findings_json,
    approved_by,
    approved_at,
    result,
    error,
    claimed_by,
    claimed_at,
    state_version,
    created_at,
    updated_at";

pub struct SqlTaskRepository {
    pool: DbPool,
}

impl SqlTaskRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    async fn load_plan(&self, task: &mut Task) -> Result<(), RepositoryError> {
        let rows = sqlx::query(
            "SELECT
                sequence,
                capability_code,
                params_json,
                rationale,
                state,
                result,
                error,
                started_at,
                finished_at
             FROM task_action
             WHERE task_id = ?
             ORDER BY sequence ASC",
        )
        .bind(&task.id.0)
        .fetch_all(&self.pool)
        .await?;

        task.plan = rows.into_iter().map(action_from_row).collect::<Result<_, _>>()?;
        Ok(())
    }

    async fn tasks_with_plans(&self, rows: Vec<SqliteRow>) -> Result<Vec<Task>, RepositoryError> {
        let mut tasks = Vec::with_capacity(rows.len());
        for row in rows {
            let mut task = task_from_row(row)?;
            self.load_plan(&mut task).await?;
            tasks.push(task);
        }
        Ok(tasks)
    }
}

#[async_trait::async_trait]
impl TaskRepository for SqlTaskRepository {
    async fn find_by_id(&self, id: &TaskId) -> Result<Option<Task>, RepositoryError> {
        let row = sqlx::query(&format!("SELECT {TASK_COLUMNS} FROM task WHERE id = ?"))
            .bind(&id.0)
            .fetch_optional(&self.pool)
            .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        let mut task = task_from_row(row)?;
        self.load_plan(&mut task).await?;
        Ok(Some(task))
    }

    async fn save(&self, task: Task) -> Result<(), RepositoryError> {
        let findings = encode_json("approval_findings_json", &task.approval_findings)?;
        let mut tx = self.pool.begin().await?;

        let query = sqlx::query(
            "INSERT INTO task (
                tenant_id,
                requester,
                agent_id,
                router_agent_id,
                executing_agent_id,
                user_request,
                retrieved_context,
                router_output,
                plan_output,
                state,
                has_destructive_actions,
                approval_required,
                approval_findings_json,
                approved_by,
                approved_at,
                result,
                error,
                claimed_by,
                claimed_at,
                state_version,
                created_at,
                updated_at,
                id
             ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                tenant_id = excluded.tenant_id,
                requester = excluded.requester,
                agent_id = excluded.agent_id,
                router_agent_id = excluded.router_agent_id,
                executing_agent_id = excluded.executing_agent_id,
                user_request = excluded.user_request,
                retrieved_context = excluded.retrieved_context,
                router_output = excluded.router_output,
                plan_output = excluded.plan_output,
                state = excluded.state,
                has_destructive_actions = excluded.has_destructive_actions,
                approval_required = excluded.approval_required,
                approval_findings_json = excluded.approval_findings_json,
                approved_by = excluded.approved_by,
                approved_at = excluded.approved_at,
                result = excluded.result,
                error = excluded.error,
                claimed_by = excluded.claimed_by,
                claimed_at = excluded.claimed_at,
                state_version = excluded.state_version,
                updated_at = excluded.updated_at",
        );
        bind_task_fields(query, &task, findings).bind(&task.id.0).execute(&mut *tx).await?;

        replace_plan(&mut tx, &task).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn save_if_version(
        &self,
        task: Task,
        expected_version: u32,
    ) -> Result<bool, RepositoryError> {
        let findings = encode_json("approval_findings_json", &task.approval_findings)?;
        let mut tx = self.pool.begin().await?;

        let query = sqlx::query(
            "UPDATE task SET
                tenant_id = ?,
                requester = ?,
                agent_id = ?,
                router_agent_id = ?,
                executing_agent_id = ?,
                user_request = ?,
                retrieved_context = ?,
                router_output = ?,
                plan_output = ?,
                state = ?,
                has_destructive_actions = ?,
                approval_required = ?,
                approval_findings_json = ?,
                approved_by = ?,
                approved_at = ?,
                result = ?,
                error = ?,
                claimed_by = ?,
                claimed_at = ?,
                state_version = ?,
                created_at = ?,
                updated_at = ?
             WHERE id = ? AND state_version = ?",
        );
        let updated = bind_task_fields(query, &task, findings)
            .bind(&task.id.0)
            .bind(i64::from(expected_version))
            .execute(&mut *tx)
            .await?
            .rows_affected();

        if updated == 0 {
            tx.rollback().await?;
            return Ok(false);
        }

        replace_plan(&mut tx, &task).await?;
        tx.commit().await?;
        Ok(true)
    }

    async fn list(
        &self,
        state: Option<TaskState>,
        tenant_id: Option<&TenantId>,
        limit: u32,
    ) -> Result<Vec<Task>, RepositoryError> {
        let mut clauses = Vec::new();
        if state.is_some() {
            clauses.push("state = ?");
        }
        if tenant_id.is_some() {
            clauses.push("tenant_id = ?");
        }
        let filter = if clauses.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", clauses.join(" AND "))
        };
        let sql =
            format!("SELECT {TASK_COLUMNS} FROM task{filter} ORDER BY created_at ASC, id ASC LIMIT ?");

        let mut query = sqlx::query(&sql);
        if let Some(state) = state {
            query = query.bind(state.as_str());
        }
        if let Some(tenant_id) = tenant_id {
            query = query.bind(&tenant_id.0);
        }
        let rows = query.bind(i64::from(limit)).fetch_all(&self.pool).await?;
        self.tasks_with_plans(rows).await
    }

    async fn list_after(
        &self,
        state: TaskState,
        after: Option<&TaskCursor>,
        limit: u32,
    ) -> Result<Vec<Task>, RepositoryError> {
        let keyset = if after.is_some() {
            " AND (created_at > ? OR (created_at = ? AND id > ?))"
        } else {
            ""
        };
        let sql = format!(
            "SELECT {TASK_COLUMNS} FROM task WHERE state = ?{keyset} ORDER BY created_at ASC, id ASC LIMIT ?"
        );

        let mut query = sqlx::query(&sql).bind(state.as_str());
        if let Some(cursor) = after {
            let created_at = cursor.created_at.to_rfc3339();
            query = query.bind(created_at.clone()).bind(created_at).bind(&cursor.id.0);
        }
        let rows = query.bind(i64::from(limit)).fetch_all(&self.pool).await?;
        self.tasks_with_plans(rows).await
    }

    async fn append_transition(
        &self,
        transition: TaskTransitionEvent,
    ) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO task_transition (
                id,
                task_id,
                from_state,
                to_state,
                reason,
                actor,
                detail_json,
                state_version,
                occurred_at
             ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&transition.id.0)
        .bind(&transition.task_id.0)
        .bind(transition.from_state.as_ref().map(TaskState::as_str))
        .bind(transition.to_state.as_str())
        .bind(&transition.reason)
        .bind(&transition.actor)
        .bind(&transition.detail_json)
        .bind(i64::from(transition.state_version))
        .bind(transition.occurred_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn list_transitions(
        &self,
        task_id: &TaskId,
    ) -> Result<Vec<TaskTransitionEvent>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT
                id,
                task_id,
                from_state,
                to_state,
                reason,
                actor,
                detail_json,
                state_version,
                occurred_at
             FROM task_transition
             WHERE task_id = ?
             ORDER BY state_version ASC, occurred_at ASC",
        )
        .bind(&task_id.0)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(transition_from_row).collect()
    }
}

fn bind_task_fields<'q>(
    query: Query<'q, Sqlite, SqliteArguments<'q>>,
    task: &'q Task,
    approval_findings_json: String,
) -> Query<'q, Sqlite, SqliteArguments<'q>> {
    query
        .bind(&task.tenant_id.0)
        .bind(&task.requester)
        .bind(&task.agent_id.0)
        .bind(task.router_agent_id.as_ref().map(|id| id.0.as_str()))
        .bind(task.executing_agent_id.as_ref().map(|id| id.0.as_str()))
        .bind(&task.user_request)
        .bind(&task.retrieved_context)
        .bind(task.router_output.as_deref())
        .bind(task.plan_output.as_deref())
        .bind(task.state.as_str())
        .bind(task.has_destructive_actions)
        .bind(task.approval_required)
        .bind(approval_findings_json)
        .bind(task.approved_by.as_deref())
        .bind(task.approved_at.map(|value| value.to_rfc3339()))
        .bind(task.result.as_deref())
        .bind(task.error.as_deref())
        .bind(task.claimed_by.as_deref())
        .bind(task.claimed_at.map(|value| value.to_rfc3339()))
        .bind(i64::from(task.state_version))
        .bind(task.created_at.to_rfc3339())
        .bind(task.updated_at.to_rfc3339())
}

/// The plan is always rewritten as a whole; there are no partial plan updates.
async fn replace_plan(conn: &mut SqliteConnection, task: &Task) -> Result<(), RepositoryError> {
    sqlx::query("DELETE FROM task_action WHERE task_id = ?")
        .bind(&task.id.0)
        .execute(&mut *conn)
        .await?;

    for action in &task.plan {
        let params = encode_json("params_json", &action.params)?;
        sqlx::query(
            "INSERT INTO task_action (
                task_id,
                sequence,
                capability_code,
                params_json,
                rationale,
                state,
                result,
                error,
                started_at,
                finished_at
             ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&task.id.0)
        .bind(i64::from(action.sequence))
        .bind(action.capability_code.as_str())
        .bind(params)
        .bind(&action.rationale)
        .bind(action.state.as_str())
        .bind(action.result.as_deref())
        .bind(action.error.as_deref())
        .bind(action.started_at.map(|value| value.to_rfc3339()))
        .bind(action.finished_at.map(|value| value.to_rfc3339()))
        .execute(&mut *conn)
        .await?;
    }

    Ok(())
}

fn task_from_row(row: SqliteRow) -> Result<Task, RepositoryError> {
    let state_raw = row.try_get::<String, _>("state")?;
    let state = TaskState::parse(&state_raw)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown task state `{state_raw}`")))?;
    let findings_raw = row.try_get::<String, _>("approval_findings_json")?;
    let approval_findings: Vec<ApprovalFinding> =
        parse_json("approval_findings_json", &findings_raw)?;

    Ok(Task {
        id: TaskId(row.try_get("id")?),
        tenant_id: TenantId(row.try_get("tenant_id")?),
        requester: row.try_get("requester")?,
        agent_id: AgentId(row.try_get("agent_id")?),
        router_agent_id: row.try_get::<Option<String>, _>("router_agent_id")?.map(AgentId),
        executing_agent_id: row.try_get::<Option<String>, _>("executing_agent_id")?.map(AgentId),
        user_request: row.try_get("user_request")?,
        retrieved_context: row.try_get("retrieved_context")?,
        router_output: row.try_get("router_output")?,
        plan_output: row.try_get("plan_output")?,
        plan: Vec::new(),
        state,
        has_destructive_actions: row.try_get("has_destructive_actions")?,
        approval_required: row.try_get("approval_required")?,
        approval_findings,
        approved_by: row.try_get("approved_by")?,
        approved_at: parse_optional_timestamp("approved_at", row.try_get("approved_at")?)?,
        result: row.try_get("result")?,
        error: row.try_get("error")?,
        claimed_by: row.try_get("claimed_by")?,
        claimed_at: parse_optional_timestamp("claimed_at", row.try_get("claimed_at")?)?,
        state_version: parse_u32("state_version", row.try_get("state_version")?)?,
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
        updated_at: parse_timestamp("updated_at", row.try_get("updated_at")?)?,
    })
}

fn action_from_row(row: SqliteRow) -> Result<PlannedAction, RepositoryError> {
    let state_raw = row.try_get::<String, _>("state")?;
    let state = ActionState::parse(&state_raw)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown action state `{state_raw}`")))?;
    let params_raw = row.try_get::<String, _>("params_json")?;

    Ok(PlannedAction {
        sequence: parse_u32("sequence", row.try_get("sequence")?)?,
        capability_code: CapabilityCode(row.try_get("capability_code")?),
        params: parse_json("params_json", &params_raw)?,
        rationale: row.try_get("rationale")?,
        state,
        result: row.try_get("result")?,
        error: row.try_get("error")?,
        started_at: parse_optional_timestamp("started_at", row.try_get("started_at")?)?,
        finished_at: parse_optional_timestamp("finished_at", row.try_get("finished_at")?)?,
    })
}

fn transition_from_row(row: SqliteRow) -> Result<TaskTransitionEvent, RepositoryError> {
    let from_state = row
        .try_get::<Option<String>, _>("from_state")?
        .map(|value| {
            TaskState::parse(&value)
                .ok_or_else(|| RepositoryError::Decode(format!("unknown from_state `{value}`")))
        })
        .transpose()?;

    let to_state_raw = row.try_get::<String, _>("to_state")?;
    let to_state = TaskState::parse(&to_state_raw)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown to_state `{to_state_raw}`")))?;

    Ok(TaskTransitionEvent {
        id: TaskTransitionId(row.try_get("id")?),
        task_id: TaskId(row.try_get("task_id")?),
        from_state,
        to_state,
        reason: row.try_get("reason")?,
        actor: row.try_get("actor")?,
        detail_json: row.try_get("detail_json")?,
        state_version: parse_u32("state_version", row.try_get("state_version")?)?,
        occurred_at: parse_timestamp("occurred_at", row.try_get("occurred_at")?)?,
    })
}

#[cfg(test)]
mod tests {
    use chrono::{DateTime, Utc};
    use rust_decimal::Decimal;
    use serde_json::json;

    use conductor_core::domain::agent::{AgentId, TenantId};
    use conductor_core::domain::capability::CapabilityCode;
    use conductor_core::domain::task::{
        ActionState, ApprovalFinding, ApprovalReason, PlannedAction, Task, TaskId, TaskState,
        TaskTransitionEvent, TaskTransitionId,
    };

    use super::SqlTaskRepository;
    use crate::migrations;
    use crate::repositories::{TaskCursor, TaskRepository};
    use crate::{connect_with_settings, DbPool};

    #[tokio::test]
    async fn sql_task_repo_round_trips_task_plan_and_findings() {
        let pool = setup_pool().await;
        let repo = SqlTaskRepository::new(pool.clone());
        let task = sample_task("task-rel-001", TaskState::WaitingApproval);

        repo.save(task.clone()).await.expect("save task");

        let found = repo.find_by_id(&task.id).await.expect("find task");
        assert_eq!(found, Some(task));

        let missing = repo.find_by_id(&TaskId("nope".to_string())).await.expect("find missing");
        assert_eq!(missing, None);

        pool.close().await;
    }

    #[tokio::test]
    async fn saving_a_replanned_task_replaces_the_whole_plan() {
        let pool = setup_pool().await;
        let repo = SqlTaskRepository::new(pool.clone());
        let mut task = sample_task("task-rel-002", TaskState::Planned);
        repo.save(task.clone()).await.expect("save task");

        task.plan = vec![PlannedAction::pending(
            1,
            CapabilityCode::new("crm.add_note"),
            json!({"body": "call back"}),
            "follow up",
        )];
        repo.save(task.clone()).await.expect("save replanned task");

        let found = repo.find_by_id(&task.id).await.expect("find task").expect("task exists");
        assert_eq!(found.plan.len(), 1);
        assert_eq!(found.plan[0].capability_code, CapabilityCode::new("crm.add_note"));

        pool.close().await;
    }

    #[tokio::test]
    async fn save_if_version_rejects_stale_writers() {
        let pool = setup_pool().await;
        let repo = SqlTaskRepository::new(pool.clone());
        let task = sample_task("task-rel-003", TaskState::Planned);
        repo.save(task.clone()).await.expect("save task");

        let mut first = task.clone();
        first.state = TaskState::Running;
        first.claimed_by = Some("worker-1".to_string());
        first.state_version = 2;
        assert!(repo.save_if_version(first.clone(), 1).await.expect("first claim"));

        let mut second = task.clone();
        second.state = TaskState::Running;
        second.claimed_by = Some("worker-2".to_string());
        second.state_version = 2;
        assert!(!repo.save_if_version(second, 1).await.expect("second claim"));

        let stored = repo.find_by_id(&task.id).await.expect("find task").expect("task exists");
        assert_eq!(stored.claimed_by.as_deref(), Some("worker-1"));
        assert_eq!(stored.state_version, 2);

        pool.close().await;
    }

    #[tokio::test]
    async fn list_filters_by_state_and_tenant_oldest_first() {
        let pool = setup_pool().await;
        let repo = SqlTaskRepository::new(pool.clone());

        let mut older = sample_task("task-rel-010", TaskState::Planned);
        older.created_at = parse_ts("2026-02-23T11:00:00Z");
        let newer = sample_task("task-rel-011", TaskState::Planned);
        let done = sample_task("task-rel-012", TaskState::Done);
        let mut other_tenant = sample_task("task-rel-013", TaskState::Planned);
        other_tenant.tenant_id = TenantId("globex".to_string());

        for task in [newer.clone(), done, older.clone(), other_tenant] {
            repo.save(task).await.expect("save task");
        }

        let planned = repo
            .list(Some(TaskState::Planned), Some(&TenantId("acme".to_string())), 10)
            .await
            .expect("list planned");
        let ids: Vec<&str> = planned.iter().map(|task| task.id.0.as_str()).collect();
        assert_eq!(ids, vec!["task-rel-010", "task-rel-011"]);
        assert_eq!(planned[0].plan, older.plan);

        let limited = repo.list(Some(TaskState::Planned), None, 1).await.expect("list limited");
        assert_eq!(limited.len(), 1);

        let everything = repo.list(None, None, 10).await.expect("list all");
        assert_eq!(everything.len(), 4);

        pool.close().await;
    }

    #[tokio::test]
    async fn list_after_resumes_behind_the_cursor() {
        let pool = setup_pool().await;
        let repo = SqlTaskRepository::new(pool.clone());

        let mut oldest = sample_task("task-rel-031", TaskState::Planned);
        oldest.created_at = parse_ts("2026-02-23T11:00:00Z");
        let tied_first = sample_task("task-rel-032", TaskState::Planned);
        let tied_second = sample_task("task-rel-033", TaskState::Planned);
        let running = sample_task("task-rel-034", TaskState::Running);
        for task in [tied_second, running, oldest.clone(), tied_first.clone()] {
            repo.save(task).await.expect("save task");
        }

        let head = repo.list_after(TaskState::Planned, None, 2).await.expect("first page");
        let ids: Vec<&str> = head.iter().map(|task| task.id.0.as_str()).collect();
        assert_eq!(ids, vec!["task-rel-031", "task-rel-032"]);
        assert_eq!(head[1].plan, tied_first.plan);

        let cursor = TaskCursor::of(&head[1]);
        let tail = repo.list_after(TaskState::Planned, Some(&cursor), 2).await.expect("next page");
        let ids: Vec<&str> = tail.iter().map(|task| task.id.0.as_str()).collect();
        assert_eq!(ids, vec!["task-rel-033"]);

        let past_end = TaskCursor::of(&tail[0]);
        let empty = repo.list_after(TaskState::Planned, Some(&past_end), 2).await.expect("end");
        assert!(empty.is_empty());

        pool.close().await;
    }

    #[tokio::test]
    async fn transitions_round_trip_in_version_order() {
        let pool = setup_pool().await;
        let repo = SqlTaskRepository::new(pool.clone());
        let task = sample_task("task-rel-020", TaskState::Planned);
        repo.save(task.clone()).await.expect("save task");

        let claimed = TaskTransitionEvent {
            id: TaskTransitionId("trans-2".to_string()),
            task_id: task.id.clone(),
            from_state: Some(TaskState::Planned),
            to_state: TaskState::Running,
            reason: "task_claimed".to_string(),
            actor: "worker-1".to_string(),
            detail_json: "{\"worker_id\":\"worker-1\"}".to_string(),
            state_version: 3,
            occurred_at: parse_ts("2026-02-23T12:01:00Z"),
        };
        let committed = TaskTransitionEvent {
            id: TaskTransitionId("trans-1".to_string()),
            from_state: Some(TaskState::Draft),
            to_state: TaskState::Planned,
            reason: "plan_committed".to_string(),
            actor: "planner".to_string(),
            state_version: 2,
            occurred_at: parse_ts("2026-02-23T12:00:30Z"),
            ..claimed.clone()
        };

        repo.append_transition(claimed.clone()).await.expect("append claimed");
        repo.append_transition(committed.clone()).await.expect("append committed");

        let transitions = repo.list_transitions(&task.id).await.expect("list transitions");
        assert_eq!(transitions, vec![committed, claimed]);

        pool.close().await;
    }

    async fn setup_pool() -> DbPool {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect test pool");
        migrations::run_pending(&pool).await.expect("run migrations");
        pool
    }

    fn sample_task(id: &str, state: TaskState) -> Task {
        let created_at = parse_ts("2026-02-23T12:00:00Z");
        let mut lookup = PlannedAction::pending(
            1,
            CapabilityCode::new("crm.lookup_partner"),
            json!({"name": "Acme"}),
            "find the partner",
        );
        lookup.state = ActionState::Done;
        lookup.result = Some("partner 7".to_string());
        lookup.started_at = Some(created_at);
        lookup.finished_at = Some(parse_ts("2026-02-23T12:00:05Z"));

        Task {
            id: TaskId(id.to_string()),
            tenant_id: TenantId("acme".to_string()),
            requester: "u-1".to_string(),
            agent_id: AgentId("sales-bot".to_string()),
            router_agent_id: Some(AgentId("router-bot".to_string())),
            executing_agent_id: Some(AgentId("sales-bot".to_string())),
            user_request: "create an order for Acme".to_string(),
            retrieved_context: "- Order rules: ship weekly".to_string(),
            router_output: Some("{\"delegate_to\": null}".to_string()),
            plan_output: Some("{\"actions\": []}".to_string()),
            plan: vec![
                lookup,
                PlannedAction::pending(
                    2,
                    CapabilityCode::new("sales.create_order"),
                    json!({"partner_id": 7, "amount_total": 900}),
                    "create the order",
                ),
            ],
            state,
            has_destructive_actions: false,
            approval_required: true,
            approval_findings: vec![ApprovalFinding {
                sequence: 2,
                capability_code: CapabilityCode::new("sales.create_order"),
                reason: ApprovalReason::AmountOverLimit {
                    amount: Decimal::new(900, 0),
                    limit: Decimal::new(500, 0),
                },
            }],
            approved_by: None,
            approved_at: None,
            result: None,
            error: None,
            claimed_by: None,
            claimed_at: None,
            state_version: 1,
            created_at,
            updated_at: created_at,
        }
    }

    fn parse_ts(value: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(value).expect("valid rfc3339").with_timezone(&Utc)
    }
}
