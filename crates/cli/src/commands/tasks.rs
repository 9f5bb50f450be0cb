use conductor_agent::runtime::SubmitRequest;
use conductor_core::domain::agent::{AgentId, TenantId};
use conductor_core::domain::task::{TaskId, TaskState};
use conductor_db::repositories::{
    AuditRepository, RepositoryError, SqlAuditRepository, SqlTaskRepository, TaskRepository,
};
use conductor_db::DbPool;
use serde_json::{json, Value};

use crate::commands::{load_config, open_database, runtime, to_json, with_orchestrator, CommandResult};

pub fn list(state: Option<String>, tenant: Option<String>, limit: u32) -> CommandResult {
    let state = match state.as_deref().map(|raw| (raw, TaskState::parse(raw))) {
        None => None,
        Some((_, Some(state))) => Some(state),
        Some((raw, None)) => {
            return CommandResult::failure(
                "tasks.list",
                "invalid_argument",
                format!("unknown task state `{raw}`"),
                2,
            );
        }
    };
    let tenant = tenant.map(TenantId);

    let config = match load_config("tasks.list") {
        Ok(config) => config,
        Err(result) => return result,
    };
    let runtime = match runtime("tasks.list") {
        Ok(runtime) => runtime,
        Err(result) => return result,
    };

    runtime.block_on(async {
        let pool = match open_database("tasks.list", &config).await {
            Ok(pool) => pool,
            Err(result) => return result,
        };
        let listed = SqlTaskRepository::new(pool.clone()).list(state, tenant.as_ref(), limit).await;
        pool.close().await;

        match listed {
            Ok(tasks) => {
                let rows: Vec<_> = tasks
                    .iter()
                    .map(|task| {
                        json!({
                            "id": task.id,
                            "tenant_id": task.tenant_id,
                            "state": task.state,
                            "agent_id": task.executing_agent(),
                            "actions": task.plan.len(),
                            "approval_required": task.approval_required,
                            "created_at": task.created_at.to_rfc3339(),
                        })
                    })
                    .collect();
                CommandResult::success_with_data(
                    "tasks.list",
                    format!("{} task(s)", rows.len()),
                    Some(json!(rows)),
                )
            }
            Err(error) => CommandResult::failure("tasks.list", "persistence", error.to_string(), 4),
        }
    })
}

pub fn show(task_id: String) -> CommandResult {
    let config = match load_config("tasks.show") {
        Ok(config) => config,
        Err(result) => return result,
    };
    let runtime = match runtime("tasks.show") {
        Ok(runtime) => runtime,
        Err(result) => return result,
    };

    runtime.block_on(async {
        let pool = match open_database("tasks.show", &config).await {
            Ok(pool) => pool,
            Err(result) => return result,
        };
        let task_id = TaskId(task_id);
        let loaded = load_detail(&pool, &task_id).await;
        pool.close().await;

        match loaded {
            Ok(Some(data)) => {
                CommandResult::success_with_data("tasks.show", format!("task {task_id}"), Some(data))
            }
            Ok(None) => CommandResult::failure(
                "tasks.show",
                "not_found",
                format!("task `{task_id}` not found"),
                7,
            ),
            Err(error) => CommandResult::failure("tasks.show", "persistence", error.to_string(), 4),
        }
    })
}

async fn load_detail(pool: &DbPool, task_id: &TaskId) -> Result<Option<Value>, RepositoryError> {
    let tasks = SqlTaskRepository::new(pool.clone());
    let Some(task) = tasks.find_by_id(task_id).await? else {
        return Ok(None);
    };
    let transitions = tasks.list_transitions(task_id).await?;
    let audit = SqlAuditRepository::new(pool.clone()).list_for_task(task_id).await?;
    Ok(Some(json!({ "task": task, "transitions": transitions, "audit": audit })))
}

pub struct SubmitArgs {
    pub tenant: String,
    pub agent: String,
    pub requester: String,
    pub router: Option<String>,
    pub request: String,
    pub plan: bool,
    pub run: bool,
}

pub fn submit(args: SubmitArgs) -> CommandResult {
    let request = SubmitRequest {
        tenant_id: TenantId(args.tenant),
        requester: args.requester,
        agent_id: AgentId(args.agent),
        router_agent_id: args.router.map(AgentId),
        user_request: args.request,
        auto_plan: args.plan || args.run,
        auto_run: args.run,
    };

    with_orchestrator("submit", |orchestrator| async move {
        let task = orchestrator.submit(request).await?;
        Ok((format!("task {} is {}", task.id, task.state), to_json(&task).unwrap_or_default()))
    })
}

pub fn plan(task_id: String) -> CommandResult {
    with_orchestrator("plan", |orchestrator| async move {
        let task = orchestrator.plan(&TaskId(task_id)).await?;
        Ok((format!("task {} is {}", task.id, task.state), to_json(&task).unwrap_or_default()))
    })
}

pub fn approve(task_id: String, approver: String) -> CommandResult {
    with_orchestrator("approve", |orchestrator| async move {
        let task = orchestrator.approve(&TaskId(task_id), &approver).await?;
        Ok((format!("task {} approved by {approver}", task.id), to_json(&task).unwrap_or_default()))
    })
}

pub fn run(task_id: String) -> CommandResult {
    with_orchestrator("run", |orchestrator| async move {
        let task = orchestrator.run(&TaskId(task_id)).await?;
        Ok((format!("task {} is {}", task.id, task.state), to_json(&task).unwrap_or_default()))
    })
}

pub fn cancel(task_id: String, actor: String, reason: Option<String>) -> CommandResult {
    with_orchestrator("cancel", |orchestrator| async move {
        let task = orchestrator.cancel(&TaskId(task_id), &actor, reason).await?;
        Ok((format!("task {} cancelled", task.id), to_json(&task).unwrap_or_default()))
    })
}

pub fn retry(task_id: String, actor: String) -> CommandResult {
    with_orchestrator("retry", |orchestrator| async move {
        let task = orchestrator.retry(&TaskId(task_id), &actor).await?;
        Ok((
            format!("task {} is planned again; pending actions {:?}", task.id, task.pending_sequences()),
            to_json(&task).unwrap_or_default(),
        ))
    })
}

pub fn sweep() -> CommandResult {
    with_orchestrator("sweep", |orchestrator| async move {
        let report = orchestrator.sweep().await?;
        Ok((
            format!("swept {} task(s): {} done, {} failed", report.scanned, report.done, report.failed),
            to_json(&report).unwrap_or_default(),
        ))
    })
}
