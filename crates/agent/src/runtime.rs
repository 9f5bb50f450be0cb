//! Orchestrator: route → plan → approve → run, plus the periodic sweep.
//!
//! Every state change is persisted with a compare-and-set on `state_version`.
//! The same check doubles as the cooperative cancellation point of the
//! dispatch loop: a cancel bumps the version, the runner's next write misses,
//! and no further action is started.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::time::timeout;
use tracing::{info, warn};
use uuid::Uuid;

use conductor_core::audit::{AuditRecord, AuditSink};
use conductor_core::catalog::CapabilityCatalog;
use conductor_core::config::AppConfig;
use conductor_core::context::ContextSource;
use conductor_core::domain::agent::{Agent, AgentId, TenantId};
use conductor_core::domain::task::{
    PlannedAction, Task, TaskId, TaskState, TaskTransitionEvent,
};
use conductor_core::errors::DomainError;
use conductor_core::execution_engine::{EngineConfig, ExecutionError, TaskEngine, TransitionResult};
use conductor_core::text::truncate_chars;
use conductor_db::repositories::{AgentRepository, RepositoryError, TaskCursor, TaskRepository};

use crate::llm::{LlmClient, LlmError};
use crate::planner::{Planner, PlannerSettings, PlanningError};
use crate::router::{RouteDecision, TaskRouter};
use crate::tools::{render_output, HandlerRegistry, InvocationContext};

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("task `{0}` not found")]
    TaskNotFound(TaskId),
    #[error("agent `{0}` not found")]
    AgentNotFound(AgentId),
    #[error("task `{0}` was modified concurrently; reload and retry")]
    ConcurrentModification(TaskId),
    #[error(transparent)]
    Planning(#[from] PlanningError),
    #[error(transparent)]
    Execution(#[from] ExecutionError),
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

impl OrchestratorError {
    pub fn error_class(&self) -> &'static str {
        match self {
            Self::TaskNotFound(_) | Self::AgentNotFound(_) => "not_found",
            Self::ConcurrentModification(_) => "state",
            Self::Planning(PlanningError::NotReady(_)) => "configuration",
            Self::Planning(PlanningError::Provider(error)) if error.is_configuration() => {
                "configuration"
            }
            Self::Planning(PlanningError::Provider(_)) => "dispatch",
            Self::Planning(PlanningError::Parse(_)) => "parse",
            Self::Planning(PlanningError::Validation(_)) => "validation",
            Self::Execution(
                ExecutionError::Governance(_)
                | ExecutionError::AutonomyViolation(_)
                | ExecutionError::Revalidation(_),
            ) => "governance",
            Self::Execution(_) => "state",
            Self::Domain(_) => "configuration",
            Self::Repository(_) => "persistence",
        }
    }
}

impl From<LlmError> for OrchestratorError {
    fn from(value: LlmError) -> Self {
        Self::Planning(PlanningError::Provider(value))
    }
}

#[derive(Clone, Debug)]
pub struct OrchestratorSettings {
    pub engine: EngineConfig,
    pub planner: PlannerSettings,
    pub dispatch_timeout: Duration,
    pub sweep_batch_size: u32,
    pub worker_id: String,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            engine: EngineConfig::default(),
            planner: PlannerSettings::default(),
            dispatch_timeout: Duration::from_secs(30),
            sweep_batch_size: 10,
            worker_id: default_worker_id(),
        }
    }
}

impl OrchestratorSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            engine: config.engine.engine_config(),
            planner: PlannerSettings {
                context_limit: config.engine.context_limit,
                context_max_chars: config.engine.context_max_chars,
                temperature: config.llm.temperature,
            },
            dispatch_timeout: Duration::from_secs(config.engine.dispatch_timeout_secs),
            sweep_batch_size: config.engine.sweep_batch_size,
            worker_id: default_worker_id(),
        }
    }
}

fn default_worker_id() -> String {
    format!("worker-{}", Uuid::new_v4().simple())
}

/// Shared services the orchestrator drives.
#[derive(Clone)]
pub struct Collaborators {
    pub tasks: Arc<dyn TaskRepository>,
    pub agents: Arc<dyn AgentRepository>,
    pub llm: Arc<dyn LlmClient>,
    pub context: Arc<dyn ContextSource>,
    pub audit: Arc<dyn AuditSink>,
    pub catalog: Arc<CapabilityCatalog>,
    pub handlers: Arc<HandlerRegistry>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SubmitRequest {
    pub tenant_id: TenantId,
    pub requester: String,
    pub agent_id: AgentId,
    /// Controller agent consulted by the router; `None` skips routing.
    pub router_agent_id: Option<AgentId>,
    pub user_request: String,
    pub auto_plan: bool,
    pub auto_run: bool,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub scanned: usize,
    pub done: usize,
    pub failed: usize,
    pub interrupted: usize,
    pub rejected: usize,
}

pub struct Orchestrator {
    tasks: Arc<dyn TaskRepository>,
    agents: Arc<dyn AgentRepository>,
    audit: Arc<dyn AuditSink>,
    catalog: Arc<CapabilityCatalog>,
    handlers: Arc<HandlerRegistry>,
    router: TaskRouter,
    planner: Planner,
    engine: TaskEngine,
    settings: OrchestratorSettings,
    /// Last planned task examined by the previous sweep.
    sweep_cursor: Mutex<Option<TaskCursor>>,
}

/// Planned tasks examined per sweep, as a multiple of the batch size.
const SWEEP_SCAN_FACTOR: usize = 10;

impl Orchestrator {
    pub fn new(collaborators: Collaborators, settings: OrchestratorSettings) -> Self {
        let Collaborators { tasks, agents, llm, context, audit, catalog, handlers } = collaborators;
        Self {
            router: TaskRouter::new(llm.clone(), agents.clone(), settings.planner.temperature),
            planner: Planner::new(llm, context, settings.planner.clone()),
            engine: TaskEngine::with_config(settings.engine.clone()),
            tasks,
            agents,
            audit,
            catalog,
            handlers,
            settings,
            sweep_cursor: Mutex::new(None),
        }
    }

    pub fn settings(&self) -> &OrchestratorSettings {
        &self.settings
    }

    pub fn catalog(&self) -> &CapabilityCatalog {
        &self.catalog
    }

    pub async fn task(&self, task_id: &TaskId) -> Result<Task, OrchestratorError> {
        self.tasks.find_by_id(task_id).await?.ok_or_else(|| OrchestratorError::TaskNotFound(task_id.clone()))
    }

    pub async fn transitions(
        &self,
        task_id: &TaskId,
    ) -> Result<Vec<TaskTransitionEvent>, OrchestratorError> {
        Ok(self.tasks.list_transitions(task_id).await?)
    }

    /// Creates a draft task and optionally plans and runs it straight away.
    pub async fn submit(&self, request: SubmitRequest) -> Result<Task, OrchestratorError> {
        let agent = self.agent(&request.agent_id).await?;
        if agent.tenant_id != request.tenant_id {
            return Err(OrchestratorError::AgentNotFound(agent.id));
        }

        let mut task =
            Task::draft(request.tenant_id, request.requester.clone(), agent.id.clone(), request.user_request);
        task.router_agent_id = request.router_agent_id;
        self.tasks.save(task.clone()).await?;
        self.tasks.append_transition(self.engine.created(&task, &request.requester)).await?;
        info!(
            event_name = "task.created",
            task_id = %task.id,
            correlation_id = %task.id,
            tenant_id = %task.tenant_id,
            agent_id = %task.agent_id,
            "task created"
        );

        if !request.auto_plan {
            return Ok(task);
        }
        let task = self.plan(&task.id).await?;
        if !request.auto_run || task.state != TaskState::Planned {
            return Ok(task);
        }

        match self.run(&task.id).await {
            Err(OrchestratorError::Execution(error)) => {
                warn!(
                    event_name = "task.submit.run_rejected",
                    task_id = %task.id,
                    correlation_id = %task.id,
                    error_class = error.error_class(),
                    error = %error,
                    "planned task was not run"
                );
                Ok(task)
            }
            other => other,
        }
    }

    /// Routes, plans and commits. Nothing is written unless the plan is valid.
    pub async fn plan(&self, task_id: &TaskId) -> Result<Task, OrchestratorError> {
        let mut task = self.task(task_id).await?;
        self.engine.ensure_plannable(&task)?;
        let default_agent = self.agent(&task.agent_id).await?;
        let route = self.route(&task, &default_agent).await;

        let draft = match self.planner.plan(&task, &route.executing_agent, &self.catalog).await {
            Ok(draft) => draft,
            Err(error) => {
                warn!(
                    event_name = "task.plan.rejected",
                    task_id = %task.id,
                    correlation_id = %task.id,
                    agent_id = %route.executing_agent.id,
                    error = %error,
                    "planning failed"
                );
                return Err(error.into());
            }
        };

        let expected = task.state_version;
        task.executing_agent_id = Some(route.executing_agent.id.clone());
        task.router_output = route.raw_output;
        task.retrieved_context = draft.retrieved_context;
        let committed =
            self.engine.commit_plan(task, draft.actions, draft.decision, Some(draft.raw_output))?;
        let task = self.persist_or_conflict(committed, expected).await?;

        info!(
            event_name = "task.plan.committed",
            task_id = %task.id,
            correlation_id = %task.id,
            agent_id = %task.executing_agent(),
            state = %task.state,
            actions = task.plan.len(),
            approval_required = task.approval_required,
            has_destructive_actions = task.has_destructive_actions,
            "plan committed"
        );
        Ok(task)
    }

    pub async fn approve(&self, task_id: &TaskId, approver: &str) -> Result<Task, OrchestratorError> {
        let task = self.task(task_id).await?;
        let expected = task.state_version;
        let approved = self.engine.approve(task, approver)?;
        let task = self.persist_or_conflict(approved, expected).await?;

        info!(
            event_name = "task.approved",
            task_id = %task.id,
            correlation_id = %task.id,
            approver,
            "task approved"
        );
        Ok(task)
    }

    pub async fn cancel(
        &self,
        task_id: &TaskId,
        actor: &str,
        reason: Option<String>,
    ) -> Result<Task, OrchestratorError> {
        let task = self.task(task_id).await?;
        let expected = task.state_version;
        let cancelled = self.engine.cancel(task, actor, reason)?;
        let task = self.persist_or_conflict(cancelled, expected).await?;

        info!(
            event_name = "task.cancelled",
            task_id = %task.id,
            correlation_id = %task.id,
            actor,
            "task cancelled"
        );
        Ok(task)
    }

    pub async fn retry(&self, task_id: &TaskId, actor: &str) -> Result<Task, OrchestratorError> {
        let task = self.task(task_id).await?;
        let expected = task.state_version;
        let retried = self.engine.retry(task, actor)?;
        let task = self.persist_or_conflict(retried, expected).await?;

        info!(
            event_name = "task.retried",
            task_id = %task.id,
            correlation_id = %task.id,
            actor,
            pending = ?task.pending_sequences(),
            "task returned to planned"
        );
        Ok(task)
    }

    /// Claims the task and dispatches its pending actions in sequence order.
    ///
    /// Rejections (governance, autonomy, state) leave the task untouched and
    /// surface as errors. A handler failure is not an error here: it is
    /// recorded on the task, which comes back `failed`.
    pub async fn run(&self, task_id: &TaskId) -> Result<Task, OrchestratorError> {
        let task = self.task(task_id).await?;
        let agent = self.agent(task.executing_agent()).await?;

        let expected = task.state_version;
        let claimed = self.engine.claim(task, &agent, &self.catalog, self.settings.worker_id.as_str())?;
        let Some(mut task) = self.persist(claimed, expected).await? else {
            return Err(OrchestratorError::ConcurrentModification(task_id.clone()));
        };
        info!(
            event_name = "task.run.claimed",
            task_id = %task.id,
            correlation_id = %task.id,
            worker_id = %self.settings.worker_id,
            agent_id = %agent.id,
            pending = ?task.pending_sequences(),
            "task claimed"
        );

        for sequence in task.pending_sequences() {
            let version = task.state_version;
            let started = self.engine.start_action(task, sequence)?;
            if !self.tasks.save_if_version(started.clone(), version).await? {
                return self.interrupted(task_id, sequence).await;
            }
            task = started;

            let Some(action) = task.action(sequence).cloned() else {
                return Err(ExecutionError::UnknownAction { task_id: task_id.clone(), sequence }.into());
            };

            match self.dispatch(&task, &agent, &action).await {
                Ok(output) => {
                    let completed = self.engine.complete_action(task, sequence, &output)?;
                    if !self.tasks.save_if_version(completed.clone(), version).await? {
                        self.record_late_outcome(&completed, sequence).await;
                        return self.interrupted(task_id, sequence).await;
                    }
                    info!(
                        event_name = "task.action.completed",
                        task_id = %task_id,
                        correlation_id = %task_id,
                        sequence,
                        capability_code = %action.capability_code,
                        "action completed"
                    );
                    task = completed;
                }
                Err(error) => {
                    let failed = self.engine.fail_action(task, sequence, &error)?;
                    let failed_task = failed.task.clone();
                    let Some(task) = self.persist(failed, version).await? else {
                        self.record_late_outcome(&failed_task, sequence).await;
                        return self.interrupted(task_id, sequence).await;
                    };
                    warn!(
                        event_name = "task.action.failed",
                        task_id = %task.id,
                        correlation_id = %task.id,
                        sequence,
                        capability_code = %action.capability_code,
                        error = %error,
                        "action failed; remaining actions aborted"
                    );
                    return Ok(task);
                }
            }
        }

        let version = task.state_version;
        let finished = self.engine.finish(task)?;
        let Some(task) = self.persist(finished, version).await? else {
            return self.interrupted(task_id, 0).await;
        };
        info!(
            event_name = "task.run.completed",
            task_id = %task.id,
            correlation_id = %task.id,
            actions = task.plan.len(),
            "task completed"
        );
        Ok(task)
    }

    /// Drives a bounded batch of planned tasks, then stale running ones.
    /// Individual failures are logged and never stop the batch.
    ///
    /// Planned tasks are walked oldest first from where the previous sweep
    /// stopped, wrapping at the end. Rejected tasks do not count against the
    /// batch, so tasks that can never run do not starve the rest.
    pub async fn sweep(&self) -> Result<SweepReport, OrchestratorError> {
        let batch = self.settings.sweep_batch_size.max(1);
        let mut report = SweepReport::default();

        let attempted = self.sweep_planned(batch as usize, &mut report).await?;

        let remaining = (batch as usize).saturating_sub(attempted);
        if remaining > 0 {
            let cutoff =
                Utc::now() - chrono::Duration::seconds(self.settings.engine.claim_timeout_seconds);
            let stale: Vec<Task> = self
                .tasks
                .list(Some(TaskState::Running), None, batch)
                .await?
                .into_iter()
                .filter(|task| task.claimed_at.map_or(true, |claimed_at| claimed_at <= cutoff))
                .take(remaining)
                .collect();
            for candidate in stale {
                self.sweep_one(&candidate, &mut report).await;
            }
        }

        info!(
            event_name = "task.sweep.completed",
            correlation_id = "sweep",
            scanned = report.scanned,
            done = report.done,
            failed = report.failed,
            interrupted = report.interrupted,
            rejected = report.rejected,
            "sweep completed"
        );
        Ok(report)
    }

    /// Pages through planned tasks until `batch` of them were actually run.
    /// Returns how many were.
    async fn sweep_planned(
        &self,
        batch: usize,
        report: &mut SweepReport,
    ) -> Result<usize, OrchestratorError> {
        let scan_limit = batch.saturating_mul(SWEEP_SCAN_FACTOR);
        let mut saved_cursor = self.sweep_cursor.lock().await;
        let resume_from = (*saved_cursor).clone();

        let mut cursor = resume_from.clone();
        let mut wrapped = resume_from.is_none();
        let mut attempted = 0;
        let mut scanned = 0;

        'pages: while attempted < batch && scanned < scan_limit {
            let page =
                self.tasks.list_after(TaskState::Planned, cursor.as_ref(), batch as u32).await?;
            if page.is_empty() {
                cursor = None;
                if wrapped {
                    break;
                }
                wrapped = true;
                continue;
            }

            for candidate in page {
                if attempted >= batch || scanned >= scan_limit {
                    break 'pages;
                }
                // Past the resume point again: everything left was seen this sweep.
                if wrapped && resume_from.as_ref().is_some_and(|start| start.precedes(&candidate)) {
                    break 'pages;
                }
                cursor = Some(TaskCursor::of(&candidate));
                scanned += 1;
                if self.sweep_one(&candidate, report).await {
                    attempted += 1;
                }
            }
        }

        *saved_cursor = cursor;
        Ok(attempted)
    }

    /// Runs one sweep candidate; `false` when the run was rejected.
    async fn sweep_one(&self, candidate: &Task, report: &mut SweepReport) -> bool {
        report.scanned += 1;
        match self.run(&candidate.id).await {
            Ok(task) => {
                match task.state {
                    TaskState::Done => report.done += 1,
                    TaskState::Failed => report.failed += 1,
                    _ => report.interrupted += 1,
                }
                true
            }
            Err(error) => {
                report.rejected += 1;
                warn!(
                    event_name = "task.sweep.task_rejected",
                    task_id = %candidate.id,
                    correlation_id = %candidate.id,
                    error_class = error.error_class(),
                    error = %error,
                    "sweep could not run task"
                );
                false
            }
        }
    }

    async fn agent(&self, agent_id: &AgentId) -> Result<Agent, OrchestratorError> {
        self.agents
            .find_by_id(agent_id)
            .await?
            .ok_or_else(|| OrchestratorError::AgentNotFound(agent_id.clone()))
    }

    async fn route(&self, task: &Task, default_agent: &Agent) -> RouteDecision {
        let Some(router_id) = &task.router_agent_id else {
            return RouteDecision::fallback(default_agent, None);
        };

        match self.agents.find_by_id(router_id).await {
            Ok(Some(controller)) if controller.active && controller.tenant_id == task.tenant_id => {
                self.router.route(task, &controller, default_agent).await
            }
            lookup => {
                warn!(
                    event_name = "task.route.fallback",
                    task_id = %task.id,
                    correlation_id = %task.id,
                    reason = "controller_unavailable",
                    router_agent_id = %router_id,
                    lookup_error = ?lookup.err(),
                    "routing fell back to the default agent"
                );
                RouteDecision::fallback(default_agent, None)
            }
        }
    }

    /// One dispatch under the agent's impersonation identity, bracketed by an
    /// `attempted` audit record and its final form. The `Err` string is the
    /// failure recorded on the action.
    async fn dispatch(&self, task: &Task, agent: &Agent, action: &PlannedAction) -> Result<String, String> {
        let attempted = AuditRecord::attempted(
            task.id.clone(),
            action.sequence,
            task.tenant_id.clone(),
            agent.id.clone(),
            action.capability_code.clone(),
            agent.impersonation_identity.clone(),
            action.params.clone(),
        );
        self.audit.emit(attempted.clone());

        let outcome = self.invoke(task, agent, action).await;
        let engine = self.engine.config();
        match &outcome {
            Ok(output) => self.audit.emit(attempted.succeeded(truncate_chars(output, engine.max_output_chars))),
            Err(error) => self.audit.emit(attempted.failed(truncate_chars(error, engine.max_error_chars))),
        }
        outcome
    }

    async fn invoke(&self, task: &Task, agent: &Agent, action: &PlannedAction) -> Result<String, String> {
        let capability = self.catalog.resolve(&action.capability_code).map_err(|error| error.to_string())?;
        let handler = self
            .handlers
            .resolve(&capability.target)
            .ok_or_else(|| format!("no handler registered for target `{}`", capability.target))?;

        let context = InvocationContext {
            task_id: task.id.clone(),
            sequence: action.sequence,
            tenant_id: task.tenant_id.clone(),
            agent_id: agent.id.clone(),
            impersonation_identity: agent.impersonation_identity.clone(),
            capability_code: action.capability_code.clone(),
        };

        match timeout(self.settings.dispatch_timeout, handler.invoke(&context, &action.params)).await {
            Ok(Ok(value)) => Ok(render_output(&value)),
            Ok(Err(error)) => Err(error.to_string()),
            Err(_) => Err(format!("handler timed out after {:?}", self.settings.dispatch_timeout)),
        }
    }

    async fn persist(
        &self,
        result: TransitionResult,
        expected_version: u32,
    ) -> Result<Option<Task>, OrchestratorError> {
        let TransitionResult { task, transition } = result;
        if !self.tasks.save_if_version(task.clone(), expected_version).await? {
            return Ok(None);
        }
        self.tasks.append_transition(transition).await?;
        Ok(Some(task))
    }

    async fn persist_or_conflict(
        &self,
        result: TransitionResult,
        expected_version: u32,
    ) -> Result<Task, OrchestratorError> {
        let task_id = result.task.id.clone();
        self.persist(result, expected_version)
            .await?
            .ok_or(OrchestratorError::ConcurrentModification(task_id))
    }

    /// Someone else changed the task mid-run, usually a cancel. Stop and
    /// report what is stored.
    async fn interrupted(&self, task_id: &TaskId, sequence: u32) -> Result<Task, OrchestratorError> {
        let stored = self.task(task_id).await?;
        info!(
            event_name = "task.run.interrupted",
            task_id = %task_id,
            correlation_id = %task_id,
            sequence,
            state = %stored.state,
            "task changed while running; dispatch stopped"
        );
        Ok(stored)
    }

    /// Keeps the outcome of an action that finished after the task was
    /// changed underneath the runner, so its side effect stays visible.
    async fn record_late_outcome(&self, task: &Task, sequence: u32) {
        let Some(action) = task.action(sequence).cloned() else {
            return;
        };
        match self.merge_action(&task.id, action).await {
            Ok(true) => {}
            Ok(false) => warn!(
                event_name = "task.action.outcome_lost",
                task_id = %task.id,
                correlation_id = %task.id,
                sequence,
                "late action outcome could not be recorded on the task"
            ),
            Err(error) => warn!(
                event_name = "task.action.outcome_lost",
                task_id = %task.id,
                correlation_id = %task.id,
                sequence,
                error = %error,
                "late action outcome could not be recorded on the task"
            ),
        }
    }

    async fn merge_action(&self, task_id: &TaskId, action: PlannedAction) -> Result<bool, RepositoryError> {
        let Some(mut stored) = self.tasks.find_by_id(task_id).await? else {
            return Ok(false);
        };
        let version = stored.state_version;
        let Some(slot) = stored.action_mut(action.sequence) else {
            return Ok(false);
        };
        *slot = action;
        self.tasks.save_if_version(stored, version).await
    }
}
