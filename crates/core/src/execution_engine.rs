//! Task state machine.
//!
//! Every transition takes the task by value, validates the move and returns the
//! updated task together with an auditable transition event. Persistence and
//! dispatch live elsewhere; nothing here performs I/O.

use chrono::{Duration, Utc};
use thiserror::Error;
use uuid::Uuid;

use crate::approvals::{ApprovalGate, GateDecision, PlanValidationError};
use crate::catalog::CapabilityCatalog;
use crate::domain::agent::{Agent, AgentId, AutonomyLevel};
use crate::domain::capability::RiskLevel;
use crate::domain::task::{
    ActionState, PlannedAction, Task, TaskId, TaskState, TaskTransitionEvent, TaskTransitionId,
};
use crate::text::truncate_chars;

pub const DEFAULT_MAX_OUTPUT_CHARS: usize = 5_000;
pub const DEFAULT_MAX_ERROR_CHARS: usize = 5_000;
pub const EMPTY_RESULT: &str = "OK";

#[derive(Clone, Debug)]
pub struct EngineConfig {
    /// How long before a running claim is considered abandoned.
    pub claim_timeout_seconds: i64,
    pub max_output_chars: usize,
    pub max_error_chars: usize,
    /// Re-run the approval gate against the current policy and allow-list on every claim.
    pub revalidate_on_resume: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            claim_timeout_seconds: 300,
            max_output_chars: DEFAULT_MAX_OUTPUT_CHARS,
            max_error_chars: DEFAULT_MAX_ERROR_CHARS,
            revalidate_on_resume: true,
        }
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ExecutionError {
    #[error("invalid state transition from {from} to {to}: {reason}")]
    InvalidTransition { from: TaskState, to: TaskState, reason: String },
    #[error("governance: {0}")]
    Governance(String),
    #[error("agent `{0}` is suggest-only and cannot execute actions")]
    AutonomyViolation(AgentId),
    #[error("claim conflict: task {0} already claimed by {1}")]
    ClaimConflict(TaskId, String),
    #[error("task {task_id} has no action with sequence {sequence}")]
    UnknownAction { task_id: TaskId, sequence: u32 },
    #[error("plan no longer valid: {0}")]
    Revalidation(#[from] PlanValidationError),
}

impl ExecutionError {
    pub fn error_class(&self) -> &'static str {
        match self {
            Self::InvalidTransition { .. } => "invalid_transition",
            Self::Governance(_) => "governance",
            Self::AutonomyViolation(_) => "autonomy_violation",
            Self::ClaimConflict(..) => "claim_conflict",
            Self::UnknownAction { .. } => "unknown_action",
            Self::Revalidation(_) => "plan_revalidation",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TransitionResult {
    pub task: Task,
    pub transition: TaskTransitionEvent,
}

#[derive(Clone, Debug, Default)]
pub struct TaskEngine {
    config: EngineConfig,
    gate: ApprovalGate,
}

impl TaskEngine {
    pub fn new() -> Self {
        Self::with_config(EngineConfig::default())
    }

    pub fn with_config(config: EngineConfig) -> Self {
        Self { config, gate: ApprovalGate::new() }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// First entry in a task's transition log.
    pub fn created(&self, task: &Task, actor: &str) -> TaskTransitionEvent {
        TaskTransitionEvent {
            id: TaskTransitionId(Uuid::new_v4().to_string()),
            task_id: task.id.clone(),
            from_state: None,
            to_state: task.state,
            reason: "task_created".to_string(),
            actor: actor.to_string(),
            detail_json: serde_json::json!({ "agent_id": task.agent_id }).to_string(),
            state_version: task.state_version,
            occurred_at: task.created_at,
        }
    }

    /// Checked before the text provider is called so a task that cannot be
    /// replanned never costs a generation.
    pub fn ensure_plannable(&self, task: &Task) -> Result<(), ExecutionError> {
        if matches!(task.state, TaskState::Draft | TaskState::Planned | TaskState::WaitingApproval) {
            return Ok(());
        }
        Err(ExecutionError::InvalidTransition {
            from: task.state,
            to: TaskState::Planned,
            reason: "only draft, planned or waiting tasks can be (re)planned".to_string(),
        })
    }

    /// Replaces the plan wholesale and applies the gate decision.
    ///
    /// Any earlier approval is discarded: a new plan needs a new sign-off.
    pub fn commit_plan(
        &self,
        mut task: Task,
        plan: Vec<PlannedAction>,
        decision: GateDecision,
        plan_output: Option<String>,
    ) -> Result<TransitionResult, ExecutionError> {
        let to = if decision.approval_required { TaskState::WaitingApproval } else { TaskState::Planned };
        if !matches!(task.state, TaskState::Draft | TaskState::Planned | TaskState::WaitingApproval) {
            return Err(ExecutionError::InvalidTransition {
                from: task.state,
                to,
                reason: "only draft, planned or waiting tasks can be (re)planned".to_string(),
            });
        }

        let from = task.state;
        task.plan = plan;
        task.plan_output = plan_output;
        task.has_destructive_actions = decision.destructive_found;
        task.approval_required = decision.approval_required;
        task.approval_findings = decision.findings;
        task.approved_by = None;
        task.approved_at = None;
        task.result = None;
        task.error = None;
        task.state = to;

        let detail = serde_json::json!({
            "actions": task.plan.len(),
            "approval_required": task.approval_required,
            "has_destructive_actions": task.has_destructive_actions,
            "findings": task.approval_findings,
        });
        Ok(self.transition(task, from, "plan_committed", "planner", detail))
    }

    /// Human sign-off. Only a task waiting for approval can be approved.
    pub fn approve(
        &self,
        mut task: Task,
        approver: impl Into<String>,
    ) -> Result<TransitionResult, ExecutionError> {
        if task.state != TaskState::WaitingApproval {
            return Err(ExecutionError::InvalidTransition {
                from: task.state,
                to: TaskState::Planned,
                reason: "task is not waiting for approval".to_string(),
            });
        }

        let approver = approver.into();
        let from = task.state;
        task.approved_by = Some(approver.clone());
        task.approved_at = Some(Utc::now());
        task.state = TaskState::Planned;

        let detail = serde_json::json!({ "approved_by": approver });
        Ok(self.transition(task, from, "plan_approved", &approver, detail))
    }

    /// Moves a task to `running` under `worker_id`.
    ///
    /// A `running` task may only be taken over once its claim is stale; any
    /// action left `running` by the abandoned worker is reset to `pending`.
    pub fn claim(
        &self,
        mut task: Task,
        agent: &Agent,
        catalog: &CapabilityCatalog,
        worker_id: impl Into<String>,
    ) -> Result<TransitionResult, ExecutionError> {
        let worker_id = worker_id.into();
        let now = Utc::now();

        match task.state {
            TaskState::Planned => {}
            TaskState::Running => {
                let fresh = task.claimed_at.is_some_and(|claimed_at| {
                    now < claimed_at + Duration::seconds(self.config.claim_timeout_seconds)
                });
                if fresh {
                    return Err(ExecutionError::ClaimConflict(
                        task.id.clone(),
                        task.claimed_by.clone().unwrap_or_default(),
                    ));
                }
            }
            TaskState::WaitingApproval => {
                return Err(ExecutionError::Governance(format!(
                    "task {} is waiting for approval",
                    task.id
                )));
            }
            TaskState::Draft => {
                return Err(ExecutionError::InvalidTransition {
                    from: task.state,
                    to: TaskState::Running,
                    reason: "task has not been planned".to_string(),
                });
            }
            TaskState::Done | TaskState::Failed | TaskState::Cancelled => {
                return Err(ExecutionError::InvalidTransition {
                    from: task.state,
                    to: TaskState::Running,
                    reason: "task already in terminal state".to_string(),
                });
            }
        }

        if !agent.can_execute() {
            return Err(ExecutionError::AutonomyViolation(agent.id.clone()));
        }

        if task.approval_required && !task.is_approved() {
            return Err(ExecutionError::Governance(format!(
                "task {} requires approval before it can run",
                task.id
            )));
        }

        if self.config.revalidate_on_resume {
            let decision = self.gate.evaluate(&task.plan, agent, catalog)?;
            if decision.approval_required && !task.is_approved() {
                return Err(ExecutionError::Governance(format!(
                    "current policy requires approval for task {}",
                    task.id
                )));
            }
        }

        if agent.autonomy_level != AutonomyLevel::ExecuteAll && !task.is_approved() {
            for action in task.plan.iter().filter(|action| action.state != ActionState::Done) {
                let risk = catalog
                    .resolve(&action.capability_code)
                    .map(|capability| capability.risk_level)
                    .map_err(|_| PlanValidationError::UnknownCapability {
                        sequence: action.sequence,
                        code: action.capability_code.clone(),
                    })?;
                if risk != RiskLevel::Low {
                    return Err(ExecutionError::Governance(format!(
                        "agent `{}` may only run low-risk actions without approval; action {} (`{}`) is {}",
                        agent.id,
                        action.sequence,
                        action.capability_code,
                        risk.as_str()
                    )));
                }
            }
        }

        let from = task.state;
        let previous_worker = task.claimed_by.clone();
        for action in task.plan.iter_mut().filter(|action| action.state == ActionState::Running) {
            action.state = ActionState::Pending;
            action.started_at = None;
        }
        task.state = TaskState::Running;
        task.claimed_by = Some(worker_id.clone());
        task.claimed_at = Some(now);
        task.executing_agent_id = Some(agent.id.clone());
        task.error = None;

        let detail = serde_json::json!({
            "worker_id": worker_id,
            "previous_worker": previous_worker,
            "claim_timeout_seconds": self.config.claim_timeout_seconds,
            "pending": task.pending_sequences(),
        });
        Ok(self.transition(task, from, "task_claimed", &worker_id, detail))
    }

    /// Marks the action running. Like `complete_action`, this refreshes the
    /// claim so staleness counts from the worker's last progress.
    pub fn start_action(&self, mut task: Task, sequence: u32) -> Result<Task, ExecutionError> {
        self.require_running(&task)?;
        let action = Self::action_mut(&mut task, sequence)?;
        if action.state == ActionState::Done {
            return Err(ExecutionError::InvalidTransition {
                from: TaskState::Running,
                to: TaskState::Running,
                reason: format!("action {sequence} already done"),
            });
        }
        let now = Utc::now();
        action.state = ActionState::Running;
        action.started_at = Some(now);
        action.error = None;
        task.claimed_at = Some(now);
        task.updated_at = now;
        Ok(task)
    }

    pub fn complete_action(
        &self,
        mut task: Task,
        sequence: u32,
        output: &str,
    ) -> Result<Task, ExecutionError> {
        self.require_running(&task)?;
        let max_output_chars = self.config.max_output_chars;
        let action = Self::action_mut(&mut task, sequence)?;
        let now = Utc::now();
        action.state = ActionState::Done;
        action.result = Some(truncate_chars(output, max_output_chars));
        action.error = None;
        action.finished_at = Some(now);
        task.claimed_at = Some(now);
        task.updated_at = now;
        Ok(task)
    }

    /// Marks the action failed and aborts the task. Later actions stay `pending`.
    pub fn fail_action(
        &self,
        mut task: Task,
        sequence: u32,
        error: &str,
    ) -> Result<TransitionResult, ExecutionError> {
        self.require_running(&task)?;
        let max_error_chars = self.config.max_error_chars;
        let action = Self::action_mut(&mut task, sequence)?;
        let action_error = truncate_chars(error, max_error_chars);
        action.state = ActionState::Failed;
        action.error = Some(action_error.clone());
        action.finished_at = Some(Utc::now());
        let code = action.capability_code.clone();

        let from = task.state;
        task.state = TaskState::Failed;
        task.error = Some(truncate_chars(
            &format!("action {sequence} ({code}) failed: {action_error}"),
            max_error_chars,
        ));
        task.claimed_by = None;
        task.claimed_at = None;

        let detail = serde_json::json!({
            "sequence": sequence,
            "capability_code": code,
            "error": action_error,
            "pending": task.pending_sequences(),
        });
        Ok(self.transition(task, from, "action_failed", "worker", detail))
    }

    /// Completes a running task whose every action is done.
    pub fn finish(&self, mut task: Task) -> Result<TransitionResult, ExecutionError> {
        self.require_running(&task)?;
        if let Some(open) = task.plan.iter().find(|action| action.state != ActionState::Done) {
            return Err(ExecutionError::InvalidTransition {
                from: task.state,
                to: TaskState::Done,
                reason: format!("action {} is still {}", open.sequence, open.state.as_str()),
            });
        }

        let mut done: Vec<&PlannedAction> = task.plan.iter().collect();
        done.sort_by_key(|action| action.sequence);
        let result = if done.is_empty() {
            EMPTY_RESULT.to_string()
        } else {
            done.iter()
                .map(|action| {
                    format!("[{}] {}", action.capability_code, action.result.as_deref().unwrap_or(""))
                })
                .collect::<Vec<_>>()
                .join("\n\n")
        };

        let from = task.state;
        task.state = TaskState::Done;
        task.result = Some(result);
        task.error = None;
        task.claimed_by = None;
        task.claimed_at = None;

        let detail = serde_json::json!({ "actions": task.plan.len() });
        Ok(self.transition(task, from, "task_completed", "worker", detail))
    }

    /// Cancels any non-terminal task. In-flight handlers are not interrupted.
    pub fn cancel(
        &self,
        mut task: Task,
        actor: impl Into<String>,
        reason: Option<String>,
    ) -> Result<TransitionResult, ExecutionError> {
        if task.state.is_terminal() {
            return Err(ExecutionError::InvalidTransition {
                from: task.state,
                to: TaskState::Cancelled,
                reason: "task already in terminal state".to_string(),
            });
        }

        let actor = actor.into();
        let from = task.state;
        task.state = TaskState::Cancelled;
        task.claimed_by = None;
        task.claimed_at = None;

        let detail = serde_json::json!({ "reason": reason });
        Ok(self.transition(task, from, "task_cancelled", &actor, detail))
    }

    /// Re-opens a failed task for another run. Done actions are kept and will
    /// be skipped; failed actions go back to `pending`. Approval stamps survive.
    pub fn retry(
        &self,
        mut task: Task,
        actor: impl Into<String>,
    ) -> Result<TransitionResult, ExecutionError> {
        if task.state != TaskState::Failed {
            return Err(ExecutionError::InvalidTransition {
                from: task.state,
                to: TaskState::Planned,
                reason: "only failed tasks can be retried".to_string(),
            });
        }

        let actor = actor.into();
        let from = task.state;
        let previous_error = task.error.take();
        for action in task.plan.iter_mut().filter(|action| {
            matches!(action.state, ActionState::Failed | ActionState::Running)
        }) {
            action.state = ActionState::Pending;
            action.error = None;
            action.started_at = None;
            action.finished_at = None;
        }
        task.state = TaskState::Planned;

        let detail = serde_json::json!({
            "previous_error": previous_error,
            "pending": task.pending_sequences(),
        });
        Ok(self.transition(task, from, "task_retried", &actor, detail))
    }

    fn require_running(&self, task: &Task) -> Result<(), ExecutionError> {
        if task.state == TaskState::Running {
            return Ok(());
        }
        Err(ExecutionError::InvalidTransition {
            from: task.state,
            to: TaskState::Running,
            reason: "task is not running".to_string(),
        })
    }

    fn action_mut(task: &mut Task, sequence: u32) -> Result<&mut PlannedAction, ExecutionError> {
        let task_id = task.id.clone();
        task.action_mut(sequence).ok_or(ExecutionError::UnknownAction { task_id, sequence })
    }

    fn transition(
        &self,
        mut task: Task,
        from: TaskState,
        reason: &str,
        actor: &str,
        detail: serde_json::Value,
    ) -> TransitionResult {
        let now = Utc::now();
        task.state_version += 1;
        task.updated_at = now;

        let transition = TaskTransitionEvent {
            id: TaskTransitionId(Uuid::new_v4().to_string()),
            task_id: task.id.clone(),
            from_state: Some(from),
            to_state: task.state,
            reason: reason.to_string(),
            actor: actor.to_string(),
            detail_json: detail.to_string(),
            state_version: task.state_version,
            occurred_at: now,
        };

        TransitionResult { task, transition }
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};
    use serde_json::json;

    use super::{EngineConfig, ExecutionError, TaskEngine, EMPTY_RESULT};
    use crate::approvals::{ApprovalGate, GateDecision};
    use crate::catalog::CapabilityCatalog;
    use crate::domain::agent::{Agent, AgentId, AutonomyLevel, TenantId};
    use crate::domain::capability::{Capability, CapabilityCode, RiskLevel};
    use crate::domain::policy::Policy;
    use crate::domain::task::{ActionState, PlannedAction, Task, TaskState};

    fn catalog() -> CapabilityCatalog {
        CapabilityCatalog::new(vec![
            Capability::new("crm.lookup_partner", "crm_lookup", RiskLevel::Low, false),
            Capability::new("crm.add_note", "crm_note", RiskLevel::Low, false),
            Capability::new("sales.create_order", "sale_order_create", RiskLevel::High, true),
            Capability::new("sales.update_order", "sales_order", RiskLevel::Medium, false),
        ])
        .expect("catalog builds")
    }

    fn agent(autonomy: AutonomyLevel) -> Agent {
        Agent::new("sales-bot", "acme", "svc-sales")
            .with_capabilities([
                "crm.lookup_partner",
                "crm.add_note",
                "sales.create_order",
                "sales.update_order",
            ])
            .with_autonomy(autonomy)
    }

    fn plan(codes: &[&str]) -> Vec<PlannedAction> {
        codes
            .iter()
            .enumerate()
            .map(|(index, code)| {
                PlannedAction::pending(index as u32 + 1, CapabilityCode::new(*code), json!({}), "")
            })
            .collect()
    }

    fn planned_task(engine: &TaskEngine, agent: &Agent, codes: &[&str]) -> Task {
        let task = Task::draft(TenantId("acme".to_string()), "u-1", agent.id.clone(), "do things");
        let plan = plan(codes);
        let decision = ApprovalGate::new().evaluate(&plan, agent, &catalog()).expect("valid plan");
        engine.commit_plan(task, plan, decision, None).expect("commit").task
    }

    #[test]
    fn commit_plan_lands_in_planned_or_waiting_approval() {
        let engine = TaskEngine::new();
        let agent = agent(AutonomyLevel::ExecuteAll);

        let low = planned_task(&engine, &agent, &["crm.lookup_partner"]);
        assert_eq!(low.state, TaskState::Planned);
        assert_eq!(low.state_version, 2);

        let gated = planned_task(&engine, &agent, &["crm.lookup_partner", "sales.create_order"]);
        assert_eq!(gated.state, TaskState::WaitingApproval);
        assert!(gated.approval_required);
    }

    #[test]
    fn replanning_discards_previous_approval() {
        let engine = TaskEngine::new();
        let agent = agent(AutonomyLevel::ExecuteAll);
        let task = planned_task(&engine, &agent, &["sales.create_order"]);
        let approved = engine.approve(task, "manager").expect("approve").task;
        assert!(approved.is_approved());

        let replanned = engine
            .commit_plan(
                approved,
                plan(&["sales.create_order"]),
                GateDecision { approval_required: true, ..GateDecision::default() },
                None,
            )
            .expect("replan")
            .task;

        assert_eq!(replanned.state, TaskState::WaitingApproval);
        assert!(!replanned.is_approved());
    }

    #[test]
    fn approve_stamps_approver_and_only_applies_to_waiting_tasks() {
        let engine = TaskEngine::new();
        let agent = agent(AutonomyLevel::ExecuteAll);

        let waiting = planned_task(&engine, &agent, &["sales.create_order"]);
        let result = engine.approve(waiting, "manager").expect("approve");
        assert_eq!(result.task.state, TaskState::Planned);
        assert_eq!(result.task.approved_by.as_deref(), Some("manager"));
        assert!(result.task.approved_at.is_some());
        assert_eq!(result.transition.actor, "manager");

        let planned = planned_task(&engine, &agent, &["crm.lookup_partner"]);
        assert!(matches!(
            engine.approve(planned, "manager"),
            Err(ExecutionError::InvalidTransition { .. })
        ));
    }

    #[test]
    fn claim_before_approval_is_a_governance_error() {
        let engine = TaskEngine::new();
        let agent = agent(AutonomyLevel::ExecuteAll);
        let task = planned_task(&engine, &agent, &["sales.create_order"]);

        let error = engine.claim(task, &agent, &catalog(), "worker-1").expect_err("gated");

        assert!(matches!(error, ExecutionError::Governance(_)));
        assert_eq!(error.error_class(), "governance");
    }

    #[test]
    fn suggest_only_agent_cannot_claim() {
        let engine = TaskEngine::new();
        let suggest = agent(AutonomyLevel::Suggest);
        let task = planned_task(&engine, &suggest, &["crm.lookup_partner"]);

        let error = engine.claim(task, &suggest, &catalog(), "worker-1").expect_err("suggest");

        assert_eq!(error, ExecutionError::AutonomyViolation(AgentId("sales-bot".to_string())));
    }

    #[test]
    fn execute_low_agent_needs_approval_for_medium_risk_actions() {
        let engine = TaskEngine::new();
        let low = agent(AutonomyLevel::ExecuteLow);

        let safe = planned_task(&engine, &low, &["crm.lookup_partner"]);
        assert!(engine.claim(safe, &low, &catalog(), "worker-1").is_ok());

        let risky = planned_task(&engine, &low, &["crm.lookup_partner", "sales.update_order"]);
        assert_eq!(risky.state, TaskState::Planned);
        let error = engine.claim(risky, &low, &catalog(), "worker-1").expect_err("medium risk");
        assert!(matches!(error, ExecutionError::Governance(_)));
    }

    #[test]
    fn claim_revalidates_against_a_shrunken_allow_list() {
        let engine = TaskEngine::new();
        let agent = agent(AutonomyLevel::ExecuteAll);
        let task = planned_task(&engine, &agent, &["crm.lookup_partner", "crm.add_note"]);

        let narrowed = Agent::new("sales-bot", "acme", "svc-sales")
            .with_capabilities(["crm.lookup_partner"])
            .with_autonomy(AutonomyLevel::ExecuteAll);

        let error = engine.claim(task.clone(), &narrowed, &catalog(), "w").expect_err("revoked");
        assert_eq!(error.error_class(), "plan_revalidation");

        let lenient = TaskEngine::with_config(EngineConfig {
            revalidate_on_resume: false,
            ..EngineConfig::default()
        });
        assert!(lenient.claim(task, &narrowed, &catalog(), "w").is_ok());
    }

    #[test]
    fn claim_revalidates_against_a_tightened_policy() {
        let engine = TaskEngine::new();
        let lax = agent(AutonomyLevel::ExecuteAll).with_policy(Policy {
            require_approval_high_risk: false,
            ..Policy::default()
        });
        let task = planned_task(&engine, &lax, &["sales.create_order"]);
        assert_eq!(task.state, TaskState::Planned);

        let strict = agent(AutonomyLevel::ExecuteAll);
        let error = engine.claim(task, &strict, &catalog(), "worker-1").expect_err("tightened");

        assert!(matches!(error, ExecutionError::Governance(_)));
    }

    #[test]
    fn fresh_claim_conflicts_and_stale_claim_is_taken_over() {
        let engine = TaskEngine::new();
        let agent = agent(AutonomyLevel::ExecuteAll);
        let task = planned_task(&engine, &agent, &["crm.lookup_partner", "crm.add_note"]);
        let claimed = engine.claim(task, &agent, &catalog(), "worker-1").expect("claim").task;

        let conflict = engine.claim(claimed.clone(), &agent, &catalog(), "worker-2");
        assert!(matches!(conflict, Err(ExecutionError::ClaimConflict(_, ref owner)) if owner == "worker-1"));

        let mut abandoned = engine.start_action(claimed, 1).expect("start");
        abandoned.claimed_at = Some(Utc::now() - Duration::seconds(301));
        let taken = engine.claim(abandoned, &agent, &catalog(), "worker-2").expect("steal").task;

        assert_eq!(taken.claimed_by.as_deref(), Some("worker-2"));
        assert_eq!(taken.plan[0].state, ActionState::Pending);
    }

    #[test]
    fn action_progress_refreshes_the_claim() {
        let engine = TaskEngine::new();
        let agent = agent(AutonomyLevel::ExecuteAll);
        let task = planned_task(&engine, &agent, &["crm.lookup_partner", "crm.add_note"]);
        let mut task = engine.claim(task, &agent, &catalog(), "worker-1").expect("claim").task;
        let version = task.state_version;

        task.claimed_at = Some(Utc::now() - Duration::seconds(299));
        let started = engine.start_action(task, 1).expect("start");
        let heartbeat = started.claimed_at.expect("claim kept");
        assert!(heartbeat > Utc::now() - Duration::seconds(5));

        let mut aged = started;
        aged.claimed_at = Some(Utc::now() - Duration::seconds(299));
        let completed = engine.complete_action(aged, 1, "partner 7").expect("complete");
        assert!(completed.claimed_at.is_some_and(|at| at > Utc::now() - Duration::seconds(5)));
        assert_eq!(completed.state_version, version);

        let conflict = engine.claim(completed, &agent, &catalog(), "worker-2");
        assert!(matches!(conflict, Err(ExecutionError::ClaimConflict(_, ref owner)) if owner == "worker-1"));
    }

    #[test]
    fn terminal_and_draft_tasks_cannot_be_claimed() {
        let engine = TaskEngine::new();
        let agent = agent(AutonomyLevel::ExecuteAll);
        let draft = Task::draft(TenantId("acme".to_string()), "u-1", agent.id.clone(), "x");
        assert!(matches!(
            engine.claim(draft, &agent, &catalog(), "w"),
            Err(ExecutionError::InvalidTransition { .. })
        ));

        let task = planned_task(&engine, &agent, &["crm.lookup_partner"]);
        let cancelled = engine.cancel(task, "u-1", None).expect("cancel").task;
        assert!(matches!(
            engine.claim(cancelled, &agent, &catalog(), "w"),
            Err(ExecutionError::InvalidTransition { .. })
        ));
    }

    #[test]
    fn failure_aborts_and_leaves_later_actions_pending() {
        let engine = TaskEngine::new();
        let agent = agent(AutonomyLevel::ExecuteAll);
        let task = planned_task(&engine, &agent, &["crm.lookup_partner", "crm.add_note", "crm.add_note"]);
        let mut task = engine.claim(task, &agent, &catalog(), "w").expect("claim").task;

        task = engine.start_action(task, 1).expect("start");
        task = engine.complete_action(task, 1, "partner 7").expect("complete");
        task = engine.start_action(task, 2).expect("start");
        let failed = engine.fail_action(task, 2, "note body missing").expect("fail");

        let task = failed.task;
        assert_eq!(task.state, TaskState::Failed);
        assert_eq!(task.plan[0].state, ActionState::Done);
        assert_eq!(task.plan[1].state, ActionState::Failed);
        assert_eq!(task.plan[2].state, ActionState::Pending);
        assert_eq!(task.error.as_deref(), Some("action 2 (crm.add_note) failed: note body missing"));
        assert_eq!(failed.transition.reason, "action_failed");
    }

    #[test]
    fn outputs_and_errors_are_truncated() {
        let engine = TaskEngine::with_config(EngineConfig {
            max_output_chars: 4,
            max_error_chars: 10,
            ..EngineConfig::default()
        });
        let agent = agent(AutonomyLevel::ExecuteAll);
        let task = planned_task(&engine, &agent, &["crm.lookup_partner", "crm.add_note"]);
        let mut task = engine.claim(task, &agent, &catalog(), "w").expect("claim").task;

        task = engine.start_action(task, 1).expect("start");
        task = engine.complete_action(task, 1, "abcdefgh").expect("complete");
        assert_eq!(task.plan[0].result.as_deref(), Some("abcd"));

        task = engine.start_action(task, 2).expect("start");
        let task = engine.fail_action(task, 2, &"e".repeat(50)).expect("fail").task;
        assert_eq!(task.plan[1].error.as_deref().map(str::len), Some(10));
        assert_eq!(task.error.as_deref().map(|error| error.chars().count()), Some(10));
    }

    #[test]
    fn retry_resets_failed_actions_and_keeps_done_ones() {
        let engine = TaskEngine::new();
        let agent = agent(AutonomyLevel::ExecuteAll);
        let task = planned_task(&engine, &agent, &["crm.lookup_partner", "crm.add_note"]);
        let mut task = engine.claim(task, &agent, &catalog(), "w").expect("claim").task;
        task = engine.start_action(task, 1).expect("start");
        task = engine.complete_action(task, 1, "ok").expect("complete");
        task = engine.start_action(task, 2).expect("start");
        let failed = engine.fail_action(task, 2, "boom").expect("fail").task;

        let retried = engine.retry(failed, "u-1").expect("retry").task;

        assert_eq!(retried.state, TaskState::Planned);
        assert_eq!(retried.plan[0].state, ActionState::Done);
        assert_eq!(retried.plan[1].state, ActionState::Pending);
        assert_eq!(retried.pending_sequences(), vec![2]);
        assert!(retried.error.is_none());

        assert!(matches!(engine.retry(retried, "u-1"), Err(ExecutionError::InvalidTransition { .. })));
    }

    #[test]
    fn finish_joins_outputs_in_sequence_order() {
        let engine = TaskEngine::new();
        let agent = agent(AutonomyLevel::ExecuteAll);
        let task = planned_task(&engine, &agent, &["crm.lookup_partner", "crm.add_note"]);
        let mut task = engine.claim(task, &agent, &catalog(), "w").expect("claim").task;
        for (sequence, output) in [(1, "partner 7"), (2, "note 12")] {
            task = engine.start_action(task, sequence).expect("start");
            task = engine.complete_action(task, sequence, output).expect("complete");
        }

        let done = engine.finish(task).expect("finish").task;

        assert_eq!(done.state, TaskState::Done);
        assert_eq!(
            done.result.as_deref(),
            Some("[crm.lookup_partner] partner 7\n\n[crm.add_note] note 12")
        );
        assert!(done.claimed_by.is_none());
    }

    #[test]
    fn empty_plan_finishes_with_ok() {
        let engine = TaskEngine::new();
        let agent = agent(AutonomyLevel::ExecuteAll);
        let task = planned_task(&engine, &agent, &[]);
        let task = engine.claim(task, &agent, &catalog(), "w").expect("claim").task;

        let done = engine.finish(task).expect("finish").task;

        assert_eq!(done.result.as_deref(), Some(EMPTY_RESULT));
    }

    #[test]
    fn finish_refuses_open_actions() {
        let engine = TaskEngine::new();
        let agent = agent(AutonomyLevel::ExecuteAll);
        let task = planned_task(&engine, &agent, &["crm.lookup_partner"]);
        let task = engine.claim(task, &agent, &catalog(), "w").expect("claim").task;

        assert!(matches!(engine.finish(task), Err(ExecutionError::InvalidTransition { .. })));
    }

    #[test]
    fn cancel_is_reachable_from_every_non_terminal_state() {
        let engine = TaskEngine::new();
        let agent = agent(AutonomyLevel::ExecuteAll);

        let draft = Task::draft(TenantId("acme".to_string()), "u-1", agent.id.clone(), "x");
        let waiting = planned_task(&engine, &agent, &["sales.create_order"]);
        let planned = planned_task(&engine, &agent, &["crm.lookup_partner"]);
        let running = engine
            .claim(planned_task(&engine, &agent, &["crm.lookup_partner"]), &agent, &catalog(), "w")
            .expect("claim")
            .task;

        for task in [draft, waiting, planned, running] {
            let result = engine.cancel(task, "u-1", Some("no longer needed".to_string()));
            let cancelled = result.expect("cancel");
            assert_eq!(cancelled.task.state, TaskState::Cancelled);
            assert_eq!(cancelled.transition.to_state, TaskState::Cancelled);
        }
    }

    #[test]
    fn transitions_carry_monotonic_state_versions() {
        let engine = TaskEngine::new();
        let agent = agent(AutonomyLevel::ExecuteAll);
        let task = planned_task(&engine, &agent, &["sales.create_order"]);
        let approved = engine.approve(task, "manager").expect("approve");
        let claimed = engine.claim(approved.task, &agent, &catalog(), "w").expect("claim");

        assert_eq!(approved.transition.state_version, 3);
        assert_eq!(claimed.transition.state_version, 4);
        assert_eq!(claimed.transition.from_state, Some(TaskState::Planned));
    }

    #[test]
    fn creation_event_opens_the_log_and_running_tasks_cannot_be_replanned() {
        let engine = TaskEngine::new();
        let agent = agent(AutonomyLevel::ExecuteAll);
        let draft = Task::draft(TenantId("acme".to_string()), "u-1", agent.id.clone(), "x");

        let created = engine.created(&draft, "u-1");
        assert_eq!(created.from_state, None);
        assert_eq!(created.to_state, TaskState::Draft);
        assert_eq!(created.state_version, 1);
        assert!(engine.ensure_plannable(&draft).is_ok());

        let running = engine
            .claim(planned_task(&engine, &agent, &["crm.lookup_partner"]), &agent, &catalog(), "w")
            .expect("claim")
            .task;
        assert!(matches!(
            engine.ensure_plannable(&running),
            Err(ExecutionError::InvalidTransition { .. })
        ));
    }
}
