use std::fmt;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::domain::agent::{AgentId, TenantId};
use crate::domain::capability::CapabilityCode;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaskId(pub String);

impl TaskId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaskTransitionId(pub String);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    Draft,
    Planned,
    WaitingApproval,
    Running,
    Done,
    Failed,
    Cancelled,
}

impl TaskState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Planned => "planned",
            Self::WaitingApproval => "waiting_approval",
            Self::Running => "running",
            Self::Done => "done",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "draft" => Some(Self::Draft),
            "planned" => Some(Self::Planned),
            "waiting_approval" => Some(Self::WaitingApproval),
            "running" => Some(Self::Running),
            "done" => Some(Self::Done),
            "failed" => Some(Self::Failed),
            "cancelled" => Some(Self::Cancelled),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Failed | Self::Cancelled)
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionState {
    Pending,
    Running,
    Done,
    Failed,
    Skipped,
}

impl ActionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Done => "done",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "pending" => Some(Self::Pending),
            "running" => Some(Self::Running),
            "done" => Some(Self::Done),
            "failed" => Some(Self::Failed),
            "skipped" => Some(Self::Skipped),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlannedAction {
    /// 1-based position in the plan. The only execution order.
    pub sequence: u32,
    pub capability_code: CapabilityCode,
    pub params: Value,
    pub rationale: String,
    pub state: ActionState,
    pub result: Option<String>,
    pub error: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl PlannedAction {
    pub fn pending(
        sequence: u32,
        capability_code: CapabilityCode,
        params: Value,
        rationale: impl Into<String>,
    ) -> Self {
        Self {
            sequence,
            capability_code,
            params,
            rationale: rationale.into(),
            state: ActionState::Pending,
            result: None,
            error: None,
            started_at: None,
            finished_at: None,
        }
    }
}

/// Why the approval gate flagged a plan step. Heuristic verb matches are kept
/// apart from explicit tags so operators can review mis-tagged capabilities.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ApprovalReason {
    ExplicitDestructive,
    DestructiveVerb { verb: String },
    HighRiskApproval,
    AmountOverLimit { amount: Decimal, limit: Decimal },
    AmountUnreadable { value: String },
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalFinding {
    pub sequence: u32,
    pub capability_code: CapabilityCode,
    pub reason: ApprovalReason,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub tenant_id: TenantId,
    pub requester: String,
    /// Default executing agent; used when routing does not delegate.
    pub agent_id: AgentId,
    pub router_agent_id: Option<AgentId>,
    pub executing_agent_id: Option<AgentId>,
    pub user_request: String,
    pub retrieved_context: String,
    pub router_output: Option<String>,
    pub plan_output: Option<String>,
    pub plan: Vec<PlannedAction>,
    pub state: TaskState,
    pub has_destructive_actions: bool,
    pub approval_required: bool,
    pub approval_findings: Vec<ApprovalFinding>,
    pub approved_by: Option<String>,
    pub approved_at: Option<DateTime<Utc>>,
    pub result: Option<String>,
    pub error: Option<String>,
    pub claimed_by: Option<String>,
    pub claimed_at: Option<DateTime<Utc>>,
    pub state_version: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Task {
    pub fn draft(
        tenant_id: TenantId,
        requester: impl Into<String>,
        agent_id: AgentId,
        user_request: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: TaskId::generate(),
            tenant_id,
            requester: requester.into(),
            agent_id,
            router_agent_id: None,
            executing_agent_id: None,
            user_request: user_request.into(),
            retrieved_context: String::new(),
            router_output: None,
            plan_output: None,
            plan: Vec::new(),
            state: TaskState::Draft,
            has_destructive_actions: false,
            approval_required: false,
            approval_findings: Vec::new(),
            approved_by: None,
            approved_at: None,
            result: None,
            error: None,
            claimed_by: None,
            claimed_at: None,
            state_version: 1,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn executing_agent(&self) -> &AgentId {
        self.executing_agent_id.as_ref().unwrap_or(&self.agent_id)
    }

    pub fn is_approved(&self) -> bool {
        self.approved_by.is_some()
    }

    pub fn action(&self, sequence: u32) -> Option<&PlannedAction> {
        self.plan.iter().find(|action| action.sequence == sequence)
    }

    pub fn action_mut(&mut self, sequence: u32) -> Option<&mut PlannedAction> {
        self.plan.iter_mut().find(|action| action.sequence == sequence)
    }

    /// Sequences still to dispatch, in plan order. Done actions are skipped.
    pub fn pending_sequences(&self) -> Vec<u32> {
        let mut sequences: Vec<u32> = self
            .plan
            .iter()
            .filter(|action| action.state != ActionState::Done)
            .map(|action| action.sequence)
            .collect();
        sequences.sort_unstable();
        sequences
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskTransitionEvent {
    pub id: TaskTransitionId,
    pub task_id: TaskId,
    pub from_state: Option<TaskState>,
    pub to_state: TaskState,
    pub reason: String,
    pub actor: String,
    pub detail_json: String,
    pub state_version: u32,
    pub occurred_at: DateTime<Utc>,
}
