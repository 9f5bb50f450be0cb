pub mod approvals;
pub mod audit;
pub mod catalog;
pub mod config;
pub mod context;
pub mod domain;
pub mod errors;
pub mod execution_engine;
pub mod text;

pub use chrono;

pub use approvals::{ApprovalGate, GateDecision, PlanValidationError};
pub use audit::{AuditRecord, AuditRecordId, AuditSink, AuditStatus, InMemoryAuditSink};
pub use catalog::{CapabilityCatalog, CatalogError};
pub use context::{ContextEntry, ContextQuery, ContextSnippet, ContextSource, NoContext};
pub use domain::agent::{Agent, AgentId, AgentLlmProvider, AutonomyLevel, TenantId};
pub use domain::capability::{Capability, CapabilityCode, HandlerTarget, RiskLevel};
pub use domain::policy::Policy;
pub use domain::task::{
    ActionState, ApprovalFinding, ApprovalReason, PlannedAction, Task, TaskId, TaskState,
    TaskTransitionEvent, TaskTransitionId,
};
pub use errors::DomainError;
pub use execution_engine::{EngineConfig, ExecutionError, TaskEngine, TransitionResult};
