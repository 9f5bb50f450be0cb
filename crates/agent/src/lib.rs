//! Agent runtime: routing, planning and dispatch around the core task engine.
//!
//! The text provider only ever proposes. Which agent runs, which actions are
//! allowed and whether a human must sign off are decided by the catalog, the
//! approval gate and the engine in `conductor-core`.

pub mod assembly;
pub mod audit_queue;
pub mod llm;
pub mod planner;
pub mod router;
pub mod runtime;
pub mod tools;
pub mod webhook;

pub use assembly::{assemble, catalog_from_config, Assembly, AssemblyError};
pub use audit_queue::{AuditDropCounter, QueuedAuditSink};
pub use llm::{GenerationRequest, LlmClient, LlmError, OllamaClient, OpenAiCompatibleClient, ProviderRouter};
pub use planner::{PlanDraft, Planner, PlannerSettings, PlanningError};
pub use router::{RouteDecision, TaskRouter};
pub use runtime::{
    Collaborators, Orchestrator, OrchestratorError, OrchestratorSettings, SubmitRequest, SweepReport,
};
pub use tools::{CapabilityHandler, HandlerError, HandlerRegistry, HandlerReport, InvocationContext};
pub use webhook::WebhookHandler;
