//! Turns a request into a validated, gated plan.
//!
//! Unlike routing, planning fails hard: no JSON, an unknown capability or one
//! outside the agent's allow-list rejects the whole plan and nothing is kept.

use std::sync::Arc;

use serde::Deserialize;
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::debug;

use conductor_core::approvals::{ApprovalGate, GateDecision, PlanValidationError};
use conductor_core::catalog::CapabilityCatalog;
use conductor_core::context::{render_snippets, ContextQuery, ContextSource};
use conductor_core::domain::agent::Agent;
use conductor_core::domain::capability::CapabilityCode;
use conductor_core::domain::task::{PlannedAction, Task};
use conductor_core::errors::DomainError;
use conductor_core::text::outermost_json_object;

use crate::llm::{GenerationRequest, LlmClient, LlmError};

#[derive(Debug, Error)]
pub enum PlanningError {
    #[error(transparent)]
    NotReady(#[from] DomainError),
    #[error("text provider failed: {0}")]
    Provider(#[from] LlmError),
    #[error("plan output could not be parsed: {0}")]
    Parse(String),
    #[error(transparent)]
    Validation(#[from] PlanValidationError),
}

#[derive(Clone, Debug)]
pub struct PlannerSettings {
    pub context_limit: usize,
    pub context_max_chars: usize,
    pub temperature: f32,
}

impl Default for PlannerSettings {
    fn default() -> Self {
        Self { context_limit: 5, context_max_chars: 2_000, temperature: 0.2 }
    }
}

/// A plan that passed validation but is not yet committed to its task.
#[derive(Clone, Debug, PartialEq)]
pub struct PlanDraft {
    pub actions: Vec<PlannedAction>,
    pub decision: GateDecision,
    pub raw_output: String,
    pub retrieved_context: String,
}

#[derive(Deserialize)]
struct PlanReply {
    #[serde(default)]
    actions: Option<Vec<CandidateAction>>,
}

#[derive(Deserialize)]
struct CandidateAction {
    #[serde(alias = "tool_code")]
    capability_code: String,
    #[serde(default)]
    params: Value,
    #[serde(default)]
    rationale: Option<String>,
}

pub struct Planner {
    llm: Arc<dyn LlmClient>,
    context: Arc<dyn ContextSource>,
    gate: ApprovalGate,
    settings: PlannerSettings,
}

impl Planner {
    pub fn new(llm: Arc<dyn LlmClient>, context: Arc<dyn ContextSource>, settings: PlannerSettings) -> Self {
        Self { llm, context, gate: ApprovalGate::new(), settings }
    }

    pub async fn plan(
        &self,
        task: &Task,
        agent: &Agent,
        catalog: &CapabilityCatalog,
    ) -> Result<PlanDraft, PlanningError> {
        agent.check_ready()?;

        let snippets = self
            .context
            .search(
                &task.tenant_id,
                &ContextQuery {
                    text: Some(task.user_request.clone()),
                    tags: None,
                    limit: self.settings.context_limit,
                },
            )
            .await;
        let retrieved_context = render_snippets(&snippets, self.settings.context_max_chars);

        let prompt = planning_prompt(task, agent, catalog, &retrieved_context);
        let request = GenerationRequest::for_agent(agent, prompt, self.settings.temperature);
        let raw_output = self.llm.generate(&request).await?;

        let actions = parse_plan(&raw_output)?;
        let decision = self.gate.evaluate(&actions, agent, catalog)?;

        debug!(
            event_name = "task.plan.validated",
            task_id = %task.id,
            correlation_id = %task.id,
            agent_id = %agent.id,
            actions = actions.len(),
            approval_required = decision.approval_required,
            destructive_found = decision.destructive_found,
            "plan validated"
        );

        Ok(PlanDraft { actions, decision, raw_output, retrieved_context })
    }
}

/// Parses the outermost JSON object of `raw` into pending actions numbered
/// from 1 in response order.
pub fn parse_plan(raw: &str) -> Result<Vec<PlannedAction>, PlanningError> {
    let json = outermost_json_object(raw)
        .ok_or_else(|| PlanningError::Parse("no JSON object found in plan output".to_string()))?;
    let reply: PlanReply =
        serde_json::from_str(json).map_err(|error| PlanningError::Parse(error.to_string()))?;

    Ok(reply
        .actions
        .unwrap_or_default()
        .into_iter()
        .enumerate()
        .map(|(index, candidate)| {
            let params = match candidate.params {
                Value::Null => Value::Object(Map::new()),
                other => other,
            };
            PlannedAction::pending(
                index as u32 + 1,
                CapabilityCode::new(candidate.capability_code.trim()),
                params,
                candidate.rationale.unwrap_or_default(),
            )
        })
        .collect())
}

fn planning_prompt(task: &Task, agent: &Agent, catalog: &CapabilityCatalog, context: &str) -> String {
    let mut allowed: Vec<String> = catalog
        .iter()
        .filter(|capability| capability.active && agent.allows(&capability.code))
        .map(|capability| {
            let description = capability.description.as_deref().unwrap_or(&capability.name);
            match &capability.sample_params {
                Some(sample) => format!(
                    "- {} [{} risk]: {} (params example: {})",
                    capability.code,
                    capability.risk_level.as_str(),
                    description,
                    sample
                ),
                None => format!(
                    "- {} [{} risk]: {}",
                    capability.code,
                    capability.risk_level.as_str(),
                    description
                ),
            }
        })
        .collect();
    allowed.sort();

    let context_block =
        if context.is_empty() { "(none)".to_string() } else { context.to_string() };

    format!(
        "Create a PLAN as a JSON object with the key \"actions\" (a list). Each action has \
         \"capability_code\", \"params\" (object) and \"rationale\" (short text). Only use the \
         capabilities listed below.\n\nCapabilities:\n{}\n\nContext:\n{}\n\nRequest:\n{}\n",
        allowed.join("\n"),
        context_block,
        task.user_request
    )
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;
    use chrono::Utc;
    use serde_json::json;

    use conductor_core::approvals::PlanValidationError;
    use conductor_core::catalog::CapabilityCatalog;
    use conductor_core::context::ContextEntry;
    use conductor_core::domain::agent::{Agent, TenantId};
    use conductor_core::domain::capability::{Capability, RiskLevel};
    use conductor_core::domain::task::{ActionState, Task};
    use conductor_core::errors::DomainError;
    use conductor_db::repositories::{ContextRepository, InMemoryContextRepository};

    use super::{parse_plan, Planner, PlannerSettings, PlanningError};
    use crate::llm::{GenerationRequest, LlmClient, LlmError};

    #[derive(Default)]
    struct Scripted {
        reply: String,
        prompts: Mutex<Vec<String>>,
    }

    impl Scripted {
        fn new(reply: &str) -> Self {
            Self { reply: reply.to_string(), prompts: Mutex::new(Vec::new()) }
        }
    }

    #[async_trait]
    impl LlmClient for Scripted {
        async fn generate(&self, request: &GenerationRequest) -> Result<String, LlmError> {
            self.prompts.lock().expect("prompt lock").push(request.user_prompt.clone());
            Ok(self.reply.clone())
        }
    }

    fn catalog() -> CapabilityCatalog {
        CapabilityCatalog::new(vec![
            Capability::new("crm.lookup_partner", "crm_lookup", RiskLevel::Low, false),
            Capability::new("sales.create_order", "sale_order_create", RiskLevel::High, true),
            Capability::new("crm.delete_partner", "crm_delete", RiskLevel::High, false),
        ])
        .expect("catalog")
    }

    fn agent() -> Agent {
        Agent::new("sales-bot", "acme", "svc-sales")
            .with_capabilities(["crm.lookup_partner", "sales.create_order"])
    }

    fn task() -> Task {
        Task::draft(TenantId("acme".to_string()), "dana", agent().id, "create an order for Acme")
    }

    fn planner(llm: Arc<Scripted>, context: Arc<InMemoryContextRepository>) -> Planner {
        Planner::new(llm, context, PlannerSettings::default())
    }

    #[tokio::test]
    async fn plan_numbers_actions_and_runs_the_gate() {
        let llm = Arc::new(Scripted::new(
            "Here you go:\n{\"actions\": [\
             {\"capability_code\": \"crm.lookup_partner\", \"params\": {\"name\": \"Acme\"}, \"rationale\": \"find partner\"},\
             {\"tool_code\": \"sales.create_order\", \"params\": null}\
             ]}",
        ));
        let planner = planner(llm, Arc::new(InMemoryContextRepository::default()));

        let draft = planner.plan(&task(), &agent(), &catalog()).await.expect("plan");

        assert_eq!(draft.actions.len(), 2);
        assert_eq!(draft.actions[0].sequence, 1);
        assert_eq!(draft.actions[1].sequence, 2);
        assert_eq!(draft.actions[1].capability_code.as_str(), "sales.create_order");
        assert_eq!(draft.actions[1].params, json!({}));
        assert!(draft.actions.iter().all(|action| action.state == ActionState::Pending));
        assert!(draft.decision.approval_required);
        assert!(draft.raw_output.starts_with("Here you go"));
    }

    #[tokio::test]
    async fn disallowed_capability_rejects_the_whole_plan() {
        let llm = Arc::new(Scripted::new(
            "{\"actions\": [\
             {\"capability_code\": \"crm.lookup_partner\", \"params\": {}},\
             {\"capability_code\": \"crm.delete_partner\", \"params\": {}}\
             ]}",
        ));
        let planner = planner(llm, Arc::new(InMemoryContextRepository::default()));

        let error = planner.plan(&task(), &agent(), &catalog()).await.expect_err("rejected");

        assert!(matches!(
            error,
            PlanningError::Validation(PlanValidationError::CapabilityNotAllowed { sequence: 2, .. })
        ));
    }

    #[tokio::test]
    async fn output_without_json_is_a_hard_error() {
        let llm = Arc::new(Scripted::new("I would look up the partner first."));
        let planner = planner(llm, Arc::new(InMemoryContextRepository::default()));

        let error = planner.plan(&task(), &agent(), &catalog()).await.expect_err("parse error");

        assert!(matches!(error, PlanningError::Parse(_)));
    }

    #[tokio::test]
    async fn agent_that_is_not_ready_never_reaches_the_provider() {
        let llm = Arc::new(Scripted::new("{\"actions\": []}"));
        let planner = planner(llm.clone(), Arc::new(InMemoryContextRepository::default()));
        let idle = Agent::new("idle-bot", "acme", "svc-idle");

        let error = planner.plan(&task(), &idle, &catalog()).await.expect_err("not ready");

        assert!(matches!(error, PlanningError::NotReady(DomainError::AgentNotReady { .. })));
        assert!(llm.prompts.lock().expect("prompt lock").is_empty());
    }

    #[tokio::test]
    async fn retrieved_context_grounds_the_prompt() {
        let context = Arc::new(InMemoryContextRepository::default());
        context
            .save(ContextEntry {
                id: "c1".to_string(),
                tenant_id: TenantId("acme".to_string()),
                title: "Acme ordering".to_string(),
                tags: "sales".to_string(),
                content: "Orders for Acme need a purchase order number.".to_string(),
                created_at: Utc::now(),
            })
            .await
            .expect("save context");
        let llm = Arc::new(Scripted::new("{\"actions\": []}"));
        let planner = planner(llm.clone(), context);

        let draft = planner.plan(&task(), &agent(), &catalog()).await.expect("plan");

        assert!(draft.actions.is_empty());
        assert!(draft.retrieved_context.contains("Acme ordering"));
        let prompts = llm.prompts.lock().expect("prompt lock");
        assert!(prompts[0].contains("purchase order number"));
        assert!(prompts[0].contains("crm.lookup_partner"));
        assert!(!prompts[0].contains("crm.delete_partner"));
    }

    #[test]
    fn candidate_without_code_is_a_parse_error() {
        let error = parse_plan("{\"actions\": [{\"params\": {}}]}").expect_err("missing code");
        assert!(matches!(error, PlanningError::Parse(_)));
    }
}
