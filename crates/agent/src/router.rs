//! Picks the executing agent for a task.
//!
//! A controller agent reads the request and may name another agent in
//! `delegate_to`. Routing never fails: any provider, parse or lookup problem
//! leaves the task with its default agent.

use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, warn};

use conductor_core::domain::agent::{Agent, AgentId};
use conductor_core::domain::task::Task;
use conductor_core::text::outermost_json_object;
use conductor_db::repositories::AgentRepository;

use crate::llm::{GenerationRequest, LlmClient};

#[derive(Clone, Debug, PartialEq)]
pub struct RouteDecision {
    pub executing_agent: Agent,
    /// Verbatim controller output, kept for operators.
    pub raw_output: Option<String>,
    pub delegated: bool,
}

impl RouteDecision {
    pub fn fallback(default_agent: &Agent, raw_output: Option<String>) -> Self {
        Self { executing_agent: default_agent.clone(), raw_output, delegated: false }
    }
}

pub struct TaskRouter {
    llm: Arc<dyn LlmClient>,
    agents: Arc<dyn AgentRepository>,
    temperature: f32,
}

impl TaskRouter {
    pub fn new(llm: Arc<dyn LlmClient>, agents: Arc<dyn AgentRepository>, temperature: f32) -> Self {
        Self { llm, agents, temperature }
    }

    pub async fn route(&self, task: &Task, controller: &Agent, default_agent: &Agent) -> RouteDecision {
        let candidates = match self.agents.list_for_tenant(&task.tenant_id).await {
            Ok(agents) => agents.into_iter().filter(|agent| agent.active).collect::<Vec<_>>(),
            Err(error) => {
                warn!(
                    event_name = "task.route.fallback",
                    task_id = %task.id,
                    correlation_id = %task.id,
                    reason = "agent_list_failed",
                    error = %error,
                    "routing fell back to the default agent"
                );
                return RouteDecision::fallback(default_agent, None);
            }
        };

        let prompt = routing_prompt(task, &candidates);
        let request = GenerationRequest::for_agent(controller, prompt, self.temperature);
        let raw_output = match self.llm.generate(&request).await {
            Ok(text) => text,
            Err(error) => {
                warn!(
                    event_name = "task.route.fallback",
                    task_id = %task.id,
                    correlation_id = %task.id,
                    reason = "provider_error",
                    error = %error,
                    "routing fell back to the default agent"
                );
                return RouteDecision::fallback(default_agent, None);
            }
        };

        let Some(delegate_id) = delegate_to(&raw_output) else {
            debug!(
                event_name = "task.route.default",
                task_id = %task.id,
                correlation_id = %task.id,
                "controller kept the default agent"
            );
            return RouteDecision::fallback(default_agent, Some(raw_output));
        };

        match candidates.into_iter().find(|agent| agent.id == delegate_id) {
            Some(agent) => {
                debug!(
                    event_name = "task.route.delegated",
                    task_id = %task.id,
                    correlation_id = %task.id,
                    agent_id = %agent.id,
                    "task delegated"
                );
                RouteDecision { executing_agent: agent, raw_output: Some(raw_output), delegated: true }
            }
            None => {
                warn!(
                    event_name = "task.route.fallback",
                    task_id = %task.id,
                    correlation_id = %task.id,
                    reason = "unknown_delegate",
                    delegate_to = %delegate_id,
                    "routing fell back to the default agent"
                );
                RouteDecision::fallback(default_agent, Some(raw_output))
            }
        }
    }
}

/// `delegate_to` from the outermost JSON object, when it names an agent.
fn delegate_to(raw: &str) -> Option<AgentId> {
    let object: Value = serde_json::from_str(outermost_json_object(raw)?).ok()?;
    let delegate = object.get("delegate_to")?.as_str()?.trim();
    if delegate.is_empty() {
        return None;
    }
    Some(AgentId(delegate.to_string()))
}

fn routing_prompt(task: &Task, candidates: &[Agent]) -> String {
    let roster = candidates
        .iter()
        .map(|agent| {
            let role = agent.role.as_deref().unwrap_or("general");
            format!("- {} ({}): {}", agent.id, role, agent.name)
        })
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        "Decide which agent should handle the request below. Reply with a JSON object \
         {{\"delegate_to\": <agent id or null>, \"notes\": <short text>, \"actions\": []}}. \
         Use null to keep the default agent `{}`.\n\nAgents:\n{}\n\nRequest:\n{}\n",
        task.agent_id, roster, task.user_request
    )
}
