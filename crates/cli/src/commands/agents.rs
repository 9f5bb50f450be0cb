use std::fs;
use std::path::Path;

use conductor_core::domain::agent::{Agent, AgentId, AgentLlmProvider, AutonomyLevel, TenantId};
use conductor_core::domain::policy::Policy;
use conductor_db::repositories::{AgentRepository, SqlAgentRepository};
use serde::Deserialize;
use serde_json::json;

use crate::commands::{load_config, open_database, runtime, to_json, CommandResult};

/// Agent profile as written by operators. Omitted fields take the defaults
/// of a freshly created agent.
#[derive(Debug, Deserialize)]
struct AgentFile {
    id: String,
    tenant_id: String,
    impersonation_identity: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default = "default_active")]
    active: bool,
    #[serde(default)]
    role: Option<String>,
    #[serde(default)]
    manager_agent_id: Option<String>,
    #[serde(default)]
    allowed_capabilities: Vec<String>,
    #[serde(default)]
    autonomy_level: Option<AutonomyLevel>,
    #[serde(default)]
    llm_provider: Option<AgentLlmProvider>,
    #[serde(default)]
    model_name: Option<String>,
    #[serde(default)]
    system_prompt: Option<String>,
    #[serde(default)]
    policy: Option<Policy>,
}

fn default_active() -> bool {
    true
}

impl AgentFile {
    fn into_agent(self) -> Agent {
        let mut agent = Agent::new(self.id, self.tenant_id, self.impersonation_identity)
            .with_capabilities(self.allowed_capabilities);
        if let Some(name) = self.name {
            agent.name = name;
        }
        agent.active = self.active;
        agent.role = self.role;
        agent.manager_agent_id = self.manager_agent_id.map(AgentId);
        if let Some(autonomy_level) = self.autonomy_level {
            agent.autonomy_level = autonomy_level;
        }
        if let Some(llm_provider) = self.llm_provider {
            agent.llm_provider = llm_provider;
        }
        agent.model_name = self.model_name;
        agent.system_prompt = self.system_prompt;
        if let Some(policy) = self.policy {
            agent.policy = policy;
        }
        agent
    }
}

fn read_agent_file(path: &Path) -> Result<Agent, String> {
    let raw = fs::read_to_string(path)
        .map_err(|error| format!("could not read `{}`: {error}", path.display()))?;
    let file: AgentFile = toml::from_str(&raw)
        .map_err(|error| format!("could not parse `{}`: {error}", path.display()))?;
    Ok(file.into_agent())
}

pub fn register(path: &Path) -> CommandResult {
    let agent = match read_agent_file(path) {
        Ok(agent) => agent,
        Err(message) => return CommandResult::failure("agents.register", "invalid_argument", message, 2),
    };
    let config = match load_config("agents.register") {
        Ok(config) => config,
        Err(result) => return result,
    };
    let runtime = match runtime("agents.register") {
        Ok(runtime) => runtime,
        Err(result) => return result,
    };

    runtime.block_on(async {
        let pool = match open_database("agents.register", &config).await {
            Ok(pool) => pool,
            Err(result) => return result,
        };
        let saved = SqlAgentRepository::new(pool.clone()).save(agent.clone()).await;
        pool.close().await;

        match saved {
            Ok(()) => {
                let readiness = match agent.check_ready() {
                    Ok(()) => "ready".to_string(),
                    Err(error) => error.to_string(),
                };
                CommandResult::success_with_data(
                    "agents.register",
                    format!("agent {} saved ({readiness})", agent.id),
                    to_json(&agent),
                )
            }
            Err(error) => CommandResult::failure("agents.register", "persistence", error.to_string(), 4),
        }
    })
}

pub fn list(tenant: String) -> CommandResult {
    let config = match load_config("agents.list") {
        Ok(config) => config,
        Err(result) => return result,
    };
    let runtime = match runtime("agents.list") {
        Ok(runtime) => runtime,
        Err(result) => return result,
    };

    runtime.block_on(async {
        let pool = match open_database("agents.list", &config).await {
            Ok(pool) => pool,
            Err(result) => return result,
        };
        let listed = SqlAgentRepository::new(pool.clone()).list_for_tenant(&TenantId(tenant)).await;
        pool.close().await;

        match listed {
            Ok(agents) => {
                let rows: Vec<_> = agents
                    .iter()
                    .map(|agent| {
                        json!({
                            "id": agent.id,
                            "name": agent.name,
                            "active": agent.active,
                            "role": agent.role,
                            "autonomy_level": agent.autonomy_level,
                            "allowed_capabilities": agent.allowed_capabilities,
                            "ready": agent.check_ready().is_ok(),
                        })
                    })
                    .collect();
                CommandResult::success_with_data(
                    "agents.list",
                    format!("{} agent(s)", rows.len()),
                    Some(json!(rows)),
                )
            }
            Err(error) => CommandResult::failure("agents.list", "persistence", error.to_string(), 4),
        }
    })
}

#[cfg(test)]
mod tests {
    use conductor_core::domain::agent::{AgentLlmProvider, AutonomyLevel};
    use rust_decimal::Decimal;

    use super::AgentFile;

    #[test]
    fn agent_file_fills_defaults_and_overrides() {
        let file: AgentFile = toml::from_str(
            r#"
id = "finance-bot"
tenant_id = "acme"
impersonation_identity = "svc-finance"
allowed_capabilities = ["accounting.post_invoice"]
autonomy_level = "suggest"
llm_provider = "ollama"

[policy]
name = "finance"
require_approval_high_risk = true
require_approval_over_amount = true
amount_limit = "1000"
forbid_delete = true
"#,
        )
        .expect("parse agent file");

        let agent = file.into_agent();

        assert_eq!(agent.name, "finance-bot");
        assert!(agent.active);
        assert_eq!(agent.autonomy_level, AutonomyLevel::Suggest);
        assert_eq!(agent.llm_provider, AgentLlmProvider::Ollama);
        assert_eq!(agent.policy.amount_limit, Decimal::new(1000, 0));
        assert_eq!(agent.allowed_capabilities.len(), 1);
    }
}
