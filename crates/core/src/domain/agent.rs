use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::domain::capability::CapabilityCode;
use crate::domain::policy::Policy;
use crate::errors::DomainError;

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AgentId(pub String);

impl fmt::Display for AgentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TenantId(pub String);

impl fmt::Display for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AutonomyLevel {
    Suggest,
    ExecuteLow,
    ExecuteAll,
}

impl AutonomyLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Suggest => "suggest",
            Self::ExecuteLow => "execute_low",
            Self::ExecuteAll => "execute_all",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "suggest" => Some(Self::Suggest),
            "execute_low" => Some(Self::ExecuteLow),
            "execute_all" => Some(Self::ExecuteAll),
            _ => None,
        }
    }
}

/// Which text provider an agent talks to. `System` defers to the configured default.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentLlmProvider {
    System,
    OpenAiCompatible,
    Ollama,
    Disabled,
}

impl AgentLlmProvider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::System => "system",
            Self::OpenAiCompatible => "openai_compatible",
            Self::Ollama => "ollama",
            Self::Disabled => "disabled",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "system" => Some(Self::System),
            "openai_compatible" => Some(Self::OpenAiCompatible),
            "ollama" => Some(Self::Ollama),
            "disabled" => Some(Self::Disabled),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Agent {
    pub id: AgentId,
    pub tenant_id: TenantId,
    pub name: String,
    pub active: bool,
    pub role: Option<String>,
    pub manager_agent_id: Option<AgentId>,
    /// Principal every capability handler runs as. Distinct from the task requester.
    pub impersonation_identity: String,
    pub policy: Policy,
    pub allowed_capabilities: BTreeSet<CapabilityCode>,
    pub llm_provider: AgentLlmProvider,
    pub model_name: Option<String>,
    pub system_prompt: Option<String>,
    pub autonomy_level: AutonomyLevel,
}

impl Agent {
    pub fn new(
        id: impl Into<String>,
        tenant_id: impl Into<String>,
        impersonation_identity: impl Into<String>,
    ) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id: AgentId(id),
            tenant_id: TenantId(tenant_id.into()),
            active: true,
            role: None,
            manager_agent_id: None,
            impersonation_identity: impersonation_identity.into(),
            policy: Policy::default(),
            allowed_capabilities: BTreeSet::new(),
            llm_provider: AgentLlmProvider::System,
            model_name: None,
            system_prompt: None,
            autonomy_level: AutonomyLevel::ExecuteLow,
        }
    }

    pub fn with_capabilities<I, S>(mut self, codes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allowed_capabilities.extend(codes.into_iter().map(|code| CapabilityCode(code.into())));
        self
    }

    pub fn with_policy(mut self, policy: Policy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_autonomy(mut self, autonomy_level: AutonomyLevel) -> Self {
        self.autonomy_level = autonomy_level;
        self
    }

    pub fn with_system_prompt(mut self, system_prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(system_prompt.into());
        self
    }

    pub fn allows(&self, code: &CapabilityCode) -> bool {
        self.allowed_capabilities.contains(code)
    }

    pub fn can_execute(&self) -> bool {
        self.autonomy_level != AutonomyLevel::Suggest
    }

    pub fn check_ready(&self) -> Result<(), DomainError> {
        let reason = if !self.active {
            Some("agent is inactive")
        } else if self.allowed_capabilities.is_empty() {
            Some("agent has no allowed capabilities")
        } else if self.impersonation_identity.trim().is_empty() {
            Some("agent has no impersonation identity")
        } else if self.llm_provider == AgentLlmProvider::Disabled {
            Some("agent text provider is disabled")
        } else {
            None
        };

        match reason {
            Some(reason) => Err(DomainError::AgentNotReady {
                agent_id: self.id.clone(),
                reason: reason.to_string(),
            }),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{Agent, AgentLlmProvider, AutonomyLevel};
    use crate::domain::capability::CapabilityCode;
    use crate::errors::DomainError;

    fn ready_agent() -> Agent {
        Agent::new("sales-bot", "acme", "svc-sales").with_capabilities(["crm.lookup_partner"])
    }

    #[test]
    fn ready_agent_passes_check() {
        assert_eq!(ready_agent().check_ready(), Ok(()));
    }

    #[test]
    fn agent_without_capabilities_is_not_ready() {
        let agent = Agent::new("idle-bot", "acme", "svc-idle");

        let error = agent.check_ready().unwrap_err();
        assert!(matches!(
            error,
            DomainError::AgentNotReady { ref reason, .. } if reason.contains("no allowed capabilities")
        ));
    }

    #[test]
    fn agent_with_disabled_provider_is_not_ready() {
        let mut agent = ready_agent();
        agent.llm_provider = AgentLlmProvider::Disabled;

        assert!(agent.check_ready().is_err());
    }

    #[test]
    fn agent_without_identity_is_not_ready() {
        let mut agent = ready_agent();
        agent.impersonation_identity = "  ".to_string();

        assert!(agent.check_ready().is_err());
    }

    #[test]
    fn suggest_agents_cannot_execute() {
        let agent = ready_agent().with_autonomy(AutonomyLevel::Suggest);

        assert!(!agent.can_execute());
        assert!(agent.allows(&CapabilityCode::new("crm.lookup_partner")));
        assert!(!agent.allows(&CapabilityCode::new("crm.delete_partner")));
    }

    #[test]
    fn autonomy_and_provider_parse_storage_encoding() {
        for level in [AutonomyLevel::Suggest, AutonomyLevel::ExecuteLow, AutonomyLevel::ExecuteAll]
        {
            assert_eq!(AutonomyLevel::parse(level.as_str()), Some(level));
        }
        for provider in [
            AgentLlmProvider::System,
            AgentLlmProvider::OpenAiCompatible,
            AgentLlmProvider::Ollama,
            AgentLlmProvider::Disabled,
        ] {
            assert_eq!(AgentLlmProvider::parse(provider.as_str()), Some(provider));
        }
    }
}
