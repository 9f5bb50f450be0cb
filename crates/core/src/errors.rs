use thiserror::Error;

use crate::domain::agent::AgentId;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DomainError {
    #[error("agent `{agent_id}` is not ready: {reason}")]
    AgentNotReady { agent_id: AgentId, reason: String },
}

#[cfg(test)]
mod tests {
    use crate::domain::agent::AgentId;
    use crate::errors::DomainError;

    #[test]
    fn not_ready_error_names_agent_and_reason() {
        let error = DomainError::AgentNotReady {
            agent_id: AgentId("sales-bot".to_owned()),
            reason: "agent has no allowed capabilities".to_owned(),
        };

        assert_eq!(
            error.to_string(),
            "agent `sales-bot` is not ready: agent has no allowed capabilities"
        );
    }
}
