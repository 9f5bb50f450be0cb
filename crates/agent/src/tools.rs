use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

use conductor_core::catalog::CapabilityCatalog;
use conductor_core::domain::agent::{AgentId, TenantId};
use conductor_core::domain::capability::{CapabilityCode, HandlerTarget};
use conductor_core::domain::task::TaskId;

/// Everything a handler learns about the call besides its params. Handlers
/// act as `impersonation_identity`, never as the requester.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct InvocationContext {
    pub task_id: TaskId,
    pub sequence: u32,
    pub tenant_id: TenantId,
    pub agent_id: AgentId,
    pub impersonation_identity: String,
    pub capability_code: CapabilityCode,
}

#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("{0}")]
    Rejected(String),
    #[error("transport error: {0}")]
    Transport(String),
}

#[async_trait]
pub trait CapabilityHandler: Send + Sync {
    async fn invoke(&self, context: &InvocationContext, params: &Value) -> Result<Value, HandlerError>;
}

/// Renders a handler result for the action log: strings verbatim, anything
/// else as compact JSON.
pub fn render_output(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

#[derive(Default)]
pub struct HandlerRegistry {
    handlers: HashMap<HandlerTarget, Arc<dyn CapabilityHandler>>,
}

impl HandlerRegistry {
    pub fn register<H>(&mut self, target: impl Into<String>, handler: H)
    where
        H: CapabilityHandler + 'static,
    {
        self.handlers.insert(HandlerTarget(target.into()), Arc::new(handler));
    }

    pub fn resolve(&self, target: &HandlerTarget) -> Option<Arc<dyn CapabilityHandler>> {
        self.handlers.get(target).cloned()
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Lists every active catalog capability whose target has no handler.
    pub fn validate_catalog(&self, catalog: &CapabilityCatalog) -> HandlerReport {
        let mut missing: Vec<MissingHandler> = catalog
            .iter()
            .filter(|capability| capability.active)
            .filter(|capability| !self.handlers.contains_key(&capability.target))
            .map(|capability| MissingHandler {
                capability_code: capability.code.clone(),
                target: capability.target.clone(),
            })
            .collect();
        missing.sort_by(|left, right| left.capability_code.cmp(&right.capability_code));

        HandlerReport { registered: self.handlers.len(), missing }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct MissingHandler {
    pub capability_code: CapabilityCode,
    pub target: HandlerTarget,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HandlerReport {
    pub registered: usize,
    pub missing: Vec<MissingHandler>,
}

impl HandlerReport {
    pub fn is_complete(&self) -> bool {
        self.missing.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use serde_json::{json, Value};

    use conductor_core::catalog::CapabilityCatalog;
    use conductor_core::domain::capability::{Capability, HandlerTarget, RiskLevel};

    use super::{render_output, CapabilityHandler, HandlerError, HandlerRegistry, InvocationContext};

    struct Echo;

    #[async_trait]
    impl CapabilityHandler for Echo {
        async fn invoke(
            &self,
            _context: &InvocationContext,
            params: &Value,
        ) -> Result<Value, HandlerError> {
            Ok(params.clone())
        }
    }

    #[test]
    fn report_lists_active_capabilities_without_handlers() {
        let catalog = CapabilityCatalog::new(vec![
            Capability::new("crm.lookup_partner", "crm_lookup", RiskLevel::Low, false),
            Capability::new("sales.create_order", "sale_order_create", RiskLevel::High, true),
            Capability::new("crm.purge", "crm_purge", RiskLevel::High, true).inactive(),
        ])
        .expect("catalog");

        let mut registry = HandlerRegistry::default();
        registry.register("crm_lookup", Echo);

        let report = registry.validate_catalog(&catalog);
        assert!(!report.is_complete());
        assert_eq!(report.registered, 1);
        assert_eq!(report.missing.len(), 1);
        assert_eq!(report.missing[0].capability_code.as_str(), "sales.create_order");
        assert_eq!(report.missing[0].target, HandlerTarget("sale_order_create".to_string()));

        registry.register("sale_order_create", Echo);
        assert!(registry.validate_catalog(&catalog).is_complete());
    }

    #[test]
    fn unknown_target_does_not_resolve() {
        let registry = HandlerRegistry::default();
        assert!(registry.resolve(&HandlerTarget("crm_lookup".to_string())).is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn strings_render_verbatim_and_other_values_as_json() {
        assert_eq!(render_output(&json!("order 42 created")), "order 42 created");
        assert_eq!(render_output(&json!({"id": 42})), "{\"id\":42}");
        assert_eq!(render_output(&Value::Null), "null");
    }
}
