//! Wires configuration, the SQLite pool and handlers into a ready orchestrator.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use conductor_core::catalog::{CapabilityCatalog, CatalogError};
use conductor_core::config::AppConfig;
use conductor_core::domain::capability::HandlerTarget;
use conductor_db::repositories::{
    SqlAgentRepository, SqlAuditRepository, SqlContextRepository, SqlTaskRepository,
};
use conductor_db::DbPool;

use crate::audit_queue::{AuditDropCounter, QueuedAuditSink};
use crate::llm::{LlmError, ProviderRouter};
use crate::runtime::{Collaborators, Orchestrator, OrchestratorSettings};
use crate::tools::{HandlerError, HandlerRegistry, HandlerReport};
use crate::webhook::WebhookHandler;

#[derive(Debug, Error)]
pub enum AssemblyError {
    #[error("capability catalog is invalid: {0}")]
    Catalog(#[from] CatalogError),
    #[error("text provider could not be configured: {0}")]
    Llm(#[from] LlmError),
    #[error("webhook handler for `{target}` could not be built: {source}")]
    Handler {
        target: String,
        #[source]
        source: HandlerError,
    },
}

pub struct Assembly {
    pub orchestrator: Arc<Orchestrator>,
    pub catalog: Arc<CapabilityCatalog>,
    pub handler_report: HandlerReport,
    pub audit_drops: AuditDropCounter,
    /// Finishes once the orchestrator (the last sink owner) is dropped and the
    /// audit queue is drained.
    pub audit_drain: JoinHandle<()>,
}

pub fn catalog_from_config(config: &AppConfig) -> Result<CapabilityCatalog, CatalogError> {
    CapabilityCatalog::new(config.capabilities.iter().map(|entry| entry.to_capability()).collect())
}

/// One webhook handler per configured target with a `webhook_url`. Targets
/// already present in `registry` keep their in-process handler.
pub fn register_webhooks(
    config: &AppConfig,
    registry: &mut HandlerRegistry,
) -> Result<(), AssemblyError> {
    let timeout = Duration::from_secs(config.engine.dispatch_timeout_secs);
    for entry in &config.capabilities {
        let Some(url) = &entry.webhook_url else {
            continue;
        };
        if registry.resolve(&HandlerTarget(entry.target.clone())).is_some() {
            warn!(
                event_name = "handler.webhook.shadowed",
                correlation_id = "startup",
                capability_code = %entry.code,
                target = %entry.target,
                "target already has a handler; webhook ignored"
            );
            continue;
        }
        let handler = WebhookHandler::new(url.clone(), timeout)
            .map_err(|source| AssemblyError::Handler { target: entry.target.clone(), source })?;
        registry.register(entry.target.clone(), handler);
    }
    Ok(())
}

/// Builds the SQLite-backed orchestrator. Must run inside a Tokio runtime: the
/// audit drain task is spawned here.
pub fn assemble(
    config: &AppConfig,
    pool: DbPool,
    mut handlers: HandlerRegistry,
) -> Result<Assembly, AssemblyError> {
    let catalog = Arc::new(catalog_from_config(config)?);
    register_webhooks(config, &mut handlers)?;
    let handler_report = handlers.validate_catalog(&catalog);

    let llm = Arc::new(ProviderRouter::from_config(&config.llm)?);
    let audit_drops = AuditDropCounter::default();
    let (audit, audit_drain) = QueuedAuditSink::spawn(
        Arc::new(SqlAuditRepository::new(pool.clone())),
        config.audit.queue_capacity,
        audit_drops.clone(),
    );

    let collaborators = Collaborators {
        tasks: Arc::new(SqlTaskRepository::new(pool.clone())),
        agents: Arc::new(SqlAgentRepository::new(pool.clone())),
        llm,
        context: Arc::new(SqlContextRepository::new(pool)),
        audit: Arc::new(audit),
        catalog: catalog.clone(),
        handlers: Arc::new(handlers),
    };
    let orchestrator = Arc::new(Orchestrator::new(collaborators, OrchestratorSettings::from_config(config)));

    info!(
        event_name = "orchestrator.assembled",
        correlation_id = "startup",
        worker_id = %orchestrator.settings().worker_id,
        capabilities = catalog.len(),
        handlers = handler_report.registered,
        missing_handlers = handler_report.missing.len(),
        "orchestrator assembled"
    );

    Ok(Assembly { orchestrator, catalog, handler_report, audit_drops, audit_drain })
}

#[cfg(test)]
mod tests {
    use conductor_core::config::{AppConfig, CapabilityConfig, LlmProvider};
    use conductor_core::domain::capability::{HandlerTarget, RiskLevel};
    use conductor_db::{connect_with_settings, migrations};

    use super::{assemble, catalog_from_config, register_webhooks};
    use crate::tools::HandlerRegistry;

    fn config() -> AppConfig {
        let mut config = AppConfig::default();
        config.llm.provider = LlmProvider::Disabled;
        config.capabilities = vec![
            CapabilityConfig {
                code: "crm.lookup_partner".to_string(),
                name: None,
                target: "crm_lookup".to_string(),
                description: None,
                risk_level: RiskLevel::Low,
                requires_approval: false,
                destructive: false,
                webhook_url: Some("http://127.0.0.1:9/crm".to_string()),
            },
            CapabilityConfig {
                code: "sales.create_order".to_string(),
                name: None,
                target: "sale_order_create".to_string(),
                description: None,
                risk_level: RiskLevel::High,
                requires_approval: true,
                destructive: false,
                webhook_url: None,
            },
        ];
        config
    }

    #[test]
    fn webhooks_register_only_for_targets_with_a_url() {
        let config = config();
        let mut registry = HandlerRegistry::default();
        register_webhooks(&config, &mut registry).expect("register");

        assert_eq!(registry.len(), 1);
        assert!(registry.resolve(&HandlerTarget("crm_lookup".to_string())).is_some());

        let report = registry.validate_catalog(&catalog_from_config(&config).expect("catalog"));
        assert_eq!(report.missing.len(), 1);
        assert_eq!(report.missing[0].capability_code.as_str(), "sales.create_order");
    }

    #[tokio::test]
    async fn assembly_reports_missing_handlers_without_failing() {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("pool");
        migrations::run_pending(&pool).await.expect("migrations");

        let assembly = assemble(&config(), pool, HandlerRegistry::default()).expect("assembly");

        assert_eq!(assembly.catalog.len(), 2);
        assert!(!assembly.handler_report.is_complete());
        assert_eq!(assembly.audit_drops.get(), 0);
    }
}
