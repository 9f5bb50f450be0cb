use conductor_agent::assembly::{catalog_from_config, register_webhooks};
use conductor_agent::llm::ProviderRouter;
use conductor_agent::tools::HandlerRegistry;
use conductor_core::config::{AppConfig, LoadOptions};
use conductor_core::domain::agent::AgentLlmProvider;
use conductor_db::connect_with_config;
use serde::Serialize;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
enum CheckStatus {
    Pass,
    Fail,
    Skipped,
}

#[derive(Debug, Serialize)]
struct DoctorCheck {
    name: &'static str,
    status: CheckStatus,
    details: String,
}

#[derive(Debug, Serialize)]
struct DoctorReport {
    overall_status: CheckStatus,
    summary: String,
    checks: Vec<DoctorCheck>,
}

const DEPENDENT_CHECKS: &[&str] = &["llm_provider", "capability_handlers", "database_connectivity"];

pub fn run(json_output: bool) -> String {
    let report = build_report();

    if json_output {
        return serde_json::to_string_pretty(&report).unwrap_or_else(|error| {
            format!(
                "{{\"overall_status\":\"fail\",\"summary\":\"doctor serialization failed\",\"error\":\"{}\"}}",
                escape_json(&error.to_string())
            )
        });
    }

    render_human(&report)
}

fn build_report() -> DoctorReport {
    let mut checks = Vec::new();

    match AppConfig::load(LoadOptions::default()) {
        Ok(config) => {
            checks.push(DoctorCheck {
                name: "config_validation",
                status: CheckStatus::Pass,
                details: "configuration loaded and validated".to_string(),
            });
            checks.push(check_llm_provider(&config));
            checks.push(check_capability_handlers(&config));
            checks.push(check_database_connectivity(&config));
        }
        Err(error) => {
            checks.push(DoctorCheck {
                name: "config_validation",
                status: CheckStatus::Fail,
                details: error.to_string(),
            });
            for &name in DEPENDENT_CHECKS {
                checks.push(DoctorCheck {
                    name,
                    status: CheckStatus::Skipped,
                    details: "skipped because configuration did not load".to_string(),
                });
            }
        }
    }

    let all_pass = checks.iter().all(|check| check.status == CheckStatus::Pass);
    let overall_status = if all_pass { CheckStatus::Pass } else { CheckStatus::Fail };
    let summary = if all_pass {
        "doctor: all readiness checks passed".to_string()
    } else {
        "doctor: one or more readiness checks failed".to_string()
    };

    DoctorReport { overall_status, summary, checks }
}

fn check_llm_provider(config: &AppConfig) -> DoctorCheck {
    let resolved = ProviderRouter::from_config(&config.llm)
        .and_then(|router| router.resolve(AgentLlmProvider::System).map(|_| ()));

    match resolved {
        Ok(()) => DoctorCheck {
            name: "llm_provider",
            status: CheckStatus::Pass,
            details: format!("default provider `{}` is configured", config.llm.provider.as_str()),
        },
        Err(error) => DoctorCheck {
            name: "llm_provider",
            status: CheckStatus::Fail,
            details: format!("planning unavailable: {error}"),
        },
    }
}

fn check_capability_handlers(config: &AppConfig) -> DoctorCheck {
    let catalog = match catalog_from_config(config) {
        Ok(catalog) => catalog,
        Err(error) => {
            return DoctorCheck {
                name: "capability_handlers",
                status: CheckStatus::Fail,
                details: format!("capability catalog is invalid: {error}"),
            };
        }
    };

    let mut registry = HandlerRegistry::default();
    if let Err(error) = register_webhooks(config, &mut registry) {
        return DoctorCheck { name: "capability_handlers", status: CheckStatus::Fail, details: error.to_string() };
    }

    let report = registry.validate_catalog(&catalog);
    if report.is_complete() {
        return DoctorCheck {
            name: "capability_handlers",
            status: CheckStatus::Pass,
            details: format!("{} capability(ies), every target has a handler", catalog.len()),
        };
    }

    let missing = report
        .missing
        .iter()
        .map(|entry| format!("{} -> {}", entry.capability_code, entry.target))
        .collect::<Vec<_>>()
        .join(", ");
    DoctorCheck {
        name: "capability_handlers",
        status: CheckStatus::Fail,
        details: format!("missing handlers: {missing}"),
    }
}

fn check_database_connectivity(config: &AppConfig) -> DoctorCheck {
    let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(error) => {
            return DoctorCheck {
                name: "database_connectivity",
                status: CheckStatus::Fail,
                details: format!("failed to initialize async runtime: {error}"),
            };
        }
    };

    let result = runtime.block_on(async {
        let pool = connect_with_config(&config.database)
            .await
            .map_err(|error| format!("failed to connect to database: {error}"))?;
        let probe = sqlx::query_scalar::<_, i64>("SELECT 1")
            .fetch_one(&pool)
            .await
            .map_err(|error| format!("database query failed: {error}"));
        pool.close().await;
        probe.map(|_| ())
    });

    match result {
        Ok(()) => DoctorCheck {
            name: "database_connectivity",
            status: CheckStatus::Pass,
            details: format!("connected using `{}`", config.database.url),
        },
        Err(error) => {
            DoctorCheck { name: "database_connectivity", status: CheckStatus::Fail, details: error }
        }
    }
}

fn render_human(report: &DoctorReport) -> String {
    let mut lines = Vec::new();
    lines.push(report.summary.clone());

    for check in &report.checks {
        let marker = match check.status {
            CheckStatus::Pass => "ok",
            CheckStatus::Fail => "fail",
            CheckStatus::Skipped => "skip",
        };
        lines.push(format!("- [{marker}] {}: {}", check.name, check.details));
    }

    lines.join("\n")
}

fn escape_json(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}
