//! Approval gate.
//!
//! Validates a candidate plan against the capability catalog and the executing
//! agent's allow-list, then folds every step into a single approval decision.
//! The fold is monotonic: one gated step anywhere gates the whole plan.

use std::str::FromStr;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::catalog::{destructive_signal, CapabilityCatalog, CatalogError, DestructiveSignal};
use crate::domain::agent::{Agent, AgentId};
use crate::domain::capability::CapabilityCode;
use crate::domain::task::{ApprovalFinding, ApprovalReason, PlannedAction};

/// Param keys inspected for the policy amount limit.
pub const AMOUNT_KEYS: &[&str] = &["amount", "amount_total"];

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum PlanValidationError {
    #[error("action {sequence}: capability `{code}` is not registered")]
    UnknownCapability { sequence: u32, code: CapabilityCode },
    #[error("action {sequence}: capability `{code}` is inactive")]
    InactiveCapability { sequence: u32, code: CapabilityCode },
    #[error("action {sequence}: capability `{code}` is not allowed for agent `{agent_id}`")]
    CapabilityNotAllowed { sequence: u32, code: CapabilityCode, agent_id: AgentId },
    #[error("action {sequence}: params for `{code}` must be a JSON object")]
    InvalidParams { sequence: u32, code: CapabilityCode },
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GateDecision {
    pub approval_required: bool,
    pub destructive_found: bool,
    pub findings: Vec<ApprovalFinding>,
}

#[derive(Clone, Debug, Default)]
pub struct ApprovalGate;

impl ApprovalGate {
    pub fn new() -> Self {
        Self
    }

    pub fn evaluate(
        &self,
        plan: &[PlannedAction],
        agent: &Agent,
        catalog: &CapabilityCatalog,
    ) -> Result<GateDecision, PlanValidationError> {
        let policy = &agent.policy;
        let mut decision = GateDecision::default();

        for action in plan {
            let capability = catalog.resolve(&action.capability_code).map_err(|error| {
                match error {
                    CatalogError::Inactive(code) => {
                        PlanValidationError::InactiveCapability { sequence: action.sequence, code }
                    }
                    CatalogError::NotFound(code) | CatalogError::Duplicate(code) => {
                        PlanValidationError::UnknownCapability { sequence: action.sequence, code }
                    }
                }
            })?;

            if !agent.allows(&capability.code) {
                return Err(PlanValidationError::CapabilityNotAllowed {
                    sequence: action.sequence,
                    code: capability.code.clone(),
                    agent_id: agent.id.clone(),
                });
            }

            if !action.params.is_object() {
                return Err(PlanValidationError::InvalidParams {
                    sequence: action.sequence,
                    code: capability.code.clone(),
                });
            }

            if let Some(signal) = destructive_signal(capability) {
                decision.destructive_found = true;
                let reason = match signal {
                    DestructiveSignal::Explicit => ApprovalReason::ExplicitDestructive,
                    DestructiveSignal::Verb(verb) => {
                        ApprovalReason::DestructiveVerb { verb: verb.to_string() }
                    }
                };
                decision.findings.push(finding(action, reason));
            }

            if capability.requires_approval && policy.require_approval_high_risk {
                decision.approval_required = true;
                decision.findings.push(finding(action, ApprovalReason::HighRiskApproval));
            }

            if let Some(amount) = requested_amount(&action.params) {
                if policy.exceeds_amount_limit(amount) {
                    decision.approval_required = true;
                    decision.findings.push(finding(
                        action,
                        ApprovalReason::AmountOverLimit { amount, limit: policy.amount_limit },
                    ));
                }
            }

            // An amount the gate cannot compare is treated as over the limit.
            if policy.require_approval_over_amount {
                if let Some(value) = unreadable_amount(&action.params) {
                    decision.approval_required = true;
                    decision.findings.push(finding(action, ApprovalReason::AmountUnreadable { value }));
                }
            }
        }

        if policy.forbid_delete && decision.destructive_found {
            decision.approval_required = true;
        }

        Ok(decision)
    }
}

fn finding(action: &PlannedAction, reason: ApprovalReason) -> ApprovalFinding {
    ApprovalFinding { sequence: action.sequence, capability_code: action.capability_code.clone(), reason }
}

/// Largest monetary amount declared in the params, if any.
pub fn requested_amount(params: &Value) -> Option<Decimal> {
    declared_amounts(params).filter_map(Result::ok).max()
}

/// Raw text of the first amount key whose value is present but not a
/// representable decimal (thousands separators, currency symbols, overflow).
pub fn unreadable_amount(params: &Value) -> Option<String> {
    declared_amounts(params).find_map(Result::err)
}

fn declared_amounts(params: &Value) -> impl Iterator<Item = Result<Decimal, String>> + '_ {
    AMOUNT_KEYS.iter().filter_map(move |key| params.get(*key)).filter_map(read_amount)
}

fn read_amount(value: &Value) -> Option<Result<Decimal, String>> {
    let raw = match value {
        Value::Null => return None,
        Value::Number(number) => number.to_string(),
        Value::String(text) => text.trim().to_string(),
        other => return Some(Err(other.to_string())),
    };

    let parsed = Decimal::from_str(&raw).or_else(|_| Decimal::from_scientific(&raw));
    Some(parsed.map_err(|_| raw))
}

#[cfg(test)]
mod tests {
    use rust_decimal::Decimal;
    use serde_json::json;

    use super::{requested_amount, unreadable_amount, ApprovalGate, PlanValidationError};
    use crate::catalog::CapabilityCatalog;
    use crate::domain::agent::Agent;
    use crate::domain::capability::{Capability, CapabilityCode, RiskLevel};
    use crate::domain::policy::Policy;
    use crate::domain::task::{ApprovalReason, PlannedAction};

    fn catalog() -> CapabilityCatalog {
        CapabilityCatalog::new(vec![
            Capability::new("crm.lookup_partner", "crm_lookup", RiskLevel::Low, false),
            Capability::new("sales.create_order", "sale_order_create", RiskLevel::High, true),
            Capability::new("crm.remove_tag", "crm_tags", RiskLevel::Low, false),
            Capability::new("crm.merge_partner", "crm_merge", RiskLevel::Medium, false)
                .flagged_destructive(),
        ])
        .expect("catalog builds")
    }

    fn agent(policy: Policy) -> Agent {
        Agent::new("sales-bot", "acme", "svc-sales")
            .with_capabilities([
                "crm.lookup_partner",
                "sales.create_order",
                "crm.remove_tag",
                "crm.merge_partner",
            ])
            .with_policy(policy)
    }

    fn step(sequence: u32, code: &str) -> PlannedAction {
        PlannedAction::pending(sequence, CapabilityCode::new(code), json!({}), "")
    }

    #[test]
    fn low_risk_plan_needs_no_approval() {
        let decision = ApprovalGate::new()
            .evaluate(&[step(1, "crm.lookup_partner")], &agent(Policy::default()), &catalog())
            .expect("valid plan");

        assert!(!decision.approval_required);
        assert!(!decision.destructive_found);
        assert!(decision.findings.is_empty());
    }

    #[test]
    fn a_single_gated_step_gates_the_whole_plan_at_any_position() {
        let gate = ApprovalGate::new();
        let agent = agent(Policy::default());
        let catalog = catalog();

        for position in 0..3 {
            let mut plan = vec![
                step(1, "crm.lookup_partner"),
                step(2, "crm.lookup_partner"),
                step(3, "crm.lookup_partner"),
            ];
            plan[position].capability_code = CapabilityCode::new("sales.create_order");

            let decision = gate.evaluate(&plan, &agent, &catalog).expect("valid plan");
            assert!(decision.approval_required, "gated step at index {position}");
        }
    }

    #[test]
    fn requires_approval_is_ignored_when_policy_does_not_gate_high_risk() {
        let policy = Policy { require_approval_high_risk: false, ..Policy::default() };

        let decision = ApprovalGate::new()
            .evaluate(&[step(1, "sales.create_order")], &agent(policy), &catalog())
            .expect("valid plan");

        assert!(!decision.approval_required);
    }

    #[test]
    fn destructive_steps_gate_only_when_policy_forbids_delete() {
        let gate = ApprovalGate::new();
        let plan = [step(1, "crm.remove_tag")];

        let strict = gate.evaluate(&plan, &agent(Policy::default()), &catalog()).expect("valid");
        assert!(strict.destructive_found);
        assert!(strict.approval_required);

        let lenient = Policy { forbid_delete: false, ..Policy::default() };
        let relaxed = gate.evaluate(&plan, &agent(lenient), &catalog()).expect("valid");
        assert!(relaxed.destructive_found);
        assert!(!relaxed.approval_required);
    }

    #[test]
    fn heuristic_and_explicit_destructive_findings_are_distinguished() {
        let decision = ApprovalGate::new()
            .evaluate(
                &[step(1, "crm.remove_tag"), step(2, "crm.merge_partner")],
                &agent(Policy::default()),
                &catalog(),
            )
            .expect("valid plan");

        assert_eq!(
            decision.findings[0].reason,
            ApprovalReason::DestructiveVerb { verb: "remove".to_string() }
        );
        assert_eq!(decision.findings[1].reason, ApprovalReason::ExplicitDestructive);
    }

    #[test]
    fn amounts_over_the_policy_limit_require_approval() {
        let plan = [PlannedAction::pending(
            1,
            CapabilityCode::new("crm.lookup_partner"),
            json!({"amount": 750.5}),
            "",
        )];

        let decision = ApprovalGate::new()
            .evaluate(&plan, &agent(Policy::default()), &catalog())
            .expect("valid plan");

        assert!(decision.approval_required);
        assert!(matches!(
            decision.findings[0].reason,
            ApprovalReason::AmountOverLimit { amount, .. } if amount == Decimal::new(7505, 1)
        ));
    }

    #[test]
    fn capability_outside_allow_list_fails_validation() {
        let agent = Agent::new("sales-bot", "acme", "svc-sales")
            .with_capabilities(["crm.lookup_partner"]);

        let result = ApprovalGate::new().evaluate(
            &[step(1, "crm.lookup_partner"), step(2, "sales.create_order")],
            &agent,
            &catalog(),
        );

        assert!(matches!(
            result,
            Err(PlanValidationError::CapabilityNotAllowed { sequence: 2, .. })
        ));
    }

    #[test]
    fn unknown_capability_fails_validation() {
        let result = ApprovalGate::new().evaluate(
            &[step(1, "crm.teleport_partner")],
            &agent(Policy::default()),
            &catalog(),
        );

        assert!(matches!(result, Err(PlanValidationError::UnknownCapability { sequence: 1, .. })));
    }

    #[test]
    fn non_object_params_fail_validation() {
        let plan = [PlannedAction::pending(
            1,
            CapabilityCode::new("crm.lookup_partner"),
            json!(["not", "an", "object"]),
            "",
        )];

        let result = ApprovalGate::new().evaluate(&plan, &agent(Policy::default()), &catalog());

        assert!(matches!(result, Err(PlanValidationError::InvalidParams { .. })));
    }

    #[test]
    fn requested_amount_reads_numbers_and_decimal_strings() {
        assert_eq!(requested_amount(&json!({"amount": 12})), Some(Decimal::new(12, 0)));
        assert_eq!(
            requested_amount(&json!({"amount_total": "99.90"})),
            Some(Decimal::new(9990, 2))
        );
        assert_eq!(requested_amount(&json!({"amount": "2.5e3"})), Some(Decimal::new(2500, 0)));
        assert_eq!(requested_amount(&json!({"qty": 3})), None);
        assert_eq!(requested_amount(&json!({"amount": null})), None);
    }

    #[test]
    fn unreadable_amounts_are_reported_with_their_raw_text() {
        assert_eq!(unreadable_amount(&json!({"amount": "1,500.00"})), Some("1,500.00".to_string()));
        assert_eq!(unreadable_amount(&json!({"amount_total": "R$ 9000"})), Some("R$ 9000".to_string()));
        assert_eq!(unreadable_amount(&json!({"amount": 1e30})), Some("1e30".to_string()));
        assert_eq!(unreadable_amount(&json!({"amount": true})), Some("true".to_string()));
        assert_eq!(unreadable_amount(&json!({"amount": "120.00"})), None);
        assert_eq!(unreadable_amount(&json!({"amount": null})), None);
    }

    #[test]
    fn unreadable_amounts_require_approval() {
        let gate = ApprovalGate::new();

        for raw in [json!("1,500.00"), json!("R$ 9000"), json!(1e30)] {
            let plan = [PlannedAction::pending(
                1,
                CapabilityCode::new("crm.lookup_partner"),
                json!({"amount": raw}),
                "",
            )];

            let decision =
                gate.evaluate(&plan, &agent(Policy::default()), &catalog()).expect("valid plan");

            assert!(decision.approval_required, "amount {raw} must gate the plan");
            assert!(matches!(
                &decision.findings[0].reason,
                ApprovalReason::AmountUnreadable { .. }
            ));
        }
    }

    #[test]
    fn unreadable_amounts_pass_when_policy_ignores_amounts() {
        let policy = Policy { require_approval_over_amount: false, ..Policy::default() };
        let plan = [PlannedAction::pending(
            1,
            CapabilityCode::new("crm.lookup_partner"),
            json!({"amount": "1,500.00"}),
            "",
        )];

        let decision =
            ApprovalGate::new().evaluate(&plan, &agent(policy), &catalog()).expect("valid plan");

        assert!(!decision.approval_required);
        assert!(decision.findings.is_empty());
    }
}
