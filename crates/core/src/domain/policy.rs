use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Governance thresholds read by the approval gate at evaluation time.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Policy {
    pub name: String,
    pub require_approval_high_risk: bool,
    pub require_approval_over_amount: bool,
    pub amount_limit: Decimal,
    pub forbid_delete: bool,
}

impl Default for Policy {
    fn default() -> Self {
        Self {
            name: "default".to_string(),
            require_approval_high_risk: true,
            require_approval_over_amount: true,
            amount_limit: Decimal::new(500, 0),
            forbid_delete: true,
        }
    }
}

impl Policy {
    /// A policy that never gates anything. Useful for sandbox tenants and tests.
    pub fn permissive(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            require_approval_high_risk: false,
            require_approval_over_amount: false,
            amount_limit: Decimal::ZERO,
            forbid_delete: false,
        }
    }

    pub fn exceeds_amount_limit(&self, amount: Decimal) -> bool {
        self.require_approval_over_amount && amount > self.amount_limit
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal::Decimal;

    use super::Policy;

    #[test]
    fn default_policy_gates_amounts_above_limit_only() {
        let policy = Policy::default();

        assert!(!policy.exceeds_amount_limit(Decimal::new(500, 0)));
        assert!(policy.exceeds_amount_limit(Decimal::new(50001, 2)));
    }

    #[test]
    fn permissive_policy_never_gates_amounts() {
        let policy = Policy::permissive("sandbox");

        assert!(!policy.exceeds_amount_limit(Decimal::new(1_000_000, 0)));
        assert!(!policy.forbid_delete);
    }
}
