use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CapabilityCode(pub String);

impl CapabilityCode {
    pub fn new(code: impl Into<String>) -> Self {
        Self(code.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CapabilityCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Name of the handler a capability dispatches to. Resolved by the handler registry.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HandlerTarget(pub String);

impl HandlerTarget {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for HandlerTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

impl RiskLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "low" => Some(Self::Low),
            "medium" => Some(Self::Medium),
            "high" => Some(Self::High),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capability {
    pub code: CapabilityCode,
    pub name: String,
    pub target: HandlerTarget,
    pub description: Option<String>,
    pub risk_level: RiskLevel,
    pub requires_approval: bool,
    /// Explicit tag. The catalog still runs the verb heuristic when this is false.
    pub destructive: bool,
    pub active: bool,
    pub sample_params: Option<serde_json::Value>,
}

impl Capability {
    pub fn new(
        code: impl Into<String>,
        target: impl Into<String>,
        risk_level: RiskLevel,
        requires_approval: bool,
    ) -> Self {
        let code = code.into();
        Self {
            name: code.clone(),
            code: CapabilityCode(code),
            target: HandlerTarget(target.into()),
            description: None,
            risk_level,
            requires_approval,
            destructive: false,
            active: true,
            sample_params: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn flagged_destructive(mut self) -> Self {
        self.destructive = true;
        self
    }

    pub fn inactive(mut self) -> Self {
        self.active = false;
        self
    }
}
