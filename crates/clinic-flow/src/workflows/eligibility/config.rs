use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

/// Key of the bypass rule set inside an institution's enabled-tests bundle.
pub const BYPASS_CONFIG_KEY: &str = "config_bypass";

/// How the test group and the clinical-flag group are combined.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum RuleMode {
    #[default]
    And,
    Or,
}

impl RuleMode {
    pub const fn label(self) -> &'static str {
        match self {
            Self::And => "AND",
            Self::Or => "OR",
        }
    }
}

impl From<String> for RuleMode {
    fn from(value: String) -> Self {
        // Only the exact token switches to OR; everything else combines with AND.
        if value == "OR" {
            Self::Or
        } else {
            Self::And
        }
    }
}

impl From<RuleMode> for String {
    fn from(value: RuleMode) -> Self {
        value.label().to_string()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ComparisonOperator {
    AtMost,
    Below,
    AtLeast,
    Above,
    Unsupported(String),
}

impl ComparisonOperator {
    pub fn symbol(&self) -> &str {
        match self {
            Self::AtMost => "<=",
            Self::Below => "<",
            Self::AtLeast => ">=",
            Self::Above => ">",
            Self::Unsupported(raw) => raw,
        }
    }

    /// `None` when the operator is not one of the four supported comparisons.
    pub fn compare(&self, score: f64, threshold: f64) -> Option<bool> {
        match self {
            Self::AtMost => Some(score <= threshold),
            Self::Below => Some(score < threshold),
            Self::AtLeast => Some(score >= threshold),
            Self::Above => Some(score > threshold),
            Self::Unsupported(_) => None,
        }
    }
}

impl From<String> for ComparisonOperator {
    fn from(value: String) -> Self {
        match value.as_str() {
            "<=" => Self::AtMost,
            "<" => Self::Below,
            ">=" => Self::AtLeast,
            ">" => Self::Above,
            _ => Self::Unsupported(value),
        }
    }
}

impl From<ComparisonOperator> for String {
    fn from(value: ComparisonOperator) -> Self {
        value.symbol().to_string()
    }
}

/// Threshold comparison against a single test score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestRule {
    pub code: String,
    pub operator: ComparisonOperator,
    pub threshold: f64,
    #[serde(default)]
    pub optional: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlagItem {
    pub code: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClinicalFlagsRule {
    #[serde(default, alias = "requireNone")]
    pub require_none: bool,
    #[serde(default)]
    pub items: Vec<FlagItem>,
}

/// Declarative bypass rule set owned by an institution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EligibilityConfig {
    #[serde(default, alias = "ruleMode")]
    pub rule_mode: RuleMode,
    pub tests: Vec<TestRule>,
    #[serde(
        default,
        alias = "clinicalFlags",
        skip_serializing_if = "Option::is_none"
    )]
    pub clinical_flags: Option<ClinicalFlagsRule>,
}

impl EligibilityConfig {
    /// Parses a rule set, failing closed: malformed input yields `None`.
    pub fn from_value(value: &Value) -> Option<Self> {
        match serde_json::from_value::<Self>(value.clone()) {
            Ok(config) => Some(config),
            Err(error) => {
                warn!(%error, "ignoring malformed bypass configuration");
                None
            }
        }
    }

    /// Looks up and parses the bypass entry of an enabled-tests bundle.
    pub fn from_enabled_tests(bundle: &Value) -> Option<Self> {
        bundle.get(BYPASS_CONFIG_KEY).and_then(Self::from_value)
    }

    /// Rule set seeded for new institutions.
    pub fn standard() -> Self {
        Self {
            rule_mode: RuleMode::And,
            tests: vec![
                TestRule {
                    code: "DASS21_TOTAL".to_string(),
                    operator: ComparisonOperator::AtMost,
                    threshold: 40.0,
                    optional: false,
                },
                TestRule {
                    code: "PSS10_TOTAL".to_string(),
                    operator: ComparisonOperator::AtMost,
                    threshold: 19.0,
                    optional: false,
                },
                TestRule {
                    code: "STAI_STATE".to_string(),
                    operator: ComparisonOperator::AtMost,
                    threshold: 39.0,
                    optional: true,
                },
            ],
            clinical_flags: None,
        }
    }
}
