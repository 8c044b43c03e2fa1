//! Physician-bypass eligibility: a pure interpreter over an institution's
//! declarative rule set. Missing configuration always fails closed.

mod config;
mod rules;

pub use config::{
    ClinicalFlagsRule, ComparisonOperator, EligibilityConfig, FlagItem, RuleMode, TestRule,
    BYPASS_CONFIG_KEY,
};

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Scores and clinical flags submitted for a single evaluation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EvaluationInput {
    pub scores: BTreeMap<String, f64>,
    #[serde(default)]
    pub flags: BTreeMap<String, bool>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckOutcome {
    Passed,
    Failed,
    SkippedOptional,
    MissingRequired,
    UnsupportedOperator,
}

impl CheckOutcome {
    pub const fn passed(self) -> bool {
        matches!(self, Self::Passed | Self::SkippedOptional)
    }

    pub const fn label(self) -> &'static str {
        match self {
            Self::Passed => "passed",
            Self::Failed => "failed",
            Self::SkippedOptional => "skipped (optional, no score)",
            Self::MissingRequired => "missing required score",
            Self::UnsupportedOperator => "unsupported operator",
        }
    }
}

/// Result of one configured threshold comparison.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestCheck {
    pub code: String,
    pub operator: String,
    pub threshold: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
    pub optional: bool,
    pub outcome: CheckOutcome,
}

/// Full evaluation trail, so callers can explain a suggestion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BypassAssessment {
    pub eligible: bool,
    pub configured: bool,
    pub rule_mode: RuleMode,
    pub tests_pass: bool,
    pub flags_clear: bool,
    pub checks: Vec<TestCheck>,
}

impl BypassAssessment {
    fn unconfigured() -> Self {
        Self {
            eligible: false,
            configured: false,
            rule_mode: RuleMode::And,
            tests_pass: false,
            flags_clear: false,
            checks: Vec::new(),
        }
    }
}

/// Stateless evaluator; safe to share and call concurrently.
#[derive(Debug, Clone, Copy, Default)]
pub struct BypassEvaluator;

impl BypassEvaluator {
    pub fn new() -> Self {
        Self
    }

    pub fn evaluate(
        &self,
        scores: &BTreeMap<String, f64>,
        flags: &BTreeMap<String, bool>,
        config: Option<&EligibilityConfig>,
    ) -> bool {
        self.assess(scores, flags, config).eligible
    }

    pub fn assess(
        &self,
        scores: &BTreeMap<String, f64>,
        flags: &BTreeMap<String, bool>,
        config: Option<&EligibilityConfig>,
    ) -> BypassAssessment {
        let Some(config) = config else {
            return BypassAssessment::unconfigured();
        };

        let checks = rules::check_tests(scores, &config.tests);
        let tests_pass = checks.iter().all(|check| check.outcome.passed());
        let flags_clear = rules::flags_clear(flags, config.clinical_flags.as_ref());

        BypassAssessment {
            eligible: rules::combine(config.rule_mode, tests_pass, flags_clear),
            configured: true,
            rule_mode: config.rule_mode,
            tests_pass,
            flags_clear,
            checks,
        }
    }
}

/// Convenience wrapper over [`BypassEvaluator::evaluate`].
pub fn evaluate(
    scores: &BTreeMap<String, f64>,
    flags: &BTreeMap<String, bool>,
    config: Option<&EligibilityConfig>,
) -> bool {
    BypassEvaluator.evaluate(scores, flags, config)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scores(entries: &[(&str, f64)]) -> BTreeMap<String, f64> {
        entries
            .iter()
            .map(|(code, value)| (code.to_string(), *value))
            .collect()
    }

    fn flags(entries: &[(&str, bool)]) -> BTreeMap<String, bool> {
        entries
            .iter()
            .map(|(code, value)| (code.to_string(), *value))
            .collect()
    }

    fn rule(code: &str, operator: &str, threshold: f64, optional: bool) -> TestRule {
        TestRule {
            code: code.to_string(),
            operator: ComparisonOperator::from(operator.to_string()),
            threshold,
            optional,
        }
    }

    fn two_test_config() -> EligibilityConfig {
        EligibilityConfig {
            rule_mode: RuleMode::And,
            tests: vec![rule("A", "<=", 40.0, false), rule("B", "<=", 19.0, true)],
            clinical_flags: None,
        }
    }

    #[test]
    fn optional_missing_score_does_not_block() {
        let config = two_test_config();
        assert!(evaluate(&scores(&[("A", 35.0)]), &flags(&[]), Some(&config)));
    }

    #[test]
    fn failing_required_threshold_blocks() {
        let config = two_test_config();
        assert!(!evaluate(&scores(&[("A", 45.0)]), &flags(&[]), Some(&config)));
    }

    #[test]
    fn missing_required_score_blocks() {
        let config = two_test_config();
        let assessment = BypassEvaluator.assess(&scores(&[("B", 10.0)]), &flags(&[]), Some(&config));
        assert!(!assessment.eligible);
        assert_eq!(assessment.checks[0].outcome, CheckOutcome::MissingRequired);
        assert_eq!(assessment.checks[1].outcome, CheckOutcome::Passed);
    }

    #[test]
    fn fails_closed_without_configuration() {
        let assessment = BypassEvaluator.assess(&scores(&[("A", 1.0)]), &flags(&[]), None);
        assert!(!assessment.eligible);
        assert!(!assessment.configured);
        assert!(!evaluate(&BTreeMap::new(), &BTreeMap::new(), None));
    }

    #[test]
    fn empty_rule_list_passes_vacuously() {
        let config = EligibilityConfig {
            rule_mode: RuleMode::And,
            tests: Vec::new(),
            clinical_flags: None,
        };
        assert!(evaluate(&BTreeMap::new(), &BTreeMap::new(), Some(&config)));
    }

    #[test]
    fn operators_compare_against_threshold() {
        let config = EligibilityConfig {
            rule_mode: RuleMode::And,
            tests: vec![
                rule("LT", "<", 10.0, false),
                rule("GE", ">=", 5.0, false),
                rule("GT", ">", 5.0, false),
            ],
            clinical_flags: None,
        };
        assert!(evaluate(
            &scores(&[("LT", 9.5), ("GE", 5.0), ("GT", 5.5)]),
            &flags(&[]),
            Some(&config)
        ));
        assert!(!evaluate(
            &scores(&[("LT", 10.0), ("GE", 5.0), ("GT", 5.5)]),
            &flags(&[]),
            Some(&config)
        ));
        assert!(!evaluate(
            &scores(&[("LT", 1.0), ("GE", 5.0), ("GT", 5.0)]),
            &flags(&[]),
            Some(&config)
        ));
    }

    #[test]
    fn unsupported_operator_fails_its_entry() {
        let config = EligibilityConfig {
            rule_mode: RuleMode::And,
            tests: vec![rule("A", "==", 10.0, false)],
            clinical_flags: None,
        };
        let assessment = BypassEvaluator.assess(&scores(&[("A", 10.0)]), &flags(&[]), Some(&config));
        assert!(!assessment.eligible);
        assert_eq!(assessment.checks[0].outcome, CheckOutcome::UnsupportedOperator);
        assert_eq!(assessment.checks[0].operator, "==");
    }

    #[test]
    fn require_none_rejects_any_raised_flag() {
        let mut config = two_test_config();
        config.clinical_flags = Some(ClinicalFlagsRule {
            require_none: true,
            items: Vec::new(),
        });

        let input = scores(&[("A", 20.0)]);
        assert!(evaluate(&input, &flags(&[("X", false)]), Some(&config)));
        assert!(!evaluate(&input, &flags(&[("X", false), ("Y", true)]), Some(&config)));
    }

    #[test]
    fn listed_items_only_consider_their_codes() {
        let mut config = two_test_config();
        config.clinical_flags = Some(ClinicalFlagsRule {
            require_none: false,
            items: vec![FlagItem {
                code: "SUICIDE_RISK".to_string(),
                label: Some("Suicide risk".to_string()),
                kind: None,
            }],
        });

        let input = scores(&[("A", 20.0)]);
        assert!(evaluate(&input, &flags(&[("OTHER", true)]), Some(&config)));
        assert!(!evaluate(&input, &flags(&[("SUICIDE_RISK", true)]), Some(&config)));
    }

    #[test]
    fn or_mode_accepts_either_group() {
        let mut config = two_test_config();
        config.rule_mode = RuleMode::Or;
        config.clinical_flags = Some(ClinicalFlagsRule {
            require_none: true,
            items: Vec::new(),
        });

        let failing_scores = scores(&[("A", 80.0)]);
        assert!(evaluate(&failing_scores, &flags(&[]), Some(&config)));
        assert!(!evaluate(&failing_scores, &flags(&[("X", true)]), Some(&config)));
        assert!(evaluate(&scores(&[("A", 10.0)]), &flags(&[("X", true)]), Some(&config)));
    }

    #[test]
    fn evaluation_is_pure_and_repeatable() {
        let config = two_test_config();
        let input_scores = scores(&[("A", 35.0), ("B", 25.0)]);
        let input_flags = flags(&[("X", true)]);
        let snapshot = (input_scores.clone(), input_flags.clone(), config.clone());

        let first = BypassEvaluator.assess(&input_scores, &input_flags, Some(&config));
        let second = BypassEvaluator.assess(&input_scores, &input_flags, Some(&config));

        assert_eq!(first, second);
        assert!(!first.eligible);
        assert_eq!(snapshot, (input_scores, input_flags, config));
    }
}
