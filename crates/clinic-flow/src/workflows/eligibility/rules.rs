use std::collections::BTreeMap;

use super::config::{ClinicalFlagsRule, RuleMode, TestRule};
use super::{CheckOutcome, TestCheck};

pub(crate) fn check_tests(scores: &BTreeMap<String, f64>, rules: &[TestRule]) -> Vec<TestCheck> {
    rules
        .iter()
        .map(|rule| {
            let score = scores.get(&rule.code).copied();
            let outcome = match score {
                None if rule.optional => CheckOutcome::SkippedOptional,
                None => CheckOutcome::MissingRequired,
                Some(value) => match rule.operator.compare(value, rule.threshold) {
                    Some(true) => CheckOutcome::Passed,
                    Some(false) => CheckOutcome::Failed,
                    None => CheckOutcome::UnsupportedOperator,
                },
            };

            TestCheck {
                code: rule.code.clone(),
                operator: rule.operator.symbol().to_string(),
                threshold: rule.threshold,
                score,
                optional: rule.optional,
                outcome,
            }
        })
        .collect()
}

pub(crate) fn flags_clear(flags: &BTreeMap<String, bool>, rule: Option<&ClinicalFlagsRule>) -> bool {
    match rule {
        None => true,
        Some(rule) if rule.require_none => flags.values().all(|raised| !raised),
        Some(rule) => rule
            .items
            .iter()
            .all(|item| !flags.get(&item.code).copied().unwrap_or(false)),
    }
}

pub(crate) fn combine(mode: RuleMode, tests_pass: bool, flags_clear: bool) -> bool {
    match mode {
        RuleMode::Or => tests_pass || flags_clear,
        RuleMode::And => tests_pass && flags_clear,
    }
}
