use clap::Args;
use clinic_flow::error::AppError;
use clinic_flow::workflows::eligibility::{
    BypassAssessment, BypassEvaluator, EligibilityConfig, BYPASS_CONFIG_KEY,
};
use clinic_flow::workflows::scoresheet::ScoreSheetImporter;
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

#[derive(Args, Debug)]
pub(crate) struct BypassEvaluateArgs {
    /// Score sheet CSV with `Code,Score` columns
    #[arg(long)]
    pub(crate) scores: PathBuf,
    /// JSON rule set, or an enabled-tests bundle holding `config_bypass`.
    /// The standard rules apply when omitted.
    #[arg(long)]
    pub(crate) rules: Option<PathBuf>,
    /// Clinical flag observed for the patient (repeatable)
    #[arg(long = "flag")]
    pub(crate) flags: Vec<String>,
    /// Print the full assessment as JSON
    #[arg(long)]
    pub(crate) json: bool,
}

pub(crate) fn run_bypass_evaluation(args: BypassEvaluateArgs) -> Result<(), AppError> {
    let BypassEvaluateArgs {
        scores,
        rules,
        flags,
        json,
    } = args;

    let config = match rules {
        Some(path) => load_rules(&path)?,
        None => Some(EligibilityConfig::standard()),
    };
    let flags: BTreeMap<String, bool> = flags.into_iter().map(|code| (code, true)).collect();
    let input = ScoreSheetImporter::evaluation_input(&scores, flags)?;

    let assessment = BypassEvaluator::new().assess(&input.scores, &input.flags, config.as_ref());
    if json {
        println!("{}", serde_json::to_string_pretty(&assessment)?);
    } else {
        render_assessment(&assessment, &scores);
    }

    Ok(())
}

/// Accepts either a bare rule set or the institution bundle that embeds it.
/// Malformed rules come back as `None`, which evaluates as not eligible.
pub(crate) fn load_rules(path: &Path) -> Result<Option<EligibilityConfig>, AppError> {
    let raw = std::fs::read_to_string(path)?;
    let value: Value = serde_json::from_str(&raw)?;

    if value.get(BYPASS_CONFIG_KEY).is_some() {
        Ok(EligibilityConfig::from_enabled_tests(&value))
    } else {
        Ok(EligibilityConfig::from_value(&value))
    }
}

fn render_assessment(assessment: &BypassAssessment, source: &Path) {
    println!("Bypass evaluation for {}", source.display());
    if !assessment.configured {
        println!("- No usable bypass rules; physician referral required");
        return;
    }

    println!("- Rule mode: {}", assessment.rule_mode.label());
    for check in &assessment.checks {
        let score = check
            .score
            .map(|score| score.to_string())
            .unwrap_or_else(|| "-".to_string());
        println!(
            "  - {} {} {}{}: score {} -> {}",
            check.code,
            check.operator,
            check.threshold,
            if check.optional { " (optional)" } else { "" },
            score,
            check.outcome.label()
        );
    }
    println!(
        "- Tests {} | clinical flags {}",
        if assessment.tests_pass { "pass" } else { "fail" },
        if assessment.flags_clear { "clear" } else { "present" }
    );
    println!(
        "- Verdict: {}",
        if assessment.eligible {
            "eligible to skip the physician consult"
        } else {
            "refer to physician"
        }
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch_file(name: &str, contents: &str) -> PathBuf {
        let path = std::env::temp_dir().join(format!(
            "clinic-flow-{}-{name}",
            std::process::id()
        ));
        std::fs::write(&path, contents).expect("scratch file written");
        path
    }

    #[test]
    fn load_rules_reads_bundle_or_bare_rule_set() {
        let bundle = scratch_file(
            "bundle.json",
            r#"{"active":["DASS-21"],"config_bypass":{"rule_mode":"OR","tests":[{"code":"DASS21_TOTAL","operator":"<=","threshold":40}]}}"#,
        );
        let rules = load_rules(&bundle).expect("readable").expect("parsed");
        assert_eq!(rules.rule_mode.label(), "OR");

        let bare = scratch_file(
            "bare.json",
            r#"{"tests":[{"code":"PSS10_TOTAL","operator":"<","threshold":20}]}"#,
        );
        let rules = load_rules(&bare).expect("readable").expect("parsed");
        assert_eq!(rules.tests[0].code, "PSS10_TOTAL");

        std::fs::remove_file(bundle).ok();
        std::fs::remove_file(bare).ok();
    }

    #[test]
    fn malformed_rules_fail_closed() {
        let path = scratch_file("broken.json", r#"{"rule_mode":"AND"}"#);
        assert!(load_rules(&path).expect("readable").is_none());
        std::fs::remove_file(path).ok();
    }

    #[test]
    fn evaluation_runs_against_score_sheet() {
        let scores = scratch_file("scores.csv", "Code,Score\nDASS21_TOTAL,35\nPSS10_TOTAL,15\n");
        let result = run_bypass_evaluation(BypassEvaluateArgs {
            scores: scores.clone(),
            rules: None,
            flags: Vec::new(),
            json: true,
        });
        assert!(result.is_ok());
        std::fs::remove_file(scores).ok();
    }
}
