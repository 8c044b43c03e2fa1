//! Imports psychometric score sheets exported as `Code,Score` CSV files.

mod normalizer;
mod parser;

use std::collections::BTreeMap;
use std::io::Read;
use std::path::Path;

use tracing::debug;

use crate::workflows::eligibility::EvaluationInput;

#[derive(Debug)]
pub enum ScoreSheetImportError {
    Io(std::io::Error),
    Csv(csv::Error),
    InvalidScore {
        row: usize,
        code: String,
        value: String,
    },
}

impl std::fmt::Display for ScoreSheetImportError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ScoreSheetImportError::Io(err) => write!(f, "failed to read score sheet: {}", err),
            ScoreSheetImportError::Csv(err) => write!(f, "invalid score sheet CSV data: {}", err),
            ScoreSheetImportError::InvalidScore { row, code, value } => write!(
                f,
                "row {}: score '{}' for {} is not a number",
                row, value, code
            ),
        }
    }
}

impl std::error::Error for ScoreSheetImportError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ScoreSheetImportError::Io(err) => Some(err),
            ScoreSheetImportError::Csv(err) => Some(err),
            ScoreSheetImportError::InvalidScore { .. } => None,
        }
    }
}

impl From<std::io::Error> for ScoreSheetImportError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err)
    }
}

impl From<csv::Error> for ScoreSheetImportError {
    fn from(err: csv::Error) -> Self {
        Self::Csv(err)
    }
}

pub struct ScoreSheetImporter;

impl ScoreSheetImporter {
    pub fn from_path<P: AsRef<Path>>(
        path: P,
    ) -> Result<BTreeMap<String, f64>, ScoreSheetImportError> {
        let file = std::fs::File::open(path)?;
        Self::from_reader(file)
    }

    /// The first occurrence of a code wins; later duplicates are ignored.
    pub fn from_reader<R: Read>(reader: R) -> Result<BTreeMap<String, f64>, ScoreSheetImportError> {
        let mut scores = BTreeMap::new();

        for record in parser::parse_records(reader)? {
            if scores.contains_key(&record.code) {
                debug!(code = %record.code, row = record.row, "duplicate score ignored");
                continue;
            }

            let score = parser::parse_score(&record.raw_score).ok_or_else(|| {
                ScoreSheetImportError::InvalidScore {
                    row: record.row,
                    code: record.code.clone(),
                    value: record.raw_score.clone(),
                }
            })?;
            scores.insert(record.code, score);
        }

        Ok(scores)
    }

    /// Score sheet plus caller-provided clinical flags, ready for evaluation.
    pub fn evaluation_input<P: AsRef<Path>>(
        path: P,
        flags: BTreeMap<String, bool>,
    ) -> Result<EvaluationInput, ScoreSheetImportError> {
        Ok(EvaluationInput {
            scores: Self::from_path(path)?,
            flags,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn normalize_code_joins_words_and_uppercases() {
        assert_eq!(
            normalizer::normalize_for_tests("\u{feff}dass21  total"),
            "DASS21_TOTAL"
        );
        assert_eq!(normalizer::normalize_for_tests("pss10_\u{200b}total"), "PSS10_TOTAL");
    }

    #[test]
    fn importer_reads_scores_and_skips_blank_rows() {
        let csv = "Code,Score\nDASS21 total,35\nPSS10_TOTAL, 15.5 \n,12\nSTAI_STATE,\n";
        let scores = ScoreSheetImporter::from_reader(Cursor::new(csv)).expect("import succeeds");

        assert_eq!(scores.len(), 2);
        assert_eq!(scores.get("DASS21_TOTAL"), Some(&35.0));
        assert_eq!(scores.get("PSS10_TOTAL"), Some(&15.5));
    }

    #[test]
    fn importer_keeps_first_duplicate() {
        let csv = "code,score\nDASS21_TOTAL,30\ndass21_total,50\n";
        let scores = ScoreSheetImporter::from_reader(Cursor::new(csv)).expect("import succeeds");

        assert_eq!(scores.get("DASS21_TOTAL"), Some(&30.0));
    }

    #[test]
    fn importer_rejects_unparsable_scores() {
        let csv = "Code,Score\nDASS21_TOTAL,35\nPSS10_TOTAL,high\n";
        match ScoreSheetImporter::from_reader(Cursor::new(csv)) {
            Err(ScoreSheetImportError::InvalidScore { row, code, value }) => {
                assert_eq!(row, 3);
                assert_eq!(code, "PSS10_TOTAL");
                assert_eq!(value, "high");
            }
            other => panic!("expected invalid score, got {other:?}"),
        }
    }

    #[test]
    fn invalid_score_row_counts_blank_lines() {
        let csv = "Code,Score\nDASS21_TOTAL,35\n\n\nPSS10_TOTAL,n/a\n";
        match ScoreSheetImporter::from_reader(Cursor::new(csv)) {
            Err(ScoreSheetImportError::InvalidScore { row, code, .. }) => {
                assert_eq!(row, 5);
                assert_eq!(code, "PSS10_TOTAL");
            }
            other => panic!("expected invalid score, got {other:?}"),
        }
    }

    #[test]
    fn importer_from_path_propagates_io_errors() {
        let error = ScoreSheetImporter::from_path("./does-not-exist.csv")
            .expect_err("expected io error");

        match error {
            ScoreSheetImportError::Io(_) => {}
            other => panic!("expected io error, got {other:?}"),
        }
    }
}
