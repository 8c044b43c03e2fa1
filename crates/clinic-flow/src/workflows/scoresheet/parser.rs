use super::normalizer::normalize_code;
use serde::{Deserialize, Deserializer};
use std::io::Read;

#[derive(Debug)]
pub(crate) struct ScoreRecord {
    pub(crate) row: usize,
    pub(crate) code: String,
    pub(crate) raw_score: String,
}

/// Reads `Code,Score` rows. Rows with a blank code or score are dropped.
pub(crate) fn parse_records<R: Read>(mut reader: R) -> Result<Vec<ScoreRecord>, csv::Error> {
    let mut text = String::new();
    reader.read_to_string(&mut text)?;

    let mut csv_reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_reader(text.as_bytes());
    let headers = csv_reader.headers()?.clone();
    let mut raw = csv::StringRecord::new();
    let mut records = Vec::new();

    while csv_reader.read_record(&mut raw)? {
        let line = raw
            .position()
            .map_or(0, |position| line_at(&text, position.byte() as usize));
        let row: ScoreRow = raw.deserialize(Some(&headers))?;
        let (Some(code), Some(raw_score)) = (row.code, row.score) else {
            continue;
        };

        records.push(ScoreRecord {
            row: line,
            code: normalize_code(&code),
            raw_score,
        });
    }

    Ok(records)
}

/// Line number of the record starting at `offset`. The reader positions a
/// record before any blank lines it skips, so those are stepped over first.
fn line_at(text: &str, offset: usize) -> usize {
    let bytes = text.as_bytes();
    let offset = offset.min(bytes.len());
    let start = bytes[offset..]
        .iter()
        .position(|byte| !matches!(byte, b'\r' | b'\n'))
        .map_or(bytes.len(), |skipped| offset + skipped);
    bytes[..start].iter().filter(|byte| **byte == b'\n').count() + 1
}

#[derive(Debug, Deserialize)]
struct ScoreRow {
    #[serde(
        rename = "Code",
        alias = "code",
        alias = "\u{feff}Code",
        default,
        deserialize_with = "empty_string_as_none"
    )]
    code: Option<String>,
    #[serde(
        rename = "Score",
        alias = "score",
        default,
        deserialize_with = "empty_string_as_none"
    )]
    score: Option<String>,
}

fn empty_string_as_none<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let opt = Option::<String>::deserialize(deserializer)?;
    Ok(opt.filter(|value| !value.trim().is_empty()))
}

pub(crate) fn parse_score(value: &str) -> Option<f64> {
    value
        .trim()
        .parse::<f64>()
        .ok()
        .filter(|score| score.is_finite())
}
