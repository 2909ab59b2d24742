//! IRData record parsing.
//!
//! One `Record` wraps one scraped solution-submission document. Parsing only
//! rejects malformed JSON; every derived field is validated once, at
//! construction, and the per-field result is stored so that repeated access
//! re-yields the identical value or error without recomputation.

use std::fs;
use std::io::BufRead;
use std::path::Path;

use chrono::{DateTime, TimeZone, Utc};
use serde_json::{Map, Value as JsonValue};
use sha2::{Digest, Sha256};
use thiserror::Error;

/// Malformed input syntax, fatal for the one input line it came from.
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("malformed solution json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("solution document is not a json object")]
    NotAnObject,
    #[error("reading solution stream: {0}")]
    Io(#[from] std::io::Error),
}

/// A missing or malformed field on an otherwise well-formed record.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid record field `{field}` in {}: {reason}", filename.as_deref().unwrap_or("<unknown file>"))]
pub struct RecordFieldError {
    pub field: &'static str,
    pub filename: Option<String>,
    pub reason: String,
}

/// Whether the solution was scraped from a top-ranked or regular listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum SolutionType {
    Top,
    Regular,
}

impl SolutionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SolutionType::Top => "top",
            SolutionType::Regular => "regular",
        }
    }
}

/// One `ID:N` entry of a history string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryPair {
    pub id: String,
    pub moves: i64,
}

type Field<T> = Result<T, RecordFieldError>;

/// One scraped solution submission, with every derived field validated once.
#[derive(Debug, Clone)]
pub struct Record {
    filename: Field<String>,
    solution_type: Field<SolutionType>,
    solution_id: Field<i64>,
    puzzle_id: Field<i64>,
    history_string: Field<String>,
    history_pairs: Field<Vec<HistoryPair>>,
    history_id: Field<String>,
    history_hash: Field<String>,
    total_moves: Field<i64>,
    score: Field<f64>,
    timestamp: Field<DateTime<Utc>>,
    pdl_strings: Field<Vec<String>>,
}

impl Record {
    /// Parse one newline-delimited IRData document.
    ///
    /// Fails only on malformed JSON or a non-object document; field-level
    /// validation is deferred to the accessors.
    pub fn parse(line: &str) -> Result<Record, ParseError> {
        let value: JsonValue = serde_json::from_str(line)?;
        let JsonValue::Object(data) = value else {
            return Err(ParseError::NotAnObject);
        };
        Ok(Record::from_map(&data))
    }

    /// Load a single-record JSON file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Record, ParseError> {
        let text = fs::read_to_string(path)?;
        Record::parse(&text)
    }

    fn from_map(data: &Map<String, JsonValue>) -> Record {
        let filename = match data.get("FILEPATH").and_then(JsonValue::as_str) {
            Some(name) => Ok(name.to_string()),
            None => Err(RecordFieldError {
                field: "filename",
                filename: None,
                reason: "missing required key FILEPATH".to_string(),
            }),
        };
        let known_filename = filename.as_ref().ok().cloned();
        let err = |field: &'static str, reason: String| RecordFieldError {
            field,
            filename: known_filename.clone(),
            reason,
        };

        let solution_type = filename.clone().and_then(|name| {
            if name.contains("/top/") {
                Ok(SolutionType::Top)
            } else if name.contains("/all/") {
                Ok(SolutionType::Regular)
            } else {
                Err(err(
                    "solution_type",
                    format!("path `{name}` is neither a /top/ nor an /all/ solution"),
                ))
            }
        });

        let solution_id = required_int(data, "SID", "solution_id", &err);
        let puzzle_id = required_int(data, "PID", "puzzle_id", &err);

        let history_string = required_str(data, "HISTORY", "history_string", &err);
        let history_pairs = history_string
            .clone()
            .and_then(|history| parse_history_pairs(&history, &err));
        let history_id = history_pairs.clone().and_then(|pairs| {
            pairs
                .last()
                .map(|pair| pair.id.clone())
                .ok_or_else(|| err("history_id", "history string is empty".to_string()))
        });
        let history_hash = history_string.clone().map(|history| sha256_hex(&history));
        let total_moves = history_pairs
            .clone()
            .map(|pairs| pairs.iter().map(|pair| pair.moves).sum());

        let score = required_str(data, "SCORE", "score", &err).and_then(|raw| {
            raw.parse::<f64>()
                .map_err(|_| err("score", format!("`{raw}` is not a number")))
        });

        let timestamp = required_int(data, "TIMESTAMP", "timestamp", &err).and_then(|secs| {
            Utc.timestamp_opt(secs, 0).single().ok_or_else(|| {
                err("timestamp", format!("epoch seconds {secs} out of range"))
            })
        });

        let pdl_strings = match data.get("PDL") {
            None => Err(err(
                "pdl_strings",
                "missing required key PDL".to_string(),
            )),
            Some(JsonValue::String(raw)) => Ok(vec![to_single_byte_lossy(raw)]),
            Some(JsonValue::Array(items)) => items
                .iter()
                .map(|item| {
                    item.as_str().map(to_single_byte_lossy).ok_or_else(|| {
                        err("pdl_strings", "PDL array entry is not a string".to_string())
                    })
                })
                .collect(),
            Some(_) => Err(err(
                "pdl_strings",
                "PDL is neither a string nor an array of strings".to_string(),
            )),
        };

        Record {
            filename,
            solution_type,
            solution_id,
            puzzle_id,
            history_string,
            history_pairs,
            history_id,
            history_hash,
            total_moves,
            score,
            timestamp,
            pdl_strings,
        }
    }

    pub fn filename(&self) -> Result<&str, RecordFieldError> {
        self.filename.as_deref().map_err(Clone::clone)
    }

    pub fn solution_type(&self) -> Result<SolutionType, RecordFieldError> {
        self.solution_type.clone()
    }

    pub fn solution_id(&self) -> Result<i64, RecordFieldError> {
        self.solution_id.clone()
    }

    pub fn puzzle_id(&self) -> Result<i64, RecordFieldError> {
        self.puzzle_id.clone()
    }

    pub fn history_string(&self) -> Result<&str, RecordFieldError> {
        self.history_string.as_deref().map_err(Clone::clone)
    }

    pub fn history_pairs(&self) -> Result<&[HistoryPair], RecordFieldError> {
        self.history_pairs.as_deref().map_err(Clone::clone)
    }

    pub fn history_id(&self) -> Result<&str, RecordFieldError> {
        self.history_id.as_deref().map_err(Clone::clone)
    }

    pub fn history_hash(&self) -> Result<&str, RecordFieldError> {
        self.history_hash.as_deref().map_err(Clone::clone)
    }

    pub fn total_moves(&self) -> Result<i64, RecordFieldError> {
        self.total_moves.clone()
    }

    pub fn score(&self) -> Result<f64, RecordFieldError> {
        self.score.clone()
    }

    pub fn timestamp(&self) -> Result<DateTime<Utc>, RecordFieldError> {
        self.timestamp.clone()
    }

    pub fn pdl_strings(&self) -> Result<&[String], RecordFieldError> {
        self.pdl_strings.as_deref().map_err(Clone::clone)
    }
}

/// Lazily parse newline-delimited IRData documents, one record per line.
///
/// Single pass over the reader; blank lines are skipped, read failures
/// surface as `ParseError::Io`.
pub fn parse_lines<R: BufRead>(reader: R) -> impl Iterator<Item = Result<Record, ParseError>> {
    reader.lines().filter_map(|line| match line {
        Ok(line) if line.trim().is_empty() => None,
        Ok(line) => Some(Record::parse(&line)),
        Err(io_err) => Some(Err(ParseError::Io(io_err))),
    })
}

fn required_str(
    data: &Map<String, JsonValue>,
    key: &str,
    field: &'static str,
    err: &impl Fn(&'static str, String) -> RecordFieldError,
) -> Result<String, RecordFieldError> {
    match data.get(key) {
        Some(JsonValue::String(raw)) => Ok(raw.clone()),
        Some(_) => Err(err(field, format!("key {key} is not a string"))),
        None => Err(err(field, format!("missing required key {key}"))),
    }
}

fn required_int(
    data: &Map<String, JsonValue>,
    key: &str,
    field: &'static str,
    err: &impl Fn(&'static str, String) -> RecordFieldError,
) -> Result<i64, RecordFieldError> {
    let raw = required_str(data, key, field, err)?;
    raw.trim()
        .parse::<i64>()
        .map_err(|_| err(field, format!("`{raw}` is not an integer")))
}

fn parse_history_pairs(
    history: &str,
    err: &impl Fn(&'static str, String) -> RecordFieldError,
) -> Result<Vec<HistoryPair>, RecordFieldError> {
    if history.is_empty() {
        return Err(err("history_string", "history string is empty".to_string()));
    }
    history
        .split(',')
        .map(|pair| {
            let (id, moves) = pair.split_once(':').ok_or_else(|| {
                err(
                    "history_string",
                    format!("history entry `{pair}` is missing its `:` separator"),
                )
            })?;
            let moves = moves.parse::<i64>().map_err(|_| {
                err(
                    "total_moves",
                    format!("history entry `{pair}` has a non-numeric move count"),
                )
            })?;
            Ok(HistoryPair {
                id: id.to_string(),
                moves,
            })
        })
        .collect()
}

fn sha256_hex(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    hex::encode(hasher.finalize())
}

/// Re-encode a PDL string into the single-byte-per-character range,
/// dropping anything above U+00FF.
fn to_single_byte_lossy(raw: &str) -> String {
    raw.chars().filter(|c| (*c as u32) <= 0xFF).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const REGULAR_LINE: &str = r#"{"FILEPATH":"/location/all/solution.pdb","SID":"1","PID":"7","HISTORY":"V1:10,V2:5,V3:4","SCORE":"134.2","TIMESTAMP":"0","PDL":". bill,myteam,100,200"}"#;

    fn regular_record() -> Record {
        Record::parse(REGULAR_LINE).expect("regular record")
    }

    #[test]
    fn derived_fields_follow_the_history_string() {
        let record = regular_record();
        assert_eq!(record.solution_id().unwrap(), 1);
        assert_eq!(record.puzzle_id().unwrap(), 7);
        assert_eq!(record.history_id().unwrap(), "V3");
        assert_eq!(record.total_moves().unwrap(), 19);
        assert_eq!(record.score().unwrap(), 134.2);
    }

    #[test]
    fn solution_type_comes_from_the_file_path() {
        let record = regular_record();
        assert_eq!(record.solution_type().unwrap(), SolutionType::Regular);

        let top = Record::parse(&REGULAR_LINE.replace("/all/", "/top/")).unwrap();
        assert_eq!(top.solution_type().unwrap(), SolutionType::Top);

        let odd = Record::parse(&REGULAR_LINE.replace("/all/", "/other/")).unwrap();
        let err = odd.solution_type().unwrap_err();
        assert_eq!(err.field, "solution_type");
    }

    #[test]
    fn timestamp_is_epoch_seconds() {
        let record = regular_record();
        assert_eq!(
            record.timestamp().unwrap(),
            Utc.timestamp_opt(0, 0).single().unwrap()
        );
    }

    #[test]
    fn missing_filepath_fails_the_filename_field_only() {
        let record = Record::parse(r#"{"SID":"1"}"#).unwrap();
        let err = record.filename().unwrap_err();
        assert_eq!(err.field, "filename");
        assert_eq!(record.solution_id().unwrap(), 1);
    }

    #[test]
    fn field_errors_carry_the_record_filename() {
        let record = Record::parse(r#"{"FILEPATH":"/location/all/s.pdb","SID":"abc"}"#).unwrap();
        let err = record.solution_id().unwrap_err();
        assert_eq!(err.field, "solution_id");
        assert_eq!(err.filename.as_deref(), Some("/location/all/s.pdb"));
    }

    #[test]
    fn failed_fields_re_yield_the_same_error_on_repeat_access() {
        let record = Record::parse(r#"{"FILEPATH":"/location/all/s.pdb"}"#).unwrap();
        let first = record.score().unwrap_err();
        let second = record.score().unwrap_err();
        assert_eq!(first, second);
    }

    #[test]
    fn malformed_history_entries_fail_validation() {
        let record =
            Record::parse(r#"{"FILEPATH":"/location/all/s.pdb","HISTORY":"V1:10,V2"}"#).unwrap();
        assert!(record.history_id().is_err());
        assert!(record.total_moves().is_err());
        // the raw string itself is still available
        assert_eq!(record.history_string().unwrap(), "V1:10,V2");
    }

    #[test]
    fn history_hash_is_a_stable_sha256_digest() {
        let record = regular_record();
        let hash = record.history_hash().unwrap();
        assert_eq!(hash.len(), 64);
        assert!(hash.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(regular_record().history_hash().unwrap(), hash);

        let other =
            Record::parse(&REGULAR_LINE.replace("V3:4", "V3:5")).expect("variant record");
        assert_ne!(other.history_hash().unwrap(), hash);
    }

    #[test]
    fn pdl_accepts_a_single_string_or_an_array() {
        let record = regular_record();
        assert_eq!(record.pdl_strings().unwrap().len(), 1);

        let two = Record::parse(
            r#"{"FILEPATH":"/location/all/s.pdb","PDL":[". a,t,1,2",". b,t,3,4"]}"#,
        )
        .unwrap();
        assert_eq!(two.pdl_strings().unwrap().len(), 2);
    }

    #[test]
    fn pdl_strings_drop_characters_outside_the_single_byte_range() {
        let record = Record::parse(
            "{\"FILEPATH\":\"/location/all/s.pdb\",\"PDL\":\". caf\u{00e9}\u{1f600},team,1,2\"}",
        )
        .unwrap();
        assert_eq!(record.pdl_strings().unwrap()[0], ". caf\u{00e9},team,1,2");
    }

    #[test]
    fn parse_rejects_malformed_json_and_non_objects() {
        assert!(matches!(Record::parse("{not json"), Err(ParseError::Json(_))));
        assert!(matches!(
            Record::parse("[1,2,3]"),
            Err(ParseError::NotAnObject)
        ));
    }

    #[test]
    fn parse_lines_skips_blank_lines() {
        let input = format!("{REGULAR_LINE}\n\n{REGULAR_LINE}\n");
        let records: Vec<_> = parse_lines(input.as_bytes()).collect();
        assert_eq!(records.len(), 2);
        assert!(records.iter().all(Result::is_ok));
    }
}
