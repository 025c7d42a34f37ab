//! Record schema, validation and normalization.
//!
//! Inputs arrive loosely typed (JSON exports of RFP answer banks); scalars
//! are coerced to text and anything else counts as missing. Validation is
//! per record: a bad input yields a [`RejectReason`], never an error for the
//! whole batch.

use std::path::Path;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::{
    embedding::{DenseVector, SparseVector},
    error::{Error, Result},
};

/// `answer_type` assigned when an input does not carry one.
pub const DEFAULT_ANSWER_TYPE: &str = "general";

/// A validated question/answer record as stored in the collection.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub id: String,
    pub question: String,
    pub answer: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub answer_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,
    #[serde(skip)]
    pub dense_vector: DenseVector,
    #[serde(skip)]
    pub sparse_vector: SparseVector,
}

impl Record {
    /// Text both encoders embed for this record.
    pub fn embedding_text(&self) -> String {
        embedding_text(&self.question, &self.answer)
    }
}

pub fn embedding_text(question: &str, answer: &str) -> String {
    format!("Question: {question} Answer: {answer}").replace('\n', " ")
}

/// An unvalidated record as supplied by a caller.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecordInput {
    #[serde(deserialize_with = "lenient_text")]
    pub id: Option<String>,
    #[serde(deserialize_with = "lenient_text")]
    pub question: Option<String>,
    #[serde(deserialize_with = "lenient_text")]
    pub answer: Option<String>,
    #[serde(deserialize_with = "lenient_text")]
    pub summary: Option<String>,
    #[serde(deserialize_with = "lenient_text")]
    pub answer_type: Option<String>,
    #[serde(deserialize_with = "lenient_text")]
    pub date: Option<String>,
}

impl RecordInput {
    pub fn new(question: &str, answer: &str) -> Self {
        Self {
            question: Some(question.to_string()),
            answer: Some(answer.to_string()),
            ..Self::default()
        }
    }

    pub fn with_id(mut self, id: &str) -> Self {
        self.id = Some(id.to_string());
        self
    }
}

fn lenient_text<'de, D>(deserializer: D) -> std::result::Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::String(s) => Some(s),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    })
}

/// Why an input was not indexed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, thiserror::Error)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum RejectReason {
    #[error("missing required field: question")]
    MissingQuestion,
    #[error("missing required field: answer")]
    MissingAnswer,
    #[error("id must not be blank")]
    BlankId,
    #[error("date must be YYYY-MM-DD, got '{0}'")]
    InvalidDate(String),
}

/// Validate and normalize one input.
///
/// Text fields are trimmed, blank optionals become `None`, a missing
/// `answer_type` becomes [`DEFAULT_ANSWER_TYPE`], and a missing id is derived
/// from the question so re-indexing the same question overwrites it.
pub fn normalize(input: &RecordInput) -> std::result::Result<Record, RejectReason> {
    let question = non_blank(&input.question).ok_or(RejectReason::MissingQuestion)?;
    let answer = non_blank(&input.answer).ok_or(RejectReason::MissingAnswer)?;

    let id = match &input.id {
        Some(id) => non_blank(&Some(id.clone())).ok_or(RejectReason::BlankId)?,
        None => derive_id(&question),
    };

    let date = match non_blank(&input.date) {
        Some(date) if is_iso_date(&date) => Some(date),
        Some(date) => return Err(RejectReason::InvalidDate(date)),
        None => None,
    };

    Ok(Record {
        id,
        question,
        answer,
        summary: non_blank(&input.summary),
        answer_type: Some(
            non_blank(&input.answer_type)
                .unwrap_or_else(|| DEFAULT_ANSWER_TYPE.to_string()),
        ),
        date,
        dense_vector: DenseVector::default(),
        sparse_vector: SparseVector::default(),
    })
}

/// Stable id for a record that arrived without one.
pub fn derive_id(question: &str) -> String {
    let hash = blake3::hash(question.as_bytes());
    format!("q-{}", &hash.to_hex()[..16])
}

fn non_blank(field: &Option<String>) -> Option<String> {
    field
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// Strict `YYYY-MM-DD` check with month and day ranges.
pub(crate) fn is_iso_date(s: &str) -> bool {
    let b = s.as_bytes();
    if b.len() != 10 || b[4] != b'-' || b[7] != b'-' {
        return false;
    }
    let digits = |r: std::ops::Range<usize>| -> Option<u32> {
        let part = s.get(r)?;
        if part.bytes().all(|c| c.is_ascii_digit()) {
            part.parse().ok()
        } else {
            None
        }
    };
    matches!(
        (digits(0..4), digits(5..7), digits(8..10)),
        (Some(_), Some(1..=12), Some(1..=31))
    )
}

/// Read an indexing batch from a JSON file.
///
/// Accepts `{"documents": [...]}` or a bare array. Elements that are not
/// objects come back as empty inputs so the indexer rejects them
/// individually.
pub fn load_documents(path: &Path) -> Result<Vec<RecordInput>> {
    let contents = std::fs::read_to_string(path)?;
    parse_documents(&contents)
}

pub fn parse_documents(json: &str) -> Result<Vec<RecordInput>> {
    let elements = match serde_json::from_str::<Value>(json)? {
        Value::Array(items) => items,
        Value::Object(mut map) => match map.remove("documents") {
            Some(Value::Array(items)) => items,
            _ => {
                return Err(Error::Config(
                    "invalid document file: expected a 'documents' array".into(),
                ));
            }
        },
        _ => {
            return Err(Error::Config(
                "invalid document file: expected an array or object".into(),
            ));
        }
    };

    Ok(elements
        .into_iter()
        .map(|v| serde_json::from_value(v).unwrap_or_default())
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_trims_and_defaults() {
        let input = RecordInput {
            question: Some("  Do you encrypt data at rest? ".into()),
            answer: Some("Yes, AES-256.\n".into()),
            summary: Some("   ".into()),
            ..RecordInput::default()
        };
        let record = normalize(&input).unwrap();
        assert_eq!(record.question, "Do you encrypt data at rest?");
        assert_eq!(record.answer, "Yes, AES-256.");
        assert_eq!(record.summary, None);
        assert_eq!(record.answer_type.as_deref(), Some(DEFAULT_ANSWER_TYPE));
        assert_eq!(record.id, derive_id("Do you encrypt data at rest?"));
    }

    #[test]
    fn normalize_rejects_missing_fields() {
        let no_answer = RecordInput {
            question: Some("q".into()),
            ..RecordInput::default()
        };
        assert_eq!(normalize(&no_answer), Err(RejectReason::MissingAnswer));

        let blank_question = RecordInput::new(" \t", "a");
        assert_eq!(
            normalize(&blank_question),
            Err(RejectReason::MissingQuestion)
        );

        let blank_id = RecordInput::new("q", "a").with_id("  ");
        assert_eq!(normalize(&blank_id), Err(RejectReason::BlankId));
    }

    #[test]
    fn normalize_checks_dates() {
        let mut input = RecordInput::new("q", "a");
        input.date = Some("2024-03-15".into());
        assert_eq!(normalize(&input).unwrap().date.as_deref(), Some("2024-03-15"));

        input.date = Some("15/03/2024".into());
        assert_eq!(
            normalize(&input),
            Err(RejectReason::InvalidDate("15/03/2024".into()))
        );

        input.date = Some("2024-13-01".into());
        assert!(normalize(&input).is_err());
    }

    #[test]
    fn explicit_id_is_kept() {
        let record = normalize(&RecordInput::new("q", "a").with_id(" SEC-7 ")).unwrap();
        assert_eq!(record.id, "SEC-7");
    }

    #[test]
    fn derived_ids_are_stable_and_distinct() {
        assert_eq!(derive_id("a"), derive_id("a"));
        assert_ne!(derive_id("a"), derive_id("b"));
        assert_eq!(derive_id("a").len(), 18);
    }

    #[test]
    fn embedding_text_flattens_newlines() {
        assert_eq!(
            embedding_text("Line one\nline two", "Yes"),
            "Question: Line one line two Answer: Yes"
        );
    }

    #[test]
    fn parse_documents_wrapper_and_bare_array() {
        let wrapped = r#"{"documents": [{"question": "q", "answer": "a"}]}"#;
        assert_eq!(parse_documents(wrapped).unwrap().len(), 1);

        let bare = r#"[{"question": "q", "answer": "a"}, {"question": "q2"}]"#;
        let inputs = parse_documents(bare).unwrap();
        assert_eq!(inputs.len(), 2);
        assert_eq!(inputs[1].answer, None);
    }

    #[test]
    fn parse_documents_coerces_scalars() {
        let json = r#"[{"id": 42, "question": "Uptime SLA?", "answer": 99.9,
                        "summary": ["not", "text"]}, "junk"]"#;
        let inputs = parse_documents(json).unwrap();
        assert_eq!(inputs[0].id.as_deref(), Some("42"));
        assert_eq!(inputs[0].answer.as_deref(), Some("99.9"));
        assert_eq!(inputs[0].summary, None);
        assert_eq!(inputs[1], RecordInput::default());
    }

    #[test]
    fn parse_documents_rejects_wrong_shape() {
        assert!(matches!(
            parse_documents(r#"{"rows": []}"#),
            Err(Error::Config(_))
        ));
        assert!(matches!(parse_documents("not json"), Err(Error::Json(_))));
    }

    #[test]
    fn reject_reason_serializes_with_kind() {
        let json = serde_json::to_value(RejectReason::InvalidDate("x".into())).unwrap();
        assert_eq!(json["kind"], "invalid_date");
        assert_eq!(json["detail"], "x");
    }
}
