//! Submission data handed to the grading pipeline

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Artifact name used when a submission carries no identifier
pub const UNKNOWN_SUBMISSION: &str = "unknown";

/// Recognized metadata keys
pub mod meta_keys {
    pub const ENABLE_WAVEFORM: &str = "enable_waveform";
    pub const ENABLE_PPA: &str = "enable_ppa";
    pub const F4PGA_BOARD: &str = "f4pga_board";
    pub const OPENLANE_PDK: &str = "openlane_pdk";
    pub const DEFINES: &str = "defines";
}

/// Immutable view of one submission
#[derive(Debug, Clone)]
pub struct Submission {
    pub problem_id: String,
    pub source: Vec<u8>,
    /// Auxiliary sources, name -> content (names unique by construction)
    pub aux_sources: BTreeMap<String, Vec<u8>>,
    pub meta: SubmissionMeta,
    /// Opaque id, used only to name artifacts
    pub submission_id: Option<String>,
}

impl Submission {
    pub fn new(problem_id: impl Into<String>, source: impl Into<Vec<u8>>) -> Self {
        Self {
            problem_id: problem_id.into(),
            source: source.into(),
            aux_sources: BTreeMap::new(),
            meta: SubmissionMeta::default(),
            submission_id: None,
        }
    }

    pub fn with_aux_source(mut self, name: impl Into<String>, content: impl Into<Vec<u8>>) -> Self {
        self.aux_sources.insert(name.into(), content.into());
        self
    }

    pub fn with_meta(mut self, meta: SubmissionMeta) -> Self {
        self.meta = meta;
        self
    }

    pub fn with_submission_id(mut self, id: impl Into<String>) -> Self {
        self.submission_id = Some(id.into());
        self
    }

    /// Name used for durable artifacts of this submission
    pub fn artifact_stem(&self) -> String {
        match self.submission_id.as_deref() {
            Some(id) if !id.trim().is_empty() => sanitize_file_stem(id),
            _ => UNKNOWN_SUBMISSION.to_string(),
        }
    }
}

/// Per-submission options (flags, synthesis targets, thresholds)
///
/// Values arrive from the web side with loose typing, so accessors accept
/// `true`/`"true"`/`1`/`"1"` for flags and numbers or numeric strings for
/// thresholds.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubmissionMeta(BTreeMap<String, Value>);

impl SubmissionMeta {
    #[cfg(test)]
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(test)]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    pub fn flag(&self, key: &str) -> bool {
        match self.0.get(key) {
            Some(Value::Bool(b)) => *b,
            Some(Value::Number(n)) => n.as_f64().is_some_and(|v| v != 0.0),
            Some(Value::String(s)) => {
                matches!(s.trim().to_ascii_lowercase().as_str(), "true" | "1" | "yes" | "on")
            }
            _ => false,
        }
    }

    /// Non-empty string value
    pub fn text(&self, key: &str) -> Option<&str> {
        match self.0.get(key) {
            Some(Value::String(s)) if !s.trim().is_empty() => Some(s.trim()),
            _ => None,
        }
    }

    pub fn number(&self, key: &str) -> Option<f64> {
        match self.0.get(key) {
            Some(Value::Number(n)) => n.as_f64(),
            Some(Value::String(s)) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// List of strings (a single string is treated as a one-element list)
    pub fn strings(&self, key: &str) -> Vec<String> {
        match self.0.get(key) {
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect(),
            Some(Value::String(s)) if !s.is_empty() => vec![s.clone()],
            _ => Vec::new(),
        }
    }

    pub fn waveform_enabled(&self) -> bool {
        self.flag(meta_keys::ENABLE_WAVEFORM)
    }

    pub fn ppa_enabled(&self) -> bool {
        self.flag(meta_keys::ENABLE_PPA)
    }
}

/// Keep artifact names inside the artifact directory
fn sanitize_file_stem(id: &str) -> String {
    let stem: String = id
        .trim()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();
    stem
}
