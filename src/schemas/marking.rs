use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

use crate::schemas::annotation::Annotation;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct MarkingScheme {
    pub(crate) total_marks: u32,
    #[serde(default)]
    pub(crate) sub_question_max_scores: BTreeMap<String, u32>,
    #[serde(default)]
    pub(crate) is_generic: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct SchemeLookupResult {
    #[serde(default)]
    pub(crate) schemes: HashMap<String, MarkingScheme>,
    #[serde(default)]
    pub(crate) detection_rate: f64,
}

impl SchemeLookupResult {
    pub(crate) fn has_known_scheme(&self) -> bool {
        self.schemes.values().any(|scheme| !scheme.is_generic)
    }
}

#[derive(Debug, Clone)]
pub(crate) struct TaskImage {
    pub(crate) page_index: usize,
    pub(crate) mime_type: String,
    pub(crate) bytes: Vec<u8>,
}

/// One logical question bundled with everything the marking service needs. Consumed once.
#[derive(Debug, Clone)]
pub(crate) struct MarkingTask {
    pub(crate) question_number: String,
    pub(crate) question_text: String,
    pub(crate) student_work: String,
    pub(crate) ocr_text: String,
    pub(crate) block_ids: Vec<String>,
    pub(crate) sub_question_parts: Vec<String>,
    pub(crate) source_pages: Vec<usize>,
    pub(crate) scheme: Option<MarkingScheme>,
    pub(crate) images: Vec<TaskImage>,
    pub(crate) model: String,
    pub(crate) custom_text: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ReportedScore {
    #[serde(default)]
    pub(crate) awarded_marks: f64,
    #[serde(default)]
    pub(crate) total_marks: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct MarkingResponse {
    #[serde(default)]
    pub(crate) annotations: Vec<Annotation>,
    #[serde(default)]
    pub(crate) score: ReportedScore,
    #[serde(default)]
    pub(crate) feedback: String,
    #[serde(default)]
    pub(crate) usage_tokens: u64,
    #[serde(default)]
    pub(crate) student_work: Option<String>,
    #[serde(default)]
    pub(crate) question_text: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct Score {
    pub(crate) awarded_marks: f64,
    pub(crate) total_marks: f64,
    pub(crate) score_text: String,
}

impl Score {
    pub(crate) fn new(awarded_marks: f64, total_marks: f64) -> Self {
        let score_text = format!("{}/{}", format_marks(awarded_marks), format_marks(total_marks));
        Self { awarded_marks, total_marks, score_text }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct QuestionResult {
    pub(crate) question_number: String,
    pub(crate) question_text: String,
    pub(crate) score: Score,
    pub(crate) annotations: Vec<Annotation>,
    pub(crate) student_work: String,
    pub(crate) feedback: String,
    pub(crate) source_pages: Vec<usize>,
    #[serde(skip)]
    pub(crate) usage_tokens: u64,
    #[serde(skip)]
    pub(crate) trimmed_marks: u32,
}

/// Whole marks print without a decimal point; fractional pass-through scores keep one.
pub(crate) fn format_marks(value: f64) -> String {
    if value.fract().abs() < f64::EPSILON {
        format!("{}", value as i64)
    } else {
        format!("{value:.1}")
    }
}
