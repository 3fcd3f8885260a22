use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::schemas::marking::{MarkingScheme, QuestionResult};

/// Recognized submission options. Unknown fields are rejected so typos surface as input errors.
#[derive(Debug, Clone, Default, Deserialize, Validate)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub(crate) struct PipelineOptions {
    #[validate(length(min = 1, max = 100, message = "model must be 1-100 characters"))]
    pub(crate) model: Option<String>,
    #[validate(length(max = 50))]
    pub(crate) exam_board: Option<String>,
    #[validate(length(max = 50))]
    pub(crate) paper: Option<String>,
    #[validate(range(min = 1900, max = 2100, message = "year is out of range"))]
    pub(crate) year: Option<u16>,
    #[validate(length(max = 30))]
    pub(crate) season: Option<String>,
    #[validate(length(min = 1, max = 20))]
    pub(crate) question_number: Option<String>,
    #[serde(default)]
    pub(crate) marking_scheme: Option<HashMap<String, MarkingScheme>>,
    #[validate(length(max = 4000, message = "customText is too long"))]
    pub(crate) custom_text: Option<String>,
    #[validate(length(max = 128))]
    pub(crate) session_id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) enum SubmissionMode {
    Marking,
    QuestionOnly,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct AnnotatedPage {
    pub(crate) page_index: usize,
    pub(crate) original_file_name: String,
    pub(crate) width: u32,
    pub(crate) height: u32,
    pub(crate) annotation_count: usize,
    pub(crate) skipped_annotations: usize,
    pub(crate) data_url: String,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ProcessingStats {
    pub(crate) page_count: usize,
    pub(crate) question_count: usize,
    pub(crate) marked_questions: usize,
    pub(crate) failed_tasks: usize,
    pub(crate) trimmed_marks: u32,
    pub(crate) usage_tokens: u64,
    pub(crate) scheme_detection_rate: f64,
    pub(crate) duration_ms: u64,
    pub(crate) started_at: String,
    pub(crate) completed_at: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct FinalOutput {
    pub(crate) submission_id: String,
    pub(crate) annotated_output: Vec<AnnotatedPage>,
    pub(crate) results: Vec<QuestionResult>,
    pub(crate) mode: SubmissionMode,
    pub(crate) session_id: Option<String>,
    pub(crate) processing_stats: ProcessingStats,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub(crate) enum ProgressEvent {
    #[serde(rename_all = "camelCase")]
    Progress { step_index: usize, label: String, step_names: Vec<String> },
    Complete { result: Box<FinalOutput> },
    Error { message: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn options_reject_unknown_fields() {
        let parsed = serde_json::from_str::<PipelineOptions>(r#"{"examBoard":"AQA","colour":1}"#);
        assert!(parsed.is_err());
    }

    #[test]
    fn options_validate_year_range() {
        let options: PipelineOptions =
            serde_json::from_str(r#"{"year":1850,"season":"June"}"#).expect("options");
        assert!(options.validate().is_err());

        let options: PipelineOptions =
            serde_json::from_str(r#"{"year":2023,"questionNumber":"4"}"#).expect("options");
        assert!(options.validate().is_ok());
    }

    #[test]
    fn progress_event_serializes_with_type_tag() {
        let event = ProgressEvent::Progress {
            step_index: 2,
            label: "Merging questions".to_string(),
            step_names: vec!["a".to_string()],
        };
        let json = serde_json::to_value(&event).expect("json");
        assert_eq!(json["type"], "progress");
        assert_eq!(json["stepIndex"], 2);
        assert_eq!(json["stepNames"][0], "a");
    }
}
