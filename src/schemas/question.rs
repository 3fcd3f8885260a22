use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct LinePosition {
    pub(crate) x: f64,
    pub(crate) y: f64,
    pub(crate) width: f64,
    pub(crate) height: f64,
}

/// A line of extracted student work. `id` encodes the page as `p<N>_...` and must agree with
/// `page_index`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct StudentWorkLine {
    #[serde(default)]
    pub(crate) text: String,
    #[serde(default)]
    pub(crate) page_index: usize,
    #[serde(default)]
    pub(crate) position: Option<LinePosition>,
    #[serde(default)]
    pub(crate) id: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct SubQuestion {
    pub(crate) part: String,
    #[serde(default)]
    pub(crate) text: String,
    #[serde(default)]
    pub(crate) student_work: Option<String>,
    #[serde(default)]
    pub(crate) student_work_lines: Vec<StudentWorkLine>,
    #[serde(default)]
    pub(crate) has_student_drawing: bool,
    #[serde(default)]
    pub(crate) page_index: Option<usize>,
    #[serde(default)]
    pub(crate) page_indices: Vec<usize>,
    #[serde(default)]
    pub(crate) sub_questions: Vec<SubQuestion>,
}

impl SubQuestion {
    /// Pages named by this node alone, merging the single and multi-index fields.
    pub(crate) fn own_pages(&self) -> BTreeSet<usize> {
        self.page_index.into_iter().chain(self.page_indices.iter().copied()).collect()
    }

    /// Pages named by this node or any descendant.
    pub(crate) fn touched_pages(&self) -> BTreeSet<usize> {
        let mut pages = self.own_pages();
        for child in &self.sub_questions {
            pages.extend(child.touched_pages());
        }
        pages
    }

    pub(crate) fn has_student_work(&self) -> bool {
        self.student_work.as_deref().is_some_and(|work| !work.trim().is_empty())
            || !self.student_work_lines.is_empty()
            || self.has_student_drawing
            || self.sub_questions.iter().any(SubQuestion::has_student_work)
    }
}

/// A question as detected on a single page by the classification service.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct QuestionFragment {
    #[serde(default)]
    pub(crate) page_index: usize,
    #[serde(default)]
    pub(crate) question_number: Option<String>,
    #[serde(default)]
    pub(crate) text: Option<String>,
    #[serde(default)]
    pub(crate) student_work: Option<String>,
    #[serde(default)]
    pub(crate) student_work_lines: Vec<StudentWorkLine>,
    #[serde(default)]
    pub(crate) sub_questions: Vec<SubQuestion>,
    #[serde(default)]
    pub(crate) confidence: f64,
    #[serde(default)]
    pub(crate) has_student_drawing: bool,
}

impl QuestionFragment {
    pub(crate) fn has_student_work(&self) -> bool {
        self.student_work.as_deref().is_some_and(|work| !work.trim().is_empty())
            || !self.student_work_lines.is_empty()
            || self.has_student_drawing
            || self.sub_questions.iter().any(SubQuestion::has_student_work)
    }
}

/// A logical question, merged across every physical page it appears on.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct Question {
    pub(crate) question_number: Option<String>,
    pub(crate) text: String,
    pub(crate) student_work: Option<String>,
    pub(crate) student_work_lines: Vec<StudentWorkLine>,
    pub(crate) sub_questions: Vec<SubQuestion>,
    pub(crate) source_image_index: Option<usize>,
    pub(crate) source_image_indices: Vec<usize>,
    pub(crate) confidence: f64,
    pub(crate) has_student_drawing: bool,
}

impl Question {
    /// Pages named by the question itself, merging the legacy single index with the list.
    pub(crate) fn own_pages(&self) -> BTreeSet<usize> {
        self.source_image_index.into_iter().chain(self.source_image_indices.iter().copied()).collect()
    }

    pub(crate) fn touched_pages(&self) -> BTreeSet<usize> {
        let mut pages = self.own_pages();
        for sub in &self.sub_questions {
            pages.extend(sub.touched_pages());
        }
        pages
    }

    pub(crate) fn has_student_work(&self) -> bool {
        self.student_work.as_deref().is_some_and(|work| !work.trim().is_empty())
            || !self.student_work_lines.is_empty()
            || self.has_student_drawing
            || self.sub_questions.iter().any(SubQuestion::has_student_work)
    }

    pub(crate) fn display_number(&self) -> &str {
        self.question_number.as_deref().unwrap_or("?")
    }
}
