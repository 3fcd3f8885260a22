use crate::schemas::output::SubmissionMode;
use crate::schemas::page::{PageCategory, PageClassification};

#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct OverrideThresholds {
    pub(crate) student_work_ratio: f64,
    pub(crate) safety_ratio: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CategoryOverride {
    None,
    StudentWork,
    Safety,
}

impl CategoryOverride {
    pub(crate) fn as_str(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::StudentWork => "student_work",
            Self::Safety => "safety",
        }
    }
}

/// Rewrites `questionOnly` pages to `questionAnswer` when the rest of the submission suggests the
/// classifier under-detected student work.
pub(crate) fn apply_overrides(
    classifications: &mut [PageClassification],
    thresholds: OverrideThresholds,
) -> CategoryOverride {
    let content_pages = classifications.iter().filter(|page| !page.category.is_front_matter()).count();
    if content_pages == 0 {
        return CategoryOverride::None;
    }

    let answer_pages = count_category(classifications, PageCategory::QuestionAnswer);
    let question_only: Vec<&PageClassification> = classifications
        .iter()
        .filter(|page| page.category == PageCategory::QuestionOnly)
        .collect();
    if question_only.is_empty() {
        return CategoryOverride::None;
    }

    let answer_ratio = answer_pages as f64 / content_pages as f64;
    let decision = if answer_ratio >= thresholds.student_work_ratio {
        CategoryOverride::StudentWork
    } else {
        let with_work = question_only.iter().filter(|page| page.has_student_work()).count();
        if with_work as f64 / question_only.len() as f64 >= thresholds.safety_ratio {
            CategoryOverride::Safety
        } else {
            CategoryOverride::None
        }
    };

    if decision != CategoryOverride::None {
        let mut rewritten = 0usize;
        for page in classifications.iter_mut().filter(|page| page.category == PageCategory::QuestionOnly) {
            page.category = PageCategory::QuestionAnswer;
            rewritten += 1;
        }
        tracing::info!(
            rule = decision.as_str(),
            rewritten,
            answer_ratio,
            "Rewrote questionOnly pages to questionAnswer"
        );
    }

    decision
}

pub(crate) fn submission_mode(classifications: &[PageClassification]) -> SubmissionMode {
    if count_category(classifications, PageCategory::QuestionAnswer) > 0 {
        SubmissionMode::Marking
    } else {
        SubmissionMode::QuestionOnly
    }
}

fn count_category(classifications: &[PageClassification], category: PageCategory) -> usize {
    classifications.iter().filter(|page| page.category == category).count()
}
