//! Mark-budget enforcement over annotations returned by the marking service.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::OnceLock;

use regex::Regex;

use crate::marking::merger::normalize_part;
use crate::marking::order_key::split_leading_number;
use crate::schemas::annotation::{Annotation, AnnotationAction};
use crate::schemas::marking::{format_marks, MarkingScheme, QuestionResult, Score};

const ROOT_KEY: &str = "root";

/// Standalone leading mark code such as `M1`, `A2 (cao)`, `B1 ft` or `SC1`.
fn mark_code_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^(SC|[MABCPE])(\d+)\b").ok()).as_ref()
}

/// Accuracy marks survive longest, then method-following, then method marks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Priority {
    Accuracy,
    FollowThrough,
    Method,
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct MarkValue {
    priority: Priority,
    marks: u32,
}

/// Value of an awarded annotation, or `None` for crosses, notes and zero-mark codes, which are
/// never trimmed.
///
/// A tick without a leading code (including mathematical working such as `x^2 = 49`) is worth 1
/// whatever digits it contains.
fn awarded_value(annotation: &Annotation) -> Option<MarkValue> {
    if annotation.action == AnnotationAction::Cross {
        return None;
    }

    match parse_mark_code(annotation.text_str()) {
        Some(value) if value.marks == 0 => None,
        Some(value) => Some(value),
        None if annotation.action == AnnotationAction::Tick => {
            Some(MarkValue { priority: Priority::Other, marks: 1 })
        }
        None => None,
    }
}

fn parse_mark_code(text: &str) -> Option<MarkValue> {
    let upper = text.trim().to_uppercase();
    let captures = mark_code_pattern()?.captures(&upper)?;
    let priority = match captures.get(1)?.as_str() {
        "A" => Priority::Accuracy,
        "B" => Priority::FollowThrough,
        "M" => Priority::Method,
        _ => Priority::Other,
    };
    // Digits that overflow saturate so the mark can never fit a real budget.
    let marks = captures.get(2)?.as_str().parse().unwrap_or(u32::MAX);
    Some(MarkValue { priority, marks })
}

/// Normalizes a sub-question label, dropping a leading copy of the task's own question number.
fn group_key(sub_question: Option<&str>, question_number: Option<u32>) -> String {
    let Some(label) = sub_question.map(str::trim).filter(|label| !label.is_empty()) else {
        return ROOT_KEY.to_string();
    };

    let relative = match (split_leading_number(label), question_number) {
        (Some((number, rest)), Some(own)) if number == own => rest,
        _ => label,
    };
    let key = normalize_part(relative);
    if key.is_empty() {
        ROOT_KEY.to_string()
    } else {
        key
    }
}

/// Keeps candidates greedily by priority, skipping any that would overrun the budget.
/// Candidates are `(annotation index, value)` in original order; returns the dropped indices.
fn trim_to_budget(candidates: &[(usize, MarkValue)], budget: Option<u32>) -> Vec<usize> {
    let Some(budget) = budget else {
        return Vec::new();
    };

    let mut ordered: Vec<&(usize, MarkValue)> = candidates.iter().collect();
    ordered.sort_by_key(|(_, value)| value.priority);

    let mut running = 0u32;
    let mut dropped = Vec::new();
    for (idx, value) in ordered {
        let next = running.saturating_add(value.marks);
        if next <= budget {
            running = next;
        } else {
            dropped.push(*idx);
        }
    }
    dropped
}

/// Trims over-awarded annotations against `scheme` and rescores from what survives.
///
/// Results without a scheme are returned untouched.
pub(crate) fn enforce(mut result: QuestionResult, scheme: Option<&MarkingScheme>) -> QuestionResult {
    let Some(scheme) = scheme else {
        return result;
    };

    let question_number = split_leading_number(&result.question_number).map(|(number, _)| number);
    let budgets: HashMap<String, u32> = scheme
        .sub_question_max_scores
        .iter()
        .map(|(part, max)| (group_key(Some(part), question_number), *max))
        .collect();

    let mut groups: BTreeMap<String, Vec<(usize, MarkValue)>> = BTreeMap::new();
    for (idx, annotation) in result.annotations.iter().enumerate() {
        if let Some(value) = awarded_value(annotation) {
            let key = group_key(annotation.sub_question.as_deref(), question_number);
            groups.entry(key).or_default().push((idx, value));
        }
    }

    let candidates: Vec<(usize, MarkValue)> = groups.values().flatten().copied().collect();
    let mut dropped: HashSet<usize> = HashSet::new();
    for (key, group) in &groups {
        dropped.extend(trim_to_budget(group, budgets.get(key).copied()));
    }

    let mut survivors: Vec<(usize, MarkValue)> =
        candidates.iter().filter(|(idx, _)| !dropped.contains(idx)).copied().collect();
    survivors.sort_by_key(|(idx, _)| *idx);
    dropped.extend(trim_to_budget(&survivors, Some(scheme.total_marks)));

    let (trimmed, awarded) = candidates.iter().fold((0u32, 0u32), |(trimmed, awarded), (idx, value)| {
        if dropped.contains(idx) {
            (trimmed.saturating_add(value.marks), awarded)
        } else {
            (trimmed, awarded.saturating_add(value.marks))
        }
    });

    result.annotations = result
        .annotations
        .into_iter()
        .enumerate()
        .filter(|(idx, _)| !dropped.contains(idx))
        .map(|(_, annotation)| annotation)
        .collect();
    result.score = Score::new(f64::from(awarded), f64::from(scheme.total_marks));
    result.trimmed_marks = trimmed;

    if trimmed > 0 {
        tracing::info!(
            question_number = %result.question_number,
            trimmed,
            awarded,
            budget = %describe_budget(scheme),
            "Trimmed over-awarded marks"
        );
        metrics::counter!("guillotine_marks_trimmed_total").increment(u64::from(trimmed));
        let note = format!(
            "Mark budget enforced: removed {trimmed} mark(s) exceeding the scheme; final score {}.",
            result.score.score_text
        );
        result.feedback = if result.feedback.trim().is_empty() {
            note
        } else {
            format!("{}\n\n{note}", result.feedback.trim_end())
        };
    }

    result
}

/// Human-readable budget, e.g. `6 total (a:2, b:4)`.
pub(crate) fn describe_budget(scheme: &MarkingScheme) -> String {
    if scheme.sub_question_max_scores.is_empty() {
        return format!("{} total", format_marks(f64::from(scheme.total_marks)));
    }
    let parts: Vec<String> =
        scheme.sub_question_max_scores.iter().map(|(part, max)| format!("{part}:{max}")).collect();
    format!("{} total ({})", format_marks(f64::from(scheme.total_marks)), parts.join(", "))
}
