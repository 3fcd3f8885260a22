use std::collections::{BTreeSet, HashMap, HashSet};

use crate::marking::identifiers::{self, LINE_KIND};
use crate::marking::order_key::split_leading_number;
use crate::schemas::question::{Question, QuestionFragment, StudentWorkLine, SubQuestion};

const BLANK_PAGE_MARKERS: &[&str] = &["blank page", "intentionally left blank", "[blank]"];
const UNUSABLE_NUMBERS: &[&str] = &["null", "none", "unknown", "n/a"];

/// Collapses per-page fragments sharing a question number into logical questions.
///
/// Fragments without a usable number stay separate. `fallback_number` is applied to unnumbered
/// fragments first, for single-question submissions.
pub(crate) fn merge_fragments(
    fragments: Vec<QuestionFragment>,
    fallback_number: Option<&str>,
) -> Vec<Question> {
    let fragments = stamp_fragments(fragments);

    let mut groups: Vec<(Option<String>, Vec<QuestionFragment>)> = Vec::new();
    let mut group_by_number: HashMap<String, usize> = HashMap::new();

    for fragment in fragments {
        let number = fragment
            .question_number
            .as_deref()
            .and_then(normalize_question_number)
            .or_else(|| fallback_number.and_then(normalize_question_number));

        match number {
            Some(number) => match group_by_number.get(&number) {
                Some(&idx) => groups[idx].1.push(fragment),
                None => {
                    group_by_number.insert(number.clone(), groups.len());
                    groups.push((Some(number), vec![fragment]));
                }
            },
            None => groups.push((None, vec![fragment])),
        }
    }

    let mut questions: Vec<Question> =
        groups.into_iter().map(|(number, members)| build_question(number, members)).collect();

    questions.sort_by_key(|question| {
        question
            .question_number
            .as_deref()
            .and_then(split_leading_number)
            .map(|(number, _)| number)
            .unwrap_or(u32::MAX)
    });

    tracing::debug!(questions = questions.len(), "Merged question fragments");
    questions
}

/// `"Q3."` and `"3"` name the same question; strings with no digit are not usable numbers.
pub(crate) fn normalize_question_number(raw: &str) -> Option<String> {
    let lowered = raw.trim().to_lowercase();
    if UNUSABLE_NUMBERS.contains(&lowered.as_str()) {
        return None;
    }

    let without_prefix = lowered
        .strip_prefix("question")
        .or_else(|| lowered.strip_prefix('q'))
        .unwrap_or(&lowered);
    let normalized: String = without_prefix
        .trim_end_matches(['.', ')', ':'])
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect();

    normalized.chars().any(|c| c.is_ascii_digit()).then_some(normalized)
}

pub(crate) fn normalize_part(part: &str) -> String {
    let compact: String = part.chars().filter(|c| !c.is_whitespace()).collect::<String>().to_lowercase();
    let stripped = compact.strip_prefix('(').unwrap_or(&compact);
    let stripped = stripped.strip_suffix(')').filter(|inner| !inner.contains('(')).unwrap_or(stripped);
    stripped.to_string()
}

fn is_blank_page_text(text: &str) -> bool {
    let lowered = text.to_lowercase();
    BLANK_PAGE_MARKERS.iter().any(|marker| lowered.contains(marker))
}

/// Content beats blank-page markers, then longer text wins.
fn text_rank(text: &str) -> (bool, usize) {
    let trimmed = text.trim();
    (!trimmed.is_empty() && !is_blank_page_text(trimmed), trimmed.len())
}

fn better_text(current: String, candidate: String) -> String {
    if text_rank(&candidate) > text_rank(&current) {
        candidate
    } else {
        current
    }
}

fn join_work<'a>(works: impl IntoIterator<Item = Option<&'a str>>) -> Option<String> {
    let bodies: Vec<&str> =
        works.into_iter().flatten().map(str::trim).filter(|work| !work.is_empty()).collect();
    (!bodies.is_empty()).then(|| bodies.join("\n"))
}

/// Stamps every line and sub-question with the page its fragment came from. Lines whose
/// identifier carries no page prefix get a fresh one.
fn stamp_fragments(fragments: Vec<QuestionFragment>) -> Vec<QuestionFragment> {
    let mut used_ids: HashSet<String> = HashSet::new();
    let mut next_sequence: HashMap<usize, usize> = HashMap::new();

    fragments
        .into_iter()
        .map(|fragment| {
            let page = fragment.page_index;
            let mut stamp_line = |line: StudentWorkLine| {
                let id = if identifiers::page_of(&line.id).is_none() {
                    let sequence = next_sequence.entry(page).or_insert(0);
                    loop {
                        let candidate = identifiers::encode(page, LINE_KIND, *sequence);
                        *sequence += 1;
                        if !used_ids.contains(&candidate) {
                            break candidate;
                        }
                    }
                } else {
                    identifiers::with_page(&line.id, page)
                };
                used_ids.insert(id.clone());
                StudentWorkLine { page_index: page, id, ..line }
            };

            let student_work_lines =
                fragment.student_work_lines.into_iter().map(&mut stamp_line).collect();
            let sub_questions = fragment
                .sub_questions
                .into_iter()
                .map(|sub| stamp_sub_question(sub, page, &mut stamp_line))
                .collect();

            QuestionFragment { student_work_lines, sub_questions, ..fragment }
        })
        .collect()
}

fn stamp_sub_question(
    sub: SubQuestion,
    page: usize,
    stamp_line: &mut impl FnMut(StudentWorkLine) -> StudentWorkLine,
) -> SubQuestion {
    let mut page_indices: BTreeSet<usize> = sub.page_indices.iter().copied().collect();
    page_indices.insert(page);

    SubQuestion {
        page_index: sub.page_index.or(Some(page)),
        page_indices: page_indices.into_iter().collect(),
        student_work_lines: sub.student_work_lines.into_iter().map(&mut *stamp_line).collect(),
        sub_questions: sub
            .sub_questions
            .into_iter()
            .map(|child| stamp_sub_question(child, page, stamp_line))
            .collect(),
        ..sub
    }
}

fn build_question(number: Option<String>, mut members: Vec<QuestionFragment>) -> Question {
    members.sort_by_key(|fragment| fragment.page_index);

    let text = members.iter().fold(String::new(), |best, fragment| {
        better_text(best, fragment.text.clone().unwrap_or_default())
    });
    let student_work = join_work(members.iter().map(|fragment| fragment.student_work.as_deref()));
    let confidence = members.iter().map(|fragment| fragment.confidence).fold(0.0_f64, f64::max);
    let has_student_drawing = members.iter().any(|fragment| fragment.has_student_drawing);

    let fragment_pages: Vec<usize> = members.iter().map(|fragment| fragment.page_index).collect();
    let mut student_work_lines = Vec::new();
    let mut sub_questions = Vec::new();
    for fragment in members {
        student_work_lines.extend(fragment.student_work_lines);
        sub_questions = merge_sub_lists(sub_questions, fragment.sub_questions);
    }

    let mut question = Question {
        question_number: number,
        text,
        student_work,
        student_work_lines,
        sub_questions,
        source_image_index: None,
        source_image_indices: fragment_pages,
        confidence,
        has_student_drawing,
    };
    let touched: Vec<usize> = question.touched_pages().into_iter().collect();
    question.source_image_index = touched.first().copied();
    question.source_image_indices = touched;
    question
}

/// Union of two sibling lists keyed by normalized part label, in first-seen order.
fn merge_sub_lists(existing: Vec<SubQuestion>, incoming: Vec<SubQuestion>) -> Vec<SubQuestion> {
    let mut merged: Vec<SubQuestion> = Vec::with_capacity(existing.len() + incoming.len());
    let mut by_part: HashMap<String, usize> = HashMap::new();

    for sub in existing.into_iter().chain(incoming) {
        let key = normalize_part(&sub.part);
        match by_part.get(&key) {
            Some(&idx) => {
                let current = std::mem::take(&mut merged[idx]);
                merged[idx] = merge_sub(current, sub);
            }
            None => {
                by_part.insert(key, merged.len());
                merged.push(sub);
            }
        }
    }

    merged
}

fn merge_sub(first: SubQuestion, second: SubQuestion) -> SubQuestion {
    let page_indices: BTreeSet<usize> =
        first.page_indices.iter().chain(second.page_indices.iter()).copied().collect();
    let page_index = match (first.page_index, second.page_index) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (a, b) => a.or(b),
    };
    let student_work =
        join_work([first.student_work.as_deref(), second.student_work.as_deref()]);

    let mut student_work_lines = first.student_work_lines;
    student_work_lines.extend(second.student_work_lines);

    SubQuestion {
        part: first.part,
        text: better_text(first.text, second.text),
        student_work,
        student_work_lines,
        has_student_drawing: first.has_student_drawing || second.has_student_drawing,
        page_index,
        page_indices: page_indices.into_iter().collect(),
        sub_questions: merge_sub_lists(first.sub_questions, second.sub_questions),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fragment(page: usize, number: Option<&str>, text: &str) -> QuestionFragment {
        QuestionFragment {
            page_index: page,
            question_number: number.map(str::to_string),
            text: Some(text.to_string()),
            confidence: 0.5,
            ..QuestionFragment::default()
        }
    }

    fn sub(part: &str, work: &str) -> SubQuestion {
        SubQuestion {
            part: part.to_string(),
            student_work: Some(work.to_string()),
            ..SubQuestion::default()
        }
    }

    fn line(text: &str, id: &str) -> StudentWorkLine {
        StudentWorkLine { text: text.to_string(), page_index: 99, position: None, id: id.to_string() }
    }

    #[test]
    fn groups_fragments_by_normalized_number() {
        let questions = merge_fragments(
            vec![
                fragment(0, Some("Q2"), "Solve for x"),
                fragment(1, Some("1"), "Expand"),
                fragment(2, Some("2."), "Solve for x in the equation"),
            ],
            None,
        );

        assert_eq!(questions.len(), 2);
        assert_eq!(questions[0].question_number.as_deref(), Some("1"));
        assert_eq!(questions[1].question_number.as_deref(), Some("2"));
        assert_eq!(questions[1].source_image_indices, vec![0, 2]);
        assert_eq!(questions[1].source_image_index, Some(0));
        assert_eq!(questions[1].text, "Solve for x in the equation");
    }

    #[test]
    fn unnumbered_fragments_stay_separate() {
        let questions = merge_fragments(
            vec![fragment(0, None, "a"), fragment(1, Some("unknown"), "b"), fragment(2, None, "c")],
            None,
        );
        assert_eq!(questions.len(), 3);
        assert!(questions.iter().all(|question| question.question_number.is_none()));
    }

    #[test]
    fn fallback_number_groups_unnumbered_fragments() {
        let questions =
            merge_fragments(vec![fragment(0, None, "a"), fragment(1, None, "b")], Some("7"));
        assert_eq!(questions.len(), 1);
        assert_eq!(questions[0].question_number.as_deref(), Some("7"));
        assert_eq!(questions[0].source_image_indices, vec![0, 1]);
    }

    #[test]
    fn prefers_content_over_blank_page_marker() {
        let questions = merge_fragments(
            vec![
                fragment(0, Some("3"), "This page is intentionally left blank, do not write here"),
                fragment(1, Some("3"), "Find the area"),
            ],
            None,
        );
        assert_eq!(questions[0].text, "Find the area");
    }

    #[test]
    fn concatenates_work_and_stamps_lines_with_origin_page() {
        let mut first = fragment(4, Some("5"), "Prove");
        first.student_work = Some("step one".to_string());
        first.student_work_lines = vec![line("step one", "p0_line_3")];
        first.confidence = 0.4;
        let mut second = fragment(6, Some("5"), "Prove");
        second.student_work = Some("  ".to_string());
        second.student_work_lines = vec![line("step two", "")];
        let mut third = fragment(5, Some("5"), "Prove");
        third.student_work = Some("middle".to_string());
        third.confidence = 0.9;

        let questions = merge_fragments(vec![first, second, third], None);
        let question = &questions[0];

        assert_eq!(question.student_work.as_deref(), Some("step one\nmiddle"));
        assert_eq!(question.confidence, 0.9);
        assert_eq!(question.student_work_lines[0].page_index, 4);
        assert_eq!(question.student_work_lines[0].id, "p4_line_3");
        assert_eq!(question.student_work_lines[1].page_index, 6);
        assert_eq!(question.student_work_lines[1].id, "p6_line_0");
    }

    #[test]
    fn merges_sub_questions_recursively_by_part() {
        let mut first = fragment(0, Some("8"), "Graphs");
        let mut part_a = sub("a", "gradient 2");
        part_a.sub_questions = vec![sub("i", "y = 2x")];
        first.sub_questions = vec![part_a];

        let mut second = fragment(3, Some("8"), "Graphs");
        let mut part_a_again = sub("(a)", "intercept 1");
        part_a_again.has_student_drawing = true;
        part_a_again.sub_questions = vec![sub("i", "check"), sub("ii", "y = 1")];
        second.sub_questions = vec![part_a_again, sub("b", "sketch")];

        let questions = merge_fragments(vec![first, second], None);
        let question = &questions[0];

        assert_eq!(question.sub_questions.len(), 2);
        let a = &question.sub_questions[0];
        assert_eq!(a.part, "a");
        assert_eq!(a.student_work.as_deref(), Some("gradient 2\nintercept 1"));
        assert!(a.has_student_drawing);
        assert_eq!(a.page_indices, vec![0, 3]);
        assert_eq!(a.page_index, Some(0));
        assert_eq!(a.sub_questions.len(), 2);
        assert_eq!(a.sub_questions[0].student_work.as_deref(), Some("y = 2x\ncheck"));
        assert_eq!(question.sub_questions[1].page_indices, vec![3]);
    }

    #[test]
    fn source_indices_cover_pages_named_only_by_sub_questions() {
        let mut only = fragment(2, Some("4"), "Table");
        let mut part = sub("a", "values");
        part.page_indices = vec![7];
        only.sub_questions = vec![part];

        let questions = merge_fragments(vec![only], None);
        assert_eq!(questions[0].source_image_indices, vec![2, 7]);
        let touched: Vec<usize> = questions[0].touched_pages().into_iter().collect();
        assert_eq!(questions[0].source_image_indices, touched);
    }

    #[test]
    fn sorts_numerically_not_lexically() {
        let questions = merge_fragments(
            vec![fragment(0, Some("10"), "x"), fragment(1, Some("9"), "y"), fragment(2, Some("2b"), "z")],
            None,
        );
        let numbers: Vec<_> =
            questions.iter().map(|question| question.question_number.clone().unwrap()).collect();
        assert_eq!(numbers, vec!["2b", "9", "10"]);
    }

    #[test]
    fn normalizes_part_labels() {
        assert_eq!(normalize_part("(a)"), "a");
        assert_eq!(normalize_part("b(i)"), "b(i)");
        assert_eq!(normalize_part(" B (ii) "), "b(ii)");
        assert_eq!(normalize_part("c)"), "c");
    }
}
