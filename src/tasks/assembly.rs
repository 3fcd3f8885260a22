//! Builds marking tasks from merged questions and assembles rendered output from results.

use std::collections::{BTreeMap, HashMap};

use crate::core::config::RenderSettings;
use crate::marking::merger::normalize_question_number;
use crate::render::{self, PageSummary};
use crate::schemas::annotation::Annotation;
use crate::schemas::marking::{MarkingScheme, MarkingTask, QuestionResult, Score, TaskImage};
use crate::schemas::output::{AnnotatedPage, PipelineOptions};
use crate::schemas::page::{OcrPage, Page};
use crate::schemas::question::{Question, StudentWorkLine, SubQuestion};

pub(crate) fn scheme_for<'a>(
    question: &Question,
    schemes: &'a HashMap<String, MarkingScheme>,
) -> Option<&'a MarkingScheme> {
    question.question_number.as_deref().and_then(normalize_question_number).and_then(|number| schemes.get(&number))
}

/// One task per question with student work, carrying its pages, OCR text and identifiers.
pub(crate) fn build_tasks(
    questions: &[Question],
    pages: &[Page],
    ocr_pages: &[OcrPage],
    schemes: &HashMap<String, MarkingScheme>,
    options: &PipelineOptions,
    model: &str,
) -> Vec<MarkingTask> {
    questions
        .iter()
        .filter(|question| question.has_student_work())
        .map(|question| {
            let source_pages = question.source_image_indices.clone();
            let page_ocr: Vec<&OcrPage> =
                ocr_pages.iter().filter(|ocr| source_pages.contains(&ocr.page_index)).collect();

            let mut block_ids: Vec<String> = page_ocr
                .iter()
                .flat_map(|ocr| ocr.math_blocks.iter().filter_map(|block| block.id.clone()))
                .collect();
            block_ids.extend(all_lines(question).map(|line| line.id.clone()));

            MarkingTask {
                question_number: question.display_number().to_string(),
                question_text: question.text.clone(),
                student_work: student_work_text(question),
                ocr_text: page_ocr
                    .iter()
                    .map(|ocr| ocr.text.trim())
                    .filter(|text| !text.is_empty())
                    .collect::<Vec<_>>()
                    .join("\n\n"),
                block_ids,
                sub_question_parts: sub_question_parts(&question.sub_questions),
                scheme: scheme_for(question, schemes).cloned(),
                images: pages
                    .iter()
                    .filter(|page| source_pages.contains(&page.index))
                    .map(|page| TaskImage {
                        page_index: page.index,
                        mime_type: page.mime_type.clone(),
                        bytes: page.image.clone(),
                    })
                    .collect(),
                model: model.to_string(),
                custom_text: options.custom_text.clone(),
                source_pages,
            }
        })
        .collect()
}

fn all_lines(question: &Question) -> impl Iterator<Item = &StudentWorkLine> {
    fn walk<'a>(subs: &'a [SubQuestion], out: &mut Vec<&'a StudentWorkLine>) {
        for sub in subs {
            out.extend(sub.student_work_lines.iter());
            walk(&sub.sub_questions, out);
        }
    }

    let mut lines: Vec<&StudentWorkLine> = question.student_work_lines.iter().collect();
    walk(&question.sub_questions, &mut lines);
    lines.into_iter()
}

fn sub_question_parts(subs: &[SubQuestion]) -> Vec<String> {
    subs.iter()
        .flat_map(|sub| {
            let mut parts = vec![sub.part.clone()];
            parts.extend(sub_question_parts(&sub.sub_questions).into_iter().map(|child| format!("{}({child})", sub.part)));
            parts
        })
        .collect()
}

/// Student work as one text body: the question's own work, then each part's, labelled.
pub(crate) fn student_work_text(question: &Question) -> String {
    fn walk(subs: &[SubQuestion], prefix: &str, out: &mut Vec<String>) {
        for sub in subs {
            let label = format!("{prefix}{}", sub.part);
            let work = sub
                .student_work
                .as_deref()
                .map(str::trim)
                .filter(|work| !work.is_empty())
                .map(str::to_string)
                .unwrap_or_else(|| join_lines(&sub.student_work_lines));
            if !work.is_empty() {
                out.push(format!("({label}) {work}"));
            }
            walk(&sub.sub_questions, &label, out);
        }
    }

    let mut sections = Vec::new();
    let own = question
        .student_work
        .as_deref()
        .map(str::trim)
        .filter(|work| !work.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| join_lines(&question.student_work_lines));
    if !own.is_empty() {
        sections.push(own);
    }
    walk(&question.sub_questions, "", &mut sections);
    sections.join("\n")
}

fn join_lines(lines: &[StudentWorkLine]) -> String {
    lines.iter().map(|line| line.text.trim()).filter(|text| !text.is_empty()).collect::<Vec<_>>().join("\n")
}

/// Detected questions without scores, for submissions that contain no student answers.
pub(crate) fn question_only_results(
    questions: &[Question],
    schemes: &HashMap<String, MarkingScheme>,
) -> Vec<QuestionResult> {
    questions
        .iter()
        .map(|question| {
            let total = scheme_for(question, schemes).map_or(0.0, |scheme| f64::from(scheme.total_marks));
            QuestionResult {
                question_number: question.display_number().to_string(),
                question_text: question.text.clone(),
                score: Score::new(0.0, total),
                annotations: Vec::new(),
                student_work: String::new(),
                feedback: String::new(),
                source_pages: question.source_image_indices.clone(),
                usage_tokens: 0,
                trimmed_marks: 0,
            }
        })
        .collect()
}

/// Pins each annotation to one of its task's pages; anything else falls back to the first page.
pub(crate) fn assign_annotation_pages(results: &mut [QuestionResult]) {
    for result in results.iter_mut() {
        let Some(&first_page) = result.source_pages.first() else {
            continue;
        };
        for annotation in &mut result.annotations {
            let page = annotation.page_index.filter(|page| result.source_pages.contains(page)).unwrap_or(first_page);
            annotation.page_index = Some(page);
        }
    }
}

#[derive(Debug, Default)]
pub(crate) struct RenderOutcome {
    pub(crate) pages: Vec<AnnotatedPage>,
    pub(crate) skipped_annotations: usize,
}

/// Renders every page that carries annotations or a score summary, in page order.
pub(crate) fn render_results(pages: &[Page], results: &[QuestionResult], settings: &RenderSettings) -> RenderOutcome {
    let mut annotations_by_page: BTreeMap<usize, Vec<&Annotation>> = BTreeMap::new();
    let mut summaries: BTreeMap<usize, PageSummary> = BTreeMap::new();

    for result in results {
        for annotation in &result.annotations {
            if let Some(page) = annotation.page_index {
                annotations_by_page.entry(page).or_default().push(annotation);
            }
        }
        if let Some(&first_page) = result.source_pages.first() {
            summaries
                .entry(first_page)
                .or_default()
                .question_scores
                .push((result.question_number.clone(), result.score.clone()));
        }
    }

    if let Some((_, summary)) = summaries.iter_mut().next() {
        let awarded: f64 = results.iter().map(|result| result.score.awarded_marks).sum();
        let total: f64 = results.iter().map(|result| result.score.total_marks).sum();
        summary.overall = Some(Score::new(awarded, total));
    }

    let mut outcome = RenderOutcome::default();
    for page in pages {
        let annotations = annotations_by_page.remove(&page.index).unwrap_or_default();
        let summary = summaries.remove(&page.index).unwrap_or_default();
        if annotations.is_empty() && summary.is_empty() {
            continue;
        }

        let rendered = render::render_page(page, &annotations, &summary, settings);
        outcome.skipped_annotations += rendered.skipped;
        outcome.pages.push(AnnotatedPage {
            page_index: page.index,
            original_file_name: page.original_file_name.clone(),
            width: page.width,
            height: page.height,
            annotation_count: rendered.drawn,
            skipped_annotations: rendered.skipped,
            data_url: rendered.data_url(),
        });
    }

    for (page_index, annotations) in annotations_by_page {
        tracing::warn!(page_index, count = annotations.len(), "Annotations reference a page that does not exist");
        outcome.skipped_annotations += annotations.len();
    }

    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schemas::annotation::AnnotationAction;
    use crate::schemas::page::MathBlock;
    use crate::test_support::{png_page, tick};

    fn question(number: &str, pages: &[usize]) -> Question {
        Question {
            question_number: Some(number.to_string()),
            text: format!("Question {number}"),
            student_work: Some("main working".to_string()),
            source_image_index: pages.first().copied(),
            source_image_indices: pages.to_vec(),
            sub_questions: vec![SubQuestion {
                part: "a".to_string(),
                student_work_lines: vec![StudentWorkLine {
                    text: "x = 3".to_string(),
                    page_index: pages[0],
                    position: None,
                    id: format!("p{}_line_0", pages[0]),
                }],
                sub_questions: vec![SubQuestion { part: "i".to_string(), ..SubQuestion::default() }],
                ..SubQuestion::default()
            }],
            ..Question::default()
        }
    }

    fn result(number: &str, pages: Vec<usize>, annotations: Vec<Annotation>, score: Score) -> QuestionResult {
        QuestionResult {
            question_number: number.to_string(),
            question_text: String::new(),
            score,
            annotations,
            student_work: String::new(),
            feedback: String::new(),
            source_pages: pages,
            usage_tokens: 0,
            trimmed_marks: 0,
        }
    }

    #[test]
    fn tasks_carry_pages_ocr_and_identifiers() {
        let pages = vec![png_page(0, 20, 20), png_page(1, 20, 20), png_page(2, 20, 20)];
        let ocr = vec![
            OcrPage {
                page_index: 1,
                math_blocks: vec![MathBlock { id: Some("p1_ocr_0".to_string()), text: "x".to_string(), bbox: None }],
                text: "x = 3".to_string(),
            },
            OcrPage { page_index: 2, math_blocks: Vec::new(), text: "other".to_string() },
        ];
        let schemes = HashMap::from([(
            "4".to_string(),
            MarkingScheme { total_marks: 3, sub_question_max_scores: Default::default(), is_generic: false },
        )]);
        let mut blank = question("5", &[2]);
        blank.student_work = None;
        blank.sub_questions.clear();

        let tasks = build_tasks(
            &[question("Q4", &[1]), blank],
            &pages,
            &ocr,
            &schemes,
            &PipelineOptions::default(),
            "model-x",
        );

        assert_eq!(tasks.len(), 1);
        let task = &tasks[0];
        assert_eq!(task.question_number, "Q4");
        assert_eq!(task.scheme.as_ref().map(|s| s.total_marks), Some(3));
        assert_eq!(task.ocr_text, "x = 3");
        assert_eq!(task.block_ids, vec!["p1_ocr_0", "p1_line_0"]);
        assert_eq!(task.sub_question_parts, vec!["a", "a(i)"]);
        assert_eq!(task.images.len(), 1);
        assert_eq!(task.images[0].page_index, 1);
        assert_eq!(task.student_work, "main working\n(a) x = 3");
        assert_eq!(task.model, "model-x");
    }

    #[test]
    fn annotations_fall_back_to_first_task_page() {
        let mut stray = tick("A1", None);
        stray.page_index = Some(9);
        let mut on_second = tick("M1", None);
        on_second.page_index = Some(4);
        let mut missing = tick("B1", None);
        missing.page_index = None;

        let mut results = vec![result("1", vec![3, 4], vec![stray, on_second, missing], Score::new(3.0, 3.0))];
        assign_annotation_pages(&mut results);

        let pages: Vec<_> = results[0].annotations.iter().map(|a| a.page_index).collect();
        assert_eq!(pages, vec![Some(3), Some(4), Some(3)]);
    }

    #[test]
    fn renders_only_pages_with_marks_and_puts_overall_on_first() {
        let pages = vec![png_page(0, 200, 300), png_page(1, 200, 300), png_page(2, 200, 300)];
        let mut mark = tick("M1", None);
        mark.page_index = Some(2);
        let mut broken = tick("A1", None);
        broken.action = AnnotationAction::Unknown;
        broken.page_index = Some(2);

        let results = vec![
            result("1", vec![1], Vec::new(), Score::new(2.0, 4.0)),
            result("2", vec![2], vec![mark, broken], Score::new(1.0, 2.0)),
        ];
        let outcome = render_results(&pages, &results, &RenderSettings::default());

        let rendered: Vec<_> = outcome.pages.iter().map(|page| page.page_index).collect();
        assert_eq!(rendered, vec![1, 2]);
        assert_eq!(outcome.pages[1].annotation_count, 1);
        assert_eq!(outcome.skipped_annotations, 1);
        assert!(outcome.pages.iter().all(|page| page.data_url.starts_with("data:image/svg+xml;base64,")));
    }

    #[test]
    fn question_only_results_have_no_marks() {
        let results = question_only_results(&[question("3", &[0])], &HashMap::new());
        assert_eq!(results[0].score.score_text, "0/0");
        assert!(results[0].annotations.is_empty());
    }
}
