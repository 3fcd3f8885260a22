//! Reorders physical pages into logical question order and rewrites every page reference.

use std::collections::{BTreeSet, HashMap};

use thiserror::Error;

use crate::marking::identifiers::{self, OCR_BLOCK_KIND};
use crate::marking::order_key::OrderKey;
use crate::schemas::page::{OcrPage, Page, PageClassification};
use crate::schemas::question::{Question, QuestionFragment, StudentWorkLine, SubQuestion};

/// Everything in a submission that refers to pages by index.
#[derive(Debug, Clone, Default)]
pub(crate) struct PageLayout {
    pub(crate) pages: Vec<Page>,
    pub(crate) classifications: Vec<PageClassification>,
    pub(crate) questions: Vec<Question>,
    pub(crate) ocr_pages: Vec<OcrPage>,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub(crate) enum ReindexError {
    #[error("page {page_index} ({file_name}) could not be matched to any question")]
    Unresolved { page_index: usize, file_name: String },
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
enum PageKey {
    Resolved(OrderKey),
    Unresolved,
}

/// Sorts pages as front matter first, then by logical key, ties by upload position.
///
/// With `strict_integrity` set (a known past-paper scheme is in use), a content page that no
/// question claims aborts the run instead of falling back to upload order.
pub(crate) fn reindex(layout: PageLayout, strict_integrity: bool) -> Result<PageLayout, ReindexError> {
    let keys = page_keys(&layout.questions);
    let front_matter: BTreeSet<usize> = layout
        .classifications
        .iter()
        .filter(|classification| classification.category.is_front_matter())
        .map(|classification| classification.page_index)
        .collect();

    let mut ranked: Vec<(bool, PageKey, usize, usize)> = Vec::with_capacity(layout.pages.len());
    for page in &layout.pages {
        let is_front = front_matter.contains(&page.index);
        let key = match keys.get(&page.index) {
            Some(key) => PageKey::Resolved(key.clone()),
            None if is_front => PageKey::Unresolved,
            None if strict_integrity => {
                tracing::error!(
                    page_index = page.index,
                    file_name = %page.original_file_name,
                    "Unresolved page under a known mark scheme"
                );
                return Err(ReindexError::Unresolved {
                    page_index: page.index,
                    file_name: page.original_file_name.clone(),
                });
            }
            None => {
                tracing::warn!(page_index = page.index, "Page has no question key, keeping upload order");
                PageKey::Unresolved
            }
        };
        ranked.push((!is_front, key, page.original_upload_index, page.index));
    }
    ranked.sort();

    let mapping: HashMap<usize, usize> =
        ranked.iter().enumerate().map(|(new_index, (_, _, _, old_index))| (*old_index, new_index)).collect();
    let moved = mapping.iter().filter(|(old, new)| old != new).count();
    tracing::debug!(pages = mapping.len(), moved, "Computed logical page order");

    Ok(apply_mapping(layout, &mapping))
}

/// Deepest key wins per page; among equally deep keys the smallest.
fn page_keys(questions: &[Question]) -> HashMap<usize, OrderKey> {
    let mut keys: HashMap<usize, OrderKey> = HashMap::new();

    for question in questions {
        let Some(key) = question.question_number.as_deref().and_then(OrderKey::parse) else {
            continue;
        };
        contribute(&mut keys, &key, question.own_pages());
        for sub in &question.sub_questions {
            collect_sub_keys(&mut keys, &key, sub);
        }
    }

    keys
}

fn collect_sub_keys(keys: &mut HashMap<usize, OrderKey>, parent: &OrderKey, sub: &SubQuestion) {
    let key = parent.child(&sub.part);
    contribute(keys, &key, sub.own_pages());
    for child in &sub.sub_questions {
        collect_sub_keys(keys, &key, child);
    }
}

fn contribute(keys: &mut HashMap<usize, OrderKey>, key: &OrderKey, pages: BTreeSet<usize>) {
    for page in pages {
        keys.entry(page)
            .and_modify(|current| {
                let deeper = key.depth() > current.depth();
                let same_depth_smaller = key.depth() == current.depth() && key < current;
                if deeper || same_depth_smaller {
                    *current = key.clone();
                }
            })
            .or_insert_with(|| key.clone());
    }
}

fn remap(mapping: &HashMap<usize, usize>, old: usize) -> usize {
    mapping.get(&old).copied().unwrap_or(old)
}

fn apply_mapping(layout: PageLayout, mapping: &HashMap<usize, usize>) -> PageLayout {
    let mut pages: Vec<Page> = layout
        .pages
        .into_iter()
        .map(|page| Page { index: remap(mapping, page.index), ..page })
        .collect();
    pages.sort_by_key(|page| page.index);

    let mut classifications: Vec<PageClassification> = layout
        .classifications
        .into_iter()
        .map(|classification| PageClassification {
            page_index: remap(mapping, classification.page_index),
            questions: classification.questions.into_iter().map(|fragment| remap_fragment(fragment, mapping)).collect(),
            ..classification
        })
        .collect();
    classifications.sort_by_key(|classification| classification.page_index);

    let questions = layout.questions.into_iter().map(|question| remap_question(question, mapping)).collect();

    let mut ocr_pages: Vec<OcrPage> = layout.ocr_pages.into_iter().map(|page| remap_ocr_page(page, mapping)).collect();
    ocr_pages.sort_by_key(|page| page.page_index);

    PageLayout { pages, classifications, questions, ocr_pages }
}

fn remap_pages(pages: Vec<usize>, mapping: &HashMap<usize, usize>) -> Vec<usize> {
    pages.into_iter().map(|page| remap(mapping, page)).collect::<BTreeSet<_>>().into_iter().collect()
}

fn remap_line(line: StudentWorkLine, mapping: &HashMap<usize, usize>) -> StudentWorkLine {
    let page_index = remap(mapping, line.page_index);
    let id = identifiers::with_page(&line.id, page_index);
    StudentWorkLine { page_index, id, ..line }
}

fn remap_lines(lines: Vec<StudentWorkLine>, mapping: &HashMap<usize, usize>) -> Vec<StudentWorkLine> {
    lines.into_iter().map(|line| remap_line(line, mapping)).collect()
}

fn remap_sub_question(sub: SubQuestion, mapping: &HashMap<usize, usize>) -> SubQuestion {
    SubQuestion {
        page_index: sub.page_index.map(|page| remap(mapping, page)),
        page_indices: remap_pages(sub.page_indices, mapping),
        student_work_lines: remap_lines(sub.student_work_lines, mapping),
        sub_questions: sub.sub_questions.into_iter().map(|child| remap_sub_question(child, mapping)).collect(),
        ..sub
    }
}

fn remap_question(question: Question, mapping: &HashMap<usize, usize>) -> Question {
    let source_image_indices = remap_pages(question.source_image_indices, mapping);
    Question {
        source_image_index: source_image_indices
            .first()
            .copied()
            .or_else(|| question.source_image_index.map(|page| remap(mapping, page))),
        source_image_indices,
        student_work_lines: remap_lines(question.student_work_lines, mapping),
        sub_questions: question.sub_questions.into_iter().map(|sub| remap_sub_question(sub, mapping)).collect(),
        ..question
    }
}

fn remap_fragment(fragment: QuestionFragment, mapping: &HashMap<usize, usize>) -> QuestionFragment {
    QuestionFragment {
        page_index: remap(mapping, fragment.page_index),
        student_work_lines: remap_lines(fragment.student_work_lines, mapping),
        sub_questions: fragment.sub_questions.into_iter().map(|sub| remap_sub_question(sub, mapping)).collect(),
        ..fragment
    }
}

/// Pre-tagged block ids keep their suffix; anything else is regenerated from its position.
fn remap_ocr_page(page: OcrPage, mapping: &HashMap<usize, usize>) -> OcrPage {
    let page_index = remap(mapping, page.page_index);
    let math_blocks = page
        .math_blocks
        .into_iter()
        .enumerate()
        .map(|(position, mut block)| {
            let id = match block.id.as_deref() {
                Some(id) if identifiers::page_of(id).is_some() => identifiers::with_page(id, page_index),
                _ => identifiers::encode(page_index, OCR_BLOCK_KIND, position),
            };
            block.id = Some(id);
            block
        })
        .collect();

    OcrPage { page_index, math_blocks, ..page }
}
