//! Annotation Overlay Renderer: draws marking annotations and score summaries over a page scan.
//!
//! The overlay is not flattened into the raster. Output is an SVG document that embeds the page
//! scan as its background image and draws every annotation as vector elements on top of it.

pub(crate) mod layout;
pub(crate) mod svg;

use crate::core::config::RenderSettings;
use crate::schemas::annotation::{Annotation, AnnotationAction, BoundingBox};
use crate::schemas::marking::Score;
use crate::schemas::page::Page;
use crate::services::http::encode_base64;

use layout::{Anchor, Metrics, ReasoningPlacement};
use svg::{SvgDocument, INK, SUMMARY_INK};

/// Scores pinned to the top-right corner of one page.
#[derive(Debug, Clone, Default)]
pub(crate) struct PageSummary {
    pub(crate) question_scores: Vec<(String, Score)>,
    pub(crate) overall: Option<Score>,
}

impl PageSummary {
    pub(crate) fn is_empty(&self) -> bool {
        self.question_scores.is_empty() && self.overall.is_none()
    }
}

#[derive(Debug, Clone)]
pub(crate) struct RenderedPage {
    pub(crate) svg: String,
    pub(crate) drawn: usize,
    pub(crate) skipped: usize,
}

impl RenderedPage {
    pub(crate) fn data_url(&self) -> String {
        format!("data:image/svg+xml;base64,{}", encode_base64(self.svg.as_bytes()))
    }
}

/// Renders one page. Malformed annotations are skipped and counted; the rest still render.
pub(crate) fn render_page(
    page: &Page,
    annotations: &[&Annotation],
    summary: &PageSummary,
    settings: &RenderSettings,
) -> RenderedPage {
    let metrics = Metrics::new(page.width, page.height, settings.reference_height);
    let mut doc =
        SvgDocument::new(page.width, page.height).with_background(&page.mime_type, &encode_base64(&page.image));

    let mut drawn_boxes: Vec<BoundingBox> = Vec::with_capacity(annotations.len());
    let mut skipped = 0usize;

    for annotation in annotations {
        let Some(bbox) = drawable_box(annotation, page) else {
            skipped += 1;
            tracing::warn!(
                page_index = page.index,
                action = ?annotation.action,
                bbox = ?annotation.bbox,
                "Skipping annotation that cannot be drawn"
            );
            continue;
        };

        let y_offset = layout::duplicate_offset(&drawn_boxes, &bbox, &metrics);
        draw_annotation(&mut doc, annotation, &bbox, y_offset, settings.reasoning_wrap_chars, &metrics);
        drawn_boxes.push(bbox);
    }

    draw_summary(&mut doc, summary, &metrics);

    if skipped > 0 {
        metrics::counter!("annotations_skipped_total").increment(skipped as u64);
    }

    RenderedPage { svg: doc.finish(), drawn: drawn_boxes.len(), skipped }
}

fn drawable_box(annotation: &Annotation, page: &Page) -> Option<BoundingBox> {
    if annotation.action == AnnotationAction::Unknown {
        return None;
    }
    let bbox = annotation.bounding_box()?;
    if bbox.x >= f64::from(page.width) || bbox.y >= f64::from(page.height) || bbox.right() <= 0.0 || bbox.bottom() <= 0.0
    {
        tracing::debug!(page_index = page.index, "Annotation box lies outside the page, clamping");
    }
    Some(bbox.clamped_to(f64::from(page.width), f64::from(page.height)))
}

fn label_text(annotation: &Annotation) -> String {
    [annotation.text_str(), annotation.classification.as_deref().map(str::trim).unwrap_or("")]
        .into_iter()
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

fn draw_annotation(
    doc: &mut SvgDocument,
    annotation: &Annotation,
    bbox: &BoundingBox,
    y_offset: f64,
    wrap_chars: usize,
    metrics: &Metrics,
) {
    let bbox = &layout::effective_box(bbox, y_offset, metrics);
    let label = label_text(annotation);
    let placement = layout::place_label(bbox, &label, y_offset, metrics);
    let stroke = metrics.stroke_width();
    let size = metrics.symbol_size();
    let (sx, sy) = (placement.symbol_x, placement.symbol_y);

    match annotation.action {
        AnnotationAction::Tick => {
            doc.polyline(
                &[(sx, sy + 0.55 * size), (sx + 0.35 * size, sy + 0.9 * size), (sx + size, sy + 0.1 * size)],
                stroke,
                INK,
            );
        }
        AnnotationAction::Cross => {
            doc.line((sx, sy), (sx + size, sy + size), stroke, INK);
            doc.line((sx + size, sy), (sx, sy + size), stroke, INK);
        }
        AnnotationAction::Circle => {
            let padding = metrics.padding();
            doc.ellipse(
                (bbox.x + bbox.width / 2.0, bbox.center_y() + y_offset),
                (bbox.width / 2.0 + padding, bbox.height / 2.0 + padding),
                stroke,
                INK,
            );
        }
        AnnotationAction::Underline => {
            let y = (bbox.bottom() + y_offset + stroke).min(metrics.page_height - stroke);
            doc.line((bbox.x, y), (bbox.right(), y), stroke, INK);
        }
        AnnotationAction::Write | AnnotationAction::Unknown => {}
    }

    if !label.is_empty() {
        doc.text(placement.text_x, placement.baseline, metrics.font_size(), placement.anchor, INK, &label);
    }

    let reasoning = annotation.reasoning.as_deref().map(str::trim).unwrap_or("");
    if annotation.action == AnnotationAction::Cross && !reasoning.is_empty() {
        let font = metrics.reasoning_font_size();
        match layout::place_reasoning(bbox, &placement, reasoning, wrap_chars, y_offset, metrics) {
            ReasoningPlacement::Inline { x, baseline, anchor, text } => {
                doc.text(x, baseline, font, anchor, INK, &text);
            }
            ReasoningPlacement::Block { x, first_baseline, lines } => {
                for (idx, line) in lines.iter().enumerate() {
                    let baseline = first_baseline + idx as f64 * metrics.line_height();
                    doc.text(x, baseline, font, Anchor::Start, INK, line);
                }
            }
        }
    }
}

fn draw_summary(doc: &mut SvgDocument, summary: &PageSummary, metrics: &Metrics) {
    if summary.is_empty() {
        return;
    }

    let slots = layout::summary_slots(summary.question_scores.len() + usize::from(summary.overall.is_some()), metrics);
    let radius = metrics.summary_radius();
    let font = metrics.font_size();
    let stroke = metrics.stroke_width();

    for ((label, score), (cx, cy)) in summary.question_scores.iter().zip(&slots) {
        doc.ellipse((*cx, *cy), (radius, radius), stroke, SUMMARY_INK);
        doc.text(*cx, cy + font / 3.0, font * 0.8, Anchor::Middle, SUMMARY_INK, &score.score_text);
        doc.text(cx - radius - metrics.padding(), cy + font / 3.0, font * 0.7, Anchor::End, SUMMARY_INK, &format!("Q{label}"));
    }

    if let (Some(overall), Some((cx, cy))) = (&summary.overall, slots.last()) {
        let baseline = cy + font / 3.0;
        doc.text(*cx, baseline, font * 1.1, Anchor::Middle, SUMMARY_INK, &overall.score_text);
        let half = radius * 1.1;
        let first = baseline + stroke * 2.5;
        doc.line((cx - half, first), (cx + half, first), stroke, SUMMARY_INK);
        doc.line((cx - half, first + stroke * 2.5), (cx + half, first + stroke * 2.5), stroke, SUMMARY_INK);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::png_page;

    fn annotation(action: AnnotationAction, bbox: Option<Vec<f64>>, text: &str) -> Annotation {
        Annotation {
            bbox,
            action,
            text: Some(text.to_string()),
            reasoning: None,
            sub_question: None,
            classification: None,
            page_index: Some(0),
            source_position_confidence: None,
        }
    }

    #[test]
    fn skips_malformed_annotations_and_renders_the_rest() {
        let page = png_page(0, 400, 600);
        let good = annotation(AnnotationAction::Tick, Some(vec![20.0, 40.0, 100.0, 30.0]), "M1");
        let short = annotation(AnnotationAction::Tick, Some(vec![20.0, 40.0]), "A1");
        let unknown = annotation(AnnotationAction::Unknown, Some(vec![20.0, 40.0, 10.0, 10.0]), "?");

        let rendered = render_page(&page, &[&good, &short, &unknown], &PageSummary::default(), &RenderSettings::default());

        assert_eq!(rendered.drawn, 1);
        assert_eq!(rendered.skipped, 2);
        assert!(rendered.svg.contains(">M1</text>"));
        assert!(!rendered.svg.contains(">A1</text>"));
    }

    #[test]
    fn out_of_bounds_boxes_are_clamped_onto_the_page() {
        let page = png_page(0, 400, 600);
        let far = annotation(AnnotationAction::Circle, Some(vec![900.0, 50.0, 100.0, 40.0]), "");
        let rendered = render_page(&page, &[&far], &PageSummary::default(), &RenderSettings::default());
        assert_eq!(rendered.drawn, 1);
        assert!(rendered.svg.contains(r#"cx="350""#));
    }

    #[test]
    fn cross_reasoning_is_escaped_and_rendered() {
        let page = png_page(0, 800, 1200);
        let mut cross = annotation(AnnotationAction::Cross, Some(vec![50.0, 100.0, 200.0, 40.0]), "A0");
        cross.reasoning = Some("x < 0 & root dropped".to_string());

        let rendered = render_page(&page, &[&cross], &PageSummary::default(), &RenderSettings::default());
        assert!(rendered.svg.contains("x &lt; 0 &amp; root dropped"));
    }

    #[test]
    fn summary_draws_question_circles_and_overall_score() {
        let page = png_page(0, 800, 1200);
        let summary = PageSummary {
            question_scores: vec![("1".to_string(), Score::new(3.0, 4.0)), ("2".to_string(), Score::new(1.0, 2.0))],
            overall: Some(Score::new(4.0, 6.0)),
        };

        let rendered = render_page(&page, &[], &summary, &RenderSettings::default());
        assert_eq!(rendered.svg.matches("<ellipse").count(), 2);
        assert!(rendered.svg.contains(">3/4</text>"));
        assert!(rendered.svg.contains(">Q2</text>"));
        assert!(rendered.svg.contains(">4/6</text>"));
        assert_eq!(rendered.svg.matches("<line").count(), 2);
    }

    #[test]
    fn underline_near_page_bottom_stays_above_margin() {
        let page = png_page(0, 400, 2339);
        let low = annotation(AnnotationAction::Underline, Some(vec![20.0, 2300.0, 100.0, 39.0]), "");

        let rendered = render_page(&page, &[&low], &PageSummary::default(), &RenderSettings::default());
        assert!(rendered.svg.contains(r#"<line x1="20" y1="2313" x2="120" y2="2313""#));
    }

    #[test]
    fn data_url_is_base64_svg() {
        let page = png_page(0, 10, 10);
        let rendered = render_page(&page, &[], &PageSummary::default(), &RenderSettings::default());
        assert!(rendered.data_url().starts_with("data:image/svg+xml;base64,"));
    }
}
