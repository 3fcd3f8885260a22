//! Geometry for annotation labels, reasoning text and the page summary, in page pixels.

use crate::schemas::annotation::BoundingBox;

/// Sizes at the reference page height; everything is multiplied by [`Metrics::scale`].
const FONT_SIZE: f64 = 40.0;
const REASONING_FONT_SIZE: f64 = 32.0;
const SYMBOL_SIZE: f64 = 44.0;
const PADDING: f64 = 12.0;
const MARGIN: f64 = 30.0;
const STROKE_WIDTH: f64 = 4.0;
const DUPLICATE_STEP: f64 = 48.0;
const SUMMARY_RADIUS: f64 = 58.0;
const SUMMARY_GAP: f64 = 24.0;
/// Average glyph advance as a fraction of the font size.
const GLYPH_WIDTH: f64 = 0.55;

#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct Metrics {
    pub(crate) scale: f64,
    pub(crate) page_width: f64,
    pub(crate) page_height: f64,
}

impl Metrics {
    pub(crate) fn new(page_width: u32, page_height: u32, reference_height: f64) -> Self {
        let page_height = f64::from(page_height);
        let scale = if reference_height > 0.0 && page_height > 0.0 { page_height / reference_height } else { 1.0 };
        Self { scale, page_width: f64::from(page_width), page_height }
    }

    pub(crate) fn font_size(&self) -> f64 {
        FONT_SIZE * self.scale
    }

    pub(crate) fn reasoning_font_size(&self) -> f64 {
        REASONING_FONT_SIZE * self.scale
    }

    pub(crate) fn symbol_size(&self) -> f64 {
        SYMBOL_SIZE * self.scale
    }

    pub(crate) fn padding(&self) -> f64 {
        PADDING * self.scale
    }

    pub(crate) fn margin(&self) -> f64 {
        MARGIN * self.scale
    }

    pub(crate) fn stroke_width(&self) -> f64 {
        STROKE_WIDTH * self.scale
    }

    pub(crate) fn line_height(&self) -> f64 {
        self.reasoning_font_size() * 1.25
    }

    pub(crate) fn duplicate_step(&self) -> f64 {
        DUPLICATE_STEP * self.scale
    }

    pub(crate) fn summary_radius(&self) -> f64 {
        SUMMARY_RADIUS * self.scale
    }

    fn text_width(&self, text: &str, font_size: f64) -> f64 {
        text.chars().count() as f64 * font_size * GLYPH_WIDTH
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Anchor {
    Start,
    Middle,
    End,
}

impl Anchor {
    pub(crate) fn as_svg(self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Middle => "middle",
            Self::End => "end",
        }
    }
}

/// Symbol box plus label text position beside an annotation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct LabelPlacement {
    pub(crate) symbol_x: f64,
    pub(crate) symbol_y: f64,
    pub(crate) text_x: f64,
    pub(crate) baseline: f64,
    pub(crate) anchor: Anchor,
    /// Horizontal extent of symbol plus label, `(left, right)`.
    pub(crate) extent: (f64, f64),
}

impl LabelPlacement {
    pub(crate) fn flipped(&self) -> bool {
        self.anchor == Anchor::End
    }
}

/// Places the label right of the box, or mirrors it to the left when it would overflow.
pub(crate) fn place_label(bbox: &BoundingBox, label: &str, y_offset: f64, metrics: &Metrics) -> LabelPlacement {
    let symbol = metrics.symbol_size();
    let padding = metrics.padding();
    let label_width = if label.is_empty() { 0.0 } else { padding + metrics.text_width(label, metrics.font_size()) };
    let total_width = symbol + label_width;

    let center_y = bbox.center_y() + y_offset;
    let symbol_y = center_y - symbol / 2.0;
    let baseline = center_y + metrics.font_size() / 3.0;

    let right_start = bbox.right() + padding;
    if right_start + total_width <= metrics.page_width - metrics.margin() {
        return LabelPlacement {
            symbol_x: right_start,
            symbol_y,
            text_x: right_start + symbol + padding,
            baseline,
            anchor: Anchor::Start,
            extent: (right_start, right_start + total_width),
        };
    }

    let symbol_x = (bbox.x - padding - symbol).max(0.0);
    LabelPlacement {
        symbol_x,
        symbol_y,
        text_x: symbol_x - padding,
        baseline,
        anchor: Anchor::End,
        extent: (symbol_x - label_width, symbol_x + symbol),
    }
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum ReasoningPlacement {
    Inline { x: f64, baseline: f64, anchor: Anchor, text: String },
    Block { x: f64, first_baseline: f64, lines: Vec<String> },
}

/// `bbox` with its height clamped so the shape drawn for it ends above the bottom margin.
pub(crate) fn effective_box(bbox: &BoundingBox, y_offset: f64, metrics: &Metrics) -> BoundingBox {
    let bottom_limit = metrics.page_height - metrics.margin();
    let height = (bottom_limit - bbox.y - y_offset).clamp(0.0, bbox.height);
    BoundingBox { height, ..*bbox }
}

/// Short reasoning sits beside the label; longer text wraps below the box, or above it when
/// the box is too close to the bottom edge.
pub(crate) fn place_reasoning(
    bbox: &BoundingBox,
    label: &LabelPlacement,
    reasoning: &str,
    wrap_chars: usize,
    y_offset: f64,
    metrics: &Metrics,
) -> ReasoningPlacement {
    let reasoning = reasoning.split_whitespace().collect::<Vec<_>>().join(" ");
    let font = metrics.reasoning_font_size();
    let padding = metrics.padding();
    let width = metrics.text_width(&reasoning, font);

    if reasoning.chars().count() <= wrap_chars {
        let fits = if label.flipped() {
            label.extent.0 - padding - width >= metrics.margin()
        } else {
            label.extent.1 + padding + width <= metrics.page_width - metrics.margin()
        };
        if fits {
            let (x, anchor) = if label.flipped() {
                (label.extent.0 - padding, Anchor::End)
            } else {
                (label.extent.1 + padding, Anchor::Start)
            };
            return ReasoningPlacement::Inline { x, baseline: label.baseline, anchor, text: reasoning };
        }
    }

    let lines = wrap_words(&reasoning, wrap_chars);
    let line_height = metrics.line_height();
    let block_height = lines.len() as f64 * line_height;
    let block_width = lines.iter().map(|line| metrics.text_width(line, font)).fold(0.0, f64::max);
    let x = bbox.x.min(metrics.page_width - metrics.margin() - block_width).max(metrics.margin().min(bbox.x));

    let bottom_limit = metrics.page_height - metrics.margin();
    let below_top = bbox.bottom() + y_offset + padding;
    if below_top + block_height <= bottom_limit {
        return ReasoningPlacement::Block { x, first_baseline: below_top + font, lines };
    }

    let above_top = (bbox.y + y_offset - padding - block_height).max(0.0);
    ReasoningPlacement::Block { x, first_baseline: above_top + font, lines }
}

/// Greedy word wrap near `target` characters. Words longer than the target get a line each.
pub(crate) fn wrap_words(text: &str, target: usize) -> Vec<String> {
    let target = target.max(1);
    let mut lines = Vec::new();
    let mut current = String::new();

    for word in text.split_whitespace() {
        if current.is_empty() {
            current.push_str(word);
        } else if current.chars().count() + 1 + word.chars().count() <= target {
            current.push(' ');
            current.push_str(word);
        } else {
            lines.push(std::mem::take(&mut current));
            current.push_str(word);
        }
    }
    if !current.is_empty() {
        lines.push(current);
    }
    lines
}

/// Vertical offset for an annotation whose box repeats one already drawn on the page.
pub(crate) fn duplicate_offset(drawn: &[BoundingBox], bbox: &BoundingBox, metrics: &Metrics) -> f64 {
    let tolerance = metrics.padding();
    let duplicates = drawn.iter().filter(|other| other.approx_eq(bbox, tolerance)).count();
    duplicates as f64 * metrics.duplicate_step()
}

/// Centres of the stacked score circles in the top-right corner.
pub(crate) fn summary_slots(count: usize, metrics: &Metrics) -> Vec<(f64, f64)> {
    let radius = metrics.summary_radius();
    let step = 2.0 * radius + SUMMARY_GAP * metrics.scale;
    let x = metrics.page_width - metrics.margin() - radius;
    (0..count).map(|idx| (x, metrics.margin() + radius + idx as f64 * step)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metrics() -> Metrics {
        Metrics::new(1654, 2339, 2339.0)
    }

    fn bbox(x: f64, y: f64, width: f64, height: f64) -> BoundingBox {
        BoundingBox { x, y, width, height }
    }

    #[test]
    fn scale_follows_page_height() {
        let half = Metrics::new(827, 1169, 2339.0);
        assert!((half.scale - 0.4998).abs() < 0.001);
        assert!((half.font_size() - 20.0).abs() < 0.1);
        assert_eq!(metrics().scale, 1.0);
    }

    #[test]
    fn label_sits_right_of_box_when_it_fits() {
        let placement = place_label(&bbox(100.0, 200.0, 300.0, 60.0), "M1", 0.0, &metrics());
        assert_eq!(placement.anchor, Anchor::Start);
        assert!(placement.symbol_x > 400.0);
        assert!(placement.text_x > placement.symbol_x);
    }

    #[test]
    fn label_flips_left_near_right_margin() {
        let placement = place_label(&bbox(1300.0, 200.0, 320.0, 60.0), "A1 accuracy", 0.0, &metrics());
        assert!(placement.flipped());
        assert!(placement.symbol_x < 1300.0);
        assert!(placement.text_x < placement.symbol_x);
        assert!(placement.extent.1 <= 1300.0);
    }

    #[test]
    fn wraps_at_word_boundaries() {
        let lines = wrap_words("the gradient was taken from the wrong pair of points", 20);
        assert_eq!(lines, vec!["the gradient was", "taken from the wrong", "pair of points"]);
        assert!(lines.iter().all(|line| line.len() <= 20));
        assert_eq!(wrap_words("supercalifragilistic x", 5), vec!["supercalifragilistic", "x"]);
    }

    #[test]
    fn short_reasoning_goes_inline() {
        let m = metrics();
        let target = bbox(100.0, 300.0, 200.0, 50.0);
        let label = place_label(&target, "M0", 0.0, &m);
        let placement = place_reasoning(&target, &label, "sign error", 36, 0.0, &m);
        assert!(matches!(placement, ReasoningPlacement::Inline { anchor: Anchor::Start, .. }));
    }

    #[test]
    fn long_reasoning_wraps_below_box() {
        let m = metrics();
        let target = bbox(100.0, 300.0, 200.0, 50.0);
        let label = place_label(&target, "", 0.0, &m);
        let text = "the second line of working divides by the wrong factor so the answer is out";
        match place_reasoning(&target, &label, text, 36, 0.0, &m) {
            ReasoningPlacement::Block { first_baseline, lines, .. } => {
                assert!(first_baseline > target.bottom());
                assert!(lines.len() >= 2);
            }
            other => panic!("expected block placement, got {other:?}"),
        }
    }

    #[test]
    fn reasoning_flips_above_box_near_page_bottom() {
        let m = metrics();
        let target = bbox(100.0, 2250.0, 200.0, 200.0);
        let label = place_label(&target, "", 0.0, &m);
        let text = "the final line drops the negative root entirely which loses the accuracy mark";
        match place_reasoning(&target, &label, text, 36, 0.0, &m) {
            ReasoningPlacement::Block { first_baseline, lines, .. } => {
                let last_baseline = first_baseline + (lines.len() - 1) as f64 * m.line_height();
                assert!(last_baseline < target.y);
                assert!(first_baseline > 0.0);
            }
            other => panic!("expected block placement, got {other:?}"),
        }
    }

    #[test]
    fn effective_box_stops_at_bottom_margin() {
        let m = metrics();
        let limit = m.page_height - m.margin();

        let low = effective_box(&bbox(100.0, limit - 20.0, 200.0, 200.0), 0.0, &m);
        assert!((low.height - 20.0).abs() < 1e-9);
        assert!((low.bottom() - limit).abs() < 1e-9);

        let stacked = effective_box(&bbox(100.0, limit - 20.0, 200.0, 200.0), 15.0, &m);
        assert!((stacked.height - 5.0).abs() < 1e-9);

        let clear = bbox(100.0, 100.0, 200.0, 50.0);
        assert_eq!(effective_box(&clear, 0.0, &m), clear);
    }

    #[test]
    fn duplicate_boxes_stack() {
        let m = metrics();
        let first = bbox(100.0, 100.0, 50.0, 50.0);
        let drawn = vec![first, bbox(102.0, 101.0, 50.0, 50.0), bbox(600.0, 100.0, 50.0, 50.0)];
        assert_eq!(duplicate_offset(&drawn[..0], &first, &m), 0.0);
        assert_eq!(duplicate_offset(&drawn, &first, &m), 2.0 * m.duplicate_step());
    }

    #[test]
    fn summary_slots_stack_in_top_right() {
        let m = metrics();
        let slots = summary_slots(3, &m);
        assert_eq!(slots.len(), 3);
        assert!(slots.iter().all(|(x, _)| *x > m.page_width / 2.0));
        assert!(slots[0].1 < slots[1].1 && slots[1].1 < slots[2].1);
    }
}
