use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub(crate) enum AnnotationAction {
    Tick,
    Cross,
    Circle,
    Underline,
    Write,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct Annotation {
    /// `[x, y, width, height]` in page pixels. Kept loose so malformed boxes survive decoding and
    /// are rejected at render time instead of failing the whole marking response.
    #[serde(default)]
    pub(crate) bbox: Option<Vec<f64>>,
    pub(crate) action: AnnotationAction,
    #[serde(default)]
    pub(crate) text: Option<String>,
    #[serde(default)]
    pub(crate) reasoning: Option<String>,
    #[serde(default)]
    pub(crate) sub_question: Option<String>,
    #[serde(default)]
    pub(crate) classification: Option<String>,
    #[serde(default)]
    pub(crate) page_index: Option<usize>,
    #[serde(default)]
    pub(crate) source_position_confidence: Option<f64>,
}

impl Annotation {
    pub(crate) fn bounding_box(&self) -> Option<BoundingBox> {
        match self.bbox.as_deref() {
            Some([x, y, width, height]) => {
                let candidate = BoundingBox { x: *x, y: *y, width: *width, height: *height };
                candidate.is_valid().then_some(candidate)
            }
            _ => None,
        }
    }

    pub(crate) fn text_str(&self) -> &str {
        self.text.as_deref().map(str::trim).unwrap_or("")
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct BoundingBox {
    pub(crate) x: f64,
    pub(crate) y: f64,
    pub(crate) width: f64,
    pub(crate) height: f64,
}

impl BoundingBox {
    pub(crate) fn is_valid(&self) -> bool {
        [self.x, self.y, self.width, self.height].iter().all(|value| value.is_finite())
            && self.width > 0.0
            && self.height > 0.0
    }

    pub(crate) fn right(&self) -> f64 {
        self.x + self.width
    }

    pub(crate) fn bottom(&self) -> f64 {
        self.y + self.height
    }

    pub(crate) fn center_y(&self) -> f64 {
        self.y + self.height / 2.0
    }

    /// Moves (and if necessary shrinks) the box so it lies entirely on a page of the given size.
    pub(crate) fn clamped_to(&self, page_width: f64, page_height: f64) -> Self {
        let width = self.width.min(page_width);
        let height = self.height.min(page_height);
        let x = self.x.clamp(0.0, (page_width - width).max(0.0));
        let y = self.y.clamp(0.0, (page_height - height).max(0.0));
        Self { x, y, width, height }
    }

    pub(crate) fn approx_eq(&self, other: &Self, tolerance: f64) -> bool {
        (self.x - other.x).abs() <= tolerance
            && (self.y - other.y).abs() <= tolerance
            && (self.width - other.width).abs() <= tolerance
            && (self.height - other.height).abs() <= tolerance
    }
}
