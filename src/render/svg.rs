//! Minimal SVG markup writer for the annotation layer.

use crate::render::layout::Anchor;

pub(crate) const INK: &str = "#d0021b";
pub(crate) const SUMMARY_INK: &str = "#1f4fbf";
const FONT_FAMILY: &str = "Helvetica, Arial, sans-serif";

pub(crate) fn escape(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&apos;"),
            c if c.is_control() && c != '\n' && c != '\t' => {}
            c => escaped.push(c),
        }
    }
    escaped
}

fn num(value: f64) -> String {
    let rounded = (value * 100.0).round() / 100.0;
    if rounded.fract() == 0.0 {
        format!("{}", rounded as i64)
    } else {
        format!("{rounded}")
    }
}

#[derive(Debug, Default)]
pub(crate) struct SvgDocument {
    width: u32,
    height: u32,
    background: Option<String>,
    elements: Vec<String>,
}

impl SvgDocument {
    pub(crate) fn new(width: u32, height: u32) -> Self {
        Self { width, height, ..Self::default() }
    }

    /// Embeds the page raster underneath every other element.
    pub(crate) fn with_background(mut self, mime_type: &str, base64_data: &str) -> Self {
        self.background = Some(format!(
            r#"<image x="0" y="0" width="{w}" height="{h}" preserveAspectRatio="none" href="data:{mime};base64,{data}"/>"#,
            w = self.width,
            h = self.height,
            mime = escape(mime_type),
            data = base64_data,
        ));
        self
    }

    pub(crate) fn text(&mut self, x: f64, y: f64, size: f64, anchor: Anchor, color: &str, content: &str) {
        self.elements.push(format!(
            r#"<text x="{}" y="{}" font-size="{}" text-anchor="{}" fill="{}">{}</text>"#,
            num(x),
            num(y),
            num(size),
            anchor.as_svg(),
            color,
            escape(content)
        ));
    }

    pub(crate) fn line(&mut self, from: (f64, f64), to: (f64, f64), stroke: f64, color: &str) {
        self.elements.push(format!(
            r#"<line x1="{}" y1="{}" x2="{}" y2="{}" stroke="{}" stroke-width="{}" stroke-linecap="round"/>"#,
            num(from.0),
            num(from.1),
            num(to.0),
            num(to.1),
            color,
            num(stroke)
        ));
    }

    pub(crate) fn polyline(&mut self, points: &[(f64, f64)], stroke: f64, color: &str) {
        let points: Vec<String> = points.iter().map(|(x, y)| format!("{},{}", num(*x), num(*y))).collect();
        self.elements.push(format!(
            r#"<polyline points="{}" fill="none" stroke="{}" stroke-width="{}" stroke-linecap="round" stroke-linejoin="round"/>"#,
            points.join(" "),
            color,
            num(stroke)
        ));
    }

    pub(crate) fn ellipse(&mut self, center: (f64, f64), radii: (f64, f64), stroke: f64, color: &str) {
        self.elements.push(format!(
            r#"<ellipse cx="{}" cy="{}" rx="{}" ry="{}" fill="none" stroke="{}" stroke-width="{}"/>"#,
            num(center.0),
            num(center.1),
            num(radii.0),
            num(radii.1),
            color,
            num(stroke)
        ));
    }

    pub(crate) fn finish(self) -> String {
        let mut out = format!(
            r#"<svg xmlns="http://www.w3.org/2000/svg" width="{w}" height="{h}" viewBox="0 0 {w} {h}">"#,
            w = self.width,
            h = self.height
        );
        if let Some(background) = self.background {
            out.push_str(&background);
        }
        out.push_str(&format!(r#"<g font-family="{FONT_FAMILY}" font-weight="bold">"#));
        for element in self.elements {
            out.push_str(&element);
        }
        out.push_str("</g></svg>");
        out
    }
}
