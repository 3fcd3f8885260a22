//! Identifier codec for `p<pageIndex>_<kind>_<sequence>`.
//!
//! Downstream citation logic parses these positionally, so every page-index change must go
//! through [`with_page`] rather than ad hoc string edits.

pub(crate) const LINE_KIND: &str = "line";
pub(crate) const OCR_BLOCK_KIND: &str = "ocr";

pub(crate) fn encode(page_index: usize, kind: &str, sequence: usize) -> String {
    format!("p{page_index}_{kind}_{sequence}")
}

/// Page number encoded in the `p<N>_` prefix, if the identifier carries one.
pub(crate) fn page_of(id: &str) -> Option<usize> {
    split_prefix(id).map(|(page, _)| page)
}

/// Re-encodes the page prefix. Identifiers without a `p<N>_` prefix are returned unchanged.
pub(crate) fn with_page(id: &str, page_index: usize) -> String {
    match split_prefix(id) {
        Some((_, rest)) => format!("p{page_index}_{rest}"),
        None => id.to_string(),
    }
}

fn split_prefix(id: &str) -> Option<(usize, &str)> {
    let body = id.strip_prefix('p')?;
    let digits_end = body.find(|c: char| !c.is_ascii_digit())?;
    if digits_end == 0 {
        return None;
    }
    let rest = body[digits_end..].strip_prefix('_')?;
    let page = body[..digits_end].parse().ok()?;
    Some((page, rest))
}
