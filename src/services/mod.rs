pub(crate) mod ai_marking;
pub(crate) mod classification;
pub(crate) mod http;
pub(crate) mod ocr;
pub(crate) mod page_standardizer;
pub(crate) mod pdf_rasterizer;
pub(crate) mod scheme_lookup;
