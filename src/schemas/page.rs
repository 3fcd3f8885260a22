use serde::{Deserialize, Serialize};

use crate::schemas::question::QuestionFragment;

/// A file as received from the client, before standardization.
#[derive(Debug, Clone)]
pub(crate) struct UploadedFile {
    pub(crate) file_name: String,
    pub(crate) mime_type: String,
    pub(crate) bytes: Vec<u8>,
}

/// One physical page image. `index` changes exactly once, when pages are put into question order.
#[derive(Debug, Clone)]
pub(crate) struct Page {
    pub(crate) index: usize,
    pub(crate) image: Vec<u8>,
    pub(crate) mime_type: String,
    pub(crate) width: u32,
    pub(crate) height: u32,
    pub(crate) original_file_name: String,
    pub(crate) original_upload_index: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) enum PageCategory {
    QuestionOnly,
    QuestionAnswer,
    Metadata,
    FrontPage,
}

impl PageCategory {
    /// Metadata and front pages carry no question content and always sort first.
    pub(crate) fn is_front_matter(self) -> bool {
        matches!(self, Self::Metadata | Self::FrontPage)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct PageClassification {
    pub(crate) page_index: usize,
    pub(crate) category: PageCategory,
    #[serde(default)]
    pub(crate) questions: Vec<QuestionFragment>,
    #[serde(default)]
    pub(crate) rotation: Option<i32>,
    #[serde(default)]
    pub(crate) usage_tokens: Option<u64>,
}

impl PageClassification {
    pub(crate) fn has_student_work(&self) -> bool {
        self.questions.iter().any(QuestionFragment::has_student_work)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct MathBlock {
    #[serde(default)]
    pub(crate) id: Option<String>,
    #[serde(default)]
    pub(crate) text: String,
    #[serde(default)]
    pub(crate) bbox: Option<Vec<f64>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct OcrPage {
    #[serde(default)]
    pub(crate) page_index: usize,
    #[serde(default)]
    pub(crate) math_blocks: Vec<MathBlock>,
    #[serde(default)]
    pub(crate) text: String,
}

impl OcrPage {
    pub(crate) fn empty(page_index: usize) -> Self {
        Self { page_index, ..Self::default() }
    }
}
