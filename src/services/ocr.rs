use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Serialize;

use crate::core::config::Settings;
use crate::schemas::page::{OcrPage, Page};
use crate::services::http::{encode_base64, ServiceClient};

#[async_trait]
pub(crate) trait OcrClient: Send + Sync {
    async fn recognize(&self, page: &Page) -> Result<OcrPage>;
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RecognizeRequest<'a> {
    page_index: usize,
    mime_type: &'a str,
    image: String,
}

#[derive(Debug, Clone)]
pub(crate) struct HttpOcrClient {
    client: ServiceClient,
}

impl HttpOcrClient {
    pub(crate) fn from_settings(settings: &Settings) -> Result<Self> {
        Ok(Self { client: ServiceClient::from_endpoint("ocr", settings.ocr())? })
    }
}

#[async_trait]
impl OcrClient for HttpOcrClient {
    async fn recognize(&self, page: &Page) -> Result<OcrPage> {
        let request = RecognizeRequest {
            page_index: page.index,
            mime_type: &page.mime_type,
            image: encode_base64(&page.image),
        };

        let mut result: OcrPage = self
            .client
            .post_json("recognize", &request)
            .await
            .with_context(|| format!("Failed to run OCR for page {}", page.index))?;
        result.page_index = page.index;
        Ok(result)
    }
}

/// OCR is supplementary context for marking; a failed page degrades to no text.
pub(crate) async fn recognize_or_empty(client: &dyn OcrClient, page: &Page) -> OcrPage {
    match client.recognize(page).await {
        Ok(result) => result,
        Err(err) => {
            tracing::warn!(page_index = page.index, error = %err, "OCR failed, continuing without text");
            OcrPage::empty(page.index)
        }
    }
}
