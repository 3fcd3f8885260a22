use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Serialize;

use crate::core::config::Settings;
use crate::schemas::page::{Page, PageClassification};
use crate::services::http::{encode_base64, ServiceClient};

#[async_trait]
pub(crate) trait ClassificationClient: Send + Sync {
    async fn classify(&self, page: &Page) -> Result<PageClassification>;
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ClassifyRequest<'a> {
    page_index: usize,
    file_name: &'a str,
    mime_type: &'a str,
    width: u32,
    height: u32,
    image: String,
}

#[derive(Debug, Clone)]
pub(crate) struct HttpClassificationClient {
    client: ServiceClient,
}

impl HttpClassificationClient {
    pub(crate) fn from_settings(settings: &Settings) -> Result<Self> {
        Ok(Self { client: ServiceClient::from_endpoint("classification", settings.classification())? })
    }
}

#[async_trait]
impl ClassificationClient for HttpClassificationClient {
    async fn classify(&self, page: &Page) -> Result<PageClassification> {
        let request = ClassifyRequest {
            page_index: page.index,
            file_name: &page.original_file_name,
            mime_type: &page.mime_type,
            width: page.width,
            height: page.height,
            image: encode_base64(&page.image),
        };

        let classification: PageClassification = self
            .client
            .post_json("classify", &request)
            .await
            .with_context(|| format!("Failed to classify page {}", page.index))?;

        Ok(bind_to_page(classification, page.index))
    }
}

/// Results are re-associated by the page that was sent, never by what the service echoes back.
pub(crate) fn bind_to_page(mut classification: PageClassification, page_index: usize) -> PageClassification {
    classification.page_index = page_index;
    for fragment in &mut classification.questions {
        fragment.page_index = page_index;
    }
    classification
}
