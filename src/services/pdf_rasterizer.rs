use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::core::config::Settings;
use crate::schemas::page::UploadedFile;
use crate::services::http::{decode_base64, encode_base64, ServiceClient};

#[derive(Debug, Clone)]
pub(crate) struct RasterizedPage {
    pub(crate) mime_type: String,
    pub(crate) bytes: Vec<u8>,
}

#[async_trait]
pub(crate) trait PdfRasterizer: Send + Sync {
    async fn rasterize(&self, file: &UploadedFile) -> Result<Vec<RasterizedPage>>;
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RasterizeRequest<'a> {
    file_name: &'a str,
    data: String,
}

#[derive(Deserialize)]
struct RasterizeResponse {
    #[serde(default)]
    pages: Vec<EncodedPage>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct EncodedPage {
    #[serde(default = "default_page_mime")]
    mime_type: String,
    data: String,
}

fn default_page_mime() -> String {
    "image/png".to_string()
}

#[derive(Debug, Clone)]
pub(crate) struct HttpPdfRasterizer {
    client: ServiceClient,
}

impl HttpPdfRasterizer {
    pub(crate) fn from_settings(settings: &Settings) -> Result<Self> {
        Ok(Self { client: ServiceClient::from_endpoint("pdf rasterizer", settings.rasterizer())? })
    }
}

#[async_trait]
impl PdfRasterizer for HttpPdfRasterizer {
    async fn rasterize(&self, file: &UploadedFile) -> Result<Vec<RasterizedPage>> {
        let request = RasterizeRequest { file_name: &file.file_name, data: encode_base64(&file.bytes) };
        let response: RasterizeResponse = self
            .client
            .post_json("rasterize", &request)
            .await
            .with_context(|| format!("Failed to rasterize {}", file.file_name))?;

        response
            .pages
            .into_iter()
            .enumerate()
            .map(|(idx, page)| {
                let bytes = decode_base64(&page.data)
                    .with_context(|| format!("Invalid page {idx} from rasterizer for {}", file.file_name))?;
                Ok(RasterizedPage { mime_type: page.mime_type, bytes })
            })
            .collect()
    }
}
