use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Serialize;
use std::time::Instant;

use crate::core::config::Settings;
use crate::schemas::marking::{MarkingResponse, MarkingScheme, MarkingTask};
use crate::services::http::{encode_base64, ServiceClient};

#[async_trait]
pub(crate) trait MarkingClient: Send + Sync {
    async fn mark(&self, task: &MarkingTask) -> Result<MarkingResponse>;
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct MarkRequest<'a> {
    model: &'a str,
    question_number: &'a str,
    question_text: &'a str,
    student_work: &'a str,
    ocr_text: &'a str,
    block_ids: &'a [String],
    sub_question_parts: &'a [String],
    marking_scheme: Option<&'a MarkingScheme>,
    custom_text: Option<&'a str>,
    images: Vec<MarkImage<'a>>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct MarkImage<'a> {
    page_index: usize,
    mime_type: &'a str,
    data: String,
}

#[derive(Debug, Clone)]
pub(crate) struct HttpMarkingClient {
    client: ServiceClient,
}

impl HttpMarkingClient {
    pub(crate) fn from_settings(settings: &Settings) -> Result<Self> {
        Ok(Self { client: ServiceClient::from_endpoint("marking", &settings.marking().endpoint)? })
    }
}

#[async_trait]
impl MarkingClient for HttpMarkingClient {
    async fn mark(&self, task: &MarkingTask) -> Result<MarkingResponse> {
        let timer = Instant::now();
        let request = MarkRequest {
            model: &task.model,
            question_number: &task.question_number,
            question_text: &task.question_text,
            student_work: &task.student_work,
            ocr_text: &task.ocr_text,
            block_ids: &task.block_ids,
            sub_question_parts: &task.sub_question_parts,
            marking_scheme: task.scheme.as_ref(),
            custom_text: task.custom_text.as_deref(),
            images: task
                .images
                .iter()
                .map(|image| MarkImage {
                    page_index: image.page_index,
                    mime_type: &image.mime_type,
                    data: encode_base64(&image.bytes),
                })
                .collect(),
        };

        tracing::info!(
            question_number = %task.question_number,
            model = %task.model,
            images = task.images.len(),
            "Sending marking request"
        );

        let response: MarkingResponse = self
            .client
            .post_json("mark", &request)
            .await
            .with_context(|| format!("Failed to mark question {}", task.question_number))?;

        tracing::info!(
            question_number = %task.question_number,
            annotations = response.annotations.len(),
            usage_tokens = response.usage_tokens,
            duration_seconds = timer.elapsed().as_secs_f64(),
            "Marking response received"
        );

        Ok(response)
    }
}
