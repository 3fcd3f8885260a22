use std::convert::Infallible;

use axum::{
    extract::{multipart::MultipartError, DefaultBodyLimit, Multipart, State},
    http::StatusCode,
    response::sse::{Event, KeepAlive, Sse},
    routing::post,
    Json, Router,
};
use futures::stream::{self, Stream};
use validator::Validate;

use crate::api::errors::ApiError;
use crate::core::state::AppState;
use crate::schemas::output::{FinalOutput, PipelineOptions, ProgressEvent};
use crate::schemas::page::UploadedFile;

pub(crate) fn router(max_upload_size_mb: u64) -> Router<AppState> {
    let limit = usize::try_from(max_upload_size_mb.saturating_mul(1024 * 1024)).unwrap_or(usize::MAX);
    Router::new()
        .route("/", post(mark_submission))
        .route("/stream", post(stream_submission))
        .layer(DefaultBodyLimit::max(limit))
}

async fn mark_submission(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<Json<FinalOutput>, ApiError> {
    let (files, options) = read_submission(multipart).await?;
    let output = state.pipeline().run(files, options).await?;
    Ok(Json(output))
}

async fn stream_submission(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    let (files, options) = read_submission(multipart).await?;
    let rx = state.pipeline().spawn_streaming(files, options);

    let events = stream::unfold(rx, |mut rx| async move {
        let event = rx.recv().await?;
        Some((Ok(to_sse_event(&event)), rx))
    });

    Ok(Sse::new(events).keep_alive(KeepAlive::default()))
}

fn to_sse_event(event: &ProgressEvent) -> Event {
    match Event::default().json_data(event) {
        Ok(sse) => sse,
        Err(err) => {
            tracing::error!(error = %err, "Failed to encode progress event");
            Event::default().data(r#"{"type":"error","message":"Failed to encode progress event"}"#)
        }
    }
}

async fn read_submission(mut multipart: Multipart) -> Result<(Vec<UploadedFile>, PipelineOptions), ApiError> {
    let mut files = Vec::new();
    let mut options = PipelineOptions::default();

    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        let name = field.name().unwrap_or("").to_string();
        match name.as_str() {
            "files" | "files[]" => {
                let file_name = field.file_name().unwrap_or("upload").to_string();
                let mime_type = field.content_type().unwrap_or("").to_string();
                let bytes = field.bytes().await.map_err(multipart_error)?;
                files.push(UploadedFile { file_name, mime_type, bytes: bytes.to_vec() });
            }
            "options" => {
                let raw = field.text().await.map_err(multipart_error)?;
                options = serde_json::from_str(&raw)
                    .map_err(|err| ApiError::BadRequest(format!("Invalid options: {err}")))?;
            }
            other => {
                tracing::debug!(field = other, "Ignoring unknown multipart field");
            }
        }
    }

    options.validate().map_err(|e| ApiError::BadRequest(e.to_string()))?;
    tracing::debug!(files = files.len(), "Read marking submission");
    Ok((files, options))
}

fn multipart_error(err: MultipartError) -> ApiError {
    if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
        ApiError::PayloadTooLarge(err.body_text())
    } else {
        ApiError::BadRequest(format!("Invalid multipart data: {}", err.body_text()))
    }
}
