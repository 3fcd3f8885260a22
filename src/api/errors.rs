use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use crate::tasks::pipeline::PipelineError;

#[derive(Debug, Serialize)]
struct ErrorResponse {
    status: u16,
    detail: String,
}

#[derive(Debug)]
pub(crate) enum ApiError {
    BadRequest(String),
    PayloadTooLarge(String),
    UnprocessableEntity(String),
    BadGateway(String),
}

impl From<PipelineError> for ApiError {
    fn from(err: PipelineError) -> Self {
        match err {
            PipelineError::Input(message) => Self::BadRequest(message),
            PipelineError::Integrity { .. } => Self::UnprocessableEntity(err.to_string()),
            PipelineError::Service { stage, ref source } => {
                tracing::error!(stage, error = %format!("{source:#}"), "External service failed");
                Self::BadGateway(err.to_string())
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::BadRequest(message) => (StatusCode::BAD_REQUEST, message),
            ApiError::PayloadTooLarge(message) => (StatusCode::PAYLOAD_TOO_LARGE, message),
            ApiError::UnprocessableEntity(message) => (StatusCode::UNPROCESSABLE_ENTITY, message),
            ApiError::BadGateway(message) => (StatusCode::BAD_GATEWAY, message),
        };

        (status, Json(ErrorResponse { status: status.as_u16(), detail: message })).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::read_json;

    #[tokio::test]
    async fn pipeline_errors_map_to_status_codes() {
        let cases = [
            (PipelineError::Input("no files were uploaded".to_string()), StatusCode::BAD_REQUEST),
            (
                PipelineError::Integrity { page_index: 2, file_name: "scan.png".to_string() },
                StatusCode::UNPROCESSABLE_ENTITY,
            ),
            (
                PipelineError::Service { stage: "classification", source: anyhow::anyhow!("timeout") },
                StatusCode::BAD_GATEWAY,
            ),
        ];

        for (err, expected) in cases {
            let response = ApiError::from(err).into_response();
            assert_eq!(response.status(), expected);
            let json = read_json(response).await;
            assert_eq!(json["status"], expected.as_u16());
        }
    }
}
