use anyhow::{Context, Result};
use base64::Engine;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::time::Duration;

use crate::core::config::ServiceEndpoint;

/// JSON-over-HTTP client for one external collaborator, with bounded retries.
#[derive(Debug, Clone)]
pub(crate) struct ServiceClient {
    client: Client,
    name: &'static str,
    base_url: String,
    api_key: String,
    max_retries: u32,
}

impl ServiceClient {
    pub(crate) fn from_endpoint(name: &'static str, endpoint: &ServiceEndpoint) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(20))
            .timeout(Duration::from_secs(endpoint.timeout_seconds))
            .build()
            .with_context(|| format!("Failed to build {name} HTTP client"))?;
        if !endpoint.is_configured() {
            tracing::warn!(service = name, "Service base URL is not configured, calls will fail");
        }

        Ok(Self {
            client,
            name,
            base_url: endpoint.base_url.trim_end_matches('/').to_string(),
            api_key: endpoint.api_key.clone(),
            max_retries: endpoint.max_retries,
        })
    }

    /// Non-success statuses and transport errors are retried with `2^attempt` second backoff.
    /// A success body that does not decode is returned as an error immediately.
    pub(crate) async fn post_json<B, T>(&self, path: &str, body: &B) -> Result<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let url = format!("{}/{}", self.base_url, path.trim_start_matches('/'));
        let mut last_error = None;

        for attempt in 0..=self.max_retries {
            let mut request = self.client.post(&url).json(body);
            if !self.api_key.is_empty() {
                request = request.bearer_auth(&self.api_key);
            }

            match request.send().await {
                Ok(resp) => {
                    let status = resp.status();
                    let raw_body = resp
                        .text()
                        .await
                        .with_context(|| format!("Failed to read {} response", self.name))?;

                    if status.is_success() {
                        return serde_json::from_str::<T>(&raw_body).with_context(|| {
                            format!("Failed to decode {} response (status {status})", self.name)
                        });
                    }

                    let parsed = serde_json::from_str::<Value>(&raw_body).unwrap_or(Value::Null);
                    last_error = Some(anyhow::anyhow!(
                        "{} request failed (status {}): {}",
                        self.name,
                        status,
                        extract_error_message(&parsed)
                    ));
                }
                Err(err) => {
                    last_error = Some(
                        anyhow::anyhow!(err).context(format!("Failed to call {} API", self.name)),
                    );
                }
            }

            if attempt < self.max_retries {
                tracing::warn!(service = self.name, attempt, "Retrying external request");
                tokio::time::sleep(Duration::from_secs(2_u64.pow(attempt))).await;
            }
        }

        Err(last_error.unwrap_or_else(|| anyhow::anyhow!("Unknown {} error", self.name)))
    }
}

pub(crate) fn encode_base64(bytes: &[u8]) -> String {
    base64::engine::general_purpose::STANDARD.encode(bytes)
}

pub(crate) fn decode_base64(data: &str) -> Result<Vec<u8>> {
    let payload = data.split_once("base64,").map_or(data, |(_, payload)| payload);
    base64::engine::general_purpose::STANDARD
        .decode(payload.trim())
        .context("Failed to decode base64 payload")
}

fn extract_error_message(payload: &Value) -> String {
    if let Some(detail) = payload.get("detail") {
        if let Some(text) = detail.as_str() {
            return text.to_string();
        }
        if let Some(items) = detail.as_array() {
            let joined = items
                .iter()
                .filter_map(|item| {
                    item.get("msg")
                        .and_then(Value::as_str)
                        .or_else(|| item.get("message").and_then(Value::as_str))
                })
                .collect::<Vec<_>>()
                .join("; ");
            if !joined.is_empty() {
                return joined;
            }
        }
    }

    payload
        .get("message")
        .and_then(Value::as_str)
        .or_else(|| payload.get("error").and_then(Value::as_str))
        .unwrap_or("unknown_error")
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn error_message_prefers_detail() {
        assert_eq!(extract_error_message(&json!({"detail": "quota exceeded"})), "quota exceeded");
        assert_eq!(
            extract_error_message(&json!({"detail": [{"msg": "bad image"}, {"message": "bad page"}]})),
            "bad image; bad page"
        );
        assert_eq!(extract_error_message(&json!({"error": "boom"})), "boom");
        assert_eq!(extract_error_message(&Value::Null), "unknown_error");
    }

    #[test]
    fn base64_accepts_data_urls() {
        let encoded = encode_base64(b"scan");
        assert_eq!(decode_base64(&encoded).expect("plain"), b"scan");
        let url = format!("data:image/png;base64,{encoded}");
        assert_eq!(decode_base64(&url).expect("data url"), b"scan");
    }
}
