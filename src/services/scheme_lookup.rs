use std::collections::HashMap;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Serialize;

use crate::core::config::Settings;
use crate::marking::merger::normalize_question_number;
use crate::schemas::marking::{MarkingScheme, SchemeLookupResult};
use crate::schemas::output::PipelineOptions;
use crate::services::http::ServiceClient;

#[async_trait]
pub(crate) trait SchemeLookup: Send + Sync {
    async fn lookup(
        &self,
        question_numbers: &[String],
        options: &PipelineOptions,
    ) -> Result<SchemeLookupResult>;
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct LookupRequest<'a> {
    question_numbers: &'a [String],
    exam_board: Option<&'a str>,
    paper: Option<&'a str>,
    year: Option<u16>,
    season: Option<&'a str>,
}

#[derive(Debug, Clone)]
pub(crate) struct HttpSchemeLookup {
    client: ServiceClient,
}

impl HttpSchemeLookup {
    pub(crate) fn from_settings(settings: &Settings) -> Result<Self> {
        Ok(Self { client: ServiceClient::from_endpoint("scheme lookup", settings.schemes())? })
    }
}

#[async_trait]
impl SchemeLookup for HttpSchemeLookup {
    async fn lookup(
        &self,
        question_numbers: &[String],
        options: &PipelineOptions,
    ) -> Result<SchemeLookupResult> {
        let request = LookupRequest {
            question_numbers,
            exam_board: options.exam_board.as_deref(),
            paper: options.paper.as_deref(),
            year: options.year,
            season: options.season.as_deref(),
        };

        let result: SchemeLookupResult = self
            .client
            .post_json("schemes/lookup", &request)
            .await
            .context("Failed to look up marking schemes")?;
        Ok(normalize_keys(result))
    }
}

/// Schemes supplied with the request bypass the lookup service.
pub(crate) fn from_options(
    schemes: &HashMap<String, MarkingScheme>,
    question_numbers: &[String],
) -> SchemeLookupResult {
    let result = normalize_keys(SchemeLookupResult { schemes: schemes.clone(), detection_rate: 0.0 });
    let covered = question_numbers.iter().filter(|number| result.schemes.contains_key(*number)).count();
    let detection_rate =
        if question_numbers.is_empty() { 1.0 } else { covered as f64 / question_numbers.len() as f64 };
    SchemeLookupResult { detection_rate, ..result }
}

fn normalize_keys(result: SchemeLookupResult) -> SchemeLookupResult {
    let schemes = result
        .schemes
        .into_iter()
        .map(|(key, scheme)| (normalize_question_number(&key).unwrap_or(key), scheme))
        .collect();
    SchemeLookupResult { schemes, ..result }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scheme(total: u32) -> MarkingScheme {
        MarkingScheme { total_marks: total, sub_question_max_scores: Default::default(), is_generic: false }
    }

    #[test]
    fn supplied_schemes_are_keyed_by_normalized_number() {
        let supplied = HashMap::from([("Q1".to_string(), scheme(4)), ("2.".to_string(), scheme(6))]);
        let numbers = vec!["1".to_string(), "2".to_string(), "3".to_string(), "4".to_string()];

        let result = from_options(&supplied, &numbers);
        assert_eq!(result.schemes.get("1").map(|s| s.total_marks), Some(4));
        assert_eq!(result.schemes.get("2").map(|s| s.total_marks), Some(6));
        assert_eq!(result.detection_rate, 0.5);
        assert!(result.has_known_scheme());
    }
}
