//! Orchestrates one submission: standardize, classify, merge, look up schemes, reorder pages,
//! mark, and render. Each stage transition is reported on an optional progress channel.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use futures::future::join_all;
use thiserror::Error;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::core::config::{RenderSettings, Settings};
use crate::core::time::{elapsed_millis, format_offset, now_utc};
use crate::marking::category::{self, OverrideThresholds};
use crate::marking::merger::{self, normalize_question_number};
use crate::marking::reindex::{self, PageLayout, ReindexError};
use crate::schemas::marking::SchemeLookupResult;
use crate::schemas::output::{FinalOutput, PipelineOptions, ProcessingStats, ProgressEvent, SubmissionMode};
use crate::schemas::page::{Page, PageClassification, UploadedFile};
use crate::services::ai_marking::{HttpMarkingClient, MarkingClient};
use crate::services::classification::{bind_to_page, ClassificationClient, HttpClassificationClient};
use crate::services::ocr::{self, HttpOcrClient, OcrClient};
use crate::services::page_standardizer::{rotate_page, PageStandardizer, StandardizeError};
use crate::services::pdf_rasterizer::{HttpPdfRasterizer, PdfRasterizer};
use crate::services::scheme_lookup::{self, HttpSchemeLookup, SchemeLookup};
use crate::tasks::{assembly, executor};

const STEP_NAMES: [&str; 7] = [
    "Preparing pages",
    "Classifying pages",
    "Merging questions",
    "Looking up mark schemes",
    "Ordering pages",
    "Marking questions",
    "Rendering annotations",
];

#[derive(Debug, Error)]
pub(crate) enum PipelineError {
    #[error("{0}")]
    Input(String),
    #[error("page {page_index} ({file_name}) could not be matched to any question of the mark scheme")]
    Integrity { page_index: usize, file_name: String },
    #[error("{stage} service failed")]
    Service {
        stage: &'static str,
        #[source]
        source: anyhow::Error,
    },
}

impl From<StandardizeError> for PipelineError {
    fn from(err: StandardizeError) -> Self {
        Self::Input(err.to_string())
    }
}

impl From<ReindexError> for PipelineError {
    fn from(err: ReindexError) -> Self {
        match err {
            ReindexError::Unresolved { page_index, file_name } => Self::Integrity { page_index, file_name },
        }
    }
}

impl PipelineError {
    fn status_label(&self) -> &'static str {
        match self {
            Self::Input(_) => "input_error",
            Self::Integrity { .. } => "integrity_error",
            Self::Service { .. } => "service_error",
        }
    }
}

/// External collaborators the pipeline talks to.
#[derive(Clone)]
pub(crate) struct PipelineClients {
    pub(crate) classifier: Arc<dyn ClassificationClient>,
    pub(crate) ocr: Arc<dyn OcrClient>,
    pub(crate) schemes: Arc<dyn SchemeLookup>,
    pub(crate) marking: Arc<dyn MarkingClient>,
    pub(crate) rasterizer: Arc<dyn PdfRasterizer>,
}

#[derive(Clone)]
pub(crate) struct MarkingPipeline {
    inner: Arc<PipelineInner>,
}

struct PipelineInner {
    clients: PipelineClients,
    standardizer: PageStandardizer,
    thresholds: OverrideThresholds,
    concurrency: usize,
    default_model: String,
    render: RenderSettings,
}

struct Progress<'a> {
    tx: Option<&'a mpsc::UnboundedSender<ProgressEvent>>,
}

impl Progress<'_> {
    fn step(&self, step_index: usize) {
        let Some(tx) = self.tx else {
            return;
        };
        let event = ProgressEvent::Progress {
            step_index,
            label: STEP_NAMES[step_index].to_string(),
            step_names: STEP_NAMES.iter().map(|name| name.to_string()).collect(),
        };
        // A closed receiver means the client went away; the run still completes.
        let _ = tx.send(event);
    }
}

impl MarkingPipeline {
    pub(crate) fn from_settings(settings: &Settings) -> anyhow::Result<Self> {
        let clients = PipelineClients {
            classifier: Arc::new(HttpClassificationClient::from_settings(settings)?),
            ocr: Arc::new(HttpOcrClient::from_settings(settings)?),
            schemes: Arc::new(HttpSchemeLookup::from_settings(settings)?),
            marking: Arc::new(HttpMarkingClient::from_settings(settings)?),
            rasterizer: Arc::new(HttpPdfRasterizer::from_settings(settings)?),
        };
        Ok(Self::new(clients, settings))
    }

    pub(crate) fn new(clients: PipelineClients, settings: &Settings) -> Self {
        let pipeline = settings.pipeline();
        Self {
            inner: Arc::new(PipelineInner {
                standardizer: PageStandardizer::new(clients.rasterizer.clone(), pipeline.max_pages_per_submission),
                thresholds: OverrideThresholds {
                    student_work_ratio: pipeline.student_work_override_ratio,
                    safety_ratio: pipeline.safety_override_ratio,
                },
                concurrency: pipeline.marking_concurrency,
                default_model: settings.marking().default_model.clone(),
                render: settings.render().clone(),
                clients,
            }),
        }
    }

    pub(crate) async fn run(
        &self,
        files: Vec<UploadedFile>,
        options: PipelineOptions,
    ) -> Result<FinalOutput, PipelineError> {
        self.run_with_progress(files, options, None).await
    }

    /// Runs in the background, streaming progress and ending with `complete` or `error`.
    pub(crate) fn spawn_streaming(
        &self,
        files: Vec<UploadedFile>,
        options: PipelineOptions,
    ) -> mpsc::UnboundedReceiver<ProgressEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        let pipeline = self.clone();
        tokio::spawn(async move {
            let last = match pipeline.run_with_progress(files, options, Some(&tx)).await {
                Ok(output) => ProgressEvent::Complete { result: Box::new(output) },
                Err(err) => ProgressEvent::Error { message: err.to_string() },
            };
            if tx.send(last).is_err() {
                tracing::warn!("Progress receiver dropped before the final event");
            }
        });
        rx
    }

    async fn run_with_progress(
        &self,
        files: Vec<UploadedFile>,
        options: PipelineOptions,
        tx: Option<&mpsc::UnboundedSender<ProgressEvent>>,
    ) -> Result<FinalOutput, PipelineError> {
        let submission_id = Uuid::new_v4().to_string();
        let timer = Instant::now();

        let outcome = self.execute(&submission_id, files, options, &Progress { tx }).await;
        metrics::histogram!("pipeline_duration_seconds").record(timer.elapsed().as_secs_f64());

        match &outcome {
            Ok(output) => {
                metrics::counter!("pipeline_runs_total", "status" => "success").increment(1);
                tracing::info!(
                    submission_id = %submission_id,
                    mode = ?output.mode,
                    questions = output.results.len(),
                    pages = output.processing_stats.page_count,
                    duration_ms = output.processing_stats.duration_ms,
                    "Submission processed"
                );
            }
            Err(err) => {
                metrics::counter!("pipeline_runs_total", "status" => err.status_label()).increment(1);
                tracing::error!(submission_id = %submission_id, error = %err, "Submission failed");
            }
        }
        outcome
    }

    async fn execute(
        &self,
        submission_id: &str,
        files: Vec<UploadedFile>,
        options: PipelineOptions,
        progress: &Progress<'_>,
    ) -> Result<FinalOutput, PipelineError> {
        let inner = &self.inner;
        let started_at = now_utc();

        progress.step(0);
        let pages = inner.standardizer.standardize(files).await?;
        tracing::info!(submission_id = %submission_id, pages = pages.len(), "Pages standardized");

        progress.step(1);
        let mut classifications = self.classify(&pages).await?;
        let pages = apply_rotations(pages, &classifications).await;
        category::apply_overrides(&mut classifications, inner.thresholds);
        let mode = category::submission_mode(&classifications);
        let classification_tokens: u64 =
            classifications.iter().filter_map(|classification| classification.usage_tokens).sum();

        progress.step(2);
        let fragments = classifications.iter().flat_map(|classification| classification.questions.clone()).collect();
        let questions = merger::merge_fragments(fragments, options.question_number.as_deref());

        progress.step(3);
        let question_numbers: Vec<String> = questions
            .iter()
            .filter_map(|question| question.question_number.as_deref().and_then(normalize_question_number))
            .collect();
        let lookup = self.lookup_schemes(submission_id, &question_numbers, &options).await;
        let strict_integrity = questions
            .iter()
            .filter_map(|question| assembly::scheme_for(question, &lookup.schemes))
            .any(|scheme| !scheme.is_generic);
        tracing::info!(
            submission_id = %submission_id,
            schemes = lookup.schemes.len(),
            known_scheme = lookup.has_known_scheme(),
            detection_rate = lookup.detection_rate,
            strict_integrity,
            "Mark schemes resolved"
        );

        progress.step(4);
        let ocr_client = inner.clients.ocr.as_ref();
        let ocr_pages = join_all(pages.iter().map(|page| ocr::recognize_or_empty(ocr_client, page))).await;
        let layout = reindex::reindex(PageLayout { pages, classifications, questions, ocr_pages }, strict_integrity)?;

        progress.step(5);
        let model = options.model.clone().unwrap_or_else(|| inner.default_model.clone());
        let (mut results, failed_tasks) = match mode {
            SubmissionMode::Marking => {
                let tasks = assembly::build_tasks(
                    &layout.questions,
                    &layout.pages,
                    &layout.ocr_pages,
                    &lookup.schemes,
                    &options,
                    &model,
                );
                let outcome = executor::execute(tasks, inner.clients.marking.clone(), inner.concurrency).await;
                (outcome.results, outcome.failed)
            }
            SubmissionMode::QuestionOnly => {
                tracing::info!(submission_id = %submission_id, "No student work detected, skipping marking");
                (assembly::question_only_results(&layout.questions, &lookup.schemes), 0)
            }
        };

        progress.step(6);
        let rendered = match mode {
            SubmissionMode::Marking => {
                assembly::assign_annotation_pages(&mut results);
                assembly::render_results(&layout.pages, &results, &inner.render)
            }
            SubmissionMode::QuestionOnly => assembly::RenderOutcome::default(),
        };

        let completed_at = now_utc();
        let processing_stats = ProcessingStats {
            page_count: layout.pages.len(),
            question_count: layout.questions.len(),
            marked_questions: if mode == SubmissionMode::Marking { results.len() } else { 0 },
            failed_tasks,
            trimmed_marks: results.iter().map(|result| result.trimmed_marks).sum(),
            usage_tokens: classification_tokens + results.iter().map(|result| result.usage_tokens).sum::<u64>(),
            scheme_detection_rate: lookup.detection_rate,
            duration_ms: elapsed_millis(started_at, completed_at),
            started_at: format_offset(started_at),
            completed_at: format_offset(completed_at),
        };
        if rendered.skipped_annotations > 0 {
            tracing::warn!(
                submission_id = %submission_id,
                skipped = rendered.skipped_annotations,
                "Some annotations could not be rendered"
            );
        }

        Ok(FinalOutput {
            submission_id: submission_id.to_string(),
            annotated_output: rendered.pages,
            results,
            mode,
            session_id: options.session_id,
            processing_stats,
        })
    }

    async fn classify(&self, pages: &[Page]) -> Result<Vec<PageClassification>, PipelineError> {
        let classifier = self.inner.clients.classifier.as_ref();
        let classified = join_all(pages.iter().map(|page| async move {
            classifier
                .classify(page)
                .await
                .map(|classification| bind_to_page(classification, page.index))
        }))
        .await;

        classified
            .into_iter()
            .collect::<anyhow::Result<Vec<_>>>()
            .map_err(|source| PipelineError::Service { stage: "classification", source })
    }

    async fn lookup_schemes(
        &self,
        submission_id: &str,
        question_numbers: &[String],
        options: &PipelineOptions,
    ) -> SchemeLookupResult {
        if let Some(supplied) = &options.marking_scheme {
            return scheme_lookup::from_options(supplied, question_numbers);
        }
        if question_numbers.is_empty() {
            return SchemeLookupResult::default();
        }

        match self.inner.clients.schemes.lookup(question_numbers, options).await {
            Ok(result) => result,
            Err(err) => {
                tracing::warn!(
                    submission_id = %submission_id,
                    error = %err,
                    "Mark scheme lookup failed, marking without schemes"
                );
                SchemeLookupResult::default()
            }
        }
    }
}

async fn apply_rotations(pages: Vec<Page>, classifications: &[PageClassification]) -> Vec<Page> {
    let rotations: HashMap<usize, i32> = classifications
        .iter()
        .filter_map(|classification| classification.rotation.map(|degrees| (classification.page_index, degrees)))
        .filter(|(_, degrees)| matches!(degrees, 90 | 180 | 270))
        .collect();
    if rotations.is_empty() {
        return pages;
    }

    join_all(pages.into_iter().map(|page| {
        let degrees = rotations.get(&page.index).copied();
        async move {
            let Some(degrees) = degrees else {
                return page;
            };
            let fallback = page.clone();
            match rotate_page(page, degrees).await {
                Ok(rotated) => rotated,
                Err(err) => {
                    tracing::warn!(
                        page_index = fallback.index,
                        degrees,
                        error = %err,
                        "Rotation failed, keeping page as scanned"
                    );
                    fallback
                }
            }
        }
    }))
    .await
}
