use std::collections::{HashMap, HashSet};
use std::io::Cursor;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use axum::{
    body::{to_bytes, Body},
    http::{header, Method, Request},
    response::Response,
    Router,
};
use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::api;
use crate::core::{config::Settings, state::AppState};
use crate::schemas::annotation::{Annotation, AnnotationAction};
use crate::schemas::marking::{MarkingResponse, MarkingScheme, MarkingTask, ReportedScore, SchemeLookupResult};
use crate::schemas::output::PipelineOptions;
use crate::schemas::page::{OcrPage, Page, PageCategory, PageClassification, UploadedFile};
use crate::schemas::question::{QuestionFragment, StudentWorkLine};
use crate::services::ai_marking::MarkingClient;
use crate::services::classification::{bind_to_page, ClassificationClient};
use crate::services::ocr::OcrClient;
use crate::services::pdf_rasterizer::{PdfRasterizer, RasterizedPage};
use crate::services::scheme_lookup::{self, SchemeLookup};
use crate::tasks::pipeline::{MarkingPipeline, PipelineClients};

const MULTIPART_BOUNDARY: &str = "scanmark-test-boundary";

pub(crate) async fn env_lock() -> OwnedMutexGuard<()> {
    static LOCK: OnceLock<Arc<Mutex<()>>> = OnceLock::new();
    let lock = LOCK.get_or_init(|| Arc::new(Mutex::new(()))).clone();
    lock.lock_owned().await
}

pub(crate) fn set_test_env() {
    std::env::set_var("SCANMARK_ENV", "test");
    std::env::set_var("SCANMARK_STRICT_CONFIG", "0");
    std::env::set_var("PROMETHEUS_ENABLED", "0");
    for key in [
        "MARKING_CONCURRENCY",
        "MAX_PAGES_PER_SUBMISSION",
        "STUDENT_WORK_OVERRIDE_RATIO",
        "SAFETY_OVERRIDE_RATIO",
        "RENDER_REFERENCE_HEIGHT",
        "RENDER_REASONING_WRAP_CHARS",
        "API_V1_STR",
        "CORS_ORIGINS",
        "CLASSIFICATION_BASE_URL",
        "CLASSIFICATION_API_KEY",
        "OCR_BASE_URL",
        "OCR_API_KEY",
        "MARKING_BASE_URL",
        "MARKING_API_KEY",
        "SCHEME_LOOKUP_BASE_URL",
        "SCHEME_LOOKUP_API_KEY",
        "PDF_RASTERIZER_BASE_URL",
        "PDF_RASTERIZER_API_KEY",
    ] {
        std::env::remove_var(key);
    }
}

pub(crate) struct TestApp {
    pub(crate) app: Router,
    _guard: OwnedMutexGuard<()>,
}

pub(crate) fn test_state(settings: Settings, clients: PipelineClients) -> AppState {
    let pipeline = MarkingPipeline::new(clients, &settings);
    AppState::new(settings, pipeline)
}

pub(crate) async fn test_app(clients: PipelineClients) -> TestApp {
    let guard = env_lock().await;
    set_test_env();
    let settings = Settings::load().expect("settings");
    TestApp { app: api::router::router(test_state(settings, clients)), _guard: guard }
}

pub(crate) fn fake_clients(classifier: FakeClassifier) -> PipelineClients {
    PipelineClients {
        classifier: Arc::new(classifier),
        ocr: Arc::new(FakeOcr::with_text("")),
        schemes: Arc::new(FakeSchemes::default()),
        marking: Arc::new(FakeMarking::default()),
        rasterizer: Arc::new(FakeRasterizer::default()),
    }
}

/// Builds a multipart POST with one `files` part per upload and an optional `options` JSON part.
pub(crate) fn multipart_request(uri: &str, files: &[UploadedFile], options: Option<&str>) -> Request<Body> {
    let mut body = Vec::new();
    for file in files {
        body.extend_from_slice(
            format!(
                "--{MULTIPART_BOUNDARY}\r\nContent-Disposition: form-data; name=\"files\"; filename=\"{}\"\r\nContent-Type: {}\r\n\r\n",
                file.file_name, file.mime_type
            )
            .as_bytes(),
        );
        body.extend_from_slice(&file.bytes);
        body.extend_from_slice(b"\r\n");
    }
    if let Some(options) = options {
        body.extend_from_slice(
            format!(
                "--{MULTIPART_BOUNDARY}\r\nContent-Disposition: form-data; name=\"options\"\r\n\r\n{options}\r\n"
            )
            .as_bytes(),
        );
    }
    body.extend_from_slice(format!("--{MULTIPART_BOUNDARY}--\r\n").as_bytes());

    Request::builder()
        .method(Method::POST)
        .uri(uri)
        .header(header::CONTENT_TYPE, format!("multipart/form-data; boundary={MULTIPART_BOUNDARY}"))
        .body(Body::from(body))
        .expect("request")
}

pub(crate) async fn read_body(response: Response) -> String {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.expect("body");
    String::from_utf8(bytes.to_vec()).expect("utf8 body")
}

pub(crate) async fn read_json(response: Response) -> serde_json::Value {
    serde_json::from_str(&read_body(response).await).expect("json body")
}

pub(crate) fn png_bytes(width: u32, height: u32) -> Vec<u8> {
    let image = DynamicImage::ImageRgb8(RgbImage::from_pixel(width, height, Rgb([255, 255, 255])));
    let mut out = Cursor::new(Vec::new());
    image.write_to(&mut out, ImageFormat::Png).expect("encode png");
    out.into_inner()
}

pub(crate) fn png_file(name: &str, width: u32, height: u32) -> UploadedFile {
    UploadedFile { file_name: name.to_string(), mime_type: "image/png".to_string(), bytes: png_bytes(width, height) }
}

pub(crate) fn png_page(index: usize, width: u32, height: u32) -> Page {
    Page {
        index,
        image: png_bytes(width, height),
        mime_type: "image/png".to_string(),
        width,
        height,
        original_file_name: format!("page-{index}.png"),
        original_upload_index: index,
    }
}

pub(crate) fn fragment(number: &str, work: Option<&str>) -> QuestionFragment {
    QuestionFragment {
        question_number: Some(number.to_string()),
        text: Some(format!("Solve question {number}")),
        student_work: work.map(str::to_string),
        student_work_lines: work
            .map(|text| vec![StudentWorkLine { text: text.to_string(), page_index: 0, position: None, id: String::new() }])
            .unwrap_or_default(),
        confidence: 0.9,
        ..QuestionFragment::default()
    }
}

pub(crate) fn tick(text: &str, sub_question: Option<&str>) -> Annotation {
    Annotation {
        bbox: Some(vec![20.0, 30.0, 80.0, 24.0]),
        action: AnnotationAction::Tick,
        text: Some(text.to_string()),
        reasoning: None,
        sub_question: sub_question.map(str::to_string),
        classification: None,
        page_index: None,
        source_position_confidence: Some(0.9),
    }
}

pub(crate) fn marking_task(question_number: &str) -> MarkingTask {
    MarkingTask {
        question_number: question_number.to_string(),
        question_text: format!("Question {question_number}"),
        student_work: format!("work for {question_number}"),
        ocr_text: String::new(),
        block_ids: Vec::new(),
        sub_question_parts: Vec::new(),
        source_pages: vec![0],
        scheme: None,
        images: Vec::new(),
        model: "test-model".to_string(),
        custom_text: None,
    }
}

/// Classifies pages by their original file name; unknown files fail.
#[derive(Default)]
pub(crate) struct FakeClassifier {
    pages: HashMap<String, (PageCategory, Vec<QuestionFragment>)>,
}

impl FakeClassifier {
    pub(crate) fn with_page(mut self, file_name: &str, category: PageCategory, questions: Vec<QuestionFragment>) -> Self {
        self.pages.insert(file_name.to_string(), (category, questions));
        self
    }
}

#[async_trait]
impl ClassificationClient for FakeClassifier {
    async fn classify(&self, page: &Page) -> Result<PageClassification> {
        let (category, questions) = self
            .pages
            .get(&page.original_file_name)
            .cloned()
            .ok_or_else(|| anyhow!("no classification for {}", page.original_file_name))?;
        let classification =
            PageClassification { page_index: page.index, category, questions, rotation: None, usage_tokens: Some(10) };
        Ok(bind_to_page(classification, page.index))
    }
}

pub(crate) struct FakeOcr {
    text: Option<String>,
}

impl FakeOcr {
    pub(crate) fn with_text(text: &str) -> Self {
        Self { text: Some(text.to_string()) }
    }

    pub(crate) fn failing() -> Self {
        Self { text: None }
    }
}

#[async_trait]
impl OcrClient for FakeOcr {
    async fn recognize(&self, page: &Page) -> Result<OcrPage> {
        let text = self.text.clone().ok_or_else(|| anyhow!("ocr unavailable"))?;
        Ok(OcrPage { page_index: page.index, math_blocks: Vec::new(), text })
    }
}

/// Rasterizes only the named PDF; every other file fails conversion.
#[derive(Default)]
pub(crate) struct FakeRasterizer {
    file_name: Option<String>,
    pages: Vec<Vec<u8>>,
}

impl FakeRasterizer {
    pub(crate) fn with_pages(file_name: &str, pages: Vec<Vec<u8>>) -> Self {
        Self { file_name: Some(file_name.to_string()), pages }
    }
}

#[async_trait]
impl PdfRasterizer for FakeRasterizer {
    async fn rasterize(&self, file: &UploadedFile) -> Result<Vec<RasterizedPage>> {
        if self.file_name.as_deref() != Some(file.file_name.as_str()) {
            return Err(anyhow!("cannot convert {}", file.file_name));
        }
        Ok(self
            .pages
            .iter()
            .map(|bytes| RasterizedPage { mime_type: "image/png".to_string(), bytes: bytes.clone() })
            .collect())
    }
}

#[derive(Default)]
pub(crate) struct FakeSchemes {
    schemes: HashMap<String, MarkingScheme>,
    fail: bool,
    calls: AtomicUsize,
}

impl FakeSchemes {
    pub(crate) fn with_schemes<'a>(schemes: impl IntoIterator<Item = (&'a str, MarkingScheme)>) -> Self {
        Self {
            schemes: schemes.into_iter().map(|(number, scheme)| (number.to_string(), scheme)).collect(),
            ..Self::default()
        }
    }

    pub(crate) fn failing() -> Self {
        Self { fail: true, ..Self::default() }
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SchemeLookup for FakeSchemes {
    async fn lookup(&self, question_numbers: &[String], _options: &PipelineOptions) -> Result<SchemeLookupResult> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(anyhow!("scheme lookup unavailable"));
        }
        Ok(scheme_lookup::from_options(&self.schemes, question_numbers))
    }
}

/// Returns configured annotations per question and records how many calls overlapped.
#[derive(Default)]
pub(crate) struct FakeMarking {
    delay: Option<Duration>,
    failing: HashSet<String>,
    annotations: HashMap<String, Vec<Annotation>>,
    active: AtomicUsize,
    peak: AtomicUsize,
    calls: AtomicUsize,
}

impl FakeMarking {
    pub(crate) fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub(crate) fn failing_on(mut self, question_number: &str) -> Self {
        self.failing.insert(question_number.to_string());
        self
    }

    pub(crate) fn with_annotations(mut self, question_number: &str, annotations: Vec<Annotation>) -> Self {
        self.annotations.insert(question_number.to_string(), annotations);
        self
    }

    pub(crate) fn peak_active(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MarkingClient for FakeMarking {
    async fn mark(&self, task: &MarkingTask) -> Result<MarkingResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(active, Ordering::SeqCst);

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.active.fetch_sub(1, Ordering::SeqCst);

        if self.failing.contains(&task.question_number) {
            return Err(anyhow!("marking failed for {}", task.question_number));
        }

        let annotations = self.annotations.get(&task.question_number).cloned().unwrap_or_default();
        let total = task.scheme.as_ref().map_or(annotations.len() as f64, |scheme| f64::from(scheme.total_marks));
        Ok(MarkingResponse {
            score: ReportedScore { awarded_marks: annotations.len() as f64, total_marks: total },
            annotations,
            feedback: format!("Feedback for {}", task.question_number),
            usage_tokens: 100,
            student_work: None,
            question_text: None,
        })
    }
}
