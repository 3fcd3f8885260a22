use std::sync::OnceLock;

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

use crate::core::config::Settings;

static PROM_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

pub(crate) fn init(settings: &Settings) -> anyhow::Result<()> {
    if !settings.telemetry().prometheus_enabled {
        return Ok(());
    }

    if PROM_HANDLE.get().is_some() {
        return Ok(());
    }

    let handle = PrometheusBuilder::new().install_recorder()?;
    let _ = PROM_HANDLE.set(handle);
    describe();
    Ok(())
}

pub(crate) fn render() -> Option<String> {
    PROM_HANDLE.get().map(|handle| handle.render())
}

fn describe() {
    metrics::describe_counter!("http_requests_total", "HTTP responses by status code");
    metrics::describe_histogram!("http_request_duration_seconds", "HTTP request latency");
    metrics::describe_counter!("pipeline_runs_total", "Marking pipeline runs by outcome");
    metrics::describe_counter!("marking_tasks_total", "Marking tasks by outcome");
    metrics::describe_counter!(
        "guillotine_marks_trimmed_total",
        "Marks removed by mark-budget enforcement"
    );
    metrics::describe_counter!("pages_standardized_total", "Pages produced by standardization");
    metrics::describe_counter!("pdf_conversion_failures_total", "PDF files that yielded no pages");
    metrics::describe_counter!("annotations_skipped_total", "Annotations skipped while rendering");
    metrics::describe_gauge!("marking_tasks_active", "Marking tasks currently in flight");
    metrics::describe_histogram!("marking_task_duration_seconds", "Marking call latency");
    metrics::describe_histogram!("pipeline_duration_seconds", "End-to-end pipeline latency");
}
