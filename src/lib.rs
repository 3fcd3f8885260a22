pub(crate) mod api;
pub(crate) mod core;
pub(crate) mod marking;
pub(crate) mod render;
pub(crate) mod schemas;
pub(crate) mod services;
pub(crate) mod tasks;

#[cfg(test)]
mod test_support;

use std::path::PathBuf;

use anyhow::Context;
use validator::Validate;

use crate::core::{config::Settings, state::AppState, telemetry};
use crate::schemas::output::PipelineOptions;
use crate::schemas::page::UploadedFile;
use crate::tasks::pipeline::MarkingPipeline;

pub async fn run() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let settings = Settings::load()?;
    telemetry::init_tracing(&settings)?;
    core::metrics::init(&settings)?;

    let pipeline = MarkingPipeline::from_settings(&settings)?;
    let state = AppState::new(settings, pipeline);

    let app = api::router::router(state.clone());
    let listener = tokio::net::TcpListener::bind(state.settings().server_addr()).await?;

    tracing::info!(
        host = %state.settings().server_host(),
        port = state.settings().server_port(),
        environment = %state.settings().runtime().environment.as_str(),
        concurrency = state.settings().pipeline().marking_concurrency,
        "Scanmark API listening"
    );

    axum::serve(listener, app).with_graceful_shutdown(core::shutdown::shutdown_signal()).await?;

    Ok(())
}

/// Marks local files once and prints the result as JSON, without starting the HTTP server.
pub async fn run_batch(paths: Vec<PathBuf>, options_json: Option<String>) -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let settings = Settings::load()?;
    telemetry::init_tracing(&settings)?;

    let options: PipelineOptions = match options_json {
        Some(raw) => serde_json::from_str(&raw).context("Failed to parse options")?,
        None => PipelineOptions::default(),
    };
    options.validate().context("Invalid options")?;

    let mut files = Vec::with_capacity(paths.len());
    for path in paths {
        let bytes = tokio::fs::read(&path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let file_name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        // Empty MIME type makes the standardizer infer it from the extension.
        files.push(UploadedFile { file_name, mime_type: String::new(), bytes });
    }

    let pipeline = MarkingPipeline::from_settings(&settings)?;
    let output = pipeline.run(files, options).await?;
    println!("{}", serde_json::to_string_pretty(&output).context("Failed to encode result")?);

    Ok(())
}
