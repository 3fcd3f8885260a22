use std::sync::Arc;

use crate::core::config::Settings;
use crate::tasks::pipeline::MarkingPipeline;

#[derive(Clone)]
pub(crate) struct AppState {
    inner: Arc<InnerState>,
}

struct InnerState {
    settings: Settings,
    pipeline: MarkingPipeline,
}

impl AppState {
    pub(crate) fn new(settings: Settings, pipeline: MarkingPipeline) -> Self {
        Self { inner: Arc::new(InnerState { settings, pipeline }) }
    }

    pub(crate) fn settings(&self) -> &Settings {
        &self.inner.settings
    }

    pub(crate) fn pipeline(&self) -> &MarkingPipeline {
        &self.inner.pipeline
    }
}
