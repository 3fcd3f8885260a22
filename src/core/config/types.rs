use thiserror::Error;

#[derive(Debug, Clone)]
pub(crate) struct Settings {
    pub(super) server: ServerSettings,
    pub(super) runtime: RuntimeSettings,
    pub(super) api: ApiSettings,
    pub(super) classification: ServiceEndpoint,
    pub(super) ocr: ServiceEndpoint,
    pub(super) marking: MarkingServiceSettings,
    pub(super) schemes: ServiceEndpoint,
    pub(super) rasterizer: ServiceEndpoint,
    pub(super) pipeline: PipelineSettings,
    pub(super) render: RenderSettings,
    pub(super) telemetry: TelemetrySettings,
}

#[derive(Debug, Clone)]
pub(crate) struct ServerSettings {
    pub(super) host: ServerHost,
    pub(super) port: ServerPort,
}

#[derive(Debug, Clone)]
pub(crate) struct ApiSettings {
    pub(crate) project_name: String,
    pub(crate) api_v1_str: String,
    pub(crate) max_upload_size_mb: u64,
    pub(crate) cors_origins: Vec<String>,
}

/// Connection details for one external collaborator.
#[derive(Debug, Clone)]
pub(crate) struct ServiceEndpoint {
    pub(crate) base_url: String,
    pub(crate) api_key: String,
    pub(crate) timeout_seconds: u64,
    pub(crate) max_retries: u32,
}

#[derive(Debug, Clone)]
pub(crate) struct MarkingServiceSettings {
    pub(crate) endpoint: ServiceEndpoint,
    pub(crate) default_model: String,
}

#[derive(Debug, Clone)]
pub(crate) struct PipelineSettings {
    pub(crate) marking_concurrency: usize,
    pub(crate) max_pages_per_submission: usize,
    pub(crate) student_work_override_ratio: f64,
    pub(crate) safety_override_ratio: f64,
}

#[derive(Debug, Clone)]
pub(crate) struct RenderSettings {
    pub(crate) reference_height: f64,
    pub(crate) reasoning_wrap_chars: usize,
}

#[derive(Debug, Clone)]
pub(crate) struct TelemetrySettings {
    pub(crate) log_level: String,
    pub(crate) json: bool,
    pub(crate) prometheus_enabled: bool,
}

#[derive(Debug, Clone)]
pub(crate) struct RuntimeSettings {
    pub(crate) environment: Environment,
    pub(crate) strict_config: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Environment {
    Development,
    Production,
    Staging,
    Test,
}

impl Environment {
    pub(crate) fn as_str(self) -> &'static str {
        match self {
            Self::Development => "development",
            Self::Production => "production",
            Self::Staging => "staging",
            Self::Test => "test",
        }
    }

    pub(super) fn is_production(self) -> bool {
        matches!(self, Self::Production)
    }
}

#[derive(Debug, Clone)]
pub(crate) struct ServerHost(pub(super) String);

#[derive(Debug, Clone, Copy)]
pub(crate) struct ServerPort(pub(super) u16);

#[derive(Debug, Error)]
pub(crate) enum ConfigError {
    #[error("invalid server host: {0}")]
    InvalidHost(String),
    #[error("invalid server port: {0}")]
    InvalidPort(String),
    #[error("invalid value for {field}: {value}")]
    InvalidValue { field: &'static str, value: String },
    #[error("invalid cors origins: {0}")]
    InvalidCors(String),
    #[error("missing required secret for {0}")]
    MissingSecret(&'static str),
}

impl Default for RenderSettings {
    fn default() -> Self {
        Self { reference_height: 2339.0, reasoning_wrap_chars: 36 }
    }
}

impl ServiceEndpoint {
    pub(crate) fn is_configured(&self) -> bool {
        !self.base_url.is_empty()
    }
}

impl ServerHost {
    pub(super) fn parse(value: String) -> Result<Self, ConfigError> {
        if value.trim().is_empty() {
            return Err(ConfigError::InvalidHost(value));
        }

        Ok(Self(value))
    }
}

impl ServerPort {
    pub(super) fn parse(value: String) -> Result<Self, ConfigError> {
        let parsed: u16 = value.parse().map_err(|_| ConfigError::InvalidPort(value.clone()))?;
        if parsed == 0 {
            return Err(ConfigError::InvalidPort(value));
        }

        Ok(Self(parsed))
    }
}
