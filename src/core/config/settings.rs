use super::parsing::{
    env_optional, env_or_default, is_valid_ratio, parse_bool, parse_cors_origins,
    parse_environment, parse_f64, parse_u32, parse_u64, parse_usize,
};
use super::types::{
    ApiSettings, ConfigError, MarkingServiceSettings, PipelineSettings, RenderSettings,
    RuntimeSettings, ServerHost, ServerPort, ServerSettings, ServiceEndpoint, Settings,
    TelemetrySettings,
};

impl Settings {
    pub(crate) fn load() -> Result<Self, ConfigError> {
        let host = env_or_default("SCANMARK_HOST", "0.0.0.0");
        let port = env_or_default("SCANMARK_PORT", "8000");

        let environment = parse_environment(
            env_optional("SCANMARK_ENV").or_else(|| env_optional("ENVIRONMENT")),
        );
        let strict_config = env_optional("SCANMARK_STRICT_CONFIG")
            .map(|value| parse_bool(&value))
            .unwrap_or(false)
            || environment.is_production();

        let project_name = env_or_default("PROJECT_NAME", "Scanmark API");
        let api_v1_str = env_or_default("API_V1_STR", "/api/v1");
        let max_upload_size_mb =
            parse_u64("MAX_UPLOAD_SIZE_MB", env_or_default("MAX_UPLOAD_SIZE_MB", "25"))?;
        let cors_origins = parse_cors_origins(env_optional("CORS_ORIGINS"))?;

        let classification = load_endpoint(
            "CLASSIFICATION_BASE_URL",
            "CLASSIFICATION_API_KEY",
            "CLASSIFICATION_TIMEOUT_SECONDS",
            "120",
            "CLASSIFICATION_MAX_RETRIES",
        )?;
        let ocr = load_endpoint(
            "OCR_BASE_URL",
            "OCR_API_KEY",
            "OCR_TIMEOUT_SECONDS",
            "120",
            "OCR_MAX_RETRIES",
        )?;
        let marking_endpoint = load_endpoint(
            "MARKING_BASE_URL",
            "MARKING_API_KEY",
            "MARKING_TIMEOUT_SECONDS",
            "600",
            "MARKING_MAX_RETRIES",
        )?;
        let default_model = env_or_default("MARKING_MODEL", "auto");
        let schemes = load_endpoint(
            "SCHEME_LOOKUP_BASE_URL",
            "SCHEME_LOOKUP_API_KEY",
            "SCHEME_LOOKUP_TIMEOUT_SECONDS",
            "60",
            "SCHEME_LOOKUP_MAX_RETRIES",
        )?;
        let rasterizer = load_endpoint(
            "PDF_RASTERIZER_BASE_URL",
            "PDF_RASTERIZER_API_KEY",
            "PDF_RASTERIZER_TIMEOUT_SECONDS",
            "180",
            "PDF_RASTERIZER_MAX_RETRIES",
        )?;

        let marking_concurrency =
            parse_usize("MARKING_CONCURRENCY", env_or_default("MARKING_CONCURRENCY", "4"))?;
        let max_pages_per_submission = parse_usize(
            "MAX_PAGES_PER_SUBMISSION",
            env_or_default("MAX_PAGES_PER_SUBMISSION", "60"),
        )?;
        let student_work_override_ratio = parse_f64(
            "STUDENT_WORK_OVERRIDE_RATIO",
            env_or_default("STUDENT_WORK_OVERRIDE_RATIO", "0.9"),
        )?;
        let safety_override_ratio = parse_f64(
            "SAFETY_OVERRIDE_RATIO",
            env_or_default("SAFETY_OVERRIDE_RATIO", "0.5"),
        )?;

        let reference_height = parse_f64(
            "RENDER_REFERENCE_HEIGHT",
            env_or_default("RENDER_REFERENCE_HEIGHT", "2339"),
        )?;
        let reasoning_wrap_chars = parse_usize(
            "RENDER_REASONING_WRAP_CHARS",
            env_or_default("RENDER_REASONING_WRAP_CHARS", "36"),
        )?;

        let log_level = env_or_default("SCANMARK_LOG_LEVEL", "info");
        let json = env_optional("SCANMARK_LOG_JSON").map(|value| parse_bool(&value)).unwrap_or(false);
        let prometheus_enabled =
            env_optional("PROMETHEUS_ENABLED").map(|value| parse_bool(&value)).unwrap_or(false);

        let settings = Self {
            server: ServerSettings { host: ServerHost::parse(host)?, port: ServerPort::parse(port)? },
            runtime: RuntimeSettings { environment, strict_config },
            api: ApiSettings { project_name, api_v1_str, max_upload_size_mb, cors_origins },
            classification,
            ocr,
            marking: MarkingServiceSettings { endpoint: marking_endpoint, default_model },
            schemes,
            rasterizer,
            pipeline: PipelineSettings {
                marking_concurrency,
                max_pages_per_submission,
                student_work_override_ratio,
                safety_override_ratio,
            },
            render: RenderSettings { reference_height, reasoning_wrap_chars },
            telemetry: TelemetrySettings { log_level, json, prometheus_enabled },
        };

        settings.validate()?;
        Ok(settings)
    }

    pub(crate) fn server_addr(&self) -> String {
        format!("{}:{}", self.server.host.0, self.server.port.0)
    }

    pub(crate) fn server_host(&self) -> &str {
        &self.server.host.0
    }

    pub(crate) fn server_port(&self) -> u16 {
        self.server.port.0
    }

    pub(crate) fn api(&self) -> &ApiSettings {
        &self.api
    }

    pub(crate) fn classification(&self) -> &ServiceEndpoint {
        &self.classification
    }

    pub(crate) fn ocr(&self) -> &ServiceEndpoint {
        &self.ocr
    }

    pub(crate) fn marking(&self) -> &MarkingServiceSettings {
        &self.marking
    }

    pub(crate) fn schemes(&self) -> &ServiceEndpoint {
        &self.schemes
    }

    pub(crate) fn rasterizer(&self) -> &ServiceEndpoint {
        &self.rasterizer
    }

    pub(crate) fn pipeline(&self) -> &PipelineSettings {
        &self.pipeline
    }

    pub(crate) fn render(&self) -> &RenderSettings {
        &self.render
    }

    pub(crate) fn telemetry(&self) -> &TelemetrySettings {
        &self.telemetry
    }

    pub(crate) fn runtime(&self) -> &RuntimeSettings {
        &self.runtime
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.pipeline.marking_concurrency == 0 {
            return Err(ConfigError::InvalidValue {
                field: "MARKING_CONCURRENCY",
                value: "0".to_string(),
            });
        }

        if self.pipeline.max_pages_per_submission == 0 {
            return Err(ConfigError::InvalidValue {
                field: "MAX_PAGES_PER_SUBMISSION",
                value: "0".to_string(),
            });
        }

        if !is_valid_ratio(self.pipeline.student_work_override_ratio) {
            return Err(ConfigError::InvalidValue {
                field: "STUDENT_WORK_OVERRIDE_RATIO",
                value: self.pipeline.student_work_override_ratio.to_string(),
            });
        }

        if !is_valid_ratio(self.pipeline.safety_override_ratio) {
            return Err(ConfigError::InvalidValue {
                field: "SAFETY_OVERRIDE_RATIO",
                value: self.pipeline.safety_override_ratio.to_string(),
            });
        }

        if self.render.reference_height <= 0.0 {
            return Err(ConfigError::InvalidValue {
                field: "RENDER_REFERENCE_HEIGHT",
                value: self.render.reference_height.to_string(),
            });
        }

        if self.render.reasoning_wrap_chars < 8 {
            return Err(ConfigError::InvalidValue {
                field: "RENDER_REASONING_WRAP_CHARS",
                value: self.render.reasoning_wrap_chars.to_string(),
            });
        }

        if !(self.runtime.strict_config || self.runtime.environment.is_production()) {
            return Ok(());
        }

        let required = [
            (&self.classification, "CLASSIFICATION_BASE_URL", "CLASSIFICATION_API_KEY"),
            (&self.ocr, "OCR_BASE_URL", "OCR_API_KEY"),
            (&self.marking.endpoint, "MARKING_BASE_URL", "MARKING_API_KEY"),
            (&self.schemes, "SCHEME_LOOKUP_BASE_URL", "SCHEME_LOOKUP_API_KEY"),
            (&self.rasterizer, "PDF_RASTERIZER_BASE_URL", "PDF_RASTERIZER_API_KEY"),
        ];
        for (endpoint, url_field, key_field) in required {
            if endpoint.base_url.is_empty() {
                return Err(ConfigError::MissingSecret(url_field));
            }
            if endpoint.api_key.is_empty() {
                return Err(ConfigError::MissingSecret(key_field));
            }
        }

        Ok(())
    }
}

fn load_endpoint(
    url_key: &'static str,
    api_key_key: &'static str,
    timeout_key: &'static str,
    timeout_default: &str,
    retries_key: &'static str,
) -> Result<ServiceEndpoint, ConfigError> {
    Ok(ServiceEndpoint {
        base_url: env_or_default(url_key, "").trim_end_matches('/').to_string(),
        api_key: env_or_default(api_key_key, ""),
        timeout_seconds: parse_u64(timeout_key, env_or_default(timeout_key, timeout_default))?,
        max_retries: parse_u32(retries_key, env_or_default(retries_key, "3"))?,
    })
}
