use serde::Serialize;

pub(crate) mod annotation;
pub(crate) mod marking;
pub(crate) mod output;
pub(crate) mod page;
pub(crate) mod question;

#[derive(Debug, Serialize)]
pub(crate) struct HealthResponse {
    pub(crate) service: String,
    pub(crate) status: String,
    pub(crate) marking_concurrency: usize,
}

#[derive(Debug, Serialize)]
pub(crate) struct RootResponse {
    pub(crate) message: String,
    pub(crate) version: String,
    pub(crate) marking_url: String,
}
