mod parsing;
mod settings;
mod types;

pub(crate) use types::{RenderSettings, ServiceEndpoint, Settings};

#[cfg(test)]
pub(crate) use types::{ConfigError, Environment};
