pub(crate) mod assembly;
pub(crate) mod executor;
pub(crate) mod pipeline;
