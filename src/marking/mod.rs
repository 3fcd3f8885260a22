pub(crate) mod category;
pub(crate) mod guillotine;
pub(crate) mod identifiers;
pub(crate) mod merger;
pub(crate) mod order_key;
pub(crate) mod reindex;
