pub(crate) mod ai;
pub(crate) mod data;
