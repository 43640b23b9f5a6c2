pub(crate) mod batcher;
pub(crate) mod samples;
pub(crate) mod transform;
