#![forbid(unsafe_code)]

pub mod archive;
pub mod error;
pub mod numpy;
pub mod pickle;
