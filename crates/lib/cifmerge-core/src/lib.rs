#![forbid(unsafe_code)]

pub use hashbrown;

pub mod batch;
pub mod error;
pub mod image;
pub mod labels;
pub mod merge;
