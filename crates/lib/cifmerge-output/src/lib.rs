#![forbid(unsafe_code)]

pub mod checkpoint;
pub mod error;
pub mod logger;
pub mod trace;
