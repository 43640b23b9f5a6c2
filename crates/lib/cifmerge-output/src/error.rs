use std::io;
use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum OutputError {
    #[error("failed to access {}: {source}", .path.display())]
    Io { path: PathBuf, source: io::Error },

    #[error("failed to write csv row: {0}")]
    Csv(#[from] csv::Error),

    #[error("failed to encode checkpoint metadata: {0}")]
    Encode(#[from] toml::ser::Error),

    #[error("failed to decode checkpoint metadata in {}: {source}", .path.display())]
    Decode {
        path: PathBuf,
        source: toml::de::Error,
    },
}
