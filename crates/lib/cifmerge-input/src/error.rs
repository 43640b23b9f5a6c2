use std::io;
use std::path::PathBuf;

use cifmerge_core::error::DataError;
use thiserror::Error;

use crate::pickle::PickleError;

/// Fatal problems while reading an archive file. Every variant names the file.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to open {}: {source}", .path.display())]
    Io { path: PathBuf, source: io::Error },

    #[error("failed to unpickle {}: {source}", .path.display())]
    Pickle { path: PathBuf, source: PickleError },

    #[error("{} has no '{key}' entry", .path.display())]
    MissingKey { path: PathBuf, key: String },

    #[error("'{key}' in {} is not {expected}", .path.display())]
    UnexpectedType {
        path: PathBuf,
        key: String,
        expected: String,
    },

    #[error("invalid contents in {}: {source}", .path.display())]
    Data { path: PathBuf, source: DataError },
}

impl LoadError {
    pub fn path(&self) -> &PathBuf {
        match self {
            LoadError::Io { path, .. }
            | LoadError::Pickle { path, .. }
            | LoadError::MissingKey { path, .. }
            | LoadError::UnexpectedType { path, .. }
            | LoadError::Data { path, .. } => path,
        }
    }
}
