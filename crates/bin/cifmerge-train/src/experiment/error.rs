use std::path::PathBuf;

use thiserror::Error;

use cifmerge_core::error::DataError;
use cifmerge_input::error::LoadError;
use cifmerge_output::error::OutputError;

#[derive(Debug, Error)]
pub enum TrainError {
    #[error(transparent)]
    Load(#[from] LoadError),

    #[error(transparent)]
    Data(#[from] DataError),

    #[error(transparent)]
    Output(#[from] OutputError),

    #[error("no checkpoint directory found at {}", .0.display())]
    MissingCheckpoint(PathBuf),

    #[error("model record {} could not be used: {reason}", .path.display())]
    Record { path: PathBuf, reason: String },
}
