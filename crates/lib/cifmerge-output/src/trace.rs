use std::fs::{self, File};
use std::path::{Path, PathBuf};

use csv::{Writer, WriterBuilder};
use log::debug;
use serde::{Deserialize, Serialize};
use typed_builder::TypedBuilder;

use crate::error::OutputError;

#[derive(Deserialize, Debug, Clone)]
pub struct OutputSettings {
    pub output_path: String,
    pub epoch_file: String,
}

/// Summary of one finished epoch.
#[derive(Serialize, Debug, Clone, PartialEq, TypedBuilder)]
pub struct EpochRecord {
    pub epoch: usize,
    pub learning_rate: f64,
    pub train_loss: f64,
    pub train_accuracy: f64,
    pub test_loss: f64,
    pub test_accuracy: f64,
    pub checkpointed: bool,
}

/// Per-epoch csv output. Rows are buffered and flushed by [EpochTrace::write_to_file].
#[derive(Debug)]
pub struct EpochTrace {
    records: Vec<EpochRecord>,
    writer: Writer<File>,
    file_name: PathBuf,
}

impl EpochTrace {
    /// Creates `<config dir>/<output_path>/<epoch_file>`, replacing an older trace.
    pub fn new(config_path: &Path, settings: &OutputSettings) -> Result<Self, OutputError> {
        let output_dir = config_path.join(&settings.output_path);
        fs::create_dir_all(&output_dir).map_err(|source| OutputError::Io {
            path: output_dir.clone(),
            source,
        })?;
        let file_name = output_dir.join(&settings.epoch_file);
        let file = File::create(&file_name).map_err(|source| OutputError::Io {
            path: file_name.clone(),
            source,
        })?;
        let writer = WriterBuilder::new().has_headers(true).from_writer(file);
        debug!("Writing epoch trace to {}", file_name.display());
        Ok(Self {
            records: Vec::new(),
            writer,
            file_name,
        })
    }

    pub fn add_data(&mut self, record: EpochRecord) {
        self.records.push(record);
    }

    pub fn file_name(&self) -> &Path {
        &self.file_name
    }

    pub fn write_to_file(&mut self) -> Result<(), OutputError> {
        for record in self.records.drain(..) {
            self.writer.serialize(record)?;
        }
        self.writer.flush().map_err(|source| OutputError::Io {
            path: self.file_name.clone(),
            source,
        })
    }

    pub fn close_file(mut self) -> Result<(), OutputError> {
        self.write_to_file()
    }
}
