use std::fs;
use std::path::{Path, PathBuf};

use log::info;
use serde::{Deserialize, Serialize};

use crate::error::OutputError;

#[derive(Deserialize, Debug, Clone)]
pub struct CheckpointSettings {
    pub checkpoint_dir: String,
    pub load_name: String,
    pub save_name: String,
}

/// Best test accuracy reached and the epoch it was reached in.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct CheckpointMeta {
    pub acc: f64,
    pub epoch: usize,
}

/// File locations of the model record and its metadata sidecar.
#[derive(Debug, Clone)]
pub struct CheckpointPaths {
    dir: PathBuf,
    load_name: String,
    save_name: String,
}

impl CheckpointPaths {
    pub fn new(config_path: &Path, settings: &CheckpointSettings) -> Self {
        Self {
            dir: config_path.join(&settings.checkpoint_dir),
            load_name: settings.load_name.clone(),
            save_name: settings.save_name.clone(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Model record to resume from, without extension.
    pub fn load_model(&self) -> PathBuf {
        self.dir.join(&self.load_name)
    }

    pub fn load_meta(&self) -> PathBuf {
        self.dir.join(format!("{}.toml", self.load_name))
    }

    /// Model record to write on improvement, without extension.
    pub fn save_model(&self) -> PathBuf {
        self.dir.join(&self.save_name)
    }

    pub fn save_meta(&self) -> PathBuf {
        self.dir.join(format!("{}.toml", self.save_name))
    }

    pub fn ensure_dir(&self) -> Result<(), OutputError> {
        fs::create_dir_all(&self.dir).map_err(|source| OutputError::Io {
            path: self.dir.clone(),
            source,
        })
    }
}

impl CheckpointMeta {
    pub fn write(&self, path: &Path) -> Result<(), OutputError> {
        let contents = toml::to_string(self)?;
        fs::write(path, contents).map_err(|source| OutputError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        info!(
            "Checkpoint metadata written to {}: acc {:.3}, epoch {}",
            path.display(),
            self.acc,
            self.epoch
        );
        Ok(())
    }

    pub fn read(path: &Path) -> Result<Self, OutputError> {
        let contents = fs::read_to_string(path).map_err(|source| OutputError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&contents).map_err(|source| OutputError::Decode {
            path: path.to_path_buf(),
            source,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metadata_survives_a_write() {
        let dir = tempfile::tempdir().expect("temp dir");
        let settings = CheckpointSettings {
            checkpoint_dir: "checkpoint".to_string(),
            load_name: "ckpt".to_string(),
            save_name: "resnet18-ckpt".to_string(),
        };
        let paths = CheckpointPaths::new(dir.path(), &settings);
        paths.ensure_dir().expect("checkpoint dir");

        let meta = CheckpointMeta {
            acc: 87.25,
            epoch: 14,
        };
        meta.write(&paths.save_meta()).expect("written");
        assert!(paths.save_meta().ends_with("checkpoint/resnet18-ckpt.toml"));
        assert_eq!(CheckpointMeta::read(&paths.save_meta()).expect("read"), meta);
    }

    #[test]
    fn missing_metadata_is_an_io_error() {
        let dir = tempfile::tempdir().expect("temp dir");
        let error = CheckpointMeta::read(&dir.path().join("ckpt.toml")).unwrap_err();
        assert!(matches!(error, OutputError::Io { .. }));
    }
}
