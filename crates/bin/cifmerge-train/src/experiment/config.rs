use std::path::{Path, PathBuf};

use serde::Deserialize;

use cifmerge_core::labels::SuperclassSettings;
use cifmerge_output::checkpoint::CheckpointSettings;
use cifmerge_output::logger::LogSettings;
use cifmerge_output::trace::OutputSettings;

fn default_train_batches() -> usize {
    5
}

/// Where the two python archives live and which fine classes to fold in.
#[derive(Deserialize, Debug, Clone)]
pub struct DataSettings {
    pub cifar10_dir: String,
    pub cifar100_dir: String,
    #[serde(default = "default_train_batches")]
    pub train_batches: usize,
    #[serde(default)]
    pub superclasses: Vec<SuperclassSettings>,
}

impl DataSettings {
    /// Resolves relative archive directories against `base`.
    pub fn resolved(&self, base: &Path) -> Self {
        let resolve = |dir: &str| -> String { base.join(dir).to_string_lossy().into_owned() };
        Self {
            cifar10_dir: resolve(&self.cifar10_dir),
            cifar100_dir: resolve(&self.cifar100_dir),
            ..self.clone()
        }
    }
}

fn default_epochs() -> usize {
    230
}

fn default_batch_size() -> usize {
    32
}

fn default_seed() -> u64 {
    42
}

fn default_learning_rate() -> f64 {
    0.1
}

fn default_momentum() -> f64 {
    0.9
}

fn default_weight_decay() -> f32 {
    5e-4
}

fn default_t_max() -> usize {
    200
}

fn default_true() -> bool {
    true
}

#[derive(Deserialize, Debug, Clone)]
pub struct TrainingSettings {
    #[serde(default = "default_epochs")]
    pub num_epochs: usize,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default)]
    pub num_workers: usize,
    #[serde(default = "default_seed")]
    pub seed: u64,
    #[serde(default = "default_learning_rate")]
    pub learning_rate: f64,
    #[serde(default)]
    pub min_learning_rate: f64,
    #[serde(default = "default_momentum")]
    pub momentum: f64,
    #[serde(default = "default_weight_decay")]
    pub weight_decay: f32,
    #[serde(default = "default_t_max")]
    pub t_max: usize,
    #[serde(default = "default_true")]
    pub shuffle_test: bool,
    /// Random crop and flip on training samples.
    #[serde(default)]
    pub augment: bool,
    /// Per-channel mean/std standardization after scaling to [0, 1].
    #[serde(default)]
    pub normalize: bool,
}

#[derive(Deserialize, Debug, Clone)]
pub(crate) struct BaseConfig {
    pub(crate) log_settings: LogSettings,
    pub(crate) data_settings: DataSettings,
    pub(crate) training_settings: TrainingSettings,
    pub(crate) checkpoint_settings: CheckpointSettings,
    pub(crate) output_settings: OutputSettings,
}

pub struct BaseConfigReader {
    file_path: PathBuf,
}

impl BaseConfigReader {
    pub fn new(file_name: &str) -> Self {
        let file_path = PathBuf::from(file_name);
        Self { file_path }
    }

    pub(crate) fn parse(&self) -> Result<BaseConfig, Box<dyn std::error::Error>> {
        let parsing_result = std::fs::read_to_string(&self.file_path)?;
        let config: BaseConfig = toml::from_str(&parsing_result)?;
        Ok(config)
    }

    /// Directory that relative paths in the file are resolved against.
    pub fn config_dir(&self) -> PathBuf {
        match self.file_path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        }
    }
}
