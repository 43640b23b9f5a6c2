use std::path::{Path, PathBuf};
use std::sync::Arc;

use burn::backend::wgpu::WgpuDevice;
use burn::backend::{Autodiff, Wgpu};
use log::{debug, info};

use cifmerge_core::batch::RawBatch;
use cifmerge_core::error::DataError;
use cifmerge_core::labels::SelectionPlan;
use cifmerge_core::merge::MergedDataset;
use cifmerge_input::archive::{load_cifar10, load_cifar100};
use cifmerge_output::checkpoint::CheckpointPaths;
use cifmerge_output::logger::initiate_logger;
use cifmerge_output::trace::EpochTrace;

use crate::experiment::config::{BaseConfig, BaseConfigReader, DataSettings};
use crate::experiment::error::TrainError;
use crate::models::ai::resnet::ResNetConfig;
use crate::models::ai::schedule::CosineSchedule;
use crate::models::ai::trainer::Trainer;
use crate::models::data::samples::SampleContainer;
use crate::models::data::transform::Compose;

pub type TrainBackend = Wgpu<f32, i32>;
pub type TrainAdBackend = Autodiff<TrainBackend>;

/// Both merged splits and the class count the classifier needs.
#[derive(Debug, Clone)]
pub struct MergedSplits {
    pub train: MergedDataset,
    pub test: MergedDataset,
    pub num_classes: usize,
}

fn merge_split(
    base: &RawBatch,
    base_classes: usize,
    fine: Option<&RawBatch>,
    plan: &SelectionPlan,
) -> Result<MergedDataset, DataError> {
    let merged = MergedDataset::from_archive(base.decode_images()?, base.labels(), base_classes)?;
    let Some(fine) = fine else {
        return Ok(merged);
    };
    let subset = plan.apply(&fine.decode_images()?, fine.labels())?;
    Ok(merged.concat(subset))
}

fn log_label_counts(split: &str, dataset: &MergedDataset) {
    info!("{} split holds {} samples", split, dataset.len());
    for (label, count) in dataset.label_counts() {
        debug!("{} split: label {} has {} samples", split, label, count);
    }
}

/// Loads both archives and appends the configured superclasses to every
/// CIFAR-10 split. CIFAR-100 is only read when superclasses are configured.
pub fn build_dataset(settings: &DataSettings) -> Result<MergedSplits, TrainError> {
    let base = load_cifar10(Path::new(&settings.cifar10_dir), settings.train_batches)?;
    let base_classes = base.taxonomy.len();

    let fine = if settings.superclasses.is_empty() {
        info!("No superclasses configured, training on CIFAR-10 alone");
        None
    } else {
        Some(load_cifar100(Path::new(&settings.cifar100_dir))?)
    };
    let plan = match &fine {
        Some(fine) => SelectionPlan::new(&settings.superclasses, &fine.taxonomy, base_classes)?,
        None => SelectionPlan::new(&[], &base.taxonomy, base_classes)?,
    };
    for selection in plan.selections() {
        info!(
            "Superclass '{}' takes {} fine classes as label {}",
            selection.name(),
            selection.indices().len(),
            selection.synthetic_label()
        );
    }

    let train = merge_split(&base.train, base_classes, fine.as_ref().map(|f| &f.train), &plan)?;
    let test = merge_split(&base.test, base_classes, fine.as_ref().map(|f| &f.test), &plan)?;
    log_label_counts("Train", &train);
    log_label_counts("Test", &test);

    let num_classes = plan
        .synthetic_labels()
        .iter()
        .map(|&label| usize::from(label) + 1)
        .fold(base_classes, usize::max);
    info!("Classifier covers {} classes", num_classes);

    Ok(MergedSplits {
        train,
        test,
        num_classes,
    })
}

pub struct TrainBuilder {
    base_config: BaseConfig,
    config_path: PathBuf,
    learning_rate: Option<f64>,
    resume: bool,
    default_device: WgpuDevice,
}

impl TrainBuilder {
    pub(crate) fn new(base_config_file: &str) -> Self {
        if !Path::new(base_config_file).exists() {
            panic!("Configuration file is not found.");
        }
        let config_reader = BaseConfigReader::new(base_config_file);
        match config_reader.parse() {
            Ok(base_config) => Self {
                base_config,
                config_path: config_reader.config_dir(),
                learning_rate: None,
                resume: false,
                default_device: WgpuDevice::BestAvailable,
            },
            Err(e) => {
                panic!("Error while parsing the base configuration file: {}", e);
            }
        }
    }

    /// Replaces the configured initial learning rate.
    pub(crate) fn with_learning_rate(mut self, learning_rate: Option<f64>) -> Self {
        self.learning_rate = learning_rate;
        self
    }

    pub(crate) fn with_resume(mut self, resume: bool) -> Self {
        self.resume = resume;
        self
    }

    pub(crate) fn build(&mut self) -> Result<Trainer<TrainAdBackend>, TrainError> {
        initiate_logger(&self.config_path, &self.base_config.log_settings);

        info!("Preparing data...");
        let data_settings = self.base_config.data_settings.resolved(&self.config_path);
        let splits = build_dataset(&data_settings)?;

        let mut settings = self.base_config.training_settings.clone();
        if let Some(learning_rate) = self.learning_rate {
            info!("Learning rate overridden to {}", learning_rate);
            settings.learning_rate = learning_rate;
        }
        let schedule = CosineSchedule::new(
            settings.learning_rate,
            settings.min_learning_rate,
            settings.t_max,
        );

        info!("Building model...");
        let model = ResNetConfig::new(splits.num_classes).init::<TrainAdBackend>(&self.default_device);
        let mut train_data = SampleContainer::new(splits.train);
        if settings.augment {
            info!("Augmenting training samples with random crops and flips");
            train_data =
                train_data.with_transform(Arc::new(Compose::train_augmentation()), settings.seed);
        }
        let test_data = SampleContainer::new(splits.test);

        let checkpoints =
            CheckpointPaths::new(&self.config_path, &self.base_config.checkpoint_settings);
        let trace = EpochTrace::new(&self.config_path, &self.base_config.output_settings)?;

        let mut trainer = Trainer::<TrainAdBackend>::builder()
            .model(model)
            .settings(settings)
            .schedule(schedule)
            .train_data(train_data)
            .test_data(test_data)
            .checkpoints(checkpoints)
            .trace(trace)
            .device(self.default_device.clone())
            .build();
        if self.resume {
            trainer.resume()?;
        }
        Ok(trainer)
    }
}

#[cfg(test)]
mod tests {
    use cifmerge_core::image::ImagePixels;
    use cifmerge_core::labels::SuperclassSettings;
    use cifmerge_testutils::archive::{
        record_tag, write_cifar10, write_cifar100, FLOWERS, TREES,
    };
    use cifmerge_testutils::pickler::Protocol;

    use super::*;

    fn tag(image: &ImagePixels) -> u16 {
        record_tag(image.pixel(0, 0, 0), image.pixel(0, 0, 1))
    }

    fn superclass(name: &str, labels: &[&str], synthetic_label: u8) -> SuperclassSettings {
        SuperclassSettings {
            name: name.to_string(),
            labels: labels.iter().map(|label| label.to_string()).collect(),
            synthetic_label,
        }
    }

    fn settings(root: &Path, superclasses: Vec<SuperclassSettings>) -> DataSettings {
        DataSettings {
            cifar10_dir: root.join("cifar10").to_string_lossy().into_owned(),
            cifar100_dir: root.join("cifar100").to_string_lossy().into_owned(),
            train_batches: 2,
            superclasses,
        }
    }

    fn write_archives(root: &Path) {
        let shard_one: Vec<i64> = (0..5).collect();
        let shard_two: Vec<i64> = (5..10).collect();
        write_cifar10(&root.join("cifar10"), &[shard_one, shard_two], &[3, 7])
            .expect("cifar10 fixture");
        let fine_train: Vec<i64> = (0..14).collect();
        write_cifar100(
            &root.join("cifar100"),
            &fine_train,
            &[2, 0, 12],
            100,
            Protocol::Four,
        )
        .expect("cifar100 fixture");
    }

    #[test]
    fn flowers_and_trees_share_one_label() {
        let dir = tempfile::tempdir().expect("temp dir");
        write_archives(dir.path());
        let splits = build_dataset(&settings(
            dir.path(),
            vec![
                superclass("flowers", &FLOWERS, 10),
                superclass("trees", &TREES, 10),
            ],
        ))
        .expect("merged splits");

        assert_eq!(splits.num_classes, 11);
        assert_eq!(splits.train.len(), 20);
        for (idx, image) in splits.train.images()[..10].iter().enumerate() {
            assert_eq!(tag(image), idx as u16);
            assert_eq!(splits.train.labels()[idx], idx as u8);
        }
        assert!(splits.train.labels()[10..].iter().all(|&label| label == 10));
        let appended: Vec<u16> = splits.train.images()[10..].iter().map(tag).collect();
        assert_eq!(
            appended,
            vec![102, 105, 106, 108, 110, 101, 104, 107, 109, 111]
        );

        assert_eq!(splits.test.labels(), &[3, 7, 10]);
        assert_eq!(tag(&splits.test.images()[2]), 100);
    }

    #[test]
    fn distinct_synthetic_labels_widen_the_classifier() {
        let dir = tempfile::tempdir().expect("temp dir");
        write_archives(dir.path());
        let splits = build_dataset(&settings(
            dir.path(),
            vec![
                superclass("flowers", &FLOWERS, 10),
                superclass("trees", &TREES, 11),
            ],
        ))
        .expect("merged splits");
        assert_eq!(splits.num_classes, 12);
        assert_eq!(splits.train.label_counts().get(&11), Some(&5));
    }

    #[test]
    fn without_superclasses_cifar100_is_not_needed() {
        let dir = tempfile::tempdir().expect("temp dir");
        write_cifar10(&dir.path().join("cifar10"), &[vec![1, 2], vec![3]], &[4])
            .expect("cifar10 fixture");
        let splits = build_dataset(&settings(dir.path(), Vec::new())).expect("base only");
        assert_eq!(splits.num_classes, 10);
        assert_eq!(splits.train.labels(), &[1, 2, 3]);
        assert_eq!(splits.test.labels(), &[4]);
    }

    #[test]
    fn synthetic_label_inside_base_range_is_rejected() {
        let dir = tempfile::tempdir().expect("temp dir");
        write_archives(dir.path());
        let result = build_dataset(&settings(dir.path(), vec![superclass("flowers", &FLOWERS, 4)]));
        assert!(matches!(
            result,
            Err(TrainError::Data(DataError::LabelCollision { label: 4, .. }))
        ));
    }

    #[test]
    fn base_label_outside_taxonomy_is_rejected() {
        let dir = tempfile::tempdir().expect("temp dir");
        write_cifar10(&dir.path().join("cifar10"), &[vec![1, 12]], &[4]).expect("cifar10 fixture");
        let mut data = settings(dir.path(), Vec::new());
        data.train_batches = 1;
        let result = build_dataset(&data);
        assert!(matches!(
            result,
            Err(TrainError::Data(DataError::UnknownBaseLabel { label: 12, classes: 10 }))
        ));
    }

    #[test]
    fn missing_base_archive_is_a_load_error() {
        let dir = tempfile::tempdir().expect("temp dir");
        let result = build_dataset(&settings(dir.path(), Vec::new()));
        assert!(matches!(result, Err(TrainError::Load(_))));
    }
}
