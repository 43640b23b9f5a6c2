use std::sync::Arc;

use burn::data::dataloader::{DataLoader, DataLoaderBuilder};
use burn::module::{AutodiffModule, Module};
use burn::nn::loss::CrossEntropyLossConfig;
use burn::optim::decay::WeightDecayConfig;
use burn::optim::momentum::MomentumConfig;
use burn::optim::{GradientsParams, Optimizer, SgdConfig};
use burn::prelude::Backend;
use burn::record::CompactRecorder;
use burn::tensor::backend::AutodiffBackend;
use burn::tensor::{ElementConversion, Int, Tensor};
use log::{debug, info};
use typed_builder::TypedBuilder;

use cifmerge_output::checkpoint::{CheckpointMeta, CheckpointPaths};
use cifmerge_output::trace::{EpochRecord, EpochTrace};

use crate::experiment::config::TrainingSettings;
use crate::experiment::error::TrainError;
use crate::models::ai::resnet::ResNet;
use crate::models::ai::schedule::CosineSchedule;
use crate::models::data::batcher::{CifarBatch, CifarBatcher};
use crate::models::data::samples::SampleContainer;

/// Loss and accuracy accumulated over one pass through a loader.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct EpochStats {
    loss_sum: f64,
    batches: usize,
    pub correct: usize,
    pub total: usize,
}

impl EpochStats {
    fn record(&mut self, loss: f64, correct: usize, total: usize) {
        self.loss_sum += loss;
        self.batches += 1;
        self.correct += correct;
        self.total += total;
    }

    /// Mean of the per-batch losses.
    pub fn loss(&self) -> f64 {
        if self.batches == 0 {
            return 0.0;
        }
        self.loss_sum / self.batches as f64
    }

    /// Percentage of correctly classified samples.
    pub fn accuracy(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        100.0 * self.correct as f64 / self.total as f64
    }
}

fn count_correct<B: Backend>(output: Tensor<B, 2>, targets: Tensor<B, 1, Int>) -> usize {
    let predicted = output.argmax(1).squeeze::<1>(1);
    let correct = predicted.equal(targets).int().sum().into_scalar().elem::<i64>();
    correct.max(0) as usize
}

fn train_epoch<B, O>(
    mut model: ResNet<B>,
    optim: &mut O,
    learning_rate: f64,
    loader: &Arc<dyn DataLoader<CifarBatch<B>>>,
    device: &B::Device,
) -> (ResNet<B>, EpochStats)
where
    B: AutodiffBackend,
    O: Optimizer<ResNet<B>, B>,
{
    let loss_fn = CrossEntropyLossConfig::new().init(device);
    let mut stats = EpochStats::default();
    for batch in loader.iter() {
        let batch_size = batch.targets.dims()[0];
        let output = model.forward(batch.images);
        let loss = loss_fn.forward(output.clone(), batch.targets.clone());
        let correct = count_correct(output, batch.targets);
        stats.record(loss.clone().into_scalar().elem::<f64>(), correct, batch_size);

        let grads = GradientsParams::from_grads(loss.backward(), &model);
        model = optim.step(learning_rate, model, grads);
    }
    (model, stats)
}

fn test_epoch<B: Backend>(
    model: &ResNet<B>,
    loader: &Arc<dyn DataLoader<CifarBatch<B>>>,
    device: &B::Device,
) -> EpochStats {
    let loss_fn = CrossEntropyLossConfig::new().init(device);
    let mut stats = EpochStats::default();
    for batch in loader.iter() {
        let batch_size = batch.targets.dims()[0];
        let output = model.forward(batch.images);
        let loss = loss_fn.forward(output.clone(), batch.targets.clone());
        let correct = count_correct(output, batch.targets);
        stats.record(loss.into_scalar().elem::<f64>(), correct, batch_size);
    }
    stats
}

#[derive(TypedBuilder)]
pub(crate) struct Trainer<B: AutodiffBackend> {
    model: ResNet<B>,
    settings: TrainingSettings,
    schedule: CosineSchedule,
    train_data: SampleContainer,
    test_data: SampleContainer,
    checkpoints: CheckpointPaths,
    trace: EpochTrace,
    device: B::Device,
    #[builder(default)]
    best_acc: f64,
    #[builder(default)]
    start_epoch: usize,
}

impl<B: AutodiffBackend> Trainer<B> {
    /// Restores the model, best accuracy and starting epoch from the checkpoint directory.
    pub fn resume(&mut self) -> Result<(), TrainError> {
        let dir = self.checkpoints.dir();
        if !dir.is_dir() {
            return Err(TrainError::MissingCheckpoint(dir.to_path_buf()));
        }
        let model_path = self.checkpoints.load_model();
        info!("Resuming from checkpoint {}", model_path.display());
        self.model = self
            .model
            .clone()
            .load_file(model_path.clone(), &CompactRecorder::new(), &self.device)
            .map_err(|e| TrainError::Record {
                path: model_path,
                reason: format!("{:?}", e),
            })?;
        let meta = CheckpointMeta::read(&self.checkpoints.load_meta())?;
        self.best_acc = meta.acc;
        self.start_epoch = meta.epoch;
        info!(
            "Restored best accuracy {:.3} reached in epoch {}",
            self.best_acc, self.start_epoch
        );
        Ok(())
    }

    pub fn best_acc(&self) -> f64 {
        self.best_acc
    }

    fn loaders(
        &self,
    ) -> (
        Arc<dyn DataLoader<CifarBatch<B>>>,
        Arc<dyn DataLoader<CifarBatch<B::InnerBackend>>>,
    ) {
        let settings = &self.settings;
        let train_batcher = CifarBatcher::<B>::new(self.device.clone(), settings.normalize);
        let test_batcher =
            CifarBatcher::<B::InnerBackend>::new(self.device.clone(), settings.normalize);
        let mut train_builder = DataLoaderBuilder::new(train_batcher)
            .batch_size(settings.batch_size)
            .shuffle(settings.seed);
        let mut test_builder = DataLoaderBuilder::new(test_batcher).batch_size(settings.batch_size);
        if settings.shuffle_test {
            test_builder = test_builder.shuffle(settings.seed);
        }
        if settings.num_workers > 0 {
            train_builder = train_builder.num_workers(settings.num_workers);
            test_builder = test_builder.num_workers(settings.num_workers);
        }
        (
            train_builder.build(self.train_data.clone()),
            test_builder.build(self.test_data.clone()),
        )
    }

    fn save_checkpoint(&self, acc: f64, epoch: usize) -> Result<(), TrainError> {
        self.checkpoints.ensure_dir()?;
        let model_path = self.checkpoints.save_model();
        self.model
            .clone()
            .save_file(model_path.clone(), &CompactRecorder::new())
            .map_err(|e| TrainError::Record {
                path: model_path,
                reason: format!("{:?}", e),
            })?;
        CheckpointMeta { acc, epoch }.write(&self.checkpoints.save_meta())?;
        Ok(())
    }

    /// Trains for the configured number of epochs, checkpointing whenever the
    /// test accuracy beats the best seen so far. Returns the best accuracy.
    pub fn run(mut self) -> Result<f64, TrainError> {
        let settings = self.settings.clone();
        let (train_loader, test_loader) = self.loaders();
        info!(
            "Training on {} samples, testing on {} samples",
            train_loader.num_items(),
            test_loader.num_items()
        );

        let mut optim = SgdConfig::new()
            .with_momentum(Some(
                MomentumConfig::new()
                    .with_momentum(settings.momentum)
                    .with_dampening(0.0),
            ))
            .with_weight_decay(Some(WeightDecayConfig::new(settings.weight_decay.into())))
            .init::<B, ResNet<B>>();

        for step in 0..settings.num_epochs {
            let epoch = self.start_epoch + step;
            let learning_rate = self.schedule.learning_rate(step);
            info!("Epoch {} with learning rate {:.6}", epoch, learning_rate);
            self.train_data.set_epoch(epoch);

            let (model, train_stats) = train_epoch(
                self.model,
                &mut optim,
                learning_rate,
                &train_loader,
                &self.device,
            );
            self.model = model;
            info!(
                "Train | Loss: {:.6}, Acc: {:.3}% = {} / {}",
                train_stats.loss(),
                train_stats.accuracy(),
                train_stats.correct,
                train_stats.total
            );

            let test_stats = test_epoch(&self.model.valid(), &test_loader, &self.device);
            let acc = test_stats.accuracy();
            info!(
                "Test  | Loss: {:.6}, Acc: {:.3}% = {} / {}",
                test_stats.loss(),
                acc,
                test_stats.correct,
                test_stats.total
            );

            let checkpointed = acc > self.best_acc;
            if checkpointed {
                self.save_checkpoint(acc, epoch)?;
                self.best_acc = acc;
            } else {
                debug!("Accuracy {:.3} did not beat {:.3}", acc, self.best_acc);
            }

            self.trace.add_data(
                EpochRecord::builder()
                    .epoch(epoch)
                    .learning_rate(learning_rate)
                    .train_loss(train_stats.loss())
                    .train_accuracy(train_stats.accuracy())
                    .test_loss(test_stats.loss())
                    .test_accuracy(acc)
                    .checkpointed(checkpointed)
                    .build(),
            );
            self.trace.write_to_file()?;
        }

        info!(
            "Best test accuracy {:.3}, epoch trace in {}",
            self.best_acc,
            self.trace.file_name().display()
        );
        self.trace.close_file()?;
        Ok(self.best_acc)
    }
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::Path;

    use burn::backend::{Autodiff, NdArray};

    use cifmerge_core::image::{ImagePixels, RECORD_SIZE};
    use cifmerge_core::merge::MergedDataset;
    use cifmerge_output::checkpoint::CheckpointSettings;
    use cifmerge_output::trace::OutputSettings;

    use crate::models::ai::resnet::ResNetConfig;

    use super::*;

    type TestBackend = Autodiff<NdArray>;

    fn settings() -> TrainingSettings {
        TrainingSettings {
            num_epochs: 1,
            batch_size: 2,
            num_workers: 0,
            seed: 7,
            learning_rate: 0.01,
            min_learning_rate: 0.0,
            momentum: 0.9,
            weight_decay: 5e-4,
            t_max: 200,
            shuffle_test: false,
            augment: false,
            normalize: true,
        }
    }

    fn single_class_split(samples: u8) -> SampleContainer {
        let images = (0..samples)
            .map(|fill| ImagePixels::from_channel_last(vec![fill * 20; RECORD_SIZE]).expect("valid"))
            .collect();
        SampleContainer::new(MergedDataset::new(images, vec![0; samples as usize]).expect("aligned"))
    }

    fn trainer(dir: &Path, epoch_file: &str) -> Trainer<TestBackend> {
        let device = Default::default();
        let checkpoints = CheckpointPaths::new(
            dir,
            &CheckpointSettings {
                checkpoint_dir: "checkpoint".to_string(),
                load_name: "ckpt".to_string(),
                save_name: "ckpt".to_string(),
            },
        );
        let output = OutputSettings {
            output_path: "output".to_string(),
            epoch_file: epoch_file.to_string(),
        };
        Trainer::<TestBackend>::builder()
            .model(ResNetConfig::new(1).with_base_width(2).init::<TestBackend>(&device))
            .settings(settings())
            .schedule(CosineSchedule::new(0.01, 0.0, 200))
            .train_data(single_class_split(4))
            .test_data(single_class_split(2))
            .checkpoints(checkpoints)
            .trace(EpochTrace::new(dir, &output).expect("trace"))
            .device(device)
            .build()
    }

    #[test]
    fn stats_average_batch_losses() {
        let mut stats = EpochStats::default();
        stats.record(1.0, 3, 4);
        stats.record(3.0, 1, 4);
        assert_eq!(stats.loss(), 2.0);
        assert_eq!(stats.accuracy(), 50.0);
        assert_eq!(EpochStats::default().accuracy(), 0.0);
    }

    #[test]
    fn resume_without_checkpoint_dir_fails() {
        let dir = tempfile::tempdir().expect("temp dir");
        let mut trainer = trainer(dir.path(), "epochs.csv");
        assert!(matches!(trainer.resume(), Err(TrainError::MissingCheckpoint(_))));
    }

    #[test]
    fn improvement_is_checkpointed_and_resumable() {
        let dir = tempfile::tempdir().expect("temp dir");
        let best = trainer(dir.path(), "first.csv").run().expect("training run");
        assert_eq!(best, 100.0);
        assert!(dir.path().join("checkpoint/ckpt.mpk").exists());
        let meta = CheckpointMeta::read(&dir.path().join("checkpoint/ckpt.toml")).expect("meta");
        assert_eq!(meta, CheckpointMeta { acc: 100.0, epoch: 0 });

        let mut resumed = trainer(dir.path(), "second.csv");
        resumed.resume().expect("checkpoint present");
        assert_eq!(resumed.best_acc(), 100.0);
        resumed.run().expect("resumed run");
        let trace = fs::read_to_string(dir.path().join("output/second.csv")).expect("trace");
        let row = trace.lines().nth(1).expect("one epoch");
        assert!(row.starts_with("0,"));
        assert!(row.ends_with(",false"));
    }
}
