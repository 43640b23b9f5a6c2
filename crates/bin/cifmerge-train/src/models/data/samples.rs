use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use burn::data::dataset::Dataset;
use rand::rngs::StdRng;
use rand::SeedableRng;

use cifmerge_core::image::ImagePixels;
use cifmerge_core::merge::MergedDataset;

use crate::models::data::transform::ImageTransform;

#[derive(Clone, Debug, PartialEq)]
pub struct CifarItem {
    pub image: ImagePixels,
    pub label: usize,
}

#[derive(Debug)]
struct Augmentation {
    transform: Arc<dyn ImageTransform>,
    seed: u64,
    epoch: AtomicUsize,
}

impl Augmentation {
    /// Every (epoch, index) pair draws from its own stream, so results do not
    /// depend on which loader worker asks for the sample.
    fn rng(&self, index: usize) -> StdRng {
        let epoch = self.epoch.load(Ordering::Relaxed) as u64;
        StdRng::seed_from_u64(self.seed ^ (epoch << 40) ^ index as u64)
    }
}

/// Indexable view over a merged split, optionally augmenting every sample it hands out.
#[derive(Clone, Debug)]
pub struct SampleContainer {
    samples: Arc<MergedDataset>,
    augmentation: Option<Arc<Augmentation>>,
}

impl SampleContainer {
    pub fn new(samples: MergedDataset) -> Self {
        Self {
            samples: Arc::new(samples),
            augmentation: None,
        }
    }

    /// Runs `transform` on every sample, drawing randomness from `seed`.
    pub fn with_transform(mut self, transform: Arc<dyn ImageTransform>, seed: u64) -> Self {
        self.augmentation = Some(Arc::new(Augmentation {
            transform,
            seed,
            epoch: AtomicUsize::new(0),
        }));
        self
    }

    /// Moves augmentation to the random stream of `epoch`. Clones share the epoch.
    pub fn set_epoch(&self, epoch: usize) {
        if let Some(augmentation) = &self.augmentation {
            augmentation.epoch.store(epoch, Ordering::Relaxed);
        }
    }
}

impl Dataset<CifarItem> for SampleContainer {
    fn get(&self, index: usize) -> Option<CifarItem> {
        let (image, label) = self.samples.get(index)?;
        let image = match &self.augmentation {
            Some(augmentation) => augmentation
                .transform
                .apply(image, &mut augmentation.rng(index)),
            None => image.clone(),
        };
        Some(CifarItem {
            image,
            label: usize::from(label),
        })
    }

    fn len(&self) -> usize {
        self.samples.len()
    }
}
