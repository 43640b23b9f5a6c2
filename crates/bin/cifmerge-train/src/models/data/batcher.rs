use burn::data::dataloader::batcher::Batcher;
use burn::prelude::Backend;
use burn::tensor::{Device, Int, Shape, Tensor, TensorData};

use cifmerge_core::image::{CHANNELS, IMAGE_HEIGHT, IMAGE_WIDTH};

use crate::models::data::samples::CifarItem;

const MEAN: [f32; 3] = [0.4914, 0.4822, 0.4465];
const STD: [f32; 3] = [0.2023, 0.1994, 0.2010];

/// Per-channel standardization with the CIFAR-10 statistics.
#[derive(Clone, Debug)]
pub struct Normalizer<B: Backend> {
    pub mean: Tensor<B, 4>,
    pub std: Tensor<B, 4>,
}

impl<B: Backend> Normalizer<B> {
    pub fn new(device: &Device<B>) -> Self {
        let mean = Tensor::<B, 1>::from_floats(MEAN, device).reshape([1, 3, 1, 1]);
        let std = Tensor::<B, 1>::from_floats(STD, device).reshape([1, 3, 1, 1]);
        Self { mean, std }
    }

    /// Expects inputs scaled to [0, 1].
    pub fn normalize(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
        (input - self.mean.clone()) / self.std.clone()
    }
}

#[derive(Debug, Clone)]
pub struct CifarBatch<B: Backend> {
    pub images: Tensor<B, 4>,
    pub targets: Tensor<B, 1, Int>,
}

/// Turns items into `[B, 3, 32, 32]` tensors scaled to [0, 1], standardized
/// per channel when built with `normalize`.
#[derive(Clone, Debug)]
pub struct CifarBatcher<B: Backend> {
    normalizer: Option<Normalizer<B>>,
    device: B::Device,
}

impl<B: Backend> CifarBatcher<B> {
    pub fn new(device: B::Device, normalize: bool) -> Self {
        let normalizer = normalize.then(|| Normalizer::new(&device));
        Self { normalizer, device }
    }
}

impl<B: Backend> Batcher<CifarItem, CifarBatch<B>> for CifarBatcher<B> {
    fn batch(&self, items: Vec<CifarItem>) -> CifarBatch<B> {
        let labels: Vec<i64> = items.iter().map(|item| item.label as i64).collect();
        let targets = Tensor::<B, 1, Int>::from_data(
            TensorData::new(labels, Shape::new([items.len()])).convert::<B::IntElem>(),
            &self.device,
        );

        let images = items
            .into_iter()
            .map(|item| {
                TensorData::new(
                    item.image.into_vec(),
                    Shape::new([IMAGE_HEIGHT, IMAGE_WIDTH, CHANNELS]),
                )
            })
            .map(|data| {
                Tensor::<B, 3>::from_data(data.convert::<B::FloatElem>(), &self.device)
                    .swap_dims(2, 1) // [H, C, W]
                    .swap_dims(1, 0) // [C, H, W]
            })
            .map(|tensor| tensor / 255)
            .collect();

        let images = Tensor::stack(images, 0);
        let images = match &self.normalizer {
            Some(normalizer) => normalizer.normalize(images),
            None => images,
        };

        CifarBatch { images, targets }
    }
}

#[cfg(test)]
mod tests {
    use burn::backend::NdArray;

    use cifmerge_core::image::{ImagePixels, RECORD_SIZE};

    use super::*;

    type TestBackend = NdArray;

    fn items() -> Vec<CifarItem> {
        let mut pixels = vec![0u8; RECORD_SIZE];
        // row 0, col 1, green
        pixels[CHANNELS + 1] = 255;
        vec![
            CifarItem {
                image: ImagePixels::from_channel_last(pixels).expect("valid"),
                label: 10,
            },
            CifarItem {
                image: ImagePixels::zeroed(),
                label: 3,
            },
        ]
    }

    const GREEN_PLANE: usize = IMAGE_HEIGHT * IMAGE_WIDTH;

    #[test]
    fn batch_is_channel_first_and_normalized() {
        let batcher = CifarBatcher::<TestBackend>::new(Default::default(), true);
        let batch = batcher.batch(items());
        assert_eq!(batch.images.dims(), [2, 3, 32, 32]);
        let targets = batch.targets.into_data().to_vec::<i64>().expect("int targets");
        assert_eq!(targets, vec![10, 3]);

        let values = batch.images.into_data().to_vec::<f32>().expect("float images");
        let expected_white = (1.0 - MEAN[1]) / STD[1];
        let expected_black = (0.0 - MEAN[1]) / STD[1];
        assert!((values[GREEN_PLANE + 1] - expected_white).abs() < 1e-4);
        assert!((values[GREEN_PLANE] - expected_black).abs() < 1e-4);
    }

    #[test]
    fn plain_batch_is_only_scaled() {
        let batcher = CifarBatcher::<TestBackend>::new(Default::default(), false);
        let batch = batcher.batch(items());
        assert_eq!(batch.images.dims(), [2, 3, 32, 32]);

        let values = batch.images.into_data().to_vec::<f32>().expect("float images");
        assert!((values[GREEN_PLANE + 1] - 1.0).abs() < 1e-6);
        assert_eq!(values[GREEN_PLANE], 0.0);
        assert!(values.iter().all(|&value| (0.0..=1.0).contains(&value)));
    }
}
