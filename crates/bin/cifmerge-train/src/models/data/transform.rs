use std::fmt::Debug;
use std::sync::Arc;

use rand::{Rng, RngCore};

use cifmerge_core::image::{ImagePixels, CHANNELS, IMAGE_HEIGHT, IMAGE_WIDTH};

/// A per-sample augmentation applied to channel-last pixels.
pub trait ImageTransform: Debug + Send + Sync {
    fn apply(&self, image: &ImagePixels, rng: &mut dyn RngCore) -> ImagePixels;
}

/// Pads the image with zeros on every side and cuts a random 32x32 window.
#[derive(Debug, Clone, Copy)]
pub struct RandomCrop {
    padding: usize,
}

impl RandomCrop {
    pub fn new(padding: usize) -> Self {
        Self { padding }
    }

    /// The window whose top-left corner sits at (`top`, `left`) of the padded image.
    pub fn crop_at(&self, image: &ImagePixels, top: usize, left: usize) -> ImagePixels {
        let mut cropped = ImagePixels::zeroed();
        for row in 0..IMAGE_HEIGHT {
            let Some(src_row) = (top + row).checked_sub(self.padding) else {
                continue;
            };
            if src_row >= IMAGE_HEIGHT {
                continue;
            }
            for col in 0..IMAGE_WIDTH {
                let Some(src_col) = (left + col).checked_sub(self.padding) else {
                    continue;
                };
                if src_col >= IMAGE_WIDTH {
                    continue;
                }
                for channel in 0..CHANNELS {
                    cropped.set_pixel(row, col, channel, image.pixel(src_row, src_col, channel));
                }
            }
        }
        cropped
    }
}

impl ImageTransform for RandomCrop {
    fn apply(&self, image: &ImagePixels, rng: &mut dyn RngCore) -> ImagePixels {
        let top = rng.gen_range(0..=2 * self.padding);
        let left = rng.gen_range(0..=2 * self.padding);
        self.crop_at(image, top, left)
    }
}

/// Mirrors the columns with the given probability.
#[derive(Debug, Clone, Copy)]
pub struct RandomHorizontalFlip {
    probability: f64,
}

impl RandomHorizontalFlip {
    pub fn new(probability: f64) -> Self {
        Self {
            probability: probability.clamp(0.0, 1.0),
        }
    }

    pub fn flip(image: &ImagePixels) -> ImagePixels {
        let mut flipped = ImagePixels::zeroed();
        for row in 0..IMAGE_HEIGHT {
            for col in 0..IMAGE_WIDTH {
                for channel in 0..CHANNELS {
                    let value = image.pixel(row, IMAGE_WIDTH - 1 - col, channel);
                    flipped.set_pixel(row, col, channel, value);
                }
            }
        }
        flipped
    }
}

impl Default for RandomHorizontalFlip {
    fn default() -> Self {
        Self::new(0.5)
    }
}

impl ImageTransform for RandomHorizontalFlip {
    fn apply(&self, image: &ImagePixels, rng: &mut dyn RngCore) -> ImagePixels {
        if rng.gen_bool(self.probability) {
            Self::flip(image)
        } else {
            image.clone()
        }
    }
}

/// Runs transforms in order.
#[derive(Debug, Clone, Default)]
pub struct Compose {
    transforms: Vec<Arc<dyn ImageTransform>>,
}

impl Compose {
    pub fn new(transforms: Vec<Arc<dyn ImageTransform>>) -> Self {
        Self { transforms }
    }

    /// Random crop with 4 pixels of padding followed by a coin-flip mirror.
    pub fn train_augmentation() -> Self {
        Self::new(vec![
            Arc::new(RandomCrop::new(4)),
            Arc::new(RandomHorizontalFlip::default()),
        ])
    }
}

impl ImageTransform for Compose {
    fn apply(&self, image: &ImagePixels, rng: &mut dyn RngCore) -> ImagePixels {
        self.transforms
            .iter()
            .fold(image.clone(), |current, transform| transform.apply(&current, rng))
    }
}
