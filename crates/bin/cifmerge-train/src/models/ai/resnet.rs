use burn::config::Config;
use burn::module::Module;
use burn::nn::conv::{Conv2d, Conv2dConfig};
use burn::nn::pool::{AdaptiveAvgPool2d, AdaptiveAvgPool2dConfig};
use burn::nn::{BatchNorm, BatchNormConfig, Linear, LinearConfig, PaddingConfig2d, Relu};
use burn::prelude::Backend;
use burn::tensor::Tensor;

/// Residual blocks per stage of ResNet-18.
const STAGE_BLOCKS: [usize; 4] = [2, 2, 2, 2];

fn conv3x3<B: Backend>(
    channels: [usize; 2],
    stride: usize,
    device: &B::Device,
) -> Conv2d<B> {
    Conv2dConfig::new(channels, [3, 3])
        .with_stride([stride, stride])
        .with_padding(PaddingConfig2d::Explicit(1, 1))
        .with_bias(false)
        .init(device)
}

#[derive(Module, Debug)]
pub struct Shortcut<B: Backend> {
    conv: Conv2d<B>,
    bn: BatchNorm<B, 2>,
}

impl<B: Backend> Shortcut<B> {
    fn new(channels: [usize; 2], stride: usize, device: &B::Device) -> Self {
        let conv = Conv2dConfig::new(channels, [1, 1])
            .with_stride([stride, stride])
            .with_bias(false)
            .init(device);
        let bn = BatchNormConfig::new(channels[1]).init(device);
        Self { conv, bn }
    }

    fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
        self.bn.forward(self.conv.forward(input))
    }
}

#[derive(Module, Debug)]
pub struct BasicBlock<B: Backend> {
    conv1: Conv2d<B>,
    bn1: BatchNorm<B, 2>,
    conv2: Conv2d<B>,
    bn2: BatchNorm<B, 2>,
    shortcut: Option<Shortcut<B>>,
    activation: Relu,
}

impl<B: Backend> BasicBlock<B> {
    fn new(channels: [usize; 2], stride: usize, device: &B::Device) -> Self {
        let [in_planes, planes] = channels;
        let shortcut = if stride != 1 || in_planes != planes {
            Some(Shortcut::new(channels, stride, device))
        } else {
            None
        };
        Self {
            conv1: conv3x3(channels, stride, device),
            bn1: BatchNormConfig::new(planes).init(device),
            conv2: conv3x3([planes, planes], 1, device),
            bn2: BatchNormConfig::new(planes).init(device),
            shortcut,
            activation: Relu::new(),
        }
    }

    pub fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
        let identity = match &self.shortcut {
            Some(shortcut) => shortcut.forward(input.clone()),
            None => input.clone(),
        };
        let x = self.conv1.forward(input);
        let x = self.activation.forward(self.bn1.forward(x));
        let x = self.bn2.forward(self.conv2.forward(x));
        self.activation.forward(x + identity)
    }
}

#[derive(Config, Debug)]
pub struct ResNetConfig {
    num_classes: usize,
    #[config(default = 64)]
    base_width: usize,
}

impl ResNetConfig {
    /// ResNet-18 for 32x32 inputs: a 3x3 stem without max-pooling and four
    /// stages doubling the width while halving the resolution.
    pub fn init<B: Backend>(&self, device: &B::Device) -> ResNet<B> {
        let stem = conv3x3([3, self.base_width], 1, device);
        let stem_bn = BatchNormConfig::new(self.base_width).init(device);

        let mut blocks = Vec::new();
        let mut in_planes = self.base_width;
        for (stage, &count) in STAGE_BLOCKS.iter().enumerate() {
            let planes = self.base_width << stage;
            let first_stride = if stage == 0 { 1 } else { 2 };
            for block in 0..count {
                let stride = if block == 0 { first_stride } else { 1 };
                blocks.push(BasicBlock::new([in_planes, planes], stride, device));
                in_planes = planes;
            }
        }

        ResNet {
            stem,
            stem_bn,
            blocks,
            pool: AdaptiveAvgPool2dConfig::new([1, 1]).init(),
            fc: LinearConfig::new(in_planes, self.num_classes).init(device),
            activation: Relu::new(),
        }
    }
}

#[derive(Module, Debug)]
pub struct ResNet<B: Backend> {
    stem: Conv2d<B>,
    stem_bn: BatchNorm<B, 2>,
    blocks: Vec<BasicBlock<B>>,
    pool: AdaptiveAvgPool2d,
    fc: Linear<B>,
    activation: Relu,
}

impl<B: Backend> ResNet<B> {
    /// Maps `[batch, 3, 32, 32]` images to `[batch, num_classes]` logits.
    pub fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 2> {
        let x = self.activation.forward(self.stem_bn.forward(self.stem.forward(input)));
        let x = self.blocks.iter().fold(x, |x, block| block.forward(x));
        let x = self.pool.forward(x);
        let x = x.flatten(1, 3);
        self.fc.forward(x)
    }
}
