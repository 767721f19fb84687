//! Conditional patch discriminator over `(observation, candidate transmission)` pairs.

use crate::norm::LRELU_SLOPE;
use burn::module::Module;
use burn::nn::conv::{Conv2d, Conv2dConfig};
use burn::nn::{InstanceNorm, InstanceNormConfig, PaddingConfig2d};
use burn::tensor::activation::{leaky_relu, sigmoid};
use burn::tensor::{backend::Backend, Tensor};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PatchDiscriminatorConfig {
    /// Channels of the first layer; deeper layers double up to 8× this.
    pub base_channels: usize,
    /// Normalized layers after the first conv; the last one has stride 1.
    pub layers: usize,
}

impl Default for PatchDiscriminatorConfig {
    fn default() -> Self {
        Self {
            base_channels: 64,
            layers: 3,
        }
    }
}

fn patch_conv<B: Backend>(c_in: usize, c_out: usize, stride: usize, device: &B::Device) -> Conv2d<B> {
    Conv2dConfig::new([c_in, c_out], [4, 4])
        .with_stride([stride, stride])
        .with_padding(PaddingConfig2d::Explicit(1, 1))
        .init(device)
}

/// Strided conv followed by instance norm.
#[derive(Module, Debug)]
pub struct NormConv<B: Backend> {
    conv: Conv2d<B>,
    norm: InstanceNorm<B>,
}

/// Realism map plus the activation of every hidden layer.
#[derive(Debug, Clone)]
pub struct DiscriminatorOutput<B: Backend> {
    /// Per-patch probability that the candidate is a real transmission, `[B, 1, h, w]`.
    pub probability: Tensor<B, 4>,
    pub features: Vec<Tensor<B, 4>>,
}

#[derive(Module, Debug)]
pub struct PatchDiscriminator<B: Backend> {
    first: Conv2d<B>,
    blocks: Vec<NormConv<B>>,
    last: Conv2d<B>,
}

impl<B: Backend> PatchDiscriminator<B> {
    pub fn new(cfg: &PatchDiscriminatorConfig, device: &B::Device) -> Self {
        let base = cfg.base_channels.max(1);
        let first = patch_conv(6, base, 2, device);
        let mut blocks = Vec::with_capacity(cfg.layers);
        let mut c_in = base;
        for i in 0..cfg.layers {
            let c_out = base * (1usize << (i + 1)).min(8);
            let stride = if i + 1 == cfg.layers { 1 } else { 2 };
            blocks.push(NormConv {
                conv: patch_conv(c_in, c_out, stride, device),
                norm: InstanceNormConfig::new(c_out).init(device),
            });
            c_in = c_out;
        }
        let last = patch_conv(c_in, 1, 1, device);
        Self {
            first,
            blocks,
            last,
        }
    }

    pub fn forward(&self, input: Tensor<B, 4>, candidate: Tensor<B, 4>) -> DiscriminatorOutput<B> {
        let x = Tensor::cat(vec![input, candidate], 1);
        let mut x = leaky_relu(self.first.forward(x), LRELU_SLOPE);
        let mut features = Vec::with_capacity(self.blocks.len() + 1);
        features.push(x.clone());
        for block in &self.blocks {
            x = leaky_relu(block.norm.forward(block.conv.forward(x)), LRELU_SLOPE);
            features.push(x.clone());
        }
        DiscriminatorOutput {
            probability: sigmoid(self.last.forward(x)),
            features,
        }
    }
}
