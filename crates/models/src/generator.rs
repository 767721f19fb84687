//! Dilated context-aggregation generator producing transmission and reflection layers.
//!
//! Shapes:
//! - Input image: `[B, 3, H, W]` in [0, 1]
//! - Output: two `[B, 3, H, W]` layers (no output activation)

use crate::norm::{identity_conv, AdaptiveNorm, LRELU_SLOPE};
use crate::vgg::{Vgg19, Vgg19Config};
use burn::module::{Ignored, Module};
use burn::nn::conv::{Conv2d, Conv2dConfig};
use burn::nn::interpolate::{Interpolate2dConfig, InterpolateMode};
use burn::nn::PaddingConfig2d;
use burn::tensor::activation::leaky_relu;
use burn::tensor::{backend::Backend, Tensor};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReflectionNetConfig {
    /// Feature channels of every hidden layer.
    pub channel: usize,
    /// Concatenate VGG hypercolumns to the input.
    pub hyper: bool,
    /// Dilation of each 3×3 layer after the 1×1 stem.
    pub dilations: Vec<usize>,
    /// Extra input channels contributed by hypercolumns.
    pub hypercolumn_channels: usize,
}

impl Default for ReflectionNetConfig {
    fn default() -> Self {
        Self {
            channel: 64,
            hyper: true,
            dilations: vec![1, 2, 4, 8, 16, 32, 64, 1],
            hypercolumn_channels: Vgg19Config::default().hypercolumn_channels(),
        }
    }
}

impl ReflectionNetConfig {
    pub fn with_vgg(mut self, vgg: &Vgg19Config) -> Self {
        self.hypercolumn_channels = vgg.hypercolumn_channels();
        self
    }

    pub fn input_channels(&self) -> usize {
        if self.hyper {
            3 + self.hypercolumn_channels
        } else {
            3
        }
    }
}

/// conv → adaptive norm → leaky ReLU.
#[derive(Module, Debug)]
pub struct ConvNormBlock<B: Backend> {
    conv: Conv2d<B>,
    norm: AdaptiveNorm<B>,
}

impl<B: Backend> ConvNormBlock<B> {
    pub fn new(
        channels: [usize; 2],
        kernel: usize,
        dilation: usize,
        device: &B::Device,
    ) -> Self {
        Self {
            conv: identity_conv(channels, kernel, dilation, device),
            norm: AdaptiveNorm::new(channels[1], device),
        }
    }

    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        leaky_relu(self.norm.forward(self.conv.forward(x)), LRELU_SLOPE)
    }
}

/// The two predicted layers.
#[derive(Debug, Clone)]
pub struct SeparatedLayers<B: Backend> {
    pub transmission: Tensor<B, 4>,
    pub reflection: Tensor<B, 4>,
}

#[derive(Module, Debug)]
pub struct ReflectionNet<B: Backend> {
    stem: ConvNormBlock<B>,
    body: Vec<ConvNormBlock<B>>,
    head: Conv2d<B>,
    hyper: Ignored<bool>,
}

impl<B: Backend> ReflectionNet<B> {
    pub fn new(cfg: &ReflectionNetConfig, device: &B::Device) -> Self {
        let stem = ConvNormBlock::new([cfg.input_channels(), cfg.channel], 1, 1, device);
        let body = cfg
            .dilations
            .iter()
            .map(|d| ConvNormBlock::new([cfg.channel, cfg.channel], 3, *d, device))
            .collect();
        let head = Conv2dConfig::new([cfg.channel, 6], [1, 1])
            .with_padding(PaddingConfig2d::Valid)
            .init(device);
        Self {
            stem,
            body,
            head,
            hyper: Ignored(cfg.hyper),
        }
    }

    pub fn is_hyper(&self) -> bool {
        *self.hyper
    }

    /// `vgg` is only consulted when the network was built with hypercolumns.
    pub fn forward(&self, input: Tensor<B, 4>, vgg: &Vgg19<B>) -> SeparatedLayers<B> {
        let [batch, _, height, width] = input.dims();
        let x = if *self.hyper {
            hypercolumns(input, vgg)
        } else {
            input
        };

        let mut x = self.stem.forward(x);
        for block in &self.body {
            x = block.forward(x);
        }
        let out = self.head.forward(x);

        SeparatedLayers {
            transmission: out.clone().slice([0..batch, 0..3, 0..height, 0..width]),
            reflection: out.slice([0..batch, 3..6, 0..height, 0..width]),
        }
    }
}

/// `[conv5_2, conv4_2, conv3_2, conv2_2, conv1_2, image]`, each feature map
/// bilinearly resized to the image size and divided by 255.
fn hypercolumns<B: Backend>(input: Tensor<B, 4>, vgg: &Vgg19<B>) -> Tensor<B, 4> {
    let [_, _, height, width] = input.dims();
    let resize = Interpolate2dConfig::new()
        .with_output_size(Some([height, width]))
        .with_mode(InterpolateMode::Linear)
        .init();

    let features = vgg.forward(input.clone()).into_vec();
    let mut parts: Vec<Tensor<B, 4>> = features
        .into_iter()
        .rev()
        .map(|f| resize.forward(f).div_scalar(255.0))
        .collect();
    parts.push(input);
    Tensor::cat(parts, 1)
}
