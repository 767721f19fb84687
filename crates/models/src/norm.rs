//! Normalization and initialization helpers shared by the generator and discriminator.

use burn::module::{Module, Param};
use burn::nn::conv::{Conv2d, Conv2dConfig};
use burn::nn::{Initializer, InstanceNorm, InstanceNormConfig, PaddingConfig2d};
use burn::tensor::{backend::Backend, Tensor, TensorData};

pub const LRELU_SLOPE: f64 = 0.2;

/// `w0 * x + w1 * IN(x)` with learned scalars, starting as the identity.
///
/// With a batch of one, batch statistics reduce to per-instance statistics,
/// so instance normalization is used for the normalized branch.
#[derive(Module, Debug)]
pub struct AdaptiveNorm<B: Backend> {
    identity_weight: Param<Tensor<B, 1>>,
    norm_weight: Param<Tensor<B, 1>>,
    norm: InstanceNorm<B>,
}

impl<B: Backend> AdaptiveNorm<B> {
    pub fn new(channels: usize, device: &B::Device) -> Self {
        Self {
            identity_weight: Param::from_tensor(Tensor::ones([1], device)),
            norm_weight: Param::from_tensor(Tensor::zeros([1], device)),
            norm: InstanceNormConfig::new(channels).init(device),
        }
    }

    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let w0 = self.identity_weight.val().reshape([1, 1, 1, 1]);
        let w1 = self.norm_weight.val().reshape([1, 1, 1, 1]);
        x.clone() * w0 + self.norm.forward(x) * w1
    }
}

/// Square conv with "same" padding for the given dilation, identity-initialized:
/// output channel `i` copies input channel `i` at the kernel center.
pub fn identity_conv<B: Backend>(
    channels: [usize; 2],
    kernel: usize,
    dilation: usize,
    device: &B::Device,
) -> Conv2d<B> {
    let pad = dilation * (kernel / 2);
    let mut conv = Conv2dConfig::new(channels, [kernel, kernel])
        .with_dilation([dilation, dilation])
        .with_padding(PaddingConfig2d::Explicit(pad, pad))
        .with_initializer(Initializer::Zeros)
        .init(device);

    let [c_in, c_out] = channels;
    let mut weights = vec![0.0f32; c_out * c_in * kernel * kernel];
    let center = kernel / 2;
    for i in 0..c_in.min(c_out) {
        weights[((i * c_in + i) * kernel + center) * kernel + center] = 1.0;
    }
    conv.weight = Param::from_tensor(Tensor::from_data(
        TensorData::new(weights, [c_out, c_in, kernel, kernel]),
        device,
    ));
    conv
}
