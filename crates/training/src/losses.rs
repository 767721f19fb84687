//! Loss terms for the reflection separation GAN.
//!
//! All functions operate on `[B, C, H, W]` tensors in [0, 1] and return
//! rank-1 tensors of shape `[1]`.

use burn::nn::pool::AvgPool2dConfig;
use burn::tensor::activation::sigmoid;
use burn::tensor::{backend::Backend, ElementConversion, Tensor};
use models::{SeparatedLayers, Vgg19};

use crate::config::LossWeights;

/// Guards the logarithms of the adversarial terms.
pub const EPS: f32 = 1e-12;

/// Weights of the `conv{1..5}_2` feature distances in the perceptual loss.
pub const VGG_LAYER_WEIGHTS: [f32; 5] = [1.0 / 2.6, 1.0 / 4.8, 1.0 / 3.7, 1.0 / 5.6, 10.0 / 1.5];

/// Keeps the exclusion gradient-scale ratio finite on flat layers.
const ALPHA_EPS: f32 = 1e-8;

pub fn l1<B: Backend, const D: usize>(a: Tensor<B, D>, b: Tensor<B, D>) -> Tensor<B, 1> {
    (a - b).abs().mean()
}

/// Pixel distance on the 0..255 scale plus weighted VGG feature distances.
pub fn perceptual_loss<B: Backend>(
    vgg: &Vgg19<B>,
    output: Tensor<B, 4>,
    target: Tensor<B, 4>,
) -> Tensor<B, 1> {
    let target = target.detach();
    let pixel = l1(output.clone().mul_scalar(255.0), target.clone().mul_scalar(255.0));
    let out_features = vgg.forward(output).into_vec();
    let target_features = vgg.forward(target).into_vec();
    out_features
        .into_iter()
        .zip(target_features)
        .zip(VGG_LAYER_WEIGHTS)
        .fold(pixel, |acc, ((out, tgt), weight)| {
            acc + l1(out, tgt.detach()).mul_scalar(weight)
        })
}

/// `0.5 * mean(-(ln(p_real) + ln(1 - p_fake)))`.
pub fn discriminator_loss<B: Backend>(real: Tensor<B, 4>, fake: Tensor<B, 4>) -> Tensor<B, 1> {
    let real_term = real.add_scalar(EPS).log();
    let fake_term = fake.neg().add_scalar(1.0).add_scalar(EPS).log();
    (real_term + fake_term).neg().mean().mul_scalar(0.5)
}

/// `mean(-ln(p_fake))`.
pub fn generator_adversarial<B: Backend>(fake: Tensor<B, 4>) -> Tensor<B, 1> {
    fake.add_scalar(EPS).log().neg().mean()
}

/// Vertical and horizontal forward differences.
fn image_gradients<B: Backend>(img: Tensor<B, 4>) -> (Tensor<B, 4>, Tensor<B, 4>) {
    let [b, c, h, w] = img.dims();
    let grad_x = img.clone().slice([0..b, 0..c, 1..h, 0..w])
        - img.clone().slice([0..b, 0..c, 0..h - 1, 0..w]);
    let grad_y =
        img.clone().slice([0..b, 0..c, 0..h, 1..w]) - img.slice([0..b, 0..c, 0..h, 0..w - 1]);
    (grad_x, grad_y)
}

fn squash<B: Backend>(g: Tensor<B, 4>) -> Tensor<B, 4> {
    sigmoid(g).mul_scalar(2.0).sub_scalar(1.0)
}

fn square<B: Backend>(x: Tensor<B, 4>) -> Tensor<B, 4> {
    x.clone() * x
}

/// Correlation of one gradient direction at one level, summed over the batch.
///
/// The fourth root is taken of `x + EPS` and shifted by `EPS^0.25`, so
/// uncorrelated layers score zero and the root stays differentiable at zero.
fn exclusion_term<B: Backend>(g1: Tensor<B, 4>, g2: Tensor<B, 4>) -> Tensor<B, 1> {
    let alpha =
        g1.clone().abs().mean().mul_scalar(2.0) / g2.clone().abs().mean().add_scalar(ALPHA_EPS);
    let s1 = squash(g1);
    let s2 = squash(g2 * alpha.reshape([1, 1, 1, 1]));
    (square(s1) * square(s2))
        .flatten::<2>(1, 3)
        .mean_dim(1)
        .add_scalar(EPS)
        .powf_scalar(0.25)
        .sub_scalar(EPS.powf(0.25))
        .sum()
}

/// 2×2 average pooling with stride 2. Odd sizes repeat their last row or
/// column first, so border windows average only the pixels they cover.
fn half_resolution<B: Backend>(img: Tensor<B, 4>) -> Tensor<B, 4> {
    let [b, c, h, w] = img.dims();
    let mut img = img;
    if h % 2 == 1 {
        let last = img.clone().slice([0..b, 0..c, h - 1..h, 0..w]);
        img = Tensor::cat(vec![img, last], 2);
    }
    let h = img.dims()[2];
    if w % 2 == 1 {
        let last = img.clone().slice([0..b, 0..c, 0..h, w - 1..w]);
        img = Tensor::cat(vec![img, last], 3);
    }
    AvgPool2dConfig::new([2, 2])
        .with_strides([2, 2])
        .init()
        .forward(img)
}

/// Gradient exclusion between the two layers over an average-pooled pyramid.
///
/// Returns `(Σ_x / levels + Σ_y / levels) / 2`. Levels whose spatial size
/// drops below 2 contribute nothing.
pub fn exclusion_loss<B: Backend>(
    transmission: Tensor<B, 4>,
    reflection: Tensor<B, 4>,
    levels: usize,
) -> Tensor<B, 1> {
    let device = transmission.device();
    let mut sum_x = Tensor::<B, 1>::zeros([1], &device);
    let mut sum_y = Tensor::<B, 1>::zeros([1], &device);
    let (mut t, mut r) = (transmission, reflection);
    for level in 0..levels {
        let [_, _, h, w] = t.dims();
        if h < 2 || w < 2 {
            break;
        }
        let (tx, ty) = image_gradients(t.clone());
        let (rx, ry) = image_gradients(r.clone());
        sum_x = sum_x + exclusion_term(tx, rx);
        sum_y = sum_y + exclusion_term(ty, ry);
        if level + 1 < levels {
            t = half_resolution(t);
            r = half_resolution(r);
        }
    }
    let levels = levels.max(1) as f32;
    (sum_x.div_scalar(levels) + sum_y.div_scalar(levels)).div_scalar(2.0)
}

/// Ground truth for one step.
#[derive(Debug, Clone)]
pub struct Targets<B: Backend> {
    pub transmission: Tensor<B, 4>,
    /// Equals `transmission` for real samples.
    pub reflection: Tensor<B, 4>,
    pub is_synthetic: bool,
}

#[derive(Debug, Clone)]
pub struct LossTerms<B: Backend> {
    pub reflection_l1: Tensor<B, 1>,
    pub perceptual: Tensor<B, 1>,
    pub exclusion: Tensor<B, 1>,
    pub adversarial: Tensor<B, 1>,
}

/// Host-side copies of the logged terms.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct LossValues {
    pub total: f32,
    pub perceptual: f32,
    pub exclusion: f32,
    pub adversarial: f32,
}

impl<B: Backend> LossTerms<B> {
    /// `reflection_l1 + w·perceptual + exclusion`.
    pub fn content(&self, weights: &LossWeights) -> Tensor<B, 1> {
        self.reflection_l1.clone()
            + self.perceptual.clone().mul_scalar(weights.perceptual)
            + self.exclusion.clone()
    }

    /// What the generator optimizer minimizes.
    pub fn generator_objective(&self, weights: &LossWeights) -> Tensor<B, 1> {
        self.content(weights).mul_scalar(weights.content_scale) + self.adversarial.clone()
    }

    pub fn values(&self, weights: &LossWeights) -> LossValues {
        LossValues {
            total: scalar(self.content(weights)),
            perceptual: scalar(self.perceptual.clone()),
            exclusion: scalar(self.exclusion.clone()),
            adversarial: scalar(self.adversarial.clone()),
        }
    }
}

/// Every generator-side term; reflection-dependent ones are zero on real samples.
pub fn generator_terms<B: Backend>(
    layers: &SeparatedLayers<B>,
    targets: &Targets<B>,
    vgg: &Vgg19<B>,
    fake_probability: Tensor<B, 4>,
    weights: &LossWeights,
) -> LossTerms<B> {
    let device = fake_probability.device();
    let mut perceptual = perceptual_loss(
        vgg,
        layers.transmission.clone(),
        targets.transmission.clone(),
    );
    let (reflection_l1, exclusion) = if targets.is_synthetic {
        perceptual = perceptual
            + perceptual_loss(vgg, layers.reflection.clone(), targets.reflection.clone());
        (
            l1(layers.reflection.clone(), targets.reflection.clone().detach()),
            exclusion_loss(
                layers.transmission.clone(),
                layers.reflection.clone(),
                weights.exclusion_levels,
            ),
        )
    } else {
        (
            Tensor::zeros([1], &device),
            Tensor::zeros([1], &device),
        )
    };
    LossTerms {
        reflection_l1,
        perceptual,
        exclusion,
        adversarial: generator_adversarial(fake_probability),
    }
}

/// Value of a single-element loss tensor.
pub fn scalar<B: Backend>(t: Tensor<B, 1>) -> f32 {
    t.into_scalar().elem::<f32>()
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::tensor::{Distribution, TensorData};
    use models::Vgg19Config;

    type B = burn_ndarray::NdArray<f32>;

    fn device() -> <B as Backend>::Device {
        Default::default()
    }

    fn filled(value: f32, dims: [usize; 4]) -> Tensor<B, 4> {
        Tensor::<B, 4>::ones(dims, &device()).mul_scalar(value)
    }

    #[test]
    fn l1_is_mean_absolute_difference() {
        let a = Tensor::<B, 1>::from_data(TensorData::new(vec![0.0f32, 1.0, 2.0, 3.0], [4]), &device());
        let b = Tensor::<B, 1>::from_data(TensorData::new(vec![1.0f32, 1.0, 0.0, 3.0], [4]), &device());
        assert!((scalar(l1(a, b)) - 0.75).abs() < 1e-6);
    }

    #[test]
    fn adversarial_terms_match_closed_forms() {
        let d = scalar(discriminator_loss(filled(1.0, [1, 1, 2, 2]), filled(0.0, [1, 1, 2, 2])));
        assert!(d.abs() < 1e-5);

        let d_half = scalar(discriminator_loss(filled(0.5, [1, 1, 2, 2]), filled(0.5, [1, 1, 2, 2])));
        assert!((d_half - std::f32::consts::LN_2).abs() < 1e-5);

        let g = scalar(generator_adversarial(filled(0.5, [1, 1, 3, 3])));
        assert!((g - std::f32::consts::LN_2).abs() < 1e-5);
    }

    #[test]
    fn exclusion_penalizes_shared_edges() {
        let img = Tensor::<B, 4>::random([1, 3, 16, 16], Distribution::Default, &device());
        let shared = scalar(exclusion_loss(img.clone(), img.clone(), 3));
        let flat = scalar(exclusion_loss(img, filled(0.3, [1, 3, 16, 16]), 3));
        assert!(shared > flat);
        assert!(flat.abs() < 1e-5);
        assert!(shared.is_finite());
    }

    #[test]
    fn odd_sizes_pool_like_same_padding() {
        let data: Vec<f32> = (0..9).map(|v| v as f32).collect();
        let img = Tensor::<B, 4>::from_data(TensorData::new(data, [1, 1, 3, 3]), &device());
        let pooled = half_resolution(img);
        assert_eq!(pooled.dims(), [1, 1, 2, 2]);
        let values = pooled.into_data().to_vec::<f32>().unwrap();
        assert_eq!(values, vec![2.0, 3.5, 6.5, 8.0]);

        let odd = Tensor::<B, 4>::random([1, 3, 15, 13], Distribution::Default, &device());
        let loss = scalar(exclusion_loss(odd.clone(), odd, 3));
        assert!(loss.is_finite() && loss > 0.0);
    }

    #[test]
    fn scalar_reads_single_element() {
        let t = Tensor::<B, 1>::from_floats([2.5], &device());
        assert_eq!(scalar(t), 2.5);
    }

    #[test]
    fn real_samples_zero_reflection_terms() {
        let vgg = Vgg19::<B>::new(
            &Vgg19Config {
                widths: [2, 2, 2, 2, 2],
            },
            &device(),
        );
        let layers = SeparatedLayers {
            transmission: Tensor::<B, 4>::random([1, 3, 16, 16], Distribution::Default, &device()),
            reflection: Tensor::<B, 4>::random([1, 3, 16, 16], Distribution::Default, &device()),
        };
        let target = Tensor::<B, 4>::random([1, 3, 16, 16], Distribution::Default, &device());
        let weights = LossWeights::default();

        let real = Targets {
            transmission: target.clone(),
            reflection: target.clone(),
            is_synthetic: false,
        };
        let real_terms = generator_terms(&layers, &real, &vgg, filled(0.5, [1, 1, 2, 2]), &weights);
        assert_eq!(scalar(real_terms.reflection_l1.clone()), 0.0);
        assert_eq!(scalar(real_terms.exclusion.clone()), 0.0);

        let synthetic = Targets {
            is_synthetic: true,
            ..real
        };
        let syn_terms = generator_terms(&layers, &synthetic, &vgg, filled(0.5, [1, 1, 2, 2]), &weights);
        assert!(scalar(syn_terms.reflection_l1.clone()) > 0.0);
        assert!(scalar(syn_terms.exclusion.clone()) > 0.0);
        assert!(scalar(syn_terms.perceptual.clone()) > scalar(real_terms.perceptual.clone()));

        let values = syn_terms.values(&weights);
        let expected = values.total * weights.content_scale + values.adversarial;
        let objective = scalar(syn_terms.generator_objective(&weights));
        assert!((objective - expected).abs() < 1e-2 * expected.abs().max(1.0));
    }
}
