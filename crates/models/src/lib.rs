//! Burn networks for single-image reflection removal.
//!
//! This crate defines the architectures used by the trainer:
//! - `ReflectionNet`: dilated generator splitting an image into transmission and reflection.
//! - `PatchDiscriminator`: conditional patch discriminator for the adversarial term.
//! - `Vgg19`: frozen feature trunk feeding hypercolumns and the perceptual loss.
//!
//! These are plain Burn modules; losses and optimization live in the `training` crate.

pub mod discriminator;
pub mod generator;
pub mod norm;
pub mod vgg;

pub use discriminator::{DiscriminatorOutput, PatchDiscriminator, PatchDiscriminatorConfig};
pub use generator::{ConvNormBlock, ReflectionNet, ReflectionNetConfig, SeparatedLayers};
pub use norm::AdaptiveNorm;
pub use vgg::{Vgg19, Vgg19Config, VggFeatures, VggWeightsError};

pub mod prelude {
    pub use super::{
        PatchDiscriminator, PatchDiscriminatorConfig, ReflectionNet, ReflectionNetConfig, Vgg19,
        Vgg19Config,
    };
}
