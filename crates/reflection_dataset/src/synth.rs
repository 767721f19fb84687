//! Synthetic reflection compositing.
//!
//! A transmission image and an unrelated reflection image are mixed in linear
//! light: the reflection is defocused, its overexposed energy is pulled back,
//! and a Gaussian vignette at a random offset mimics the uneven attenuation of
//! a glass pane.

use crate::types::{DatasetError, DatasetResult};
use image::{Rgb, Rgb32FImage};
use rand::Rng;
use statrs::distribution::{ContinuousCDF, Normal};
use std::sync::OnceLock;

const GAMMA: f32 = 2.2;
/// Side of the default vignette kernel.
pub const VIGNETTE_SIZE: usize = 560;
const VIGNETTE_NSIG: f64 = 3.0;
/// Margin kept between the sampled window and the kernel edge.
const VIGNETTE_MARGIN: usize = 10;

#[derive(Debug, Clone)]
pub struct SyntheticPair {
    /// Gamma-restored transmission; identical to the input up to rounding.
    pub transmission: Rgb32FImage,
    /// Blurred, attenuated and vignetted reflection.
    pub reflection: Rgb32FImage,
    /// The composited observation, clamped to [0, 1].
    pub blended: Rgb32FImage,
}

/// Separable, peak-normalized Gaussian vignette (`sqrt(outer(k, k)) / max`).
#[derive(Debug, Clone)]
pub struct VignetteMask {
    size: usize,
    profile: Vec<f32>,
}

impl VignetteMask {
    pub fn new(size: usize, nsig: f64) -> Self {
        let size = size.max(1);
        let interval = (2.0 * nsig + 1.0) / size as f64;
        let start = -nsig - interval / 2.0;
        let stop = nsig + interval / 2.0;
        let step = (stop - start) / size as f64;
        let normal = Normal::standard();
        let cdf: Vec<f64> = (0..=size)
            .map(|i| normal.cdf(start + step * i as f64))
            .collect();
        let kern1d: Vec<f64> = cdf.windows(2).map(|w| w[1] - w[0]).collect();
        let peak = kern1d.iter().copied().fold(f64::MIN, f64::max).max(f64::EPSILON);
        let profile = kern1d.iter().map(|k| (k / peak).sqrt() as f32).collect();
        Self { size, profile }
    }

    /// The 560×560 kernel used for all images that fit inside it.
    pub fn shared() -> &'static VignetteMask {
        static MASK: OnceLock<VignetteMask> = OnceLock::new();
        MASK.get_or_init(|| VignetteMask::new(VIGNETTE_SIZE, VIGNETTE_NSIG))
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn at(&self, row: usize, col: usize) -> f32 {
        self.profile[row] * self.profile[col]
    }
}

/// Composite `reflection` onto `transmission` with a defocus of `sigma`.
pub fn synthesize<R: Rng + ?Sized>(
    transmission: &Rgb32FImage,
    reflection: &Rgb32FImage,
    sigma: f32,
    rng: &mut R,
) -> DatasetResult<SyntheticPair> {
    if transmission.dimensions() != reflection.dimensions() {
        return Err(DatasetError::SizeMismatch {
            left: transmission.dimensions(),
            right: reflection.dimensions(),
        });
    }
    let (width, height) = transmission.dimensions();
    let t_lin = map_pixels(transmission, |v| v.max(0.0).powf(GAMMA));
    let r_lin = map_pixels(reflection, |v| v.max(0.0).powf(GAMMA));

    let mut r_blur = if sigma > 0.0 {
        image::imageops::blur(&r_lin, sigma)
    } else {
        r_lin
    };

    // Pull back the part of the reflection that would saturate the mix.
    let att = 1.08 + rng.random::<f32>() / 10.0;
    for c in 0..3 {
        let mut sum = 0.0f64;
        let mut count = 0.0f64;
        for (t_px, r_px) in t_lin.pixels().zip(r_blur.pixels()) {
            let blend = t_px[c] + r_px[c];
            if blend > 1.0 {
                sum += blend as f64;
                count += 1.0;
            }
        }
        let mean_c = (sum / (count + 1e-6)).max(1.0) as f32;
        let shift = (mean_c - 1.0) * att;
        for px in r_blur.pixels_mut() {
            px[c] = (px[c] - shift).clamp(0.0, 1.0);
        }
    }

    let needed = (width.max(height) as usize) + VIGNETTE_MARGIN + 1;
    let owned;
    let mask = if needed <= VIGNETTE_SIZE {
        VignetteMask::shared()
    } else {
        owned = VignetteMask::new(needed, VIGNETTE_NSIG);
        &owned
    };
    let off_x = random_offset(mask.size(), width as usize, rng);
    let off_y = random_offset(mask.size(), height as usize, rng);
    let alpha2 = 1.0 - rng.random::<f32>() / 5.0;

    let mut r_masked = Rgb32FImage::new(width, height);
    let mut blended = Rgb32FImage::new(width, height);
    for (x, y, px) in r_blur.enumerate_pixels() {
        let alpha1 = mask.at(off_y + y as usize, off_x + x as usize);
        let t_px = t_lin.get_pixel(x, y);
        let mut r_out = [0.0f32; 3];
        let mut b_out = [0.0f32; 3];
        for c in 0..3 {
            let r = px[c] * alpha1;
            r_out[c] = r;
            b_out[c] = r + t_px[c] * alpha2;
        }
        r_masked.put_pixel(x, y, Rgb(r_out));
        blended.put_pixel(x, y, Rgb(b_out));
    }

    let inv = 1.0 / GAMMA;
    Ok(SyntheticPair {
        transmission: map_pixels(&t_lin, |v| v.powf(inv)),
        reflection: map_pixels(&r_masked, |v| v.powf(inv)),
        blended: map_pixels(&blended, |v| v.powf(inv).clamp(0.0, 1.0)),
    })
}

fn random_offset<R: Rng + ?Sized>(mask_size: usize, extent: usize, rng: &mut R) -> usize {
    let upper = mask_size.saturating_sub(extent + VIGNETTE_MARGIN);
    if upper == 0 {
        0
    } else {
        rng.random_range(0..upper)
    }
}

fn map_pixels(img: &Rgb32FImage, f: impl Fn(f32) -> f32) -> Rgb32FImage {
    let (width, height) = img.dimensions();
    let data = img.as_raw().iter().map(|v| f(*v)).collect();
    Rgb32FImage::from_raw(width, height, data).unwrap_or_else(|| Rgb32FImage::new(width, height))
}
