//! Per-sample random choices: branch coin, resize width and blur sigma.

use rand::Rng;
use serde::{Deserialize, Serialize};

/// Evenly spaced blur sigmas, inclusive at both ends.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SigmaGrid {
    pub min: f32,
    pub max: f32,
    pub steps: usize,
}

impl Default for SigmaGrid {
    fn default() -> Self {
        Self {
            min: 1.0,
            max: 5.0,
            steps: 80,
        }
    }
}

impl SigmaGrid {
    pub fn values(&self) -> Vec<f32> {
        match self.steps {
            0 => Vec::new(),
            1 => vec![self.min],
            n => {
                let step = (self.max - self.min) / (n - 1) as f32;
                (0..n).map(|i| self.min + step * i as f32).collect()
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Branch {
    Synthetic { sigma: f32 },
    Real,
}

impl Branch {
    pub fn is_synthetic(&self) -> bool {
        matches!(self, Branch::Synthetic { .. })
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SampleDraw {
    pub branch: Branch,
    /// Target width; height follows the source aspect ratio.
    pub width: u32,
}

#[derive(Debug, Clone)]
pub struct Sampler {
    synthetic_prob: f64,
    width_min: u32,
    width_max: u32,
    sigmas: Vec<f32>,
}

impl Sampler {
    /// `width_max` is exclusive.
    pub fn new(synthetic_prob: f64, width_min: u32, width_max: u32, grid: &SigmaGrid) -> Self {
        let mut sigmas = grid.values();
        if sigmas.is_empty() {
            sigmas.push(grid.min);
        }
        Self {
            synthetic_prob,
            width_min,
            width_max: width_max.max(width_min + 1),
            sigmas,
        }
    }

    /// Draw order is coin, width, then sigma; a fixed seed reproduces all three.
    pub fn draw<R: Rng + ?Sized>(&self, rng: &mut R) -> SampleDraw {
        let magic: f64 = rng.random();
        let width = rng.random_range(self.width_min..self.width_max);
        let branch = if magic < self.synthetic_prob {
            let sigma = self.sigmas[rng.random_range(0..self.sigmas.len())];
            Branch::Synthetic { sigma }
        } else {
            Branch::Real
        };
        SampleDraw { branch, width }
    }
}

impl Default for Sampler {
    fn default() -> Self {
        Self::new(0.7, 256, 480, &SigmaGrid::default())
    }
}
