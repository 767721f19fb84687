//! Degenerate-sample filtering.

use crate::image_io::{max_value, mean_value};
use crate::types::TrainingPair;
use image::Rgb32FImage;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DegenerateThresholds {
    /// Minimum peak value for both ground-truth layers.
    pub target_min_peak: f32,
    /// Minimum peak value for the network input.
    pub input_min_peak: f32,
}

impl Default for DegenerateThresholds {
    fn default() -> Self {
        Self {
            target_min_peak: 0.15,
            input_min_peak: 0.10,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Rejection {
    /// Low-light or empty ground-truth layer.
    DegenerateTarget { peak_t: f32, peak_r: f32 },
    /// The observation itself is nearly black.
    DegenerateInput { peak: f32 },
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Rejection::DegenerateTarget { peak_t, peak_r } => write!(
                f,
                "degenerate channel (peak t {peak_t:.3}, peak r {peak_r:.3})"
            ),
            Rejection::DegenerateInput { peak } => {
                write!(f, "degenerate image (peak {peak:.3})")
            }
        }
    }
}

impl DegenerateThresholds {
    pub fn check(&self, pair: &TrainingPair) -> Result<(), Rejection> {
        let peak_t = max_value(&pair.target_t);
        let peak_r = max_value(&pair.target_r);
        if peak_r < self.target_min_peak || peak_t < self.target_min_peak {
            return Err(Rejection::DegenerateTarget { peak_t, peak_r });
        }
        let peak = max_value(&pair.input);
        if peak < self.input_min_peak {
            return Err(Rejection::DegenerateInput { peak });
        }
        Ok(())
    }
}

/// Synthetic draws whose reflection is darker than half the transmission's
/// mean brightness would barely show in the mix; the trainer skips them
/// before compositing.
pub fn reflection_too_dim(transmission: &Rgb32FImage, reflection: &Rgb32FImage) -> bool {
    mean_value(transmission) / 2.0 > mean_value(reflection)
}
