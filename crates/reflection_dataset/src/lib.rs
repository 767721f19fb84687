//! Dataset scanning, synthetic compositing and sample filtering for reflection removal.
//!
//! This crate provides utilities for:
//! - Scanning synthetic and real dataset roots into aligned path lists
//! - Loading, resizing and normalizing images
//! - Compositing synthetic reflection pairs
//! - Drawing per-sample random choices reproducibly
//! - Rejecting degenerate samples before they reach the optimizer

pub mod image_io;
pub mod pairs;
pub mod prepare;
pub mod sampler;
pub mod synth;
pub mod types;
pub mod validation;

pub use pairs::{file_stem, LoadOutcome, PairSource};
pub use prepare::{is_image_file, prepare_data};
pub use sampler::{Branch, SampleDraw, Sampler, SigmaGrid};
pub use synth::{synthesize, SyntheticPair, VignetteMask};
pub use types::*;
pub use validation::{reflection_too_dim, DegenerateThresholds, Rejection};
