//! Lazy materialization of training pairs from the prepared path lists.

use crate::image_io::{load_rgb, resize_to, resize_to_width};
use crate::sampler::{Branch, SampleDraw};
use crate::synth::synthesize;
use crate::types::{DatasetError, DatasetResult, PreparedLists, TrainingPair};
use crate::validation::reflection_too_dim;
use rand::Rng;
use std::path::Path;

#[derive(Debug, Clone)]
pub enum LoadOutcome {
    Pair(TrainingPair),
    /// Synthetic draw skipped because the reflection would be too faint.
    DimReflection { name: String },
}

/// Both dataset domains behind one index space of `synthetic.len() + real.len()`.
#[derive(Debug, Clone)]
pub struct PairSource {
    synthetic: PreparedLists,
    real: PreparedLists,
}

impl PairSource {
    pub fn new(synthetic: PreparedLists, real: PreparedLists) -> DatasetResult<Self> {
        if synthetic.is_empty() || real.is_empty() {
            return Err(DatasetError::Other(format!(
                "need both synthetic and real samples (got {} synthetic, {} real)",
                synthetic.len(),
                real.len()
            )));
        }
        Ok(Self { synthetic, real })
    }

    pub fn len(&self) -> usize {
        self.synthetic.len() + self.real.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn synthetic(&self) -> &PreparedLists {
        &self.synthetic
    }

    pub fn real(&self) -> &PreparedLists {
        &self.real
    }

    /// Load and prepare sample `id` according to `draw`.
    ///
    /// Indices wrap modulo the size of the drawn domain, so every index in
    /// the shared space is valid for either branch.
    pub fn load<R: Rng + ?Sized>(
        &self,
        id: usize,
        draw: SampleDraw,
        rng: &mut R,
    ) -> DatasetResult<LoadOutcome> {
        match draw.branch {
            Branch::Synthetic { sigma } => {
                let idx = id % self.synthetic.len();
                let t_path = &self.synthetic.outputs_t[idx];
                let name = file_stem(t_path);
                let target_t = resize_to_width(&load_rgb(t_path)?, draw.width);
                let (w, h) = target_t.dimensions();
                let reflection = resize_to(&load_rgb(&self.synthetic.outputs_r[idx])?, w, h);
                if reflection_too_dim(&target_t, &reflection) {
                    return Ok(LoadOutcome::DimReflection { name });
                }
                let mixed = synthesize(&target_t, &reflection, sigma, rng)?;
                Ok(LoadOutcome::Pair(TrainingPair {
                    input: mixed.blended,
                    target_t,
                    target_r: mixed.reflection,
                    is_synthetic: true,
                    sigma,
                    name,
                }))
            }
            Branch::Real => {
                let idx = id % self.real.len();
                let in_path = &self.real.inputs[idx];
                let name = file_stem(in_path);
                let input = resize_to_width(&load_rgb(in_path)?, draw.width);
                let (w, h) = input.dimensions();
                let target_t = resize_to(&load_rgb(&self.real.outputs_t[idx])?, w, h);
                Ok(LoadOutcome::Pair(TrainingPair {
                    input,
                    target_r: target_t.clone(),
                    target_t,
                    is_synthetic: false,
                    sigma: 0.0,
                    name,
                }))
            }
        }
    }
}

pub fn file_stem(path: &Path) -> String {
    path.file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("sample")
        .to_string()
}
