//! Core types, error definitions, and data structures for reflection_dataset.

use image::Rgb32FImage;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

pub type DatasetResult<T> = Result<T, DatasetError>;

#[derive(Debug, Error)]
pub enum DatasetError {
    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("image decode error at {path}: {source}")]
    Image {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
    #[error("dataset root {root} has no {subdir}/ directory")]
    MissingLayout { root: PathBuf, subdir: &'static str },
    #[error("dataset root {root} contains no training images")]
    EmptyRoot { root: PathBuf },
    #[error("no dataset roots given")]
    NoRoots,
    #[error("image sizes differ: {left:?} vs {right:?}")]
    SizeMismatch { left: (u32, u32), right: (u32, u32) },
    #[error("{0}")]
    Other(String),
}

/// Which layers a dataset root provides ground truth for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RootKind {
    /// `transmission_layer/` + `reflection_layer/` sources composited on the fly.
    Synthetic,
    /// `blended/` photographs with `transmission_layer/` ground truth only.
    Real,
}

/// Three aligned path lists produced by [`crate::prepare_data`].
#[derive(Debug, Clone, Default)]
pub struct PreparedLists {
    /// Paths under `blended/` (the captured input for real roots).
    pub inputs: Vec<PathBuf>,
    /// Paths under `transmission_layer/`.
    pub outputs_t: Vec<PathBuf>,
    /// Paths under `reflection_layer/` for synthetic roots; a copy of `outputs_t` for real roots.
    pub outputs_r: Vec<PathBuf>,
}

impl PreparedLists {
    pub fn len(&self) -> usize {
        self.outputs_t.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outputs_t.is_empty()
    }
}

/// One materialized training example. Images are HWC, normalized to [0, 1].
#[derive(Debug, Clone)]
pub struct TrainingPair {
    pub input: Rgb32FImage,
    pub target_t: Rgb32FImage,
    /// Equal to `target_t` on real samples; never used for loss there.
    pub target_r: Rgb32FImage,
    pub is_synthetic: bool,
    pub sigma: f32,
    /// File stem used to name sample dumps and log lines.
    pub name: String,
}
