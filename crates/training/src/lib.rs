#![recursion_limit = "256"]

pub mod checkpoint;
pub mod config;
pub mod losses;
pub mod removal;
pub mod stats;
pub mod trainer;
pub mod util;

pub use checkpoint::{CheckpointError, CheckpointMeta, CheckpointStore, RestoreMode};
pub use config::{LossWeights, SamplingConfig, TrainConfig};
pub use models::{PatchDiscriminator, ReflectionNet, Vgg19};
pub use trainer::{run_training, TrainSummary};
pub use util::{run_remove, run_train, RemoveArgs, TrainArgs};

/// Backend alias for training/removal (NdArray by default; WGPU if enabled).
#[cfg(feature = "backend-wgpu")]
pub type TrainBackend = burn_wgpu::Wgpu<f32>;
#[cfg(not(feature = "backend-wgpu"))]
pub type TrainBackend = burn_ndarray::NdArray<f32>;
