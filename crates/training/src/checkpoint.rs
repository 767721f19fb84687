//! Generator/discriminator snapshots under a task directory.
//!
//! Layout of one checkpoint directory:
//! - `generator.bin`, `discriminator.bin`: burn records (full precision)
//! - `checkpoint.json`: epoch, step count and the network configs

use std::fs;
use std::path::{Path, PathBuf};

use burn::module::Module;
use burn::record::{BinFileRecorder, FullPrecisionSettings};
use burn::tensor::backend::Backend;
use models::{
    PatchDiscriminator, PatchDiscriminatorConfig, ReflectionNet, ReflectionNetConfig, Vgg19Config,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const GENERATOR_FILE: &str = "generator.bin";
pub const DISCRIMINATOR_FILE: &str = "discriminator.bin";
pub const META_FILE: &str = "checkpoint.json";

#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error("no checkpoint found in {dir}")]
    Missing { dir: PathBuf },
    #[error("checkpoint in {dir} does not match the configured networks: {reason}")]
    Incompatible { dir: PathBuf, reason: String },
    #[error("failed to access record {path}: {message}")]
    Recorder { path: PathBuf, message: String },
    #[error("invalid checkpoint metadata {path}: {source}")]
    Meta {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointMeta {
    pub epoch: usize,
    pub generator_steps: usize,
    pub generator: ReflectionNetConfig,
    pub discriminator: PatchDiscriminatorConfig,
    pub vgg: Vgg19Config,
}

/// Which weights to pull from an existing checkpoint at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestoreMode {
    /// No checkpoint; start from initialization.
    Fresh,
    /// Warm start: reuse the generator, reinitialize the discriminator.
    GeneratorOnly,
    /// Resume both networks.
    Full,
}

impl RestoreMode {
    pub fn plan(store: &CheckpointStore, continue_training: bool) -> Result<Self, CheckpointError> {
        match (store.exists(), continue_training) {
            (true, true) => Ok(RestoreMode::Full),
            (true, false) => Ok(RestoreMode::GeneratorOnly),
            (false, false) => Ok(RestoreMode::Fresh),
            (false, true) => Err(CheckpointError::Missing {
                dir: store.dir().to_path_buf(),
            }),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CheckpointStore {
    dir: PathBuf,
}

impl CheckpointStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn generator_path(&self) -> PathBuf {
        self.dir.join(GENERATOR_FILE)
    }

    pub fn discriminator_path(&self) -> PathBuf {
        self.dir.join(DISCRIMINATOR_FILE)
    }

    pub fn meta_path(&self) -> PathBuf {
        self.dir.join(META_FILE)
    }

    pub fn exists(&self) -> bool {
        self.generator_path().is_file()
    }

    pub fn save<B: Backend>(
        &self,
        generator: &ReflectionNet<B>,
        discriminator: &PatchDiscriminator<B>,
        meta: &CheckpointMeta,
    ) -> Result<(), CheckpointError> {
        fs::create_dir_all(&self.dir).map_err(|source| CheckpointError::Io {
            path: self.dir.clone(),
            source,
        })?;
        let recorder = BinFileRecorder::<FullPrecisionSettings>::new();
        let path = self.generator_path();
        generator
            .clone()
            .save_file(&path, &recorder)
            .map_err(|e| recorder_error(&path, e))?;
        let path = self.discriminator_path();
        discriminator
            .clone()
            .save_file(&path, &recorder)
            .map_err(|e| recorder_error(&path, e))?;

        let path = self.meta_path();
        let json = serde_json::to_string_pretty(meta).map_err(|source| CheckpointError::Meta {
            path: path.clone(),
            source,
        })?;
        fs::write(&path, json).map_err(|source| CheckpointError::Io { path, source })
    }

    /// `None` when the checkpoint predates metadata files.
    pub fn load_meta(&self) -> Result<Option<CheckpointMeta>, CheckpointError> {
        let path = self.meta_path();
        if !path.is_file() {
            return Ok(None);
        }
        let raw = fs::read_to_string(&path).map_err(|source| CheckpointError::Io {
            path: path.clone(),
            source,
        })?;
        serde_json::from_str(&raw)
            .map(Some)
            .map_err(|source| CheckpointError::Meta { path, source })
    }

    /// Refuse to load weights written for a different architecture.
    ///
    /// The discriminator is only compared when it is being restored
    /// (`Some`); a warm start reinitializes it.
    pub fn check_compatible(
        &self,
        generator: &ReflectionNetConfig,
        discriminator: Option<&PatchDiscriminatorConfig>,
    ) -> Result<(), CheckpointError> {
        let Some(meta) = self.load_meta()? else {
            return Ok(());
        };
        let reason = generator_mismatch(&meta.generator, generator).or_else(|| {
            discriminator
                .filter(|cfg| **cfg != meta.discriminator)
                .map(|cfg| {
                    format!(
                        "discriminator {}x{} vs {}x{}",
                        meta.discriminator.base_channels,
                        meta.discriminator.layers,
                        cfg.base_channels,
                        cfg.layers
                    )
                })
        });
        match reason {
            Some(reason) => Err(CheckpointError::Incompatible {
                dir: self.dir.clone(),
                reason,
            }),
            None => Ok(()),
        }
    }

    pub fn load_generator<B: Backend>(
        &self,
        cfg: &ReflectionNetConfig,
        device: &B::Device,
    ) -> Result<ReflectionNet<B>, CheckpointError> {
        let recorder = BinFileRecorder::<FullPrecisionSettings>::new();
        let path = self.generator_path();
        ReflectionNet::<B>::new(cfg, device)
            .load_file(&path, &recorder, device)
            .map_err(|e| recorder_error(&path, e))
    }

    pub fn load_discriminator<B: Backend>(
        &self,
        cfg: &PatchDiscriminatorConfig,
        device: &B::Device,
    ) -> Result<PatchDiscriminator<B>, CheckpointError> {
        let recorder = BinFileRecorder::<FullPrecisionSettings>::new();
        let path = self.discriminator_path();
        PatchDiscriminator::<B>::new(cfg, device)
            .load_file(&path, &recorder, device)
            .map_err(|e| recorder_error(&path, e))
    }
}

fn generator_mismatch(saved: &ReflectionNetConfig, cfg: &ReflectionNetConfig) -> Option<String> {
    if saved.hyper != cfg.hyper {
        Some(format!("hyper {} vs {}", saved.hyper, cfg.hyper))
    } else if saved.channel != cfg.channel || saved.dilations != cfg.dilations {
        Some(format!(
            "channels {}/{:?} vs {}/{:?}",
            saved.channel, saved.dilations, cfg.channel, cfg.dilations
        ))
    } else if saved.input_channels() != cfg.input_channels() {
        Some(format!(
            "input channels {} vs {}",
            saved.input_channels(),
            cfg.input_channels()
        ))
    } else {
        None
    }
}

fn recorder_error(path: &Path, err: impl std::fmt::Display) -> CheckpointError {
    CheckpointError::Recorder {
        path: path.to_path_buf(),
        message: err.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::tensor::{Distribution, Tensor};
    use models::Vgg19;

    type B = burn_ndarray::NdArray<f32>;

    fn tiny_generator() -> ReflectionNetConfig {
        ReflectionNetConfig {
            channel: 4,
            hyper: false,
            dilations: vec![1, 2],
            ..Default::default()
        }
    }

    fn tiny_discriminator() -> PatchDiscriminatorConfig {
        PatchDiscriminatorConfig {
            base_channels: 2,
            layers: 3,
        }
    }

    fn meta(generator: ReflectionNetConfig) -> CheckpointMeta {
        CheckpointMeta {
            epoch: 3,
            generator_steps: 12,
            generator,
            discriminator: tiny_discriminator(),
            vgg: Vgg19Config::default(),
        }
    }

    #[test]
    fn restore_plan_covers_all_cases() {
        let tmp = tempfile::tempdir().unwrap();
        let store = CheckpointStore::new(tmp.path());
        assert_eq!(RestoreMode::plan(&store, false).unwrap(), RestoreMode::Fresh);
        assert!(matches!(
            RestoreMode::plan(&store, true),
            Err(CheckpointError::Missing { .. })
        ));

        fs::write(store.generator_path(), b"weights").unwrap();
        assert_eq!(
            RestoreMode::plan(&store, false).unwrap(),
            RestoreMode::GeneratorOnly
        );
        assert_eq!(RestoreMode::plan(&store, true).unwrap(), RestoreMode::Full);
    }

    #[test]
    fn save_then_load_reproduces_outputs() {
        let tmp = tempfile::tempdir().unwrap();
        let store = CheckpointStore::new(tmp.path().join("task"));
        let device = Default::default();
        let g_cfg = tiny_generator();
        let generator = ReflectionNet::<B>::new(&g_cfg, &device);
        let discriminator = PatchDiscriminator::<B>::new(&tiny_discriminator(), &device);
        store
            .save(&generator, &discriminator, &meta(g_cfg.clone()))
            .unwrap();

        assert!(store.exists());
        assert!(store.discriminator_path().is_file());
        assert_eq!(store.load_meta().unwrap(), Some(meta(g_cfg.clone())));

        let loaded = store.load_generator::<B>(&g_cfg, &device).unwrap();
        let vgg = Vgg19::<B>::new(
            &Vgg19Config {
                widths: [2, 2, 2, 2, 2],
            },
            &device,
        );
        let image = Tensor::<B, 4>::random([1, 3, 8, 8], Distribution::Default, &device);
        let a = generator.forward(image.clone(), &vgg).reflection;
        let b = loaded.forward(image, &vgg).reflection;
        let diff: f32 = (a - b)
            .abs()
            .max()
            .into_data()
            .to_vec::<f32>()
            .unwrap()[0];
        assert!(diff < 1e-6);

        store
            .load_discriminator::<B>(&tiny_discriminator(), &device)
            .unwrap();
    }

    #[test]
    fn mismatched_generator_is_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let store = CheckpointStore::new(tmp.path());
        let device = Default::default();
        let g_cfg = tiny_generator();
        store
            .save(
                &ReflectionNet::<B>::new(&g_cfg, &device),
                &PatchDiscriminator::<B>::new(&tiny_discriminator(), &device),
                &meta(g_cfg.clone()),
            )
            .unwrap();

        assert!(store.check_compatible(&g_cfg, None).is_ok());
        let hyper = ReflectionNetConfig {
            hyper: true,
            ..g_cfg
        };
        assert!(matches!(
            store.check_compatible(&hyper, None),
            Err(CheckpointError::Incompatible { .. })
        ));
    }

    #[test]
    fn mismatched_discriminator_is_rejected_only_when_restored() {
        let tmp = tempfile::tempdir().unwrap();
        let store = CheckpointStore::new(tmp.path());
        let device = Default::default();
        let g_cfg = tiny_generator();
        store
            .save(
                &ReflectionNet::<B>::new(&g_cfg, &device),
                &PatchDiscriminator::<B>::new(&tiny_discriminator(), &device),
                &meta(g_cfg.clone()),
            )
            .unwrap();

        let wider = PatchDiscriminatorConfig {
            base_channels: 4,
            ..tiny_discriminator()
        };
        assert!(store
            .check_compatible(&g_cfg, Some(&tiny_discriminator()))
            .is_ok());
        assert!(store.check_compatible(&g_cfg, None).is_ok());
        assert!(matches!(
            store.check_compatible(&g_cfg, Some(&wider)),
            Err(CheckpointError::Incompatible { .. })
        ));
    }

    #[test]
    fn missing_meta_is_not_an_error() {
        let tmp = tempfile::tempdir().unwrap();
        let store = CheckpointStore::new(tmp.path());
        assert_eq!(store.load_meta().unwrap(), None);
        assert!(store.check_compatible(&tiny_generator(), None).is_ok());
    }
}
