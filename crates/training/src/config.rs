use std::path::{Path, PathBuf};

use anyhow::Context;
use models::{PatchDiscriminatorConfig, ReflectionNetConfig, Vgg19Config};
use reflection_dataset::{DegenerateThresholds, Sampler, SigmaGrid};
use serde::{Deserialize, Serialize};

/// Environment variable naming a TOML config when `--config` is absent.
pub const CONFIG_ENV: &str = "REFLECT_TRAIN_CONFIG";

/// Per-sample draw parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplingConfig {
    /// Probability of compositing a synthetic pair instead of using a real one.
    pub synthetic_prob: f64,
    pub width_min: u32,
    /// Exclusive.
    pub width_max: u32,
    pub sigma: SigmaGrid,
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            synthetic_prob: 0.7,
            width_min: 256,
            width_max: 480,
            sigma: SigmaGrid::default(),
        }
    }
}

impl SamplingConfig {
    pub fn sampler(&self) -> Sampler {
        Sampler::new(
            self.synthetic_prob,
            self.width_min,
            self.width_max,
            &self.sigma,
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LossWeights {
    /// Weight of the perceptual term inside the content loss.
    pub perceptual: f32,
    /// Scale of the content loss relative to the adversarial term.
    pub content_scale: f32,
    /// Pyramid levels of the exclusion loss.
    pub exclusion_levels: usize,
}

impl Default for LossWeights {
    fn default() -> Self {
        Self {
            perceptual: 0.2,
            content_scale: 100.0,
            exclusion_levels: 3,
        }
    }
}

/// Every knob of a training run. CLI flags are applied on top of this.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainConfig {
    /// Checkpoint and sample output directory.
    pub task: PathBuf,
    pub data_syn_dirs: Vec<PathBuf>,
    pub data_real_dirs: Vec<PathBuf>,
    pub save_model_freq: usize,
    pub continue_training: bool,
    /// Epochs run from 1 up to, but excluding, this value.
    pub max_epoch: usize,
    pub seed: Option<u64>,
    pub lr_generator: f64,
    pub lr_discriminator: f64,
    /// Pretrained VGG-19 weights: a burn `.bin` record or a `.safetensors` export.
    pub vgg_weights: Option<PathBuf>,
    /// Fall back to a randomly initialized VGG when no weights are given.
    pub allow_random_vgg: bool,
    pub generator: ReflectionNetConfig,
    pub discriminator: PatchDiscriminatorConfig,
    pub vgg: Vgg19Config,
    pub sampling: SamplingConfig,
    pub thresholds: DegenerateThresholds,
    pub loss: LossWeights,
}

impl Default for TrainConfig {
    fn default() -> Self {
        Self {
            task: PathBuf::from("pre-trained"),
            data_syn_dirs: vec![PathBuf::from("root_training_synthetic_data")],
            data_real_dirs: vec![PathBuf::from("root_training_real_data")],
            save_model_freq: 1,
            continue_training: false,
            max_epoch: 100,
            seed: None,
            lr_generator: 2e-4,
            lr_discriminator: 1e-4,
            vgg_weights: None,
            allow_random_vgg: false,
            generator: ReflectionNetConfig::default(),
            discriminator: PatchDiscriminatorConfig::default(),
            vgg: Vgg19Config::default(),
            sampling: SamplingConfig::default(),
            thresholds: DegenerateThresholds::default(),
            loss: LossWeights::default(),
        }
    }
}

impl TrainConfig {
    pub fn from_path(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        Self::from_toml(&raw).with_context(|| format!("invalid config {}", path.display()))
    }

    pub fn from_toml(raw: &str) -> anyhow::Result<Self> {
        let mut cfg: TrainConfig = toml::from_str(raw)?;
        cfg.expand_paths();
        Ok(cfg)
    }

    /// Apply `~` and `${VAR}` expansion to every path field.
    pub fn expand_paths(&mut self) {
        self.task = expand_path_buf(&self.task);
        for dir in self
            .data_syn_dirs
            .iter_mut()
            .chain(self.data_real_dirs.iter_mut())
        {
            *dir = expand_path_buf(dir);
        }
        if let Some(weights) = self.vgg_weights.as_mut() {
            *weights = expand_path_buf(weights);
        }
    }

    /// Generator config with the hypercolumn width taken from the VGG config.
    pub fn generator_config(&self) -> ReflectionNetConfig {
        self.generator.clone().with_vgg(&self.vgg)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.save_model_freq == 0 {
            anyhow::bail!("save_model_freq must be at least 1");
        }
        if self.data_syn_dirs.is_empty() || self.data_real_dirs.is_empty() {
            anyhow::bail!("both a synthetic and a real dataset root are required");
        }
        if self.sampling.width_min == 0 || self.sampling.width_max <= self.sampling.width_min {
            anyhow::bail!(
                "invalid resize width range [{}, {})",
                self.sampling.width_min,
                self.sampling.width_max
            );
        }
        if !(0.0..=1.0).contains(&self.sampling.synthetic_prob) {
            anyhow::bail!(
                "synthetic_prob must lie in [0, 1], got {}",
                self.sampling.synthetic_prob
            );
        }
        if self.loss.exclusion_levels == 0 {
            anyhow::bail!("exclusion_levels must be at least 1");
        }
        Ok(())
    }
}

fn expand_path_buf(path: &Path) -> PathBuf {
    expand_path(&path.to_string_lossy())
}

pub fn expand_path(raw: &str) -> PathBuf {
    let mut out = raw.to_string();
    if let Some(stripped) = out.strip_prefix("~") {
        if let Ok(home) = std::env::var("HOME") {
            out = format!("{home}{stripped}");
        }
    }
    PathBuf::from(expand_env(&out))
}

/// Replace `${KEY}` with the variable's value; unknown keys are left as-is.
pub fn expand_env(input: &str) -> String {
    let mut out = String::new();
    let mut rest = input;
    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        match after.find('}') {
            Some(end) => {
                let key = &after[..end];
                match std::env::var(key) {
                    Ok(val) => out.push_str(&val),
                    Err(_) => out.push_str(&format!("${{{key}}}")),
                }
                rest = &after[end + 1..];
            }
            None => {
                out.push_str(&rest[start..]);
                rest = "";
            }
        }
    }
    out.push_str(rest);
    out
}
