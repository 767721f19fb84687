use std::path::PathBuf;

use anyhow::Context;
use burn::backend::Autodiff;
use burn::tensor::backend::Backend;
use clap::Parser;
use cli_support::{ConfigArgs, DeviceArgs, DeviceOpts};
use tracing::info;

use crate::checkpoint::CheckpointStore;
use crate::config::{TrainConfig, CONFIG_ENV};
use crate::removal::{list_images, remove_reflections};
use crate::trainer::{build_vgg, run_training};
use crate::TrainBackend;

#[derive(Parser, Debug)]
#[command(name = "train", about = "Train the reflection separation GAN")]
pub struct TrainArgs {
    /// Folder holding checkpoints and per-epoch outputs.
    #[arg(long)]
    pub task: Option<PathBuf>,
    /// Synthetic dataset root(s), comma separated.
    #[arg(long = "data_syn_dir", value_delimiter = ',')]
    pub data_syn_dir: Vec<PathBuf>,
    /// Real dataset root(s), comma separated.
    #[arg(long = "data_real_dir", value_delimiter = ',')]
    pub data_real_dir: Vec<PathBuf>,
    /// Save checkpoints and samples every N epochs.
    #[arg(long = "save_model_freq")]
    pub save_model_freq: Option<usize>,
    /// Use hypercolumn features (1) or not (0).
    #[arg(long = "is_hyper", value_parser = clap::value_parser!(u8).range(0..=1))]
    pub is_hyper: Option<u8>,
    /// Resume generator and discriminator from the task checkpoint.
    #[arg(long = "continue_training")]
    pub continue_training: bool,
    /// Pretrained VGG-19 weights (burn record or `.safetensors`).
    #[arg(long = "vgg_weights")]
    pub vgg_weights: Option<PathBuf>,
    /// Seed for sample order, branch and blur draws.
    #[arg(long)]
    pub seed: Option<u64>,
    /// Exclusive upper bound of the epoch counter.
    #[arg(long = "max_epoch")]
    pub max_epoch: Option<usize>,
    #[command(flatten)]
    pub config: ConfigArgs,
    #[command(flatten)]
    pub device: DeviceArgs,
}

impl TrainArgs {
    /// Load the config file (if any) and apply command-line overrides.
    pub fn resolve_config(&self) -> anyhow::Result<TrainConfig> {
        let mut cfg = match self.config.resolve(CONFIG_ENV) {
            Some(path) => TrainConfig::from_path(&path)?,
            None => TrainConfig::default(),
        };
        if let Some(task) = &self.task {
            cfg.task = task.clone();
        }
        if !self.data_syn_dir.is_empty() {
            cfg.data_syn_dirs = self.data_syn_dir.clone();
        }
        if !self.data_real_dir.is_empty() {
            cfg.data_real_dirs = self.data_real_dir.clone();
        }
        if let Some(freq) = self.save_model_freq {
            cfg.save_model_freq = freq;
        }
        if let Some(hyper) = self.is_hyper {
            cfg.generator.hyper = hyper == 1;
        }
        if self.continue_training {
            cfg.continue_training = true;
        }
        if let Some(weights) = &self.vgg_weights {
            cfg.vgg_weights = Some(weights.clone());
        }
        if self.seed.is_some() {
            cfg.seed = self.seed;
        }
        if let Some(max_epoch) = self.max_epoch {
            cfg.max_epoch = max_epoch;
        }
        Ok(cfg)
    }
}

#[derive(Parser, Debug)]
#[command(name = "remove", about = "Separate reflections with a trained generator")]
pub struct RemoveArgs {
    /// Folder holding the generator checkpoint.
    #[arg(long, default_value = "pre-trained")]
    pub task: PathBuf,
    /// Directory of images to process.
    #[arg(long = "input_dir")]
    pub input_dir: PathBuf,
    /// Output directory (defaults to <task>/test_results).
    #[arg(long = "output_dir")]
    pub output_dir: Option<PathBuf>,
    /// Pretrained VGG-19 weights (burn record or `.safetensors`).(needed for hypercolumn checkpoints).
    #[arg(long = "vgg_weights")]
    pub vgg_weights: Option<PathBuf>,
    #[command(flatten)]
    pub config: ConfigArgs,
    #[command(flatten)]
    pub device: DeviceArgs,
}

pub fn train_device(opts: &DeviceOpts) -> <TrainBackend as Backend>::Device {
    #[cfg(feature = "backend-wgpu")]
    {
        burn_wgpu::WgpuDevice::DiscreteGpu(opts.gpu)
    }
    #[cfg(not(feature = "backend-wgpu"))]
    {
        let _ = opts;
        Default::default()
    }
}

fn validate_backend_choice(args: &DeviceArgs) -> anyhow::Result<DeviceOpts> {
    let opts = DeviceOpts::from(args);
    opts.validate(cfg!(feature = "backend-wgpu"))
        .map_err(anyhow::Error::msg)?;
    Ok(opts)
}

pub fn run_train(args: TrainArgs) -> anyhow::Result<()> {
    let opts = validate_backend_choice(&args.device)?;
    let cfg = args.resolve_config()?;
    let device = train_device(&opts);
    let summary = run_training::<Autodiff<TrainBackend>>(&cfg, &device)?;
    info!(
        epochs = summary.epochs_run.len(),
        skipped = summary.epochs_skipped.len(),
        generator_steps = summary.generator_steps,
        discriminator_steps = summary.discriminator_steps,
        rejected = summary.rejected,
        "training finished"
    );
    Ok(())
}

pub fn run_remove(args: RemoveArgs) -> anyhow::Result<()> {
    let opts = validate_backend_choice(&args.device)?;
    let mut cfg = match args.config.resolve(CONFIG_ENV) {
        Some(path) => TrainConfig::from_path(&path)?,
        None => TrainConfig::default(),
    };
    if let Some(weights) = &args.vgg_weights {
        cfg.vgg_weights = Some(weights.clone());
    }
    let device = train_device(&opts);

    let store = CheckpointStore::new(&args.task);
    if !store.exists() {
        anyhow::bail!("no generator checkpoint in {}", args.task.display());
    }
    let (g_cfg, vgg_cfg) = match store.load_meta()? {
        Some(meta) => (meta.generator, meta.vgg),
        None => (cfg.generator_config(), cfg.vgg.clone()),
    };
    let generator = store
        .load_generator::<TrainBackend>(&g_cfg, &device)
        .context("failed to load generator")?;
    let vgg = build_vgg::<TrainBackend>(
        &vgg_cfg,
        cfg.vgg_weights.as_deref(),
        cfg.allow_random_vgg || !g_cfg.hyper,
        &device,
    )?;
    info!(task = %args.task.display(), hyper = g_cfg.hyper, "loaded generator");

    let inputs = list_images(&args.input_dir)?;
    let out_dir = args
        .output_dir
        .clone()
        .unwrap_or_else(|| args.task.join("test_results"));
    let written = remove_reflections(&generator, &vgg, &inputs, &out_dir, &device)?;
    info!(written, total = inputs.len(), out = %out_dir.display(), "done");
    Ok(())
}
