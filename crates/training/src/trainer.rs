//! Epoch loop alternating discriminator and generator updates.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::Context;
use burn::module::Module;
use burn::optim::{AdamConfig, GradientsParams, Optimizer};
use burn::tensor::backend::{AutodiffBackend, Backend};
use burn::tensor::{Tensor, TensorData};
use image::Rgb32FImage;
use models::{PatchDiscriminator, ReflectionNet, Vgg19, Vgg19Config};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use reflection_dataset::image_io::{from_chw, save_png, to_chw};
use reflection_dataset::{prepare_data, LoadOutcome, PairSource, RootKind, TrainingPair};
use tracing::{debug, info, warn};

use crate::checkpoint::{CheckpointMeta, CheckpointStore, RestoreMode};
use crate::config::TrainConfig;
use crate::losses::{discriminator_loss, generator_terms, scalar, Targets};
use crate::stats::TrainStats;

/// The discriminator updates on every second accepted sample.
pub fn discriminator_turn(step: usize) -> bool {
    step % 2 == 0
}

pub fn epoch_dir(task: &Path, epoch: usize) -> PathBuf {
    task.join(format!("{epoch:04}"))
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrainSummary {
    pub restore: Option<RestoreMode>,
    pub epochs_run: Vec<usize>,
    /// Epochs whose output directory already existed.
    pub epochs_skipped: Vec<usize>,
    pub generator_steps: usize,
    pub discriminator_steps: usize,
    /// Samples dropped before an optimizer step (dim, degenerate or unreadable).
    pub rejected: usize,
}

/// `[1, 3, H, W]` tensor from an RGB image.
pub fn image_to_tensor<B: Backend>(img: &Rgb32FImage, device: &B::Device) -> Tensor<B, 4> {
    let (w, h) = img.dimensions();
    Tensor::from_data(
        TensorData::new(to_chw(img), [1, 3, h as usize, w as usize]),
        device,
    )
}

/// First image of a `[B, 3, H, W]` tensor.
pub fn tensor_to_image<B: Backend>(t: Tensor<B, 4>) -> anyhow::Result<Rgb32FImage> {
    let [_, _, h, w] = t.dims();
    let first = t.slice([0..1, 0..3, 0..h, 0..w]).clamp(0.0, 1.0);
    let data = first
        .into_data()
        .to_vec::<f32>()
        .map_err(|e| anyhow::anyhow!("failed to read output tensor: {e:?}"))?;
    Ok(from_chw(&data, w as u32, h as u32)?)
}

/// Frozen VGG-19 from the configured weights.
pub fn build_vgg<B: Backend>(
    cfg: &Vgg19Config,
    weights: Option<&Path>,
    allow_random: bool,
    device: &B::Device,
) -> anyhow::Result<Vgg19<B>> {
    match weights {
        Some(path) => Vgg19::load_pretrained(cfg, path, device)
            .map_err(|e| anyhow::anyhow!("failed to load VGG weights {}: {e}", path.display())),
        None if allow_random => {
            warn!("no VGG weights configured; using a randomly initialized feature extractor");
            Ok(Vgg19::new(cfg, device).no_grad())
        }
        None => anyhow::bail!("VGG weights are required (set --vgg_weights or vgg_weights)"),
    }
}

struct SampleTensors<B: Backend> {
    input: Tensor<B, 4>,
    targets: Targets<B>,
}

impl<B: Backend> SampleTensors<B> {
    fn from_pair(pair: &TrainingPair, device: &B::Device) -> Self {
        Self {
            input: image_to_tensor(&pair.input, device),
            targets: Targets {
                transmission: image_to_tensor(&pair.target_t, device),
                reflection: image_to_tensor(&pair.target_r, device),
                is_synthetic: pair.is_synthetic,
            },
        }
    }
}

/// Last trained sample of an epoch, kept for the sample dump.
struct EpochSample<B: Backend> {
    name: String,
    input: Rgb32FImage,
    transmission: Tensor<B, 4>,
    reflection: Tensor<B, 4>,
}

pub fn run_training<B: AutodiffBackend>(
    cfg: &TrainConfig,
    device: &B::Device,
) -> anyhow::Result<TrainSummary> {
    cfg.validate()?;
    let g_cfg = cfg.generator_config();
    let rolling = CheckpointStore::new(&cfg.task);
    let restore = RestoreMode::plan(&rolling, cfg.continue_training)?;
    match restore {
        RestoreMode::Fresh => {}
        RestoreMode::GeneratorOnly => rolling.check_compatible(&g_cfg, None)?,
        RestoreMode::Full => rolling.check_compatible(&g_cfg, Some(&cfg.discriminator))?,
    }

    let synthetic = prepare_data(&cfg.data_syn_dirs, RootKind::Synthetic)
        .context("failed to scan synthetic dataset")?;
    let real =
        prepare_data(&cfg.data_real_dirs, RootKind::Real).context("failed to scan real dataset")?;
    let source = PairSource::new(synthetic, real)?;
    let num_train = source.len();
    info!(
        total = num_train,
        synthetic = source.synthetic().len(),
        real = source.real().len(),
        first_real = %source.real().inputs[0].display(),
        "training images"
    );

    let vgg = build_vgg::<B>(
        &cfg.vgg,
        cfg.vgg_weights.as_deref(),
        cfg.allow_random_vgg,
        device,
    )?;
    let mut generator = match restore {
        RestoreMode::Fresh => ReflectionNet::<B>::new(&g_cfg, device),
        _ => rolling.load_generator::<B>(&g_cfg, device)?,
    };
    let mut discriminator = match restore {
        RestoreMode::Full => rolling.load_discriminator::<B>(&cfg.discriminator, device)?,
        _ => PatchDiscriminator::<B>::new(&cfg.discriminator, device),
    };
    info!(mode = ?restore, task = %cfg.task.display(), "networks ready");

    let mut optim_g = AdamConfig::new().init::<B, ReflectionNet<B>>();
    let mut optim_d = AdamConfig::new().init::<B, PatchDiscriminator<B>>();

    let mut rng = match cfg.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_os_rng(),
    };
    let sampler = cfg.sampling.sampler();
    let mut stats = TrainStats::new(num_train);
    let mut summary = TrainSummary {
        restore: Some(restore),
        ..Default::default()
    };

    for epoch in 1..cfg.max_epoch {
        let dir = epoch_dir(&cfg.task, epoch);
        if dir.is_dir() {
            debug!(epoch, "epoch directory exists; skipping");
            summary.epochs_skipped.push(epoch);
            continue;
        }

        let mut order: Vec<usize> = (0..num_train).collect();
        order.shuffle(&mut rng);
        let mut cnt = 0usize;
        let mut last: Option<EpochSample<B>> = None;

        for id in order {
            let started = Instant::now();
            let draw = sampler.draw(&mut rng);
            let pair = match source.load(id, draw, &mut rng) {
                Ok(LoadOutcome::Pair(pair)) => pair,
                Ok(LoadOutcome::DimReflection { name }) => {
                    info!(sample = %name, "reflection too dim; skipping");
                    summary.rejected += 1;
                    continue;
                }
                Err(err) => {
                    warn!(id, "skipping unreadable sample: {err}");
                    summary.rejected += 1;
                    continue;
                }
            };
            if let Err(reason) = cfg.thresholds.check(&pair) {
                warn!(sample = %pair.name, "invalid sample: {reason}");
                summary.rejected += 1;
                continue;
            }

            let batch = SampleTensors::<B>::from_pair(&pair, device);

            if discriminator_turn(cnt) {
                let fake = generator
                    .forward(batch.input.clone(), &vgg)
                    .transmission
                    .detach();
                let p_real = discriminator
                    .forward(batch.input.clone(), batch.targets.transmission.clone())
                    .probability;
                let p_fake = discriminator.forward(batch.input.clone(), fake).probability;
                let d_loss = discriminator_loss(p_real, p_fake);
                let grads = GradientsParams::from_grads(d_loss.backward(), &discriminator);
                discriminator = optim_d.step(cfg.lr_discriminator, discriminator, grads);
                summary.discriminator_steps += 1;
            }

            let layers = generator.forward(batch.input.clone(), &vgg);
            let p_fake = discriminator
                .forward(batch.input.clone(), layers.transmission.clone())
                .probability;
            let p_real = discriminator
                .forward(batch.input, batch.targets.transmission.clone())
                .probability;
            let current_d = scalar(discriminator_loss(p_real.detach(), p_fake.clone().detach()));
            let terms = generator_terms(&layers, &batch.targets, &vgg, p_fake, &cfg.loss);
            let values = terms.values(&cfg.loss);
            let objective = terms.generator_objective(&cfg.loss);
            let grads = GradientsParams::from_grads(objective.backward(), &generator);
            generator = optim_g.step(cfg.lr_generator, generator, grads);

            stats.record(id, &values);
            let means = stats.means();
            info!(
                "iter: {epoch} {cnt} || D: {current_d:.2} || G: {:.2} {:.2} || all: {:.2} || loss: {:.2} {:.2} || mean: {:.2} {:.2} || time: {:.2}",
                values.adversarial,
                means.adversarial,
                means.total,
                values.perceptual,
                values.exclusion * 255.0,
                means.perceptual,
                means.exclusion,
                started.elapsed().as_secs_f32(),
            );
            cnt += 1;
            last = Some(EpochSample {
                name: pair.name,
                input: pair.input,
                transmission: layers.transmission.detach(),
                reflection: layers.reflection.detach(),
            });
        }
        summary.generator_steps += cnt;
        summary.epochs_run.push(epoch);

        if epoch % cfg.save_model_freq == 0 {
            fs::create_dir_all(&dir)
                .with_context(|| format!("failed to create {}", dir.display()))?;
            let meta = CheckpointMeta {
                epoch,
                generator_steps: summary.generator_steps,
                generator: g_cfg.clone(),
                discriminator: cfg.discriminator.clone(),
                vgg: cfg.vgg.clone(),
            };
            rolling.save(&generator, &discriminator, &meta)?;
            CheckpointStore::new(&dir).save(&generator, &discriminator, &meta)?;
            info!(epoch, dir = %dir.display(), "saved checkpoint");

            match last {
                Some(sample) => dump_sample(&dir, sample)?,
                None => warn!(epoch, "no sample trained this epoch; skipping output dump"),
            }
        }
    }

    Ok(summary)
}

/// Write `int_t.png`, `out_t.png` and `out_r.png` under `<dir>/<sample name>/`.
fn dump_sample<B: Backend>(dir: &Path, sample: EpochSample<B>) -> anyhow::Result<()> {
    let out = dir.join(&sample.name);
    fs::create_dir_all(&out).with_context(|| format!("failed to create {}", out.display()))?;
    let transmission = tensor_to_image(sample.transmission)?;
    let reflection = tensor_to_image(sample.reflection)?;
    debug!(
        t = ?transmission.dimensions(),
        r = ?reflection.dimensions(),
        "shape of outputs"
    );
    save_png(&sample.input, &out.join("int_t.png"))?;
    save_png(&transmission, &out.join("out_t.png"))?;
    save_png(&reflection, &out.join("out_r.png"))?;
    Ok(())
}
