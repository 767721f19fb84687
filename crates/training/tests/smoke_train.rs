//! End-to-end runs of the trainer on tiny generated datasets.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use burn::backend::Autodiff;
use burn_ndarray::NdArray;
use image::{Rgb, RgbImage};
use training::{run_training, CheckpointError, RestoreMode, TrainConfig};

type ADBackend = Autodiff<NdArray<f32>>;

fn write_image(path: &Path, base: u8) {
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    RgbImage::from_fn(40, 32, |x, y| {
        Rgb([
            base.saturating_add((x * 2) as u8),
            base,
            base.saturating_add((y * 3) as u8),
        ])
    })
    .save(path)
    .unwrap();
}

/// Two synthetic and two real samples; reflections are bright enough to never be skipped as dim.
fn dataset(root: &Path) -> (PathBuf, PathBuf) {
    let syn = root.join("syn");
    let real = root.join("real");
    for i in 0..2 {
        let name = format!("img_{i}.png");
        write_image(&syn.join("transmission_layer").join(&name), 90);
        write_image(&syn.join("reflection_layer").join(&name), 200);
        write_image(&real.join("blended").join(format!("real_{i}.png")), 150);
        write_image(&real.join("transmission_layer").join(format!("real_{i}.png")), 120);
    }
    (syn, real)
}

fn tiny_config(root: &Path) -> TrainConfig {
    let (syn, real) = dataset(root);
    let mut cfg = TrainConfig {
        task: root.join("task"),
        data_syn_dirs: vec![syn],
        data_real_dirs: vec![real],
        max_epoch: 3,
        seed: Some(7),
        allow_random_vgg: true,
        ..Default::default()
    };
    cfg.vgg.widths = [2, 2, 2, 2, 2];
    cfg.generator.channel = 4;
    cfg.generator.dilations = vec![1, 2];
    cfg.discriminator.base_channels = 4;
    cfg.sampling.width_min = 32;
    cfg.sampling.width_max = 40;
    cfg
}

fn device() -> <ADBackend as burn::tensor::backend::Backend>::Device {
    Default::default()
}

fn assert_checkpoint(dir: &Path) {
    for name in ["generator.bin", "discriminator.bin", "checkpoint.json"] {
        assert!(dir.join(name).is_file(), "missing {}", dir.join(name).display());
    }
}

#[test]
fn real_only_run_alternates_updates_and_saves_every_epoch() {
    let tmp = tempfile::tempdir().unwrap();
    let mut cfg = tiny_config(tmp.path());
    cfg.sampling.synthetic_prob = 0.0;

    let summary = run_training::<ADBackend>(&cfg, &device()).unwrap();
    assert_eq!(summary.restore, Some(RestoreMode::Fresh));
    assert_eq!(summary.epochs_run, vec![1, 2]);
    assert_eq!(summary.rejected, 0);
    // Four accepted samples per epoch; the discriminator steps on counts 0 and 2.
    assert_eq!(summary.generator_steps, 8);
    assert_eq!(summary.discriminator_steps, 4);

    assert_checkpoint(&cfg.task);
    assert_checkpoint(&cfg.task.join("0001"));
    assert_checkpoint(&cfg.task.join("0002"));

    let sample_dirs: Vec<PathBuf> = fs::read_dir(cfg.task.join("0002"))
        .unwrap()
        .filter_map(|e| e.ok().map(|e| e.path()))
        .filter(|p| p.is_dir())
        .collect();
    assert_eq!(sample_dirs.len(), 1);
    let name = sample_dirs[0].file_name().unwrap().to_string_lossy().to_string();
    assert!(name.starts_with("real_"));
    for file in ["int_t.png", "out_t.png", "out_r.png"] {
        let img = image::open(sample_dirs[0].join(file)).unwrap();
        assert!(img.width() >= 32 && img.width() < 40);
    }
}

#[test]
fn synthetic_run_accounts_for_every_sample() {
    let tmp = tempfile::tempdir().unwrap();
    let mut cfg = tiny_config(tmp.path());
    cfg.sampling.synthetic_prob = 1.0;
    cfg.max_epoch = 2;

    let summary = run_training::<ADBackend>(&cfg, &device()).unwrap();
    assert_eq!(summary.epochs_run, vec![1]);
    assert_eq!(summary.generator_steps + summary.rejected, 4);
    assert_eq!(
        summary.discriminator_steps,
        summary.generator_steps.div_ceil(2)
    );
    assert_checkpoint(&cfg.task.join("0001"));
}

#[test]
fn dark_and_unreadable_samples_never_reach_an_update() {
    let tmp = tempfile::tempdir().unwrap();
    let mut cfg = tiny_config(tmp.path());
    cfg.sampling.synthetic_prob = 0.0;
    cfg.max_epoch = 2;

    // Real ids map to `id % 4`; the two bad samples are each drawn once.
    let real = &cfg.data_real_dirs[0];
    let dark = real.join("blended").join("real_2.png");
    RgbImage::from_pixel(40, 32, Rgb([10, 10, 10])).save(&dark).unwrap();
    write_image(&real.join("transmission_layer").join("real_2.png"), 120);
    fs::write(real.join("blended").join("real_3.png"), b"not a png").unwrap();
    write_image(&real.join("transmission_layer").join("real_3.png"), 120);

    let summary = run_training::<ADBackend>(&cfg, &device()).unwrap();
    assert_eq!(summary.epochs_run, vec![1]);
    assert_eq!(summary.rejected, 2);
    assert_eq!(summary.generator_steps, 4);
    assert_eq!(summary.discriminator_steps, 2);
    assert_checkpoint(&cfg.task.join("0001"));
}

/// Log sink shared with a thread-local subscriber.
#[derive(Clone, Default)]
struct Captured(Arc<Mutex<Vec<u8>>>);

impl Write for Captured {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

#[test]
fn dim_reflection_skips_are_logged_at_info() {
    let tmp = tempfile::tempdir().unwrap();
    let mut cfg = tiny_config(tmp.path());
    cfg.sampling.synthetic_prob = 1.0;
    cfg.max_epoch = 2;
    for i in 0..2 {
        let name = format!("img_{i}.png");
        let syn = &cfg.data_syn_dirs[0];
        RgbImage::from_pixel(40, 32, Rgb([230, 230, 230]))
            .save(syn.join("transmission_layer").join(&name))
            .unwrap();
        RgbImage::from_pixel(40, 32, Rgb([5, 5, 5]))
            .save(syn.join("reflection_layer").join(&name))
            .unwrap();
    }

    let sink = Captured::default();
    let writer = sink.clone();
    let subscriber = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .with_ansi(false)
        .with_writer(move || writer.clone())
        .finish();
    let summary = tracing::subscriber::with_default(subscriber, || {
        run_training::<ADBackend>(&cfg, &device()).unwrap()
    });

    assert_eq!(summary.generator_steps, 0);
    assert_eq!(summary.discriminator_steps, 0);
    assert_eq!(summary.rejected, 4);
    let logs = String::from_utf8(sink.0.lock().unwrap().clone()).unwrap();
    assert_eq!(logs.matches("reflection too dim").count(), 4);
}

#[test]
fn resume_with_other_discriminator_is_rejected() {
    let tmp = tempfile::tempdir().unwrap();
    let mut cfg = tiny_config(tmp.path());
    cfg.sampling.synthetic_prob = 0.0;
    cfg.max_epoch = 2;
    run_training::<ADBackend>(&cfg, &device()).unwrap();

    cfg.discriminator.base_channels = 2;
    cfg.max_epoch = 3;
    let warm = run_training::<ADBackend>(&cfg, &device()).unwrap();
    assert_eq!(warm.restore, Some(RestoreMode::GeneratorOnly));

    cfg.discriminator.base_channels = 4;
    cfg.continue_training = true;
    cfg.max_epoch = 4;
    let err = run_training::<ADBackend>(&cfg, &device()).unwrap_err();
    assert!(matches!(
        err.downcast_ref::<CheckpointError>(),
        Some(CheckpointError::Incompatible { .. })
    ));
    assert!(!cfg.task.join("0003").exists());
}

#[test]
fn resume_without_checkpoint_fails_before_any_step() {
    let tmp = tempfile::tempdir().unwrap();
    let mut cfg = tiny_config(tmp.path());
    cfg.continue_training = true;
    fs::create_dir_all(&cfg.task).unwrap();

    let err = run_training::<ADBackend>(&cfg, &device()).unwrap_err();
    assert!(matches!(
        err.downcast_ref::<CheckpointError>(),
        Some(CheckpointError::Missing { .. })
    ));
    assert!(!cfg.task.join("0001").exists());
    assert!(!cfg.task.join("generator.bin").exists());
}

#[test]
fn existing_epoch_directories_are_never_reentered() {
    let tmp = tempfile::tempdir().unwrap();
    let mut cfg = tiny_config(tmp.path());
    cfg.sampling.synthetic_prob = 0.0;
    fs::create_dir_all(cfg.task.join("0001")).unwrap();

    let summary = run_training::<ADBackend>(&cfg, &device()).unwrap();
    assert_eq!(summary.epochs_skipped, vec![1]);
    assert_eq!(summary.epochs_run, vec![2]);
    assert_eq!(fs::read_dir(cfg.task.join("0001")).unwrap().count(), 0);
    assert_checkpoint(&cfg.task.join("0002"));
}

#[test]
fn warm_start_then_resume() {
    let tmp = tempfile::tempdir().unwrap();
    let mut cfg = tiny_config(tmp.path());
    cfg.sampling.synthetic_prob = 0.0;
    cfg.max_epoch = 2;
    run_training::<ADBackend>(&cfg, &device()).unwrap();

    cfg.max_epoch = 3;
    let warm = run_training::<ADBackend>(&cfg, &device()).unwrap();
    assert_eq!(warm.restore, Some(RestoreMode::GeneratorOnly));
    assert_eq!(warm.epochs_skipped, vec![1]);
    assert_eq!(warm.epochs_run, vec![2]);

    cfg.max_epoch = 4;
    cfg.continue_training = true;
    let resumed = run_training::<ADBackend>(&cfg, &device()).unwrap();
    assert_eq!(resumed.restore, Some(RestoreMode::Full));
    assert_eq!(resumed.epochs_run, vec![3]);
}

#[test]
fn checkpoint_for_other_architecture_is_rejected() {
    let tmp = tempfile::tempdir().unwrap();
    let mut cfg = tiny_config(tmp.path());
    cfg.sampling.synthetic_prob = 0.0;
    cfg.generator.hyper = false;
    cfg.max_epoch = 2;
    run_training::<ADBackend>(&cfg, &device()).unwrap();

    cfg.generator.hyper = true;
    cfg.continue_training = true;
    cfg.max_epoch = 3;
    let err = run_training::<ADBackend>(&cfg, &device()).unwrap_err();
    assert!(matches!(
        err.downcast_ref::<CheckpointError>(),
        Some(CheckpointError::Incompatible { .. })
    ));
}
