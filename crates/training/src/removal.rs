//! Apply a trained generator to a directory of photographs.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Context;
use burn::tensor::backend::Backend;
use models::{ReflectionNet, Vgg19};
use reflection_dataset::image_io::{load_rgb, save_png};
use reflection_dataset::{file_stem, is_image_file};
use tracing::{info, warn};

use crate::trainer::{image_to_tensor, tensor_to_image};

/// Image files directly under `dir`, sorted.
pub fn list_images(dir: &Path) -> anyhow::Result<Vec<PathBuf>> {
    let mut files: Vec<PathBuf> = fs::read_dir(dir)
        .with_context(|| format!("failed to read {}", dir.display()))?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.is_file() && is_image_file(p))
        .collect();
    files.sort();
    Ok(files)
}

/// Separate every image, writing `<out>/<stem>/{input,t_output,r_output}.png`.
///
/// Unreadable images are logged and skipped; returns how many were written.
pub fn remove_reflections<B: Backend>(
    generator: &ReflectionNet<B>,
    vgg: &Vgg19<B>,
    inputs: &[PathBuf],
    out_dir: &Path,
    device: &B::Device,
) -> anyhow::Result<usize> {
    let mut written = 0usize;
    for path in inputs {
        let img = match load_rgb(path) {
            Ok(img) => img,
            Err(err) => {
                warn!("skipping {}: {err}", path.display());
                continue;
            }
        };
        let layers = generator.forward(image_to_tensor(&img, device), vgg);
        let out = out_dir.join(file_stem(path));
        fs::create_dir_all(&out).with_context(|| format!("failed to create {}", out.display()))?;
        save_png(&img, &out.join("input.png"))?;
        save_png(&tensor_to_image(layers.transmission)?, &out.join("t_output.png"))?;
        save_png(&tensor_to_image(layers.reflection)?, &out.join("r_output.png"))?;
        info!(image = %path.display(), out = %out.display(), "separated");
        written += 1;
    }
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use models::{ReflectionNetConfig, Vgg19Config};

    type B = burn_ndarray::NdArray<f32>;

    #[test]
    fn writes_three_images_per_input_and_skips_garbage() {
        let tmp = tempfile::tempdir().unwrap();
        let inputs = tmp.path().join("in");
        fs::create_dir_all(&inputs).unwrap();
        image::RgbImage::from_pixel(32, 24, image::Rgb([200, 120, 40]))
            .save(inputs.join("room.png"))
            .unwrap();
        fs::write(inputs.join("broken.jpg"), b"not a jpeg").unwrap();
        fs::write(inputs.join("notes.txt"), b"ignored").unwrap();

        let files = list_images(&inputs).unwrap();
        assert_eq!(files.len(), 2);

        let device = Default::default();
        let vgg_cfg = Vgg19Config {
            widths: [2, 2, 2, 2, 2],
        };
        let vgg = Vgg19::<B>::new(&vgg_cfg, &device);
        let cfg = ReflectionNetConfig {
            channel: 4,
            dilations: vec![1, 2],
            ..Default::default()
        }
        .with_vgg(&vgg_cfg);
        let generator = ReflectionNet::<B>::new(&cfg, &device);

        let out = tmp.path().join("out");
        let written = remove_reflections(&generator, &vgg, &files, &out, &device).unwrap();
        assert_eq!(written, 1);
        for name in ["input.png", "t_output.png", "r_output.png"] {
            let img = image::open(out.join("room").join(name)).unwrap();
            assert_eq!((img.width(), img.height()), (32, 24));
        }
        assert!(!out.join("broken").exists());
    }
}
