//! Image decoding, resizing and layout conversion.
//!
//! Everything in this crate works on `Rgb32FImage` (HWC, f32 in [0, 1]); the
//! trainer converts to CHW tensors at the model boundary.

use crate::types::{DatasetError, DatasetResult};
use image::imageops::FilterType;
use image::{Rgb, Rgb32FImage, RgbImage};
use std::path::Path;

/// Decode an image file into normalized RGB floats.
pub fn load_rgb(path: &Path) -> DatasetResult<Rgb32FImage> {
    let img = image::open(path).map_err(|source| DatasetError::Image {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(img.to_rgb32f())
}

/// Height that preserves aspect ratio when the width becomes `new_w`.
pub fn scaled_dims(width: u32, height: u32, new_w: u32) -> (u32, u32) {
    let new_h = (new_w as f64 / width.max(1) as f64 * height as f64).round() as u32;
    (new_w, new_h.max(1))
}

/// Bicubic resize to an exact size.
pub fn resize_to(img: &Rgb32FImage, width: u32, height: u32) -> Rgb32FImage {
    if img.dimensions() == (width, height) {
        return img.clone();
    }
    image::imageops::resize(img, width, height, FilterType::CatmullRom)
}

/// Bicubic resize to `new_w`, keeping aspect ratio.
pub fn resize_to_width(img: &Rgb32FImage, new_w: u32) -> Rgb32FImage {
    let (w, h) = img.dimensions();
    let (nw, nh) = scaled_dims(w, h, new_w);
    resize_to(img, nw, nh)
}

pub fn mean_value(img: &Rgb32FImage) -> f32 {
    let raw = img.as_raw();
    if raw.is_empty() {
        return 0.0;
    }
    let sum: f64 = raw.iter().map(|v| *v as f64).sum();
    (sum / raw.len() as f64) as f32
}

pub fn max_value(img: &Rgb32FImage) -> f32 {
    img.as_raw().iter().copied().fold(0.0f32, f32::max)
}

/// Flatten into CHW order (the layout burn convolutions expect).
pub fn to_chw(img: &Rgb32FImage) -> Vec<f32> {
    let (width, height) = img.dimensions();
    let plane = (width * height) as usize;
    let mut chw = vec![0.0f32; plane * 3];
    for (x, y, pixel) in img.enumerate_pixels() {
        let base = (y * width + x) as usize;
        chw[base] = pixel[0];
        chw[plane + base] = pixel[1];
        chw[2 * plane + base] = pixel[2];
    }
    chw
}

/// Inverse of [`to_chw`].
pub fn from_chw(data: &[f32], width: u32, height: u32) -> DatasetResult<Rgb32FImage> {
    let plane = (width * height) as usize;
    if data.len() != plane * 3 {
        return Err(DatasetError::Other(format!(
            "expected {} CHW values for {width}x{height}, got {}",
            plane * 3,
            data.len()
        )));
    }
    Ok(Rgb32FImage::from_fn(width, height, |x, y| {
        let base = (y * width + x) as usize;
        Rgb([data[base], data[plane + base], data[2 * plane + base]])
    }))
}

/// Clamp to [0, 1] and quantize to 8-bit.
pub fn to_rgb8(img: &Rgb32FImage) -> RgbImage {
    let (width, height) = img.dimensions();
    RgbImage::from_fn(width, height, |x, y| {
        let p = img.get_pixel(x, y);
        Rgb([quantize(p[0]), quantize(p[1]), quantize(p[2])])
    })
}

pub fn save_png(img: &Rgb32FImage, path: &Path) -> DatasetResult<()> {
    to_rgb8(img)
        .save(path)
        .map_err(|source| DatasetError::Image {
            path: path.to_path_buf(),
            source,
        })
}

fn quantize(v: f32) -> u8 {
    (v.clamp(0.0, 1.0) * 255.0) as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scaled_dims_keep_aspect() {
        assert_eq!(scaled_dims(640, 480, 320), (320, 240));
        assert_eq!(scaled_dims(3, 2, 256), (256, 171));
    }

    #[test]
    fn chw_layout_puts_channels_in_planes() {
        let img = Rgb32FImage::from_fn(2, 1, |x, _| {
            if x == 0 {
                Rgb([0.1, 0.2, 0.3])
            } else {
                Rgb([0.4, 0.5, 0.6])
            }
        });
        let chw = to_chw(&img);
        assert_eq!(chw, vec![0.1, 0.4, 0.2, 0.5, 0.3, 0.6]);
        let back = from_chw(&chw, 2, 1).unwrap();
        assert_eq!(back, img);
        assert!(from_chw(&chw[..5], 2, 1).is_err());
    }

    #[test]
    fn quantize_clamps_out_of_range() {
        let img = Rgb32FImage::from_pixel(1, 1, Rgb([-0.5, 0.5, 1.5]));
        let rgb = to_rgb8(&img);
        assert_eq!(rgb.get_pixel(0, 0).0, [0, 127, 255]);
    }
}
