//! Frozen VGG-19 trunk used for hypercolumns and perceptual features.
//!
//! Only the layers up to `conv5_2` are built. Pooling is 2×2 average pooling
//! between blocks, matching the pretrained weights the perceptual loss was
//! tuned against.
//!
//! Pretrained weights come either as a burn record or as a `.safetensors`
//! export of the ImageNet VGG-19 with one `conv{block}_{i}.weight` /
//! `conv{block}_{i}.bias` pair per conv (`conv1_1` .. `conv5_2`, f32).
//! Weights may be laid out `[out, in, kh, kw]` or `[kh, kw, in, out]`; the
//! latter is what a MatConvNet export produces and is transposed on load.

use burn::module::{Module, Param};
use burn::nn::conv::{Conv2d, Conv2dConfig};
use burn::nn::pool::{AvgPool2d, AvgPool2dConfig};
use burn::nn::PaddingConfig2d;
use burn::record::{BinFileRecorder, FullPrecisionSettings};
use burn::tensor::activation::relu;
use burn::tensor::{backend::Backend, Tensor, TensorData};
use safetensors::{Dtype, SafeTensors};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// ImageNet channel means (RGB) in 0..255 units.
const MEAN_RGB: [f32; 3] = [123.68, 116.779, 103.939];
/// Convs per block, truncated after `conv5_2`.
const BLOCK_DEPTHS: [usize; 5] = [2, 2, 4, 4, 2];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Vgg19Config {
    /// Output channels of each of the five blocks.
    pub widths: [usize; 5],
}

impl Default for Vgg19Config {
    fn default() -> Self {
        Self {
            widths: [64, 128, 256, 512, 512],
        }
    }
}

impl Vgg19Config {
    /// Channels added to the generator input when hypercolumns are on.
    pub fn hypercolumn_channels(&self) -> usize {
        self.widths.iter().sum()
    }
}

#[derive(Debug, Error)]
pub enum VggWeightsError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to load burn record {path}: {message}")]
    Record { path: PathBuf, message: String },
    #[error("invalid safetensors file {path}: {message}")]
    Format { path: PathBuf, message: String },
    #[error("tensor {name} missing from {path}")]
    MissingTensor { path: PathBuf, name: String },
    #[error("tensor {name} has shape {found:?}, expected {expected:?}")]
    Shape {
        name: String,
        expected: Vec<usize>,
        found: Vec<usize>,
    },
    #[error("tensor {name} is {dtype}, expected F32")]
    Dtype { name: String, dtype: String },
}

/// `conv{1..5}_2` activations.
#[derive(Debug, Clone)]
pub struct VggFeatures<B: Backend> {
    pub conv1_2: Tensor<B, 4>,
    pub conv2_2: Tensor<B, 4>,
    pub conv3_2: Tensor<B, 4>,
    pub conv4_2: Tensor<B, 4>,
    pub conv5_2: Tensor<B, 4>,
}

impl<B: Backend> VggFeatures<B> {
    pub fn into_vec(self) -> Vec<Tensor<B, 4>> {
        vec![
            self.conv1_2,
            self.conv2_2,
            self.conv3_2,
            self.conv4_2,
            self.conv5_2,
        ]
    }
}

#[derive(Module, Debug)]
pub struct Vgg19<B: Backend> {
    blocks: Vec<Vec<Conv2d<B>>>,
    pool: AvgPool2d,
}

impl<B: Backend> Vgg19<B> {
    pub fn new(cfg: &Vgg19Config, device: &B::Device) -> Self {
        let mut blocks = Vec::with_capacity(BLOCK_DEPTHS.len());
        let mut c_in = 3;
        for (depth, width) in BLOCK_DEPTHS.iter().zip(cfg.widths) {
            let mut convs = Vec::with_capacity(*depth);
            for _ in 0..*depth {
                convs.push(
                    Conv2dConfig::new([c_in, width], [3, 3])
                        .with_padding(PaddingConfig2d::Explicit(1, 1))
                        .init(device),
                );
                c_in = width;
            }
            blocks.push(convs);
        }
        let pool = AvgPool2dConfig::new([2, 2]).with_strides([2, 2]).init();
        Self { blocks, pool }
    }

    /// Load pretrained weights and freeze them.
    ///
    /// `.safetensors` files are imported by layer name; anything else is read
    /// as a full-precision burn record.
    pub fn load_pretrained<P: AsRef<Path>>(
        cfg: &Vgg19Config,
        path: P,
        device: &B::Device,
    ) -> Result<Self, VggWeightsError> {
        let path = path.as_ref();
        let is_safetensors = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("safetensors"));
        let vgg = if is_safetensors {
            Self::from_safetensors(cfg, path, device)?
        } else {
            let recorder = BinFileRecorder::<FullPrecisionSettings>::new();
            Self::new(cfg, device)
                .load_file(path, &recorder, device)
                .map_err(|e| VggWeightsError::Record {
                    path: path.to_path_buf(),
                    message: e.to_string(),
                })?
        };
        Ok(vgg.no_grad())
    }

    /// Import `conv{block}_{i}` weights from a safetensors file.
    pub fn from_safetensors(
        cfg: &Vgg19Config,
        path: &Path,
        device: &B::Device,
    ) -> Result<Self, VggWeightsError> {
        let bytes = std::fs::read(path).map_err(|source| VggWeightsError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let tensors = SafeTensors::deserialize(&bytes).map_err(|e| VggWeightsError::Format {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;

        let mut vgg = Self::new(cfg, device);
        let mut c_in = 3;
        for (b, (block, width)) in vgg.blocks.iter_mut().zip(cfg.widths).enumerate() {
            for (i, conv) in block.iter_mut().enumerate() {
                let layer = format!("conv{}_{}", b + 1, i + 1);
                let weight = read_conv_weight(&tensors, path, &layer, c_in, width, device)?;
                let bias_name = format!("{layer}.bias");
                let bias = read_f32(&tensors, path, &bias_name)?;
                if bias.1.iter().product::<usize>() != width {
                    return Err(VggWeightsError::Shape {
                        name: bias_name,
                        expected: vec![width],
                        found: bias.1,
                    });
                }
                conv.weight = Param::from_tensor(weight);
                conv.bias = Some(Param::from_tensor(Tensor::from_data(
                    TensorData::new(bias.0, [width]),
                    device,
                )));
                c_in = width;
            }
        }
        Ok(vgg)
    }

    /// Features of an image in [0, 1]; scaling to 0..255 and mean removal happen here.
    pub fn forward(&self, image: Tensor<B, 4>) -> VggFeatures<B> {
        let device = image.device();
        let mean = Tensor::<B, 1>::from_floats(MEAN_RGB, &device).reshape([1, 3, 1, 1]);
        let x = image.mul_scalar(255.0) - mean;

        let (conv1_2, x) = self.run_block(0, x);
        let (conv2_2, x) = self.run_block(1, self.pool.forward(x));
        let (conv3_2, x) = self.run_block(2, self.pool.forward(x));
        let (conv4_2, x) = self.run_block(3, self.pool.forward(x));
        let (conv5_2, _) = self.run_block(4, self.pool.forward(x));
        VggFeatures {
            conv1_2,
            conv2_2,
            conv3_2,
            conv4_2,
            conv5_2,
        }
    }

    /// Returns the second conv's activation and the block output.
    fn run_block(&self, index: usize, mut x: Tensor<B, 4>) -> (Tensor<B, 4>, Tensor<B, 4>) {
        let mut tap = None;
        for (j, conv) in self.blocks[index].iter().enumerate() {
            x = relu(conv.forward(x));
            if j == 1 {
                tap = Some(x.clone());
            }
        }
        (tap.unwrap_or_else(|| x.clone()), x)
    }
}

fn read_f32(
    tensors: &SafeTensors<'_>,
    path: &Path,
    name: &str,
) -> Result<(Vec<f32>, Vec<usize>), VggWeightsError> {
    let view = tensors
        .tensor(name)
        .map_err(|_| VggWeightsError::MissingTensor {
            path: path.to_path_buf(),
            name: name.to_string(),
        })?;
    if view.dtype() != Dtype::F32 {
        return Err(VggWeightsError::Dtype {
            name: name.to_string(),
            dtype: format!("{:?}", view.dtype()),
        });
    }
    let values = view
        .data()
        .chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect();
    Ok((values, view.shape().to_vec()))
}

/// `[out, in, 3, 3]` conv kernel, transposing `[3, 3, in, out]` layouts.
fn read_conv_weight<B: Backend>(
    tensors: &SafeTensors<'_>,
    path: &Path,
    layer: &str,
    c_in: usize,
    c_out: usize,
    device: &B::Device,
) -> Result<Tensor<B, 4>, VggWeightsError> {
    let name = format!("{layer}.weight");
    let (values, shape) = read_f32(tensors, path, &name)?;
    if shape == [c_out, c_in, 3, 3] {
        Ok(Tensor::from_data(TensorData::new(values, [c_out, c_in, 3, 3]), device))
    } else if shape == [3, 3, c_in, c_out] {
        let hwio = Tensor::<B, 4>::from_data(TensorData::new(values, [3, 3, c_in, c_out]), device);
        Ok(hwio.permute([3, 2, 0, 1]))
    } else {
        Err(VggWeightsError::Shape {
            name,
            expected: vec![c_out, c_in, 3, 3],
            found: shape,
        })
    }
}
