//! Image preprocessing: resize, center crop, rescale and normalize

use super::record::{RawRecord, Sample};
use calibrar_common::{CalibrarError, Result};
use serde::{Deserialize, Serialize};

/// Turns a raw record into a fixed-shape sample.
///
/// Implementations must be pure and deterministic: the same record always
/// produces the same sample.
pub trait Preprocessor: Send + Sync {
    /// Preprocess one record.
    fn preprocess(&self, record: &RawRecord) -> Result<Sample>;

    /// Shape of every produced sample
    fn output_shape(&self) -> Vec<usize>;
}

/// Preprocessing parameters for square image models.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ImagePreprocessor {
    /// Output height and width
    pub image_size: usize,
    /// Per-channel mean subtracted after rescaling
    pub image_mean: Vec<f32>,
    /// Per-channel std dividing after mean subtraction
    pub image_std: Vec<f32>,
    /// Factor applied to raw pixel values
    pub rescale_factor: f32,
}

impl ImagePreprocessor {
    /// Create a preprocessor with ImageNet-style 0.5 mean/std over 3 channels.
    pub fn new(image_size: usize) -> Self {
        Self {
            image_size,
            image_mean: vec![0.5; 3],
            image_std: vec![0.5; 3],
            rescale_factor: 1.0 / 255.0,
        }
    }

    /// Set per-channel normalization statistics
    pub fn with_normalization(mut self, mean: Vec<f32>, std: Vec<f32>) -> Self {
        self.image_mean = mean;
        self.image_std = std;
        self
    }

    fn channels(&self) -> usize {
        self.image_mean.len()
    }

    /// Nearest-neighbour resize so the shorter edge equals `image_size`,
    /// followed by a center crop to `image_size x image_size`.
    fn resize_crop(&self, pixels: &[f32], height: usize, width: usize, channel: usize) -> Vec<f32> {
        let size = self.image_size;
        let short = height.min(width) as f64;
        let scale = size as f64 / short;
        let resized_h = ((height as f64 * scale).round() as usize).max(size);
        let resized_w = ((width as f64 * scale).round() as usize).max(size);
        let top = (resized_h - size) / 2;
        let left = (resized_w - size) / 2;

        let plane = &pixels[channel * height * width..(channel + 1) * height * width];
        let mut out = Vec::with_capacity(size * size);
        for y in 0..size {
            let src_y = (((y + top) as f64 + 0.5) / scale).floor() as usize;
            let src_y = src_y.min(height - 1);
            for x in 0..size {
                let src_x = (((x + left) as f64 + 0.5) / scale).floor() as usize;
                out.push(plane[src_y * width + src_x.min(width - 1)]);
            }
        }
        out
    }
}

impl Preprocessor for ImagePreprocessor {
    fn preprocess(&self, record: &RawRecord) -> Result<Sample> {
        let [channels, height, width] = record.shape;
        if channels != self.channels() || height == 0 || width == 0 {
            return Err(CalibrarError::ShapeMismatch {
                expected: vec![self.channels(), self.image_size, self.image_size],
                actual: record.shape.to_vec(),
            });
        }
        if record.pixels.len() != channels * height * width {
            return Err(CalibrarError::DatasetFormat {
                message: format!(
                    "pixel buffer has {} values but shape {:?} needs {}",
                    record.pixels.len(),
                    record.shape,
                    channels * height * width
                ),
            });
        }

        let mut data = Vec::with_capacity(channels * self.image_size * self.image_size);
        for c in 0..channels {
            let mean = self.image_mean[c];
            let std = self.image_std[c];
            data.extend(
                self.resize_crop(&record.pixels, height, width, c)
                    .into_iter()
                    .map(|v| (v * self.rescale_factor - mean) / std),
            );
        }
        Sample::new(self.output_shape(), data)
    }

    fn output_shape(&self) -> Vec<usize> {
        vec![self.channels(), self.image_size, self.image_size]
    }
}
