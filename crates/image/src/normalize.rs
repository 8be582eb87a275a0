use {
    crate::{Image, ImageError},
    base::Tensor,
};

/// Per-channel statistics used to standardize RGB frames.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Normalization {
    pub mean: [f32; 3],
    pub std: [f32; 3],
}

impl Normalization {
    /// ImageNet statistics, the convention of torchvision hub backbones.
    pub fn imagenet() -> Self {
        Self {
            mean: [0.485, 0.456, 0.406],
            std: [0.229, 0.224, 0.225],
        }
    }

    /// Scales to 0-1, subtracts the mean and divides by the std.
    ///
    /// Returns a `[3, height, width]` tensor. Non-RGB frames are converted first.
    pub fn apply(&self, image: &Image) -> Result<Tensor<f32>, ImageError> {
        let rgb = image.to_rgb();
        if rgb.data.len() != rgb.pixel_count() * 3 {
            return Err(ImageError::Format(format!(
                "frame data has {} bytes, expected {}",
                rgb.data.len(),
                rgb.pixel_count() * 3
            )));
        }

        let plane = rgb.pixel_count();
        let mut data = vec![0.0f32; plane * 3];
        for (i, pixel) in rgb.data.chunks_exact(3).enumerate() {
            for c in 0..3 {
                let v = pixel[c] as f32 / 255.0;
                data[c * plane + i] = (v - self.mean[c]) / self.std[c];
            }
        }

        Ok(Tensor::new(vec![3, rgb.height, rgb.width], data)?)
    }
}

impl Default for Normalization {
    fn default() -> Self {
        Self::imagenet()
    }
}
