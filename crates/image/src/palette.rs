use {
    crate::{Image, ImageError, PixelFormat},
    base::Tensor,
};

/// Class-index to color lookup for rendering segmentation masks.
#[derive(Debug, Clone, PartialEq)]
pub struct Palette {
    colors: Vec<[u8; 3]>,
}

impl Palette {
    pub fn new(colors: Vec<[u8; 3]>) -> Self {
        Self { colors }
    }

    /// Obstacle, water and sky, in class-index order.
    pub fn maritime() -> Self {
        Self::new(vec![[247, 195, 37], [41, 167, 224], [90, 75, 164]])
    }

    pub fn len(&self) -> usize {
        self.colors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.colors.is_empty()
    }

    pub fn color(&self, class: u8) -> Option<[u8; 3]> {
        self.colors.get(class as usize).copied()
    }

    /// Renders an `[height, width]` class mask as an RGB image.
    ///
    /// Fails on the first class index the palette has no color for.
    pub fn colorize(&self, mask: &Tensor<u8>) -> Result<Image, ImageError> {
        let [height, width] = mask.dims::<2>()?;
        let mut data = Vec::with_capacity(mask.len() * 3);
        for &class in &mask.data {
            let color = self.color(class).ok_or_else(|| {
                ImageError::Format(format!(
                    "class index {} outside palette of {} colors",
                    class,
                    self.colors.len()
                ))
            })?;
            data.extend_from_slice(&color);
        }
        Ok(Image::new(width, height, data, PixelFormat::Rgb8))
    }
}
