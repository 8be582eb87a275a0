use crate::ImageError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    Rgb8,
    Bgr8,
    Gray8,
}

impl PixelFormat {
    pub fn channels(&self) -> usize {
        match self {
            PixelFormat::Rgb8 | PixelFormat::Bgr8 => 3,
            PixelFormat::Gray8 => 1,
        }
    }
}

/// Packed 8-bit frame, row-major, interleaved channels.
#[derive(Debug, Clone, PartialEq)]
pub struct Image {
    pub width: usize,
    pub height: usize,
    pub format: PixelFormat,
    pub data: Vec<u8>,
}

impl Image {
    pub fn new(width: usize, height: usize, data: Vec<u8>, format: PixelFormat) -> Self {
        Self {
            width,
            height,
            format,
            data,
        }
    }

    /// Like `new`, but checks that `data` holds exactly one frame.
    pub fn checked(
        width: usize,
        height: usize,
        data: Vec<u8>,
        format: PixelFormat,
    ) -> Result<Self, ImageError> {
        let expected = width * height * format.channels();
        if data.len() != expected {
            return Err(ImageError::Format(format!(
                "{}x{} {:?} frame needs {} bytes, got {}",
                width,
                height,
                format,
                expected,
                data.len()
            )));
        }
        Ok(Self::new(width, height, data, format))
    }

    pub fn pixel_count(&self) -> usize {
        self.width * self.height
    }

    /// Converts to interleaved RGB. Camera pipelines usually deliver BGR.
    pub fn to_rgb(&self) -> Image {
        let data = match self.format {
            PixelFormat::Rgb8 => self.data.clone(),
            PixelFormat::Bgr8 => self
                .data
                .chunks_exact(3)
                .flat_map(|c| [c[2], c[1], c[0]])
                .collect(),
            PixelFormat::Gray8 => self.data.iter().flat_map(|&v| [v, v, v]).collect(),
        };
        Image::new(self.width, self.height, data, PixelFormat::Rgb8)
    }
}
