//! Frame types and pixel utilities for the segmentation pipeline.
//!
//! `Image` is the packed 8-bit frame handed in by capture code. It is turned
//! into a normalized CHW `Tensor<f32>` for the model, and class masks coming
//! back are rendered with a `Palette`.

pub mod error;
pub mod image;
mod normalize;
mod palette;

pub use error::ImageError;
pub use image::{Image, PixelFormat};
pub use normalize::Normalization;
pub use palette::Palette;

use crates_image::ImageEncoder;

fn decode_image_inner(data: &[u8]) -> Result<Image, ImageError> {
    let rgb = crates_image::load_from_memory(data)?.to_rgb8();
    let (w, h) = rgb.dimensions();
    Ok(Image::new(
        w as usize,
        h as usize,
        rgb.into_raw(),
        PixelFormat::Rgb8,
    ))
}

fn encode_inner(image: &Image, jpeg_quality: Option<u8>) -> Result<Vec<u8>, ImageError> {
    let (data, color_type) = match image.format {
        PixelFormat::Gray8 => (image.data.clone(), crates_image::ExtendedColorType::L8),
        _ => (image.to_rgb().data, crates_image::ExtendedColorType::Rgb8),
    };
    let (width, height) = (image.width as u32, image.height as u32);

    let mut buffer = Vec::new();
    let result = match jpeg_quality {
        Some(quality) => {
            crates_image::codecs::jpeg::JpegEncoder::new_with_quality(&mut buffer, quality)
                .write_image(&data, width, height, color_type)
        }
        None => crates_image::codecs::png::PngEncoder::new(&mut buffer)
            .write_image(&data, width, height, color_type),
    };
    result.map_err(|e| ImageError::Encode(e.to_string()))?;

    Ok(buffer)
}

/// Decodes an image from raw bytes into an RGB frame.
///
/// The CPU-bound decoding work runs on tokio's blocking thread pool.
pub async fn decode_image(data: &[u8]) -> Result<Image, ImageError> {
    let owned = data.to_vec();
    tokio::task::spawn_blocking(move || decode_image_inner(&owned))
        .await
        .map_err(|e| ImageError::Decode(e.to_string()))?
}

/// Encodes a frame as PNG. Lossless, so rendered masks keep exact class colors.
pub async fn encode_png(image: Image) -> Result<Vec<u8>, ImageError> {
    tokio::task::spawn_blocking(move || encode_inner(&image, None))
        .await
        .map_err(|e| ImageError::Encode(e.to_string()))?
}

/// Encodes a frame as JPEG with the given quality (1-100).
pub async fn encode_jpeg(image: Image, quality: u8) -> Result<Vec<u8>, ImageError> {
    tokio::task::spawn_blocking(move || encode_inner(&image, Some(quality)))
        .await
        .map_err(|e| ImageError::Encode(e.to_string()))?
}
