//! services/api/src/adapters/image_resize.rs
//!
//! Resizes uploads so the long edge fits a fixed bound before they are stored
//! and sent to the vision model. Decoding and encoding are CPU-bound and run on
//! the blocking pool.

use async_trait::async_trait;
use bytes::Bytes;
use image::{codecs::jpeg::JpegEncoder, imageops::FilterType, DynamicImage, ImageFormat};
use photo_coach_core::ports::{ImageProcessor, PortError, PortResult};
use std::io::Cursor;

const JPEG_QUALITY: u8 = 90;

#[derive(Clone, Debug)]
pub struct ImageResizer {
    max_edge: u32,
}

impl ImageResizer {
    pub fn new(max_edge: u32) -> Self {
        Self {
            max_edge: max_edge.max(1),
        }
    }
}

#[async_trait]
impl ImageProcessor for ImageResizer {
    async fn normalize(&self, data: Bytes, content_type: &str) -> PortResult<(Bytes, String)> {
        let max_edge = self.max_edge;
        let keep_png = content_type.eq_ignore_ascii_case("image/png");

        tokio::task::spawn_blocking(move || resize_and_encode(&data, max_edge, keep_png))
            .await
            .map_err(|e| PortError::Unexpected(format!("Resize task failed: {}", e)))?
    }
}

fn resize_and_encode(data: &[u8], max_edge: u32, keep_png: bool) -> PortResult<(Bytes, String)> {
    let decoded = image::load_from_memory(data)
        .map_err(|e| PortError::InvalidInput(format!("Undecodable image: {}", e)))?;

    let resized = if decoded.width() > max_edge || decoded.height() > max_edge {
        decoded.resize(max_edge, max_edge, FilterType::CatmullRom)
    } else {
        decoded
    };

    let mut out = Cursor::new(Vec::new());
    if keep_png {
        resized
            .write_to(&mut out, ImageFormat::Png)
            .map_err(|e| PortError::Unexpected(e.to_string()))?;
        return Ok((Bytes::from(out.into_inner()), "image/png".to_string()));
    }

    // JPEG has no alpha channel.
    let rgb = DynamicImage::ImageRgb8(resized.to_rgb8());
    rgb.write_with_encoder(JpegEncoder::new_with_quality(&mut out, JPEG_QUALITY))
        .map_err(|e| PortError::Unexpected(e.to_string()))?;
    Ok((Bytes::from(out.into_inner()), "image/jpeg".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageBuffer, Rgb};

    fn png_bytes(width: u32, height: u32) -> Bytes {
        let img = ImageBuffer::from_pixel(width, height, Rgb([120u8, 80, 40]));
        let mut out = Cursor::new(Vec::new());
        DynamicImage::ImageRgb8(img)
            .write_to(&mut out, ImageFormat::Png)
            .unwrap();
        Bytes::from(out.into_inner())
    }

    #[tokio::test]
    async fn large_images_are_bounded_and_keep_their_aspect() {
        let resizer = ImageResizer::new(64);
        let (data, content_type) = resizer
            .normalize(png_bytes(256, 128), "image/jpeg")
            .await
            .unwrap();
        assert_eq!(content_type, "image/jpeg");

        let decoded = image::load_from_memory(&data).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (64, 32));
    }

    #[tokio::test]
    async fn png_stays_png_and_small_images_are_not_upscaled() {
        let resizer = ImageResizer::new(1024);
        let (data, content_type) = resizer
            .normalize(png_bytes(10, 20), "image/png")
            .await
            .unwrap();
        assert_eq!(content_type, "image/png");
        let decoded = image::load_from_memory(&data).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (10, 20));
    }

    #[tokio::test]
    async fn garbage_is_invalid_input() {
        let resizer = ImageResizer::new(1024);
        let err = resizer
            .normalize(Bytes::from_static(b"not an image"), "image/jpeg")
            .await
            .unwrap_err();
        assert!(matches!(err, PortError::InvalidInput(_)));
    }
}
