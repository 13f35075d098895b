//! Image encoding: decode uploaded images, normalise to RGB, and wrap as
//! base64 PNG for the request body.
//!
//! PNG keeps glyph edges intact; JPEG artefacts around rendered text
//! measurably hurt OCR accuracy. Alpha is dropped because some servers
//! reject RGBA input and transparent regions otherwise render black.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use image::DynamicImage;
use std::io::Cursor;
use tracing::debug;

/// Decode image bytes (PNG, JPEG, WEBP, BMP) and normalise to RGB.
pub fn decode_image(data: &[u8]) -> Result<DynamicImage, image::ImageError> {
    let img = image::load_from_memory(data)?;
    Ok(to_rgb(img))
}

/// Drop alpha and widen grey/palette images to 8-bit RGB.
pub fn to_rgb(img: DynamicImage) -> DynamicImage {
    match img {
        DynamicImage::ImageRgb8(_) => img,
        other => DynamicImage::ImageRgb8(other.to_rgb8()),
    }
}

/// Encode a page image as base64 PNG.
pub fn encode_png_base64(img: &DynamicImage) -> Result<String, image::ImageError> {
    let mut buf = Vec::new();
    img.write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)?;

    let b64 = STANDARD.encode(&buf);
    debug!(
        "Encoded {}x{} image → {} bytes base64",
        img.width(),
        img.height(),
        b64.len()
    );
    Ok(b64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgba, RgbaImage};

    fn png_bytes(img: &DynamicImage) -> Vec<u8> {
        let mut buf = Vec::new();
        img.write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)
            .unwrap();
        buf
    }

    #[test]
    fn rgba_becomes_rgb() {
        let rgba = DynamicImage::ImageRgba8(RgbaImage::from_pixel(4, 3, Rgba([10, 20, 30, 0])));
        let decoded = decode_image(&png_bytes(&rgba)).unwrap();
        assert!(matches!(decoded, DynamicImage::ImageRgb8(_)));
        assert_eq!((decoded.width(), decoded.height()), (4, 3));
    }

    #[test]
    fn encodes_valid_png() {
        let img = to_rgb(DynamicImage::ImageRgba8(RgbaImage::from_pixel(
            10,
            10,
            Rgba([255, 0, 0, 255]),
        )));
        let b64 = encode_png_base64(&img).unwrap();
        let raw = STANDARD.decode(&b64).expect("valid base64");
        assert_eq!(&raw[..8], b"\x89PNG\r\n\x1a\n");
    }

    #[test]
    fn garbage_is_rejected() {
        assert!(decode_image(b"definitely not an image").is_err());
    }
}
