//! PDF rasterisation via pdfium.
//!
//! pdfium is not async-safe, so all work runs in `spawn_blocking`. Pages
//! are scaled by `dpi / 72` and then capped so the longest edge never
//! exceeds `max_rendered_pixels`; an A0 poster at 144 DPI would otherwise
//! produce a 6,700 px image.
//!
//! The library is located through `PDFIUM_LIB_PATH` (a directory), then the
//! working directory, then the system search path.

use crate::error::OcrError;
use image::DynamicImage;
use pdfium_render::prelude::*;
use tracing::{debug, info};

/// Render settings for one document.
#[derive(Debug, Clone, Copy)]
pub struct RenderOptions {
    pub dpi: u32,
    pub max_rendered_pixels: u32,
    pub max_pages: usize,
}

/// Rasterise every page of an in-memory PDF, in page order.
///
/// Fails with [`OcrError::TooManyPages`] before rendering anything when the
/// document is longer than `max_pages`.
pub async fn render_pdf(
    data: Vec<u8>,
    filename: String,
    options: RenderOptions,
) -> Result<Vec<DynamicImage>, OcrError> {
    tokio::task::spawn_blocking(move || render_blocking(&data, &filename, options))
        .await
        .map_err(|e| OcrError::Internal(format!("Render task panicked: {}", e)))?
}

fn bind_pdfium() -> Result<Pdfium, PdfiumError> {
    let dir = std::env::var("PDFIUM_LIB_PATH").unwrap_or_else(|_| "./".to_string());
    let bindings = Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path(&dir))
        .or_else(|_| Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path("./")))
        .or_else(|_| Pdfium::bind_to_system_library())?;
    Ok(Pdfium::new(bindings))
}

fn render_blocking(
    data: &[u8],
    filename: &str,
    options: RenderOptions,
) -> Result<Vec<DynamicImage>, OcrError> {
    let conversion_failed = |detail: String| OcrError::ConversionFailed {
        file: filename.to_string(),
        detail,
    };

    let pdfium = bind_pdfium()
        .map_err(|e| conversion_failed(format!("pdfium library unavailable: {:?}", e)))?;

    let document = pdfium
        .load_pdf_from_byte_slice(data, None)
        .map_err(|e| conversion_failed(format!("cannot open PDF: {:?}", e)))?;

    let pages = document.pages();
    let total = pages.len() as usize;
    info!("PDF '{}' loaded: {} pages", filename, total);

    if total > options.max_pages {
        return Err(OcrError::TooManyPages {
            pages: total,
            max: options.max_pages,
        });
    }

    let max_px = options.max_rendered_pixels as i32;
    let render_config = PdfRenderConfig::new()
        .scale_page_by_factor(options.dpi as f32 / 72.0)
        .set_maximum_width(max_px)
        .set_maximum_height(max_px);

    let mut images = Vec::with_capacity(total);
    for (idx, page) in pages.iter().enumerate() {
        let bitmap = page
            .render_with_config(&render_config)
            .map_err(|e| conversion_failed(format!("page {}: {:?}", idx + 1, e)))?;
        let image = bitmap.as_image();
        debug!(
            "Rendered page {} → {}x{} px",
            idx + 1,
            image.width(),
            image.height()
        );
        images.push(image);
    }

    Ok(images)
}
