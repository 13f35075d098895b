//! Processor registry: pick the adapter for a file and turn the file into
//! ordered page units.
//!
//! Adapters are a closed set of variants, each described by a static
//! [`ProcessorDescriptor`]. Selection walks the descriptor table in a fixed
//! priority order, one signal at a time:
//!
//! 1. file extension
//! 2. declared content type
//! 3. magic bytes
//!
//! so the result never depends on configuration order. Office formats with
//! direct text extraction fall back to LibreOffice conversion and
//! rasterisation when the direct path yields nothing.

use crate::config::{OcrConfig, OutputFormat};
use crate::error::OcrError;
use crate::job::PageUnit;
use crate::pipeline::encode;
use crate::pipeline::input::FilePayload;
use crate::pipeline::office;
use crate::pipeline::render::{self, RenderOptions};
use image::DynamicImage;
use std::fmt;
use std::io::Cursor;
use tracing::{debug, info, warn};

/// One adapter per format family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Adapter {
    Pdf,
    Image,
    Docx,
    Pptx,
    /// Legacy binary Word, converted through LibreOffice.
    Doc,
}

/// What an adapter can do with its input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    pub extracts_text_directly: bool,
    pub requires_rasterization: bool,
    pub requires_external_conversion: bool,
}

/// Static description of an adapter.
#[derive(Debug)]
pub struct ProcessorDescriptor {
    pub adapter: Adapter,
    pub extensions: &'static [&'static str],
    pub mime_types: &'static [&'static str],
    pub capabilities: Capabilities,
}

/// Descriptor table in selection priority order.
pub static PROCESSORS: [ProcessorDescriptor; 5] = [
    ProcessorDescriptor {
        adapter: Adapter::Pdf,
        extensions: &["pdf"],
        mime_types: &["application/pdf"],
        capabilities: Capabilities {
            extracts_text_directly: false,
            requires_rasterization: true,
            requires_external_conversion: false,
        },
    },
    ProcessorDescriptor {
        adapter: Adapter::Image,
        extensions: &["png", "jpg", "jpeg", "webp", "bmp"],
        mime_types: &["image/png", "image/jpeg", "image/webp", "image/bmp"],
        capabilities: Capabilities {
            extracts_text_directly: false,
            requires_rasterization: false,
            requires_external_conversion: false,
        },
    },
    ProcessorDescriptor {
        adapter: Adapter::Docx,
        extensions: &["docx"],
        mime_types: &["application/vnd.openxmlformats-officedocument.wordprocessingml.document"],
        capabilities: Capabilities {
            extracts_text_directly: true,
            requires_rasterization: false,
            requires_external_conversion: false,
        },
    },
    ProcessorDescriptor {
        adapter: Adapter::Pptx,
        extensions: &["pptx"],
        mime_types: &["application/vnd.openxmlformats-officedocument.presentationml.presentation"],
        capabilities: Capabilities {
            extracts_text_directly: true,
            requires_rasterization: false,
            requires_external_conversion: false,
        },
    },
    ProcessorDescriptor {
        adapter: Adapter::Doc,
        extensions: &["doc"],
        mime_types: &["application/msword"],
        capabilities: Capabilities {
            extracts_text_directly: false,
            requires_rasterization: true,
            requires_external_conversion: true,
        },
    },
];

impl Adapter {
    pub fn descriptor(self) -> &'static ProcessorDescriptor {
        PROCESSORS
            .iter()
            .find(|d| d.adapter == self)
            .unwrap_or(&PROCESSORS[0])
    }

    pub fn capabilities(self) -> Capabilities {
        self.descriptor().capabilities
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Adapter::Pdf => "pdf",
            Adapter::Image => "image",
            Adapter::Docx => "docx",
            Adapter::Pptx => "pptx",
            Adapter::Doc => "doc",
        }
    }
}

impl fmt::Display for Adapter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Selection ────────────────────────────────────────────────────────────

/// Pick the adapter for `payload`, or fail with `UnsupportedFileType`.
pub fn select(payload: &FilePayload) -> Result<Adapter, OcrError> {
    let suffix = payload.suffix();
    if !suffix.is_empty() {
        if let Some(d) = PROCESSORS.iter().find(|d| d.extensions.contains(&suffix.as_str())) {
            debug!("'{}' → {} (extension)", payload.filename, d.adapter);
            return Ok(d.adapter);
        }
    }

    if let Some(mime) = payload.mime() {
        if let Some(d) = PROCESSORS.iter().find(|d| d.mime_types.contains(&mime.as_str())) {
            debug!("'{}' → {} (content type)", payload.filename, d.adapter);
            return Ok(d.adapter);
        }
        if mime.starts_with("image/") {
            debug!("'{}' → image (content type {})", payload.filename, mime);
            return Ok(Adapter::Image);
        }
    }

    if let Some(adapter) = sniff(&payload.data) {
        debug!("'{}' → {} (magic bytes)", payload.filename, adapter);
        return Ok(adapter);
    }

    let detail = match (suffix.is_empty(), payload.mime()) {
        (false, _) => format!("'.{}' ({})", suffix, payload.filename),
        (true, Some(mime)) => format!("content type '{}' ({})", mime, payload.filename),
        (true, None) => format!("unrecognised content ({})", payload.filename),
    };
    Err(OcrError::UnsupportedFileType { detail })
}

/// Identify a format from its leading bytes.
fn sniff(data: &[u8]) -> Option<Adapter> {
    const OLE: &[u8] = &[0xD0, 0xCF, 0x11, 0xE0, 0xA1, 0xB1, 0x1A, 0xE1];

    if data.starts_with(b"%PDF") {
        return Some(Adapter::Pdf);
    }
    if data.starts_with(b"\x89PNG\r\n\x1a\n")
        || data.starts_with(&[0xFF, 0xD8, 0xFF])
        || is_bmp(data)
        || (data.len() >= 12 && &data[..4] == b"RIFF" && &data[8..12] == b"WEBP")
    {
        return Some(Adapter::Image);
    }
    if data.starts_with(OLE) {
        return Some(Adapter::Doc);
    }
    if data.starts_with(b"PK\x03\x04") {
        let archive = zip::ZipArchive::new(Cursor::new(data)).ok()?;
        let names: Vec<&str> = archive.file_names().collect();
        if names.contains(&"word/document.xml") {
            return Some(Adapter::Docx);
        }
        if names.contains(&"ppt/presentation.xml")
            || names.iter().any(|n| n.starts_with("ppt/slides/"))
        {
            return Some(Adapter::Pptx);
        }
    }
    None
}

/// `BM` alone is too weak a signal; the file header must also be sane.
fn is_bmp(data: &[u8]) -> bool {
    const DIB_HEADER_SIZES: [u32; 7] = [12, 40, 52, 56, 64, 108, 124];

    if data.len() < 26 || !data.starts_with(b"BM") {
        return false;
    }
    let le_u32 = |at: usize| u32::from_le_bytes([data[at], data[at + 1], data[at + 2], data[at + 3]]);
    let declared_size = le_u32(2) as usize;
    let pixel_offset = le_u32(10) as usize;
    let dib_size = le_u32(14);

    data[6..10] == [0, 0, 0, 0]
        && DIB_HEADER_SIZES.contains(&dib_size)
        && (declared_size == 0 || declared_size <= data.len())
        && pixel_offset >= 14 + dib_size as usize
        && pixel_offset <= data.len()
}

// ── Page units ───────────────────────────────────────────────────────────

/// Turn `payload` into ordered page units using `adapter`.
///
/// Errors here are local to the job and never retried.
pub async fn to_page_units(
    adapter: Adapter,
    payload: &FilePayload,
    config: &OcrConfig,
    format: OutputFormat,
) -> Result<Vec<PageUnit>, OcrError> {
    let units = match adapter {
        Adapter::Pdf => rasterize_pdf(payload.data.clone(), &payload.filename, config).await?,
        Adapter::Image => image_unit(payload).await?,
        Adapter::Docx => match parse_office(payload, move |data, file| docx_units(data, file, format)).await {
            Ok(units) if !units.is_empty() => units,
            Ok(_) => {
                info!("'{}' has no text; converting to PDF", payload.filename);
                convert_and_rasterize(payload, config).await?
            }
            Err(e) => {
                warn!("Direct DOCX extraction failed ({}); converting to PDF", e);
                convert_and_rasterize(payload, config).await?
            }
        },
        Adapter::Pptx => {
            let max_pages = config.max_pages;
            let direct =
                parse_office(payload, move |data, file| pptx_units(data, file, format, max_pages)).await;
            match direct {
                Ok(units) if !units.is_empty() => units,
                Ok(_) => {
                    info!("'{}' has no slide text; converting to PDF", payload.filename);
                    convert_and_rasterize(payload, config).await?
                }
                Err(e @ OcrError::TooManyPages { .. }) => return Err(e),
                Err(e) => {
                    warn!("Direct PPTX extraction failed ({}); converting to PDF", e);
                    convert_and_rasterize(payload, config).await?
                }
            }
        }
        Adapter::Doc => convert_and_rasterize(payload, config).await?,
    };

    if units.is_empty() {
        return Err(OcrError::EmptyDocument {
            file: payload.filename.clone(),
        });
    }
    debug!("'{}' → {} page units via {}", payload.filename, units.len(), adapter);
    Ok(units)
}

/// Unzip and parse on the blocking pool.
async fn parse_office<F>(payload: &FilePayload, parse: F) -> Result<Vec<PageUnit>, OcrError>
where
    F: FnOnce(&[u8], &str) -> Result<Vec<PageUnit>, OcrError> + Send + 'static,
{
    let data = payload.data.clone();
    let file = payload.filename.clone();
    tokio::task::spawn_blocking(move || parse(&data, &file))
        .await
        .map_err(|e| OcrError::Internal(format!("Office parse task panicked: {}", e)))?
}

fn docx_units(data: &[u8], file: &str, format: OutputFormat) -> Result<Vec<PageUnit>, OcrError> {
    let paragraphs = office::docx_paragraphs(data, file)?;
    if paragraphs.is_empty() {
        return Ok(Vec::new());
    }
    Ok(vec![PageUnit::text(0, office::docx_text(&paragraphs, format))])
}

/// One unit per slide, empty slides included so indices match slide order.
fn pptx_units(
    data: &[u8],
    file: &str,
    format: OutputFormat,
    max_pages: usize,
) -> Result<Vec<PageUnit>, OcrError> {
    let slides = office::pptx_slides(data, file)?;
    if slides.iter().all(|s| s.is_empty()) {
        return Ok(Vec::new());
    }
    if slides.len() > max_pages {
        return Err(OcrError::TooManyPages {
            pages: slides.len(),
            max: max_pages,
        });
    }
    Ok(slides
        .iter()
        .enumerate()
        .map(|(i, slide)| PageUnit::text(i, slide.render(format)))
        .collect())
}

async fn image_unit(payload: &FilePayload) -> Result<Vec<PageUnit>, OcrError> {
    let data = payload.data.clone();
    let file = payload.filename.clone();
    tokio::task::spawn_blocking(move || {
        let img = encode::decode_image(&data).map_err(|e| OcrError::ConversionFailed {
            file: file.clone(),
            detail: format!("cannot decode image: {e}"),
        })?;
        encode_units(vec![img], &file)
    })
    .await
    .map_err(|e| OcrError::Internal(format!("Image task panicked: {}", e)))?
}

async fn rasterize_pdf(
    data: Vec<u8>,
    file: &str,
    config: &OcrConfig,
) -> Result<Vec<PageUnit>, OcrError> {
    let options = RenderOptions {
        dpi: config.dpi,
        max_rendered_pixels: config.max_rendered_pixels,
        max_pages: config.max_pages,
    };
    let images = render::render_pdf(data, file.to_string(), options).await?;
    let file = file.to_string();
    tokio::task::spawn_blocking(move || {
        let images = images.into_iter().map(encode::to_rgb).collect();
        encode_units(images, &file)
    })
    .await
    .map_err(|e| OcrError::Internal(format!("Encode task panicked: {}", e)))?
}

async fn convert_and_rasterize(
    payload: &FilePayload,
    config: &OcrConfig,
) -> Result<Vec<PageUnit>, OcrError> {
    let pdf = office::convert_to_pdf(
        &payload.data,
        &payload.filename,
        &payload.suffix(),
        &config.soffice_binary,
        config.conversion_timeout_secs,
    )
    .await?;
    rasterize_pdf(pdf, &payload.filename, config).await
}

fn encode_units(images: Vec<DynamicImage>, file: &str) -> Result<Vec<PageUnit>, OcrError> {
    images
        .iter()
        .enumerate()
        .map(|(i, img)| {
            encode::encode_png_base64(img)
                .map(|b64| PageUnit::image(i, b64))
                .map_err(|e| OcrError::ConversionFailed {
                    file: file.to_string(),
                    detail: format!("page {}: image encoding failed: {e}", i + 1),
                })
        })
        .collect()
}
