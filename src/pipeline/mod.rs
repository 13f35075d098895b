//! Stages that turn an input file into page units and model output into
//! final text.
//!
//! ## Data Flow
//!
//! ```text
//! input ──▶ registry ──▶ render / office / encode ──▶ (dispatch) ──▶ postprocess
//! (path/URL)  (select)    (page units)                                (cleanup, join)
//! ```
//!
//! 1. [`input`]    resolve a path or URL to bytes plus filename and content type
//! 2. [`registry`] choose the adapter and produce ordered page units
//! 3. [`render`]   rasterise PDF pages via pdfium in `spawn_blocking`
//! 4. [`office`]   DOCX/PPTX text extraction and LibreOffice conversion
//! 5. [`encode`]   normalise images to RGB and base64-wrap them as PNG
//! 6. [`postprocess`] strip model markup, tidy whitespace, join pages

pub mod encode;
pub mod input;
pub mod office;
pub mod postprocess;
pub mod registry;
pub mod render;
