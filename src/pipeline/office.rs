//! Office documents: direct text extraction from OOXML and LibreOffice
//! conversion for everything else.
//!
//! DOCX and PPTX are ZIP archives of XML parts. When they carry real text we
//! read it directly and skip the model altogether; the registry falls back
//! to [`convert_to_pdf`] (then rasterisation) when they do not, and always
//! for legacy binary `.doc`.

use crate::config::OutputFormat;
use crate::error::OcrError;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use std::io::{Cursor, Read, Seek};
use std::time::Duration;
use tracing::{debug, info, warn};
use zip::ZipArchive;

fn conversion_failed(file: &str, detail: impl Into<String>) -> OcrError {
    OcrError::ConversionFailed {
        file: file.to_string(),
        detail: detail.into(),
    }
}

fn open_archive<'a>(data: &'a [u8], file: &str) -> Result<ZipArchive<Cursor<&'a [u8]>>, OcrError> {
    ZipArchive::new(Cursor::new(data))
        .map_err(|e| conversion_failed(file, format!("not a valid OOXML archive: {e}")))
}

fn read_part<R: Read + Seek>(
    archive: &mut ZipArchive<R>,
    name: &str,
    file: &str,
) -> Result<String, OcrError> {
    let mut part = archive
        .by_name(name)
        .map_err(|e| conversion_failed(file, format!("missing {name}: {e}")))?;
    let mut xml = String::new();
    part.read_to_string(&mut xml)
        .map_err(|e| conversion_failed(file, format!("cannot read {name}: {e}")))?;
    Ok(xml)
}

fn get_attribute(e: &BytesStart, name: &str) -> Option<String> {
    e.attributes()
        .flatten()
        .find(|attr| attr.key.local_name().as_ref() == name.as_bytes())
        .map(|attr| String::from_utf8_lossy(&attr.value).to_string())
}

// ── DOCX ─────────────────────────────────────────────────────────────────

/// One paragraph of `word/document.xml`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DocxParagraph {
    pub text: String,
    /// From `Heading1`..`Heading9` / `Title` paragraph styles.
    pub heading_level: Option<u8>,
    pub is_list_item: bool,
}

/// Paragraphs of a DOCX body in document order. Empty paragraphs are dropped.
pub fn docx_paragraphs(data: &[u8], file: &str) -> Result<Vec<DocxParagraph>, OcrError> {
    let mut archive = open_archive(data, file)?;
    let xml = read_part(&mut archive, "word/document.xml", file)?;

    let mut reader = Reader::from_str(&xml);
    let mut buf = Vec::new();
    let mut paragraphs = Vec::new();
    let mut current = DocxParagraph::default();
    let mut in_paragraph = false;
    let mut in_text = false;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) => match e.local_name().as_ref() {
                b"p" => {
                    in_paragraph = true;
                    current = DocxParagraph::default();
                }
                b"t" => in_text = true,
                b"numPr" if in_paragraph => current.is_list_item = true,
                _ => {}
            },
            Ok(Event::Empty(ref e)) => match e.local_name().as_ref() {
                b"pStyle" if in_paragraph => {
                    if let Some(style) = get_attribute(e, "val") {
                        current.heading_level = heading_level(&style);
                    }
                }
                b"tab" if in_paragraph => current.text.push('\t'),
                b"br" | b"cr" if in_paragraph => current.text.push('\n'),
                _ => {}
            },
            Ok(Event::End(ref e)) => match e.local_name().as_ref() {
                b"p" => {
                    in_paragraph = false;
                    let text = current.text.trim();
                    if !text.is_empty() {
                        current.text = text.to_string();
                        paragraphs.push(std::mem::take(&mut current));
                    }
                }
                b"t" => in_text = false,
                _ => {}
            },
            Ok(Event::Text(e)) if in_text && in_paragraph => {
                current.text.push_str(&e.unescape().unwrap_or_default());
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(conversion_failed(file, format!("XML parse error: {e}"))),
            _ => {}
        }
        buf.clear();
    }

    debug!("DOCX '{}': {} paragraphs", file, paragraphs.len());
    Ok(paragraphs)
}

fn heading_level(style: &str) -> Option<u8> {
    let lower = style.to_ascii_lowercase();
    if lower == "title" {
        return Some(1);
    }
    let rest = lower.strip_prefix("heading")?;
    let level = rest.trim().parse::<u8>().unwrap_or(1);
    Some(level.clamp(1, 6))
}

/// Render DOCX paragraphs as one text block.
pub fn docx_text(paragraphs: &[DocxParagraph], format: OutputFormat) -> String {
    paragraphs
        .iter()
        .map(|p| match (format, p.heading_level, p.is_list_item) {
            (OutputFormat::Markdown, Some(level), _) => {
                format!("{} {}", "#".repeat(level as usize), p.text)
            }
            (OutputFormat::Markdown, None, true) => format!("- {}", p.text),
            _ => p.text.clone(),
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

// ── PPTX ─────────────────────────────────────────────────────────────────

/// Text of one slide: the title placeholder plus every other text box.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SlideText {
    /// 1-based slide number from the part name.
    pub number: usize,
    pub title: Option<String>,
    pub body: Vec<String>,
}

impl SlideText {
    pub fn is_empty(&self) -> bool {
        self.title.is_none() && self.body.is_empty()
    }

    pub fn render(&self, format: OutputFormat) -> String {
        let mut blocks = Vec::with_capacity(self.body.len() + 1);
        if let Some(ref title) = self.title {
            blocks.push(match format {
                OutputFormat::Markdown => format!("# {}", title),
                OutputFormat::PlainText => title.clone(),
            });
        }
        blocks.extend(self.body.iter().cloned());
        blocks.join("\n\n")
    }
}

/// Slides of a PPTX in slide-number order.
pub fn pptx_slides(data: &[u8], file: &str) -> Result<Vec<SlideText>, OcrError> {
    let mut archive = open_archive(data, file)?;

    let mut numbers: Vec<usize> = archive
        .file_names()
        .filter_map(|name| {
            name.strip_prefix("ppt/slides/slide")?
                .strip_suffix(".xml")?
                .parse::<usize>()
                .ok()
        })
        .collect();
    numbers.sort_unstable();

    let mut slides = Vec::with_capacity(numbers.len());
    for number in numbers {
        let xml = read_part(&mut archive, &format!("ppt/slides/slide{}.xml", number), file)?;
        slides.push(parse_slide(&xml, number, file)?);
    }
    debug!("PPTX '{}': {} slides", file, slides.len());
    Ok(slides)
}

fn parse_slide(xml: &str, number: usize, file: &str) -> Result<SlideText, OcrError> {
    let mut reader = Reader::from_str(xml);
    let mut buf = Vec::new();
    let mut slide = SlideText {
        number,
        ..SlideText::default()
    };

    let mut in_shape = false;
    let mut in_text = false;
    let mut is_title = false;
    let mut paragraph = String::new();
    let mut text_box: Vec<String> = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) => match e.local_name().as_ref() {
                b"sp" => {
                    in_shape = true;
                    is_title = false;
                }
                b"p" if in_shape => paragraph.clear(),
                b"t" => in_text = true,
                b"ph" => is_title |= is_title_placeholder(e),
                _ => {}
            },
            Ok(Event::Empty(ref e)) => match e.local_name().as_ref() {
                b"ph" => is_title |= is_title_placeholder(e),
                b"br" if in_shape => paragraph.push('\n'),
                _ => {}
            },
            Ok(Event::End(ref e)) => match e.local_name().as_ref() {
                b"p" if in_shape => {
                    let line = paragraph.trim();
                    if !line.is_empty() {
                        text_box.push(line.to_string());
                    }
                    paragraph.clear();
                }
                b"t" => in_text = false,
                b"sp" => {
                    if !text_box.is_empty() {
                        let text = text_box.join("\n");
                        if is_title && slide.title.is_none() {
                            slide.title = Some(text);
                        } else {
                            slide.body.push(text);
                        }
                        text_box.clear();
                    }
                    in_shape = false;
                    is_title = false;
                }
                _ => {}
            },
            Ok(Event::Text(e)) if in_text && in_shape => {
                paragraph.push_str(&e.unescape().unwrap_or_default());
            }
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(conversion_failed(
                    file,
                    format!("slide {number}: XML parse error: {e}"),
                ))
            }
            _ => {}
        }
        buf.clear();
    }

    Ok(slide)
}

fn is_title_placeholder(e: &BytesStart) -> bool {
    matches!(
        get_attribute(e, "type").as_deref(),
        Some("title") | Some("ctrTitle")
    )
}

// ── LibreOffice ──────────────────────────────────────────────────────────

/// Convert an office document to PDF with `soffice --headless`.
///
/// Each call gets its own temporary profile directory so concurrent
/// conversions do not fight over the LibreOffice user lock.
pub async fn convert_to_pdf(
    data: &[u8],
    file: &str,
    suffix: &str,
    soffice: &str,
    timeout_secs: u64,
) -> Result<Vec<u8>, OcrError> {
    let workdir = tempfile::tempdir()
        .map_err(|e| conversion_failed(file, format!("cannot create temp dir: {e}")))?;
    let ext = if suffix.is_empty() { "bin" } else { suffix };
    let input = workdir.path().join(format!("input.{ext}"));
    let outdir = workdir.path().join("out");
    let profile = workdir.path().join("profile");

    tokio::fs::write(&input, data)
        .await
        .map_err(|e| conversion_failed(file, format!("cannot stage input: {e}")))?;

    info!("Converting '{}' to PDF with {}", file, soffice);
    let mut cmd = tokio::process::Command::new(soffice);
    cmd.arg(format!("-env:UserInstallation=file://{}", profile.display()))
        .args(["--headless", "--nologo", "--nofirststartwizard", "--convert-to", "pdf", "--outdir"])
        .arg(&outdir)
        .arg(&input)
        .kill_on_drop(true);

    let output = tokio::time::timeout(Duration::from_secs(timeout_secs), cmd.output())
        .await
        .map_err(|_| conversion_failed(file, format!("conversion timed out after {timeout_secs}s")))?
        .map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                conversion_failed(file, format!("'{soffice}' not found; install LibreOffice"))
            } else {
                conversion_failed(file, format!("cannot run '{soffice}': {e}"))
            }
        })?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        warn!("soffice exited with {}: {}", output.status, stderr.trim());
        return Err(conversion_failed(
            file,
            format!("LibreOffice conversion failed: {}", stderr.trim()),
        ));
    }

    let pdf_path = outdir.join("input.pdf");
    tokio::fs::read(&pdf_path)
        .await
        .map_err(|_| conversion_failed(file, "LibreOffice produced no PDF"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use zip::write::SimpleFileOptions;

    fn zip_with(parts: &[(&str, &str)]) -> Vec<u8> {
        let mut buf = Cursor::new(Vec::new());
        {
            let mut zip = zip::ZipWriter::new(&mut buf);
            for (name, body) in parts {
                zip.start_file(*name, SimpleFileOptions::default()).unwrap();
                zip.write_all(body.as_bytes()).unwrap();
            }
            zip.finish().unwrap();
        }
        buf.into_inner()
    }

    const DOCX_BODY: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<w:document xmlns:w="http://schemas.openxmlformats.org/wordprocessingml/2006/main"><w:body>
<w:p><w:pPr><w:pStyle w:val="Heading2"/></w:pPr><w:r><w:t>Results</w:t></w:r></w:p>
<w:p><w:r><w:t xml:space="preserve">Revenue </w:t></w:r><w:r><w:t>grew &amp; costs fell.</w:t></w:r></w:p>
<w:p></w:p>
<w:p><w:pPr><w:numPr><w:ilvl w:val="0"/></w:numPr></w:pPr><w:r><w:t>First point</w:t></w:r></w:p>
</w:body></w:document>"#;

    #[test]
    fn docx_paragraphs_and_headings() {
        let data = zip_with(&[("word/document.xml", DOCX_BODY)]);
        let paras = docx_paragraphs(&data, "r.docx").unwrap();
        assert_eq!(paras.len(), 3);
        assert_eq!(paras[0].heading_level, Some(2));
        assert_eq!(paras[1].text, "Revenue grew & costs fell.");
        assert!(paras[2].is_list_item);

        let md = docx_text(&paras, OutputFormat::Markdown);
        assert_eq!(md, "## Results\n\nRevenue grew & costs fell.\n\n- First point");
        let plain = docx_text(&paras, OutputFormat::PlainText);
        assert!(plain.starts_with("Results\n\n"));
    }

    #[test]
    fn docx_without_body_part_fails() {
        let data = zip_with(&[("word/styles.xml", "<x/>")]);
        assert!(matches!(
            docx_paragraphs(&data, "r.docx"),
            Err(OcrError::ConversionFailed { .. })
        ));
        assert!(docx_paragraphs(b"not a zip", "r.docx").is_err());
    }

    fn slide_xml(title: &str, body: &str) -> String {
        format!(
            r#"<p:sld xmlns:p="p" xmlns:a="a"><p:cSld><p:spTree>
<p:sp><p:nvSpPr><p:nvPr><p:ph type="title"/></p:nvPr></p:nvSpPr><p:txBody><a:p><a:r><a:t>{title}</a:t></a:r></a:p></p:txBody></p:sp>
<p:sp><p:txBody><a:p><a:r><a:t>{body}</a:t></a:r></a:p></p:txBody></p:sp>
</p:spTree></p:cSld></p:sld>"#
        )
    }

    #[test]
    fn pptx_slides_in_numeric_order() {
        let s1 = slide_xml("Intro", "Welcome");
        let s2 = slide_xml("Plan", "Steps");
        let s10 = slide_xml("End", "Thanks");
        let data = zip_with(&[
            ("ppt/slides/slide10.xml", &s10),
            ("ppt/slides/slide2.xml", &s2),
            ("ppt/slides/slide1.xml", &s1),
            ("ppt/slides/_rels/slide1.xml.rels", "<r/>"),
        ]);
        let slides = pptx_slides(&data, "deck.pptx").unwrap();
        let numbers: Vec<usize> = slides.iter().map(|s| s.number).collect();
        assert_eq!(numbers, vec![1, 2, 10]);
        assert_eq!(slides[0].title.as_deref(), Some("Intro"));
        assert_eq!(slides[0].body, vec!["Welcome".to_string()]);
        assert_eq!(slides[2].render(OutputFormat::Markdown), "# End\n\nThanks");
        assert_eq!(slides[1].render(OutputFormat::PlainText), "Plan\n\nSteps");
    }

    #[test]
    fn heading_styles() {
        assert_eq!(heading_level("Heading1"), Some(1));
        assert_eq!(heading_level("heading 3"), Some(3));
        assert_eq!(heading_level("Title"), Some(1));
        assert_eq!(heading_level("Normal"), None);
    }

    #[tokio::test]
    async fn missing_soffice_is_conversion_failure() {
        let err = convert_to_pdf(b"data", "old.doc", "doc", "/nonexistent/soffice-binary", 5)
            .await
            .unwrap_err();
        match err {
            OcrError::ConversionFailed { file, detail } => {
                assert_eq!(file, "old.doc");
                assert!(detail.contains("not found"), "{detail}");
            }
            other => panic!("unexpected: {other:?}"),
        }
    }
}
