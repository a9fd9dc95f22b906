//! In-process page generation: plain text, images and the placeholder.
//!
//! These are the strategies that need no external engine. Each returns a
//! complete PDF built with [`crate::pdf::writer`] and honours the request's
//! page size, orientation and margin.
//!
//! ## Why spawn_blocking?
//!
//! Image decoding and stream compression are CPU-bound; a large photo takes
//! long enough to stall a Tokio worker. The async wrappers in
//! [`crate::pipeline`] move the calls below onto the blocking pool.

use crate::config::PageLayout;
use crate::pdf::writer::{Font, Page, PdfDocument};
use crate::pipeline::encode;
use crate::pipeline::text::{normalize_winansi, wrap_lines};
use thiserror::Error;

const BODY_SIZE: f32 = 10.0;
const BODY_LEADING: f32 = 12.0;
const HEADING_SIZE: f32 = 12.0;
const TITLE_SIZE: f32 = 18.0;
const DETAIL_SIZE: f32 = 11.0;
const DETAIL_LEADING: f32 = 16.0;

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("image could not be decoded: {0}")]
    Image(#[from] image::ImageError),

    #[error("PDF could not be written: {0}")]
    Pdf(#[from] lopdf::Error),
}

/// Printable area of a page in points.
struct Frame {
    width: f32,
    height: f32,
    left: f32,
    top: f32,
    bottom: f32,
}

impl Frame {
    fn of(layout: &PageLayout) -> Self {
        let (width, height) = layout.paper_points();
        // A margin that eats the page leaves at least an inch to print on.
        let margin = layout.margin_points().min((width.min(height) - 72.0).max(0.0) / 2.0);
        Self {
            width,
            height,
            left: margin,
            top: height - margin,
            bottom: margin,
        }
    }

    fn printable_width(&self) -> f32 {
        self.width - 2.0 * self.left
    }

    fn columns(&self, font: Font, size: f32) -> usize {
        ((self.printable_width() / (font.char_width() * size)).floor() as usize).max(1)
    }
}

/// Render `content` as monospace text with `name` as a heading on page 1.
///
/// Content is read as UTF-8 when valid and as Latin-1 otherwise.
pub fn text_document(name: &str, content: &[u8], layout: &PageLayout) -> Result<Vec<u8>, RenderError> {
    let frame = Frame::of(layout);
    let text = decode_text(content);
    let lines = wrap_lines(&normalize_winansi(&text), frame.columns(Font::Courier, BODY_SIZE));

    let mut doc = PdfDocument::new(frame.width, frame.height);
    let mut page = Page::new();
    let mut y = frame.top - HEADING_SIZE;

    let heading = truncate(
        &normalize_winansi(name),
        frame.columns(Font::HelveticaBold, HEADING_SIZE),
    );
    page.text(Font::HelveticaBold, HEADING_SIZE, frame.left, y, &heading);
    y -= 6.0;
    page.rule(frame.left, frame.width - frame.left, y);
    y -= BODY_LEADING + 4.0;

    for line in lines {
        if y < frame.bottom {
            doc.add_page(std::mem::take(&mut page));
            y = frame.top - BODY_SIZE;
        }
        if !line.is_empty() {
            page.text(Font::Courier, BODY_SIZE, frame.left, y, &line);
        }
        y -= BODY_LEADING;
    }
    doc.add_page(page);
    Ok(doc.to_bytes()?)
}

/// Embed the image in `content` on a single page, scaled to fit the
/// printable area with its aspect ratio preserved. Never upscaled beyond
/// 1 px = 1 pt.
pub fn image_document(content: &[u8], layout: &PageLayout) -> Result<Vec<u8>, RenderError> {
    let frame = Frame::of(layout);
    let rgb = encode::decode_image(content)?;

    let max_w = frame.printable_width();
    let max_h = frame.top - frame.bottom;
    let (img_w, img_h) = (rgb.width as f32, rgb.height as f32);
    let scale = (max_w / img_w).min(max_h / img_h).min(1.0);
    let (w, h) = (img_w * scale, img_h * scale);

    let mut doc = PdfDocument::new(frame.width, frame.height);
    let id = doc.add_image(rgb);
    let mut page = Page::new();
    page.image(id, frame.left + (max_w - w) / 2.0, frame.top - h, w, h);
    doc.add_page(page);
    Ok(doc.to_bytes()?)
}

/// A one-page stub stating that the attachment could not be converted.
pub fn placeholder_document(
    name: &str,
    content_type: &str,
    size: usize,
    reason: &str,
    layout: &PageLayout,
) -> Result<Vec<u8>, RenderError> {
    let frame = Frame::of(layout);
    let cols = frame.columns(Font::Helvetica, DETAIL_SIZE);

    let mut page = Page::new();
    let mut y = frame.top - TITLE_SIZE;
    page.text(
        Font::HelveticaBold,
        TITLE_SIZE,
        frame.left,
        y,
        "Attachment could not be converted",
    );
    y -= 10.0;
    page.rule(frame.left, frame.width - frame.left, y);
    y -= DETAIL_LEADING + 6.0;

    let content_type = if content_type.trim().is_empty() {
        "unknown"
    } else {
        content_type
    };
    let details = [
        format!("File: {}", name),
        format!("Type: {}", content_type),
        format!("Size: {}", human_size(size)),
        format!("Reason: {}", reason),
        String::new(),
        "The original file is not included in this PDF.".to_string(),
    ];
    for detail in details {
        for line in wrap_lines(&normalize_winansi(&detail), cols) {
            if y < frame.bottom {
                break;
            }
            page.text(Font::Helvetica, DETAIL_SIZE, frame.left, y, &line);
            y -= DETAIL_LEADING;
        }
    }

    let mut doc = PdfDocument::new(frame.width, frame.height);
    doc.add_page(page);
    Ok(doc.to_bytes()?)
}

fn decode_text(content: &[u8]) -> String {
    let content = content.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(content);
    match std::str::from_utf8(content) {
        Ok(s) => s.to_string(),
        Err(_) => content.iter().map(|&b| b as char).collect(),
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    let mut out: String = s.chars().take(max.saturating_sub(3)).collect();
    out.push_str("...");
    out
}

fn human_size(bytes: usize) -> String {
    match bytes {
        b if b >= 1024 * 1024 => format!("{:.1} MB", b as f64 / (1024.0 * 1024.0)),
        b if b >= 1024 => format!("{:.1} KB", b as f64 / 1024.0),
        b => format!("{} bytes", b),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Orientation, PageSize};
    use image::{DynamicImage, Rgba, RgbaImage};
    use std::io::Cursor;

    fn page_count(bytes: &[u8]) -> usize {
        lopdf::Document::load_mem(bytes).expect("valid pdf").get_pages().len()
    }

    fn all_content(bytes: &[u8]) -> String {
        let doc = lopdf::Document::load_mem(bytes).unwrap();
        doc.get_pages()
            .into_values()
            .map(|id| String::from_utf8_lossy(&doc.get_page_content(id).unwrap()).into_owned())
            .collect()
    }

    #[test]
    fn short_text_is_one_page_with_heading() {
        let pdf = text_document("notes.txt", b"line one\nline two", &PageLayout::default()).unwrap();
        assert!(pdf.starts_with(b"%PDF-"));
        assert_eq!(page_count(&pdf), 1);
        let content = all_content(&pdf);
        assert!(content.contains("(notes.txt)"));
        assert!(content.contains("(line one)"));
        assert!(content.contains("(line two)"));
    }

    #[test]
    fn long_text_paginates() {
        let body = "x\n".repeat(500);
        let pdf = text_document("long.txt", body.as_bytes(), &PageLayout::default()).unwrap();
        assert!(page_count(&pdf) > 1);
    }

    #[test]
    fn latin1_fallback_for_invalid_utf8() {
        let pdf = text_document("legacy.txt", b"caf\xe9", &PageLayout::default()).unwrap();
        let doc = lopdf::Document::load_mem(&pdf).unwrap();
        let content = doc.get_page_content(doc.get_pages()[&1]).unwrap();
        assert!(content.windows(5).any(|w| w == b"caf\xe9)"));
    }

    #[test]
    fn image_page_uses_layout_size() {
        let mut png = Vec::new();
        DynamicImage::ImageRgba8(RgbaImage::from_pixel(20, 10, Rgba([0, 128, 255, 255])))
            .write_to(&mut Cursor::new(&mut png), image::ImageFormat::Png)
            .unwrap();
        let layout = PageLayout {
            size: PageSize::Letter,
            orientation: Orientation::Landscape,
            margin_in: 0.5,
        };
        let pdf = image_document(&png, &layout).unwrap();
        let doc = lopdf::Document::load_mem(&pdf).unwrap();
        let pages = doc.get_pages();
        assert_eq!(pages.len(), 1);
        let content = all_content(&pdf);
        assert!(content.contains("/Im0 Do"));
    }

    #[test]
    fn undecodable_image_is_an_error() {
        assert!(matches!(
            image_document(b"nope", &PageLayout::default()),
            Err(RenderError::Image(_))
        ));
    }

    #[test]
    fn placeholder_names_the_file() {
        let pdf = placeholder_document(
            "blob.bin",
            "application/x-unknown",
            2048,
            "no converter for this file type",
            &PageLayout::default(),
        )
        .unwrap();
        assert_eq!(page_count(&pdf), 1);
        let content = all_content(&pdf);
        assert!(content.contains("File: blob.bin"));
        assert!(content.contains("Size: 2.0 KB"));
    }

    #[test]
    fn oversized_margin_still_renders() {
        let layout = PageLayout {
            margin_in: 20.0,
            ..PageLayout::default()
        };
        let pdf = text_document("m.txt", b"hello", &layout).unwrap();
        assert_eq!(page_count(&pdf), 1);
    }
}
