//! Page builder for the PDFs this crate generates itself, on top of `lopdf`.
//!
//! Only what the text, image and placeholder pages need: the three
//! standard Type1 fonts with WinAnsiEncoding and RGB image XObjects.
//! Content streams stay uncompressed; image streams are deflated by lopdf.
//!
//! ```text
//! Catalog ─▶ Pages (MediaBox) ─▶ Page ─▶ Contents
//!                                   └──▶ Resources: F1..F3, Im0..
//! ```

use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Dictionary, Document, Object, ObjectId, Stream};

/// The standard fonts available to generated pages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Font {
    Courier,
    Helvetica,
    HelveticaBold,
}

impl Font {
    const ALL: [Font; 3] = [Font::Courier, Font::Helvetica, Font::HelveticaBold];

    fn resource(&self) -> &'static str {
        match self {
            Font::Courier => "F1",
            Font::Helvetica => "F2",
            Font::HelveticaBold => "F3",
        }
    }

    fn base_font(&self) -> &'static str {
        match self {
            Font::Courier => "Courier",
            Font::Helvetica => "Helvetica",
            Font::HelveticaBold => "Helvetica-Bold",
        }
    }

    /// Average glyph advance as a fraction of the font size. Exact for
    /// Courier, a conservative estimate for the proportional fonts.
    pub fn char_width(&self) -> f32 {
        match self {
            Font::Courier => 0.6,
            Font::Helvetica => 0.5,
            Font::HelveticaBold => 0.56,
        }
    }
}

/// An RGB raster ready to embed.
#[derive(Debug, Clone)]
pub struct RgbImage {
    pub width: u32,
    pub height: u32,
    /// `width * height * 3` bytes, row-major.
    pub pixels: Vec<u8>,
}

/// Handle returned by [`PdfDocument::add_image`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageId(usize);

impl ImageId {
    fn resource(&self) -> String {
        format!("Im{}", self.0)
    }
}

/// Content-stream operations for one page.
#[derive(Debug, Default, Clone)]
pub struct Page {
    operations: Vec<Operation>,
    images: Vec<ImageId>,
}

impl Page {
    pub fn new() -> Self {
        Self::default()
    }

    /// Draw `text` with its baseline starting at `(x, y)` (points, origin bottom-left).
    pub fn text(&mut self, font: Font, size: f32, x: f32, y: f32, text: &str) -> &mut Self {
        self.operations.extend([
            Operation::new("BT", vec![]),
            Operation::new("Tf", vec![Object::Name(font.resource().into()), size.into()]),
            Operation::new("Td", vec![x.into(), y.into()]),
            Operation::new("Tj", vec![Object::string_literal(encode_text(text))]),
            Operation::new("ET", vec![]),
        ]);
        self
    }

    /// Paint image `id` into the rectangle `(x, y, w, h)`.
    pub fn image(&mut self, id: ImageId, x: f32, y: f32, w: f32, h: f32) -> &mut Self {
        self.operations.extend([
            Operation::new("q", vec![]),
            Operation::new(
                "cm",
                vec![w.into(), 0.0f32.into(), 0.0f32.into(), h.into(), x.into(), y.into()],
            ),
            Operation::new("Do", vec![Object::Name(id.resource().into_bytes())]),
            Operation::new("Q", vec![]),
        ]);
        if !self.images.contains(&id) {
            self.images.push(id);
        }
        self
    }

    /// Stroke a thin grey horizontal rule from `x1` to `x2` at height `y`.
    pub fn rule(&mut self, x1: f32, x2: f32, y: f32) -> &mut Self {
        self.operations.extend([
            Operation::new("w", vec![0.5f32.into()]),
            Operation::new("G", vec![0.6f32.into()]),
            Operation::new("m", vec![x1.into(), y.into()]),
            Operation::new("l", vec![x2.into(), y.into()]),
            Operation::new("S", vec![]),
            Operation::new("G", vec![0.0f32.into()]),
        ]);
        self
    }
}

/// A document whose pages all share one media box.
#[derive(Debug)]
pub struct PdfDocument {
    width: f32,
    height: f32,
    images: Vec<RgbImage>,
    pages: Vec<Page>,
}

impl PdfDocument {
    /// `width`/`height` in points.
    pub fn new(width: f32, height: f32) -> Self {
        Self {
            width,
            height,
            images: Vec::new(),
            pages: Vec::new(),
        }
    }

    pub fn add_image(&mut self, image: RgbImage) -> ImageId {
        self.images.push(image);
        ImageId(self.images.len() - 1)
    }

    pub fn add_page(&mut self, page: Page) {
        self.pages.push(page);
    }

    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    /// Serialise the document. A document without pages gets one blank page
    /// so the output is always a valid PDF.
    pub fn to_bytes(self) -> lopdf::Result<Vec<u8>> {
        let Self {
            width,
            height,
            images,
            mut pages,
        } = self;
        if pages.is_empty() {
            pages.push(Page::new());
        }

        let mut doc = Document::with_version("1.4");
        let pages_id = doc.new_object_id();

        let mut fonts = Dictionary::new();
        for font in Font::ALL {
            let font_id = doc.add_object(dictionary! {
                "Type" => "Font",
                "Subtype" => "Type1",
                "BaseFont" => font.base_font(),
                "Encoding" => "WinAnsiEncoding",
            });
            fonts.set(font.resource(), font_id);
        }

        let mut image_ids: Vec<ObjectId> = Vec::with_capacity(images.len());
        for image in images {
            let mut stream = Stream::new(
                dictionary! {
                    "Type" => "XObject",
                    "Subtype" => "Image",
                    "Width" => i64::from(image.width),
                    "Height" => i64::from(image.height),
                    "ColorSpace" => "DeviceRGB",
                    "BitsPerComponent" => 8i64,
                },
                image.pixels,
            );
            stream.compress()?;
            image_ids.push(doc.add_object(stream));
        }

        let mut kids: Vec<Object> = Vec::with_capacity(pages.len());
        for page in pages {
            let content = Content {
                operations: page.operations,
            }
            .encode()?;
            let contents_id = doc.add_object(Stream::new(Dictionary::new(), content));

            let mut resources = dictionary! { "Font" => fonts.clone() };
            if !page.images.is_empty() {
                let mut xobjects = Dictionary::new();
                for id in &page.images {
                    if let Some(&object_id) = image_ids.get(id.0) {
                        xobjects.set(id.resource(), object_id);
                    }
                }
                resources.set("XObject", xobjects);
            }

            let page_id = doc.add_object(dictionary! {
                "Type" => "Page",
                "Parent" => pages_id,
                "Resources" => resources,
                "Contents" => contents_id,
            });
            kids.push(page_id.into());
        }

        let count = kids.len() as i64;
        doc.objects.insert(
            pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => kids,
                "Count" => count,
                "MediaBox" => vec![Object::Integer(0), Object::Integer(0), width.into(), height.into()],
            }),
        );
        let catalog_id = doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
        });
        doc.trailer.set("Root", catalog_id);

        let mut out = Vec::new();
        doc.save_to(&mut out)?;
        Ok(out)
    }
}

/// WinAnsi bytes for `text`: printable ASCII and Latin-1 map to themselves,
/// anything else becomes `?`. Escaping is left to lopdf's string writer.
fn encode_text(text: &str) -> Vec<u8> {
    text.chars()
        .map(|c| match c {
            ' '..='~' | '\u{a0}'..='\u{ff}' => c as u8,
            _ => b'?',
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn contains(haystack: &[u8], needle: &[u8]) -> bool {
        haystack.windows(needle.len()).any(|w| w == needle)
    }

    #[test]
    fn latin1_kept_and_the_rest_replaced() {
        assert_eq!(encode_text("a(b)c"), b"a(b)c");
        assert_eq!(encode_text("café"), b"caf\xe9");
        assert_eq!(encode_text("日本\n"), b"???");
    }

    #[test]
    fn empty_document_still_has_a_page() {
        let bytes = PdfDocument::new(612.0, 792.0).to_bytes().unwrap();
        assert!(bytes.starts_with(b"%PDF-1.4"));
        let doc = Document::load_mem(&bytes).expect("parses");
        assert_eq!(doc.get_pages().len(), 1);
    }

    #[test]
    fn text_and_image_pages_parse() {
        let mut doc = PdfDocument::new(595.0, 842.0);
        let img = doc.add_image(RgbImage {
            width: 2,
            height: 1,
            pixels: vec![255, 0, 0, 0, 0, 255],
        });

        let mut first = Page::new();
        first.text(Font::HelveticaBold, 14.0, 36.0, 800.0, "Hello (world) :)");
        let mut second = Page::new();
        second.image(img, 36.0, 36.0, 200.0, 100.0);
        doc.add_page(first);
        doc.add_page(second);

        let bytes = doc.to_bytes().unwrap();
        let parsed = Document::load_mem(&bytes).expect("parses");
        let pages = parsed.get_pages();
        assert_eq!(pages.len(), 2);

        let content = parsed.get_page_content(pages[&1]).unwrap();
        let content = String::from_utf8_lossy(&content);
        assert!(content.contains("/F3 14 Tf"), "{content}");
        assert!(content.contains(r"(Hello (world) :\)) Tj"), "{content}");

        let content = parsed.get_page_content(pages[&2]).unwrap();
        assert!(contains(&content, b"/Im0 Do"));
        let resources = parsed
            .get_dictionary(pages[&2])
            .and_then(|p| p.get(b"Resources"))
            .and_then(Object::as_dict)
            .unwrap();
        assert!(resources.get(b"XObject").and_then(Object::as_dict).unwrap().has(b"Im0"));
    }

    #[test]
    fn large_images_are_deflated() {
        let mut doc = PdfDocument::new(595.0, 842.0);
        let img = doc.add_image(RgbImage {
            width: 64,
            height: 64,
            pixels: vec![200; 64 * 64 * 3],
        });
        let mut page = Page::new();
        page.image(img, 0.0, 0.0, 64.0, 64.0);
        doc.add_page(page);

        let parsed = Document::load_mem(&doc.to_bytes().unwrap()).unwrap();
        let image = parsed
            .objects
            .values()
            .filter_map(|o| o.as_stream().ok())
            .find(|s| s.dict.get(b"Subtype").and_then(Object::as_name).ok() == Some(b"Image".as_slice()))
            .expect("image xobject");
        assert_eq!(image.filter().unwrap(), "FlateDecode");
        assert!(image.content.len() < 64 * 64 * 3);
    }

    #[test]
    fn latin1_reaches_the_content_stream() {
        let mut doc = PdfDocument::new(612.0, 792.0);
        let mut page = Page::new();
        page.text(Font::Courier, 10.0, 72.0, 700.0, "café");
        doc.add_page(page);
        let parsed = Document::load_mem(&doc.to_bytes().unwrap()).unwrap();
        let first = parsed.get_pages()[&1];
        assert!(contains(&parsed.get_page_content(first).unwrap(), b"(caf\xe9)"));
    }
}
