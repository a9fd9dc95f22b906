//! Embedded image extraction: `<img src="data:image/…;base64,…">` in the
//! e-mail body → separate image items.
//!
//! Runs on the body after CID resolution, so inline images that were
//! resolved from attachments are discovered here too. Extraction is
//! additive: the body still renders with its images in place.

use crate::output::ConversionRequest;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::debug;

static DATA_IMG: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?is)<img\b[^>]*?\bsrc\s*=\s*["']data:(image/[a-z0-9.+-]+);base64,([^"']+)["']"#)
        .unwrap()
});

/// One conversion request per decodable embedded image, in document order.
pub fn extract_images(html: &str) -> Vec<ConversionRequest> {
    let mut out = Vec::new();
    for caps in DATA_IMG.captures_iter(html) {
        let mime = caps[1].to_ascii_lowercase();
        let payload: String = caps[2].chars().filter(|c| !c.is_ascii_whitespace()).collect();
        match STANDARD.decode(payload.as_bytes()) {
            Ok(bytes) if !bytes.is_empty() => {
                let name = format!("embedded-image-{}.{}", out.len() + 1, extension(&mime));
                out.push(ConversionRequest::new(bytes, name, mime));
            }
            Ok(_) => {}
            Err(e) => debug!("Skipping undecodable embedded image: {}", e),
        }
    }
    out
}

fn extension(mime: &str) -> &'static str {
    match mime {
        "image/jpeg" | "image/jpg" => "jpg",
        "image/gif" => "gif",
        "image/bmp" => "bmp",
        "image/webp" => "webp",
        "image/svg+xml" => "svg",
        _ => "png",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_images_in_order() {
        let png = STANDARD.encode(b"png-bytes");
        let jpg = STANDARD.encode(b"jpg-bytes");
        let html = format!(
            r#"<p>a</p><IMG alt="x" SRC="data:image/png;base64,{png}"><img src='data:image/jpeg;base64,{jpg}'/>"#
        );
        let images = extract_images(&html);
        assert_eq!(images.len(), 2);
        assert_eq!(images[0].name(), "embedded-image-1.png");
        assert_eq!(images[0].content(), b"png-bytes");
        assert_eq!(images[1].name(), "embedded-image-2.jpg");
        assert_eq!(images[1].content_type(), "image/jpeg");
    }

    #[test]
    fn skips_bad_base64_and_remote_images() {
        let html = r#"<img src="data:image/png;base64,@@@"><img src="https://example.com/a.png">"#;
        assert!(extract_images(html).is_empty());
    }

    #[test]
    fn tolerates_wrapped_base64() {
        let b64 = STANDARD.encode(b"0123456789abcdef");
        let wrapped = format!("{}\n{}", &b64[..8], &b64[8..]);
        let html = format!(r#"<img src="data:image/gif;base64,{wrapped}">"#);
        let images = extract_images(&html);
        assert_eq!(images.len(), 1);
        assert_eq!(images[0].content(), b"0123456789abcdef");
    }
}
