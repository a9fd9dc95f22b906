//! `cid:` reference resolution: inline e-mail images → data URLs.
//!
//! HTML e-mail points at its inline images with `cid:` URIs. Renderers
//! cannot follow those, so each reference is matched against the image
//! attachments and rewritten in place to a base64 data URL before the body
//! is rendered. References without a match are left alone; the renderer
//! shows a broken image and the request carries on.
//!
//! A reference matches, in order of preference:
//! 1. an attachment whose Content-ID equals it (angle brackets ignored),
//! 2. an attachment whose file name equals it,
//! 3. an attachment whose file name or file stem equals the part of the
//!    reference before `@` (`cid:logo.png@01D9…` → `logo.png`).

use crate::registry::normalize_mime;
use crate::request::Attachment;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use std::collections::BTreeSet;
use tracing::debug;

static CID_REF: Lazy<Regex> = Lazy::new(|| Regex::new(r#"(?i)cid:([^"'\s)>]+)"#).unwrap());

/// Outcome of [`resolve_cids`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CidResolution {
    pub html: String,
    /// Indices (into the attachment slice) of attachments that were inlined.
    pub resolved: BTreeSet<usize>,
    /// References that matched nothing.
    pub unresolved: Vec<String>,
}

/// Rewrite every resolvable `cid:` reference in `html`.
pub fn resolve_cids(html: &str, attachments: &[Attachment]) -> CidResolution {
    let mut resolved = BTreeSet::new();
    let mut unresolved = Vec::new();

    let html = CID_REF
        .replace_all(html, |caps: &Captures<'_>| {
            let reference = &caps[1];
            match find_match(reference, attachments) {
                Some(index) => {
                    resolved.insert(index);
                    data_url(&attachments[index])
                }
                None => {
                    unresolved.push(reference.to_string());
                    caps[0].to_string()
                }
            }
        })
        .into_owned();

    if !resolved.is_empty() || !unresolved.is_empty() {
        debug!(
            "CID resolution: {} inlined, {} unresolved",
            resolved.len(),
            unresolved.len()
        );
    }

    CidResolution {
        html,
        resolved,
        unresolved,
    }
}

fn find_match(reference: &str, attachments: &[Attachment]) -> Option<usize> {
    let reference = percent_decode(reference.trim_matches(|c| c == '<' || c == '>'));
    let images: Vec<(usize, &Attachment)> = attachments
        .iter()
        .enumerate()
        .filter(|(_, a)| is_image(a))
        .collect();

    let by_content_id = images.iter().find(|(_, a)| {
        a.content_id
            .as_deref()
            .map(|id| id.trim().trim_matches(|c| c == '<' || c == '>'))
            .is_some_and(|id| id.eq_ignore_ascii_case(&reference))
    });
    if let Some((i, _)) = by_content_id {
        return Some(*i);
    }

    let by_name = images
        .iter()
        .find(|(_, a)| a.request.name().eq_ignore_ascii_case(&reference));
    if let Some((i, _)) = by_name {
        return Some(*i);
    }

    let local = reference.split('@').next().unwrap_or_default();
    if local.is_empty() {
        return None;
    }
    images
        .iter()
        .find(|(_, a)| {
            let name = a.request.name();
            let stem = name.rsplit_once('.').map_or(name, |(s, _)| s);
            name.eq_ignore_ascii_case(local) || stem.eq_ignore_ascii_case(local)
        })
        .map(|(i, _)| *i)
}

fn is_image(a: &Attachment) -> bool {
    image_mime(a).is_some()
}

/// The image MIME type to put in the data URL.
fn image_mime(a: &Attachment) -> Option<String> {
    let mime = normalize_mime(a.request.content_type());
    if mime.starts_with("image/") {
        return Some(mime);
    }
    let guessed = match a.request.extension()?.as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "bmp" => "image/bmp",
        "webp" => "image/webp",
        "svg" => "image/svg+xml",
        _ => return None,
    };
    Some(guessed.to_string())
}

fn data_url(a: &Attachment) -> String {
    let mime = image_mime(a).unwrap_or_else(|| "application/octet-stream".into());
    format!("data:{};base64,{}", mime, STANDARD.encode(a.request.content()))
}

/// Decode `%XX` escapes; invalid sequences are kept verbatim.
fn percent_decode(s: &str) -> String {
    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' && i + 2 < bytes.len() {
            if let (Some(hi), Some(lo)) = (hex_value(bytes[i + 1]), hex_value(bytes[i + 2])) {
                out.push(hi << 4 | lo);
                i += 3;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

fn hex_value(b: u8) -> Option<u8> {
    (b as char).to_digit(16).map(|d| d as u8)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::ConversionRequest;

    fn attachment(name: &str, mime: &str, content_id: Option<&str>) -> Attachment {
        Attachment {
            request: ConversionRequest::new(b"\x89PNG".to_vec(), name, mime),
            content_id: content_id.map(str::to_string),
            inline: true,
        }
    }

    #[test]
    fn matches_by_content_id() {
        let atts = vec![
            attachment("other.png", "image/png", Some("<nope>")),
            attachment("logo.png", "image/png", Some("<logo123@mail>")),
        ];
        let res = resolve_cids(r#"<img src="cid:logo123@mail">"#, &atts);
        assert!(res.html.starts_with(r#"<img src="data:image/png;base64,"#));
        assert_eq!(res.resolved.into_iter().collect::<Vec<_>>(), vec![1]);
        assert!(res.unresolved.is_empty());
    }

    #[test]
    fn matches_by_name_then_local_part() {
        let atts = vec![attachment("banner.jpg", "application/octet-stream", None)];
        let by_name = resolve_cids("<img src='cid:banner.jpg'>", &atts);
        assert!(by_name.html.contains("data:image/jpeg;base64,"));

        let by_stem = resolve_cids("<img src=cid:banner@01D9>", &atts);
        assert!(by_stem.html.contains("data:image/jpeg;base64,"));
    }

    #[test]
    fn non_images_are_never_inlined() {
        let atts = vec![attachment("logo.docx", "application/msword", Some("logo"))];
        let res = resolve_cids(r#"<img src="cid:logo">"#, &atts);
        assert_eq!(res.html, r#"<img src="cid:logo">"#);
        assert_eq!(res.unresolved, vec!["logo".to_string()]);
    }

    #[test]
    fn unresolved_references_are_left_alone() {
        let res = resolve_cids(r#"<p>hi</p><img src="cid:missing@x">"#, &[]);
        assert_eq!(res.html, r#"<p>hi</p><img src="cid:missing@x">"#);
        assert!(res.resolved.is_empty());
    }

    #[test]
    fn css_url_references_resolve() {
        let atts = vec![attachment("bg.png", "image/png", Some("bg"))];
        let res = resolve_cids("<td style=\"background:url(cid:bg)\">", &atts);
        assert!(res.html.contains("url(data:image/png;base64,"));
    }

    #[test]
    fn percent_escapes_decode() {
        assert_eq!(percent_decode("a%40b"), "a@b");
        assert_eq!(percent_decode("100%"), "100%");
        assert_eq!(percent_decode("%zz"), "%zz");
    }
}
