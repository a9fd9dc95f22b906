//! Print stylesheet and HTML document assembly for the e-mail body.
//!
//! Centralising the stylesheet here keeps both HTML renderers producing the
//! same look: Chromium receives it injected into `index.html`, the fallback
//! renderer receives it as its separate `css` field.
//!
//! Callers extend it through the request's `css` field, which is appended
//! after the base rules so it wins on equal specificity.

use crate::config::PageLayout;
use once_cell::sync::Lazy;
use regex::Regex;

/// Base print rules applied to every e-mail body.
pub const PRINT_STYLESHEET: &str = r#"body {
    font-family: -apple-system, BlinkMacSystemFont, 'Segoe UI', Roboto, 'Helvetica Neue', Arial, sans-serif;
    line-height: 1.6;
    color: #333;
    margin: 0;
    padding: 0;
}
.email-content { max-width: 100%; word-wrap: break-word; }
img { max-width: 100%; height: auto; display: block; margin: 10px 0; }
table { width: 100%; border-collapse: collapse; margin: 15px 0; }
table, th, td { border: 1px solid #ddd; }
th, td { padding: 8px; text-align: left; }
th { background-color: #f5f5f5; font-weight: bold; }
ul, ol { margin: 10px 0; padding-left: 20px; }
li { margin: 5px 0; }
h1, h2, h3, h4, h5, h6 { margin: 20px 0 10px 0; line-height: 1.2; }
p { margin: 10px 0; }
a { color: #0066cc; text-decoration: underline; }
blockquote { margin: 15px 0; padding: 10px 20px; border-left: 4px solid #ddd; background-color: #f9f9f9; }
pre, code { font-family: 'Courier New', monospace; background-color: #f5f5f5; padding: 2px 4px; border-radius: 3px; }
pre { padding: 10px; overflow-x: auto; white-space: pre-wrap; }
"#;

static HEAD_CLOSE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)</head\s*>").unwrap());
static HTML_OPEN: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)<html[^>]*>").unwrap());

/// The `@page` rule for `layout`.
pub fn page_rule(layout: &PageLayout) -> String {
    format!(
        "@page {{ size: {} {}; margin: {}; }}\n",
        layout.size.as_str(),
        layout.orientation.as_str(),
        layout.margin_css()
    )
}

/// Full stylesheet: page rule, base print rules, then the caller's CSS.
pub fn print_stylesheet(layout: &PageLayout, extra_css: Option<&str>) -> String {
    let mut css = page_rule(layout);
    css.push_str(PRINT_STYLESHEET);
    if let Some(extra) = extra_css.filter(|c| !c.trim().is_empty()) {
        css.push('\n');
        css.push_str(extra);
        css.push('\n');
    }
    css
}

/// `html` with the print stylesheet injected as a `<style>` element.
///
/// Complete documents get the element just before `</head>` (or right after
/// `<html>` when there is no head); fragments are wrapped in a minimal
/// UTF-8 document.
pub fn print_document(html: &str, extra_css: Option<&str>, layout: &PageLayout) -> String {
    let style = format!("<style>\n{}</style>\n", print_stylesheet(layout, extra_css));

    if let Some(m) = HEAD_CLOSE.find(html) {
        let mut out = String::with_capacity(html.len() + style.len());
        out.push_str(&html[..m.start()]);
        out.push_str(&style);
        out.push_str(&html[m.start()..]);
        return out;
    }
    if let Some(m) = HTML_OPEN.find(html) {
        let mut out = String::with_capacity(html.len() + style.len() + 13);
        out.push_str(&html[..m.end()]);
        out.push_str("<head>");
        out.push_str(&style);
        out.push_str("</head>");
        out.push_str(&html[m.end()..]);
        return out;
    }
    format!(
        "<!DOCTYPE html>\n<html>\n<head>\n<meta charset=\"utf-8\">\n{style}</head>\n<body>\n{html}\n</body>\n</html>\n"
    )
}
