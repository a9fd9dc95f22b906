//! In-process PDF handling: a small writer for generated pages and a
//! lopdf-based merger used when the external merge engine is unavailable.

pub mod merge;
pub mod writer;

/// Magic header every PDF starts with.
pub const PDF_MAGIC: &[u8] = b"%PDF-";

/// `true` when `bytes` begins with the PDF magic header.
pub fn is_pdf(bytes: &[u8]) -> bool {
    bytes.starts_with(PDF_MAGIC)
}
