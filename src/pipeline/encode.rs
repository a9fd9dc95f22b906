//! Image decoding: attachment bytes → flattened RGB raster for embedding.
//!
//! ## Why flatten alpha?
//!
//! The writer embeds plain `/DeviceRGB` images. Transparent regions are
//! composited over white, which is what a printed page shows anyway.
//!
//! ## Why cap pixels?
//!
//! A phone photo can be 8000 px wide; embedding it uncompressed-then-flated
//! costs hundreds of megabytes of memory for no visible gain on an A4 page.
//! `MAX_EDGE_PX` caps the longest edge regardless of the source resolution.

use crate::pdf::writer::RgbImage;
use image::imageops::FilterType;
use image::{DynamicImage, GenericImageView};
use tracing::debug;

/// Longest edge, in pixels, of an embedded image.
pub const MAX_EDGE_PX: u32 = 3000;

/// Decode `bytes` (format sniffed from the content) into an RGB raster.
pub fn decode_image(bytes: &[u8]) -> Result<RgbImage, image::ImageError> {
    let img = image::load_from_memory(bytes)?;
    let img = cap_edge(img);
    let (width, height) = img.dimensions();

    let rgba = img.to_rgba8();
    let mut pixels = Vec::with_capacity((width as usize) * (height as usize) * 3);
    for pixel in rgba.pixels() {
        let [r, g, b, a] = pixel.0;
        pixels.extend_from_slice(&[over_white(r, a), over_white(g, a), over_white(b, a)]);
    }

    debug!("Decoded image {}x{}", width, height);
    Ok(RgbImage {
        width,
        height,
        pixels,
    })
}

fn cap_edge(img: DynamicImage) -> DynamicImage {
    let (w, h) = img.dimensions();
    if w.max(h) <= MAX_EDGE_PX {
        return img;
    }
    debug!("Downscaling {}x{} image to fit {} px", w, h, MAX_EDGE_PX);
    img.resize(MAX_EDGE_PX, MAX_EDGE_PX, FilterType::Triangle)
}

fn over_white(channel: u8, alpha: u8) -> u8 {
    let c = channel as u32;
    let a = alpha as u32;
    ((c * a + 255 * (255 - a) + 127) / 255) as u8
}
