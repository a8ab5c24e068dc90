//! Alpha compositing: write the mask into the buffer's alpha channel.
//!
//! Only the A byte of each pixel is written. R, G and B are left exactly
//! as they were, including under full transparency, so the output uses
//! straight (non-premultiplied) alpha and can be re-composited later.

use crate::types::{GrayImage, RgbaImage};

/// Counts reported by [`apply_mask`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AlphaCoverage {
    /// Pixels with alpha 0.
    pub transparent_pixels: u64,
    /// Pixels with alpha 255.
    pub opaque_pixels: u64,
}

/// Copy `mask[px]` into the alpha byte of pixel `px`.
///
/// The mask must have the same dimensions as the image; the pipeline
/// guarantees this because every mask is created from the image's
/// dimensions.
pub fn apply_mask(image: &mut RgbaImage, mask: &GrayImage) -> AlphaCoverage {
    debug_assert_eq!(image.dimensions(), mask.dimensions());
    for (pixel, m) in image.pixels_mut().zip(mask.pixels()) {
        pixel.0[3] = m.0[0];
    }
    let coverage = alpha_coverage(image);
    tracing::debug!(
        transparent = coverage.transparent_pixels,
        opaque = coverage.opaque_pixels,
        "alpha composited",
    );
    coverage
}

/// Count fully transparent and fully opaque pixels.
#[must_use]
pub fn alpha_coverage(image: &RgbaImage) -> AlphaCoverage {
    image.pixels().fold(
        AlphaCoverage {
            transparent_pixels: 0,
            opaque_pixels: 0,
        },
        |mut acc, p| {
            match p.0[3] {
                0 => acc.transparent_pixels += 1,
                255 => acc.opaque_pixels += 1,
                _ => {}
            }
            acc
        },
    )
}

/// Extract the alpha channel as a mask.
#[must_use]
pub fn alpha_channel(image: &RgbaImage) -> GrayImage {
    GrayImage::from_fn(image.width(), image.height(), |x, y| {
        image::Luma([image.get_pixel(x, y).0[3]])
    })
}
