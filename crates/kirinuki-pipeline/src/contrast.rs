//! Mask contrast refinement: stretch alpha around the midpoint, then
//! hard-threshold it for a crisper silhouette.

use crate::types::RgbaImage;

/// Alpha value left as-is by the threshold step.
pub const MIDPOINT: f32 = 128.0;

/// Contrast-stretch a single non-zero alpha value and threshold it.
///
/// `((alpha / 255 - 0.5) * contrast + 0.5) * 255`, clamped to 0–255,
/// then below 128 becomes 0 and above 128 becomes 255. A stretched value
/// of exactly 128 is kept. Alpha 0 is returned unchanged.
#[must_use]
pub fn refine_alpha(alpha: u8, contrast: f32) -> u8 {
    if alpha == 0 {
        return 0;
    }
    let stretched = ((f32::from(alpha) / 255.0 - 0.5) * contrast + 0.5) * 255.0;
    let stretched = stretched.clamp(0.0, 255.0);
    if stretched < MIDPOINT {
        0
    } else if stretched > MIDPOINT {
        255
    } else {
        128
    }
}

/// Refine every non-zero alpha value in place.
///
/// Returns the number of pixels whose alpha changed.
pub fn refine(image: &mut RgbaImage, contrast: f32) -> u64 {
    let mut changed = 0_u64;
    for pixel in image.pixels_mut() {
        let refined = refine_alpha(pixel.0[3], contrast);
        if refined != pixel.0[3] {
            pixel.0[3] = refined;
            changed += 1;
        }
    }
    tracing::debug!(contrast, changed, "mask contrast refinement");
    changed
}
