//! Morphological cleaning: binary opening with a full 3x3 structuring
//! element.
//!
//! Erosion (3x3 minimum) followed by dilation (3x3 maximum) removes
//! isolated foreground speckles while larger regions come back at their
//! original extent.
//!
//! Two border treatments are available (see [`BorderPolicy`]):
//!
//! - [`BorderPolicy::Preserve`]: the outermost ring is copied back after
//!   each [`imageproc::morphology`] pass, so it keeps its pre-erosion
//!   value.
//! - [`BorderPolicy::Clamp`]: every pixel is processed and the
//!   neighborhood is clipped at the image edge, via
//!   [`imageproc::morphology::open`] with the chessboard norm.

use imageproc::distance_transform::Norm;

use crate::types::{BorderPolicy, GrayImage};

/// Copy the outermost pixel ring of `from` into `into`.
fn restore_border(into: &mut GrayImage, from: &GrayImage) {
    let (w, h) = from.dimensions();
    for y in 0..h {
        for x in 0..w {
            if x == 0 || y == 0 || x + 1 == w || y + 1 == h {
                into.put_pixel(x, y, *from.get_pixel(x, y));
            }
        }
    }
}

/// 3x3 erosion of interior pixels.
///
/// Border pixels keep their value from `mask`.
#[must_use = "returns the eroded mask"]
pub fn erode(mask: &GrayImage) -> GrayImage {
    let mut out = imageproc::morphology::erode(mask, Norm::LInf, 1);
    restore_border(&mut out, mask);
    out
}

/// 3x3 dilation of interior pixels.
///
/// Border pixels keep their value from `mask`.
#[must_use = "returns the dilated mask"]
pub fn dilate(mask: &GrayImage) -> GrayImage {
    let mut out = imageproc::morphology::dilate(mask, Norm::LInf, 1);
    restore_border(&mut out, mask);
    out
}

/// Binary opening (erosion then dilation) under the given border policy.
#[must_use = "returns the opened mask"]
pub fn open(mask: &GrayImage, policy: BorderPolicy) -> GrayImage {
    match policy {
        // Both passes copy the border ring through, so it ends up with
        // its pre-erosion value.
        BorderPolicy::Preserve => dilate(&erode(mask)),
        BorderPolicy::Clamp => imageproc::morphology::open(mask, Norm::LInf, 1),
    }
}

/// Number of foreground (non-zero) pixels in a mask.
#[must_use]
pub fn foreground_count(mask: &GrayImage) -> u64 {
    mask.pixels().map(|p| u64::from(p.0[0] > 0)).sum()
}

/// Open the mask in place, returning `(foreground_before, foreground_after)`.
pub fn clean(mask: &mut GrayImage, policy: BorderPolicy) -> (u64, u64) {
    let before = foreground_count(mask);
    *mask = open(mask, policy);
    let after = foreground_count(mask);
    tracing::debug!(%policy, before, after, "morphological opening");
    (before, after)
}
