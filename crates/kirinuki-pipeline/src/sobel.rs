//! Sobel edge refinement: promote strong-gradient pixels to foreground.
//!
//! Gradients are computed on the red channel only with `imageproc`'s 3x3
//! Sobel kernels. A pixel whose gradient magnitude exceeds
//! `255 * edge_sensitivity` becomes a strong edge (255), and the mask
//! takes the pixel-wise maximum of itself and the edge map. The step is
//! monotonic: it never moves a pixel toward background.

use image::Luma;
use imageproc::definitions::Image;
use imageproc::gradients::{horizontal_sobel, vertical_sobel};

use crate::types::{GrayImage, RgbaImage};

/// The red channel of an RGBA image as a grayscale image.
#[must_use]
pub fn red_channel(image: &RgbaImage) -> GrayImage {
    let (w, h) = image.dimensions();
    GrayImage::from_fn(w, h, |x, y| Luma([image.get_pixel(x, y).0[0]]))
}

/// Sobel gradient magnitude of the red channel at every pixel.
///
/// The kernels replicate the outermost ring at the image edge, so border
/// values are not true 3x3 responses. [`strong_edges`] ignores them.
#[must_use]
pub fn gradient_magnitude(image: &RgbaImage) -> Image<Luma<f32>> {
    let red = red_channel(image);
    let gx = horizontal_sobel(&red);
    let gy = vertical_sobel(&red);
    Image::from_fn(red.width(), red.height(), |x, y| {
        let h = f32::from(gx.get_pixel(x, y).0[0]);
        let v = f32::from(gy.get_pixel(x, y).0[0]);
        Luma([h.hypot(v)])
    })
}

/// Binary strong-edge map: 255 where the interior gradient magnitude
/// exceeds `255 * edge_sensitivity`, 0 elsewhere (including the border).
#[must_use = "returns the strong-edge map"]
pub fn strong_edges(image: &RgbaImage, edge_sensitivity: f32) -> GrayImage {
    let (w, h) = image.dimensions();
    let threshold = 255.0 * edge_sensitivity;
    let magnitude = gradient_magnitude(image);
    GrayImage::from_fn(w, h, |x, y| {
        let interior = x >= 1 && y >= 1 && x + 1 < w && y + 1 < h;
        if interior && magnitude.get_pixel(x, y).0[0] > threshold {
            Luma([255])
        } else {
            Luma([0])
        }
    })
}

/// Counts reported by [`refine`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EdgeRefinement {
    /// Pixels classified as strong edges.
    pub strong_edge_pixels: u64,
    /// Pixels that were background and became foreground.
    pub promoted_pixels: u64,
}

/// Raise the mask to foreground wherever the image has a strong edge.
///
/// `mask[px] = max(mask[px], edge[px])`, so no value ever decreases.
pub fn refine(image: &RgbaImage, mask: &mut GrayImage, edge_sensitivity: f32) -> EdgeRefinement {
    let edges = strong_edges(image, edge_sensitivity);
    let mut strong_edge_pixels = 0_u64;
    let mut promoted_pixels = 0_u64;
    for (m, e) in mask.pixels_mut().zip(edges.pixels()) {
        if e.0[0] == 255 {
            strong_edge_pixels += 1;
        }
        if e.0[0] > m.0[0] {
            promoted_pixels += 1;
            m.0[0] = e.0[0];
        }
    }
    tracing::debug!(
        threshold = 255.0 * edge_sensitivity,
        strong_edge_pixels,
        promoted_pixels,
        "sobel edge refinement",
    );
    EdgeRefinement {
        strong_edge_pixels,
        promoted_pixels,
    }
}
