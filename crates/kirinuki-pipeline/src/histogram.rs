//! Color histogram classification: the first mask stage.
//!
//! Builds a coarse RGB histogram over the interior of the image (each
//! channel quantized to 32 levels), takes the most frequent buckets as
//! candidate background colors, and marks every pixel close to a
//! sufficiently common candidate as background. A naive neighbor
//! difference test flags edge pixels at the same time; edge pixels are
//! always kept as foreground so subject outlines survive.

use serde::{Deserialize, Serialize};

use crate::types::{GrayImage, RgbaImage};

/// Right shift applied to each channel to form a bucket level (`/ 8`).
pub const BUCKET_SHIFT: u8 = 3;

/// Quantization levels per channel.
pub const LEVELS_PER_CHANNEL: usize = 256 >> BUCKET_SHIFT;

/// Total number of distinct buckets (32³).
pub const BUCKET_COUNT: usize = LEVELS_PER_CHANNEL * LEVELS_PER_CHANNEL * LEVELS_PER_CHANNEL;

/// How many of the most frequent buckets are background candidates.
pub const CANDIDATE_COUNT: usize = 5;

/// Sum of absolute channel differences to the 4 direct neighbors above
/// which an interior pixel is an edge pixel.
pub const EDGE_DIFFERENCE_THRESHOLD: u32 = 100;

/// Fraction of the image a candidate bucket must exceed to classify
/// pixels as background.
pub const MIN_BUCKET_SHARE: f64 = 0.05;

/// Multiplier on the color threshold for edge-flagged pixels.
pub const EDGE_THRESHOLD_SCALE: f32 = 1.5;

/// A quantized RGB color: each channel divided by 8, packed as 5-5-5 bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BucketKey(u16);

impl BucketKey {
    /// Quantize an RGB color.
    #[must_use]
    pub const fn from_rgb(r: u8, g: u8, b: u8) -> Self {
        let r = (r >> BUCKET_SHIFT) as u16;
        let g = (g >> BUCKET_SHIFT) as u16;
        let b = (b >> BUCKET_SHIFT) as u16;
        Self((r << 10) | (g << 5) | b)
    }

    /// Per-channel levels, each in `0..32`.
    #[must_use]
    pub const fn levels(self) -> [u8; 3] {
        [
            ((self.0 >> 10) & 0x1f) as u8,
            ((self.0 >> 5) & 0x1f) as u8,
            (self.0 & 0x1f) as u8,
        ]
    }

    /// De-quantized bucket center in 0–255 RGB space.
    #[must_use]
    pub fn center(self) -> [f32; 3] {
        let half = f32::from(1_u8 << (BUCKET_SHIFT - 1));
        self.levels()
            .map(|level| f32::from(level) * f32::from(1_u8 << BUCKET_SHIFT) + half)
    }

    const fn index(self) -> usize {
        self.0 as usize
    }
}

/// A histogram bucket and how many sampled pixels fell into it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColorBucket {
    /// The quantized color.
    pub key: BucketKey,
    /// Number of sampled pixels in this bucket.
    pub count: u32,
}

/// Occurrence counts for every [`BucketKey`].
#[derive(Debug, Clone)]
pub struct ColorHistogram {
    counts: Vec<u32>,
    sampled: u64,
}

impl Default for ColorHistogram {
    fn default() -> Self {
        Self::new()
    }
}

impl ColorHistogram {
    /// Create an empty histogram.
    #[must_use]
    pub fn new() -> Self {
        Self {
            counts: vec![0; BUCKET_COUNT],
            sampled: 0,
        }
    }

    /// Count one pixel.
    pub fn add(&mut self, key: BucketKey) {
        if let Some(count) = self.counts.get_mut(key.index()) {
            *count = count.saturating_add(1);
            self.sampled += 1;
        }
    }

    /// Occurrences recorded for `key`.
    #[must_use]
    pub fn count(&self, key: BucketKey) -> u32 {
        self.counts.get(key.index()).copied().unwrap_or(0)
    }

    /// Number of pixels added so far.
    #[must_use]
    pub const fn sampled(&self) -> u64 {
        self.sampled
    }

    /// Whether no pixels have been added.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.sampled == 0
    }

    /// The `n` most frequent non-empty buckets, most frequent first.
    ///
    /// Ties are broken by ascending key so the selection is deterministic.
    #[must_use]
    pub fn most_frequent(&self, n: usize) -> Vec<ColorBucket> {
        let mut buckets: Vec<ColorBucket> = self
            .counts
            .iter()
            .enumerate()
            .filter(|&(_, &count)| count > 0)
            .filter_map(|(index, &count)| {
                let key = BucketKey(u16::try_from(index).ok()?);
                Some(ColorBucket { key, count })
            })
            .collect();
        buckets.sort_unstable_by(|a, b| b.count.cmp(&a.count).then(a.key.cmp(&b.key)));
        buckets.truncate(n);
        buckets
    }
}

/// Output of [`classify`].
#[derive(Debug, Clone)]
pub struct Classification {
    /// Binary mask: 0 background, 255 foreground.
    pub mask: GrayImage,
    /// Candidate background buckets, most frequent first.
    pub candidates: Vec<ColorBucket>,
    /// Interior pixels flagged by the neighbor difference test.
    pub edge_pixels: u64,
    /// Pixels classified as background.
    pub background_pixels: u64,
}

/// Sum of absolute R, G, B differences between two pixels.
fn channel_difference(a: image::Rgba<u8>, b: image::Rgba<u8>) -> u32 {
    a.0.iter()
        .zip(b.0.iter())
        .take(3)
        .map(|(&p, &q)| u32::from(p.abs_diff(q)))
        .sum()
}

/// Squared Euclidean RGB distance from a pixel to a bucket center.
fn distance_squared(pixel: image::Rgba<u8>, center: [f32; 3]) -> f32 {
    pixel
        .0
        .iter()
        .zip(center)
        .map(|(&channel, c)| {
            let d = f32::from(channel) - c;
            d * d
        })
        .sum()
}

/// Flag interior pixels whose summed difference to their 4 direct
/// neighbors exceeds [`EDGE_DIFFERENCE_THRESHOLD`], while accumulating
/// the interior color histogram.
fn scan_interior(image: &RgbaImage) -> (ColorHistogram, Vec<bool>) {
    let (w, h) = image.dimensions();
    let mut histogram = ColorHistogram::new();
    let mut edges = vec![false; w as usize * h as usize];
    if w < 3 || h < 3 {
        return (histogram, edges);
    }

    for y in 1..h - 1 {
        for x in 1..w - 1 {
            let p = *image.get_pixel(x, y);
            histogram.add(BucketKey::from_rgb(p[0], p[1], p[2]));

            let difference: u32 = [(x - 1, y), (x + 1, y), (x, y - 1), (x, y + 1)]
                .into_iter()
                .map(|(nx, ny)| channel_difference(p, *image.get_pixel(nx, ny)))
                .sum();
            if difference > EDGE_DIFFERENCE_THRESHOLD {
                edges[y as usize * w as usize + x as usize] = true;
            }
        }
    }
    (histogram, edges)
}

/// Classify every pixel as background (0) or foreground (255).
///
/// A pixel is background when it lies within `color_threshold` (1.5x for
/// edge pixels) of a candidate bucket center and that bucket holds more
/// than 5% of the image's pixels. Edge pixels are then forced back to
/// foreground regardless of color.
///
/// Images without interior pixels (width or height below 3) have no
/// histogram to work from and are returned as entirely foreground.
#[must_use = "returns the initial mask"]
pub fn classify(image: &RgbaImage, color_threshold: f32) -> Classification {
    let (w, h) = image.dimensions();
    let (histogram, edges) = scan_interior(image);

    if histogram.is_empty() {
        tracing::debug!(width = w, height = h, "no interior pixels, mask is all foreground");
        return Classification {
            mask: GrayImage::from_pixel(w, h, image::Luma([255])),
            candidates: Vec::new(),
            edge_pixels: 0,
            background_pixels: 0,
        };
    }

    let candidates = histogram.most_frequent(CANDIDATE_COUNT);
    #[allow(clippy::cast_precision_loss)]
    let min_count = (u64::from(w) * u64::from(h)) as f64 * MIN_BUCKET_SHARE;
    let centers: Vec<[f32; 3]> = candidates
        .iter()
        .filter(|bucket| f64::from(bucket.count) > min_count)
        .map(|bucket| bucket.key.center())
        .collect();
    for bucket in &candidates {
        tracing::trace!(levels = ?bucket.key.levels(), count = bucket.count, "candidate bucket");
    }

    let plain_sq = color_threshold * color_threshold;
    let edge_threshold = color_threshold * EDGE_THRESHOLD_SCALE;
    let edge_sq = edge_threshold * edge_threshold;

    let mut background_pixels = 0_u64;
    let mask = GrayImage::from_fn(w, h, |x, y| {
        let is_edge = edges[y as usize * w as usize + x as usize];
        let limit = if is_edge { edge_sq } else { plain_sq };
        let pixel = *image.get_pixel(x, y);
        let matches = centers
            .iter()
            .any(|&center| distance_squared(pixel, center) < limit);
        if matches && !is_edge {
            background_pixels += 1;
            image::Luma([0])
        } else {
            image::Luma([255])
        }
    });

    let edge_pixels = edges.iter().filter(|&&e| e).count() as u64;
    tracing::debug!(
        candidates = candidates.len(),
        dominant = centers.len(),
        edge_pixels,
        background_pixels,
        "color histogram classification",
    );

    Classification {
        mask,
        candidates,
        edge_pixels,
        background_pixels,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn solid(w: u32, h: u32, rgb: [u8; 3]) -> RgbaImage {
        RgbaImage::from_pixel(w, h, image::Rgba([rgb[0], rgb[1], rgb[2], 255]))
    }

    fn mask_values(mask: &GrayImage) -> Vec<u8> {
        mask.pixels().map(|p| p.0[0]).collect()
    }

    // --- BucketKey ---

    #[test]
    fn bucket_key_quantizes_by_eight() {
        assert_eq!(BucketKey::from_rgb(0, 7, 8).levels(), [0, 0, 1]);
        assert_eq!(BucketKey::from_rgb(255, 128, 9).levels(), [31, 16, 1]);
    }

    #[test]
    fn nearby_colors_share_a_bucket() {
        assert_eq!(BucketKey::from_rgb(16, 16, 16), BucketKey::from_rgb(23, 20, 17));
        assert_ne!(BucketKey::from_rgb(15, 16, 16), BucketKey::from_rgb(16, 16, 16));
    }

    #[test]
    fn bucket_center_is_mid_bucket() {
        assert_eq!(BucketKey::from_rgb(0, 0, 0).center(), [4.0, 4.0, 4.0]);
        assert_eq!(BucketKey::from_rgb(255, 0, 8).center(), [252.0, 4.0, 12.0]);
    }

    // --- ColorHistogram ---

    #[test]
    fn histogram_counts_and_ranks() {
        let mut hist = ColorHistogram::new();
        let red = BucketKey::from_rgb(255, 0, 0);
        let blue = BucketKey::from_rgb(0, 0, 255);
        for _ in 0..3 {
            hist.add(red);
        }
        hist.add(blue);

        assert_eq!(hist.count(red), 3);
        assert_eq!(hist.count(blue), 1);
        assert_eq!(hist.sampled(), 4);

        let top = hist.most_frequent(5);
        assert_eq!(top.len(), 2);
        assert_eq!(top[0], ColorBucket { key: red, count: 3 });
        assert_eq!(top[1], ColorBucket { key: blue, count: 1 });
    }

    #[test]
    fn most_frequent_breaks_ties_by_key() {
        let mut hist = ColorHistogram::new();
        let a = BucketKey::from_rgb(0, 0, 8);
        let b = BucketKey::from_rgb(0, 0, 0);
        hist.add(a);
        hist.add(b);
        let top = hist.most_frequent(1);
        assert_eq!(top[0].key, b);
    }

    #[test]
    fn most_frequent_truncates() {
        let mut hist = ColorHistogram::new();
        for level in 0..10_u8 {
            hist.add(BucketKey::from_rgb(level * 8, 0, 0));
        }
        assert_eq!(hist.most_frequent(CANDIDATE_COUNT).len(), CANDIDATE_COUNT);
    }

    // --- classify ---

    #[test]
    fn uniform_image_is_all_background() {
        let result = classify(&solid(4, 4, [255, 0, 0]), 40.0);
        assert!(mask_values(&result.mask).iter().all(|&v| v == 0));
        assert_eq!(result.edge_pixels, 0);
        assert_eq!(result.background_pixels, 16);
        assert_eq!(result.candidates.len(), 1);
    }

    #[test]
    fn image_without_interior_is_all_foreground() {
        let result = classify(&solid(2, 2, [10, 10, 10]), 40.0);
        assert!(mask_values(&result.mask).iter().all(|&v| v == 255));
        assert!(result.candidates.is_empty());
    }

    #[test]
    fn rare_color_is_not_background() {
        // 10x10 black with one interior pixel that is dark blue: the blue
        // bucket holds 1 of 100 pixels, far below 5%.
        let mut img = solid(10, 10, [0, 0, 0]);
        img.put_pixel(2, 2, image::Rgba([0, 0, 60, 255]));
        let result = classify(&img, 40.0);
        assert_eq!(result.mask.get_pixel(2, 2).0[0], 255);
        assert_eq!(result.mask.get_pixel(7, 7).0[0], 0);
    }

    /// 20x20 gray image with `n` interior pixels of a slightly bluer gray.
    ///
    /// The two colors fall in different buckets 16 apart on the blue
    /// channel. Neighbor differences stay at or below 64, so no pixel is
    /// an edge.
    fn gray_with_tint(n: u32) -> RgbaImage {
        let mut img = solid(20, 20, [100, 100, 100]);
        for i in 0..n {
            img.put_pixel(2 + i % 16, 2 + 2 * (i / 16), image::Rgba([100, 100, 116, 255]));
        }
        img
    }

    #[test]
    fn bucket_at_exactly_five_percent_is_not_background() {
        // 20 of 400 pixels is exactly the share, which must be exceeded.
        let result = classify(&gray_with_tint(20), 10.0);
        assert_eq!(result.edge_pixels, 0);
        assert_eq!(result.mask.get_pixel(2, 2).0[0], 255);
        assert_eq!(result.mask.get_pixel(3, 4).0[0], 255);
        assert_eq!(result.mask.get_pixel(10, 10).0[0], 0);
        assert_eq!(result.background_pixels, 380);
    }

    #[test]
    fn bucket_just_above_five_percent_is_background() {
        let result = classify(&gray_with_tint(21), 10.0);
        assert_eq!(result.edge_pixels, 0);
        assert_eq!(result.mask.get_pixel(2, 2).0[0], 0);
        assert_eq!(result.mask.get_pixel(6, 4).0[0], 0);
        assert_eq!(result.background_pixels, 400);
    }

    #[test]
    fn edge_pixels_are_forced_to_foreground() {
        // White pixel at (5, 5) on black: its neighbors differ by 765 per
        // side, so it and the four adjacent pixels are edges.
        let mut img = solid(10, 10, [0, 0, 0]);
        img.put_pixel(5, 5, image::Rgba([255, 255, 255, 255]));
        let result = classify(&img, 40.0);

        for (x, y) in [(5, 5), (4, 5), (6, 5), (5, 4), (5, 6)] {
            assert_eq!(result.mask.get_pixel(x, y).0[0], 255, "({x}, {y})");
        }
        // Diagonal neighbors are not 4-adjacent and stay background.
        assert_eq!(result.mask.get_pixel(4, 4).0[0], 0);
        assert_eq!(result.edge_pixels, 5);
    }

    #[test]
    fn border_pixels_are_classified_but_never_edges() {
        // A bright border column is not part of the histogram sample but
        // is still compared against the dominant color.
        let img = RgbaImage::from_fn(8, 8, |x, _| {
            if x == 0 {
                image::Rgba([250, 250, 250, 255])
            } else {
                image::Rgba([20, 20, 20, 255])
            }
        });
        let result = classify(&img, 40.0);
        assert_eq!(result.mask.get_pixel(0, 4).0[0], 255);
        assert_eq!(result.mask.get_pixel(7, 4).0[0], 0);
        // Column 1 is interior and differs from the border by 690.
        assert_eq!(result.mask.get_pixel(1, 4).0[0], 255);
    }

    #[test]
    fn color_threshold_controls_match_distance() {
        // Black image with a dark red border column. The border is not
        // sampled, so black is the only candidate; (30, 0, 0) is ~26.6
        // from the black bucket center (4, 4, 4).
        let img = RgbaImage::from_fn(12, 12, |x, _| {
            if x == 11 {
                image::Rgba([30, 0, 0, 255])
            } else {
                image::Rgba([0, 0, 0, 255])
            }
        });
        let tight = classify(&img, 10.0);
        let loose = classify(&img, 80.0);
        assert_eq!(tight.mask.get_pixel(11, 5).0[0], 255);
        assert_eq!(loose.mask.get_pixel(11, 5).0[0], 0);
        assert_eq!(tight.edge_pixels, 0);
    }

    #[test]
    fn mask_matches_image_dimensions() {
        let result = classify(&solid(17, 9, [1, 2, 3]), 40.0);
        assert_eq!(result.mask.dimensions(), (17, 9));
    }
}
