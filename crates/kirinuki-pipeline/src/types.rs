//! Shared types for the kirinuki segmentation pipeline.

use std::fmt;
use std::ops::RangeInclusive;

use serde::{Deserialize, Serialize};

/// Re-export `GrayImage` so downstream crates can reference masks
/// without depending on `image` directly.
///
/// A mask holds one byte per pixel: 0 is background, 255 is foreground.
/// Its pixel index `y * width + x` lines up with the RGBA buffer's pixel
/// index (not its byte index).
pub use image::GrayImage;

/// Re-export `RgbaImage` so downstream crates can reference pixel
/// buffers without depending on `image` directly.
pub use image::RgbaImage;

/// Image dimensions in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dimensions {
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
}

impl Dimensions {
    /// Total number of pixels (`width * height`).
    #[must_use]
    pub const fn pixel_count(self) -> u64 {
        self.width as u64 * self.height as u64
    }
}

/// Which family of stages runs between classification and compositing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SegmentationMethod {
    /// Color classification, Sobel refinement, and morphological cleaning.
    #[default]
    Auto,
    /// Color classification and morphological cleaning only.
    Color,
    /// Color classification and Sobel refinement; cleaning is skipped so
    /// thin outlines survive.
    Edge,
    /// Learned segmentation. Not available in this crate: runs the
    /// [`Auto`](Self::Auto) heuristic instead.
    Ai,
}

impl SegmentationMethod {
    /// The method whose stage selection actually runs.
    #[must_use]
    pub const fn effective(self) -> Self {
        match self {
            Self::Ai => Self::Auto,
            other => other,
        }
    }

    /// Whether the Sobel edge refinement stage runs.
    #[must_use]
    pub const fn refines_edges(self) -> bool {
        matches!(self.effective(), Self::Auto | Self::Edge)
    }

    /// Whether the morphological cleaning stage runs.
    #[must_use]
    pub const fn cleans_mask(self) -> bool {
        matches!(self.effective(), Self::Auto | Self::Color)
    }
}

impl fmt::Display for SegmentationMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Auto => f.write_str("auto"),
            Self::Color => f.write_str("color"),
            Self::Edge => f.write_str("edge"),
            Self::Ai => f.write_str("ai"),
        }
    }
}

/// How morphological opening treats the outermost ring of pixels.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BorderPolicy {
    /// Border pixels skip both erosion and dilation and keep their
    /// pre-erosion value.
    #[default]
    Preserve,
    /// Every pixel is processed; the 3x3 neighborhood is clipped at the
    /// image edge.
    Clamp,
}

impl fmt::Display for BorderPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Preserve => f.write_str("preserve"),
            Self::Clamp => f.write_str("clamp"),
        }
    }
}

/// Order of the two optional alpha post-processes when both are enabled.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PostProcessOrder {
    /// Feather first, then contrast-refine.
    #[default]
    FeatherFirst,
    /// Contrast-refine first, then feather.
    RefineFirst,
}

/// Configuration for the segmentation pipeline.
///
/// Immutable for the duration of a run. Serialized with camelCase keys
/// so the browser's settings object deserializes directly, and every
/// field falls back to its default when absent.
///
/// Ranges are checked once by [`validate`](Self::validate) at pipeline
/// entry; stage functions assume validated input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PipelineConfig {
    /// Which stages run. See [`SegmentationMethod`].
    pub method: SegmentationMethod,

    /// Maximum RGB distance from a dominant color for a pixel to count
    /// as background. Edge pixels get 1.5x this value.
    pub color_threshold: f32,

    /// Fraction of 255 a Sobel gradient magnitude must exceed to be a
    /// strong edge. Lower values promote more pixels to foreground.
    pub edge_sensitivity: f32,

    /// Whether to smooth transitional alpha values after compositing.
    pub feather_edges: bool,

    /// Feathering window radius in pixels.
    pub feather_amount: u32,

    /// Whether to contrast-stretch and threshold alpha after compositing.
    pub refine_mask: bool,

    /// Contrast multiplier used by mask refinement.
    pub mask_contrast: f32,

    /// Border handling for morphological cleaning.
    pub border_policy: BorderPolicy,

    /// Order of feathering and refinement when both are enabled.
    pub post_process_order: PostProcessOrder,
}

impl PipelineConfig {
    /// Default [`color_threshold`](Self::color_threshold).
    pub const DEFAULT_COLOR_THRESHOLD: f32 = 40.0;
    /// Valid range for [`color_threshold`](Self::color_threshold).
    pub const COLOR_THRESHOLD_RANGE: RangeInclusive<f32> = 10.0..=80.0;

    /// Default [`edge_sensitivity`](Self::edge_sensitivity).
    pub const DEFAULT_EDGE_SENSITIVITY: f32 = 0.3;
    /// Valid range for [`edge_sensitivity`](Self::edge_sensitivity).
    pub const EDGE_SENSITIVITY_RANGE: RangeInclusive<f32> = 0.1..=1.0;

    /// Default [`feather_amount`](Self::feather_amount).
    pub const DEFAULT_FEATHER_AMOUNT: u32 = 3;
    /// Valid range for [`feather_amount`](Self::feather_amount).
    pub const FEATHER_AMOUNT_RANGE: RangeInclusive<u32> = 1..=8;

    /// Default [`mask_contrast`](Self::mask_contrast).
    pub const DEFAULT_MASK_CONTRAST: f32 = 1.2;
    /// Valid range for [`mask_contrast`](Self::mask_contrast).
    pub const MASK_CONTRAST_RANGE: RangeInclusive<f32> = 0.5..=2.0;

    /// Check every parameter against its documented range.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::UnsupportedConfiguration`] for the first
    /// field that is out of range or not finite.
    pub fn validate(&self) -> Result<(), PipelineError> {
        check_float(
            "colorThreshold",
            self.color_threshold,
            &Self::COLOR_THRESHOLD_RANGE,
        )?;
        check_float(
            "edgeSensitivity",
            self.edge_sensitivity,
            &Self::EDGE_SENSITIVITY_RANGE,
        )?;
        if !Self::FEATHER_AMOUNT_RANGE.contains(&self.feather_amount) {
            return Err(PipelineError::UnsupportedConfiguration(format!(
                "featherAmount = {} is outside {}..={}",
                self.feather_amount,
                Self::FEATHER_AMOUNT_RANGE.start(),
                Self::FEATHER_AMOUNT_RANGE.end(),
            )));
        }
        check_float(
            "maskContrast",
            self.mask_contrast,
            &Self::MASK_CONTRAST_RANGE,
        )
    }
}

fn check_float(name: &str, value: f32, range: &RangeInclusive<f32>) -> Result<(), PipelineError> {
    if value.is_finite() && range.contains(&value) {
        Ok(())
    } else {
        Err(PipelineError::UnsupportedConfiguration(format!(
            "{name} = {value} is outside {}..={}",
            range.start(),
            range.end(),
        )))
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            method: SegmentationMethod::default(),
            color_threshold: Self::DEFAULT_COLOR_THRESHOLD,
            edge_sensitivity: Self::DEFAULT_EDGE_SENSITIVITY,
            feather_edges: false,
            feather_amount: Self::DEFAULT_FEATHER_AMOUNT,
            refine_mask: false,
            mask_contrast: Self::DEFAULT_MASK_CONTRAST,
            border_policy: BorderPolicy::default(),
            post_process_order: PostProcessOrder::default(),
        }
    }
}

/// Result of running the pipeline with all intermediate stage outputs preserved.
///
/// Masks are snapshots taken after each mask stage; stages that were
/// skipped by the configured [`SegmentationMethod`] repeat the previous
/// mask.
///
/// Uses custom `Serialize`/`Deserialize` implementations because
/// `GrayImage` and `RgbaImage` do not implement serde traits. Raster
/// images are serialized as `(width, height, raw_pixels)` tuples.
#[derive(Debug, Clone)]
pub struct StagedResult {
    /// The validated input buffer (a staging copy of the caller's data).
    pub original: RgbaImage,
    /// Mask from color histogram classification.
    pub classified: GrayImage,
    /// Mask after Sobel edge refinement.
    pub refined: GrayImage,
    /// Mask after morphological opening.
    pub cleaned: GrayImage,
    /// Buffer with the cleaned mask written into alpha.
    pub composited: RgbaImage,
    /// Final buffer after optional feathering / contrast refinement.
    pub output: RgbaImage,
    /// Image dimensions in pixels.
    pub dimensions: Dimensions,
}

impl StagedResult {
    /// The final cutout buffer handed to the encoder.
    #[must_use]
    pub const fn final_image(&self) -> &RgbaImage {
        &self.output
    }
}

/// Serde-compatible proxy for `StagedResult`.
#[derive(Serialize, Deserialize)]
struct StagedResultProxy {
    original: (u32, u32, Vec<u8>),
    classified: (u32, u32, Vec<u8>),
    refined: (u32, u32, Vec<u8>),
    cleaned: (u32, u32, Vec<u8>),
    composited: (u32, u32, Vec<u8>),
    output: (u32, u32, Vec<u8>),
    dimensions: Dimensions,
}

fn raster<P: image::Pixel<Subpixel = u8>>(
    image: &image::ImageBuffer<P, Vec<u8>>,
) -> (u32, u32, Vec<u8>) {
    (image.width(), image.height(), image.as_raw().clone())
}

impl Serialize for StagedResult {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let proxy = StagedResultProxy {
            original: raster(&self.original),
            classified: raster(&self.classified),
            refined: raster(&self.refined),
            cleaned: raster(&self.cleaned),
            composited: raster(&self.composited),
            output: raster(&self.output),
            dimensions: self.dimensions,
        };
        proxy.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for StagedResult {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let proxy = StagedResultProxy::deserialize(deserializer)?;

        let rgba = |(w, h, raw): (u32, u32, Vec<u8>), what: &str| -> Result<RgbaImage, D::Error> {
            RgbaImage::from_raw(w, h, raw)
                .ok_or_else(|| serde::de::Error::custom(format!("invalid {what} image dimensions")))
        };
        let gray = |(w, h, raw): (u32, u32, Vec<u8>), what: &str| -> Result<GrayImage, D::Error> {
            GrayImage::from_raw(w, h, raw)
                .ok_or_else(|| serde::de::Error::custom(format!("invalid {what} mask dimensions")))
        };

        Ok(Self {
            original: rgba(proxy.original, "original")?,
            classified: gray(proxy.classified, "classified")?,
            refined: gray(proxy.refined, "refined")?,
            cleaned: gray(proxy.cleaned, "cleaned")?,
            composited: rgba(proxy.composited, "composited")?,
            output: rgba(proxy.output, "output")?,
            dimensions: proxy.dimensions,
        })
    }
}

/// Errors that can occur during pipeline processing.
///
/// All precondition errors are raised before any stage touches pixel
/// data, so a failed run never produces a partial buffer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
pub enum PipelineError {
    /// The pixel buffer length is not `width * height * 4`.
    #[error("pixel buffer has {actual} bytes, expected {expected} for a {width}x{height} RGBA image")]
    InvalidBuffer {
        /// Declared width in pixels.
        width: u32,
        /// Declared height in pixels.
        height: u32,
        /// Required length in bytes.
        expected: u64,
        /// Supplied length in bytes.
        actual: u64,
    },

    /// Width or height is below 2.
    #[error("image dimensions {width}x{height} are too small (minimum is 2x2)")]
    InvalidDimensions {
        /// Declared width in pixels.
        width: u32,
        /// Declared height in pixels.
        height: u32,
    },

    /// A configuration parameter is outside its documented range.
    #[error("unsupported configuration: {0}")]
    UnsupportedConfiguration(String),

    /// A [`StageObserver`](crate::observer::StageObserver) stopped the
    /// run at a stage boundary.
    #[error("processing cancelled after stage `{stage}`")]
    Cancelled {
        /// Name of the last stage that completed.
        stage: String,
    },
}
