//! kirinuki-pipeline: Heuristic background removal (sans-IO).
//!
//! Turns a decoded RGBA raster into a cutout whose alpha channel marks
//! the subject through:
//! validate -> color histogram classification -> Sobel edge refinement ->
//! morphological opening -> alpha compositing -> optional feathering and
//! contrast refinement.
//!
//! This crate has **no I/O dependencies** -- it operates on in-memory
//! pixel buffers and returns structured data. Decoding, encoding and all
//! browser/filesystem interaction live in `kirinuki-bench` and
//! `kirinuki-worker`.

pub mod composite;
pub mod contrast;
pub mod diagnostics;
pub mod feather;
pub mod histogram;
pub mod morphology;
pub mod observer;
pub mod pipeline;
pub mod sobel;
pub mod types;

pub use observer::{StageObserver, process_with_observer};
pub use pipeline::{Pipeline, STAGE_COUNT};
pub use types::{
    BorderPolicy, Dimensions, GrayImage, PipelineConfig, PipelineError, PostProcessOrder,
    RgbaImage, SegmentationMethod, StagedResult,
};

/// Run the full pipeline and return every intermediate result.
///
/// The caller's `pixels` are copied into the pipeline and never
/// modified.
///
/// # Errors
///
/// Returns [`PipelineError::InvalidDimensions`] if width or height is
/// below 2, [`PipelineError::InvalidBuffer`] if `pixels.len()` is not
/// `width * height * 4`, and [`PipelineError::UnsupportedConfiguration`]
/// if a config parameter is out of range.
pub fn process_staged(
    pixels: &[u8],
    width: u32,
    height: u32,
    config: &PipelineConfig,
) -> Result<StagedResult, PipelineError> {
    Ok(Pipeline::new(pixels.to_vec(), width, height, config.clone())
        .validate()?
        .classify()
        .refine_edges()
        .clean()
        .composite()
        .post_process()
        .into_result())
}

/// Run the full pipeline and return the final RGBA bytes.
///
/// The result has the same length and pixel order as `pixels`; only the
/// alpha bytes differ.
///
/// # Errors
///
/// See [`process_staged`].
pub fn process(
    pixels: &[u8],
    width: u32,
    height: u32,
    config: &PipelineConfig,
) -> Result<Vec<u8>, PipelineError> {
    Ok(process_image_owned(
        Pipeline::new(pixels.to_vec(), width, height, config.clone()),
    )?
    .into_raw())
}

/// Run the full pipeline on an already-decoded image.
///
/// Takes ownership of `image`, so no staging copy is made.
///
/// # Errors
///
/// See [`process_staged`].
pub fn process_image(image: RgbaImage, config: &PipelineConfig) -> Result<RgbaImage, PipelineError> {
    process_image_owned(Pipeline::from_image(image, config.clone()))
}

fn process_image_owned(pending: pipeline::Pending) -> Result<RgbaImage, PipelineError> {
    Ok(pending
        .validate()?
        .classify()
        .refine_edges()
        .clean()
        .composite()
        .post_process()
        .into_output())
}
