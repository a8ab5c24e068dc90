//! Incremental pipeline: advance stage-by-stage, inspecting each
//! intermediate result before continuing.
//!
//! Unlike [`crate::process_staged`] which runs the entire pipeline in one
//! call, [`Pipeline`] lets the caller drive execution one step at a time:
//!
//! ```rust
//! # use kirinuki_pipeline::{Pipeline, PipelineConfig, PipelineError};
//! # fn run(pixels: Vec<u8>, width: u32, height: u32) -> Result<(), PipelineError> {
//! let config = PipelineConfig::default();
//! let pipeline = Pipeline::new(pixels, width, height, config)
//!     .validate()?
//!     .classify()
//!     .refine_edges()
//!     .clean()
//!     .composite()
//!     .post_process();
//!
//! let staged = pipeline.into_result();
//! # Ok(())
//! # }
//! ```
//!
//! Each stage method consumes `self` and returns the next pipeline state
//! (or `Result` for the single fallible stage), carrying all previously
//! computed intermediates. All preconditions are checked by
//! [`Pending::validate`], so nothing downstream can fail and no stage
//! ever runs on invalid input.
//!
//! # Memory
//!
//! Every stage from [`Classified`] onward retains the input buffer and
//! each mask snapshot alongside the working data. For a 1000×1000 source
//! image this is roughly 15 MB pinned in memory until
//! [`Finished::into_result`] consumes the final stage. [`StagedResult`]
//! needs every intermediate for previews and diagnostics.
//!
//! Callers that only need the final buffer should prefer
//! [`crate::process`], which discards the intermediates.

use crate::composite::{self, AlphaCoverage};
use crate::contrast;
use crate::diagnostics::StageMetrics;
use crate::feather;
use crate::histogram::{self, ColorBucket};
use crate::morphology;
use crate::sobel::{self, EdgeRefinement};
use crate::types::{
    Dimensions, GrayImage, PipelineConfig, PipelineError, PostProcessOrder, RgbaImage,
    SegmentationMethod, StagedResult,
};

/// Smallest width and height the pipeline accepts.
pub const MIN_DIMENSION: u32 = 2;

// ───────────────────────── Stage 0: Pending ──────────────────────────

/// Pipeline state before any processing has occurred.
///
/// The caller's pixel bytes and config are stored but not yet checked.
/// Call [`validate`](Self::validate) to advance to the next stage.
#[must_use = "pipeline stages are consumed by advancing; call .validate() to continue"]
pub struct Pending {
    config: PipelineConfig,
    pixels: Vec<u8>,
    dimensions: Dimensions,
}

impl Pending {
    /// The raw RGBA bytes as supplied.
    #[must_use]
    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    /// The declared dimensions.
    #[must_use]
    pub const fn dimensions(&self) -> Dimensions {
        self.dimensions
    }

    /// Check every precondition and advance to the [`Validated`] stage.
    ///
    /// Dimensions are checked first, then the buffer length, then the
    /// configuration ranges.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::InvalidDimensions`] if width or height is
    /// below [`MIN_DIMENSION`], [`PipelineError::InvalidBuffer`] if the
    /// byte count is not `width * height * 4`, and
    /// [`PipelineError::UnsupportedConfiguration`] if a parameter is out
    /// of range.
    pub fn validate(self) -> Result<Validated, PipelineError> {
        let Dimensions { width, height } = self.dimensions;
        if width < MIN_DIMENSION || height < MIN_DIMENSION {
            return Err(PipelineError::InvalidDimensions { width, height });
        }

        // Saturates when the byte count exceeds `u64`, which no buffer can match.
        let expected = self.dimensions.pixel_count().saturating_mul(4);
        let actual = self.pixels.len() as u64;
        let invalid_buffer = PipelineError::InvalidBuffer {
            width,
            height,
            expected,
            actual,
        };
        if actual != expected {
            return Err(invalid_buffer);
        }

        self.config.validate()?;

        let original = RgbaImage::from_raw(width, height, self.pixels).ok_or(invalid_buffer)?;

        if self.config.method == SegmentationMethod::Ai {
            tracing::warn!("learned segmentation is not available, using the auto heuristic");
        }
        tracing::debug!(width, height, method = %self.config.method, "input validated");

        Ok(Validated {
            config: self.config,
            original,
            dimensions: self.dimensions,
        })
    }
}

// ───────────────────────── Stage 1: Validated ────────────────────────

/// Pipeline state after validation.
///
/// The pixel bytes now live in an owned [`RgbaImage`] that later stages
/// never modify. Call [`classify`](Self::classify) to advance.
#[must_use = "pipeline stages are consumed by advancing; call .classify() to continue"]
pub struct Validated {
    config: PipelineConfig,
    original: RgbaImage,
    dimensions: Dimensions,
}

impl Validated {
    /// The validated input image.
    #[must_use]
    pub const fn original(&self) -> &RgbaImage {
        &self.original
    }

    /// Metrics for this always-run stage.
    pub(crate) fn stage_metrics(&self) -> StageMetrics {
        StageMetrics::Validate {
            width: self.dimensions.width,
            height: self.dimensions.height,
            pixel_count: self.dimensions.pixel_count(),
            method: self.config.method.to_string(),
        }
    }

    /// Advance to the color histogram classification stage.
    pub fn classify(self) -> Classified {
        let classification = histogram::classify(&self.original, self.config.color_threshold);
        Classified {
            config: self.config,
            original: self.original,
            mask: classification.mask,
            candidates: classification.candidates,
            edge_pixels: classification.edge_pixels,
            background_pixels: classification.background_pixels,
            dimensions: self.dimensions,
        }
    }
}

// ───────────────────────── Stage 2: Classified ───────────────────────

/// Pipeline state after color histogram classification.
///
/// Call [`refine_edges`](Self::refine_edges) to advance.
#[must_use = "pipeline stages are consumed by advancing; call .refine_edges() to continue"]
pub struct Classified {
    config: PipelineConfig,
    original: RgbaImage,
    mask: GrayImage,
    candidates: Vec<ColorBucket>,
    edge_pixels: u64,
    background_pixels: u64,
    dimensions: Dimensions,
}

impl Classified {
    /// The initial binary mask.
    #[must_use]
    pub const fn mask(&self) -> &GrayImage {
        &self.mask
    }

    /// Candidate background buckets, most frequent first.
    #[must_use]
    pub fn candidates(&self) -> &[ColorBucket] {
        &self.candidates
    }

    pub(crate) fn stage_metrics(&self) -> StageMetrics {
        StageMetrics::Classify {
            color_threshold: self.config.color_threshold,
            candidate_buckets: self.candidates.len(),
            edge_pixel_count: self.edge_pixels,
            background_pixel_count: self.background_pixels,
            total_pixel_count: self.dimensions.pixel_count(),
        }
    }

    /// Advance to the Sobel edge refinement stage.
    ///
    /// When the configured method skips refinement, the mask passes
    /// through unchanged.
    pub fn refine_edges(self) -> EdgesRefined {
        let mut refined = self.mask.clone();
        let refinement = self.config.method.refines_edges().then(|| {
            sobel::refine(&self.original, &mut refined, self.config.edge_sensitivity)
        });
        EdgesRefined {
            config: self.config,
            original: self.original,
            classified: self.mask,
            mask: refined,
            refinement,
            dimensions: self.dimensions,
        }
    }
}

// ───────────────────────── Stage 3: EdgesRefined ─────────────────────

/// Pipeline state after Sobel edge refinement.
///
/// Call [`clean`](Self::clean) to advance.
#[must_use = "pipeline stages are consumed by advancing; call .clean() to continue"]
pub struct EdgesRefined {
    config: PipelineConfig,
    original: RgbaImage,
    classified: GrayImage,
    mask: GrayImage,
    refinement: Option<EdgeRefinement>,
    dimensions: Dimensions,
}

impl EdgesRefined {
    /// The refined mask.
    #[must_use]
    pub const fn mask(&self) -> &GrayImage {
        &self.mask
    }

    /// Whether refinement actually ran.
    #[must_use]
    pub const fn applied(&self) -> bool {
        self.refinement.is_some()
    }

    /// Advance to the morphological cleaning stage.
    ///
    /// When the configured method skips cleaning, the mask passes
    /// through unchanged.
    pub fn clean(self) -> Cleaned {
        let mut cleaned = self.mask.clone();
        let counts = self
            .config
            .method
            .cleans_mask()
            .then(|| morphology::clean(&mut cleaned, self.config.border_policy));
        Cleaned {
            config: self.config,
            original: self.original,
            classified: self.classified,
            refined: self.mask,
            mask: cleaned,
            counts,
            dimensions: self.dimensions,
        }
    }
}

// ───────────────────────── Stage 4: Cleaned ──────────────────────────

/// Pipeline state after morphological opening.
///
/// Every mask value is exactly 0 or 255 at this point. Call
/// [`composite`](Self::composite) to advance.
#[must_use = "pipeline stages are consumed by advancing; call .composite() to continue"]
pub struct Cleaned {
    config: PipelineConfig,
    original: RgbaImage,
    classified: GrayImage,
    refined: GrayImage,
    mask: GrayImage,
    /// Foreground pixel counts before and after opening.
    counts: Option<(u64, u64)>,
    dimensions: Dimensions,
}

impl Cleaned {
    /// The cleaned mask.
    #[must_use]
    pub const fn mask(&self) -> &GrayImage {
        &self.mask
    }

    /// Whether cleaning actually ran.
    #[must_use]
    pub const fn applied(&self) -> bool {
        self.counts.is_some()
    }

    /// Advance to the alpha compositing stage.
    pub fn composite(self) -> Composited {
        let mut composited = self.original.clone();
        let coverage = composite::apply_mask(&mut composited, &self.mask);
        Composited {
            config: self.config,
            original: self.original,
            classified: self.classified,
            refined: self.refined,
            cleaned: self.mask,
            composited,
            coverage,
            dimensions: self.dimensions,
        }
    }
}

// ───────────────────────── Stage 5: Composited ───────────────────────

/// Pipeline state after writing the mask into the alpha channel.
///
/// Call [`post_process`](Self::post_process) to advance to the final
/// stage.
#[must_use = "pipeline stages are consumed by advancing; call .post_process() to continue"]
pub struct Composited {
    config: PipelineConfig,
    original: RgbaImage,
    classified: GrayImage,
    refined: GrayImage,
    cleaned: GrayImage,
    composited: RgbaImage,
    coverage: AlphaCoverage,
    dimensions: Dimensions,
}

impl Composited {
    /// The composited image.
    #[must_use]
    pub const fn composited(&self) -> &RgbaImage {
        &self.composited
    }

    pub(crate) fn stage_metrics(&self) -> StageMetrics {
        StageMetrics::Composite {
            transparent_pixel_count: self.coverage.transparent_pixels,
            opaque_pixel_count: self.coverage.opaque_pixels,
            total_pixel_count: self.dimensions.pixel_count(),
        }
    }

    /// Advance to the post-processing stage, the final pipeline step.
    ///
    /// Applies feathering and/or contrast refinement when enabled, in
    /// the order chosen by `config.post_process_order`. With neither
    /// enabled the composited image passes through unchanged.
    pub fn post_process(self) -> Finished {
        let mut output = self.composited.clone();
        let mut feathered = None;
        let mut refined = None;

        let feather_first = self.config.post_process_order == PostProcessOrder::FeatherFirst;
        for feather_step in [feather_first, !feather_first] {
            if feather_step && self.config.feather_edges {
                feathered = Some(feather::feather(&mut output, self.config.feather_amount));
            } else if !feather_step && self.config.refine_mask {
                refined = Some(contrast::refine(&mut output, self.config.mask_contrast));
            }
        }

        Finished {
            config: self.config,
            original: self.original,
            classified: self.classified,
            refined: self.refined,
            cleaned: self.cleaned,
            composited: self.composited,
            output,
            feathered,
            contrast_refined: refined,
            dimensions: self.dimensions,
        }
    }
}

// ───────────────────────── Stage 6: Finished ─────────────────────────

/// Pipeline state after post-processing (the final stage).
///
/// Call [`into_result`](Self::into_result) to extract the
/// [`StagedResult`] containing all intermediates.
#[must_use = "call .into_result() to extract the StagedResult"]
pub struct Finished {
    config: PipelineConfig,
    original: RgbaImage,
    classified: GrayImage,
    refined: GrayImage,
    cleaned: GrayImage,
    composited: RgbaImage,
    output: RgbaImage,
    feathered: Option<u64>,
    contrast_refined: Option<u64>,
    dimensions: Dimensions,
}

impl Finished {
    /// The final cutout image.
    #[must_use]
    pub const fn cutout(&self) -> &RgbaImage {
        &self.output
    }

    /// Image dimensions.
    #[must_use]
    pub const fn dimensions(&self) -> Dimensions {
        self.dimensions
    }

    /// Consume the pipeline and return only the final cutout image.
    #[must_use]
    pub fn into_output(self) -> RgbaImage {
        self.output
    }

    /// Consume the pipeline and return the full [`StagedResult`].
    #[must_use]
    pub fn into_result(self) -> StagedResult {
        StagedResult {
            original: self.original,
            classified: self.classified,
            refined: self.refined,
            cleaned: self.cleaned,
            composited: self.composited,
            output: self.output,
            dimensions: self.dimensions,
        }
    }
}

// ──────────────────── PipelineStage trait + Stage enum ────────────────

/// Total number of stages in the pipeline.
pub const STAGE_COUNT: usize = 7;

/// The output produced by a single pipeline stage.
///
/// Each variant borrows the data that the corresponding stage computed.
#[must_use]
pub enum StageOutput<'a> {
    /// Raw input bytes (not yet validated).
    Source {
        /// The RGBA bytes.
        pixels: &'a [u8],
        /// Declared dimensions.
        dimensions: Dimensions,
    },
    /// Validated input image.
    Validated {
        /// The input image.
        original: &'a RgbaImage,
    },
    /// Color histogram classification result.
    Classified {
        /// The initial mask.
        mask: &'a GrayImage,
    },
    /// Sobel refinement result.
    EdgesRefined {
        /// The refined mask.
        mask: &'a GrayImage,
    },
    /// Morphological cleaning result.
    Cleaned {
        /// The cleaned mask.
        mask: &'a GrayImage,
    },
    /// Alpha compositing result.
    Composited {
        /// The composited image.
        image: &'a RgbaImage,
    },
    /// Post-processing result.
    Finished {
        /// The final cutout image.
        image: &'a RgbaImage,
        /// Image dimensions.
        dimensions: Dimensions,
    },
}

/// Trait implemented by every pipeline stage, enabling uniform iteration.
///
/// Each stage struct implements it, and [`Stage`] delegates to whichever
/// variant it holds.
///
/// # Loop pattern
///
/// ```rust
/// # use kirinuki_pipeline::{Pipeline, PipelineConfig, PipelineError};
/// # use kirinuki_pipeline::pipeline::{Stage, PipelineStage, Advance};
/// # fn run(pixels: Vec<u8>) -> Result<(), PipelineError> {
/// let mut stage: Stage = Pipeline::new(pixels, 4, 4, PipelineConfig::default()).into();
/// loop {
///     match stage.advance()? {
///         Advance::Next(next) => stage = next,
///         Advance::Complete(done) => { stage = done; break; }
///     }
/// }
/// let result = stage.complete()?;
/// # Ok(())
/// # }
/// ```
pub trait PipelineStage: Sized {
    /// Human-readable name of this stage (e.g. `"source"`, `"classify"`).
    const NAME: &str;

    /// Zero-based index of this stage (`0` for Pending through `6` for
    /// Finished).
    const INDEX: usize;

    /// The output this stage produced.
    fn output(&self) -> StageOutput<'_>;

    /// Stage-specific metrics for diagnostics.
    ///
    /// Returns `None` for the initial [`Pending`] stage and for optional
    /// stages that the configuration skipped.
    fn metrics(&self) -> Option<StageMetrics>;

    /// Advance to the next stage.
    ///
    /// Returns `Ok(Some(stage))` on success, `Ok(None)` if already at
    /// the final stage, or `Err` if validation fails.
    ///
    /// # Errors
    ///
    /// Returns the precondition errors of [`Pending::validate`].
    fn next(self) -> Result<Option<Stage>, PipelineError>;

    /// Run all remaining stages to completion and return the final
    /// [`StagedResult`].
    ///
    /// # Errors
    ///
    /// Returns the precondition errors of [`Pending::validate`] if
    /// validation has not yet run.
    fn complete(self) -> Result<StagedResult, PipelineError>;
}

impl PipelineStage for Pending {
    const NAME: &str = "source";
    const INDEX: usize = 0;

    fn output(&self) -> StageOutput<'_> {
        StageOutput::Source {
            pixels: &self.pixels,
            dimensions: self.dimensions,
        }
    }

    fn metrics(&self) -> Option<StageMetrics> {
        None
    }

    fn next(self) -> Result<Option<Stage>, PipelineError> {
        Ok(Some(Stage::Validated(self.validate()?)))
    }

    fn complete(self) -> Result<StagedResult, PipelineError> {
        self.validate()?.complete()
    }
}

impl PipelineStage for Validated {
    const NAME: &str = "validate";
    const INDEX: usize = 1;

    fn output(&self) -> StageOutput<'_> {
        StageOutput::Validated {
            original: &self.original,
        }
    }

    fn metrics(&self) -> Option<StageMetrics> {
        Some(self.stage_metrics())
    }

    fn next(self) -> Result<Option<Stage>, PipelineError> {
        Ok(Some(Stage::Classified(self.classify())))
    }

    fn complete(self) -> Result<StagedResult, PipelineError> {
        self.classify().complete()
    }
}

impl PipelineStage for Classified {
    const NAME: &str = "classify";
    const INDEX: usize = 2;

    fn output(&self) -> StageOutput<'_> {
        StageOutput::Classified { mask: &self.mask }
    }

    fn metrics(&self) -> Option<StageMetrics> {
        Some(self.stage_metrics())
    }

    fn next(self) -> Result<Option<Stage>, PipelineError> {
        Ok(Some(Stage::EdgesRefined(self.refine_edges())))
    }

    fn complete(self) -> Result<StagedResult, PipelineError> {
        self.refine_edges().complete()
    }
}

impl PipelineStage for EdgesRefined {
    const NAME: &str = "edges";
    const INDEX: usize = 3;

    fn output(&self) -> StageOutput<'_> {
        StageOutput::EdgesRefined { mask: &self.mask }
    }

    fn metrics(&self) -> Option<StageMetrics> {
        let refinement = self.refinement?;
        Some(StageMetrics::EdgeRefine {
            threshold: 255.0 * self.config.edge_sensitivity,
            strong_edge_pixel_count: refinement.strong_edge_pixels,
            promoted_pixel_count: refinement.promoted_pixels,
        })
    }

    fn next(self) -> Result<Option<Stage>, PipelineError> {
        Ok(Some(Stage::Cleaned(self.clean())))
    }

    fn complete(self) -> Result<StagedResult, PipelineError> {
        self.clean().complete()
    }
}

impl PipelineStage for Cleaned {
    const NAME: &str = "clean";
    const INDEX: usize = 4;

    fn output(&self) -> StageOutput<'_> {
        StageOutput::Cleaned { mask: &self.mask }
    }

    fn metrics(&self) -> Option<StageMetrics> {
        let (foreground_before, foreground_after) = self.counts?;
        Some(StageMetrics::Clean {
            border_policy: self.config.border_policy.to_string(),
            foreground_before,
            foreground_after,
        })
    }

    fn next(self) -> Result<Option<Stage>, PipelineError> {
        Ok(Some(Stage::Composited(self.composite())))
    }

    fn complete(self) -> Result<StagedResult, PipelineError> {
        self.composite().complete()
    }
}

impl PipelineStage for Composited {
    const NAME: &str = "composite";
    const INDEX: usize = 5;

    fn output(&self) -> StageOutput<'_> {
        StageOutput::Composited {
            image: &self.composited,
        }
    }

    fn metrics(&self) -> Option<StageMetrics> {
        Some(self.stage_metrics())
    }

    fn next(self) -> Result<Option<Stage>, PipelineError> {
        Ok(Some(Stage::Finished(self.post_process())))
    }

    fn complete(self) -> Result<StagedResult, PipelineError> {
        Ok(self.post_process().into_result())
    }
}

impl PipelineStage for Finished {
    const NAME: &str = "post";
    const INDEX: usize = 6;

    fn output(&self) -> StageOutput<'_> {
        StageOutput::Finished {
            image: &self.output,
            dimensions: self.dimensions,
        }
    }

    fn metrics(&self) -> Option<StageMetrics> {
        if self.feathered.is_none() && self.contrast_refined.is_none() {
            return None;
        }
        Some(StageMetrics::PostProcess {
            feathered_pixel_count: self.feathered,
            refined_pixel_count: self.contrast_refined,
            order: match self.config.post_process_order {
                PostProcessOrder::FeatherFirst => "feather-first".to_string(),
                PostProcessOrder::RefineFirst => "refine-first".to_string(),
            },
        })
    }

    fn next(self) -> Result<Option<Stage>, PipelineError> {
        Ok(None)
    }

    fn complete(self) -> Result<StagedResult, PipelineError> {
        Ok(self.into_result())
    }
}

/// Enum wrapping all pipeline stages for uniform, loopable access.
///
/// Use [`From`] conversions to enter the dynamic API from any typed
/// stage, then call [`advance`](Self::advance) in a loop. Stage
/// boundaries are the only points where a driver can stop a run: see
/// [`crate::observer`].
#[must_use]
pub enum Stage {
    /// See [`Pending`].
    Pending(Pending),
    /// See [`Validated`].
    Validated(Validated),
    /// See [`Classified`].
    Classified(Classified),
    /// See [`EdgesRefined`].
    EdgesRefined(EdgesRefined),
    /// See [`Cleaned`].
    Cleaned(Cleaned),
    /// See [`Composited`].
    Composited(Composited),
    /// See [`Finished`].
    Finished(Finished),
}

/// Compile-time guard: if a [`Stage`] variant is added, this match becomes
/// non-exhaustive and the build fails as a reminder to bump [`STAGE_COUNT`].
#[allow(dead_code, clippy::match_same_arms)]
const fn _stage_count_guard(s: &Stage) {
    match s {
        Stage::Pending(_)
        | Stage::Validated(_)
        | Stage::Classified(_)
        | Stage::EdgesRefined(_)
        | Stage::Cleaned(_)
        | Stage::Composited(_)
        | Stage::Finished(_) => {}
    }
}

/// Result of [`Stage::advance`]: either the next stage or the
/// completed final stage returned unchanged.
#[must_use]
pub enum Advance {
    /// The pipeline advanced to this next stage.
    Next(Stage),
    /// The pipeline was already at the final stage and is returned unchanged.
    Complete(Stage),
}

/// Delegate a method call to whichever `Stage` variant is active.
macro_rules! delegate {
    ($self:ident, $method:ident $(, $arg:expr)*) => {
        match $self {
            Self::Pending(s) => s.$method($($arg),*),
            Self::Validated(s) => s.$method($($arg),*),
            Self::Classified(s) => s.$method($($arg),*),
            Self::EdgesRefined(s) => s.$method($($arg),*),
            Self::Cleaned(s) => s.$method($($arg),*),
            Self::Composited(s) => s.$method($($arg),*),
            Self::Finished(s) => s.$method($($arg),*),
        }
    };
}

impl Stage {
    /// Human-readable name of the current stage.
    #[must_use]
    pub fn name(&self) -> &'static str {
        delegate!(self, name)
    }

    /// Zero-based index of the current stage.
    #[must_use]
    pub fn index(&self) -> usize {
        delegate!(self, index)
    }

    /// The output this stage produced.
    pub fn output(&self) -> StageOutput<'_> {
        delegate!(self, output)
    }

    /// Stage-specific metrics for diagnostics.
    #[must_use]
    pub fn metrics(&self) -> Option<StageMetrics> {
        delegate!(self, metrics)
    }

    /// Whether the pipeline is at the final stage.
    #[must_use]
    pub const fn is_complete(&self) -> bool {
        matches!(self, Self::Finished(_))
    }

    /// Advance to the next stage.
    ///
    /// Returns `Ok(Some(next_stage))` on success, `Ok(None)` if
    /// already complete (the `Finished` value is consumed), or `Err` if
    /// validation fails.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError`] if the validation transition fails.
    pub fn next(self) -> Result<Option<Self>, PipelineError> {
        delegate!(self, next)
    }

    /// Advance to the next stage, returning `self` unchanged if
    /// already complete.
    ///
    /// This is the loop-friendly version of [`next`](Self::next).
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError`] if the validation transition fails.
    pub fn advance(self) -> Result<Advance, PipelineError> {
        if self.is_complete() {
            return Ok(Advance::Complete(self));
        }
        // Non-complete stages always return Ok(Some(_)) from next().
        #[allow(clippy::unreachable)]
        let next = self
            .next()?
            .unwrap_or_else(|| unreachable!("non-complete stage returned None from next()"));
        Ok(Advance::Next(next))
    }

    /// Run all remaining stages to completion.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError`] if validation has not yet run and fails.
    pub fn complete(self) -> Result<StagedResult, PipelineError> {
        delegate!(self, complete)
    }
}

// `PipelineStage`'s associated constants aren't callable via `self.NAME`,
// so the delegate macro goes through this helper trait.
trait StageMetadata {
    fn name(&self) -> &'static str;
    fn index(&self) -> usize;
}

impl<T: PipelineStage> StageMetadata for T {
    fn name(&self) -> &'static str {
        T::NAME
    }

    fn index(&self) -> usize {
        T::INDEX
    }
}

impl From<Pending> for Stage {
    fn from(s: Pending) -> Self {
        Self::Pending(s)
    }
}

impl From<Validated> for Stage {
    fn from(s: Validated) -> Self {
        Self::Validated(s)
    }
}

impl From<Classified> for Stage {
    fn from(s: Classified) -> Self {
        Self::Classified(s)
    }
}

impl From<EdgesRefined> for Stage {
    fn from(s: EdgesRefined) -> Self {
        Self::EdgesRefined(s)
    }
}

impl From<Cleaned> for Stage {
    fn from(s: Cleaned) -> Self {
        Self::Cleaned(s)
    }
}

impl From<Composited> for Stage {
    fn from(s: Composited) -> Self {
        Self::Composited(s)
    }
}

impl From<Finished> for Stage {
    fn from(s: Finished) -> Self {
        Self::Finished(s)
    }
}

// ───────────────────── Pipeline entry point ──────────────────────────

/// Incremental segmentation pipeline.
///
/// Created via [`Pipeline::new`], which stores the pixel bytes and
/// config without doing any processing. The caller then chains stage
/// methods to advance through the pipeline:
///
/// ```rust
/// # use kirinuki_pipeline::{Pipeline, PipelineConfig, PipelineError};
/// # fn run(pixels: Vec<u8>) -> Result<(), PipelineError> {
/// let cutout = Pipeline::new(pixels, 64, 48, PipelineConfig::default())
///     .validate()?
///     .classify()
///     .refine_edges()
///     .clean()
///     .composite()
///     .post_process()
///     .into_output();
/// # Ok(())
/// # }
/// ```
///
/// Each stage method consumes the current state and returns the next,
/// making it a compile-time error to skip stages or call them out of
/// order.
pub struct Pipeline;

impl Pipeline {
    /// Create a new pipeline from RGBA bytes, dimensions and config.
    ///
    /// No processing is performed: the bytes and config are simply
    /// stored. The pipeline takes ownership of `pixels`; pass a copy to
    /// keep the caller's buffer untouched.
    #[allow(clippy::new_ret_no_self)]
    pub const fn new(pixels: Vec<u8>, width: u32, height: u32, config: PipelineConfig) -> Pending {
        Pending {
            config,
            pixels,
            dimensions: Dimensions { width, height },
        }
    }

    /// Create a new pipeline from an already-decoded image.
    pub fn from_image(image: RgbaImage, config: PipelineConfig) -> Pending {
        let (width, height) = image.dimensions();
        Self::new(image.into_raw(), width, height, config)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::types::BorderPolicy;

    /// Black square image with a white block in the middle.
    fn block_image(size: u32, lo: u32, hi: u32) -> RgbaImage {
        RgbaImage::from_fn(size, size, |x, y| {
            if (lo..=hi).contains(&x) && (lo..=hi).contains(&y) {
                image::Rgba([255, 255, 255, 255])
            } else {
                image::Rgba([0, 0, 0, 255])
            }
        })
    }

    fn pending(img: RgbaImage, config: PipelineConfig) -> Pending {
        Pipeline::from_image(img, config)
    }

    // ─────────── Typed API tests ─────────────────────────────────

    #[test]
    fn pending_exposes_pixels() {
        let p = pending(block_image(6, 2, 3), PipelineConfig::default());
        assert_eq!(p.pixels().len(), 6 * 6 * 4);
        assert_eq!(
            p.dimensions(),
            Dimensions {
                width: 6,
                height: 6
            }
        );
    }

    #[test]
    fn validate_rejects_small_dimensions() {
        let result = Pipeline::new(vec![0; 4], 1, 1, PipelineConfig::default()).validate();
        assert!(matches!(
            result,
            Err(PipelineError::InvalidDimensions {
                width: 1,
                height: 1
            })
        ));
    }

    #[test]
    fn validate_rejects_zero_rows_before_buffer_check() {
        let result = Pipeline::new(vec![], 8, 0, PipelineConfig::default()).validate();
        assert!(matches!(
            result,
            Err(PipelineError::InvalidDimensions { .. })
        ));
    }

    #[test]
    fn validate_rejects_short_buffer() {
        let result = Pipeline::new(vec![0; 15], 2, 2, PipelineConfig::default()).validate();
        assert!(matches!(
            result,
            Err(PipelineError::InvalidBuffer {
                expected: 16,
                actual: 15,
                ..
            })
        ));
    }

    #[test]
    fn validate_rejects_huge_dimensions_without_overflow() {
        let result = Pipeline::new(vec![0; 16], u32::MAX, u32::MAX, PipelineConfig::default())
            .validate();
        assert!(matches!(
            result,
            Err(PipelineError::InvalidBuffer {
                width: u32::MAX,
                height: u32::MAX,
                expected: u64::MAX,
                actual: 16,
            })
        ));
    }

    #[test]
    fn validate_rejects_bad_config() {
        let config = PipelineConfig {
            mask_contrast: 3.0,
            ..PipelineConfig::default()
        };
        let result = Pipeline::new(vec![0; 16], 2, 2, config).validate();
        assert!(matches!(
            result,
            Err(PipelineError::UnsupportedConfiguration(_))
        ));
    }

    #[test]
    fn validated_exposes_original() {
        let img = block_image(6, 2, 3);
        let validated = pending(img.clone(), PipelineConfig::default())
            .validate()
            .unwrap();
        assert_eq!(validated.original(), &img);
    }

    #[test]
    fn classified_exposes_mask_and_candidates() {
        let classified = pending(block_image(10, 4, 5), PipelineConfig::default())
            .validate()
            .unwrap()
            .classify();
        assert_eq!(classified.mask().dimensions(), (10, 10));
        assert!(!classified.candidates().is_empty());
    }

    #[test]
    fn refine_edges_is_skipped_for_color_method() {
        let config = PipelineConfig {
            method: SegmentationMethod::Color,
            ..PipelineConfig::default()
        };
        let classified = pending(block_image(10, 4, 5), config)
            .validate()
            .unwrap()
            .classify();
        let before = classified.mask().clone();
        let refined = classified.refine_edges();
        assert!(!refined.applied());
        assert_eq!(refined.mask(), &before);
        assert!(refined.metrics().is_none());
    }

    #[test]
    fn clean_is_skipped_for_edge_method() {
        let config = PipelineConfig {
            method: SegmentationMethod::Edge,
            ..PipelineConfig::default()
        };
        let refined = pending(block_image(10, 4, 5), config)
            .validate()
            .unwrap()
            .classify()
            .refine_edges();
        let before = refined.mask().clone();
        let cleaned = refined.clean();
        assert!(!cleaned.applied());
        assert_eq!(cleaned.mask(), &before);
    }

    #[test]
    fn cleaned_mask_is_binary() {
        let img = RgbaImage::from_fn(16, 16, |x, y| {
            #[allow(clippy::cast_possible_truncation)]
            let v = ((x * 37 + y * 91) % 256) as u8;
            image::Rgba([v, v / 2, 255 - v, 255])
        });
        let cleaned = pending(img, PipelineConfig::default())
            .validate()
            .unwrap()
            .classify()
            .refine_edges()
            .clean();
        assert!(cleaned.mask().pixels().all(|p| p.0[0] == 0 || p.0[0] == 255));
    }

    #[test]
    fn composite_writes_alpha_only() {
        let img = block_image(10, 4, 5);
        let composited = pending(img.clone(), PipelineConfig::default())
            .validate()
            .unwrap()
            .classify()
            .refine_edges()
            .clean()
            .composite();
        for (a, b) in img.pixels().zip(composited.composited().pixels()) {
            assert_eq!(a.0[..3], b.0[..3]);
        }
    }

    #[test]
    fn post_process_without_options_is_identity() {
        let composited = pending(block_image(10, 4, 5), PipelineConfig::default())
            .validate()
            .unwrap()
            .classify()
            .refine_edges()
            .clean()
            .composite();
        let expected = composited.composited().clone();
        let finished = composited.post_process();
        assert_eq!(finished.cutout(), &expected);
        assert!(finished.metrics().is_none());
    }

    #[test]
    fn feathering_binary_alpha_is_a_no_op() {
        let config = PipelineConfig {
            feather_edges: true,
            feather_amount: 8,
            ..PipelineConfig::default()
        };
        let composited = pending(block_image(12, 4, 7), config)
            .validate()
            .unwrap()
            .classify()
            .refine_edges()
            .clean()
            .composite();
        let expected = composited.composited().clone();
        let finished = composited.post_process();
        assert_eq!(finished.cutout(), &expected);
        assert!(matches!(
            finished.metrics(),
            Some(StageMetrics::PostProcess {
                feathered_pixel_count: Some(0),
                refined_pixel_count: None,
                ..
            })
        ));
    }

    #[test]
    fn into_result_carries_every_intermediate() {
        let config = PipelineConfig {
            border_policy: BorderPolicy::Clamp,
            ..PipelineConfig::default()
        };
        let staged = pending(block_image(10, 4, 5), config)
            .validate()
            .unwrap()
            .classify()
            .refine_edges()
            .clean()
            .composite()
            .post_process()
            .into_result();
        assert_eq!(staged.classified.dimensions(), (10, 10));
        assert_eq!(staged.refined.dimensions(), (10, 10));
        assert_eq!(staged.cleaned.dimensions(), (10, 10));
        assert_eq!(staged.output, staged.composited);
    }

    // ─────────── Dynamic API tests ───────────────────────────────

    #[test]
    fn stage_loop_visits_every_stage_in_order() {
        let mut stage: Stage = pending(block_image(8, 3, 4), PipelineConfig::default()).into();
        let mut names = vec![stage.name()];
        loop {
            match stage.advance().unwrap() {
                Advance::Next(next) => {
                    assert_eq!(next.index(), names.len());
                    names.push(next.name());
                    stage = next;
                }
                Advance::Complete(done) => {
                    stage = done;
                    break;
                }
            }
        }
        assert_eq!(
            names,
            ["source", "validate", "classify", "edges", "clean", "composite", "post"],
        );
        assert_eq!(names.len(), STAGE_COUNT);
        assert!(stage.is_complete());
        assert!(stage.complete().is_ok());
    }

    #[test]
    fn next_on_final_stage_returns_none() {
        let finished = pending(block_image(8, 3, 4), PipelineConfig::default())
            .validate()
            .unwrap()
            .classify()
            .refine_edges()
            .clean()
            .composite()
            .post_process();
        assert!(Stage::from(finished).next().unwrap().is_none());
    }

    #[test]
    fn advance_propagates_validation_error() {
        let stage: Stage = Pipeline::new(vec![0; 3], 2, 2, PipelineConfig::default()).into();
        assert!(matches!(
            stage.advance(),
            Err(PipelineError::InvalidBuffer { .. })
        ));
    }

    #[test]
    fn complete_from_any_stage_matches_typed_chain() {
        let img = block_image(10, 4, 5);
        let typed = pending(img.clone(), PipelineConfig::default())
            .validate()
            .unwrap()
            .classify()
            .refine_edges()
            .clean()
            .composite()
            .post_process()
            .into_result();
        let classified: Stage = pending(img, PipelineConfig::default())
            .validate()
            .unwrap()
            .classify()
            .into();
        let dynamic = classified.complete().unwrap();
        assert_eq!(typed.output, dynamic.output);
        assert_eq!(typed.cleaned, dynamic.cleaned);
    }

    #[test]
    fn stage_output_variants_match_stage() {
        let stage: Stage = pending(block_image(6, 2, 3), PipelineConfig::default()).into();
        assert!(matches!(stage.output(), StageOutput::Source { .. }));
        let Advance::Next(stage) = stage.advance().unwrap() else {
            unreachable!("validation should succeed");
        };
        assert!(matches!(stage.output(), StageOutput::Validated { .. }));
        let Advance::Next(stage) = stage.advance().unwrap() else {
            unreachable!("classification should follow validation");
        };
        assert!(matches!(stage.output(), StageOutput::Classified { .. }));
    }
}
