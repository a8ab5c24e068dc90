//! Pipeline diagnostics: timing, counts, and other metrics for each stage.
//!
//! These diagnostics are permanent instrumentation intended for
//! threshold tuning and parameter experimentation.
//! [`process_staged_with_diagnostics`] collects them alongside the
//! pipeline results.
//!
//! Duration measurements use [`std::time::Duration`] (platform-agnostic).
//! Timestamps come from a caller-supplied [`Clock`], so the library
//! never touches a platform timer itself.
//!
//! Durations are serialized as fractional seconds (`f64`) for JSON
//! compatibility, since `std::time::Duration` does not implement serde
//! traits.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::morphology::foreground_count;
use crate::pipeline::{Pipeline, PipelineStage};
use crate::types::{PipelineConfig, PipelineError, StagedResult};

/// Serde support for `std::time::Duration` as fractional seconds.
mod duration_serde {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    /// Serialize a `Duration` as fractional seconds (`f64`).
    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        duration.as_secs_f64().serialize(serializer)
    }

    /// Deserialize a `Duration` from fractional seconds (`f64`).
    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(|_| {
            serde::de::Error::custom(
                "duration seconds must be finite, non-negative, and representable as a Duration",
            )
        })
    }
}

/// Source of timestamps for stage timing.
///
/// Native callers back this with `std::time::Instant`; the web worker
/// uses `web_time::Instant`.
pub trait Clock {
    /// Opaque timestamp type.
    type Instant;

    /// The current timestamp.
    fn now(&self) -> Self::Instant;

    /// Time elapsed since `since`.
    fn elapsed(&self, since: &Self::Instant) -> Duration;
}

/// Diagnostics collected from a single pipeline run.
///
/// Each field captures metrics for one logical stage of the pipeline.
/// Stages that are conditionally skipped by the segmentation method or
/// the post-process toggles have `Option` fields that are `None` when
/// the stage did no work.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineDiagnostics {
    /// Stage 1: buffer, dimension and config validation.
    pub validate: StageDiagnostics,
    /// Stage 2: color histogram classification.
    pub classify: StageDiagnostics,
    /// Stage 3: Sobel edge refinement (skipped by `method = color`).
    pub edge_refine: Option<StageDiagnostics>,
    /// Stage 4: morphological opening (skipped by `method = edge`).
    pub clean: Option<StageDiagnostics>,
    /// Stage 5: alpha compositing.
    pub composite: StageDiagnostics,
    /// Stage 6: feathering and/or contrast refinement (only when enabled).
    pub post_process: Option<StageDiagnostics>,
    /// Total wall-clock duration of the entire pipeline (seconds).
    #[serde(with = "duration_serde")]
    pub total_duration: Duration,
    /// Summary counts across all stages.
    pub summary: PipelineSummary,
}

/// Diagnostics for a single pipeline stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageDiagnostics {
    /// Wall-clock duration of this stage (seconds).
    #[serde(with = "duration_serde")]
    pub duration: Duration,
    /// Stage-specific metrics (counts, thresholds, etc.).
    pub metrics: StageMetrics,
}

/// Stage-specific metrics that vary by pipeline stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum StageMetrics {
    /// Validation metrics.
    Validate {
        /// Image width in pixels.
        width: u32,
        /// Image height in pixels.
        height: u32,
        /// Total pixel count (`width * height`).
        pixel_count: u64,
        /// Requested segmentation method.
        method: String,
    },
    /// Color histogram classification metrics.
    Classify {
        /// Color distance threshold used.
        color_threshold: f32,
        /// Number of candidate buckets examined (at most 5).
        candidate_buckets: usize,
        /// Interior pixels flagged as edges by the neighbor test.
        edge_pixel_count: u64,
        /// Pixels classified as background.
        background_pixel_count: u64,
        /// Total pixel count for computing the background share.
        total_pixel_count: u64,
    },
    /// Sobel edge refinement metrics.
    EdgeRefine {
        /// Gradient magnitude threshold (`255 * edge_sensitivity`).
        threshold: f32,
        /// Pixels whose magnitude exceeded the threshold.
        strong_edge_pixel_count: u64,
        /// Background pixels promoted to foreground.
        promoted_pixel_count: u64,
    },
    /// Morphological cleaning metrics.
    Clean {
        /// Border policy used.
        border_policy: String,
        /// Foreground pixels before opening.
        foreground_before: u64,
        /// Foreground pixels after opening.
        foreground_after: u64,
    },
    /// Alpha compositing metrics.
    Composite {
        /// Pixels with alpha 0.
        transparent_pixel_count: u64,
        /// Pixels with alpha 255.
        opaque_pixel_count: u64,
        /// Total pixel count.
        total_pixel_count: u64,
    },
    /// Post-processing metrics.
    PostProcess {
        /// Pixels feathered, when feathering ran.
        feathered_pixel_count: Option<u64>,
        /// Pixels whose alpha changed under contrast refinement, when it ran.
        refined_pixel_count: Option<u64>,
        /// Order the two post-processes ran in.
        order: String,
    },
}

/// High-level summary counts for the entire pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineSummary {
    /// Source image width in pixels.
    pub image_width: u32,
    /// Source image height in pixels.
    pub image_height: u32,
    /// Total pixel count.
    pub pixel_count: u64,
    /// Foreground pixels in the final cleaned mask.
    pub foreground_pixel_count: u64,
    /// Fully transparent pixels in the output image.
    pub transparent_pixel_count: u64,
}

impl PipelineDiagnostics {
    /// Format diagnostics as a human-readable report.
    #[must_use]
    pub fn report(&self) -> String {
        let mut lines = Vec::new();

        lines.push(format!("Pipeline Diagnostics Report\n{}", "=".repeat(60)));
        lines.push(format!(
            "Image: {}x{} ({} pixels)",
            self.summary.image_width, self.summary.image_height, self.summary.pixel_count,
        ));
        lines.push(format!(
            "Total duration: {:.3}ms",
            duration_ms(self.total_duration),
        ));
        lines.push(String::new());

        lines.push(format!(
            "{:<24} {:>10} {:>10}  {}",
            "Stage", "Duration", "% Total", "Details"
        ));
        lines.push("-".repeat(80));

        let total_ms = duration_ms(self.total_duration);

        for (name, diag) in self.stages() {
            let Some(diag) = diag else {
                lines.push(format!("{name:<24} {:>10} {:>10}  skipped", "-", "-"));
                continue;
            };
            let ms = duration_ms(diag.duration);
            let pct = if total_ms > 0.0 {
                ms / total_ms * 100.0
            } else {
                0.0
            };
            let details = format_metrics(&diag.metrics);
            lines.push(format!("{name:<24} {ms:>8.3}ms {pct:>9.1}%  {details}"));
        }

        lines.push(String::new());
        lines.push(format!(
            "Foreground: {}  |  Transparent: {}",
            self.summary.foreground_pixel_count, self.summary.transparent_pixel_count,
        ));

        lines.join("\n")
    }

    /// Every stage in pipeline order, with `None` for skipped stages.
    #[must_use]
    pub fn stages(&self) -> [(&'static str, Option<&StageDiagnostics>); 6] {
        [
            ("Validate", Some(&self.validate)),
            ("Classify", Some(&self.classify)),
            ("Edge Refine", self.edge_refine.as_ref()),
            ("Clean", self.clean.as_ref()),
            ("Composite", Some(&self.composite)),
            ("Post-process", self.post_process.as_ref()),
        ]
    }
}

/// Convert a `Duration` to milliseconds as `f64`.
fn duration_ms(d: Duration) -> f64 {
    d.as_secs_f64() * 1000.0
}

/// Percentage of `part` in `total`, or 0 for an empty total.
#[allow(clippy::cast_precision_loss)]
fn percent(part: u64, total: u64) -> f64 {
    if total > 0 {
        part as f64 / total as f64 * 100.0
    } else {
        0.0
    }
}

/// Format stage metrics into a compact detail string.
fn format_metrics(metrics: &StageMetrics) -> String {
    match metrics {
        StageMetrics::Validate {
            width,
            height,
            method,
            ..
        } => format!("{width}x{height} method={method}"),
        StageMetrics::Classify {
            color_threshold,
            candidate_buckets,
            edge_pixel_count,
            background_pixel_count,
            total_pixel_count,
        } => {
            let share = percent(*background_pixel_count, *total_pixel_count);
            format!(
                "threshold={color_threshold:.1} candidates={candidate_buckets} edges={edge_pixel_count} background={background_pixel_count} ({share:.1}%)",
            )
        }
        StageMetrics::EdgeRefine {
            threshold,
            strong_edge_pixel_count,
            promoted_pixel_count,
        } => format!(
            "threshold={threshold:.1} strong={strong_edge_pixel_count} promoted={promoted_pixel_count}",
        ),
        StageMetrics::Clean {
            border_policy,
            foreground_before,
            foreground_after,
        } => format!("{border_policy} foreground {foreground_before}->{foreground_after}"),
        StageMetrics::Composite {
            transparent_pixel_count,
            opaque_pixel_count,
            total_pixel_count,
        } => {
            let share = percent(*transparent_pixel_count, *total_pixel_count);
            format!(
                "transparent={transparent_pixel_count} ({share:.1}%) opaque={opaque_pixel_count}",
            )
        }
        StageMetrics::PostProcess {
            feathered_pixel_count,
            refined_pixel_count,
            order,
        } => {
            let mut parts = vec![order.clone()];
            if let Some(n) = feathered_pixel_count {
                parts.push(format!("feathered={n}"));
            }
            if let Some(n) = refined_pixel_count {
                parts.push(format!("refined={n}"));
            }
            parts.join(" ")
        }
    }
}

/// Run one stage transition and time it.
fn timed<C: Clock, S>(clock: &C, step: impl FnOnce() -> S) -> (S, Duration) {
    let start = clock.now();
    let stage = step();
    (stage, clock.elapsed(&start))
}

/// Diagnostics for an optional stage, `None` when it did no work.
fn optional<S: PipelineStage>(stage: &S, duration: Duration) -> Option<StageDiagnostics> {
    stage
        .metrics()
        .map(|metrics| StageDiagnostics { duration, metrics })
}

/// Run the full pipeline, timing every stage.
///
/// The caller's `pixels` are copied into the pipeline and never
/// modified.
///
/// # Errors
///
/// Returns the precondition errors of
/// [`Pending::validate`](crate::pipeline::Pending::validate).
pub fn process_staged_with_diagnostics<C: Clock>(
    pixels: &[u8],
    width: u32,
    height: u32,
    config: &PipelineConfig,
    clock: &C,
) -> Result<(StagedResult, PipelineDiagnostics), PipelineError> {
    let total_start = clock.now();
    let pending = Pipeline::new(pixels.to_vec(), width, height, config.clone());

    let (validated, validate_duration) = timed(clock, || pending.validate());
    let validated = validated?;
    let validate = StageDiagnostics {
        duration: validate_duration,
        metrics: validated.stage_metrics(),
    };

    let (classified, duration) = timed(clock, || validated.classify());
    let classify = StageDiagnostics {
        duration,
        metrics: classified.stage_metrics(),
    };

    let (refined, duration) = timed(clock, || classified.refine_edges());
    let edge_refine = optional(&refined, duration);

    let (cleaned, duration) = timed(clock, || refined.clean());
    let clean = optional(&cleaned, duration);

    let (composited, duration) = timed(clock, || cleaned.composite());
    let composite = StageDiagnostics {
        duration,
        metrics: composited.stage_metrics(),
    };

    let (finished, duration) = timed(clock, || composited.post_process());
    let post_process = optional(&finished, duration);

    let staged = finished.into_result();
    let total_duration = clock.elapsed(&total_start);

    let summary = PipelineSummary {
        image_width: staged.dimensions.width,
        image_height: staged.dimensions.height,
        pixel_count: staged.dimensions.pixel_count(),
        foreground_pixel_count: foreground_count(&staged.cleaned),
        transparent_pixel_count: crate::composite::alpha_coverage(&staged.output)
            .transparent_pixels,
    };

    tracing::debug!(
        total_ms = duration_ms(total_duration),
        foreground = summary.foreground_pixel_count,
        "pipeline finished",
    );

    Ok((
        staged,
        PipelineDiagnostics {
            validate,
            classify,
            edge_refine,
            clean,
            composite,
            post_process,
            total_duration,
            summary,
        },
    ))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::cell::Cell;

    use super::*;
    use crate::types::{RgbaImage, SegmentationMethod};

    /// Deterministic clock advancing one millisecond per reading.
    struct TickClock(Cell<u64>);

    impl Clock for TickClock {
        type Instant = u64;

        fn now(&self) -> u64 {
            let t = self.0.get();
            self.0.set(t + 1);
            t
        }

        fn elapsed(&self, since: &u64) -> Duration {
            Duration::from_millis(self.now() - since)
        }
    }

    fn block_pixels() -> Vec<u8> {
        RgbaImage::from_fn(12, 12, |x, y| {
            if (4..8).contains(&x) && (4..8).contains(&y) {
                image::Rgba([250, 250, 250, 255])
            } else {
                image::Rgba([10, 20, 30, 255])
            }
        })
        .into_raw()
    }

    #[test]
    fn duration_ms_converts_correctly() {
        let d = Duration::from_millis(1234);
        let ms = duration_ms(d);
        assert!((ms - 1234.0).abs() < 0.01);
    }

    #[test]
    fn percent_handles_empty_total() {
        assert!(percent(3, 0).abs() < f64::EPSILON);
        assert!((percent(1, 4) - 25.0).abs() < f64::EPSILON);
    }

    #[test]
    fn default_run_records_required_and_algorithm_stages() {
        let (staged, diag) = process_staged_with_diagnostics(
            &block_pixels(),
            12,
            12,
            &PipelineConfig::default(),
            &TickClock(Cell::new(0)),
        )
        .unwrap();

        assert!(diag.edge_refine.is_some());
        assert!(diag.clean.is_some());
        assert!(diag.post_process.is_none());
        assert_eq!(diag.summary.pixel_count, 144);
        assert_eq!(
            diag.summary.foreground_pixel_count,
            foreground_count(&staged.cleaned)
        );
        assert!(diag.total_duration >= diag.validate.duration);
    }

    #[test]
    fn color_method_skips_edge_refinement() {
        let config = PipelineConfig {
            method: SegmentationMethod::Color,
            ..PipelineConfig::default()
        };
        let (_, diag) = process_staged_with_diagnostics(
            &block_pixels(),
            12,
            12,
            &config,
            &TickClock(Cell::new(0)),
        )
        .unwrap();
        assert!(diag.edge_refine.is_none());
        assert!(diag.clean.is_some());
    }

    #[test]
    fn invalid_input_returns_error() {
        let result = process_staged_with_diagnostics(
            &[0; 10],
            12,
            12,
            &PipelineConfig::default(),
            &TickClock(Cell::new(0)),
        );
        assert!(matches!(result, Err(PipelineError::InvalidBuffer { .. })));
    }

    #[test]
    fn report_lists_every_stage() {
        let config = PipelineConfig {
            refine_mask: true,
            ..PipelineConfig::default()
        };
        let (_, diag) = process_staged_with_diagnostics(
            &block_pixels(),
            12,
            12,
            &config,
            &TickClock(Cell::new(0)),
        )
        .unwrap();
        let report = diag.report();
        assert!(report.contains("Pipeline Diagnostics Report"));
        for (name, _) in diag.stages() {
            assert!(report.contains(name), "missing {name}");
        }
        assert!(report.contains("refined="));
    }

    #[test]
    fn diagnostics_serialize_durations_as_seconds() {
        let (_, diag) = process_staged_with_diagnostics(
            &block_pixels(),
            12,
            12,
            &PipelineConfig::default(),
            &TickClock(Cell::new(0)),
        )
        .unwrap();
        let json = serde_json::to_value(&diag).unwrap();
        assert!((json["validate"]["duration"].as_f64().unwrap() - 0.001).abs() < 1e-9);
        assert!(json["post_process"].is_null());

        let back: PipelineDiagnostics = serde_json::from_value(json).unwrap();
        assert_eq!(back.classify.metrics, diag.classify.metrics);
    }
}
