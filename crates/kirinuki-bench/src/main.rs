//! kirinuki-bench: CLI tool for cutout parameter experimentation and diagnostics.
//!
//! Decodes an image file, runs the segmentation pipeline with configurable
//! parameters, and prints detailed per-stage diagnostics. Useful for:
//!
//! - Comparing segmentation methods (`auto`, `color`, `edge`)
//! - Tuning the color threshold and edge sensitivity
//! - Measuring per-stage durations to identify bottlenecks
//! - Seeing how the morphology border policy changes the mask
//!
//! # Usage
//!
//! ```text
//! cargo run --release --bin kirinuki-bench -- [OPTIONS] <IMAGE_PATH>
//! ```

#![allow(clippy::print_stdout, clippy::print_stderr)]

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::{Duration, Instant};

use clap::{Parser, ValueEnum};
use kirinuki_pipeline::diagnostics::{Clock, PipelineDiagnostics};
use kirinuki_pipeline::{
    BorderPolicy, PipelineConfig, PostProcessOrder, SegmentationMethod, StagedResult,
};
use tracing_subscriber::EnvFilter;

/// Cutout parameter experimentation and diagnostics for kirinuki.
///
/// Runs the segmentation pipeline on a given image with configurable
/// parameters and prints detailed per-stage timing and count diagnostics.
#[derive(Parser)]
#[command(name = "kirinuki-bench", version)]
struct Cli {
    /// Path to the input image (PNG, JPEG, BMP, WebP).
    image_path: PathBuf,

    /// Segmentation method.
    #[arg(long, value_enum, default_value_t = Method::Auto)]
    method: Method,

    /// Color distance below which a pixel matches a background bucket.
    #[arg(long, default_value_t = PipelineConfig::DEFAULT_COLOR_THRESHOLD)]
    color_threshold: f32,

    /// Sobel sensitivity; strong edges exceed `255 * sensitivity`.
    #[arg(long, default_value_t = PipelineConfig::DEFAULT_EDGE_SENSITIVITY)]
    edge_sensitivity: f32,

    /// Feather transitional alpha values.
    #[arg(long)]
    feather: bool,

    /// Feathering window radius in pixels.
    #[arg(long, default_value_t = PipelineConfig::DEFAULT_FEATHER_AMOUNT)]
    feather_amount: u32,

    /// Contrast-stretch and threshold the alpha channel.
    #[arg(long)]
    refine: bool,

    /// Contrast factor for mask refinement.
    #[arg(long, default_value_t = PipelineConfig::DEFAULT_MASK_CONTRAST)]
    mask_contrast: f32,

    /// Run contrast refinement before feathering when both are enabled.
    #[arg(long)]
    refine_first: bool,

    /// How morphological opening treats the outermost pixel ring.
    #[arg(long, value_enum, default_value_t = Border::Preserve)]
    border_policy: Border,

    /// Write the cutout as PNG to this file.
    #[arg(long, short)]
    output: Option<PathBuf>,

    /// Write the final cleaned mask as a grayscale PNG to this file.
    #[arg(long)]
    mask_output: Option<PathBuf>,

    /// Number of runs for averaging.
    #[arg(long, default_value_t = 1, value_parser = clap::builder::RangedU64ValueParser::<usize>::new().range(1..))]
    runs: usize,

    /// Output diagnostics as JSON instead of human-readable report.
    #[arg(long)]
    json: bool,

    /// Full pipeline config as a JSON string.
    ///
    /// When provided, all other pipeline parameter flags are ignored.
    /// The JSON uses the same camelCase keys as the browser settings.
    #[arg(long)]
    config_json: Option<String>,

    /// Log pipeline stage events (`RUST_LOG` takes precedence).
    #[arg(long, short)]
    verbose: bool,
}

/// Segmentation method selection.
#[derive(Clone, Copy, ValueEnum)]
enum Method {
    /// Color classification, Sobel refinement and morphological cleaning.
    Auto,
    /// Color classification and morphological cleaning.
    Color,
    /// Color classification and Sobel refinement, no cleaning.
    Edge,
    /// Learned segmentation (falls back to `auto`).
    Ai,
}

/// Morphology border policy selection.
#[derive(Clone, Copy, ValueEnum)]
enum Border {
    /// Border ring keeps its pre-erosion value.
    Preserve,
    /// Neighborhood is clipped at the image edge.
    Clamp,
}

/// Build a [`PipelineConfig`] from CLI arguments.
///
/// If `--config-json` is provided, the JSON is parsed directly and all
/// individual parameter flags are ignored. Otherwise, a config is
/// assembled from the individual flags.
fn config_from_cli(cli: &Cli) -> Result<PipelineConfig, String> {
    if let Some(ref json) = cli.config_json {
        return serde_json::from_str(json).map_err(|e| format!("Error parsing --config-json: {e}"));
    }

    Ok(PipelineConfig {
        method: match cli.method {
            Method::Auto => SegmentationMethod::Auto,
            Method::Color => SegmentationMethod::Color,
            Method::Edge => SegmentationMethod::Edge,
            Method::Ai => SegmentationMethod::Ai,
        },
        color_threshold: cli.color_threshold,
        edge_sensitivity: cli.edge_sensitivity,
        feather_edges: cli.feather,
        feather_amount: cli.feather_amount,
        refine_mask: cli.refine,
        mask_contrast: cli.mask_contrast,
        border_policy: match cli.border_policy {
            Border::Preserve => BorderPolicy::Preserve,
            Border::Clamp => BorderPolicy::Clamp,
        },
        post_process_order: if cli.refine_first {
            PostProcessOrder::RefineFirst
        } else {
            PostProcessOrder::FeatherFirst
        },
    })
}

/// Install the `tracing` subscriber.
///
/// Defaults to `warn` (or `debug` with `--verbose`) unless `RUST_LOG`
/// is set.
fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let config = match config_from_cli(&cli) {
        Ok(c) => c,
        Err(msg) => {
            eprintln!("{msg}");
            return ExitCode::FAILURE;
        }
    };

    let image = match image::open(&cli.image_path) {
        Ok(img) => img.into_rgba8(),
        Err(e) => {
            eprintln!("Error decoding {}: {e}", cli.image_path.display());
            return ExitCode::FAILURE;
        }
    };
    let (width, height) = image.dimensions();

    eprintln!(
        "Image: {} ({width}x{height})",
        cli.image_path.display(),
    );
    eprintln!("Config: {config:#?}");
    eprintln!("Runs: {}", cli.runs);
    eprintln!();

    let mut all_diagnostics = Vec::with_capacity(cli.runs);

    for run in 0..cli.runs {
        if cli.runs > 1 {
            eprintln!("--- Run {}/{} ---", run + 1, cli.runs);
        }

        match kirinuki_pipeline::diagnostics::process_staged_with_diagnostics(
            image.as_raw(),
            width,
            height,
            &config,
            &StdClock,
        ) {
            Ok((staged, diagnostics)) => {
                if cli.json {
                    match serde_json::to_string_pretty(&diagnostics) {
                        Ok(json) => println!("{json}"),
                        Err(e) => {
                            eprintln!("Error serializing diagnostics: {e}");
                            return ExitCode::FAILURE;
                        }
                    }
                } else {
                    println!("{}", diagnostics.report());
                }

                // Write images on the first run only.
                if run == 0 {
                    write_outputs(&cli, &staged);
                }

                all_diagnostics.push(diagnostics);
            }
            Err(e) => {
                eprintln!("Pipeline error: {e}");
                return ExitCode::FAILURE;
            }
        }

        if cli.runs > 1 {
            eprintln!();
        }
    }

    if cli.runs > 1 {
        print_multi_run_summary(&all_diagnostics);
    }

    ExitCode::SUCCESS
}

/// Write the cutout and/or mask PNGs requested on the command line.
///
/// Write failures are reported but do not abort the run.
fn write_outputs(cli: &Cli, staged: &StagedResult) {
    if let Some(ref path) = cli.output {
        report_write(path, "Cutout", staged.final_image().save(path));
    }
    if let Some(ref path) = cli.mask_output {
        report_write(path, "Mask", staged.cleaned.save(path));
    }
}

fn report_write(path: &Path, what: &str, result: image::ImageResult<()>) {
    match result {
        Ok(()) => eprintln!("{what} written to {}", path.display()),
        Err(e) => eprintln!("Error writing {} to {}: {e}", what.to_lowercase(), path.display()),
    }
}

/// [`Clock`] implementation backed by [`std::time::Instant`].
struct StdClock;

impl Clock for StdClock {
    type Instant = Instant;

    fn now(&self) -> Instant {
        Instant::now()
    }

    fn elapsed(&self, since: &Instant) -> Duration {
        since.elapsed()
    }
}

/// Print aggregated statistics across multiple runs.
#[allow(clippy::cast_precision_loss)]
fn print_multi_run_summary(all_diagnostics: &[PipelineDiagnostics]) {
    debug_assert!(!all_diagnostics.is_empty(), "no diagnostics to summarize");

    println!();
    println!(
        "Summary ({} runs)\n{}",
        all_diagnostics.len(),
        "=".repeat(60),
    );

    let Some(first) = all_diagnostics.first() else {
        println!("Warning: no diagnostics to summarize");
        return;
    };

    let durations: Vec<f64> = all_diagnostics
        .iter()
        .map(|d| d.total_duration.as_secs_f64() * 1000.0)
        .collect();

    let min = durations.iter().copied().reduce(f64::min).unwrap_or(0.0);
    let max = durations.iter().copied().reduce(f64::max).unwrap_or(0.0);
    let mean = durations.iter().sum::<f64>() / durations.len() as f64;

    println!("Total duration: min={min:.3}ms  mean={mean:.3}ms  max={max:.3}ms");

    // Per-stage means.
    println!();
    println!("{:<24} {:>12}", "Stage", "Mean (ms)");
    println!("{}", "-".repeat(40));

    for (i, (name, _)) in first.stages().into_iter().enumerate() {
        let stage_durations: Vec<f64> = all_diagnostics
            .iter()
            .filter_map(|d| d.stages()[i].1.map(|s| s.duration))
            .map(|dur| dur.as_secs_f64() * 1000.0)
            .collect();

        if stage_durations.is_empty() {
            continue;
        }

        let stage_mean = stage_durations.iter().sum::<f64>() / stage_durations.len() as f64;
        println!("{name:<24} {stage_mean:>10.3}ms");
    }
}
