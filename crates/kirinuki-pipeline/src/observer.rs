//! Stage-boundary observation and cancellation.
//!
//! The pipeline never checks for cancellation inside a stage. A driver
//! that wants progress reports or an abort button plugs a
//! [`StageObserver`] into [`process_with_observer`], which consults it
//! after every stage transition.

use std::ops::ControlFlow;

use crate::diagnostics::StageMetrics;
use crate::pipeline::{Advance, Pipeline, Stage};
use crate::types::{PipelineConfig, PipelineError, StagedResult};

/// Callback invoked after each pipeline stage completes.
pub trait StageObserver {
    /// Called with the name, index and metrics of the stage that was just
    /// reached. Return [`ControlFlow::Break`] to stop the run.
    fn on_stage(
        &mut self,
        name: &str,
        index: usize,
        metrics: Option<&StageMetrics>,
    ) -> ControlFlow<()>;
}

impl<F> StageObserver for F
where
    F: FnMut(&str, usize, Option<&StageMetrics>) -> ControlFlow<()>,
{
    fn on_stage(
        &mut self,
        name: &str,
        index: usize,
        metrics: Option<&StageMetrics>,
    ) -> ControlFlow<()> {
        self(name, index, metrics)
    }
}

/// Run the pipeline, reporting every stage to `observer`.
///
/// The caller's `pixels` are copied, so a cancelled run leaves them
/// untouched and no partial output is returned.
///
/// # Errors
///
/// Returns the precondition errors of
/// [`Pending::validate`](crate::pipeline::Pending::validate), or
/// [`PipelineError::Cancelled`] naming the last completed stage when the
/// observer breaks.
pub fn process_with_observer<O: StageObserver + ?Sized>(
    pixels: &[u8],
    width: u32,
    height: u32,
    config: &PipelineConfig,
    observer: &mut O,
) -> Result<StagedResult, PipelineError> {
    let mut stage: Stage = Pipeline::new(pixels.to_vec(), width, height, config.clone()).into();
    loop {
        match stage.advance()? {
            Advance::Next(next) => {
                let metrics = next.metrics();
                if observer
                    .on_stage(next.name(), next.index(), metrics.as_ref())
                    .is_break()
                {
                    tracing::debug!(stage = next.name(), "processing cancelled");
                    return Err(PipelineError::Cancelled {
                        stage: next.name().to_string(),
                    });
                }
                stage = next;
            }
            Advance::Complete(done) => return done.complete(),
        }
    }
}
