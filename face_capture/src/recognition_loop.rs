use crate::bootstrap::Collection;
use crate::camera::{CameraError, FrameSource};
use crate::config::RecognitionConfig;
use crate::cv_utils::FrameCodec;
use crate::decision::{decide, Decision};
use crate::display::{DisplayError, Renderer};
use crate::recognition::{MatchResult, RecognitionClient, RecognitionError};
use crate::telemetry::Metrics;
use std::time::Instant;
use thiserror::Error;

/// Only the best candidate is ever used.
const MAX_RESULTS: u32 = 1;

#[derive(Error, Debug)]
pub enum RecognitionLoopError {
    #[error("Camera error: {0}")]
    Camera(#[from] CameraError),
    #[error("Display error: {0}")]
    Display(#[from] DisplayError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Running,
    Stopping,
    Stopped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// The user pressed the quit key.
    Quit,
    /// The camera stopped producing frames.
    EndOfStream,
    /// Too many searches failed in a row.
    ServiceUnavailable,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct LoopSummary {
    pub frames: u64,
    pub skipped: u64,
    pub matches: u64,
    pub low_matches: u64,
    pub no_matches: u64,
    pub search_errors: u64,
    pub stop_reason: Option<StopReason>,
}

impl LoopSummary {
    fn record(&mut self, decision: &Decision) {
        match decision {
            Decision::Match { .. } => self.matches += 1,
            Decision::LowMatch { .. } => self.low_matches += 1,
            Decision::NoMatch => self.no_matches += 1,
            Decision::SearchError { .. } => self.search_errors += 1,
        }
    }
}

/// Capture, encode, search, decide, render, repeat.
///
/// The loop owns the frame source and the renderer and releases both exactly
/// once when it stops, whether it stops on request, at end of stream, or
/// because of an error.
pub struct RecognitionLoop<'a, S, C, R, D>
where
    S: FrameSource,
    C: FrameCodec,
    R: RecognitionClient,
    D: Renderer,
{
    source: S,
    codec: C,
    client: &'a R,
    renderer: D,
    collection: &'a Collection,
    recognition: &'a RecognitionConfig,
    metrics: Option<&'a Metrics>,
    state: LoopState,
    consecutive_failures: u32,
    summary: LoopSummary,
}

impl<'a, S, C, R, D> RecognitionLoop<'a, S, C, R, D>
where
    S: FrameSource,
    C: FrameCodec,
    R: RecognitionClient,
    D: Renderer,
{
    pub fn new(
        source: S,
        codec: C,
        client: &'a R,
        renderer: D,
        collection: &'a Collection,
        recognition: &'a RecognitionConfig,
    ) -> Self {
        Self {
            source,
            codec,
            client,
            renderer,
            collection,
            recognition,
            metrics: None,
            state: LoopState::Running,
            consecutive_failures: 0,
            summary: LoopSummary::default(),
        }
    }

    pub fn with_metrics(mut self, metrics: &'a Metrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub async fn run(mut self) -> Result<LoopSummary, RecognitionLoopError> {
        tracing::info!(
            collection_id = %self.collection.id,
            threshold = self.recognition.similarity_threshold,
            "Starting face recognition loop"
        );

        let outcome = self.drive().await;
        if let Err(ref e) = outcome {
            tracing::error!("Recognition loop failed: {}", e);
        }

        self.transition(LoopState::Stopping);
        self.shutdown();
        self.transition(LoopState::Stopped);

        let reason = outcome?;
        self.summary.stop_reason = Some(reason);
        tracing::info!(?reason, summary = ?self.summary, "Recognition loop stopped");
        Ok(self.summary)
    }

    async fn drive(&mut self) -> Result<StopReason, RecognitionLoopError> {
        loop {
            if let Some(reason) = self.step().await? {
                return Ok(reason);
            }
        }
    }

    async fn step(&mut self) -> Result<Option<StopReason>, RecognitionLoopError> {
        let iteration_started = Instant::now();

        let Some(frame) = self.source.next_frame()? else {
            tracing::warn!("Failed to grab frame from camera. Ending loop.");
            return Ok(Some(StopReason::EndOfStream));
        };
        self.summary.frames += 1;
        if let Some(metrics) = self.metrics {
            metrics.record_frame();
        }

        let mut service_down = false;
        match self.codec.encode(&frame) {
            Err(e) => {
                tracing::warn!(
                    width = frame.width(),
                    height = frame.height(),
                    "Failed to encode frame, skipping: {}",
                    e
                );
                self.summary.skipped += 1;
                if let Some(metrics) = self.metrics {
                    metrics.record_skipped_frame();
                }
            }
            Ok(encoded) => {
                let threshold = self.recognition.similarity_threshold;
                let search_started = Instant::now();
                let result = self
                    .client
                    .search(&self.collection.id, encoded, threshold, MAX_RESULTS)
                    .await;
                let decision = decide(&result, threshold);

                if let Some(metrics) = self.metrics {
                    let elapsed_ms = search_started.elapsed().as_millis() as u64;
                    metrics.record_search_duration(elapsed_ms, decision.outcome());
                    metrics.record_decision(&decision);
                }
                log_decision(&result, &decision);
                self.summary.record(&decision);
                service_down = self.track_failures(&result);

                self.renderer.show(frame, &decision)?;
            }
        }

        if self.renderer.stop_requested()? {
            tracing::info!("Quit key pressed. Exiting loop.");
            return Ok(Some(StopReason::Quit));
        }

        if let Some(metrics) = self.metrics {
            let elapsed = iteration_started.elapsed().as_secs_f64();
            if elapsed > 0.0 {
                metrics.record_loop_fps(1.0 / elapsed);
            }
        }

        if service_down {
            return Ok(Some(StopReason::ServiceUnavailable));
        }
        Ok(None)
    }

    /// Returns true once the configured cap on consecutive search failures
    /// has been reached.
    fn track_failures(&mut self, result: &Result<MatchResult, RecognitionError>) -> bool {
        if result.is_ok() {
            self.consecutive_failures = 0;
            return false;
        }

        self.consecutive_failures += 1;
        match self.recognition.max_consecutive_failures {
            Some(max) if self.consecutive_failures >= max => {
                tracing::error!(
                    consecutive_failures = self.consecutive_failures,
                    "Persistent search failure detected. Stopping recognition loop"
                );
                true
            }
            _ => false,
        }
    }

    fn shutdown(&mut self) {
        tracing::info!("Releasing camera and closing display");
        self.source.release();
        self.renderer.close();
    }

    fn transition(&mut self, next: LoopState) {
        tracing::debug!(from = ?self.state, to = ?next, "Loop state change");
        self.state = next;
    }
}

fn log_decision(result: &Result<MatchResult, RecognitionError>, decision: &Decision) {
    match (result, decision) {
        (Err(e), _) => tracing::error!("Error during face search: {}", e),
        (
            _,
            Decision::Match {
                external_id,
                similarity,
            },
        ) => tracing::info!(external_id = %external_id, similarity = *similarity, "Match found"),
        (
            _,
            Decision::LowMatch {
                external_id,
                similarity,
            },
        ) => tracing::debug!(
            external_id = %external_id,
            similarity = *similarity,
            "Match found below threshold"
        ),
        _ => tracing::debug!("No matching faces found in the current frame"),
    }
}
