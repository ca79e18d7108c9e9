//! Stream processing
//!
//! Drives the pipeline over video sequences and live sessions, analyzing only
//! the frames the sampler selects.

pub mod sampler;

use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::capture::{wrap_live_frame, Frame, LiveFrameInput};
use crate::error::PlateError;
use crate::shared::LiveReply;
use crate::vision::{Detection, PlatePipeline};

pub use sampler::{FrameSampler, FrameTick};

/// Totals for one processed video
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VideoReport {
    /// Items pulled from the source, including undecodable frames
    pub frames_read: u64,
    pub frames_analyzed: u64,
    pub frames_failed: u64,
    pub detections: u64,
}

/// Run the pipeline over every `interval`-th frame of a sequence
///
/// Frames are pulled one at a time, each only after the previous analysis
/// finished. Undecodable frames are logged and skipped; a source that fails
/// to open aborts the whole sequence. `on_frame` is called for every analyzed
/// frame, including those without plates.
pub fn process_video<I, F>(
    pipeline: &PlatePipeline,
    frames: I,
    interval: u64,
    mut on_frame: F,
) -> Result<VideoReport, PlateError>
where
    I: IntoIterator<Item = Result<Frame, PlateError>>,
    F: FnMut(u64, &[Detection]),
{
    let mut sampler = FrameSampler::new(interval)?;
    let mut report = VideoReport::default();

    for item in frames {
        let tick = sampler.advance();
        report.frames_read += 1;

        let frame = match item {
            Ok(frame) => frame,
            Err(e @ PlateError::Open { .. }) => return Err(e),
            Err(e) => {
                warn!("Skipping frame {}: {}", tick.index, e);
                report.frames_failed += 1;
                continue;
            }
        };
        if !tick.analyze {
            continue;
        }

        match pipeline.analyze_frame(&frame) {
            Ok(detections) => {
                report.frames_analyzed += 1;
                report.detections += detections.len() as u64;
                on_frame(tick.index, &detections);
            }
            Err(e) => {
                warn!("Frame {} analysis failed: {}", tick.index, e);
                report.frames_failed += 1;
            }
        }
    }

    info!(
        "Video done: {} frames read, {} analyzed, {} plates",
        report.frames_read, report.frames_analyzed, report.detections
    );
    Ok(report)
}

/// State of one live connection
///
/// Every incoming message counts as a frame; only sampled ones are decoded
/// and analyzed.
#[derive(Debug)]
pub struct LiveSession {
    id: Uuid,
    sampler: FrameSampler,
}

impl LiveSession {
    pub fn new(interval: u64) -> Result<Self, PlateError> {
        let id = Uuid::new_v4();
        info!("Live session {} started (every {} frames)", id, interval);
        Ok(Self {
            id,
            sampler: FrameSampler::new(interval)?,
        })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn frames_seen(&self) -> u64 {
        self.sampler.frames_seen()
    }

    /// Reply for one incoming frame, `None` when the frame is not sampled
    pub fn handle_frame(&mut self, pipeline: &PlatePipeline, input: LiveFrameInput<'_>) -> Option<LiveReply> {
        let tick = self.sampler.advance();
        if !tick.analyze {
            return None;
        }

        let result = wrap_live_frame(input).and_then(|image| {
            let frame = Frame::with_index(image.into_image(), tick.index);
            pipeline.analyze_frame(&frame)
        });

        Some(match result {
            Ok(results) => {
                debug!("Live {} frame {}: {} plates", self.id, tick.index, results.len());
                LiveReply::Results {
                    frame: tick.index,
                    results,
                }
            }
            Err(e) => {
                warn!("Live {} frame {}: {}", self.id, tick.index, e);
                LiveReply::Error { detail: e.to_string() }
            }
        })
    }
}

impl Drop for LiveSession {
    fn drop(&mut self) {
        info!("Live session {} closed after {} frames", self.id, self.frames_seen());
    }
}
