//! Explicit diagnostics channel for the pipeline.
//!
//! Every exclusion or degradation decision is reported as a structured
//! [`AnalysisEvent`] through an injectable [`EventSink`], instead of an
//! implicit process-wide logger. The default [`TracingSink`] forwards events
//! to `tracing`; [`MemorySink`] collects them so tests can assert on the
//! exact exclusion reasons emitted.

use crate::dataset::{BeadId, ChannelIndex, ImageId};
use crate::processor::ProfileAxis;

/// Structured pipeline event.
#[derive(Debug, Clone, PartialEq)]
pub enum AnalysisEvent {
    /// An image has more than one timepoint; only the first is analysed.
    MultipleTimepoints {
        /// Offending image.
        image: ImageId,
        /// Declared number of timepoints.
        timepoints: usize,
    },
    /// Detection finished for one channel.
    ChannelDetected {
        /// Image the channel belongs to.
        image: ImageId,
        /// Channel index.
        channel: ChannelIndex,
        /// Total peaks found, before any filtering.
        total: usize,
        /// Peaks surviving distance and border filtering.
        structurally_valid: usize,
        /// Peaks suppressed for proximity to a stronger peak.
        self_proximity: usize,
        /// Peaks suppressed for lateral border proximity.
        lateral_edge: usize,
    },
    /// A per-axis profile fit failed; the bead is kept with the axis flagged
    /// as a bad fit.
    FitFailed {
        /// Image the bead belongs to.
        image: ImageId,
        /// Channel index.
        channel: ChannelIndex,
        /// Bead index within the channel.
        bead: BeadId,
        /// Axis whose profile failed to fit.
        axis: ProfileAxis,
        /// Rendered fitting error.
        reason: String,
    },
    /// A bead was flagged as an intensity outlier.
    OutlierFlagged {
        /// Image the bead belongs to.
        image: ImageId,
        /// Channel index.
        channel: ChannelIndex,
        /// Bead index within the channel.
        bead: BeadId,
        /// Robust z-score of the bead's max intensity.
        score: f64,
    },
    /// A channel had fewer than two valid beads; no average bead produced.
    AveragingSkippedChannel {
        /// Channel index.
        channel: ChannelIndex,
        /// Number of valid beads available.
        valid_beads: usize,
    },
    /// Voxel sizes differ between images; averaging skipped dataset-wide.
    AveragingSkippedVoxelMismatch,
    /// A crop could not be aligned during averaging and was dropped from the
    /// mean.
    AveragingDroppedBead {
        /// Channel index.
        channel: ChannelIndex,
        /// Rendered reason (shape mismatch or shift-estimation failure).
        reason: String,
    },
    /// A profile fit on the per-channel average bead failed.
    AverageBeadFitFailed {
        /// Channel index.
        channel: ChannelIndex,
        /// Axis whose profile failed to fit.
        axis: ProfileAxis,
        /// Rendered fitting error.
        reason: String,
    },
    /// Per-image processing summary, one per image.
    ImageProcessed {
        /// Image processed.
        image: ImageId,
        /// Count of beads by final validity.
        valid: usize,
        /// Count flagged for lateral border proximity.
        lateral_edge: usize,
        /// Count flagged for proximity to another bead.
        self_proximity: usize,
        /// Count flagged for axial border proximity.
        axial_edge: usize,
        /// Count flagged as intensity outliers.
        intensity_outlier: usize,
        /// Count flagged as bad fits on any axis.
        bad_fit: usize,
    },
}

/// Receiver for pipeline events.
pub trait EventSink {
    /// Record one event.
    fn record(&mut self, event: AnalysisEvent);
}

/// Default sink forwarding events to `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn record(&mut self, event: AnalysisEvent) {
        match &event {
            AnalysisEvent::MultipleTimepoints { image, timepoints } => {
                tracing::warn!(%image, timepoints, "using first timepoint only");
            }
            AnalysisEvent::ChannelDetected {
                image,
                channel,
                total,
                structurally_valid,
                self_proximity,
                lateral_edge,
            } => {
                tracing::debug!(
                    %image,
                    %channel,
                    total,
                    structurally_valid,
                    self_proximity,
                    lateral_edge,
                    "bead detection finished"
                );
            }
            AnalysisEvent::FitFailed {
                image,
                channel,
                bead,
                axis,
                reason,
            } => {
                tracing::warn!(%image, %channel, %bead, %axis, reason, "profile fit failed");
            }
            AnalysisEvent::OutlierFlagged {
                image,
                channel,
                bead,
                score,
            } => {
                tracing::debug!(%image, %channel, %bead, score, "intensity outlier flagged");
            }
            AnalysisEvent::AveragingSkippedChannel {
                channel,
                valid_beads,
            } => {
                tracing::warn!(%channel, valid_beads, "fewer than 2 valid beads, skipping average");
            }
            AnalysisEvent::AveragingSkippedVoxelMismatch => {
                tracing::error!("voxel sizes differ between images, skipping bead averaging");
            }
            AnalysisEvent::AveragingDroppedBead { channel, reason } => {
                tracing::warn!(%channel, reason, "dropped bead from average");
            }
            AnalysisEvent::AverageBeadFitFailed {
                channel,
                axis,
                reason,
            } => {
                tracing::warn!(%channel, %axis, reason, "average bead fit failed");
            }
            AnalysisEvent::ImageProcessed {
                image,
                valid,
                lateral_edge,
                self_proximity,
                axial_edge,
                intensity_outlier,
                bad_fit,
            } => {
                tracing::info!(
                    %image,
                    valid,
                    lateral_edge,
                    self_proximity,
                    axial_edge,
                    intensity_outlier,
                    bad_fit,
                    "image processed"
                );
            }
        }
    }
}

/// In-memory sink for tests.
#[derive(Debug, Default, Clone)]
pub struct MemorySink {
    /// Events in emission order.
    pub events: Vec<AnalysisEvent>,
}

impl MemorySink {
    /// Create an empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of recorded events matching a predicate.
    pub fn count_matching(&self, predicate: impl Fn(&AnalysisEvent) -> bool) -> usize {
        self.events.iter().filter(|event| predicate(event)).count()
    }
}

impl EventSink for MemorySink {
    fn record(&mut self, event: AnalysisEvent) {
        self.events.push(event);
    }
}
