//! Per-channel average bead construction.
//!
//! Valid bead crops from all images of a channel are recentred with
//! sub-voxel registration and averaged voxel-wise, yielding one
//! high-signal-to-noise bead per channel. The average is only built from at
//! least two valid beads; anything less just echoes a single measurement
//! with extra interpolation error.

use ndarray::Array3;

use crate::dataset::ChannelIndex;
use crate::diagnostics::{AnalysisEvent, EventSink};
use crate::registration;

/// Fewest valid beads that justify an average.
pub const MIN_BEADS_FOR_AVERAGE: usize = 2;

/// Recentre and average the given crops.
///
/// Crops whose shape differs from the first crop, or whose displacement
/// cannot be estimated, are dropped with an event; if fewer than
/// [`MIN_BEADS_FOR_AVERAGE`] survive, no average is produced.
pub fn average_bead_volumes(
    crops: &[&Array3<f64>],
    channel: ChannelIndex,
    sink: &mut dyn EventSink,
) -> Option<Array3<f64>> {
    if crops.len() < MIN_BEADS_FOR_AVERAGE {
        sink.record(AnalysisEvent::AveragingSkippedChannel {
            channel,
            valid_beads: crops.len(),
        });
        return None;
    }

    let shape = crops[0].dim();
    let mut aligned: Vec<Array3<f64>> = Vec::with_capacity(crops.len());
    for crop in crops {
        if crop.dim() != shape {
            sink.record(AnalysisEvent::AveragingDroppedBead {
                channel,
                reason: format!(
                    "crop shape {:?} differs from reference {:?}",
                    crop.dim(),
                    shape
                ),
            });
            continue;
        }
        match registration::find_displacement(crop, None) {
            Ok(displacement) => {
                let recentring = [-displacement[0], -displacement[1], -displacement[2]];
                aligned.push(registration::translate(crop, recentring));
            }
            Err(err) => {
                sink.record(AnalysisEvent::AveragingDroppedBead {
                    channel,
                    reason: err.to_string(),
                });
            }
        }
    }

    if aligned.len() < MIN_BEADS_FOR_AVERAGE {
        sink.record(AnalysisEvent::AveragingSkippedChannel {
            channel,
            valid_beads: aligned.len(),
        });
        return None;
    }

    let mut sum = Array3::zeros(shape);
    for volume in &aligned {
        sum += volume;
    }
    Some(sum / aligned.len() as f64)
}
