//! Error taxonomy for the bead analysis pipeline.
//!
//! Three failure classes exist, with different blast radii:
//!
//! - [`SaturationError`] is raised before any detection work and aborts the
//!   whole run, listing every saturated (image, channel) pair.
//! - [`FittingError`] is raised by the profile fitter for a single bead axis;
//!   the orchestrator downgrades it to a per-bead `bad_fit` flag plus a
//!   diagnostic event, so one misbehaved bead never kills a run.
//! - [`AnalysisError`] covers malformed input and configuration, detected
//!   before processing starts.

use thiserror::Error;

use crate::dataset::{ChannelIndex, ImageId};

/// One or more channels exceed the configured saturation fraction.
///
/// Raised by the pre-check in [`crate::analyse_psf_beads`] before
/// any detection work; no partial results are produced.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("saturation detected in {} channel(s): {}", channels.len(), describe_channels(channels))]
pub struct SaturationError {
    /// Every offending (image, channel) pair, in dataset order.
    pub channels: Vec<(ImageId, ChannelIndex)>,
}

fn describe_channels(channels: &[(ImageId, ChannelIndex)]) -> String {
    channels
        .iter()
        .map(|(image, channel)| format!("{image}:{channel}"))
        .collect::<Vec<_>>()
        .join(", ")
}

/// A single 1D profile fit failed.
///
/// Carries the structured reason so callers can distinguish degenerate input
/// from optimizer divergence.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FittingError {
    /// The profile has too few samples to constrain the model.
    #[error("profile too short to fit: {len} samples, need at least {min}")]
    TooShort {
        /// Number of samples in the profile.
        len: usize,
        /// Minimum number of samples required.
        min: usize,
    },

    /// The profile is flat (or contains non-finite values) and carries no
    /// peak to fit.
    #[error("degenerate profile: intensity range {range:.3e}")]
    DegenerateProfile {
        /// Max minus min of the profile.
        range: f64,
    },

    /// The optimizer did not reach the convergence tolerance.
    #[error("fit did not converge after {iterations} iterations")]
    DidNotConverge {
        /// Number of iterations performed.
        iterations: usize,
    },
}

/// Top-level analysis failure.
#[derive(Error, Debug)]
pub enum AnalysisError {
    /// Saturated channels found during the pre-check.
    #[error(transparent)]
    Saturation(#[from] SaturationError),

    /// An input image does not have the required (t, z, y, x, c) rank.
    #[error("image {image} must be 5-dimensional (t, z, y, x, c), got {ndim} dimensions")]
    InvalidRank {
        /// Offending image.
        image: ImageId,
        /// Actual number of dimensions.
        ndim: usize,
    },

    /// An input image has a zero-length axis.
    #[error("image {image} has an empty axis: shape {shape:?}")]
    EmptyAxis {
        /// Offending image.
        image: ImageId,
        /// Full 5D shape of the image.
        shape: Vec<usize>,
    },

    /// An input image declares an unusable detector bit depth.
    #[error("image {image} declares bit depth {bit_depth}, expected 1..=32")]
    InvalidBitDepth {
        /// Offending image.
        image: ImageId,
        /// Declared bit depth.
        bit_depth: u32,
    },

    /// The dataset contains no images.
    #[error("dataset contains no images")]
    EmptyDataset,

    /// The numeric configuration is out of range.
    #[error("invalid configuration: {reason}")]
    InvalidConfig {
        /// Human-readable description of the offending parameter.
        reason: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn saturation_error_lists_all_pairs() {
        let err = SaturationError {
            channels: vec![
                (ImageId::from("slide_a"), ChannelIndex(0)),
                (ImageId::from("slide_b"), ChannelIndex(2)),
            ],
        };
        let message = err.to_string();
        assert!(message.contains("slide_a:0"), "got: {message}");
        assert!(message.contains("slide_b:2"), "got: {message}");
        assert!(message.contains("2 channel(s)"), "got: {message}");
    }

    #[test]
    fn fitting_error_messages_are_structured() {
        let err = FittingError::TooShort { len: 3, min: 5 };
        assert_eq!(err.to_string(), "profile too short to fit: 3 samples, need at least 5");
    }
}
