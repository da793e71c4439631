//! Input contracts for the bead analysis pipeline.
//!
//! The core consumes fully materialized in-memory arrays; image loading and
//! reference resolution belong to the surrounding data-model layer. Images
//! arrive as 5D stacks in (t, z, y, x, c) order together with optional
//! physical voxel sizes and the detector's bit depth.
//!
//! Identifiers are explicit newtypes rather than free-form strings or tuple
//! positions, so aggregation keys cannot be silently mistyped.

use ndarray::{Array3, ArrayD, ArrayViewD, Axis, Ix3};
use serde::{Deserialize, Serialize};

use crate::error::AnalysisError;

/// Opaque identifier for an input image.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ImageId(String);

impl ImageId {
    /// Borrow the underlying name.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ImageId {
    fn from(name: &str) -> Self {
        Self(name.to_owned())
    }
}

impl From<String> for ImageId {
    fn from(name: String) -> Self {
        Self(name)
    }
}

impl std::fmt::Display for ImageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Zero-based channel index within an image.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct ChannelIndex(pub usize);

impl std::fmt::Display for ChannelIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Zero-based bead index within one (image, channel) pair, in detection
/// order.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct BeadId(pub usize);

impl std::fmt::Display for BeadId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Physical voxel dimensions in microns, (z, y, x) order.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VoxelSize {
    /// Axial voxel size in microns.
    pub z: f64,
    /// Lateral voxel size along y in microns.
    pub y: f64,
    /// Lateral voxel size along x in microns.
    pub x: f64,
}

/// One calibration image: a 5D intensity stack plus acquisition metadata.
#[derive(Debug, Clone)]
pub struct BeadImage {
    /// Identifier used in tables, ROIs and diagnostics.
    pub id: ImageId,
    /// Intensity data in (t, z, y, x, c) axis order.
    pub data: ArrayD<f64>,
    /// Physical voxel size, if calibrated. Absent sizes leave the micron
    /// FWHM columns undefined.
    pub voxel_size_micron: Option<VoxelSize>,
    /// Detector bit depth; the representable maximum is `2^bit_depth - 1`.
    pub bit_depth: u32,
    /// Fraction (0-1) of at-maximum pixels above which a channel counts as
    /// saturated.
    pub saturation_threshold: f64,
}

impl BeadImage {
    /// Check rank, axis sizes and bit depth before any processing.
    pub fn validate(&self) -> Result<(), AnalysisError> {
        if self.data.ndim() != 5 {
            return Err(AnalysisError::InvalidRank {
                image: self.id.clone(),
                ndim: self.data.ndim(),
            });
        }
        if self.data.shape().iter().any(|&len| len == 0) {
            return Err(AnalysisError::EmptyAxis {
                image: self.id.clone(),
                shape: self.data.shape().to_vec(),
            });
        }
        if self.bit_depth == 0 || self.bit_depth > 32 {
            return Err(AnalysisError::InvalidBitDepth {
                image: self.id.clone(),
                bit_depth: self.bit_depth,
            });
        }
        Ok(())
    }

    /// Number of timepoints (first axis). Only the first is analysed.
    pub fn timepoints(&self) -> usize {
        self.data.shape()[0]
    }

    /// Number of channels (last axis).
    pub fn channel_count(&self) -> usize {
        self.data.shape()[4]
    }

    /// Maximum representable intensity for the declared bit depth.
    pub fn max_intensity(&self) -> f64 {
        ((1u64 << self.bit_depth) - 1) as f64
    }

    /// Extract the channel volumes of the first timepoint, in (z, y, x)
    /// order, with negative intensities clipped to zero. Reconstructed
    /// inputs (e.g. 3D-SIM) may legitimately contain negative values.
    ///
    /// Call [`BeadImage::validate`] first; the rank is assumed here.
    pub fn channel_volumes(&self) -> Vec<Array3<f64>> {
        let first_timepoint = self.data.index_axis(Axis(0), 0);
        (0..self.channel_count())
            .map(|c| {
                first_timepoint
                    .index_axis(Axis(3), c)
                    .mapv(|v| v.max(0.0))
                    .into_dimensionality::<Ix3>()
                    .expect("validated 5D image yields 3D channel volumes")
            })
            .collect()
    }

    /// Channels whose fraction of at-maximum pixels exceeds the configured
    /// saturation threshold. The test spans every timepoint.
    pub fn saturated_channels(&self) -> Vec<ChannelIndex> {
        (0..self.channel_count())
            .filter(|&c| {
                let channel = self.data.index_axis(Axis(4), c);
                channel_is_saturated(&channel, self.max_intensity(), self.saturation_threshold)
            })
            .map(ChannelIndex)
            .collect()
    }
}

fn channel_is_saturated(channel: &ArrayViewD<'_, f64>, max_intensity: f64, threshold: f64) -> bool {
    let total = channel.len();
    if total == 0 {
        return false;
    }
    let saturated = channel.iter().filter(|&&v| v >= max_intensity).count();
    saturated as f64 / total as f64 > threshold
}

/// A collection of calibration images analysed as one dataset.
///
/// Declaration order is part of the observable contract: output tables are
/// row-ordered by (image declaration order, channel index, bead id).
#[derive(Debug, Clone, Default)]
pub struct BeadDataset {
    /// Images in declaration order.
    pub images: Vec<BeadImage>,
}

impl BeadDataset {
    /// Validate every image and the dataset as a whole.
    pub fn validate(&self) -> Result<(), AnalysisError> {
        if self.images.is_empty() {
            return Err(AnalysisError::EmptyDataset);
        }
        for image in &self.images {
            image.validate()?;
        }
        Ok(())
    }

    /// Largest channel count over all images; aggregation spans the union of
    /// channel indices.
    pub fn channel_count(&self) -> usize {
        self.images
            .iter()
            .map(|image| image.channel_count())
            .max()
            .unwrap_or(0)
    }

    /// The common voxel size, if every image declares the same one.
    ///
    /// Averaging beads across images is only meaningful when their physical
    /// sampling matches; `None` means the sizes disagree or at least one
    /// image is uncalibrated while another is not.
    pub fn common_voxel_size(&self) -> Option<Option<VoxelSize>> {
        let mut sizes = self.images.iter().map(|image| image.voxel_size_micron);
        let first = sizes.next()?;
        if sizes.all(|size| size == first) {
            Some(first)
        } else {
            None
        }
    }
}
