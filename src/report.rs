//! Output tables, key measurements and ROI bundles.

use ndarray::Array3;
use serde::{Deserialize, Serialize};

use crate::dataset::{BeadId, ChannelIndex, ImageId};
use crate::stats;

/// Exclusive primary classification of a bead, in precedence order.
///
/// Records carry the full layered flag set; this classification assigns
/// each bead to exactly one bucket so per-channel counts always sum to the
/// total detection count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlagClass {
    LateralEdge,
    SelfProximity,
    AxialEdge,
    IntensityOutlier,
    BadFitZ,
    BadFitY,
    BadFitX,
    Valid,
}

impl FlagClass {
    pub const ALL: [FlagClass; 8] = [
        FlagClass::LateralEdge,
        FlagClass::SelfProximity,
        FlagClass::AxialEdge,
        FlagClass::IntensityOutlier,
        FlagClass::BadFitZ,
        FlagClass::BadFitY,
        FlagClass::BadFitX,
        FlagClass::Valid,
    ];

    pub fn name(self) -> &'static str {
        match self {
            FlagClass::Valid => "valid",
            FlagClass::LateralEdge => "lateral_edge",
            FlagClass::SelfProximity => "self_proximity",
            FlagClass::AxialEdge => "axial_edge",
            FlagClass::IntensityOutlier => "intensity_outlier",
            FlagClass::BadFitZ => "bad_fit_z",
            FlagClass::BadFitY => "bad_fit_y",
            FlagClass::BadFitX => "bad_fit_x",
        }
    }

    /// Stroke colour for centre-point ROIs of this class.
    pub fn stroke_color(self) -> Color {
        match self {
            FlagClass::Valid => Color::new(0, 255, 0, 100),
            FlagClass::LateralEdge | FlagClass::SelfProximity => Color::new(255, 0, 0, 100),
            _ => Color::new(0, 0, 255, 100),
        }
    }

    /// Stroke width for centre-point ROIs of this class.
    pub fn stroke_width(self) -> u32 {
        match self {
            FlagClass::Valid => 8,
            _ => 4,
        }
    }
}

impl std::fmt::Display for FlagClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// RGBA stroke colour.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub alpha: u8,
}

impl Color {
    pub const fn new(r: u8, g: u8, b: u8, alpha: u8) -> Self {
        Self { r, g, b, alpha }
    }
}

/// One centre-point marker inside an ROI.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoiPoint {
    pub name: String,
    pub z: f64,
    /// Pixel-centre convention: detection row + 0.5.
    pub y: f64,
    /// Pixel-centre convention: detection column + 0.5.
    pub x: f64,
    pub channel: ChannelIndex,
    pub stroke_color: Color,
    pub stroke_width: u32,
}

/// Centre-point ROI for one image and one flag class.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Roi {
    pub name: String,
    pub description: String,
    pub image: ImageId,
    pub points: Vec<RoiPoint>,
}

/// One row of the per-bead properties table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BeadRecord {
    pub image: ImageId,
    pub channel: ChannelIndex,
    pub bead: BeadId,
    pub center_z: usize,
    pub center_y: usize,
    pub center_x: usize,
    pub valid: bool,
    pub lateral_edge: bool,
    pub self_proximity: bool,
    pub axial_edge: bool,
    pub intensity_outlier: bool,
    pub bad_fit_z: bool,
    pub bad_fit_y: bool,
    pub bad_fit_x: bool,
    pub intensity_max: f64,
    pub intensity_min: f64,
    pub intensity_std: f64,
    pub max_intensity_robust_z_score: f64,
    pub fit_r2_z: Option<f64>,
    pub fit_r2_y: Option<f64>,
    pub fit_r2_x: Option<f64>,
    pub fwhm_pixel_z: Option<f64>,
    pub fwhm_pixel_y: Option<f64>,
    pub fwhm_pixel_x: Option<f64>,
    pub fwhm_micron_z: Option<f64>,
    pub fwhm_micron_y: Option<f64>,
    pub fwhm_micron_x: Option<f64>,
    pub fwhm_lateral_asymmetry_ratio: Option<f64>,
}

impl BeadRecord {
    pub fn flag(&self, class: FlagClass) -> bool {
        match class {
            FlagClass::Valid => self.valid,
            FlagClass::LateralEdge => self.lateral_edge,
            FlagClass::SelfProximity => self.self_proximity,
            FlagClass::AxialEdge => self.axial_edge,
            FlagClass::IntensityOutlier => self.intensity_outlier,
            FlagClass::BadFitZ => self.bad_fit_z,
            FlagClass::BadFitY => self.bad_fit_y,
            FlagClass::BadFitX => self.bad_fit_x,
        }
    }

    /// First flag in precedence order, `Valid` when none is set.
    pub fn primary_class(&self) -> FlagClass {
        for class in FlagClass::ALL {
            if class != FlagClass::Valid && self.flag(class) {
                return class;
            }
        }
        FlagClass::Valid
    }
}

/// One row of a per-axis profile table: the normalised raw profile of a
/// structurally valid bead and, when the fit succeeded, its fitted curve.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfileRow {
    pub image: ImageId,
    pub channel: ChannelIndex,
    pub bead: BeadId,
    pub raw: Vec<f64>,
    pub fitted: Option<Vec<f64>>,
}

/// Mean, median and standard deviation of one measurement over the valid
/// beads of a channel.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AggregateStat {
    pub mean: f64,
    pub median: f64,
    pub std: f64,
}

impl AggregateStat {
    /// Aggregate the given values; `None` when no finite value remains.
    pub fn from_values(values: &[f64]) -> Option<Self> {
        Some(Self {
            mean: stats::mean(values)?,
            median: stats::median(values)?,
            std: stats::std_dev(values)?,
        })
    }

    /// Convenience for optional per-bead measurements.
    pub fn from_options(values: &[Option<f64>]) -> Option<Self> {
        let present: Vec<f64> = values.iter().copied().flatten().collect();
        Self::from_values(&present)
    }
}

/// Measurements of the registered per-channel average bead.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AverageBeadMeasurements {
    /// (z, y, x) order, `None` where the axis fit failed.
    pub fit_r2: [Option<f64>; 3],
    pub fwhm_pixel: [Option<f64>; 3],
    pub fwhm_micron: [Option<f64>; 3],
    pub fwhm_lateral_asymmetry_ratio: Option<f64>,
}

/// Per-channel key measurements over all images of the dataset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelKeyMeasurements {
    pub channel: ChannelIndex,
    /// All detections; equals the sum of the per-class counts below.
    pub total_count: usize,
    pub valid_count: usize,
    pub lateral_edge_count: usize,
    pub self_proximity_count: usize,
    pub axial_edge_count: usize,
    pub intensity_outlier_count: usize,
    pub bad_fit_z_count: usize,
    pub bad_fit_y_count: usize,
    pub bad_fit_x_count: usize,
    pub intensity_max: Option<AggregateStat>,
    pub intensity_min: Option<AggregateStat>,
    pub intensity_std: Option<AggregateStat>,
    pub fit_r2_z: Option<AggregateStat>,
    pub fit_r2_y: Option<AggregateStat>,
    pub fit_r2_x: Option<AggregateStat>,
    pub fwhm_pixel_z: Option<AggregateStat>,
    pub fwhm_pixel_y: Option<AggregateStat>,
    pub fwhm_pixel_x: Option<AggregateStat>,
    pub fwhm_micron_z: Option<AggregateStat>,
    pub fwhm_micron_y: Option<AggregateStat>,
    pub fwhm_micron_x: Option<AggregateStat>,
    pub fwhm_lateral_asymmetry_ratio: Option<AggregateStat>,
    pub average_bead: Option<AverageBeadMeasurements>,
}

impl ChannelKeyMeasurements {
    pub fn count(&self, class: FlagClass) -> usize {
        match class {
            FlagClass::Valid => self.valid_count,
            FlagClass::LateralEdge => self.lateral_edge_count,
            FlagClass::SelfProximity => self.self_proximity_count,
            FlagClass::AxialEdge => self.axial_edge_count,
            FlagClass::IntensityOutlier => self.intensity_outlier_count,
            FlagClass::BadFitZ => self.bad_fit_z_count,
            FlagClass::BadFitY => self.bad_fit_y_count,
            FlagClass::BadFitX => self.bad_fit_x_count,
        }
    }
}

/// Raw crop of one detected bead, kept for provenance.
#[derive(Debug, Clone)]
pub struct BeadCrop {
    pub image: ImageId,
    pub channel: ChannelIndex,
    pub bead: BeadId,
    pub data: Array3<f64>,
}

/// Complete analysis output.
#[derive(Debug, Clone, Default)]
pub struct PsfBeadsOutput {
    /// One row per detected bead, across all images and channels.
    pub bead_records: Vec<BeadRecord>,
    /// Axial profiles of structurally valid beads.
    pub bead_profiles_z: Vec<ProfileRow>,
    /// Lateral y profiles of structurally valid beads.
    pub bead_profiles_y: Vec<ProfileRow>,
    /// Lateral x profiles of structurally valid beads.
    pub bead_profiles_x: Vec<ProfileRow>,
    /// One entry per channel, ordered by channel index.
    pub key_measurements: Vec<ChannelKeyMeasurements>,
    /// Centre-point ROIs, one per image and flag class with at least one
    /// member bead.
    pub rois: Vec<(FlagClass, Roi)>,
    /// Raw crops of every detection.
    pub bead_crops: Vec<BeadCrop>,
}

impl PsfBeadsOutput {
    /// ROIs of one flag class, in image order.
    pub fn rois_for(&self, class: FlagClass) -> impl Iterator<Item = &Roi> {
        self.rois
            .iter()
            .filter(move |(c, _)| *c == class)
            .map(|(_, roi)| roi)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> BeadRecord {
        BeadRecord {
            image: "img".into(),
            channel: ChannelIndex(0),
            bead: BeadId(0),
            center_z: 10,
            center_y: 20,
            center_x: 30,
            valid: true,
            lateral_edge: false,
            self_proximity: false,
            axial_edge: false,
            intensity_outlier: false,
            bad_fit_z: false,
            bad_fit_y: false,
            bad_fit_x: false,
            intensity_max: 1000.0,
            intensity_min: 10.0,
            intensity_std: 50.0,
            max_intensity_robust_z_score: 0.1,
            fit_r2_z: Some(0.99),
            fit_r2_y: Some(0.99),
            fit_r2_x: Some(0.99),
            fwhm_pixel_z: Some(7.0),
            fwhm_pixel_y: Some(3.0),
            fwhm_pixel_x: Some(3.1),
            fwhm_micron_z: None,
            fwhm_micron_y: None,
            fwhm_micron_x: None,
            fwhm_lateral_asymmetry_ratio: Some(1.03),
        }
    }

    #[test]
    fn primary_class_follows_precedence() {
        let mut r = record();
        assert_eq!(r.primary_class(), FlagClass::Valid);
        r.valid = false;
        r.bad_fit_x = true;
        assert_eq!(r.primary_class(), FlagClass::BadFitX);
        r.axial_edge = true;
        assert_eq!(r.primary_class(), FlagClass::AxialEdge);
        r.lateral_edge = true;
        assert_eq!(r.primary_class(), FlagClass::LateralEdge);
    }

    #[test]
    fn valid_rois_are_green_and_wide() {
        assert_eq!(FlagClass::Valid.stroke_color(), Color::new(0, 255, 0, 100));
        assert_eq!(FlagClass::Valid.stroke_width(), 8);
        assert_eq!(
            FlagClass::SelfProximity.stroke_color(),
            Color::new(255, 0, 0, 100)
        );
        assert_eq!(
            FlagClass::AxialEdge.stroke_color(),
            Color::new(0, 0, 255, 100)
        );
        assert_eq!(FlagClass::BadFitY.stroke_width(), 4);
    }

    #[test]
    fn aggregate_ignores_missing_values() {
        let stat = AggregateStat::from_options(&[Some(1.0), None, Some(3.0)]).unwrap();
        assert_eq!(stat.mean, 2.0);
        assert_eq!(stat.median, 2.0);
        assert!(AggregateStat::from_options(&[None, None]).is_none());
    }
}
