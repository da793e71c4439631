//! Per-bead intensity profiling and model fitting.
//!
//! A bead crop is reduced to three 1D intensity profiles through its focus
//! voxel, one per axis. Each profile is min-max normalised and fitted with
//! the configured model; a failed fit on one axis never aborts the bead or
//! the run, it surfaces as a per-axis `Err` for the caller to classify.

use ndarray::{s, Array3};

use crate::dataset::VoxelSize;
use crate::error::FittingError;
use crate::fitting::{self, ProfileFit, ProfileModel};

/// One of the three volume axes, in (z, y, x) storage order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProfileAxis {
    Z,
    Y,
    X,
}

impl ProfileAxis {
    pub const ALL: [ProfileAxis; 3] = [ProfileAxis::Z, ProfileAxis::Y, ProfileAxis::X];

    pub fn index(self) -> usize {
        match self {
            ProfileAxis::Z => 0,
            ProfileAxis::Y => 1,
            ProfileAxis::X => 2,
        }
    }
}

impl std::fmt::Display for ProfileAxis {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProfileAxis::Z => write!(f, "z"),
            ProfileAxis::Y => write!(f, "y"),
            ProfileAxis::X => write!(f, "x"),
        }
    }
}

/// One axis of a bead: the normalised raw profile, always present, and the
/// fit outcome. The profile is kept on fit failure so the reporting tables
/// stay complete.
#[derive(Debug, Clone)]
pub struct AxisProfile {
    pub profile: Vec<f64>,
    pub fit: Result<ProfileFit, FittingError>,
}

/// Raw intensity summary of a bead crop.
#[derive(Debug, Clone, Copy)]
pub struct IntensityStats {
    pub max: f64,
    pub min: f64,
    pub std: f64,
}

/// Profiling result for a single bead.
#[derive(Debug, Clone)]
pub struct ProcessedBead {
    pub z: AxisProfile,
    pub y: AxisProfile,
    pub x: AxisProfile,
    /// Focus voxel within the crop, (z, y, x).
    pub focus: [usize; 3],
    /// Focal plane closer than four axial FWHMs to either end of the stack.
    /// False when the z fit failed.
    pub axial_edge: bool,
    pub intensity: IntensityStats,
}

impl ProcessedBead {
    pub fn axis(&self, axis: ProfileAxis) -> &AxisProfile {
        match axis {
            ProfileAxis::Z => &self.z,
            ProfileAxis::Y => &self.y,
            ProfileAxis::X => &self.x,
        }
    }

    pub fn fit_r2(&self, axis: ProfileAxis) -> Option<f64> {
        self.axis(axis).fit.as_ref().ok().map(|f| f.r2)
    }

    pub fn fwhm_pixel(&self, axis: ProfileAxis) -> Option<f64> {
        self.axis(axis).fit.as_ref().ok().map(|f| f.fwhm)
    }

    pub fn fwhm_micron(&self, axis: ProfileAxis, voxel: Option<VoxelSize>) -> Option<f64> {
        let voxel = voxel?;
        let scale = match axis {
            ProfileAxis::Z => voxel.z,
            ProfileAxis::Y => voxel.y,
            ProfileAxis::X => voxel.x,
        };
        self.fwhm_pixel(axis).map(|fwhm| fwhm * scale)
    }

    /// Ratio of the larger to the smaller lateral FWHM; 1.0 is a round bead.
    pub fn lateral_asymmetry_ratio(&self) -> Option<f64> {
        let y = self.fwhm_pixel(ProfileAxis::Y)?;
        let x = self.fwhm_pixel(ProfileAxis::X)?;
        Some(y.max(x) / y.min(x))
    }
}

/// Minimum axial clearance, in units of the fitted axial FWHM, between the
/// focal plane and either end of the z stack.
const AXIAL_EDGE_CLEARANCE_FWHM: f64 = 4.0;

/// Profile and fit one bead crop.
pub fn process_bead(crop: &Array3<f64>, model: ProfileModel) -> ProcessedBead {
    let focus = focus_voxel(crop);
    let [fz, fy, fx] = focus;

    let profile_z = normalize(crop.slice(s![.., fy, fx]).to_vec());
    let profile_y = normalize(crop.slice(s![fz, .., fx]).to_vec());
    let profile_x = normalize(crop.slice(s![fz, fy, ..]).to_vec());

    let fit_axis = |profile: Vec<f64>| -> AxisProfile {
        let fit = fitting::fit_profile(&profile, model);
        AxisProfile { profile, fit }
    };

    let z = fit_axis(profile_z);
    let y = fit_axis(profile_y);
    let x = fit_axis(profile_x);

    let axial_edge = match &z.fit {
        Ok(fit) => {
            let len = z.profile.len() as f64;
            let clearance = AXIAL_EDGE_CLEARANCE_FWHM * fit.fwhm;
            fit.center < clearance || len - fit.center < clearance
        }
        Err(_) => false,
    };

    ProcessedBead {
        z,
        y,
        x,
        focus,
        axial_edge,
        intensity: intensity_stats(crop),
    }
}

/// Raw intensity summary of a crop, independent of any fit.
pub fn intensity_stats(crop: &Array3<f64>) -> IntensityStats {
    let values: Vec<f64> = crop.iter().copied().collect();
    IntensityStats {
        max: values.iter().copied().fold(f64::NEG_INFINITY, f64::max),
        min: values.iter().copied().fold(f64::INFINITY, f64::min),
        std: crate::stats::std_dev(&values).unwrap_or(0.0),
    }
}

/// Per-axis argmax of the axis-wise maximum projections. More stable than
/// the global 3D argmax when two voxels tie.
fn focus_voxel(crop: &Array3<f64>) -> [usize; 3] {
    let (depth, height, width) = crop.dim();
    let mut best = [0usize; 3];
    let mut best_values = [f64::NEG_INFINITY; 3];
    for z in 0..depth {
        for y in 0..height {
            for x in 0..width {
                let v = crop[[z, y, x]];
                for (axis, position) in [z, y, x].into_iter().enumerate() {
                    if v > best_values[axis] {
                        best_values[axis] = v;
                        best[axis] = position;
                    }
                }
            }
        }
    }
    best
}

/// Min-max normalise to [0, 1]. A flat profile is returned unchanged; the
/// fit rejects it as degenerate.
fn normalize(profile: Vec<f64>) -> Vec<f64> {
    let min = profile.iter().copied().fold(f64::INFINITY, f64::min);
    let max = profile.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let range = max - min;
    if !(range > 1e-12) {
        return profile;
    }
    profile.into_iter().map(|v| (v - min) / range).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::Array3;

    fn gaussian_bead(
        shape: (usize, usize, usize),
        center: [f64; 3],
        sigma: [f64; 3],
        amplitude: f64,
        offset: f64,
    ) -> Array3<f64> {
        Array3::from_shape_fn(shape, |(z, y, x)| {
            let dz = (z as f64 - center[0]) / sigma[0];
            let dy = (y as f64 - center[1]) / sigma[1];
            let dx = (x as f64 - center[2]) / sigma[2];
            offset + amplitude * (-0.5 * (dz * dz + dy * dy + dx * dx)).exp()
        })
    }

    #[test]
    fn centered_bead_fits_on_all_axes() {
        let crop = gaussian_bead((41, 15, 15), [20.0, 7.0, 7.0], [3.0, 1.8, 1.8], 900.0, 50.0);
        let processed = process_bead(&crop, ProfileModel::Gaussian);
        assert_eq!(processed.focus, [20, 7, 7]);
        assert!(!processed.axial_edge);
        for axis in ProfileAxis::ALL {
            let r2 = processed.fit_r2(axis).unwrap();
            assert!(r2 > 0.99, "axis {axis}: r2 = {r2}");
        }
        assert_relative_eq!(
            processed.fwhm_pixel(ProfileAxis::Z).unwrap(),
            2.3548 * 3.0,
            max_relative = 0.05
        );
        assert_relative_eq!(processed.lateral_asymmetry_ratio().unwrap(), 1.0, epsilon = 0.05);
    }

    #[test]
    fn elongated_bead_has_asymmetry_above_one() {
        let crop = gaussian_bead((31, 17, 17), [15.0, 8.0, 8.0], [3.0, 3.2, 1.6], 500.0, 10.0);
        let processed = process_bead(&crop, ProfileModel::Gaussian);
        assert!(processed.lateral_asymmetry_ratio().unwrap() > 1.5);
    }

    #[test]
    fn focal_plane_near_stack_end_is_axial_edge() {
        let crop = gaussian_bead((41, 15, 15), [3.0, 7.0, 7.0], [3.0, 1.8, 1.8], 900.0, 0.0);
        let processed = process_bead(&crop, ProfileModel::Gaussian);
        assert!(processed.axial_edge);
    }

    #[test]
    fn flat_crop_reports_degenerate_fits_without_panicking() {
        let crop = Array3::from_elem((21, 11, 11), 42.0);
        let processed = process_bead(&crop, ProfileModel::Gaussian);
        for axis in ProfileAxis::ALL {
            let axis_profile = processed.axis(axis);
            assert!(axis_profile.fit.is_err());
            // The raw profile survives a failed fit.
            assert!(!axis_profile.profile.is_empty());
        }
        assert!(!processed.axial_edge);
        assert_relative_eq!(processed.intensity.std, 0.0);
    }

    #[test]
    fn intensity_stats_come_from_raw_crop() {
        let crop = gaussian_bead((21, 11, 11), [10.0, 5.0, 5.0], [2.0, 1.5, 1.5], 800.0, 100.0);
        let processed = process_bead(&crop, ProfileModel::Gaussian);
        assert_relative_eq!(processed.intensity.max, 900.0, max_relative = 1e-6);
        assert!(processed.intensity.min >= 100.0);
        assert!(processed.intensity.std > 0.0);
    }

    #[test]
    fn micron_conversion_uses_per_axis_voxel_size() {
        let crop = gaussian_bead((41, 15, 15), [20.0, 7.0, 7.0], [3.0, 1.8, 1.8], 900.0, 0.0);
        let processed = process_bead(&crop, ProfileModel::Gaussian);
        let voxel = VoxelSize { z: 0.3, y: 0.1, x: 0.1 };
        let fwhm_z_px = processed.fwhm_pixel(ProfileAxis::Z).unwrap();
        assert_relative_eq!(
            processed.fwhm_micron(ProfileAxis::Z, Some(voxel)).unwrap(),
            fwhm_z_px * 0.3
        );
        assert_eq!(processed.fwhm_micron(ProfileAxis::Z, None), None);
    }
}
