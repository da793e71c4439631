//! Volume registration for bead averaging.
//!
//! Alignment works by cross-correlating a bead crop against a reference (or
//! a synthetic centred Gaussian when none is given), then reading the
//! sub-voxel peak position from per-axis Gaussian fits of the correlation
//! profiles through the peak. Crops are recentred with linear, edge-extended
//! resampling before averaging.

use ndarray::Array3;

use crate::error::FittingError;
use crate::filters;
use crate::fitting::{fit_profile, ProfileModel};

/// Spatial cross-correlation with "same"-sized output.
///
/// `reference` is indexed around its own centre, so a symmetric reference
/// peaked at its centre produces a correlation maximum at the data's peak
/// position. Out-of-bounds data samples contribute zero.
pub fn correlate_same(data: &Array3<f64>, reference: &Array3<f64>) -> Array3<f64> {
    let (dz, dy, dx) = data.dim();
    let (rz, ry, rx) = reference.dim();
    let (cz, cy, cx) = (rz / 2, ry / 2, rx / 2);

    let mut out = Array3::zeros((dz, dy, dx));
    for ((z, y, x), o) in out.indexed_iter_mut() {
        let mut acc = 0.0;
        for ((kz, ky, kx), &w) in reference.indexed_iter() {
            if w == 0.0 {
                continue;
            }
            let sz = z as isize + kz as isize - cz as isize;
            let sy = y as isize + ky as isize - cy as isize;
            let sx = x as isize + kx as isize - cx as isize;
            if sz < 0 || sy < 0 || sx < 0 {
                continue;
            }
            let (sz, sy, sx) = (sz as usize, sy as usize, sx as usize);
            if sz >= dz || sy >= dy || sx >= dx {
                continue;
            }
            acc += data[[sz, sy, sx]] * w;
        }
        *o = acc;
    }
    out
}

/// Sub-voxel displacement of a volume's correlation peak from the volume
/// centre, per axis in (z, y, x) order.
///
/// With `reference = None` the volume is correlated against a synthetic
/// centred Gaussian (sigma 1); since that kernel is symmetric and
/// normalized, the correlation reduces to Gaussian smoothing of the data.
pub fn find_displacement(
    data: &Array3<f64>,
    reference: Option<&Array3<f64>>,
) -> Result<[f64; 3], FittingError> {
    let correlation = match reference {
        Some(reference) => correlate_same(data, reference),
        None => filters::gaussian_smooth(data, [1.0, 1.0, 1.0]),
    };

    let peak = argmax3(&correlation);
    let dims = correlation.dim();
    let dims = [dims.0, dims.1, dims.2];

    let mut displacement = [0.0; 3];
    for axis in 0..3 {
        let profile = axis_profile(&correlation, peak, axis);
        let fit = fit_profile(&profile, ProfileModel::Gaussian)?;
        displacement[axis] = fit.center - (dims[axis] / 2) as f64;
    }
    Ok(displacement)
}

/// Translate a volume by `shift` voxels per axis: `output[i] = input[i - shift]`,
/// sampled with trilinear interpolation and edge-extended boundaries.
pub fn translate(volume: &Array3<f64>, shift: [f64; 3]) -> Array3<f64> {
    let (dz, dy, dx) = volume.dim();
    let mut out = Array3::zeros((dz, dy, dx));
    for ((z, y, x), o) in out.indexed_iter_mut() {
        let src = [
            z as f64 - shift[0],
            y as f64 - shift[1],
            x as f64 - shift[2],
        ];
        *o = trilinear_clamped(volume, src);
    }
    out
}

fn argmax3(volume: &Array3<f64>) -> [usize; 3] {
    let mut best = [0, 0, 0];
    let mut best_value = f64::NEG_INFINITY;
    for ((z, y, x), &v) in volume.indexed_iter() {
        if v > best_value {
            best_value = v;
            best = [z, y, x];
        }
    }
    best
}

/// 1D profile through `point` along `axis`.
fn axis_profile(volume: &Array3<f64>, point: [usize; 3], axis: usize) -> Vec<f64> {
    let dims = volume.dim();
    let dims = [dims.0, dims.1, dims.2];
    (0..dims[axis])
        .map(|i| {
            let mut index = point;
            index[axis] = i;
            volume[[index[0], index[1], index[2]]]
        })
        .collect()
}

/// Trilinear interpolation at a fractional coordinate, clamping to the
/// volume bounds (edge extension).
fn trilinear_clamped(volume: &Array3<f64>, position: [f64; 3]) -> f64 {
    let (dz, dy, dx) = volume.dim();
    let dims = [dz, dy, dx];

    let mut base = [0usize; 3];
    let mut frac = [0.0f64; 3];
    for axis in 0..3 {
        let clamped = position[axis].clamp(0.0, (dims[axis] - 1) as f64);
        let floor = clamped.floor();
        base[axis] = floor as usize;
        frac[axis] = clamped - floor;
    }

    let mut value = 0.0;
    for corner in 0..8u8 {
        let mut weight = 1.0;
        let mut index = [0usize; 3];
        for axis in 0..3 {
            if corner >> axis & 1 == 1 {
                index[axis] = (base[axis] + 1).min(dims[axis] - 1);
                weight *= frac[axis];
            } else {
                index[axis] = base[axis];
                weight *= 1.0 - frac[axis];
            }
        }
        if weight > 0.0 {
            value += weight * volume[[index[0], index[1], index[2]]];
        }
    }
    value
}
