//! Separable Gaussian smoothing for 3D channel volumes.
//!
//! Detection smooths the volume before peak finding; the registration module
//! reuses the same kernel to realize its synthetic Gaussian reference. The
//! filter runs one axis at a time with an edge-extended boundary, matching
//! the nearest-neighbour border handling used elsewhere in the pipeline.

use ndarray::{Array3, Axis};

/// Normalized 1D Gaussian kernel truncated at 4 sigma.
///
/// A non-positive sigma yields the identity kernel.
pub fn gaussian_kernel(sigma: f64) -> Vec<f64> {
    if sigma <= 0.0 {
        return vec![1.0];
    }
    let radius = (4.0 * sigma).ceil() as usize;
    let mut kernel: Vec<f64> = (0..=2 * radius)
        .map(|i| {
            let d = i as f64 - radius as f64;
            (-d * d / (2.0 * sigma * sigma)).exp()
        })
        .collect();
    let sum: f64 = kernel.iter().sum();
    for w in &mut kernel {
        *w /= sum;
    }
    kernel
}

/// Smooth a volume with a separable Gaussian, sigma given per axis in
/// (z, y, x) order. Axes with sigma zero are left untouched.
pub fn gaussian_smooth(volume: &Array3<f64>, sigma: [f64; 3]) -> Array3<f64> {
    let mut smoothed = volume.clone();
    for (axis, &s) in sigma.iter().enumerate() {
        if s > 0.0 {
            let kernel = gaussian_kernel(s);
            smooth_axis(&mut smoothed, Axis(axis), &kernel);
        }
    }
    smoothed
}

/// Convolve every lane along `axis` with `kernel`, extending edge values.
fn smooth_axis(volume: &mut Array3<f64>, axis: Axis, kernel: &[f64]) {
    let radius = kernel.len() / 2;
    let mut line = Vec::new();
    for mut lane in volume.lanes_mut(axis) {
        line.clear();
        line.extend(lane.iter().copied());
        let len = line.len() as isize;
        for (i, out) in lane.iter_mut().enumerate() {
            let mut acc = 0.0;
            for (k, &w) in kernel.iter().enumerate() {
                let j = (i as isize + k as isize - radius as isize).clamp(0, len - 1);
                acc += w * line[j as usize];
            }
            *out = acc;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::Array3;

    #[test]
    fn kernel_is_normalized_and_symmetric() {
        let kernel = gaussian_kernel(1.5);
        let sum: f64 = kernel.iter().sum();
        assert_relative_eq!(sum, 1.0, epsilon = 1e-12);
        let n = kernel.len();
        assert_eq!(n % 2, 1);
        for i in 0..n / 2 {
            assert_relative_eq!(kernel[i], kernel[n - 1 - i], epsilon = 1e-12);
        }
    }

    #[test]
    fn zero_sigma_kernel_is_identity() {
        assert_eq!(gaussian_kernel(0.0), vec![1.0]);
    }

    #[test]
    fn constant_volume_is_invariant() {
        let volume = Array3::from_elem((5, 7, 7), 3.25);
        let smoothed = gaussian_smooth(&volume, [1.0, 1.5, 1.5]);
        for &v in smoothed.iter() {
            assert_relative_eq!(v, 3.25, epsilon = 1e-12);
        }
    }

    #[test]
    fn smoothing_preserves_total_mass_away_from_edges() {
        let mut volume = Array3::zeros((21, 21, 21));
        volume[[10, 10, 10]] = 100.0;
        let smoothed = gaussian_smooth(&volume, [1.0, 1.0, 1.0]);
        let total: f64 = smoothed.iter().sum();
        assert_relative_eq!(total, 100.0, epsilon = 1e-6);
        // Peak stays at the impulse location.
        let mut max_pos = (0, 0, 0);
        let mut max_val = f64::NEG_INFINITY;
        for ((z, y, x), &v) in smoothed.indexed_iter() {
            if v > max_val {
                max_val = v;
                max_pos = (z, y, x);
            }
        }
        assert_eq!(max_pos, (10, 10, 10));
    }

    #[test]
    fn per_axis_sigma_spreads_anisotropically() {
        let mut volume = Array3::zeros((15, 15, 15));
        volume[[7, 7, 7]] = 1.0;
        let smoothed = gaussian_smooth(&volume, [2.0, 0.5, 0.5]);
        // More spread along z than along y.
        assert!(smoothed[[9, 7, 7]] > smoothed[[7, 9, 7]]);
    }
}
