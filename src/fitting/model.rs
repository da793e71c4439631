//! 1D intensity profile models.
//!
//! Both models share the parameter vector `[amplitude, center, width,
//! offset]`; `width` is a shape scale whose meaning depends on the model
//! (Gaussian sigma, or the radial scale of the Airy argument). Widths are
//! taken by absolute value so the optimizer can roam freely.

use scilib::math::bessel;
use serde::{Deserialize, Serialize};

/// FWHM of a unit-sigma Gaussian: `2 * sqrt(2 ln 2)`.
pub const GAUSSIAN_FWHM_FACTOR: f64 = 2.354_820_045_030_949;

/// Radius at which the Airy core `(2 J1(r)/r)^2` falls to half maximum.
pub const AIRY_HALF_MAX_RADIUS: f64 = 1.616_339_948_310_703;

/// Model fitted to per-axis bead profiles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProfileModel {
    /// Gaussian approximation of the PSF core.
    Gaussian,
    /// Airy pattern of a circular aperture; the physically faithful choice
    /// for diffraction-limited optics.
    Airy,
}

impl ProfileModel {
    /// Evaluate the model at position `x` with parameters
    /// `[amplitude, center, width, offset]`.
    pub fn eval(&self, params: &[f64; 4], x: f64) -> f64 {
        let [amplitude, center, width, offset] = *params;
        let width = width.abs().max(1e-9);
        match self {
            ProfileModel::Gaussian => {
                let d = (x - center) / width;
                offset + amplitude * (-0.5 * d * d).exp()
            }
            ProfileModel::Airy => {
                let r = (x - center) / width;
                offset + amplitude * airy_core(r)
            }
        }
    }

    /// Full width at half maximum for a fitted `width` parameter.
    pub fn fwhm(&self, width: f64) -> f64 {
        let width = width.abs();
        match self {
            ProfileModel::Gaussian => GAUSSIAN_FWHM_FACTOR * width,
            ProfileModel::Airy => 2.0 * AIRY_HALF_MAX_RADIUS * width,
        }
    }

    /// Invert [`ProfileModel::fwhm`] for initial-guess construction.
    pub fn width_from_fwhm(&self, fwhm: f64) -> f64 {
        match self {
            ProfileModel::Gaussian => fwhm / GAUSSIAN_FWHM_FACTOR,
            ProfileModel::Airy => fwhm / (2.0 * AIRY_HALF_MAX_RADIUS),
        }
    }
}

/// Normalized Airy intensity `(2 J1(r)/r)^2`, with the removable singularity
/// at the origin handled explicitly.
fn airy_core(r: f64) -> f64 {
    if r.abs() < 1e-10 {
        return 1.0;
    }
    let j1 = bessel::j_n(1, r);
    let term = 2.0 * j1 / r;
    term * term
}
