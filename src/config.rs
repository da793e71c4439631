//! Numeric configuration for the bead analysis pipeline.

use serde::{Deserialize, Serialize};

use crate::error::AnalysisError;
use crate::fitting::ProfileModel;

/// Tunable parameters consumed by the pipeline.
///
/// Defaults follow the values commonly used for sub-resolution bead slides on
/// widefield and confocal systems.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisConfig {
    /// Gaussian smoothing sigma per axis, (z, y, x), in voxels. Smoothing is
    /// skipped entirely if any component is zero.
    pub smoothing_sigma: [f64; 3],
    /// Minimum lateral distance between beads, in voxels. Also fixes the
    /// crop half-width (`min_bead_distance / 2`, floored) and the lateral
    /// border margin (`min_bead_distance / 2`, ceiled).
    pub min_bead_distance: f64,
    /// Peaks below this fraction of the projection's global maximum are
    /// treated as noise.
    pub peak_relative_threshold: f64,
    /// Declared input parameter reserved for SNR-based bead rejection; part
    /// of the input contract but not consulted by the current pipeline.
    pub snr_threshold: f64,
    /// Per-axis fits with R² below this value flag the bead as a bad fit on
    /// that axis.
    pub fit_r2_threshold: f64,
    /// Beads whose max intensity deviates by more than this robust z-score
    /// from the dataset median are flagged as intensity outliers.
    pub robust_z_score_threshold: f64,
    /// Profile model fitted to the per-axis bead profiles.
    pub profile_model: ProfileModel,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            smoothing_sigma: [1.0, 1.0, 1.0],
            min_bead_distance: 20.0,
            peak_relative_threshold: 0.2,
            snr_threshold: 10.0,
            fit_r2_threshold: 0.85,
            robust_z_score_threshold: 2.0,
            profile_model: ProfileModel::Airy,
        }
    }
}

impl AnalysisConfig {
    /// Range-check the configuration before a run.
    pub fn validate(&self) -> Result<(), AnalysisError> {
        if self.smoothing_sigma.iter().any(|&s| s < 0.0) {
            return Err(AnalysisError::InvalidConfig {
                reason: format!("smoothing_sigma must be non-negative, got {:?}", self.smoothing_sigma),
            });
        }
        if !self.min_bead_distance.is_finite() || self.min_bead_distance < 2.0 {
            return Err(AnalysisError::InvalidConfig {
                reason: format!(
                    "min_bead_distance must be at least 2 voxels, got {}",
                    self.min_bead_distance
                ),
            });
        }
        if !(0.0..=1.0).contains(&self.peak_relative_threshold) {
            return Err(AnalysisError::InvalidConfig {
                reason: format!(
                    "peak_relative_threshold must be within 0..=1, got {}",
                    self.peak_relative_threshold
                ),
            });
        }
        if !(0.0..=1.0).contains(&self.fit_r2_threshold) {
            return Err(AnalysisError::InvalidConfig {
                reason: format!("fit_r2_threshold must be within 0..=1, got {}", self.fit_r2_threshold),
            });
        }
        if !self.robust_z_score_threshold.is_finite() || self.robust_z_score_threshold <= 0.0 {
            return Err(AnalysisError::InvalidConfig {
                reason: format!(
                    "robust_z_score_threshold must be positive, got {}",
                    self.robust_z_score_threshold
                ),
            });
        }
        Ok(())
    }

    /// True when smoothing is enabled on every axis.
    pub fn smoothing_enabled(&self) -> bool {
        self.smoothing_sigma.iter().all(|&s| s > 0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(AnalysisConfig::default().validate().is_ok());
    }

    #[test]
    fn zero_sigma_disables_smoothing() {
        let config = AnalysisConfig {
            smoothing_sigma: [0.0, 1.0, 1.0],
            ..AnalysisConfig::default()
        };
        assert!(config.validate().is_ok());
        assert!(!config.smoothing_enabled());
    }

    #[test]
    fn tiny_min_distance_is_rejected() {
        let config = AnalysisConfig {
            min_bead_distance: 1.0,
            ..AnalysisConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(AnalysisError::InvalidConfig { .. })
        ));
    }
}
