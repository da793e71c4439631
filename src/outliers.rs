//! Robust intensity outlier classification.
//!
//! Scores are robust z-scores of the maximum bead intensity, computed
//! against the median and MAD of the structurally valid population only.
//! Small populations are scored but never rejected, so a sparse field of
//! view cannot lose beads to statistics that do not yet mean anything.

use crate::stats;

/// Below this many structurally valid beads no rejection takes place.
pub const MIN_SAMPLES_FOR_REJECTION: usize = 6;

/// Per-bead outlier scores and rejection flags, index-aligned with the
/// input.
#[derive(Debug, Clone)]
pub struct OutlierClassification {
    pub scores: Vec<f64>,
    pub outlier: Vec<bool>,
}

/// Classify intensity outliers among the eligible (structurally valid)
/// beads.
///
/// Every bead receives a score relative to the eligible population; only
/// eligible beads can be flagged, and only when the population has at
/// least [`MIN_SAMPLES_FOR_REJECTION`] members. A population of one
/// scores 0 throughout, there being nothing to deviate from.
pub fn classify_intensity_outliers(
    intensity_max: &[f64],
    eligible: &[bool],
    threshold: f64,
) -> OutlierClassification {
    debug_assert_eq!(intensity_max.len(), eligible.len());

    let population: Vec<f64> = intensity_max
        .iter()
        .zip(eligible)
        .filter(|(_, &e)| e)
        .map(|(&v, _)| v)
        .collect();

    let n = population.len();
    if n <= 1 {
        return OutlierClassification {
            scores: vec![0.0; intensity_max.len()],
            outlier: vec![false; intensity_max.len()],
        };
    }

    let (center, mad) = match (
        stats::median(&population),
        stats::median_absolute_deviation(&population),
    ) {
        (Some(center), Some(mad)) => (center, mad),
        _ => {
            return OutlierClassification {
                scores: vec![0.0; intensity_max.len()],
                outlier: vec![false; intensity_max.len()],
            }
        }
    };

    let scores: Vec<f64> = intensity_max
        .iter()
        .map(|&v| stats::robust_z_score(v, center, mad))
        .collect();

    let outlier = if n >= MIN_SAMPLES_FOR_REJECTION {
        scores
            .iter()
            .zip(eligible)
            .map(|(&score, &e)| e && score.abs() > threshold)
            .collect()
    } else {
        vec![false; intensity_max.len()]
    };

    OutlierClassification { scores, outlier }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn lone_bead_scores_zero() {
        let result = classify_intensity_outliers(&[1234.0], &[true], 2.0);
        assert_relative_eq!(result.scores[0], 0.0);
        assert!(!result.outlier[0]);
    }

    #[test]
    fn small_population_is_scored_but_never_rejected() {
        let intensities = [100.0, 101.0, 99.0, 100.0, 5000.0];
        let eligible = [true; 5];
        let result = classify_intensity_outliers(&intensities, &eligible, 2.0);
        assert!(result.scores[4].abs() > 2.0);
        assert!(result.outlier.iter().all(|&o| !o));
    }

    #[test]
    fn large_population_rejects_beyond_threshold() {
        let intensities = [100.0, 101.0, 99.0, 100.0, 102.0, 5000.0];
        let eligible = [true; 6];
        let result = classify_intensity_outliers(&intensities, &eligible, 2.0);
        assert!(result.outlier[5]);
        assert_eq!(result.outlier.iter().filter(|&&o| o).count(), 1);
    }

    #[test]
    fn ineligible_beads_are_scored_but_not_flagged() {
        let intensities = [100.0, 101.0, 99.0, 100.0, 102.0, 101.0, 9000.0];
        let mut eligible = [true; 7];
        eligible[6] = false; // edge bead, excluded from the population
        let result = classify_intensity_outliers(&intensities, &eligible, 2.0);
        assert!(result.scores[6].abs() > 2.0);
        assert!(!result.outlier[6]);
    }

    #[test]
    fn ineligible_beads_do_not_skew_the_population() {
        // The dim edge bead must not drag the median down.
        let intensities = [1.0, 1000.0, 1001.0, 999.0, 1000.0, 1002.0, 998.0];
        let mut eligible = [true; 7];
        eligible[0] = false;
        let result = classify_intensity_outliers(&intensities, &eligible, 2.0);
        assert!(result.outlier.iter().skip(1).all(|&o| !o));
        assert!(result.scores[0] < -2.0);
    }

    #[test]
    fn identical_population_rejects_nothing() {
        // MAD of zero degrades every score to zero.
        let intensities = [100.0, 100.0, 100.0, 100.0, 100.0, 100.0];
        let result = classify_intensity_outliers(&intensities, &[true; 6], 2.0);
        assert!(result.outlier.iter().all(|&o| !o));
    }
}
