//! Bead detection in a 3D channel volume.
//!
//! Peaks are found on the maximum-intensity projection across z, which is
//! both faster than full 3D search and immune to axial anisotropy. Three
//! peak sets with increasingly strict policies (none, minimum spacing,
//! spacing plus border margin) partition the detections into structurally
//! valid beads, self-proximity rejects and lateral-edge rejects. The
//! partition is exact: the border filter runs on the distance-filtered set,
//! so no peak can land in two categories.

use std::collections::HashSet;

use ndarray::{s, Array2, Array3, Axis};

use crate::dataset::BeadId;
use crate::filters;

/// One detected bead position with its crop and structural classification.
#[derive(Debug, Clone)]
pub struct BeadCandidate {
    /// Sequential bead index within the channel, in detection scan order.
    pub id: BeadId,
    /// Voxel position of the intensity maximum, (z, y, x).
    pub center: [usize; 3],
    /// Sub-volume around the bead: full z extent, lateral half-width
    /// `floor(min_distance / 2)`, clipped (not padded) at volume borders.
    pub crop: Array3<f64>,
    /// Within the border margin of the lateral volume edge.
    pub lateral_edge: bool,
    /// Suppressed by a stronger peak closer than the minimum distance.
    pub self_proximity: bool,
}

impl BeadCandidate {
    /// True when neither structural exclusion applies; fit and intensity
    /// checks run only on these candidates.
    pub fn structurally_valid(&self) -> bool {
        !self.lateral_edge && !self.self_proximity
    }
}

/// Detect beads in one channel volume.
///
/// `sigma` smooths the volume before peak finding ((z, y, x) order; any zero
/// component disables smoothing entirely). `relative_threshold` suppresses
/// peaks below that fraction of the projection's global maximum. Zero
/// detections yield an empty collection, not an error.
pub fn find_beads(
    channel: &Array3<f64>,
    sigma: [f64; 3],
    min_distance: f64,
    relative_threshold: f64,
) -> Vec<BeadCandidate> {
    let smoothed_storage;
    let smoothed = if sigma.iter().all(|&s| s > 0.0) {
        smoothed_storage = filters::gaussian_smooth(channel, sigma);
        &smoothed_storage
    } else {
        channel
    };

    let projection = max_intensity_projection(smoothed);
    let all_peaks = local_maxima(&projection, relative_threshold);
    if all_peaks.is_empty() {
        return Vec::new();
    }

    let spaced = enforce_spacing(&projection, &all_peaks, min_distance);
    let margin = (min_distance / 2.0).ceil() as usize;
    let interior = exclude_border(&spaced, projection.dim(), margin);

    let spaced_set: HashSet<(usize, usize)> = spaced.iter().copied().collect();
    let interior_set: HashSet<(usize, usize)> = interior.iter().copied().collect();

    let half_width = (min_distance / 2.0).floor() as usize;
    let (_, height, width) = channel.dim();

    all_peaks
        .iter()
        .enumerate()
        .map(|(i, &(y, x))| {
            let self_proximity = !spaced_set.contains(&(y, x));
            let lateral_edge = !self_proximity && !interior_set.contains(&(y, x));

            let z = axial_focus(smoothed, y, x);

            let y0 = y.saturating_sub(half_width);
            let y1 = (y + half_width + 1).min(height);
            let x0 = x.saturating_sub(half_width);
            let x1 = (x + half_width + 1).min(width);
            let crop = channel.slice(s![.., y0..y1, x0..x1]).to_owned();

            BeadCandidate {
                id: BeadId(i),
                center: [z, y, x],
                crop,
                lateral_edge,
                self_proximity,
            }
        })
        .collect()
}

fn max_intensity_projection(volume: &Array3<f64>) -> Array2<f64> {
    volume.fold_axis(Axis(0), f64::NEG_INFINITY, |&acc, &v| acc.max(v))
}

/// z-slice of maximum intensity at a lateral position.
fn axial_focus(volume: &Array3<f64>, y: usize, x: usize) -> usize {
    let mut best = 0;
    let mut best_value = f64::NEG_INFINITY;
    for (z, &v) in volume.slice(s![.., y, x]).iter().enumerate() {
        if v > best_value {
            best_value = v;
            best = z;
        }
    }
    best
}

/// Local maxima of a 2D image above `relative_threshold * max`, in row-major
/// scan order.
///
/// A pixel counts as a peak when it is at least as bright as all of its
/// 8-neighbours and strictly brighter than at least one of them; a flat
/// two-pixel plateau therefore yields two peaks (later collapsed by the
/// spacing filter), while a uniform image yields none.
fn local_maxima(image: &Array2<f64>, relative_threshold: f64) -> Vec<(usize, usize)> {
    let (height, width) = image.dim();
    let global_max = image.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    if !(global_max > 0.0) {
        return Vec::new();
    }
    let threshold = relative_threshold * global_max;

    let mut peaks = Vec::new();
    for y in 0..height {
        for x in 0..width {
            let v = image[[y, x]];
            if v < threshold {
                continue;
            }
            let mut is_max = true;
            let mut strictly_above_one = false;
            let mut has_neighbour = false;
            for dy in -1isize..=1 {
                for dx in -1isize..=1 {
                    if dy == 0 && dx == 0 {
                        continue;
                    }
                    let ny = y as isize + dy;
                    let nx = x as isize + dx;
                    if ny < 0 || nx < 0 || ny >= height as isize || nx >= width as isize {
                        continue;
                    }
                    has_neighbour = true;
                    let n = image[[ny as usize, nx as usize]];
                    if n > v {
                        is_max = false;
                    } else if n < v {
                        strictly_above_one = true;
                    }
                }
            }
            if is_max && (strictly_above_one || !has_neighbour) {
                peaks.push((y, x));
            }
        }
    }
    peaks
}

/// Suppress peaks closer than `min_distance` (euclidean) to a stronger peak.
/// Intensity ties resolve by scan order, deterministically.
fn enforce_spacing(
    image: &Array2<f64>,
    peaks: &[(usize, usize)],
    min_distance: f64,
) -> Vec<(usize, usize)> {
    let mut order: Vec<usize> = (0..peaks.len()).collect();
    order.sort_by(|&a, &b| {
        image[[peaks[b].0, peaks[b].1]]
            .partial_cmp(&image[[peaks[a].0, peaks[a].1]])
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.cmp(&b))
    });

    let min_sq = min_distance * min_distance;
    let mut kept: Vec<(usize, usize)> = Vec::new();
    for i in order {
        let (y, x) = peaks[i];
        let conflict = kept.iter().any(|&(ky, kx)| {
            let dy = y as f64 - ky as f64;
            let dx = x as f64 - kx as f64;
            dy * dy + dx * dx < min_sq
        });
        if !conflict {
            kept.push((y, x));
        }
    }
    kept
}

/// Drop peaks within `margin` pixels of the lateral image border.
fn exclude_border(
    peaks: &[(usize, usize)],
    (height, width): (usize, usize),
    margin: usize,
) -> Vec<(usize, usize)> {
    peaks
        .iter()
        .copied()
        .filter(|&(y, x)| {
            y >= margin
                && x >= margin
                && y + margin < height
                && x + margin < width
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array3;

    /// Place unit impulses and smooth, mimicking sub-resolution beads.
    fn bead_volume(
        shape: (usize, usize, usize),
        positions: &[[usize; 3]],
        sigma: f64,
    ) -> Array3<f64> {
        let mut volume = Array3::zeros(shape);
        for &[z, y, x] in positions {
            volume[[z, y, x]] = 1000.0;
        }
        filters::gaussian_smooth(&volume, [sigma, sigma, sigma])
    }

    #[test]
    fn empty_volume_yields_no_beads() {
        let volume = Array3::zeros((11, 40, 40));
        let beads = find_beads(&volume, [0.0; 3], 10.0, 0.2);
        assert!(beads.is_empty());
    }

    #[test]
    fn single_bead_is_found_and_structurally_valid() {
        let volume = bead_volume((21, 41, 41), &[[10, 20, 23]], 1.5);
        let beads = find_beads(&volume, [0.0; 3], 10.0, 0.2);
        assert_eq!(beads.len(), 1);
        let bead = &beads[0];
        assert_eq!(bead.center, [10, 20, 23]);
        assert!(bead.structurally_valid());
        // Full z extent, lateral square of 2 * floor(10 / 2) + 1 = 11.
        assert_eq!(bead.crop.dim(), (21, 11, 11));
    }

    #[test]
    fn border_bead_is_flagged_lateral_edge() {
        // margin = ceil(10 / 2) = 5; y = 3 is inside the margin.
        let volume = bead_volume((15, 41, 41), &[[7, 3, 20]], 1.5);
        let beads = find_beads(&volume, [0.0; 3], 10.0, 0.2);
        assert_eq!(beads.len(), 1);
        assert!(beads[0].lateral_edge);
        assert!(!beads[0].self_proximity);
        assert!(!beads[0].structurally_valid());
        // Crop is clipped at the border, not padded.
        assert_eq!(beads[0].crop.dim().1, 3 + 5 + 1);
    }

    #[test]
    fn close_pair_keeps_stronger_and_flags_weaker() {
        let mut volume = bead_volume((15, 41, 41), &[[7, 20, 14]], 1.5);
        let weaker = bead_volume((15, 41, 41), &[[7, 20, 20]], 1.5);
        volume += &(weaker * 0.8);
        let beads = find_beads(&volume, [0.0; 3], 10.0, 0.2);
        assert_eq!(beads.len(), 2);
        let valid: Vec<_> = beads.iter().filter(|b| b.structurally_valid()).collect();
        let proximity: Vec<_> = beads.iter().filter(|b| b.self_proximity).collect();
        assert_eq!(valid.len(), 1);
        assert_eq!(proximity.len(), 1);
        assert_eq!(valid[0].center[2], 14);
        assert_eq!(proximity[0].center[2], 20);
    }

    #[test]
    fn structural_classification_is_a_partition() {
        let positions = [
            [7, 20, 10],
            [7, 20, 16], // too close to the previous one
            [7, 3, 30],  // lateral edge
            [7, 30, 30],
        ];
        let volume = bead_volume((15, 41, 41), &positions, 1.5);
        let beads = find_beads(&volume, [0.0; 3], 10.0, 0.2);
        let valid = beads.iter().filter(|b| b.structurally_valid()).count();
        let proximity = beads.iter().filter(|b| b.self_proximity).count();
        let edge = beads.iter().filter(|b| b.lateral_edge).count();
        assert_eq!(valid + proximity + edge, beads.len());
        assert!(beads
            .iter()
            .all(|b| !(b.self_proximity && b.lateral_edge)));
        assert_eq!(valid, 2);
        assert_eq!(proximity, 1);
        assert_eq!(edge, 1);
    }

    #[test]
    fn dim_peak_below_relative_threshold_is_ignored() {
        let mut volume = bead_volume((15, 41, 41), &[[7, 12, 12]], 1.5);
        let faint = bead_volume((15, 41, 41), &[[7, 30, 30]], 1.5);
        volume += &(faint * 0.05);
        let beads = find_beads(&volume, [0.0; 3], 10.0, 0.2);
        assert_eq!(beads.len(), 1);
        assert_eq!(beads[0].center[1..], [12, 12]);
    }

    #[test]
    fn smoothing_merges_noise_into_single_peak() {
        let mut volume = Array3::zeros((9, 31, 31));
        volume[[4, 15, 15]] = 100.0;
        // Shot-noise speckle near the bead.
        volume[[4, 15, 16]] = 60.0;
        volume[[4, 16, 15]] = 55.0;
        let beads = find_beads(&volume, [1.0, 1.0, 1.0], 8.0, 0.2);
        assert_eq!(beads.len(), 1);
    }

    #[test]
    fn adjacent_equal_peaks_collapse_to_proximity_pair() {
        // Two beads one pixel apart form a two-pixel plateau; both plateau
        // pixels are detected and the spacing filter keeps one.
        let mut volume = Array3::zeros((9, 41, 41));
        volume[[4, 20, 20]] = 100.0;
        volume[[4, 20, 21]] = 100.0;
        let beads = find_beads(&volume, [0.0; 3], 10.0, 0.2);
        assert_eq!(beads.len(), 2);
        assert_eq!(beads.iter().filter(|b| b.structurally_valid()).count(), 1);
        assert_eq!(beads.iter().filter(|b| b.self_proximity).count(), 1);
    }
}
