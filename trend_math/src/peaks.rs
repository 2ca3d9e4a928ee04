//! Prominence-based peak finding
//!
//! Local maxima are located first (flat tops resolve to their midpoint),
//! thinned by a minimum sample distance giving priority to taller peaks,
//! and finally filtered on topographic prominence.

use crate::{ensure_finite, MathError, Result};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// Thresholds applied by [`find_peaks`]
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PeakParams {
    /// Minimum horizontal distance in samples between neighbouring peaks
    pub distance: f64,
    /// Minimum prominence a peak must reach
    pub prominence: f64,
}

impl PeakParams {
    /// Create a new parameter pair
    pub fn new(distance: f64, prominence: f64) -> Self {
        Self {
            distance,
            prominence,
        }
    }
}

/// Peaks found in a series
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PeakSet {
    /// Sample indices of the peaks, ascending
    pub indices: Vec<usize>,
    /// Prominence of each peak, aligned with `indices`
    pub prominences: Vec<f64>,
}

impl PeakSet {
    pub fn len(&self) -> usize {
        self.indices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    /// Mean prominence, `None` when there are no peaks
    pub fn mean_prominence(&self) -> Option<f64> {
        crate::mean(&self.prominences)
    }
}

/// Find peaks satisfying both the distance and prominence thresholds
pub fn find_peaks(data: &[f64], params: &PeakParams) -> Result<PeakSet> {
    ensure_finite(data, "peak input")?;
    if !(params.distance >= 1.0) {
        return Err(MathError::InvalidInput(format!(
            "Peak distance must be at least 1, got {}",
            params.distance
        )));
    }

    let mut peaks = local_maxima(data);

    // Distance filter runs before prominence, tallest peaks win
    let keep = select_by_distance(data, &peaks, params.distance);
    peaks = peaks
        .into_iter()
        .zip(keep)
        .filter_map(|(p, k)| k.then_some(p))
        .collect();

    let prominences = peak_prominences(data, &peaks);
    let mut set = PeakSet::default();
    for (peak, prominence) in peaks.into_iter().zip(prominences) {
        if prominence >= params.prominence {
            set.indices.push(peak);
            set.prominences.push(prominence);
        }
    }
    Ok(set)
}

/// Indices of strict local maxima; plateaus report their (rounded down) midpoint
pub fn local_maxima(data: &[f64]) -> Vec<usize> {
    let mut peaks = Vec::new();
    if data.len() < 3 {
        return peaks;
    }

    let last = data.len() - 1;
    let mut i = 1;
    while i < last {
        if data[i - 1] < data[i] {
            // Walk across a possible plateau
            let mut ahead = i + 1;
            while ahead < last && data[ahead] == data[i] {
                ahead += 1;
            }
            if data[ahead] < data[i] {
                let left_edge = i;
                let right_edge = ahead - 1;
                peaks.push((left_edge + right_edge) / 2);
                i = ahead;
            }
        }
        i += 1;
    }
    peaks
}

/// Flags for each peak telling whether it survives the distance filter
fn select_by_distance(data: &[f64], peaks: &[usize], distance: f64) -> Vec<bool> {
    let min_gap = distance.ceil() as usize;
    let mut keep = vec![true; peaks.len()];

    // Lowest priority first, stable for equal heights
    let mut order: Vec<usize> = (0..peaks.len()).collect();
    order.sort_by(|&a, &b| {
        data[peaks[a]]
            .partial_cmp(&data[peaks[b]])
            .unwrap_or(Ordering::Equal)
    });

    for &i in order.iter().rev() {
        if !keep[i] {
            continue;
        }

        let mut j = i;
        while j > 0 && peaks[i] - peaks[j - 1] < min_gap {
            keep[j - 1] = false;
            j -= 1;
        }

        let mut j = i + 1;
        while j < peaks.len() && peaks[j] - peaks[i] < min_gap {
            keep[j] = false;
            j += 1;
        }
    }
    keep
}

/// Prominence of each peak over the whole series
///
/// The base on each side is the lowest point reached before the signal
/// climbs above the peak (or the series ends); prominence is the peak height
/// minus the higher of the two bases.
pub fn peak_prominences(data: &[f64], peaks: &[usize]) -> Vec<f64> {
    peaks
        .iter()
        .map(|&peak| {
            let height = data[peak];

            let mut left_min = height;
            for &value in data[..=peak].iter().rev() {
                if value > height {
                    break;
                }
                left_min = left_min.min(value);
            }

            let mut right_min = height;
            for &value in &data[peak..] {
                if value > height {
                    break;
                }
                right_min = right_min.min(value);
            }

            height - left_min.max(right_min)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use rstest::rstest;

    #[test]
    fn test_local_maxima_with_plateau() {
        let data = [0.0, 1.0, 0.0, 2.0, 2.0, 2.0, 0.0, 1.0];
        assert_eq!(local_maxima(&data), vec![1, 4]);
    }

    #[test]
    fn test_edges_are_never_peaks() {
        assert!(local_maxima(&[5.0, 1.0, 0.0, 3.0]).is_empty());
        assert!(local_maxima(&[1.0, 2.0]).is_empty());
    }

    #[test]
    fn test_prominence_uses_higher_base() {
        let data = [0.0, 3.0, 1.0, 5.0, 2.0, 4.0, 0.0];
        let prom = peak_prominences(&data, &[1, 3, 5]);
        assert_relative_eq!(prom[0], 2.0);
        assert_relative_eq!(prom[1], 5.0);
        assert_relative_eq!(prom[2], 2.0);
    }

    #[test]
    fn test_distance_prefers_taller_peak() {
        let data = [0.0, 2.0, 0.0, 5.0, 0.0, 1.0, 0.0];
        let set = find_peaks(&data, &PeakParams::new(3.0, 0.0)).unwrap();
        assert_eq!(set.indices, vec![3]);
    }

    #[rstest]
    #[case(0.5, 3)]
    #[case(2.5, 1)]
    #[case(10.0, 0)]
    fn test_prominence_threshold(#[case] prominence: f64, #[case] expected: usize) {
        let data = [0.0, 3.0, 1.0, 5.0, 2.0, 4.0, 0.0];
        let set = find_peaks(&data, &PeakParams::new(1.0, prominence)).unwrap();
        assert_eq!(set.len(), expected);
        assert_eq!(set.indices.len(), set.prominences.len());
    }

    #[test]
    fn test_constant_series_has_no_peaks() {
        let set = find_peaks(&[0.0; 100], &PeakParams::new(5.0, 0.5)).unwrap();
        assert!(set.is_empty());
        assert!(set.mean_prominence().is_none());
    }

    #[test]
    fn test_invalid_inputs_rejected() {
        assert!(find_peaks(&[0.0, f64::NAN, 0.0], &PeakParams::new(1.0, 0.5)).is_err());
        assert!(find_peaks(&[0.0, 1.0, 0.0], &PeakParams::new(0.5, 0.5)).is_err());
    }
}
