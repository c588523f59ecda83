//! The user-defined frequency axis and nearest-bin rebinning.

use crate::error::{Error, Result};

/// Upper bound on the number of bins of an axis.
const MAX_BINS: usize = 1 << 24;

/// Evenly spaced frequency bins (MHz) over the half-open span `[start, stop)`.
#[derive(Clone, Debug, PartialEq)]
pub struct FrequencyAxis {
    step: f64,
    bins: Vec<f64>,
}

impl FrequencyAxis {
    /// Bins `start + i × step` for every `i` keeping the value below `stop`.
    pub fn new(start_mhz: f64, stop_mhz: f64, step_mhz: f64) -> Result<Self> {
        let finite = start_mhz.is_finite() && stop_mhz.is_finite() && step_mhz.is_finite();
        if !finite || start_mhz <= 0.0 || stop_mhz <= 0.0 {
            return Err(Error::InvalidFrequencyRange(format!(
                "frequencies must be positive, got {} to {} MHz",
                start_mhz, stop_mhz
            )));
        }

        if start_mhz >= stop_mhz {
            return Err(Error::InvalidFrequencyRange(format!(
                "start {} MHz is not below stop {} MHz",
                start_mhz, stop_mhz
            )));
        }

        if step_mhz <= 0.0 {
            return Err(Error::InvalidFrequencyRange(format!(
                "step must be positive, got {} MHz",
                step_mhz
            )));
        }

        let ratio = ((stop_mhz - start_mhz) / step_mhz).ceil();
        if !(ratio >= 1.0 && ratio <= MAX_BINS as f64) {
            return Err(Error::InvalidFrequencyRange(format!(
                "step {} MHz gives {} bins from {} to {} MHz, expected 1 to {}",
                step_mhz, ratio, start_mhz, stop_mhz, MAX_BINS
            )));
        }

        let count = ratio as usize;
        let bins = (0..count)
            .map(|i| start_mhz + i as f64 * step_mhz)
            .collect();

        Ok(Self {
            step: step_mhz,
            bins,
        })
    }

    pub fn len(&self) -> usize {
        self.bins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bins.is_empty()
    }

    /// Bin spacing (MHz).
    pub fn step(&self) -> f64 {
        self.step
    }

    /// Bin centre values (MHz).
    pub fn values(&self) -> &[f64] {
        &self.bins
    }

    /// Index of the bin closest to `frequency_mhz`; see [`nearest_bin`].
    pub fn nearest_bin(&self, frequency_mhz: f64) -> usize {
        nearest_bin(frequency_mhz, &self.bins)
    }

    /// Index of the bin closest to a queried frequency, refusing frequencies
    /// outside the span of the axis.
    pub fn bin_for_query(&self, frequency_mhz: f64) -> Result<usize> {
        let first = self.bins[0];
        let last = self.bins[self.bins.len() - 1];
        if !(frequency_mhz >= first && frequency_mhz <= last) {
            return Err(Error::InvalidInput(format!(
                "{} MHz lies outside the frequency axis {} to {} MHz",
                frequency_mhz, first, last
            )));
        }

        Ok(self.nearest_bin(frequency_mhz))
    }
}

/// Index of the axis value closest to `frequency`.
///
/// The axis must be non-empty and increasing. When two bins are equally close
/// the first one wins. Runs a binary search, then compares the two neighbours.
pub fn nearest_bin(frequency: f64, axis: &[f64]) -> usize {
    let above = axis.partition_point(|&f| f < frequency);
    if above == 0 {
        return 0;
    }
    if above == axis.len() {
        return axis.len() - 1;
    }

    let below = above - 1;
    if frequency - axis[below] <= axis[above] - frequency {
        below
    } else {
        above
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn axis_is_half_open() {
        let axis = FrequencyAxis::new(89.8, 90.3, 0.2).unwrap();
        assert_eq!(axis.len(), 3);
        assert_abs_diff_eq!(axis.values()[0], 89.8, epsilon = 1e-12);
        assert_abs_diff_eq!(axis.values()[1], 90.0, epsilon = 1e-12);
        assert_abs_diff_eq!(axis.values()[2], 90.2, epsilon = 1e-12);

        let axis = FrequencyAxis::new(1.0, 4.0, 1.0).unwrap();
        assert_eq!(axis.values(), &[1.0, 2.0, 3.0]);
    }

    #[test]
    fn default_fm_band() {
        let axis = FrequencyAxis::new(55.0, 110.0, 0.244).unwrap();
        assert_eq!(axis.len(), 226);
        assert!(axis.values()[225] < 110.0);
    }

    #[test]
    fn bad_ranges() {
        for &(a, b, s) in &[(90.0, 80.0, 0.1), (90.0, 90.0, 0.1), (-1.0, 80.0, 0.1), (80.0, 90.0, 0.0), (80.0, 90.0, -0.2)] {
            match FrequencyAxis::new(a, b, s) {
                Err(Error::InvalidFrequencyRange(_)) => {}
                other => panic!("({}, {}, {}) gave {:?}", a, b, s, other),
            }
        }
    }

    #[test]
    fn degenerate_bin_counts() {
        // the span is so small against the step that the ratio underflows to zero
        match FrequencyAxis::new(1.0, 1.000_000_000_000_000_2, 1e308) {
            Err(Error::InvalidFrequencyRange(_)) => {}
            other => panic!("got {:?}", other),
        }

        // and far too many bins
        assert!(FrequencyAxis::new(1.0, 1e300, 1e-300).is_err());
        assert!(FrequencyAxis::new(55.0, 110.0, 1e-9).is_err());

        // a step wider than the span still gives one bin
        assert_eq!(FrequencyAxis::new(88.0, 108.0, 50.0).unwrap().values(), &[88.0]);
    }

    #[test]
    fn nearest_and_clamped() {
        let axis = [1.0, 2.0, 3.0, 4.0];
        assert_eq!(nearest_bin(2.2, &axis), 1);
        assert_eq!(nearest_bin(2.7, &axis), 2);
        assert_eq!(nearest_bin(3.0, &axis), 2);
        assert_eq!(nearest_bin(-10.0, &axis), 0);
        assert_eq!(nearest_bin(99.0, &axis), 3);
    }

    #[test]
    fn ties_go_to_the_first_bin() {
        let axis = [1.0, 2.0, 3.0, 4.0];
        assert_eq!(nearest_bin(1.5, &axis), 0);
        assert_eq!(nearest_bin(2.5, &axis), 1);
        assert_eq!(nearest_bin(3.5, &axis), 2);
    }

    #[test]
    fn matches_linear_scan() {
        let axis = FrequencyAxis::new(87.5, 108.0, 0.244).unwrap();
        let mut f = 80.0;
        while f < 115.0 {
            let mut best = 0;
            for (i, &b) in axis.values().iter().enumerate() {
                if (f - b).abs() < (f - axis.values()[best]).abs() {
                    best = i;
                }
            }
            assert_eq!(axis.nearest_bin(f), best, "{} MHz", f);
            f += 0.0371;
        }
    }

    #[test]
    fn queries_outside_the_axis_are_refused() {
        let axis = FrequencyAxis::new(88.0, 108.0, 0.5).unwrap();
        assert_eq!(axis.bin_for_query(88.0).unwrap(), 0);
        assert_eq!(axis.bin_for_query(100.1).unwrap(), 24);
        assert!(axis.bin_for_query(87.9).is_err());
        assert!(axis.bin_for_query(107.6).is_err());
    }
}
