//! Demean, taper and the shared preprocessing chain.

use crate::signal::filter::bandpass;

/// Subtract the mean from the samples in place.
pub fn demean(data: &mut [f64]) {
    if data.is_empty() {
        return;
    }
    let mean = data.iter().sum::<f64>() / data.len() as f64;
    for v in data.iter_mut() {
        *v -= mean;
    }
}

/// Apply a cosine taper in place.
///
/// `fraction` is the tapered fraction of the trace length at each end,
/// capped at one half.
pub fn cosine_taper(data: &mut [f64], fraction: f64) {
    let n = data.len();
    if n == 0 {
        return;
    }
    let width = ((n as f64) * fraction.clamp(0.0, 0.5)) as usize;
    if width == 0 {
        return;
    }
    for i in 0..width {
        let w = 0.5 * (1.0 - (std::f64::consts::PI * i as f64 / width as f64).cos());
        data[i] *= w;
        data[n - 1 - i] *= w;
    }
}

/// Taper fraction applied before filtering, per trace end.
const TAPER_FRACTION: f64 = 0.05;

/// The preprocessing chain applied before any correlation: demean, 5%
/// cosine taper, bandpass between `freq_min` and `freq_max`.
///
/// Both traces of a correlation must go through this function with the same
/// corner frequencies.
pub fn preprocess(data: &mut Vec<f64>, dt: f64, freq_min: f64, freq_max: f64) {
    demean(data);
    cosine_taper(data, TAPER_FRACTION);
    bandpass(data, dt, freq_min, freq_max);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_demean_removes_offset() {
        let mut data = vec![3.0, 4.0, 5.0];
        demean(&mut data);
        assert!((data.iter().sum::<f64>()).abs() < 1e-12);
        assert_eq!(data[0], -1.0);
    }

    #[test]
    fn test_taper_zeroes_first_and_last_sample() {
        let mut data = vec![1.0; 100];
        cosine_taper(&mut data, 0.05);
        assert_eq!(data[0], 0.0);
        assert_eq!(data[99], 0.0);
        // The central part is untouched.
        assert_eq!(data[50], 1.0);
    }

    #[test]
    fn test_taper_on_short_trace_is_a_no_op() {
        let mut data = vec![1.0; 5];
        cosine_taper(&mut data, 0.05);
        assert_eq!(data, vec![1.0; 5]);
    }
}
