//! Fringe visibility estimators.
//!
//! Visibility is the interferometric contrast `(Imax - Imin) / (Imax + Imin)`,
//! bounded in `[0, 1]` for physical signals. Two reducers are provided:
//!
//! - [`camera_visibility`] over the N per-frame total intensities, using the
//!   plain extrema.
//! - [`device_visibility`] over the M photodetector samples, using the means of
//!   the k lowest and k highest samples as robust extrema, with a dark-current
//!   offset subtracted from the denominator.
//!
//! Both return `None` instead of dividing by zero.

/// Contrast of a pair of extrema, `None` if `vmax + vmin == 0`.
#[must_use]
pub fn visibility(vmin: f64, vmax: f64) -> Option<f64> {
    let denominator = vmax + vmin;
    if denominator == 0.0 {
        return None;
    }
    Some((vmax - vmin) / denominator)
}

/// Visibility of the camera intensity series.
///
/// Returns `None` for an empty series or when all intensities are zero.
#[must_use]
pub fn camera_visibility(intensities: &[u64]) -> Option<f64> {
    let min = *intensities.iter().min()?;
    let max = *intensities.iter().max()?;
    visibility(min as f64, max as f64)
}

/// Visibility of the detector trace using order statistics.
///
/// The trace is sorted and the lowest `k` and highest `k` samples are averaged
/// into robust minimum and maximum estimates. The result is
/// `(max_avg - min_avg) / (max_avg + min_avg - offset)`.
///
/// Returns `None` if `k` is zero, `k` exceeds the trace length, or the
/// denominator vanishes.
#[must_use]
pub fn device_visibility(trace: &[f64], k: usize, offset: f64) -> Option<f64> {
    if k == 0 || k > trace.len() {
        return None;
    }

    let mut sorted = trace.to_vec();
    sorted.sort_by(f64::total_cmp);

    let min_avg = sorted[..k].iter().sum::<f64>() / k as f64;
    let max_avg = sorted[sorted.len() - k..].iter().sum::<f64>() / k as f64;

    let denominator = max_avg + min_avg - offset;
    if denominator == 0.0 {
        return None;
    }
    Some((max_avg - min_avg) / denominator)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_camera_visibility() {
        let v = camera_visibility(&[10, 10, 40, 40]).unwrap();
        assert!((v - 0.6).abs() < 1e-12);
    }

    #[test]
    fn test_camera_visibility_guards_zero() {
        assert_eq!(camera_visibility(&[0, 0, 0]), None);
        assert_eq!(camera_visibility(&[]), None);
    }

    #[test]
    fn test_camera_visibility_flat_signal_is_zero() {
        assert_eq!(camera_visibility(&[25, 25]), Some(0.0));
    }

    #[test]
    fn test_device_visibility_k1() {
        let v = device_visibility(&[5.0, 100.0], 1, 0.0).unwrap();
        assert!((v - 95.0 / 105.0).abs() < 1e-12);
    }

    #[test]
    fn test_device_visibility_dampens_single_outlier() {
        // One glitch at 1000 among samples that swing between 10 and 30
        let mut trace: Vec<f64> = (0..40)
            .map(|i| if i % 2 == 0 { 10.0 } else { 30.0 })
            .collect();
        trace.push(1000.0);

        let robust = device_visibility(&trace, 10, 0.0).unwrap();
        let naive = device_visibility(&trace, 1, 0.0).unwrap();

        // top 10 = 1000 + 9 * 30, bottom 10 = 10
        assert!((robust - 117.0 / 137.0).abs() < 1e-12, "robust = {robust}");
        assert!((naive - 990.0 / 1010.0).abs() < 1e-12);
        assert!(robust < naive);
    }

    #[test]
    fn test_device_visibility_applies_offset() {
        let v = device_visibility(&[5.0, 100.0], 1, 5.0).unwrap();
        assert!((v - 95.0 / 100.0).abs() < 1e-12);
    }

    #[test]
    fn test_device_visibility_invalid_k() {
        assert_eq!(device_visibility(&[1.0, 2.0], 0, 0.0), None);
        assert_eq!(device_visibility(&[1.0, 2.0], 3, 0.0), None);
    }

    #[test]
    fn test_device_visibility_zero_denominator() {
        assert_eq!(device_visibility(&[1.0, 1.0], 1, 2.0), None);
    }
}
