//! Warm-up trimming and interquartile averaging of calibration windows.

use crate::types::DataFrame;

/// Drop frames stamped within `exclude_ms` of the first frame.
pub fn trim_warm_up(frames: &[DataFrame], exclude_ms: u64) -> Vec<&DataFrame> {
    let Some(first) = frames.first().and_then(DataFrame::timestamp_micros) else {
        return frames.iter().collect();
    };
    let limit = first.saturating_add(exclude_ms.saturating_mul(1000));
    frames.iter().filter(|f| f.timestamp_micros().is_some_and(|ts| ts >= limit)).collect()
}

/// Mean of the values between the lower and upper quartile, bounds included.
///
/// Bounds are `sorted[n/4]` and `sorted[n-1-n/4]`. Non-finite values are ignored.
pub fn interquartile_mean(values: &[f64]) -> Option<f64> {
    let mut sorted: Vec<f64> = values.iter().copied().filter(|v| v.is_finite()).collect();
    if sorted.is_empty() {
        return None;
    }
    sorted.sort_by(f64::total_cmp);
    let n = sorted.len();
    let (lower, upper) = (sorted[n / 4], sorted[n - 1 - n / 4]);
    if lower == upper {
        return Some(lower);
    }
    let kept: Vec<f64> = sorted.into_iter().filter(|v| (lower..=upper).contains(v)).collect();
    Some(kept.iter().sum::<f64>() / kept.len() as f64)
}

/// One representative frame for a calibration window.
///
/// Each coil axis is averaged independently over its interquartile band. Rotations and
/// metadata come from [`DataFrame::average`].
pub fn robust_average(frames: &[&DataFrame]) -> Option<DataFrame> {
    let mut average = DataFrame::average(frames.iter().copied())?;
    for (index, coil) in average.coils_mut().enumerate() {
        for axis in 0..3 {
            let samples: Vec<f64> = frames
                .iter()
                .filter_map(|f| f.coil(index))
                .map(|c| f64::from(c.location[axis]))
                .collect();
            if let Some(mean) = interquartile_mean(&samples) {
                coil.location[axis] = mean as f32;
            }
        }
    }
    Some(average)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Coil;
    use nalgebra::{Quaternion, Vector3};
    use proptest::prelude::*;

    fn frame(ts: u64, x: f32) -> DataFrame {
        DataFrame::six_dof(
            0,
            ts,
            vec![Coil::new_6d(Vector3::new(x, 1.0, 2.0), Quaternion::identity(), 0)],
        )
    }

    #[test]
    fn warm_up_is_measured_from_first_frame() {
        let frames: Vec<DataFrame> = (0..10).map(|i| frame(5_000 + i * 25_000, 0.0)).collect();
        let kept = trim_warm_up(&frames, 100);
        assert_eq!(kept.first().and_then(|f| f.timestamp_micros()), Some(105_000));
        assert_eq!(kept.len(), 6);
        assert_eq!(trim_warm_up(&frames, 0).len(), 10);
    }

    #[test]
    fn extremes_are_excluded() {
        // bounds are sorted[2] = 2 and sorted[7] = 7
        let values = [0.0, 1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0, 1000.0];
        assert_eq!(interquartile_mean(&values), Some(4.5));
        assert_eq!(interquartile_mean(&[f64::NAN]), None);
        assert_eq!(interquartile_mean(&[3.0]), Some(3.0));
    }

    #[test]
    fn axes_are_averaged_independently() {
        let frames: Vec<DataFrame> =
            [0.0, 10.0, 10.0, 10.0, 500.0].iter().enumerate().map(|(i, &x)| frame(i as u64, x)).collect();
        let refs: Vec<&DataFrame> = frames.iter().collect();
        let average = robust_average(&refs).expect("non-empty");
        let coil = average.coil(0).expect("coil");
        assert_eq!(coil.location, Vector3::new(10.0, 1.0, 2.0));
    }

    proptest! {
        #[test]
        fn constant_window_is_unchanged(value in -1.0e4..1.0e4f64, n in 1usize..40) {
            let values = vec![value; n];
            prop_assert_eq!(interquartile_mean(&values), Some(value));
        }
    }
}
