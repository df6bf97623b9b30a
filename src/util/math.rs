//! Small numeric helpers shared by the matcher, OCR locator and tracker.

/// Clamps a value into `[0, 1]`, mapping NaN to zero.
pub(crate) fn clamp01(value: f32) -> f32 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

/// Folds a new sample into a running mean over `count` samples (including the new one).
pub(crate) fn running_mean(mean: f64, count: u64, sample: f64) -> f64 {
    if count <= 1 {
        return sample;
    }
    mean + (sample - mean) / count as f64
}

/// Mean of a slice, or `None` when empty.
pub(crate) fn mean(values: &[f32]) -> Option<f32> {
    if values.is_empty() {
        return None;
    }
    let sum: f64 = values.iter().map(|&v| v as f64).sum();
    Some((sum / values.len() as f64) as f32)
}

/// Ratio `num / den`, zero when the denominator is zero.
pub(crate) fn ratio(num: u64, den: u64) -> f64 {
    if den == 0 {
        0.0
    } else {
        num as f64 / den as f64
    }
}
