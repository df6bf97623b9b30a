//! Template plan precomputation for the correlation metrics.

use crate::image::ImageView;
use crate::util::{LocateError, LocateResult};

/// Precomputed statistics and buffers for one preprocessed template.
pub struct TemplatePlan {
    width: usize,
    height: usize,
    sum_sq: f32,
    var_t: f32,
    values: Vec<f32>,
    zero_mean: Vec<f32>,
}

impl TemplatePlan {
    /// Builds a plan from a grayscale template view.
    pub fn from_view(tpl: ImageView<'_, u8>) -> LocateResult<Self> {
        let width = tpl.width();
        let height = tpl.height();
        let count = width
            .checked_mul(height)
            .ok_or(LocateError::InvalidDimensions { width, height })?;

        let mut values = Vec::with_capacity(count);
        let mut sum = 0.0f64;
        let mut sum_sq = 0.0f64;
        for y in 0..height {
            let row = tpl.row(y).ok_or(LocateError::InvalidDimensions { width, height })?;
            for &value in row {
                let v = value as f64;
                sum += v;
                sum_sq += v * v;
                values.push(value as f32);
            }
        }

        let var_t = (sum_sq - sum * sum / count as f64).max(0.0);
        let mean = (sum / count as f64) as f32;
        let zero_mean = values.iter().map(|&v| v - mean).collect();

        Ok(Self {
            width,
            height,
            sum_sq: sum_sq as f32,
            var_t: var_t as f32,
            values,
            zero_mean,
        })
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    /// Number of template pixels.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Sum of squared intensities.
    pub fn sum_sq(&self) -> f32 {
        self.sum_sq
    }

    /// Sum of squared deviations from the mean (unnormalized variance).
    pub fn var_t(&self) -> f32 {
        self.var_t
    }

    /// Raw intensities in row-major order.
    pub fn values(&self) -> &[f32] {
        &self.values
    }

    /// Zero-mean intensities in row-major order.
    pub fn zero_mean(&self) -> &[f32] {
        &self.zero_mean
    }
}
