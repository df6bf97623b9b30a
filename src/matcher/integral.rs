//! Summed-area tables for constant-time window statistics.

use crate::image::ImageView;

/// Integral images of intensity and squared intensity.
pub(crate) struct IntegralImage {
    width: usize,
    sum: Vec<f64>,
    sum_sq: Vec<f64>,
}

impl IntegralImage {
    pub(crate) fn new(image: ImageView<'_, u8>) -> Self {
        let w = image.width();
        let h = image.height();
        let stride = w + 1;
        let mut sum = vec![0.0f64; stride * (h + 1)];
        let mut sum_sq = vec![0.0f64; stride * (h + 1)];
        for y in 0..h {
            let row = image.row(y).unwrap_or(&[]);
            let mut row_sum = 0.0f64;
            let mut row_sq = 0.0f64;
            for (x, &value) in row.iter().enumerate() {
                let v = value as f64;
                row_sum += v;
                row_sq += v * v;
                let idx = (y + 1) * stride + x + 1;
                sum[idx] = sum[idx - stride] + row_sum;
                sum_sq[idx] = sum_sq[idx - stride] + row_sq;
            }
        }
        Self {
            width: w,
            sum,
            sum_sq,
        }
    }

    /// Returns `(sum, sum of squares)` over the window at `(x, y)` of size `w x h`.
    pub(crate) fn window(&self, x: usize, y: usize, w: usize, h: usize) -> (f64, f64) {
        let stride = self.width + 1;
        let a = y * stride + x;
        let b = y * stride + x + w;
        let c = (y + h) * stride + x;
        let d = (y + h) * stride + x + w;
        (
            self.sum[d] - self.sum[b] - self.sum[c] + self.sum[a],
            self.sum_sq[d] - self.sum_sq[b] - self.sum_sq[c] + self.sum_sq[a],
        )
    }
}
