//! Scalar kernels for the three normalized template-matching metrics.
//!
//! Every kernel scans the full valid placement range and reports the single
//! globally best placement. Window sums come from integral images, so each
//! placement costs one dot product against the template.

use crate::image::ImageView;
use crate::matcher::integral::IntegralImage;
use crate::matcher::peak::{BestPeak, Peak};
use crate::matcher::plan::TemplatePlan;
use crate::util::{LocateError, LocateResult};

const EPS: f64 = 1e-6;

/// Metric-specific scoring over precomputed window statistics.
pub trait Kernel {
    /// Whether smaller scores are better matches.
    const LOWER_IS_BETTER: bool;

    /// Template buffer the image window is correlated with.
    fn template_values(plan: &TemplatePlan) -> &[f32];

    /// Combines the dot product and window statistics into a score.
    ///
    /// Returns `None` when the score is undefined at this placement.
    fn combine(plan: &TemplatePlan, dot: f64, sum_i: f64, sum_i2: f64) -> Option<f32>;
}

/// Normalized correlation coefficient (zero-mean NCC), range `[-1, 1]`.
pub struct CcoeffNormed;

/// Normalized cross-correlation, range `[0, 1]` for non-negative images.
pub struct CcorrNormed;

/// Normalized squared difference, `0` for a perfect match.
pub struct SqdiffNormed;

impl Kernel for CcoeffNormed {
    const LOWER_IS_BETTER: bool = false;

    fn template_values(plan: &TemplatePlan) -> &[f32] {
        plan.zero_mean()
    }

    fn combine(plan: &TemplatePlan, dot: f64, sum_i: f64, sum_i2: f64) -> Option<f32> {
        let n = plan.len() as f64;
        let var_t = plan.var_t() as f64;
        let var_i = sum_i2 - sum_i * sum_i / n;
        if var_t <= EPS || var_i <= EPS {
            return None;
        }
        let score = dot / (var_t * var_i).sqrt();
        score.is_finite().then(|| score.clamp(-1.0, 1.0) as f32)
    }
}

impl Kernel for CcorrNormed {
    const LOWER_IS_BETTER: bool = false;

    fn template_values(plan: &TemplatePlan) -> &[f32] {
        plan.values()
    }

    fn combine(plan: &TemplatePlan, dot: f64, _sum_i: f64, sum_i2: f64) -> Option<f32> {
        let denom = (plan.sum_sq() as f64 * sum_i2).sqrt();
        if denom <= EPS {
            return None;
        }
        let score = dot / denom;
        score.is_finite().then(|| score.clamp(0.0, 1.0) as f32)
    }
}

impl Kernel for SqdiffNormed {
    const LOWER_IS_BETTER: bool = true;

    fn template_values(plan: &TemplatePlan) -> &[f32] {
        plan.values()
    }

    fn combine(plan: &TemplatePlan, dot: f64, _sum_i: f64, sum_i2: f64) -> Option<f32> {
        let sum_t2 = plan.sum_sq() as f64;
        let denom = (sum_t2 * sum_i2).sqrt();
        if denom <= EPS {
            // Two all-black windows are identical.
            return (sum_t2 <= EPS && sum_i2 <= EPS).then_some(0.0);
        }
        let score = (sum_t2 - 2.0 * dot + sum_i2) / denom;
        score.is_finite().then(|| score.max(0.0) as f32)
    }
}

/// Scans every valid placement and returns the best-scoring one.
///
/// Returns `Ok(None)` when the metric is undefined everywhere (e.g. a flat
/// template under the correlation coefficient).
pub fn scan_best<K: Kernel>(
    image: ImageView<'_, u8>,
    plan: &TemplatePlan,
) -> LocateResult<Option<Peak>> {
    let img_width = image.width();
    let img_height = image.height();
    let tpl_width = plan.width();
    let tpl_height = plan.height();
    if img_width < tpl_width || img_height < tpl_height {
        return Err(LocateError::RoiOutOfBounds {
            x: 0,
            y: 0,
            width: tpl_width,
            height: tpl_height,
            img_width,
            img_height,
        });
    }

    let integral = IntegralImage::new(image);
    let t = K::template_values(plan);
    let mut best = BestPeak::new(K::LOWER_IS_BETTER);

    for y in 0..=(img_height - tpl_height) {
        for x in 0..=(img_width - tpl_width) {
            let mut dot = 0.0f64;
            for ty in 0..tpl_height {
                let Some(img_row) = image.row(y + ty) else {
                    continue;
                };
                let base = ty * tpl_width;
                let mut row_dot = 0.0f32;
                for tx in 0..tpl_width {
                    row_dot += t[base + tx] * img_row[x + tx] as f32;
                }
                dot += row_dot as f64;
            }
            let (sum_i, sum_i2) = integral.window(x, y, tpl_width, tpl_height);
            if let Some(score) = K::combine(plan, dot, sum_i, sum_i2) {
                best.push(Peak { x, y, score });
            }
        }
    }

    Ok(best.into_inner())
}
