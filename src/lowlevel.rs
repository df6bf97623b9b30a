//! Low-level building blocks of the image matcher.
//!
//! These expose the template plan, the metric kernels and the single-metric
//! scan for callers that want a score map entry point without the strategy
//! cascade. Most users should prefer [`crate::ImageMatcher`].

pub use crate::image::preprocess::{blur3, prepare, to_gray};
pub use crate::matcher::kernel::{scan_best, CcoeffNormed, CcorrNormed, Kernel, SqdiffNormed};
pub use crate::matcher::peak::Peak;
pub use crate::matcher::plan::TemplatePlan;
