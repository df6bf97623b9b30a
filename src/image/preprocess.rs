//! Shared preprocessing for screens and templates.
//!
//! Both rasters go through the same pipeline before matching: grayscale
//! conversion followed by a 3x3 Gaussian blur, which absorbs sensor noise and
//! small illumination changes between capture and replay.

use image::{GrayImage, RgbImage};

/// Separable 3-tap Gaussian kernel (sigma derived from a 3x3 window).
const GAUSS_3: [f32; 3] = [0.25, 0.5, 0.25];

/// Converts an RGB raster to 8-bit luma.
pub fn to_gray(img: &RgbImage) -> GrayImage {
    image::imageops::grayscale(img)
}

/// Applies a 3x3 Gaussian blur with replicated borders.
pub fn blur3(gray: &GrayImage) -> GrayImage {
    imageproc::filter::separable_filter_equal(gray, &GAUSS_3[..])
}

/// Grayscale + blur, the canonical input of every matching strategy.
pub fn prepare(img: &RgbImage) -> GrayImage {
    blur3(&to_gray(img))
}
