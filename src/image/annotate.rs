//! Debug annotation of match attempts.

use crate::image::Rect;
use image::{Rgb, RgbImage};
use imageproc::drawing::draw_hollow_rect_mut;

const GREEN: Rgb<u8> = Rgb([0, 200, 0]);
const YELLOW: Rgb<u8> = Rgb([230, 200, 0]);
const RED: Rgb<u8> = Rgb([220, 0, 0]);

/// Color band for a confidence value: >=0.9 green, >=0.8 yellow, else red.
pub fn confidence_color(confidence: f32) -> Rgb<u8> {
    if confidence >= 0.9 {
        GREEN
    } else if confidence >= 0.8 {
        YELLOW
    } else {
        RED
    }
}

/// Returns a copy of `screen` with a 2px box drawn around `region`.
pub fn annotate_region(screen: &RgbImage, region: Rect, confidence: f32) -> RgbImage {
    let mut out = screen.clone();
    let color = confidence_color(confidence);
    for inset in 0..2u32 {
        if region.width <= inset * 2 || region.height <= inset * 2 {
            break;
        }
        let r = imageproc::rect::Rect::at(region.x + inset as i32, region.y + inset as i32)
            .of_size(region.width - inset * 2, region.height - inset * 2);
        draw_hollow_rect_mut(&mut out, r, color);
    }
    out
}
