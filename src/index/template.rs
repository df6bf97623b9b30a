//! Stored template records and their image descriptors.

use crate::image::{Rect, RelativeRect};
use crate::index::hash::{perceptual_hash, PerceptualHash};
use chrono::{DateTime, Utc};
use image::RgbImage;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

/// Who produced a template.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CaptureSource {
    /// Hand-curated; exempt from version-cap deletion.
    Manual,
    /// Captured after a successful structural lookup.
    Auto,
    /// Captured after a vision/OCR-driven resolution.
    #[serde(rename = "ai")]
    Ai,
}

impl CaptureSource {
    /// File-name suffix appended to the element name.
    pub fn file_suffix(self) -> &'static str {
        match self {
            CaptureSource::Manual => "",
            CaptureSource::Auto => "_auto",
            CaptureSource::Ai => "_ai",
        }
    }
}

/// One stored reference image plus its descriptors.
///
/// The serialized field names match the metadata sidecar written next to
/// each PNG, so a sidecar can be read back as a `Template` directly.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Template {
    #[serde(rename = "templatePath")]
    pub path: PathBuf,
    pub hash: PerceptualHash,
    pub width: u32,
    pub height: u32,
    pub aspect_ratio: f32,
    #[serde(default)]
    pub element_type: String,
    #[serde(rename = "capturedDate")]
    pub captured_at: DateTime<Utc>,
    pub element_name: String,
    #[serde(default)]
    pub dominant_colors: Vec<[u8; 3]>,
    #[serde(default)]
    pub relative_position: RelativeRect,
    #[serde(default)]
    pub pixel_density: f32,
    #[serde(default)]
    pub has_text: bool,
    #[serde(default)]
    pub has_icon: bool,
    #[serde(default)]
    pub aliases: BTreeSet<String>,
    pub capture_source: CaptureSource,
    #[serde(default = "first_version")]
    pub version: u32,
}

fn first_version() -> u32 {
    1
}

impl Template {
    /// Describes `img` (already cropped to the element) as a template.
    ///
    /// `region` is where the crop came from on a screen of `screen_size`.
    pub fn describe(
        path: PathBuf,
        img: &RgbImage,
        element_name: &str,
        source: CaptureSource,
        region: Rect,
        screen_size: (u32, u32),
        captured_at: DateTime<Utc>,
    ) -> Self {
        let (width, height) = img.dimensions();
        let aspect_ratio = if height == 0 {
            0.0
        } else {
            width as f32 / height as f32
        };
        let pixel_density = pixel_density(img);
        Template {
            path,
            hash: perceptual_hash(img),
            width,
            height,
            aspect_ratio,
            element_type: String::new(),
            captured_at,
            element_name: element_name.to_string(),
            dominant_colors: dominant_colors(img, 3),
            relative_position: region.relative_to(screen_size.0, screen_size.1),
            pixel_density,
            has_text: aspect_ratio >= 2.0 && (0.05..=0.5).contains(&pixel_density),
            has_icon: (0.75..=1.33).contains(&aspect_ratio) && pixel_density >= 0.05,
            aliases: name_aliases(element_name),
            capture_source: source,
            version: 1,
        }
    }

    /// Case-insensitive substring test against the element name and aliases.
    pub fn name_matches(&self, hint: &str) -> bool {
        let hint = hint.trim().to_lowercase();
        if hint.is_empty() {
            return true;
        }
        self.element_name.to_lowercase().contains(&hint)
            || self.aliases.iter().any(|a| a.contains(&hint))
    }

    /// Exact element identity (name or alias, case-insensitive).
    pub fn is_element(&self, name: &str) -> bool {
        let name = name.trim().to_lowercase();
        self.element_name.to_lowercase() == name || self.aliases.contains(&name)
    }
}

/// Lowercased spellings an element may be referred to by.
pub fn name_aliases(name: &str) -> BTreeSet<String> {
    let lower = name.trim().to_lowercase();
    let words: Vec<&str> = lower
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .collect();
    let mut out = BTreeSet::new();
    if words.is_empty() {
        return out;
    }
    out.insert(lower.clone());
    out.insert(words.join(" "));
    out.insert(words.join("_"));
    out.insert(words.join("-"));
    out.insert(words.concat());
    out
}

/// Fraction of pixels whose luma departs from the mean by more than 32.
fn pixel_density(img: &RgbImage) -> f32 {
    let gray = image::imageops::grayscale(img);
    let n = gray.pixels().len();
    if n == 0 {
        return 0.0;
    }
    let mean = gray.pixels().map(|p| p.0[0] as f64).sum::<f64>() / n as f64;
    let busy = gray
        .pixels()
        .filter(|p| (p.0[0] as f64 - mean).abs() > 32.0)
        .count();
    busy as f32 / n as f32
}

/// Most frequent colors after quantizing each channel to 4 bits.
///
/// Ties resolve toward the smaller quantized color so the result is stable.
pub fn dominant_colors(img: &RgbImage, k: usize) -> Vec<[u8; 3]> {
    let mut counts: BTreeMap<[u8; 3], u32> = BTreeMap::new();
    for p in img.pixels() {
        let q = [p.0[0] >> 4, p.0[1] >> 4, p.0[2] >> 4];
        *counts.entry(q).or_insert(0) += 1;
    }
    let mut ranked: Vec<([u8; 3], u32)> = counts.into_iter().collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    ranked
        .into_iter()
        .take(k)
        .map(|(q, _)| [q[0] << 4 | 8, q[1] << 4 | 8, q[2] << 4 | 8])
        .collect()
}

#[cfg(test)]
mod tests {
    use super::{dominant_colors, name_aliases, CaptureSource, Template};
    use crate::image::Rect;
    use chrono::Utc;
    use image::{Rgb, RgbImage};
    use std::path::PathBuf;

    #[test]
    fn aliases_cover_common_spellings() {
        let aliases = name_aliases("Mobile Number");
        for expected in ["mobile number", "mobile_number", "mobile-number", "mobilenumber"] {
            assert!(aliases.contains(expected), "missing {expected}");
        }
        assert!(name_aliases("  ").is_empty());
    }

    #[test]
    fn dominant_colors_rank_by_frequency() {
        let img = RgbImage::from_fn(10, 10, |x, _| match x {
            0..=5 => Rgb([255, 0, 0]),
            6..=8 => Rgb([0, 0, 255]),
            _ => Rgb([0, 255, 0]),
        });
        let colors = dominant_colors(&img, 3);
        assert_eq!(colors, vec![[248, 8, 8], [8, 8, 248], [8, 248, 8]]);
    }

    #[test]
    fn describe_fills_geometry_and_names() {
        let img = RgbImage::from_fn(40, 20, |x, _| {
            if x % 4 == 0 {
                Rgb([0, 0, 0])
            } else {
                Rgb([240, 240, 240])
            }
        });
        let t = Template::describe(
            PathBuf::from("a.png"),
            &img,
            "Save Button",
            CaptureSource::Auto,
            Rect::new(100, 50, 40, 20),
            (400, 200),
            Utc::now(),
        );
        assert_eq!((t.width, t.height), (40, 20));
        assert!((t.aspect_ratio - 2.0).abs() < 1e-6);
        assert!((t.relative_position.x - 0.25).abs() < 1e-6);
        assert!((t.relative_position.h - 0.1).abs() < 1e-6);
        assert!(t.is_element("save_button"));
        assert!(t.name_matches("SAVE"));
        assert!(!t.name_matches("cancel"));
        assert!(t.dominant_colors.len() <= 3);
    }

    #[test]
    fn sidecar_fields_use_documented_names() {
        let img = RgbImage::from_pixel(4, 4, Rgb([9, 9, 9]));
        let t = Template::describe(
            PathBuf::from("x.png"),
            &img,
            "x",
            CaptureSource::Ai,
            Rect::new(0, 0, 4, 4),
            (4, 4),
            Utc::now(),
        );
        let value = serde_json::to_value(&t).unwrap();
        for key in [
            "templatePath",
            "hash",
            "aspectRatio",
            "capturedDate",
            "elementName",
            "dominantColors",
            "relativePosition",
            "pixelDensity",
            "hasText",
            "hasIcon",
            "aliases",
        ] {
            assert!(value.get(key).is_some(), "missing {key}");
        }
        assert_eq!(value["captureSource"], "ai");
    }
}
