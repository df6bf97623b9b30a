//! Pixel geometry the OCR strategies search with.

use serde::{Deserialize, Serialize};

/// Geometry and heuristics of the OCR strategies.
///
/// The defaults are pixel values for a 2400px-tall portrait screen.
/// [`OcrLayout::scaled_for`] rescales every distance to another height.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct OcrLayout {
    /// Depth of the search band below a label.
    pub search_band: u32,
    /// Largest horizontal offset between label and candidate centers.
    pub align_tolerance: u32,
    /// Offset from a hint word's top to the click point.
    pub hint_offset: u32,
    /// Texts shorter than this count as hints.
    pub hint_max_len: usize,
    pub hint_keywords: Vec<String>,
    /// Manhattan RGB distance that separates a field from the label background.
    pub color_distance: u32,
    /// Regions taller than this are clicked near the top.
    pub tall_region_height: u32,
    pub tall_region_ratio: f32,
    pub normal_region_ratio: f32,
    /// Field height assumed for labels naming a multiline field.
    pub tall_field_height: u32,
    pub normal_field_height: u32,
    /// Fields taller than this are clicked near the top.
    pub tall_field_threshold: u32,
    pub tall_field_ratio: f32,
    pub normal_field_ratio: f32,
    pub tall_field_keywords: Vec<String>,
    /// Screen height the pixel values are tuned for.
    pub reference_height: u32,
}

impl Default for OcrLayout {
    fn default() -> Self {
        Self {
            search_band: 550,
            align_tolerance: 300,
            hint_offset: 20,
            hint_max_len: 10,
            hint_keywords: vec!["enter".into(), "placeholder".into()],
            color_distance: 30,
            tall_region_height: 300,
            tall_region_ratio: 0.3,
            normal_region_ratio: 0.5,
            tall_field_height: 500,
            normal_field_height: 200,
            tall_field_threshold: 400,
            tall_field_ratio: 0.4,
            normal_field_ratio: 0.25,
            tall_field_keywords: [
                "description",
                "notes",
                "comment",
                "message",
                "address",
                "details",
                "remarks",
            ]
            .into_iter()
            .map(String::from)
            .collect(),
            reference_height: 2400,
        }
    }
}

impl OcrLayout {
    /// Copy with every pixel distance scaled by `screen_height / reference_height`.
    pub fn scaled_for(&self, screen_height: u32) -> Self {
        if self.reference_height == 0 || screen_height == 0 {
            return self.clone();
        }
        let k = screen_height as f64 / self.reference_height as f64;
        let px = |v: u32| ((v as f64 * k).round() as u32).max(1);
        Self {
            search_band: px(self.search_band),
            align_tolerance: px(self.align_tolerance),
            hint_offset: px(self.hint_offset),
            tall_region_height: px(self.tall_region_height),
            tall_field_height: px(self.tall_field_height),
            normal_field_height: px(self.normal_field_height),
            tall_field_threshold: px(self.tall_field_threshold),
            reference_height: screen_height,
            ..self.clone()
        }
    }

    /// Whether a recognized text looks like an input hint or placeholder.
    pub fn is_hint(&self, text: &str) -> bool {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return false;
        }
        let lower = trimmed.to_lowercase();
        trimmed.chars().count() < self.hint_max_len
            || trimmed.chars().any(|c| c.is_ascii_digit())
            || self.hint_keywords.iter().any(|k| lower.contains(k.as_str()))
    }

    /// Field height assumed below a label, from keywords in its text.
    pub fn field_height_for(&self, label: &str) -> u32 {
        let lower = label.to_lowercase();
        if self
            .tall_field_keywords
            .iter()
            .any(|k| lower.contains(k.as_str()))
        {
            self.tall_field_height
        } else {
            self.normal_field_height
        }
    }
}
