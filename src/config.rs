//! Resolver configuration.
//!
//! Keys are dashed (`auto-capture-enabled`) both in JSON documents and in
//! key-value sources. A malformed value never fails the load: it is logged
//! and the documented default is used instead.

use crate::capture::CapturePolicy;
use crate::index::IndexPolicy;
use crate::matcher::MatchConfig;
use crate::metadata::HealthPolicy;
use crate::ocr::OcrLayout;
use crate::trace::trace_warn;
use crate::util::fs::read_json;
use crate::util::{LocateError, LocateResult};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// External key-value configuration.
pub trait ConfigSource {
    fn get(&self, key: &str) -> Option<String>;
}

impl ConfigSource for HashMap<String, String> {
    fn get(&self, key: &str) -> Option<String> {
        HashMap::get(self, key).cloned()
    }
}

impl ConfigSource for BTreeMap<String, String> {
    fn get(&self, key: &str) -> Option<String> {
        BTreeMap::get(self, key).cloned()
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct ResolverConfig {
    pub auto_capture_enabled: bool,
    pub max_versions_per_element: usize,
    pub max_folder_size_mb: f64,
    pub max_version_folders: usize,
    pub duplicate_detection_enabled: bool,
    pub visual_similarity_threshold: f32,
    pub cleanup_age_days: u32,
    pub debug_mode_enabled: bool,
    pub debug_organize_by_scenario: bool,
    pub templates_root: PathBuf,
    pub debug_root: PathBuf,
    pub image_match_threshold: f32,
    pub fuzzy_max_distance: u32,
    pub ocr_scale_to_screen: bool,
    pub ocr_reference_height: u32,
    pub report_retention_days: u32,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            auto_capture_enabled: true,
            max_versions_per_element: 3,
            max_folder_size_mb: 100.0,
            max_version_folders: 5,
            duplicate_detection_enabled: true,
            visual_similarity_threshold: 0.85,
            cleanup_age_days: 30,
            debug_mode_enabled: false,
            debug_organize_by_scenario: true,
            templates_root: PathBuf::from("templates"),
            debug_root: PathBuf::from("debug"),
            image_match_threshold: 0.8,
            fuzzy_max_distance: 2,
            ocr_scale_to_screen: false,
            ocr_reference_height: 2400,
            report_retention_days: 7,
        }
    }
}

/// Boolean spellings accepted from key-value sources.
#[derive(Clone, Copy)]
struct Flag(bool);

impl FromStr for Flag {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, ()> {
        match s.trim().to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" | "on" => Ok(Flag(true)),
            "false" | "0" | "no" | "off" => Ok(Flag(false)),
            _ => Err(()),
        }
    }
}

/// Parses `key` from `source`; `Ok(None)` when absent.
pub fn parse_key<T: FromStr>(source: &dyn ConfigSource, key: &str) -> LocateResult<Option<T>> {
    let Some(raw) = source.get(key) else {
        return Ok(None);
    };
    raw.trim()
        .parse::<T>()
        .map(Some)
        .map_err(|_| LocateError::ConfigInvalid {
            key: key.to_string(),
            value: raw,
        })
}

fn read<T: FromStr>(source: &dyn ConfigSource, key: &str, valid: impl Fn(&T) -> bool, slot: &mut T) {
    match parse_key::<T>(source, key) {
        Ok(Some(value)) if valid(&value) => *slot = value,
        Ok(Some(_)) => trace_warn!(
            "{}; using default",
            LocateError::ConfigInvalid {
                key: key.to_string(),
                value: source.get(key).unwrap_or_default(),
            }
        ),
        Ok(None) => {}
        Err(err) => trace_warn!("{}; using default", err),
    }
}

fn any<T>(_: &T) -> bool {
    true
}

fn unit(v: &f32) -> bool {
    (0.0..=1.0).contains(v)
}

fn positive_f32(v: &f32) -> bool {
    *v > 0.0
}

fn positive_f64(v: &f64) -> bool {
    *v > 0.0
}

fn read_flag(source: &dyn ConfigSource, key: &str, slot: &mut bool) {
    let mut flag = Flag(*slot);
    read(source, key, any, &mut flag);
    *slot = flag.0;
}

impl ResolverConfig {
    /// Reads every known key from a key-value source over the defaults.
    pub fn from_source(source: &dyn ConfigSource) -> Self {
        let mut c = Self::default();
        read_flag(source, "auto-capture-enabled", &mut c.auto_capture_enabled);
        read(source, "max-versions-per-element", |v: &usize| *v > 0, &mut c.max_versions_per_element);
        read(source, "max-folder-size-mb", positive_f64, &mut c.max_folder_size_mb);
        read(source, "max-version-folders", any, &mut c.max_version_folders);
        read_flag(source, "duplicate-detection-enabled", &mut c.duplicate_detection_enabled);
        read(source, "visual-similarity-threshold", unit, &mut c.visual_similarity_threshold);
        read(source, "cleanup-age-days", |v: &u32| *v > 0, &mut c.cleanup_age_days);
        read_flag(source, "debug-mode-enabled", &mut c.debug_mode_enabled);
        read_flag(source, "debug-organize-by-scenario", &mut c.debug_organize_by_scenario);
        read(source, "templates-root", any, &mut c.templates_root);
        read(source, "debug-root", any, &mut c.debug_root);
        read(source, "image-match-threshold", positive_f32, &mut c.image_match_threshold);
        read(source, "fuzzy-max-distance", |v: &u32| *v <= 64, &mut c.fuzzy_max_distance);
        read_flag(source, "ocr-scale-to-screen", &mut c.ocr_scale_to_screen);
        read(source, "ocr-reference-height", |v: &u32| *v > 0, &mut c.ocr_reference_height);
        read(source, "report-retention-days", any, &mut c.report_retention_days);
        c
    }

    /// Parses a JSON document; missing keys take their defaults.
    pub fn from_json_str(json: &str) -> LocateResult<Self> {
        serde_json::from_str(json).map_err(LocateError::json)
    }

    /// Loads a JSON config file.
    pub fn load(path: &Path) -> LocateResult<Self> {
        read_json(path)
    }

    /// Loads a JSON config file, falling back to defaults on any error.
    pub fn load_or_default(path: &Path) -> Self {
        match Self::load(path) {
            Ok(cfg) => cfg,
            Err(err) => {
                trace_warn!("failed to load config {}: {}; using defaults", path.display(), err);
                Self::default()
            }
        }
    }

    pub fn index_policy(&self) -> IndexPolicy {
        IndexPolicy {
            max_versions_per_element: self.max_versions_per_element,
            max_folder_size_mb: self.max_folder_size_mb,
            max_version_folders: self.max_version_folders,
            fuzzy_max_distance: self.fuzzy_max_distance,
            similarity_threshold: self.visual_similarity_threshold,
        }
    }

    pub fn health_policy(&self) -> HealthPolicy {
        HealthPolicy {
            cleanup_age_days: self.cleanup_age_days,
            ..HealthPolicy::default()
        }
    }

    pub fn capture_policy(&self) -> CapturePolicy {
        CapturePolicy {
            enabled: self.auto_capture_enabled,
            duplicate_detection: self.duplicate_detection_enabled,
        }
    }

    pub fn match_config(&self) -> MatchConfig {
        MatchConfig {
            threshold: self.image_match_threshold,
            ..MatchConfig::default()
        }
    }

    pub fn ocr_layout(&self) -> OcrLayout {
        OcrLayout {
            reference_height: self.ocr_reference_height,
            ..OcrLayout::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{parse_key, ResolverConfig};
    use crate::util::LocateError;
    use std::collections::HashMap;
    use std::path::PathBuf;

    fn source(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn empty_source_yields_documented_defaults() {
        let cfg = ResolverConfig::from_source(&HashMap::<String, String>::new());
        assert_eq!(cfg, ResolverConfig::default());
        assert!(cfg.auto_capture_enabled);
        assert_eq!(cfg.max_versions_per_element, 3);
        assert_eq!(cfg.max_folder_size_mb, 100.0);
        assert_eq!(cfg.max_version_folders, 5);
        assert!(cfg.duplicate_detection_enabled);
        assert_eq!(cfg.visual_similarity_threshold, 0.85);
        assert_eq!(cfg.cleanup_age_days, 30);
        assert!(!cfg.debug_mode_enabled);
        assert!(cfg.debug_organize_by_scenario);
    }

    #[test]
    fn malformed_values_fall_back_to_defaults() {
        let src = source(&[
            ("max-versions-per-element", "many"),
            ("visual-similarity-threshold", "1.5"),
            ("auto-capture-enabled", "no"),
            ("max-folder-size-mb", "1"),
            ("templates-root", "/tmp/tpl"),
        ]);
        let cfg = ResolverConfig::from_source(&src);
        assert_eq!(cfg.max_versions_per_element, 3);
        assert_eq!(cfg.visual_similarity_threshold, 0.85);
        assert!(!cfg.auto_capture_enabled);
        assert_eq!(cfg.max_folder_size_mb, 1.0);
        assert_eq!(cfg.templates_root, PathBuf::from("/tmp/tpl"));

        let err = parse_key::<usize>(&src, "max-versions-per-element").unwrap_err();
        assert_eq!(
            err,
            LocateError::ConfigInvalid {
                key: "max-versions-per-element".into(),
                value: "many".into(),
            }
        );
    }

    #[test]
    fn json_uses_dashed_keys() {
        let cfg =
            ResolverConfig::from_json_str(r#"{"debug-mode-enabled": true, "cleanup-age-days": 10}"#)
                .unwrap();
        assert!(cfg.debug_mode_enabled);
        assert_eq!(cfg.cleanup_age_days, 10);
        assert_eq!(cfg.health_policy().cleanup_age_days, 10);
        assert_eq!(cfg.index_policy().max_versions_per_element, 3);
    }
}
