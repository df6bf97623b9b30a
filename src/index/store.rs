//! Filesystem layout of the template store.
//!
//! ```text
//! templates/
//!   screens/current/*            structural auto-captures
//!   screens/version_<date>/*     rotated-out auto-captures
//!   AI_images/current/*          vision/OCR captures
//!   AI_images/version_<date>/*
//!   manual_captured_images/*     curated templates, never rotated or capped
//!   visual_index/global_index.json
//! ```
//!
//! Every template is `<name>[_auto|_ai][_v<N>].png` with a sibling `.json`
//! metadata sidecar of the same base name.

use crate::index::template::CaptureSource;
use crate::util::fs::dir_size_bytes;
use crate::util::{LocateError, LocateResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

pub const CURRENT_DIR: &str = "current";
pub const VERSION_PREFIX: &str = "version_";
pub const INDEX_DIR: &str = "visual_index";
pub const INDEX_FILE: &str = "global_index.json";

/// Storage category of a template.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Category {
    #[serde(rename = "screens")]
    Screens,
    #[serde(rename = "AI_images")]
    AiImages,
    #[serde(rename = "manual_captured_images")]
    Manual,
}

impl Category {
    /// Categories that rotate their `current` folder.
    pub const ROTATING: [Category; 2] = [Category::Screens, Category::AiImages];

    pub fn dir_name(self) -> &'static str {
        match self {
            Category::Screens => "screens",
            Category::AiImages => "AI_images",
            Category::Manual => "manual_captured_images",
        }
    }

    /// Category a capture source is stored under.
    pub fn for_source(source: CaptureSource) -> Self {
        match source {
            CaptureSource::Manual => Category::Manual,
            CaptureSource::Auto => Category::Screens,
            CaptureSource::Ai => Category::AiImages,
        }
    }

    pub fn is_versioned(self) -> bool {
        !matches!(self, Category::Manual)
    }
}

/// Size and timestamps of a category's `current` folder.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FolderStats {
    #[serde(rename = "sizeMB")]
    pub size_mb: f64,
    pub created: DateTime<Utc>,
    pub last_modified: DateTime<Utc>,
}

/// Root of the on-disk template layout.
#[derive(Clone, Debug)]
pub struct TemplateStore {
    root: PathBuf,
}

impl TemplateStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn category_dir(&self, category: Category) -> PathBuf {
        self.root.join(category.dir_name())
    }

    /// Folder new captures of `category` are written to.
    pub fn write_dir(&self, category: Category) -> PathBuf {
        match category {
            Category::Manual => self.category_dir(category),
            _ => self.category_dir(category).join(CURRENT_DIR),
        }
    }

    pub fn index_path(&self) -> PathBuf {
        self.root.join(INDEX_DIR).join(INDEX_FILE)
    }

    /// Creates every category folder.
    pub fn ensure_layout(&self) -> LocateResult<()> {
        for category in [Category::Screens, Category::AiImages, Category::Manual] {
            let dir = self.write_dir(category);
            fs::create_dir_all(&dir).map_err(|err| LocateError::io(&dir, err))?;
        }
        let dir = self.root.join(INDEX_DIR);
        fs::create_dir_all(&dir).map_err(|err| LocateError::io(&dir, err))
    }

    /// `version_*` folders of a category, newest first.
    pub fn version_dirs(&self, category: Category) -> Vec<PathBuf> {
        let Ok(entries) = fs::read_dir(self.category_dir(category)) else {
            return Vec::new();
        };
        let mut dirs: Vec<PathBuf> = entries
            .flatten()
            .map(|e| e.path())
            .filter(|p| {
                p.is_dir()
                    && p.file_name()
                        .and_then(|n| n.to_str())
                        .is_some_and(|n| n.starts_with(VERSION_PREFIX))
            })
            .collect();
        // Folder names embed a sortable timestamp.
        dirs.sort();
        dirs.reverse();
        dirs
    }

    /// Every folder that may hold templates of `category`, in lookup order.
    pub fn lookup_dirs(&self, category: Category) -> Vec<PathBuf> {
        let mut dirs = vec![self.write_dir(category)];
        if category.is_versioned() {
            dirs.extend(self.version_dirs(category));
        }
        dirs
    }

    /// Category a template path belongs to, judged from its folder names.
    pub fn category_of(&self, path: &Path) -> Option<Category> {
        let rel = path.strip_prefix(&self.root).unwrap_or(path);
        let first = rel.components().next()?.as_os_str().to_str()?;
        [Category::Screens, Category::AiImages, Category::Manual]
            .into_iter()
            .find(|c| c.dir_name() == first)
    }

    /// Whether `path` lives in a category's `current` folder.
    pub fn is_current(&self, path: &Path) -> bool {
        path.parent()
            .and_then(|p| p.file_name())
            .and_then(|n| n.to_str())
            .is_some_and(|n| n == CURRENT_DIR)
    }

    /// Size of a category's write folder in megabytes.
    pub fn folder_size_mb(&self, category: Category) -> f64 {
        dir_size_bytes(&self.write_dir(category)) as f64 / (1024.0 * 1024.0)
    }

    /// Path of a template file for `name`, `source` and `version`.
    pub fn template_path(&self, name: &str, source: CaptureSource, version: u32) -> PathBuf {
        let category = Category::for_source(source);
        self.write_dir(category)
            .join(template_file_name(name, source, version))
    }

    /// Relative form of `path` for the persisted index document.
    pub fn relative(&self, path: &Path) -> PathBuf {
        path.strip_prefix(&self.root)
            .map(Path::to_path_buf)
            .unwrap_or_else(|_| path.to_path_buf())
    }

    /// Absolute form of a path read from the index document.
    pub fn absolute(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root.join(path)
        }
    }

    /// Renames `current` to a fresh `version_<date>` folder and recreates `current`.
    ///
    /// Returns the new version folder.
    pub fn rotate_current(&self, category: Category, now: DateTime<Utc>) -> LocateResult<PathBuf> {
        let current = self.write_dir(category);
        let base = format!("{VERSION_PREFIX}{}", now.format("%Y%m%d_%H%M%S"));
        let parent = self.category_dir(category);
        let mut target = parent.join(&base);
        let mut n = 1;
        while target.exists() {
            target = parent.join(format!("{base}_{n}"));
            n += 1;
        }
        fs::rename(&current, &target).map_err(|err| LocateError::io(&current, err))?;
        fs::create_dir_all(&current).map_err(|err| LocateError::io(&current, err))?;
        Ok(target)
    }

    /// Deletes the oldest version folders beyond `keep`; returns the removed folders.
    pub fn prune_version_dirs(&self, category: Category, keep: usize) -> Vec<PathBuf> {
        let dirs = self.version_dirs(category);
        let mut removed = Vec::new();
        for dir in dirs.into_iter().skip(keep) {
            match fs::remove_dir_all(&dir) {
                Ok(()) => removed.push(dir),
                Err(err) => {
                    crate::trace::trace_warn!("failed to prune {}: {}", dir.display(), err)
                }
            }
        }
        removed
    }
}

/// Replaces anything but ASCII alphanumerics with `_`.
pub fn sanitize_name(name: &str) -> String {
    let cleaned: String = name
        .trim()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect();
    if cleaned.is_empty() {
        "element".to_string()
    } else {
        cleaned
    }
}

/// `<name>[_auto|_ai][_v<N>].png`; version 1 carries no suffix.
pub fn template_file_name(name: &str, source: CaptureSource, version: u32) -> String {
    let mut out = sanitize_name(name);
    out.push_str(source.file_suffix());
    if version > 1 {
        out.push_str(&format!("_v{version}"));
    }
    out.push_str(".png");
    out
}

/// Version number encoded in a template file name (1 when absent).
pub fn parse_version(path: &Path) -> u32 {
    let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
        return 1;
    };
    stem.rsplit_once("_v")
        .and_then(|(_, v)| v.parse().ok())
        .unwrap_or(1)
}

/// Metadata sidecar of a template image.
pub fn sidecar_path(template: &Path) -> PathBuf {
    template.with_extension("json")
}

#[cfg(test)]
mod tests {
    use super::{parse_version, sidecar_path, template_file_name, Category, TemplateStore};
    use crate::index::template::CaptureSource;
    use chrono::{TimeZone, Utc};
    use std::path::Path;

    #[test]
    fn file_names_follow_the_layout() {
        assert_eq!(
            template_file_name("Mobile Number", CaptureSource::Auto, 1),
            "Mobile_Number_auto.png"
        );
        assert_eq!(
            template_file_name("login", CaptureSource::Ai, 3),
            "login_ai_v3.png"
        );
        assert_eq!(
            template_file_name("logo", CaptureSource::Manual, 1),
            "logo.png"
        );
        assert_eq!(parse_version(Path::new("a/login_ai_v3.png")), 3);
        assert_eq!(parse_version(Path::new("a/login_ai.png")), 1);
        assert_eq!(
            sidecar_path(Path::new("a/login_ai.png")),
            Path::new("a/login_ai.json")
        );
    }

    #[test]
    fn categories_resolve_from_paths() {
        let store = TemplateStore::new("/t");
        let p = store.template_path("x", CaptureSource::Ai, 1);
        assert_eq!(p, Path::new("/t/AI_images/current/x_ai.png"));
        assert_eq!(store.category_of(&p), Some(Category::AiImages));
        assert!(store.is_current(&p));
        let manual = store.template_path("x", CaptureSource::Manual, 1);
        assert_eq!(store.category_of(&manual), Some(Category::Manual));
        assert!(!store.is_current(&manual));
    }

    #[test]
    fn rotation_renames_current_and_prunes_oldest() {
        let dir = tempfile::tempdir().unwrap();
        let store = TemplateStore::new(dir.path());
        store.ensure_layout().unwrap();
        let cur = store.write_dir(Category::Screens);
        std::fs::write(cur.join("a_auto.png"), [1u8; 8]).unwrap();

        let mut made = Vec::new();
        for day in 1..=3 {
            let now = Utc.with_ymd_and_hms(2024, 5, day, 12, 0, 0).unwrap();
            made.push(store.rotate_current(Category::Screens, now).unwrap());
        }
        assert!(made[0].join("a_auto.png").exists());
        assert!(cur.exists());
        assert_eq!(std::fs::read_dir(&cur).unwrap().count(), 0);
        assert_eq!(store.version_dirs(Category::Screens)[0], made[2]);

        let removed = store.prune_version_dirs(Category::Screens, 2);
        assert_eq!(removed, vec![made[0].clone()]);
        assert_eq!(store.version_dirs(Category::Screens).len(), 2);
    }
}
