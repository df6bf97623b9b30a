//! Perceptual-hash index over the template store.
//!
//! The index keeps three in-memory views of the same templates: by path (the
//! owning map), by hash (exact and fuzzy similarity lookups), and by element
//! name (newest first). It owns version-cap enforcement and folder rotation,
//! and persists to a single JSON document it can be rebuilt from.

use crate::trace::{trace_debug, trace_event, trace_warn};
use crate::util::fs::{read_json, remove_file_if_exists};
use crate::util::{LocateError, LocateResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

pub mod hash;
pub mod persist;
pub mod store;
pub mod template;

pub use hash::{hamming_distance, perceptual_hash, PerceptualHash};
pub use persist::{IndexDocument, IndexEntry};
pub use store::{Category, FolderStats, TemplateStore};
pub use template::{CaptureSource, Template};

use store::{parse_version, sidecar_path};

/// Limits governing versions, rotation and fuzzy lookups.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexPolicy {
    /// Non-manual templates kept per (element, category).
    pub max_versions_per_element: usize,
    /// Size at which a category's `current` folder rotates.
    pub max_folder_size_mb: f64,
    /// Rotated `version_*` folders kept per category.
    pub max_version_folders: usize,
    /// Largest Hamming distance a fuzzy hit may have.
    pub fuzzy_max_distance: u32,
    /// Minimum `1 - distance / 64` a fuzzy hit must reach.
    pub similarity_threshold: f32,
}

impl Default for IndexPolicy {
    fn default() -> Self {
        Self {
            max_versions_per_element: 3,
            max_folder_size_mb: 100.0,
            max_version_folders: 5,
            fuzzy_max_distance: 2,
            similarity_threshold: 0.85,
        }
    }
}

/// A similarity-lookup hit.
#[derive(Clone, Copy, Debug)]
pub struct SimilarTemplate<'a> {
    pub template: &'a Template,
    pub distance: u32,
    pub similarity: f32,
}

/// What a folder rotation changed.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RotationReport {
    pub version_dir: PathBuf,
    /// `(old, new)` paths of templates moved out of `current`.
    pub moved: Vec<(PathBuf, PathBuf)>,
    /// Version folders deleted because they exceeded the folder cap.
    pub pruned_dirs: Vec<PathBuf>,
    /// Templates dropped from the index along with pruned folders.
    pub dropped: Vec<PathBuf>,
}

/// Counts for reporting.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct IndexStats {
    pub templates: usize,
    pub elements: usize,
    pub per_category: BTreeMap<String, usize>,
    pub folder_stats: BTreeMap<String, FolderStats>,
}

/// In-memory visual template index.
pub struct VisualIndex {
    store: TemplateStore,
    policy: IndexPolicy,
    templates: BTreeMap<PathBuf, Template>,
    by_hash: HashMap<PerceptualHash, Vec<PathBuf>>,
    by_name: HashMap<String, Vec<PathBuf>>,
    folder_stats: BTreeMap<String, FolderStats>,
}

impl VisualIndex {
    /// Creates an empty index over `store`.
    pub fn new(store: TemplateStore, policy: IndexPolicy) -> Self {
        Self {
            store,
            policy,
            templates: BTreeMap::new(),
            by_hash: HashMap::new(),
            by_name: HashMap::new(),
            folder_stats: BTreeMap::new(),
        }
    }

    /// Loads the persisted document, rebuilding from disk when it is missing or corrupt.
    pub fn open(store: TemplateStore, policy: IndexPolicy) -> Self {
        let mut index = Self::new(store, policy);
        if let Err(err) = index.store.ensure_layout() {
            trace_warn!("could not create template layout: {}", err);
        }
        match IndexDocument::load(&index.store.index_path()) {
            Ok(Some(doc)) => index.load_document(doc),
            Ok(None) => index.rebuild_from_disk(),
            Err(err) => {
                trace_warn!("{}; rebuilding index from disk", err);
                index.rebuild_from_disk();
            }
        }
        trace_event!("index_opened", templates = index.len());
        index
    }

    pub fn store(&self) -> &TemplateStore {
        &self.store
    }

    pub fn policy(&self) -> &IndexPolicy {
        &self.policy
    }

    pub fn len(&self) -> usize {
        self.templates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }

    pub fn get(&self, path: &Path) -> Option<&Template> {
        self.templates.get(path)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Template> {
        self.templates.values()
    }

    /// Adds or replaces a template.
    pub fn insert(&mut self, template: Template) {
        let path = template.path.clone();
        self.remove(&path);
        self.by_hash
            .entry(template.hash)
            .or_default()
            .push(path.clone());
        self.by_name
            .entry(template.element_name.to_lowercase())
            .or_default()
            .push(path.clone());
        let key = template.element_name.to_lowercase();
        self.templates.insert(path, template);
        self.sort_name_bucket(&key);
    }

    /// Drops a template from every map; the file stays on disk.
    pub fn remove(&mut self, path: &Path) -> Option<Template> {
        let template = self.templates.remove(path)?;
        if let Some(paths) = self.by_hash.get_mut(&template.hash) {
            paths.retain(|p| p != path);
            if paths.is_empty() {
                self.by_hash.remove(&template.hash);
            }
        }
        let key = template.element_name.to_lowercase();
        if let Some(paths) = self.by_name.get_mut(&key) {
            paths.retain(|p| p != path);
            if paths.is_empty() {
                self.by_name.remove(&key);
            }
        }
        Some(template)
    }

    fn sort_name_bucket(&mut self, key: &str) {
        let Some(paths) = self.by_name.get_mut(key) else {
            return;
        };
        let templates = &self.templates;
        paths.sort_by(|a, b| newest_first(&templates[a], &templates[b]));
    }

    /// Exact hash lookup, optionally restricted to names containing `name_hint`.
    ///
    /// Among several hits the newest template wins.
    pub fn find_exact(&self, hash: PerceptualHash, name_hint: Option<&str>) -> Option<&Template> {
        let paths = self.by_hash.get(&hash)?;
        paths
            .iter()
            .filter_map(|p| self.templates.get(p))
            .filter(|t| name_hint.map_or(true, |h| t.name_matches(h)))
            .min_by(|a, b| newest_first(a, b))
    }

    /// Exact lookup, falling back to the closest hash within the fuzzy limits.
    pub fn find_similar(
        &self,
        hash: PerceptualHash,
        name_hint: Option<&str>,
    ) -> Option<SimilarTemplate<'_>> {
        if let Some(template) = self.find_exact(hash, name_hint) {
            return Some(SimilarTemplate {
                template,
                distance: 0,
                similarity: 1.0,
            });
        }

        let mut best: Option<SimilarTemplate<'_>> = None;
        for template in self.templates.values() {
            if name_hint.is_some_and(|h| !template.name_matches(h)) {
                continue;
            }
            let distance = hash.distance(template.hash);
            let similarity = hash.similarity(template.hash);
            if distance > self.policy.fuzzy_max_distance
                || similarity < self.policy.similarity_threshold
            {
                continue;
            }
            let better = match &best {
                None => true,
                Some(cur) => {
                    distance < cur.distance
                        || (distance == cur.distance
                            && newest_first(template, cur.template).is_lt())
                }
            };
            if better {
                best = Some(SimilarTemplate {
                    template,
                    distance,
                    similarity,
                });
            }
        }
        trace_debug!(
            "fuzzy lookup for {} -> {:?}",
            hash,
            best.as_ref().map(|b| b.distance)
        );
        best
    }

    /// Templates of one element in one category, in lookup order.
    ///
    /// `current` comes first, then `version_*` folders newest first; inside a
    /// folder the newest capture wins.
    pub fn versions_of(&self, name: &str, category: Category) -> Vec<&Template> {
        let mut out: Vec<&Template> = self
            .templates
            .values()
            .filter(|t| t.is_element(name) && self.store.category_of(&t.path) == Some(category))
            .collect();
        out.sort_by(|a, b| {
            let a_cur = self.store.is_current(&a.path);
            let b_cur = self.store.is_current(&b.path);
            b_cur
                .cmp(&a_cur)
                .then_with(|| b.path.parent().cmp(&a.path.parent()))
                .then_with(|| newest_first(a, b))
        });
        out
    }

    /// Most relevant template of an element in one category.
    pub fn find_by_name(&self, name: &str, category: Category) -> Option<&Template> {
        self.versions_of(name, category).into_iter().next()
    }

    /// First hit across categories in the given priority order.
    pub fn find_named(&self, name: &str, priority: &[Category]) -> Option<&Template> {
        priority.iter().find_map(|&c| self.find_by_name(name, c))
    }

    /// Like [`find_named`](Self::find_named), but a miss is `TemplateNotFound`.
    pub fn require_named(&self, name: &str, priority: &[Category]) -> LocateResult<&Template> {
        self.find_named(name, priority)
            .ok_or_else(|| LocateError::TemplateNotFound {
                element: name.to_string(),
            })
    }

    /// An existing template of the element within the fuzzy distance of `hash`.
    pub fn find_near_duplicate(
        &self,
        name: &str,
        category: Category,
        hash: PerceptualHash,
    ) -> Option<&Template> {
        self.versions_of(name, category)
            .into_iter()
            .find(|t| t.hash.distance(hash) <= self.policy.fuzzy_max_distance)
    }

    /// Version number the next capture of `name` under `source` should use.
    pub fn next_version(&self, name: &str, source: CaptureSource) -> u32 {
        let category = Category::for_source(source);
        let mut version = self
            .versions_of(name, category)
            .iter()
            .map(|t| t.version.max(parse_version(&t.path)))
            .max()
            .map_or(1, |v| v + 1);
        while self.store.template_path(name, source, version).exists() {
            version += 1;
        }
        version
    }

    /// Deletes the oldest non-manual versions of an element beyond the cap.
    ///
    /// Returns the template paths removed from disk and index.
    pub fn enforce_version_cap(&mut self, name: &str, category: Category) -> Vec<PathBuf> {
        if !category.is_versioned() {
            return Vec::new();
        }
        let mut candidates: Vec<&Template> = self
            .templates
            .values()
            .filter(|t| {
                t.is_element(name)
                    && t.capture_source != CaptureSource::Manual
                    && self.store.category_of(&t.path) == Some(category)
            })
            .collect();
        candidates.sort_by(|a, b| newest_first(a, b));
        let surplus: Vec<PathBuf> = candidates
            .iter()
            .skip(self.policy.max_versions_per_element)
            .map(|t| t.path.clone())
            .collect();

        for path in &surplus {
            for file in [path.clone(), sidecar_path(path)] {
                if let Err(err) = remove_file_if_exists(&file) {
                    trace_warn!("failed to delete old version {}: {}", file.display(), err);
                }
            }
            self.remove(path);
        }
        if !surplus.is_empty() {
            trace_event!("version_cap_enforced", removed = surplus.len());
        }
        surplus
    }

    /// Rotates a category's `current` folder once it exceeds the size limit.
    pub fn maybe_rotate(
        &mut self,
        category: Category,
        now: DateTime<Utc>,
    ) -> LocateResult<Option<RotationReport>> {
        if !category.is_versioned() {
            return Ok(None);
        }
        let size_mb = self.store.folder_size_mb(category);
        self.update_folder_stats(category, now);
        if size_mb <= self.policy.max_folder_size_mb {
            return Ok(None);
        }

        let current = self.store.write_dir(category);
        let version_dir = self.store.rotate_current(category, now)?;
        let mut report = RotationReport {
            version_dir: version_dir.clone(),
            ..RotationReport::default()
        };

        let moved: Vec<PathBuf> = self
            .templates
            .keys()
            .filter(|p| p.starts_with(&current))
            .cloned()
            .collect();
        for old in moved {
            if let Some(mut template) = self.remove(&old) {
                let rel = old.strip_prefix(&current).unwrap_or(&old).to_path_buf();
                template.path = version_dir.join(rel);
                report.moved.push((old, template.path.clone()));
                self.insert(template);
            }
        }

        report.pruned_dirs = self
            .store
            .prune_version_dirs(category, self.policy.max_version_folders);
        for dir in &report.pruned_dirs {
            let dropped: Vec<PathBuf> = self
                .templates
                .keys()
                .filter(|p| p.starts_with(dir))
                .cloned()
                .collect();
            for path in dropped {
                self.remove(&path);
                report.dropped.push(path);
            }
        }

        let key = self.stats_key(category);
        self.folder_stats.insert(
            key,
            FolderStats {
                size_mb: 0.0,
                created: now,
                last_modified: now,
            },
        );
        trace_event!(
            "folder_rotated",
            moved = report.moved.len(),
            pruned = report.pruned_dirs.len()
        );
        Ok(Some(report))
    }

    /// Refreshes the size and modification time of a category's write folder.
    pub fn update_folder_stats(&mut self, category: Category, now: DateTime<Utc>) {
        let size_mb = self.store.folder_size_mb(category);
        let key = self.stats_key(category);
        let entry = self.folder_stats.entry(key).or_insert(FolderStats {
            size_mb,
            created: now,
            last_modified: now,
        });
        entry.size_mb = size_mb;
        entry.last_modified = now;
    }

    fn stats_key(&self, category: Category) -> String {
        self.store
            .relative(&self.store.write_dir(category))
            .to_string_lossy()
            .replace('\\', "/")
    }

    pub fn folder_stats(&self) -> &BTreeMap<String, FolderStats> {
        &self.folder_stats
    }

    /// Snapshot of the index in its persisted form.
    pub fn to_document(&self) -> IndexDocument {
        IndexDocument {
            templates: self
                .templates
                .values()
                .map(|t| IndexEntry {
                    path: self.store.relative(&t.path),
                    hash: t.hash,
                    element_name: t.element_name.clone(),
                    created: t.captured_at,
                    version: t.version,
                })
                .collect(),
            folder_stats: self.folder_stats.clone(),
        }
    }

    /// Writes the index document.
    pub fn save(&self) -> LocateResult<()> {
        self.to_document().save(&self.store.index_path())
    }

    /// Writes the index document, logging instead of failing.
    pub fn save_or_warn(&self) {
        if let Err(err) = self.save() {
            trace_warn!("failed to persist visual index: {}", err);
        }
    }

    /// Replaces the in-memory state with the templates a document references.
    ///
    /// Entries whose image is gone are skipped; manual templates present on
    /// disk but absent from the document are picked up as well.
    pub fn load_document(&mut self, doc: IndexDocument) {
        self.clear();
        for entry in doc.templates {
            let png = self.store.absolute(&entry.path);
            if !png.exists() {
                trace_warn!("indexed template {} is missing; skipping", png.display());
                continue;
            }
            let template = match read_sidecar(&png) {
                Some(t) => t,
                None => match self.describe_orphan(&png) {
                    Some(mut t) => {
                        t.element_name = entry.element_name.clone();
                        t.aliases = template::name_aliases(&entry.element_name);
                        t.captured_at = entry.created;
                        t.version = entry.version;
                        t
                    }
                    None => continue,
                },
            };
            self.insert(template);
        }
        self.folder_stats = doc.folder_stats;
        let manual = self.store.write_dir(Category::Manual);
        self.scan_dir(&manual, true);
    }

    /// Rebuilds the index by scanning every category folder.
    pub fn rebuild_from_disk(&mut self) {
        self.clear();
        for category in [Category::Screens, Category::AiImages, Category::Manual] {
            for dir in self.store.lookup_dirs(category) {
                self.scan_dir(&dir, false);
            }
        }
    }

    fn scan_dir(&mut self, dir: &Path, only_new: bool) {
        let Ok(entries) = std::fs::read_dir(dir) else {
            return;
        };
        let mut pngs: Vec<PathBuf> = entries
            .flatten()
            .map(|e| e.path())
            .filter(|p| p.extension().is_some_and(|e| e.eq_ignore_ascii_case("png")))
            .collect();
        pngs.sort();
        for png in pngs {
            if only_new && self.templates.contains_key(&png) {
                continue;
            }
            let template = read_sidecar(&png).or_else(|| self.describe_orphan(&png));
            if let Some(template) = template {
                self.insert(template);
            }
        }
    }

    /// Describes a template image that has no readable sidecar.
    fn describe_orphan(&self, png: &Path) -> Option<Template> {
        let img = match crate::image::io::load_rgb(png) {
            Ok(img) => img,
            Err(err) => {
                trace_warn!("unreadable template {}: {}", png.display(), err);
                return None;
            }
        };
        let category = self.store.category_of(png).unwrap_or(Category::Manual);
        let source = match category {
            Category::Screens => CaptureSource::Auto,
            Category::AiImages => CaptureSource::Ai,
            Category::Manual => CaptureSource::Manual,
        };
        let name = element_name_from_file(png, source);
        let captured_at = std::fs::metadata(png)
            .and_then(|m| m.modified())
            .map(DateTime::<Utc>::from)
            .unwrap_or_else(|_| Utc::now());
        let (w, h) = img.dimensions();
        let mut template = Template::describe(
            png.to_path_buf(),
            &img,
            &name,
            source,
            crate::image::Rect::new(0, 0, w, h),
            (w, h),
            captured_at,
        );
        template.version = parse_version(png);
        Some(template)
    }

    fn clear(&mut self) {
        self.templates.clear();
        self.by_hash.clear();
        self.by_name.clear();
        self.folder_stats.clear();
    }

    /// Counts per category plus folder statistics.
    pub fn stats(&self) -> IndexStats {
        let mut per_category = BTreeMap::new();
        for t in self.templates.values() {
            let name = self
                .store
                .category_of(&t.path)
                .map_or("other", Category::dir_name);
            *per_category.entry(name.to_string()).or_insert(0) += 1;
        }
        IndexStats {
            templates: self.templates.len(),
            elements: self.by_name.len(),
            per_category,
            folder_stats: self.folder_stats.clone(),
        }
    }
}

fn newest_first(a: &Template, b: &Template) -> std::cmp::Ordering {
    b.captured_at
        .cmp(&a.captured_at)
        .then_with(|| b.version.cmp(&a.version))
        .then_with(|| a.path.cmp(&b.path))
}

fn read_sidecar(png: &Path) -> Option<Template> {
    let sidecar = sidecar_path(png);
    if !sidecar.exists() {
        return None;
    }
    match read_json::<Template>(&sidecar) {
        Ok(mut t) => {
            t.path = png.to_path_buf();
            Some(t)
        }
        Err(err) => {
            trace_warn!("unreadable sidecar {}: {}", sidecar.display(), err);
            None
        }
    }
}

/// Element name encoded in a file name, with source and version suffixes removed.
fn element_name_from_file(png: &Path, source: CaptureSource) -> String {
    let stem = png
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("element")
        .to_string();
    let stem = match stem.rsplit_once("_v") {
        Some((head, v)) if v.parse::<u32>().is_ok() => head.to_string(),
        _ => stem,
    };
    let suffix = source.file_suffix();
    match stem.strip_suffix(suffix) {
        Some(head) if !suffix.is_empty() => head.to_string(),
        _ => stem,
    }
}
