//! Sidecar-backed cache of template metadata.

use crate::index::store::sidecar_path;
use crate::index::{Template, VisualIndex};
use crate::metadata::model::{
    ElementContext, HealthPolicy, HealthReport, ResolutionOutcome, TemplateMetadata,
};
use crate::trace::{trace_event, trace_warn};
use crate::util::fs::{read_json, remove_file_if_exists, write_json};
use crate::util::LocateResult;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Loads, updates and persists [`TemplateMetadata`] sidecars.
///
/// Entries are cached by template path. Persistence failures are logged and
/// never surface to the caller.
#[derive(Debug, Default)]
pub struct MetadataTracker {
    policy: HealthPolicy,
    cache: BTreeMap<PathBuf, TemplateMetadata>,
}

impl MetadataTracker {
    pub fn new(policy: HealthPolicy) -> Self {
        Self {
            policy,
            cache: BTreeMap::new(),
        }
    }

    pub fn policy(&self) -> &HealthPolicy {
        &self.policy
    }

    pub fn len(&self) -> usize {
        self.cache.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &TemplateMetadata> {
        self.cache.values()
    }

    pub fn get(&self, path: &Path) -> Option<&TemplateMetadata> {
        self.cache.get(path)
    }

    /// Metadata of `template`, read from its sidecar or created fresh.
    pub fn entry(&mut self, template: &Template) -> &mut TemplateMetadata {
        self.cache
            .entry(template.path.clone())
            .or_insert_with(|| load_sidecar(template))
    }

    /// Creates the metadata of a fresh capture and writes its sidecar.
    pub fn register(
        &mut self,
        template: Template,
        context: &ElementContext,
    ) -> LocateResult<&TemplateMetadata> {
        let path = template.path.clone();
        let mut meta = TemplateMetadata::new(template);
        meta.context.merge(context);
        meta.health = meta.evaluate(meta.template.captured_at, &self.policy);
        write_json(&sidecar_path(&path), &meta)?;
        self.cache.insert(path.clone(), meta);
        Ok(&self.cache[&path])
    }

    /// Records a resolution outcome against `template` and persists the sidecar.
    pub fn record(&mut self, template: &Template, outcome: &ResolutionOutcome) -> HealthReport {
        let policy = self.policy;
        let meta = self.entry(template);
        let report = meta.record(outcome, &policy).clone();
        trace_event!(
            "template_outcome",
            strategy = outcome.strategy.name(),
            success = outcome.success,
            success_rate = meta.usage.success_rate
        );
        self.persist(&template.path);
        report
    }

    /// Merges an observation context into a template's metadata.
    pub fn note_context(&mut self, template: &Template, context: &ElementContext) {
        self.entry(template).context.merge(context);
        self.persist(&template.path);
    }

    /// Writes one cached entry to its sidecar, logging failures.
    pub fn persist(&self, path: &Path) {
        let Some(meta) = self.cache.get(path) else {
            return;
        };
        if let Err(err) = write_json(&sidecar_path(path), meta) {
            trace_warn!("failed to persist metadata for {}: {}", path.display(), err);
        }
    }

    /// Whether the template's health says it should be captured again.
    pub fn needs_recapture(&mut self, template: &Template) -> bool {
        self.entry(template).health.needs_recapture
    }

    /// Re-keys an entry after its template moved on disk.
    pub fn relocate(&mut self, from: &Path, to: &Path) {
        if let Some(mut meta) = self.cache.remove(from) {
            meta.template.path = to.to_path_buf();
            self.cache.insert(to.to_path_buf(), meta);
            self.persist(to);
        }
    }

    /// Drops an entry, deleting its sidecar when `delete_sidecar` is set.
    pub fn forget(&mut self, path: &Path, delete_sidecar: bool) {
        self.cache.remove(path);
        if delete_sidecar {
            if let Err(err) = remove_file_if_exists(&sidecar_path(path)) {
                trace_warn!("failed to delete metadata of {}: {}", path.display(), err);
            }
        }
    }

    /// Loads metadata for every template in the index.
    pub fn load_all(&mut self, index: &VisualIndex) {
        for template in index.iter() {
            self.entry(template);
        }
        self.cache.retain(|path, _| index.get(path).is_some());
    }

    /// Reclassifies every cached entry as of `now` and rewrites the sidecars.
    pub fn refresh_health(&mut self, now: DateTime<Utc>) {
        let policy = self.policy;
        for meta in self.cache.values_mut() {
            meta.health = meta.evaluate(now, &policy);
        }
        for path in self.cache.keys() {
            self.persist(path);
        }
    }
}

fn load_sidecar(template: &Template) -> TemplateMetadata {
    let sidecar = sidecar_path(&template.path);
    if sidecar.exists() {
        match read_json::<TemplateMetadata>(&sidecar) {
            Ok(mut meta) => {
                meta.template.path = template.path.clone();
                return meta;
            }
            Err(err) => {
                trace_warn!("unreadable metadata {}: {}; starting fresh", sidecar.display(), err);
            }
        }
    }
    TemplateMetadata::new(template.clone())
}
