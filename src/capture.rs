//! Opportunistic template capture.
//!
//! After an element was resolved, its screen region is cropped, hashed and,
//! unless an equivalent template already exists, stored as a new version.
//! Storing a capture enforces the per-element version cap and then checks
//! whether the category's `current` folder has to rotate.

use crate::image::io::{crop, save_png};
use crate::image::Rect;
use crate::index::{
    perceptual_hash, CaptureSource, Category, RotationReport, Template, VisualIndex,
};
use crate::metadata::{ElementContext, MetadataTracker};
use crate::trace::{trace_event, trace_span, trace_warn};
use crate::util::{LocateError, LocateResult};
use chrono::{DateTime, Utc};
use image::RgbImage;
use std::path::PathBuf;

/// Switches governing auto-capture.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CapturePolicy {
    pub enabled: bool,
    /// Skip captures that are near-duplicates of an existing template.
    pub duplicate_detection: bool,
}

impl Default for CapturePolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            duplicate_detection: true,
        }
    }
}

/// What to capture.
#[derive(Clone, Debug)]
pub struct CaptureRequest {
    pub element_name: String,
    /// Element bounds on the screen.
    pub region: Rect,
    pub source: CaptureSource,
    pub element_type: Option<String>,
    pub context: ElementContext,
}

impl CaptureRequest {
    pub fn new(element_name: impl Into<String>, region: Rect, source: CaptureSource) -> Self {
        Self {
            element_name: element_name.into(),
            region,
            source,
            element_type: None,
            context: ElementContext::default(),
        }
    }
}

/// Result of a capture attempt.
#[derive(Clone, Debug, PartialEq)]
pub enum CaptureOutcome {
    /// Auto-capture is switched off.
    Disabled,
    /// A healthy template within the fuzzy distance already exists.
    Duplicate { existing: PathBuf },
    Stored {
        template: Template,
        /// Older versions deleted by the version cap.
        removed: Vec<PathBuf>,
        rotation: Option<RotationReport>,
    },
}

impl CaptureOutcome {
    pub fn stored(&self) -> Option<&Template> {
        match self {
            CaptureOutcome::Stored { template, .. } => Some(template),
            _ => None,
        }
    }
}

/// Writes captures into the template store and keeps index and tracker in sync.
#[derive(Clone, Copy, Debug, Default)]
pub struct AutoCapture {
    policy: CapturePolicy,
}

impl AutoCapture {
    pub fn new(policy: CapturePolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &CapturePolicy {
        &self.policy
    }

    /// Captures `request.region` of `screen`.
    ///
    /// I/O failures map to `CaptureFailed`; callers treat it as non-fatal.
    /// Metadata, index and rotation persistence failures are only logged.
    pub fn capture(
        &self,
        index: &mut VisualIndex,
        tracker: &mut MetadataTracker,
        screen: &RgbImage,
        request: &CaptureRequest,
        now: DateTime<Utc>,
    ) -> LocateResult<CaptureOutcome> {
        if !self.policy.enabled {
            return Ok(CaptureOutcome::Disabled);
        }
        let _span = trace_span!("auto_capture", element = request.element_name.as_str()).entered();
        let failed = |err: LocateError| LocateError::CaptureFailed {
            reason: err.to_string(),
        };

        let image = crop(screen, request.region).map_err(failed)?;
        let hash = perceptual_hash(&image);
        let category = Category::for_source(request.source);

        if self.policy.duplicate_detection {
            if let Some(existing) = index
                .find_near_duplicate(&request.element_name, category, hash)
                .cloned()
            {
                if !tracker.needs_recapture(&existing) {
                    trace_event!("capture_skipped_duplicate", distance = existing.hash.distance(hash));
                    tracker.note_context(&existing, &request.context);
                    return Ok(CaptureOutcome::Duplicate {
                        existing: existing.path,
                    });
                }
                trace_warn!(
                    "recapturing {} over unhealthy {}",
                    request.element_name,
                    existing.path.display()
                );
            }
        }

        let version = index.next_version(&request.element_name, request.source);
        let path = index
            .store()
            .template_path(&request.element_name, request.source, version);
        save_png(&image, &path).map_err(failed)?;

        let mut template = Template::describe(
            path,
            &image,
            &request.element_name,
            request.source,
            request.region,
            screen.dimensions(),
            now,
        );
        template.version = version;
        if let Some(kind) = &request.element_type {
            template.element_type.clone_from(kind);
        }
        if let Err(err) = tracker.register(template.clone(), &request.context) {
            trace_warn!("failed to write metadata for {}: {}", template.path.display(), err);
        }
        index.insert(template.clone());

        let removed = index.enforce_version_cap(&request.element_name, category);
        for path in &removed {
            tracker.forget(path, false);
        }

        let rotation = match index.maybe_rotate(category, now) {
            Ok(report) => report,
            Err(err) => {
                trace_warn!("folder rotation failed: {}", err);
                None
            }
        };
        if let Some(report) = &rotation {
            for (from, to) in &report.moved {
                tracker.relocate(from, to);
                if *from == template.path {
                    template.path = to.clone();
                }
            }
            for path in &report.dropped {
                tracker.forget(path, false);
            }
        }

        index.save_or_warn();
        trace_event!("template_captured", version = version, removed = removed.len());
        Ok(CaptureOutcome::Stored {
            template,
            removed,
            rotation,
        })
    }
}
