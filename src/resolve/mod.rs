//! End-to-end element resolution.
//!
//! [`Resolver::resolve`] walks a one-shot cascade and stops at the first
//! validated success:
//!
//! 1. structural lookup (plus opportunistic capture and action validation),
//! 2. image match against the element's named template,
//! 3. perceptual-hash lookup of a reference image, then image match,
//! 4. OCR text localization,
//!
//! and reports `ResolutionFailed` with the attempted strategies otherwise.

use crate::capture::{AutoCapture, CaptureOutcome, CaptureRequest};
use crate::config::ResolverConfig;
use crate::debug::{AttemptRecord, DebugOptions, DebugRecorder};
use crate::image::io::load_rgb;
use crate::image::{Point, Rect};
use crate::index::{perceptual_hash, CaptureSource, Category, Template, TemplateStore, VisualIndex};
use crate::matcher::{ImageMatcher, MatchOutcome, MatchResult, MatchStrategy};
use crate::metadata::{MetadataTracker, ResolutionOutcome, ResolutionStrategy};
use crate::ocr::{OcrLocator, OcrStrategy, TextRecognizer};
use crate::trace::{trace_event, trace_span, trace_warn};
use crate::util::{LocateError, LocateResult};
use chrono::Utc;
use image::RgbImage;
use std::path::PathBuf;
use std::thread;
use std::time::{Duration, Instant};

pub mod collab;
pub mod focus;
pub mod session;

pub use collab::{Capability, ElementHandle, ElementQuery, ScreenSource, TapExecutor};
pub use focus::{locate_focused, FocusSource, ResolvedHandle};
pub use session::SessionContext;

/// Lookup order of named templates.
pub const NAMED_PRIORITY: [Category; 3] = [Category::Screens, Category::AiImages, Category::Manual];

/// Fraction of pixels that must change for a tap to count as validated.
const CHANGE_FRACTION: f64 = 0.001;
/// Per-pixel Manhattan RGB distance that counts as a change.
const CHANGE_DISTANCE: u32 = 30;

/// What the caller wants done with the element.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Action {
    /// Only find the element.
    #[default]
    Locate,
    /// Tap it and require a visible screen change.
    Tap,
}

/// A logical element reference.
#[derive(Clone, Debug, Default)]
pub struct ElementRequest {
    pub name: String,
    /// Reference image for hash lookup and direct matching.
    pub reference: Option<PathBuf>,
    /// Label text for the OCR strategies.
    pub ocr_text: Option<String>,
    pub action: Action,
    pub screen_name: Option<String>,
    pub field_type: Option<String>,
}

impl ElementRequest {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn with_reference(mut self, path: impl Into<PathBuf>) -> Self {
        self.reference = Some(path.into());
        self
    }

    pub fn with_ocr_text(mut self, text: impl Into<String>) -> Self {
        self.ocr_text = Some(text.into());
        self
    }

    pub fn with_action(mut self, action: Action) -> Self {
        self.action = action;
        self
    }

    pub fn on_screen(mut self, screen_name: impl Into<String>) -> Self {
        self.screen_name = Some(screen_name.into());
        self
    }
}

/// Which cascade step resolved the element.
#[derive(Clone, Debug, PartialEq)]
pub enum ResolutionMethod {
    Structural,
    NamedTemplate { template: PathBuf, strategy: MatchStrategy },
    VisualHash { template: PathBuf, distance: u32, strategy: MatchStrategy },
    Ocr(OcrStrategy),
}

impl ResolutionMethod {
    pub fn strategy(&self) -> ResolutionStrategy {
        match self {
            ResolutionMethod::Structural => ResolutionStrategy::Xpath,
            ResolutionMethod::NamedTemplate { .. } | ResolutionMethod::VisualHash { .. } => {
                ResolutionStrategy::Opencv
            }
            ResolutionMethod::Ocr(_) => ResolutionStrategy::Ocr,
        }
    }
}

/// A resolved element.
#[derive(Clone, Debug, PartialEq)]
pub struct Resolution {
    pub element: String,
    pub point: Point,
    pub method: ResolutionMethod,
    pub confidence: Option<f32>,
    pub handle: ResolvedHandle,
    /// Steps tried, in order, including the successful one.
    pub attempted: Vec<String>,
    pub capture: Option<CaptureOutcome>,
}

/// Bounded retry of screen reads.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            delay: Duration::from_millis(100),
        }
    }
}

/// Driver-side collaborators.
pub struct Collaborators {
    pub screen: Box<dyn ScreenSource>,
    pub query: Option<Box<dyn ElementQuery>>,
    pub tapper: Box<dyn TapExecutor>,
    pub recognizer: Option<Box<dyn TextRecognizer>>,
}

/// Runs the resolution cascade for one session.
pub struct Resolver {
    config: ResolverConfig,
    screen: Box<dyn ScreenSource>,
    query: Option<Box<dyn ElementQuery>>,
    tapper: Box<dyn TapExecutor>,
    index: VisualIndex,
    tracker: MetadataTracker,
    capture: AutoCapture,
    matcher: ImageMatcher,
    ocr: Option<OcrLocator<Box<dyn TextRecognizer>>>,
    debug: DebugRecorder,
    retry: RetryPolicy,
}

impl Resolver {
    /// Opens the template store named by the config and wires the collaborators.
    pub fn new(config: ResolverConfig, collab: Collaborators, session: &SessionContext) -> Self {
        let index = VisualIndex::open(
            TemplateStore::new(config.templates_root.clone()),
            config.index_policy(),
        );
        let mut tracker = MetadataTracker::new(config.health_policy());
        tracker.load_all(&index);
        let debug = DebugRecorder::new(
            DebugOptions {
                enabled: config.debug_mode_enabled,
                root: config.debug_root.clone(),
                organize_by_scenario: config.debug_organize_by_scenario,
                retention_days: config.report_retention_days,
            },
            session.run_id(),
            session.started(),
        );
        let Collaborators {
            screen,
            query,
            tapper,
            recognizer,
        } = collab;
        let ocr = recognizer.map(|r| {
            OcrLocator::new(r)
                .with_layout(config.ocr_layout())
                .scale_to_screen(config.ocr_scale_to_screen)
        });
        Self {
            capture: AutoCapture::new(config.capture_policy()),
            matcher: ImageMatcher::new().with_config(config.match_config()),
            config,
            screen,
            query,
            tapper,
            index,
            tracker,
            ocr,
            debug,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn config(&self) -> &ResolverConfig {
        &self.config
    }

    pub fn index(&self) -> &VisualIndex {
        &self.index
    }

    pub fn tracker(&self) -> &MetadataTracker {
        &self.tracker
    }

    pub fn debug(&self) -> &DebugRecorder {
        &self.debug
    }

    /// Reads the screen, retrying a bounded number of times.
    pub fn capture_screen(&self) -> LocateResult<RgbImage> {
        let attempts = self.retry.attempts.max(1);
        let mut last = None;
        for attempt in 1..=attempts {
            match self.screen.capture() {
                Ok(screen) => return Ok(screen),
                Err(err) => {
                    trace_warn!("screen capture attempt {} failed: {}", attempt, err);
                    last = Some(err);
                }
            }
            if attempt < attempts {
                thread::sleep(self.retry.delay);
            }
        }
        Err(LocateError::CaptureFailed {
            reason: last.map_or_else(|| "no screen".to_string(), |e| e.to_string()),
        })
    }

    /// Resolves `request` through the cascade.
    pub fn resolve(
        &mut self,
        session: &mut SessionContext,
        request: &ElementRequest,
    ) -> LocateResult<Resolution> {
        let _span = trace_span!("resolve", element = request.name.as_str()).entered();
        let mut attempted: Vec<String> = Vec::new();

        if let Some(resolution) = self.try_structural(session, request, &mut attempted) {
            return Ok(self.finish(resolution));
        }

        let screen = match self.capture_screen() {
            Ok(screen) => Some(screen),
            Err(err) => {
                trace_warn!("{}; skipping visual strategies", err);
                None
            }
        };

        if let Some(screen) = &screen {
            let named = self.index.find_named(&request.name, &NAMED_PRIORITY).cloned();
            let hit = match named {
                Some(template) => {
                    attempted.push("named_template".into());
                    self.try_template(session, request, screen, &template)
                        .map(|m| {
                            let method = ResolutionMethod::NamedTemplate {
                                template: template.path.clone(),
                                strategy: m.strategy,
                            };
                            (m, method)
                        })
                }
                None if request.reference.is_some() => {
                    attempted.push("visual_hash".into());
                    self.try_visual_hash(session, request, screen)
                }
                None => None,
            };
            if let Some((m, method)) = hit {
                let acted =
                    self.act_on_point(session, request, m.center, method, Some(m.confidence), &mut attempted);
                if let Some(resolution) = acted {
                    return Ok(self.finish(resolution));
                }
            }
        }

        if let (Some(screen), Some(text)) = (&screen, request.ocr_text.as_deref()) {
            if self.ocr.is_some() {
                attempted.push("ocr".into());
                if let Some(resolution) = self.try_ocr(session, request, screen, text, &mut attempted) {
                    return Ok(self.finish(resolution));
                }
            }
        }

        trace_event!("resolution_failed", attempts = attempted.len());
        self.debug.save(Utc::now());
        self.index.save_or_warn();
        Err(LocateError::ResolutionFailed {
            element: request.name.clone(),
            attempted,
        })
    }

    fn finish(&mut self, resolution: Resolution) -> Resolution {
        trace_event!(
            "resolved",
            strategy = resolution.method.strategy().name(),
            x = resolution.point.x,
            y = resolution.point.y
        );
        self.debug.save(Utc::now());
        resolution
    }

    fn try_structural(
        &mut self,
        session: &mut SessionContext,
        request: &ElementRequest,
        attempted: &mut Vec<String>,
    ) -> Option<Resolution> {
        let query = self.query.as_ref()?;
        attempted.push("structural".into());
        let start = Instant::now();
        let handle = query.find_by_name(&request.name).filter(ElementHandle::is_usable)?;
        let point = handle.bounds.center();

        let before = self.capture_screen().ok();
        let capture = before.as_ref().and_then(|screen| {
            self.auto_capture(session, request, screen, handle.bounds, CaptureSource::Auto, handle.capability())
        });

        let validated = match request.action {
            Action::Locate => true,
            Action::Tap => self.tap_and_validate(point, before.as_ref()),
        };
        self.record_named(request, ResolutionStrategy::Xpath, validated, None, start.elapsed());
        self.record_debug(session, request, "structural", validated, None, Some(handle.bounds), before.as_ref());
        if !validated {
            attempted.push("action_validation".into());
            trace_warn!("structural tap on {} showed no screen change", request.name);
            return None;
        }
        Some(Resolution {
            element: request.name.clone(),
            point,
            method: ResolutionMethod::Structural,
            confidence: None,
            handle: ResolvedHandle::Element(handle),
            attempted: attempted.clone(),
            capture,
        })
    }

    fn tap_and_validate(&self, point: Point, before: Option<&RgbImage>) -> bool {
        if let Err(err) = self.tapper.tap(point) {
            trace_warn!("tap failed: {}", err);
            return false;
        }
        match (before, self.capture_screen().ok()) {
            (Some(before), Some(after)) => screen_changed(before, &after),
            // Without screenshots the tap itself is the only evidence.
            _ => true,
        }
    }

    fn try_template(
        &mut self,
        session: &mut SessionContext,
        request: &ElementRequest,
        screen: &RgbImage,
        template: &Template,
    ) -> Option<MatchResult> {
        let image = match load_rgb(&template.path) {
            Ok(image) => image,
            Err(err) => {
                trace_warn!("template {} unreadable: {}", template.path.display(), err);
                return None;
            }
        };
        let start = Instant::now();
        let outcome = match self.match_image(session, request, screen, &image) {
            Ok(outcome) => outcome,
            Err(err) => {
                trace_warn!("image match failed for {}: {}", request.name, err);
                let failed = ResolutionOutcome::new(ResolutionStrategy::Opencv, false, Utc::now())
                    .with_elapsed(start.elapsed());
                self.tracker.record(template, &failed);
                return None;
            }
        };
        let result =
            ResolutionOutcome::new(ResolutionStrategy::Opencv, outcome.is_match(), Utc::now())
                .with_confidence(outcome.confidence())
                .with_elapsed(outcome.elapsed);
        self.tracker.record(template, &result);
        outcome.result
    }

    fn match_image(
        &mut self,
        session: &mut SessionContext,
        request: &ElementRequest,
        screen: &RgbImage,
        template: &RgbImage,
    ) -> LocateResult<MatchOutcome> {
        let outcome = self.matcher.find(screen, template)?;
        let strategy = outcome
            .result
            .map(|r| r.strategy)
            .or_else(|| outcome.best_attempt().map(|a| a.strategy))
            .map_or("image_match", MatchStrategy::name);
        self.record_debug(
            session,
            request,
            strategy,
            outcome.is_match(),
            Some(outcome.confidence()),
            outcome.best_region(),
            Some(screen),
        );
        Ok(outcome)
    }

    fn try_visual_hash(
        &mut self,
        session: &mut SessionContext,
        request: &ElementRequest,
        screen: &RgbImage,
    ) -> Option<(MatchResult, ResolutionMethod)> {
        let reference_path = request.reference.as_ref()?;
        let reference = match load_rgb(reference_path) {
            Ok(image) => image,
            Err(err) => {
                trace_warn!("reference image unreadable: {}", err);
                return None;
            }
        };
        let hash = perceptual_hash(&reference);
        let similar = self
            .index
            .find_similar(hash, Some(&request.name))
            .map(|s| (s.template.clone(), s.distance));

        if let Some((template, distance)) = similar {
            let m = self.try_template(session, request, screen, &template)?;
            let method = ResolutionMethod::VisualHash {
                template: template.path,
                distance,
                strategy: m.strategy,
            };
            return Some((m, method));
        }

        let m = match self.match_image(session, request, screen, &reference) {
            Ok(outcome) => outcome.result?,
            Err(err) => {
                trace_warn!("reference match failed for {}: {}", request.name, err);
                return None;
            }
        };
        let method = ResolutionMethod::VisualHash {
            template: reference_path.clone(),
            distance: 0,
            strategy: m.strategy,
        };
        Some((m, method))
    }

    fn try_ocr(
        &mut self,
        session: &mut SessionContext,
        request: &ElementRequest,
        screen: &RgbImage,
        text: &str,
        attempted: &mut Vec<String>,
    ) -> Option<Resolution> {
        let start = Instant::now();
        let hit = match self.ocr.as_ref()?.find_text(screen, text) {
            Ok(hit) => hit,
            Err(err) => {
                trace_warn!("OCR failed: {}", err);
                None
            }
        };
        self.record_named(request, ResolutionStrategy::Ocr, hit.is_some(), None, start.elapsed());
        self.record_debug(
            session,
            request,
            hit.as_ref().map_or("ocr", |h| h.strategy.name()),
            hit.is_some(),
            None,
            hit.as_ref().and_then(|h| h.label),
            Some(screen),
        );
        let hit = hit?;
        self.act_on_point(
            session,
            request,
            hit.point,
            ResolutionMethod::Ocr(hit.strategy),
            None,
            attempted,
        )
    }

    /// Performs the requested action at a vision-derived point and looks for the focused input.
    ///
    /// A failed tap is recorded as an `action_validation` step and yields `None`
    /// so the cascade moves on.
    fn act_on_point(
        &mut self,
        session: &mut SessionContext,
        request: &ElementRequest,
        point: Point,
        method: ResolutionMethod,
        confidence: Option<f32>,
        attempted: &mut Vec<String>,
    ) -> Option<Resolution> {
        let handle = match request.action {
            Action::Locate => ResolvedHandle::Located(point),
            Action::Tap => {
                if let Err(err) = self.tapper.tap(point) {
                    trace_warn!("tap at ({}, {}) failed: {}", point.x, point.y, err);
                    attempted.push("action_validation".into());
                    self.record_debug(session, request, "action_validation", false, confidence, None, None);
                    return None;
                }
                match &self.query {
                    Some(query) => locate_focused(&**query, Some(point), true).0,
                    None => ResolvedHandle::ActionAlreadyPerformed,
                }
            }
        };

        let mut capture = None;
        if matches!(method, ResolutionMethod::Ocr(_)) {
            if let Some(bounds) = handle.element().map(|h| (h.bounds, h.capability())) {
                if let Ok(screen) = self.capture_screen() {
                    capture = self.auto_capture(session, request, &screen, bounds.0, CaptureSource::Ai, bounds.1);
                }
            }
        }

        Some(Resolution {
            element: request.name.clone(),
            point,
            method,
            confidence,
            handle,
            attempted: attempted.clone(),
            capture,
        })
    }

    fn auto_capture(
        &mut self,
        session: &mut SessionContext,
        request: &ElementRequest,
        screen: &RgbImage,
        region: Rect,
        source: CaptureSource,
        capability: Capability,
    ) -> Option<CaptureOutcome> {
        let mut capture = CaptureRequest::new(&request.name, region, source);
        capture.element_type = Some(capability.name().to_string());
        capture.context = session.element_context(
            request.screen_name.as_deref(),
            request.field_type.as_deref(),
        );
        match self
            .capture
            .capture(&mut self.index, &mut self.tracker, screen, &capture, Utc::now())
        {
            Ok(outcome) => {
                if outcome.stored().is_some() {
                    session.note_capture(&request.name);
                }
                Some(outcome)
            }
            Err(err) => {
                trace_warn!("auto-capture of {} skipped: {}", request.name, err);
                None
            }
        }
    }

    /// Records an outcome against the element's newest named template, if any.
    fn record_named(
        &mut self,
        request: &ElementRequest,
        strategy: ResolutionStrategy,
        success: bool,
        confidence: Option<f32>,
        elapsed: Duration,
    ) {
        let Some(template) = self.index.find_named(&request.name, &NAMED_PRIORITY).cloned() else {
            return;
        };
        let mut outcome = ResolutionOutcome::new(strategy, success, Utc::now()).with_elapsed(elapsed);
        outcome.confidence = confidence;
        self.tracker.record(&template, &outcome);
    }

    #[allow(clippy::too_many_arguments)]
    fn record_debug(
        &mut self,
        session: &mut SessionContext,
        request: &ElementRequest,
        strategy: &str,
        success: bool,
        confidence: Option<f32>,
        region: Option<Rect>,
        screen: Option<&RgbImage>,
    ) {
        if !self.debug.is_enabled() {
            return;
        }
        let step = session.next_step();
        let record = AttemptRecord {
            element: &request.name,
            strategy,
            success,
            confidence,
            region,
            scenario: session.scenario(),
            step,
        };
        self.debug.record(screen, &record, Utc::now());
    }

    /// Polls the screen until `template` matches or `timeout` expires.
    pub fn wait_for_image(
        &self,
        template: &RgbImage,
        timeout: Duration,
        interval: Duration,
    ) -> Option<MatchResult> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Ok(screen) = self.capture_screen() {
                match self.matcher.find(&screen, template) {
                    Ok(outcome) if outcome.is_match() => return outcome.result,
                    Ok(_) => {}
                    Err(err) => trace_warn!("wait_for_image match error: {}", err),
                }
            }
            let now = Instant::now();
            if now >= deadline {
                return None;
            }
            thread::sleep(interval.min(deadline - now));
        }
    }

    /// Persists the index and the debug report.
    pub fn flush(&mut self) {
        self.index.save_or_warn();
        self.debug.save(Utc::now());
    }
}

/// Whether enough pixels differ between two screenshots.
pub fn screen_changed(before: &RgbImage, after: &RgbImage) -> bool {
    if before.dimensions() != after.dimensions() {
        return true;
    }
    let total = before.pixels().len().max(1);
    let changed = before
        .pixels()
        .zip(after.pixels())
        .filter(|(a, b)| {
            let d: u32 = a
                .0
                .iter()
                .zip(b.0.iter())
                .map(|(&x, &y)| (x as i32 - y as i32).unsigned_abs())
                .sum();
            d > CHANGE_DISTANCE
        })
        .count();
    changed as f64 / total as f64 > CHANGE_FRACTION
}
