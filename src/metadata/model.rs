//! Per-template usage, performance and health ledgers.
//!
//! A [`TemplateMetadata`] is the sidecar document written next to every
//! template image. Its template descriptors are flattened into the top level
//! so the same file also reads back as a plain [`Template`].

use crate::index::{CaptureSource, Template};
use crate::util::math::{clamp01, mean, ratio, running_mean};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::time::Duration;

/// Image-match confidences retained per template.
pub const CONFIDENCE_WINDOW: usize = 10;

/// Strategy that produced a resolution outcome.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResolutionStrategy {
    /// Structural lookup through the element-query collaborator.
    Xpath,
    /// Raster template matching.
    Opencv,
    /// Text localization.
    Ocr,
}

impl ResolutionStrategy {
    pub fn name(self) -> &'static str {
        match self {
            ResolutionStrategy::Xpath => "xpath",
            ResolutionStrategy::Opencv => "opencv",
            ResolutionStrategy::Ocr => "ocr",
        }
    }
}

/// One attempt to resolve an element through a template.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ResolutionOutcome {
    pub strategy: ResolutionStrategy,
    pub success: bool,
    /// Match confidence when the strategy produces one.
    pub confidence: Option<f32>,
    pub elapsed: Duration,
    pub at: DateTime<Utc>,
}

impl ResolutionOutcome {
    pub fn new(strategy: ResolutionStrategy, success: bool, at: DateTime<Utc>) -> Self {
        Self {
            strategy,
            success,
            confidence: None,
            elapsed: Duration::ZERO,
            at,
        }
    }

    pub fn with_confidence(mut self, confidence: f32) -> Self {
        self.confidence = Some(confidence);
        self
    }

    pub fn with_elapsed(mut self, elapsed: Duration) -> Self {
        self.elapsed = elapsed;
        self
    }
}

/// Usage frequency bucket derived from the attempt count.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Frequency {
    #[default]
    Low,
    Medium,
    High,
}

impl Frequency {
    /// `< 5` low, `< 20` medium, else high.
    pub fn from_attempts(attempts: u64) -> Self {
        match attempts {
            0..=4 => Frequency::Low,
            5..=19 => Frequency::Medium,
            _ => Frequency::High,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct UsageLedger {
    pub attempts: u64,
    pub successes: u64,
    pub failures: u64,
    pub success_rate: f64,
    pub last_used: Option<DateTime<Utc>>,
    pub frequency: Frequency,
    pub avg_latency_ms: f64,
}

impl UsageLedger {
    fn record(&mut self, outcome: &ResolutionOutcome) {
        self.attempts += 1;
        if outcome.success {
            self.successes += 1;
        } else {
            self.failures += 1;
        }
        self.success_rate = ratio(self.successes, self.attempts);
        self.last_used = Some(outcome.at);
        self.frequency = Frequency::from_attempts(self.attempts);
        let latency = outcome.elapsed.as_secs_f64() * 1000.0;
        self.avg_latency_ms = running_mean(self.avg_latency_ms, self.attempts, latency);
    }
}

/// Attempt and success counts of one strategy.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StrategyLedger {
    pub attempts: u64,
    pub successes: u64,
}

impl StrategyLedger {
    pub fn success_rate(&self) -> f64 {
        ratio(self.successes, self.attempts)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PerformanceLedger {
    pub xpath: StrategyLedger,
    pub opencv: StrategyLedger,
    pub ocr: StrategyLedger,
    /// Last [`CONFIDENCE_WINDOW`] image-match confidences, oldest first.
    pub confidence_history: Vec<f32>,
    pub avg_confidence: Option<f32>,
}

impl PerformanceLedger {
    pub fn strategy(&self, strategy: ResolutionStrategy) -> &StrategyLedger {
        match strategy {
            ResolutionStrategy::Xpath => &self.xpath,
            ResolutionStrategy::Opencv => &self.opencv,
            ResolutionStrategy::Ocr => &self.ocr,
        }
    }

    fn strategy_mut(&mut self, strategy: ResolutionStrategy) -> &mut StrategyLedger {
        match strategy {
            ResolutionStrategy::Xpath => &mut self.xpath,
            ResolutionStrategy::Opencv => &mut self.opencv,
            ResolutionStrategy::Ocr => &mut self.ocr,
        }
    }

    fn record(&mut self, outcome: &ResolutionOutcome) {
        let ledger = self.strategy_mut(outcome.strategy);
        ledger.attempts += 1;
        if outcome.success {
            ledger.successes += 1;
        }
        if outcome.strategy == ResolutionStrategy::Opencv {
            if let Some(confidence) = outcome.confidence {
                self.confidence_history.push(clamp01(confidence));
                let excess = self.confidence_history.len().saturating_sub(CONFIDENCE_WINDOW);
                self.confidence_history.drain(..excess);
                self.avg_confidence = mean(&self.confidence_history);
            }
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Warning,
    Critical,
    #[default]
    Unknown,
}

/// Why a template is not healthy.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum HealthWarning {
    LowSuccessRate { rate: f64 },
    LowConfidence { average: f32 },
    Stale { days_unused: i64 },
}

/// Thresholds used to classify health.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct HealthPolicy {
    /// Success rate at or below which a template is critical.
    pub critical_rate: f64,
    /// Success rate below which a template is a warning.
    pub warning_rate: f64,
    pub low_confidence: f32,
    /// Image-match attempts required before confidence is judged.
    pub min_confidence_attempts: u64,
    pub cleanup_age_days: u32,
    /// Staleness above which a warning is raised.
    pub stale_threshold: f32,
}

impl Default for HealthPolicy {
    fn default() -> Self {
        Self {
            critical_rate: 0.5,
            warning_rate: 0.7,
            low_confidence: 0.75,
            min_confidence_attempts: 3,
            cleanup_age_days: 30,
            stale_threshold: 0.8,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub staleness: f32,
    pub needs_recapture: bool,
    pub warnings: Vec<HealthWarning>,
    pub checked_at: Option<DateTime<Utc>>,
}

impl HealthReport {
    pub fn is_stale(&self) -> bool {
        self.warnings
            .iter()
            .any(|w| matches!(w, HealthWarning::Stale { .. }))
    }

    /// Whether any warning other than staleness was raised.
    pub fn has_quality_warning(&self) -> bool {
        self.warnings
            .iter()
            .any(|w| !matches!(w, HealthWarning::Stale { .. }))
    }
}

/// Where an element was seen.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ElementContext {
    pub screen_name: Option<String>,
    pub field_type: Option<String>,
    pub related_fields: BTreeSet<String>,
    pub test_scenarios: BTreeSet<String>,
}

impl ElementContext {
    /// Folds another observation into this one.
    pub fn merge(&mut self, other: &ElementContext) {
        if other.screen_name.is_some() {
            self.screen_name.clone_from(&other.screen_name);
        }
        if other.field_type.is_some() {
            self.field_type.clone_from(&other.field_type);
        }
        self.related_fields
            .extend(other.related_fields.iter().cloned());
        self.test_scenarios
            .extend(other.test_scenarios.iter().cloned());
    }
}

/// Sidecar document of one template.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TemplateMetadata {
    #[serde(flatten)]
    pub template: Template,
    #[serde(default)]
    pub usage: UsageLedger,
    #[serde(default)]
    pub performance: PerformanceLedger,
    #[serde(default)]
    pub health: HealthReport,
    #[serde(default)]
    pub context: ElementContext,
    #[serde(default)]
    pub tags: BTreeSet<String>,
}

impl TemplateMetadata {
    pub fn new(template: Template) -> Self {
        let source = match template.capture_source {
            CaptureSource::Manual => "manual",
            CaptureSource::Auto => "auto",
            CaptureSource::Ai => "ai",
        };
        let tags = BTreeSet::from([source.to_string()]);
        Self {
            template,
            usage: UsageLedger::default(),
            performance: PerformanceLedger::default(),
            health: HealthReport::default(),
            context: ElementContext::default(),
            tags,
        }
    }

    /// Applies one outcome to the usage and performance ledgers and reclassifies health.
    pub fn record(&mut self, outcome: &ResolutionOutcome, policy: &HealthPolicy) -> &HealthReport {
        self.usage.record(outcome);
        self.performance.record(outcome);
        self.health = self.evaluate(outcome.at, policy);
        &self.health
    }

    /// Days since the template was last used, or captured when never used.
    pub fn days_unused(&self, now: DateTime<Utc>) -> i64 {
        let since = self.usage.last_used.unwrap_or(self.template.captured_at);
        (now - since).num_days().max(0)
    }

    /// Classifies health as of `now` without mutating the ledgers.
    pub fn evaluate(&self, now: DateTime<Utc>, policy: &HealthPolicy) -> HealthReport {
        let mut warnings = Vec::new();
        let mut critical = false;

        let rate = self.usage.success_rate;
        if self.usage.attempts > 0 {
            if rate <= policy.critical_rate {
                critical = true;
                warnings.push(HealthWarning::LowSuccessRate { rate });
            } else if rate < policy.warning_rate {
                warnings.push(HealthWarning::LowSuccessRate { rate });
            }
        }

        if self.performance.opencv.attempts > policy.min_confidence_attempts {
            if let Some(average) = self.performance.avg_confidence {
                if average < policy.low_confidence {
                    warnings.push(HealthWarning::LowConfidence { average });
                }
            }
        }

        let days_unused = self.days_unused(now);
        let staleness = if policy.cleanup_age_days == 0 {
            1.0
        } else {
            clamp01(days_unused as f32 / policy.cleanup_age_days as f32)
        };
        if staleness > policy.stale_threshold {
            warnings.push(HealthWarning::Stale { days_unused });
        }

        let status = if critical {
            HealthStatus::Critical
        } else if !warnings.is_empty() {
            HealthStatus::Warning
        } else if self.usage.attempts == 0 {
            HealthStatus::Unknown
        } else {
            HealthStatus::Healthy
        };

        HealthReport {
            status,
            staleness,
            needs_recapture: critical,
            warnings,
            checked_at: Some(now),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image::Rect;
    use chrono::{Duration as Days, TimeZone};
    use image::{Rgb, RgbImage};
    use std::path::PathBuf;

    fn metadata() -> TemplateMetadata {
        let img = RgbImage::from_pixel(8, 8, Rgb([40, 40, 40]));
        let at = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        TemplateMetadata::new(Template::describe(
            PathBuf::from("t/login_auto.png"),
            &img,
            "login",
            CaptureSource::Auto,
            Rect::new(0, 0, 8, 8),
            (100, 100),
            at,
        ))
    }

    fn record_many(meta: &mut TemplateMetadata, successes: u32, failures: u32) {
        let at = meta.template.captured_at;
        let policy = HealthPolicy::default();
        for i in 0..successes + failures {
            let outcome = ResolutionOutcome::new(ResolutionStrategy::Xpath, i < successes, at);
            meta.record(&outcome, &policy);
        }
    }

    #[test]
    fn frequency_buckets() {
        assert_eq!(Frequency::from_attempts(4), Frequency::Low);
        assert_eq!(Frequency::from_attempts(5), Frequency::Medium);
        assert_eq!(Frequency::from_attempts(19), Frequency::Medium);
        assert_eq!(Frequency::from_attempts(20), Frequency::High);
    }

    #[test]
    fn confidence_history_keeps_last_ten() {
        let mut meta = metadata();
        let policy = HealthPolicy::default();
        let at = meta.template.captured_at;
        for i in 0..12 {
            let outcome = ResolutionOutcome::new(ResolutionStrategy::Opencv, true, at)
                .with_confidence(i as f32 / 20.0);
            meta.record(&outcome, &policy);
        }
        let history = &meta.performance.confidence_history;
        assert_eq!(history.len(), CONFIDENCE_WINDOW);
        assert!((history[0] - 0.1).abs() < 1e-6);
        assert!((history[9] - 0.55).abs() < 1e-6);
        let avg = meta.performance.avg_confidence.unwrap();
        assert!((avg - 0.325).abs() < 1e-5);
        assert_eq!(meta.performance.opencv.attempts, 12);
    }

    #[test]
    fn low_confidence_needs_more_than_three_image_attempts() {
        let mut meta = metadata();
        let policy = HealthPolicy::default();
        let at = meta.template.captured_at;
        for _ in 0..3 {
            let outcome = ResolutionOutcome::new(ResolutionStrategy::Opencv, true, at)
                .with_confidence(0.6);
            meta.record(&outcome, &policy);
        }
        assert_eq!(meta.health.status, HealthStatus::Healthy);
        let outcome =
            ResolutionOutcome::new(ResolutionStrategy::Opencv, true, at).with_confidence(0.6);
        meta.record(&outcome, &policy);
        assert_eq!(meta.health.status, HealthStatus::Warning);
        assert!(meta.health.has_quality_warning());
    }

    #[test]
    fn untouched_template_is_unknown() {
        let meta = metadata();
        let report = meta.evaluate(meta.template.captured_at, &HealthPolicy::default());
        assert_eq!(report.status, HealthStatus::Unknown);
        assert_eq!(report.staleness, 0.0);
    }

    #[test]
    fn staleness_saturates_at_one() {
        let mut meta = metadata();
        record_many(&mut meta, 4, 0);
        let now = meta.template.captured_at + Days::days(45);
        let report = meta.evaluate(now, &HealthPolicy::default());
        assert_eq!(report.staleness, 1.0);
        assert!(report.is_stale());
        assert!(!report.has_quality_warning());
        assert_eq!(report.status, HealthStatus::Warning);
    }

    #[test]
    fn usage_ledger_tracks_latency() {
        let mut meta = metadata();
        let policy = HealthPolicy::default();
        let at = meta.template.captured_at;
        for ms in [10, 30] {
            let outcome = ResolutionOutcome::new(ResolutionStrategy::Ocr, false, at)
                .with_elapsed(Duration::from_millis(ms));
            meta.record(&outcome, &policy);
        }
        assert_eq!(meta.usage.failures, 2);
        assert!((meta.usage.avg_latency_ms - 20.0).abs() < 1e-9);
        assert_eq!(meta.health.status, HealthStatus::Critical);
        assert!(meta.health.needs_recapture);
    }

    #[test]
    fn sidecar_reads_back_as_template() {
        let mut meta = metadata();
        record_many(&mut meta, 3, 1);
        let json = serde_json::to_string(&meta).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert!(value.get("templatePath").is_some());
        assert!(value.get("usage").is_some());
        let template: Template = serde_json::from_str(&json).unwrap();
        assert_eq!(template, meta.template);
        let back: TemplateMetadata = serde_json::from_str(&json).unwrap();
        assert_eq!(back, meta);
    }
}
