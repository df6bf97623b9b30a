//! Multi-strategy raster template matching.
//!
//! Screen and template are preprocessed identically (grayscale + 3x3
//! Gaussian blur), then three metrics are tried in a fixed order and the first
//! one whose globally best placement clears its threshold wins:
//!
//! 1. normalized correlation coefficient at `threshold`,
//! 2. normalized cross-correlation at `threshold * 0.9`,
//! 3. normalized squared difference at a fixed `0.2` (lower is better).

use crate::image::io::view_from_gray;
use crate::image::preprocess::prepare;
use crate::image::{Point, Rect};
use crate::trace::{trace_event, trace_span};
use crate::util::math::clamp01;
use crate::util::{LocateError, LocateResult};
use image::{GrayImage, RgbImage};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::{Duration, Instant};

pub(crate) mod integral;
pub mod kernel;
pub mod peak;
pub mod plan;

use kernel::{scan_best, CcoeffNormed, CcorrNormed, SqdiffNormed};
use plan::TemplatePlan;

/// One matching metric of the cascade.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchStrategy {
    CcoeffNormed,
    CcorrNormed,
    SqdiffNormed,
}

impl MatchStrategy {
    /// Cascade order.
    pub const CASCADE: [MatchStrategy; 3] = [
        MatchStrategy::CcoeffNormed,
        MatchStrategy::CcorrNormed,
        MatchStrategy::SqdiffNormed,
    ];

    pub fn name(self) -> &'static str {
        match self {
            MatchStrategy::CcoeffNormed => "ccoeff_normed",
            MatchStrategy::CcorrNormed => "ccorr_normed",
            MatchStrategy::SqdiffNormed => "sqdiff_normed",
        }
    }

    pub fn lower_is_better(self) -> bool {
        matches!(self, MatchStrategy::SqdiffNormed)
    }

    /// Maps a raw score onto a higher-is-better confidence in `[0, 1]`.
    pub fn confidence(self, score: f32) -> f32 {
        if self.lower_is_better() {
            clamp01(1.0 - score)
        } else {
            clamp01(score)
        }
    }

    fn accepts(self, score: f32, threshold: f32) -> bool {
        if self.lower_is_better() {
            score <= threshold
        } else {
            score >= threshold
        }
    }
}

/// Thresholds for the matching cascade.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchConfig {
    /// Acceptance threshold of the correlation-coefficient strategy.
    pub threshold: f32,
    /// Multiplier applied to `threshold` for the cross-correlation strategy.
    pub ccorr_factor: f32,
    /// Maximum accepted normalized squared difference.
    pub sqdiff_threshold: f32,
}

impl Default for MatchConfig {
    fn default() -> Self {
        Self {
            threshold: 0.8,
            ccorr_factor: 0.9,
            sqdiff_threshold: 0.2,
        }
    }
}

impl MatchConfig {
    /// Threshold a strategy's best score is compared against.
    pub fn threshold_for(&self, strategy: MatchStrategy) -> f32 {
        match strategy {
            MatchStrategy::CcoeffNormed => self.threshold,
            MatchStrategy::CcorrNormed => self.threshold * self.ccorr_factor,
            MatchStrategy::SqdiffNormed => self.sqdiff_threshold,
        }
    }
}

/// A successful match.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct MatchResult {
    /// Click target: center of the matched template-sized box.
    pub center: Point,
    /// Top-left corner of the matched box.
    pub top_left: Point,
    /// Higher-is-better confidence in `[0, 1]`.
    pub confidence: f32,
    pub strategy: MatchStrategy,
}

/// Best placement reported by one strategy, accepted or not.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct StrategyAttempt {
    pub strategy: MatchStrategy,
    pub top_left: Point,
    /// Raw metric value.
    pub score: f32,
    pub threshold: f32,
    pub accepted: bool,
}

impl StrategyAttempt {
    pub fn confidence(&self) -> f32 {
        self.strategy.confidence(self.score)
    }
}

/// Everything one cascade run produced.
#[derive(Clone, Debug, PartialEq)]
pub struct MatchOutcome {
    pub result: Option<MatchResult>,
    /// Strategies in the order they ran; stops after the first accepted one.
    pub attempts: Vec<StrategyAttempt>,
    pub template_width: u32,
    pub template_height: u32,
    pub elapsed: Duration,
}

impl MatchOutcome {
    pub fn is_match(&self) -> bool {
        self.result.is_some()
    }

    /// The highest-confidence placement across all attempts.
    pub fn best_attempt(&self) -> Option<&StrategyAttempt> {
        self.attempts
            .iter()
            .fold(None, |best: Option<&StrategyAttempt>, a| match best {
                Some(b) if b.confidence() >= a.confidence() => Some(b),
                _ => Some(a),
            })
    }

    /// Confidence of the result, or of the best failed attempt.
    pub fn confidence(&self) -> f32 {
        match &self.result {
            Some(r) => r.confidence,
            None => self.best_attempt().map_or(0.0, StrategyAttempt::confidence),
        }
    }

    /// The accepted result, or `MatchNotFound` naming `template` on a miss.
    pub fn require(&self, template: impl Into<PathBuf>) -> LocateResult<MatchResult> {
        self.result.ok_or_else(|| LocateError::MatchNotFound {
            template: template.into(),
            best_confidence: self.confidence(),
        })
    }

    /// Template-sized box at the best attempt, for diagnostics.
    pub fn best_region(&self) -> Option<Rect> {
        self.best_attempt().map(|a| {
            Rect::new(
                a.top_left.x,
                a.top_left.y,
                self.template_width,
                self.template_height,
            )
        })
    }
}

/// Template matcher running the fixed strategy cascade.
#[derive(Clone, Debug, Default)]
pub struct ImageMatcher {
    config: MatchConfig,
}

impl ImageMatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(mut self, config: MatchConfig) -> Self {
        self.config = config;
        self
    }

    /// Overrides only the primary threshold.
    pub fn with_threshold(mut self, threshold: f32) -> Self {
        self.config.threshold = threshold;
        self
    }

    pub fn config(&self) -> &MatchConfig {
        &self.config
    }

    /// Runs the cascade of `template` against `screen`.
    pub fn find(&self, screen: &RgbImage, template: &RgbImage) -> LocateResult<MatchOutcome> {
        let start = Instant::now();
        let _span = trace_span!(
            "image_match",
            screen_w = screen.width(),
            template_w = template.width()
        )
        .entered();

        let screen_gray = prepare(screen);
        let template_gray = prepare(template);
        let plan = TemplatePlan::from_view(view_from_gray(&template_gray)?)?;

        let mut attempts = Vec::with_capacity(MatchStrategy::CASCADE.len());
        let mut result = None;
        for strategy in MatchStrategy::CASCADE {
            let Some(attempt) = self.attempt(strategy, &screen_gray, &plan)? else {
                continue;
            };
            attempts.push(attempt);
            if attempt.accepted {
                result = Some(to_result(&attempt, &plan));
                break;
            }
        }

        let outcome = MatchOutcome {
            result,
            attempts,
            template_width: template.width(),
            template_height: template.height(),
            elapsed: start.elapsed(),
        };
        trace_event!(
            "image_match_done",
            matched = outcome.is_match(),
            confidence = outcome.confidence(),
            attempts = outcome.attempts.len()
        );
        Ok(outcome)
    }

    /// Runs a single strategy outside the cascade.
    pub fn run_strategy(
        &self,
        strategy: MatchStrategy,
        screen: &RgbImage,
        template: &RgbImage,
    ) -> LocateResult<Option<MatchResult>> {
        let screen_gray = prepare(screen);
        let template_gray = prepare(template);
        let plan = TemplatePlan::from_view(view_from_gray(&template_gray)?)?;
        Ok(self
            .attempt(strategy, &screen_gray, &plan)?
            .filter(|a| a.accepted)
            .map(|a| to_result(&a, &plan)))
    }

    fn attempt(
        &self,
        strategy: MatchStrategy,
        screen_gray: &GrayImage,
        plan: &TemplatePlan,
    ) -> LocateResult<Option<StrategyAttempt>> {
        let view = view_from_gray(screen_gray)?;
        let peak = match strategy {
            MatchStrategy::CcoeffNormed => scan_best::<CcoeffNormed>(view, plan)?,
            MatchStrategy::CcorrNormed => scan_best::<CcorrNormed>(view, plan)?,
            MatchStrategy::SqdiffNormed => scan_best::<SqdiffNormed>(view, plan)?,
        };
        let threshold = self.config.threshold_for(strategy);
        Ok(peak.map(|p| StrategyAttempt {
            strategy,
            top_left: Point::new(p.x as i32, p.y as i32),
            score: p.score,
            threshold,
            accepted: strategy.accepts(p.score, threshold),
        }))
    }
}

fn to_result(attempt: &StrategyAttempt, plan: &TemplatePlan) -> MatchResult {
    let top_left = attempt.top_left;
    MatchResult {
        center: Point::new(
            top_left.x + (plan.width() / 2) as i32,
            top_left.y + (plan.height() / 2) as i32,
        ),
        top_left,
        confidence: attempt.confidence(),
        strategy: attempt.strategy,
    }
}
