//! Aggregate statistics and maintenance recommendations over template metadata.

use crate::metadata::model::{HealthPolicy, HealthStatus, TemplateMetadata};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Attempts a template needs before it is ranked as a performer.
pub const MIN_RANKED_ATTEMPTS: u64 = 3;

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GlobalStats {
    pub templates: usize,
    pub total_attempts: u64,
    pub total_successes: u64,
    pub overall_success_rate: f64,
    pub avg_confidence: Option<f32>,
    pub by_status: BTreeMap<String, usize>,
    pub by_strategy: BTreeMap<String, u64>,
}

/// A template ranked by success rate.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Performer {
    pub path: PathBuf,
    pub element_name: String,
    pub attempts: u64,
    pub success_rate: f64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Critical,
    Warning,
    Info,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum RecommendedAction {
    Recapture,
    ConsiderRecapture,
    Cleanup,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Recommendation {
    pub severity: Severity,
    pub action: RecommendedAction,
    pub path: PathBuf,
    pub element_name: String,
    pub reason: String,
}

fn status_name(status: HealthStatus) -> &'static str {
    match status {
        HealthStatus::Healthy => "healthy",
        HealthStatus::Warning => "warning",
        HealthStatus::Critical => "critical",
        HealthStatus::Unknown => "unknown",
    }
}

/// Totals across every template, with health evaluated as of `now`.
pub fn global_stats<'a, I>(items: I, policy: &HealthPolicy, now: DateTime<Utc>) -> GlobalStats
where
    I: IntoIterator<Item = &'a TemplateMetadata>,
{
    let mut stats = GlobalStats::default();
    let mut conf_sum = 0.0f64;
    let mut conf_n = 0usize;
    for meta in items {
        stats.templates += 1;
        stats.total_attempts += meta.usage.attempts;
        stats.total_successes += meta.usage.successes;
        let status = meta.evaluate(now, policy).status;
        *stats
            .by_status
            .entry(status_name(status).to_string())
            .or_insert(0) += 1;
        for (name, ledger) in [
            ("xpath", &meta.performance.xpath),
            ("opencv", &meta.performance.opencv),
            ("ocr", &meta.performance.ocr),
        ] {
            *stats.by_strategy.entry(name.to_string()).or_insert(0) += ledger.attempts;
        }
        if let Some(avg) = meta.performance.avg_confidence {
            conf_sum += avg as f64;
            conf_n += 1;
        }
    }
    stats.overall_success_rate = crate::util::math::ratio(stats.total_successes, stats.total_attempts);
    stats.avg_confidence = (conf_n > 0).then(|| (conf_sum / conf_n as f64) as f32);
    stats
}

fn ranked<'a, I>(items: I) -> Vec<Performer>
where
    I: IntoIterator<Item = &'a TemplateMetadata>,
{
    items
        .into_iter()
        .filter(|m| m.usage.attempts > MIN_RANKED_ATTEMPTS)
        .map(|m| Performer {
            path: m.template.path.clone(),
            element_name: m.template.element_name.clone(),
            attempts: m.usage.attempts,
            success_rate: m.usage.success_rate,
        })
        .collect()
}

/// Best `n` templates by success rate; more attempts break ties.
pub fn top_performers<'a, I>(items: I, n: usize) -> Vec<Performer>
where
    I: IntoIterator<Item = &'a TemplateMetadata>,
{
    let mut all = ranked(items);
    all.sort_by(|a, b| {
        b.success_rate
            .partial_cmp(&a.success_rate)
            .unwrap_or(Ordering::Equal)
            .then_with(|| b.attempts.cmp(&a.attempts))
            .then_with(|| a.path.cmp(&b.path))
    });
    all.truncate(n);
    all
}

/// Worst `n` templates by success rate; more attempts rank first on ties.
pub fn bottom_performers<'a, I>(items: I, n: usize) -> Vec<Performer>
where
    I: IntoIterator<Item = &'a TemplateMetadata>,
{
    let mut all = ranked(items);
    all.sort_by(|a, b| {
        a.success_rate
            .partial_cmp(&b.success_rate)
            .unwrap_or(Ordering::Equal)
            .then_with(|| b.attempts.cmp(&a.attempts))
            .then_with(|| a.path.cmp(&b.path))
    });
    all.truncate(n);
    all
}

/// Templates not used (or, if never used, not captured) for at least `days`.
pub fn unused_since<'a, I>(items: I, days: i64, now: DateTime<Utc>) -> Vec<&'a TemplateMetadata>
where
    I: IntoIterator<Item = &'a TemplateMetadata>,
{
    let mut out: Vec<&TemplateMetadata> = items
        .into_iter()
        .filter(|m| m.days_unused(now) >= days)
        .collect();
    out.sort_by(|a, b| b.days_unused(now).cmp(&a.days_unused(now)));
    out
}

/// At most one recommendation per template, most severe first.
///
/// Critical health asks for a recapture, quality warnings suggest one, and
/// staleness alone suggests cleanup.
pub fn recommendations<'a, I>(
    items: I,
    policy: &HealthPolicy,
    now: DateTime<Utc>,
) -> Vec<Recommendation>
where
    I: IntoIterator<Item = &'a TemplateMetadata>,
{
    let mut out = Vec::new();
    for meta in items {
        let health = meta.evaluate(now, policy);
        let (severity, action, reason) = if health.status == HealthStatus::Critical {
            (
                Severity::Critical,
                RecommendedAction::Recapture,
                format!("success rate {:.2}", meta.usage.success_rate),
            )
        } else if health.has_quality_warning() {
            (
                Severity::Warning,
                RecommendedAction::ConsiderRecapture,
                format!(
                    "success rate {:.2}, average confidence {}",
                    meta.usage.success_rate,
                    meta.performance
                        .avg_confidence
                        .map_or("n/a".to_string(), |c| format!("{c:.2}"))
                ),
            )
        } else if health.is_stale() {
            (
                Severity::Info,
                RecommendedAction::Cleanup,
                format!("unused for {} days", meta.days_unused(now)),
            )
        } else {
            continue;
        };
        out.push(Recommendation {
            severity,
            action,
            path: meta.template.path.clone(),
            element_name: meta.template.element_name.clone(),
            reason,
        });
    }
    out.sort_by(|a, b| a.severity.cmp(&b.severity).then_with(|| a.path.cmp(&b.path)));
    out
}
