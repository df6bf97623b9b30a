//! Diagnostic artifacts for failed and successful resolution attempts.
//!
//! When enabled, every attempt can leave an annotated screenshot (best
//! region boxed in its confidence color) and is appended to `report.json`,
//! grouped by test run. Runs older than the retention window are dropped
//! whenever the report is saved.

use crate::image::annotate::annotate_region;
use crate::image::io::save_png;
use crate::image::Rect;
use crate::index::store::sanitize_name;
use crate::trace::trace_warn;
use crate::util::fs::{read_json, write_json};
use crate::util::LocateResult;
use chrono::{DateTime, Duration, Utc};
use image::RgbImage;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const REPORT_FILE: &str = "report.json";

/// One recorded attempt.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DebugAttempt {
    pub element: String,
    pub strategy: String,
    pub success: bool,
    pub confidence: Option<f32>,
    pub region: Option<Rect>,
    pub screenshot: Option<PathBuf>,
    pub scenario: Option<String>,
    pub at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DebugRun {
    pub run_id: String,
    pub started: DateTime<Utc>,
    pub attempts: Vec<DebugAttempt>,
}

/// Rolling report of recent runs.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DebugReport {
    #[serde(default)]
    pub runs: Vec<DebugRun>,
}

impl DebugReport {
    /// Reads a report, starting empty when the file is missing or unreadable.
    pub fn load(path: &Path) -> Self {
        if !path.exists() {
            return Self::default();
        }
        read_json(path).unwrap_or_else(|err| {
            trace_warn!("discarding unreadable debug report {}: {}", path.display(), err);
            Self::default()
        })
    }

    pub fn save(&self, path: &Path) -> LocateResult<()> {
        write_json(path, self)
    }

    /// Drops runs that started before `now - retention_days`.
    pub fn prune(&mut self, now: DateTime<Utc>, retention_days: u32) -> usize {
        let cutoff = now - Duration::days(retention_days as i64);
        let before = self.runs.len();
        self.runs.retain(|r| r.started >= cutoff);
        before - self.runs.len()
    }

    fn run_mut(&mut self, run_id: &str, started: DateTime<Utc>) -> &mut DebugRun {
        let pos = match self.runs.iter().position(|r| r.run_id == run_id) {
            Some(pos) => pos,
            None => {
                self.runs.push(DebugRun {
                    run_id: run_id.to_string(),
                    started,
                    attempts: Vec::new(),
                });
                self.runs.len() - 1
            }
        };
        &mut self.runs[pos]
    }
}

/// Debug settings.
#[derive(Clone, Debug, PartialEq)]
pub struct DebugOptions {
    pub enabled: bool,
    pub root: PathBuf,
    pub organize_by_scenario: bool,
    pub retention_days: u32,
}

impl Default for DebugOptions {
    fn default() -> Self {
        Self {
            enabled: false,
            root: PathBuf::from("debug"),
            organize_by_scenario: true,
            retention_days: 7,
        }
    }
}

/// What an attempt looked like, for the recorder.
#[derive(Clone, Debug)]
pub struct AttemptRecord<'a> {
    pub element: &'a str,
    pub strategy: &'a str,
    pub success: bool,
    pub confidence: Option<f32>,
    pub region: Option<Rect>,
    pub scenario: Option<&'a str>,
    pub step: u32,
}

/// Writes annotated screenshots and the run report.
pub struct DebugRecorder {
    options: DebugOptions,
    run_id: String,
    started: DateTime<Utc>,
    report: DebugReport,
}

impl DebugRecorder {
    pub fn new(options: DebugOptions, run_id: impl Into<String>, started: DateTime<Utc>) -> Self {
        let report = if options.enabled {
            DebugReport::load(&options.root.join(REPORT_FILE))
        } else {
            DebugReport::default()
        };
        Self {
            options,
            run_id: run_id.into(),
            started,
            report,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.options.enabled
    }

    pub fn report(&self) -> &DebugReport {
        &self.report
    }

    fn attempt_dir(&self, scenario: Option<&str>) -> PathBuf {
        let mut dir = self.options.root.clone();
        if self.options.organize_by_scenario {
            dir.push(sanitize_name(scenario.unwrap_or("default")));
        }
        dir.push(sanitize_name(&self.run_id));
        dir
    }

    /// Records one attempt; returns the screenshot written, if any.
    ///
    /// A no-op when debugging is disabled. Write failures are logged.
    pub fn record(
        &mut self,
        screen: Option<&RgbImage>,
        attempt: &AttemptRecord<'_>,
        at: DateTime<Utc>,
    ) -> Option<PathBuf> {
        if !self.options.enabled {
            return None;
        }
        let screenshot = match (screen, attempt.region) {
            (Some(screen), Some(region)) => {
                let file = format!(
                    "{:03}_{}_{}.png",
                    attempt.step,
                    sanitize_name(attempt.element),
                    sanitize_name(attempt.strategy)
                );
                let path = self.attempt_dir(attempt.scenario).join(file);
                let annotated = annotate_region(screen, region, attempt.confidence.unwrap_or(0.0));
                match save_png(&annotated, &path) {
                    Ok(()) => Some(path),
                    Err(err) => {
                        trace_warn!("failed to write debug screenshot: {}", err);
                        None
                    }
                }
            }
            _ => None,
        };
        let started = self.started;
        self.report
            .run_mut(&self.run_id, started)
            .attempts
            .push(DebugAttempt {
                element: attempt.element.to_string(),
                strategy: attempt.strategy.to_string(),
                success: attempt.success,
                confidence: attempt.confidence,
                region: attempt.region,
                screenshot: screenshot.clone(),
                scenario: attempt.scenario.map(str::to_string),
                at,
            });
        screenshot
    }

    /// Prunes old runs and writes `report.json`, logging failures.
    pub fn save(&mut self, now: DateTime<Utc>) {
        if !self.options.enabled {
            return;
        }
        self.report.prune(now, self.options.retention_days);
        let path = self.options.root.join(REPORT_FILE);
        if let Err(err) = self.report.save(&path) {
            trace_warn!("failed to write debug report: {}", err);
        }
    }
}
