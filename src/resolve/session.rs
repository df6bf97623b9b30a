//! Per-session mutable state passed explicitly through the resolver.

use crate::metadata::ElementContext;
use chrono::{DateTime, Utc};
use std::collections::HashMap;

const DEFAULT_SCENARIO: &str = "default";

/// State of one test session.
///
/// Owns the counters that must not leak between sessions running side by
/// side: debug step numbers per scenario and capture counts per element.
#[derive(Clone, Debug)]
pub struct SessionContext {
    run_id: String,
    scenario: Option<String>,
    started: DateTime<Utc>,
    steps: HashMap<String, u32>,
    captures: HashMap<String, u32>,
}

impl SessionContext {
    pub fn new(run_id: impl Into<String>, started: DateTime<Utc>) -> Self {
        Self {
            run_id: run_id.into(),
            scenario: None,
            started,
            steps: HashMap::new(),
            captures: HashMap::new(),
        }
    }

    /// Run id derived from the start time, `run_<YYYYmmdd_HHMMSS>`.
    pub fn started_now() -> Self {
        let now = Utc::now();
        Self::new(format!("run_{}", now.format("%Y%m%d_%H%M%S")), now)
    }

    pub fn with_scenario(mut self, scenario: impl Into<String>) -> Self {
        self.scenario = Some(scenario.into());
        self
    }

    pub fn set_scenario(&mut self, scenario: Option<String>) {
        self.scenario = scenario;
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn scenario(&self) -> Option<&str> {
        self.scenario.as_deref()
    }

    pub fn started(&self) -> DateTime<Utc> {
        self.started
    }

    /// Next step number of the current scenario, starting at 1.
    pub fn next_step(&mut self) -> u32 {
        let key = self.scenario.as_deref().unwrap_or(DEFAULT_SCENARIO);
        let step = self.steps.entry(key.to_string()).or_insert(0);
        *step += 1;
        *step
    }

    /// Counts a stored capture of `element`; returns the session total.
    pub fn note_capture(&mut self, element: &str) -> u32 {
        let count = self.captures.entry(element.to_lowercase()).or_insert(0);
        *count += 1;
        *count
    }

    pub fn captures_of(&self, element: &str) -> u32 {
        self.captures
            .get(&element.to_lowercase())
            .copied()
            .unwrap_or(0)
    }

    /// Context recorded in template metadata for an element seen in this session.
    pub fn element_context(
        &self,
        screen_name: Option<&str>,
        field_type: Option<&str>,
    ) -> ElementContext {
        let mut ctx = ElementContext {
            screen_name: screen_name.map(str::to_string),
            field_type: field_type.map(str::to_string),
            ..ElementContext::default()
        };
        if let Some(scenario) = &self.scenario {
            ctx.test_scenarios.insert(scenario.clone());
        }
        ctx
    }
}
