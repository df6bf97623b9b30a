//! Usage, performance and health tracking for stored templates.

pub mod analytics;
pub mod model;
pub mod tracker;

pub use analytics::{
    bottom_performers, global_stats, recommendations, top_performers, unused_since, GlobalStats,
    Performer, Recommendation, RecommendedAction, Severity,
};
pub use model::{
    ElementContext, Frequency, HealthPolicy, HealthReport, HealthStatus, HealthWarning,
    PerformanceLedger, ResolutionOutcome, ResolutionStrategy, StrategyLedger, TemplateMetadata,
    UsageLedger,
};
pub use tracker::MetadataTracker;
