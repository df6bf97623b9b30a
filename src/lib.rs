//! uilocate resolves logical UI-element references to screen coordinates.
//!
//! When structural lookup of an element fails or is unavailable, the crate
//! falls back on a cascade of vision strategies: multi-metric raster
//! template matching, OCR-driven text localization, and a perceptual-hash
//! index of previously captured templates. Every outcome feeds a per-template
//! health ledger that decides when templates are recaptured or cleaned up.
//!
//! The pieces can be used on their own ([`ImageMatcher`], [`OcrLocator`],
//! [`VisualIndex`], [`MetadataTracker`]) or through [`Resolver`], which wires
//! them to the driver collaborators.

pub mod capture;
pub mod config;
pub mod debug;
pub mod image;
pub mod index;
pub mod lowlevel;
pub mod matcher;
pub mod metadata;
pub mod ocr;
pub mod resolve;
mod trace;
pub mod util;

pub use capture::{AutoCapture, CaptureOutcome, CapturePolicy, CaptureRequest};
pub use config::{ConfigSource, ResolverConfig};
pub use debug::{DebugRecorder, DebugReport};
pub use image::{ImageView, Point, Rect};
pub use index::{
    hamming_distance, perceptual_hash, CaptureSource, Category, IndexPolicy, PerceptualHash,
    Template, TemplateStore, VisualIndex,
};
pub use matcher::{ImageMatcher, MatchConfig, MatchOutcome, MatchResult, MatchStrategy};
pub use metadata::{
    HealthPolicy, HealthStatus, MetadataTracker, Recommendation, ResolutionOutcome,
    ResolutionStrategy, TemplateMetadata,
};
pub use ocr::{OcrLayout, OcrLocator, OcrStrategy, OcrWord, TesseractCli, TextHit, TextRecognizer};
pub use resolve::{
    Action, Capability, Collaborators, ElementHandle, ElementQuery, ElementRequest, Resolution,
    ResolutionMethod, ResolvedHandle, Resolver, ScreenSource, SessionContext, TapExecutor,
};
pub use util::{LocateError, LocateResult};
