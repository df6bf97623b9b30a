//! Text localization on top of a word-box recognizer.
//!
//! A [`TextRecognizer`] turns a screen into positioned words; the
//! [`OcrLocator`] runs its strategies over those words (and the raw pixels)
//! to turn a label text into the point of the input field it names.
//! Recognition runs once per lookup so every strategy sees the same words.

use crate::image::{Point, Rect};
use crate::trace::{trace_debug, trace_event, trace_span};
use crate::util::{LocateError, LocateResult};
use image::RgbImage;
use serde::{Deserialize, Serialize};

pub mod layout;
pub mod strategies;
pub mod tesseract;

pub use layout::OcrLayout;
pub use tesseract::TesseractCli;

/// One recognized word and its bounding box.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OcrWord {
    pub text: String,
    pub bounds: Rect,
    /// Recognizer confidence in `[0, 100]`.
    pub confidence: f32,
    /// `(block, paragraph, line)` when the recognizer reports layout.
    pub line: Option<(u32, u32, u32)>,
}

impl OcrWord {
    pub fn new(text: impl Into<String>, bounds: Rect) -> Self {
        Self {
            text: text.into(),
            bounds,
            confidence: 100.0,
            line: None,
        }
    }

    pub fn with_line(mut self, line: (u32, u32, u32)) -> Self {
        self.line = Some(line);
        self
    }
}

/// Produces positioned words from a screen raster.
pub trait TextRecognizer {
    fn recognize(&self, screen: &RgbImage) -> LocateResult<Vec<OcrWord>>;
}

impl<T: TextRecognizer + ?Sized> TextRecognizer for &T {
    fn recognize(&self, screen: &RgbImage) -> LocateResult<Vec<OcrWord>> {
        (**self).recognize(screen)
    }
}

impl<T: TextRecognizer + ?Sized> TextRecognizer for Box<T> {
    fn recognize(&self, screen: &RgbImage) -> LocateResult<Vec<OcrWord>> {
        (**self).recognize(screen)
    }
}

/// OCR strategy that produced a hit, in the order they are tried.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum OcrStrategy {
    TwoPass,
    ColorRegion,
    SmartOffset,
    Fallback,
}

impl OcrStrategy {
    pub const CASCADE: [OcrStrategy; 4] = [
        OcrStrategy::TwoPass,
        OcrStrategy::ColorRegion,
        OcrStrategy::SmartOffset,
        OcrStrategy::Fallback,
    ];

    pub fn name(self) -> &'static str {
        match self {
            OcrStrategy::TwoPass => "ocr_two_pass",
            OcrStrategy::ColorRegion => "ocr_color_region",
            OcrStrategy::SmartOffset => "ocr_smart_offset",
            OcrStrategy::Fallback => "ocr_fallback",
        }
    }
}

/// A located click target.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct TextHit {
    pub point: Point,
    pub strategy: OcrStrategy,
    /// Bounds of the matched label, when one was found.
    pub label: Option<Rect>,
}

/// Runs the OCR strategies over one recognizer.
pub struct OcrLocator<R> {
    recognizer: R,
    layout: OcrLayout,
    scale_to_screen: bool,
}

impl<R: TextRecognizer> OcrLocator<R> {
    pub fn new(recognizer: R) -> Self {
        Self {
            recognizer,
            layout: OcrLayout::default(),
            scale_to_screen: false,
        }
    }

    pub fn with_layout(mut self, layout: OcrLayout) -> Self {
        self.layout = layout;
        self
    }

    /// Rescale the layout to each screen's height before searching.
    pub fn scale_to_screen(mut self, enabled: bool) -> Self {
        self.scale_to_screen = enabled;
        self
    }

    pub fn layout(&self) -> &OcrLayout {
        &self.layout
    }

    pub fn recognizer(&self) -> &R {
        &self.recognizer
    }

    /// Locates the field named by `search_text`, first strategy that succeeds wins.
    ///
    /// `Ok(None)` means every strategy missed; recognizer failures are errors.
    pub fn find_text(&self, screen: &RgbImage, search_text: &str) -> LocateResult<Option<TextHit>> {
        let _span = trace_span!("ocr_find_text", text = search_text).entered();
        let words = self.recognizer.recognize(screen)?;
        let layout = if self.scale_to_screen {
            self.layout.scaled_for(screen.height())
        } else {
            self.layout.clone()
        };
        let hit = locate(screen, &words, search_text, &layout);
        match &hit {
            Some(hit) => {
                trace_event!(
                    "ocr_hit",
                    strategy = hit.strategy.name(),
                    x = hit.point.x,
                    y = hit.point.y
                );
            }
            None => {
                trace_debug!("no OCR strategy found {:?}", search_text);
            }
        }
        Ok(hit)
    }

    /// Like [`find_text`](Self::find_text), but a miss is `TextNotFound`.
    pub fn require_text(&self, screen: &RgbImage, search_text: &str) -> LocateResult<TextHit> {
        self.find_text(screen, search_text)?
            .ok_or_else(|| LocateError::TextNotFound {
                text: search_text.to_string(),
            })
    }

    /// Runs one strategy alone.
    pub fn run_strategy(
        &self,
        strategy: OcrStrategy,
        screen: &RgbImage,
        search_text: &str,
    ) -> LocateResult<Option<TextHit>> {
        let words = self.recognizer.recognize(screen)?;
        Ok(strategies::run(strategy, screen, &words, search_text, &self.layout))
    }

    /// Whether `text` appears anywhere in the recognized screen text.
    pub fn contains_text(&self, screen: &RgbImage, text: &str) -> LocateResult<bool> {
        let words = self.recognizer.recognize(screen)?;
        Ok(strategies::full_text(&words).contains(&text.trim().to_lowercase()))
    }
}

/// Tries every strategy in cascade order over already-recognized words.
pub fn locate(
    screen: &RgbImage,
    words: &[OcrWord],
    search_text: &str,
    layout: &OcrLayout,
) -> Option<TextHit> {
    if search_text.trim().is_empty() {
        return None;
    }
    OcrStrategy::CASCADE
        .into_iter()
        .find_map(|s| strategies::run(s, screen, words, search_text, layout))
}
