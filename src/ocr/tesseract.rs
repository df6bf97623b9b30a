//! [`TextRecognizer`] backed by the `tesseract` command line tool.
//!
//! The screen is piped as PNG to `tesseract stdin stdout tsv` and the
//! word rows (level 5) of the TSV output become [`OcrWord`]s.

use crate::image::io::encode_png;
use crate::image::Rect;
use crate::ocr::{OcrWord, TextRecognizer};
use crate::trace::trace_debug;
use crate::util::{LocateError, LocateResult};
use image::RgbImage;
use std::io::Write;
use std::path::PathBuf;
use std::process::{Command, Stdio};

const WORD_LEVEL: u32 = 5;

#[derive(Clone, Debug)]
pub struct TesseractCli {
    binary: PathBuf,
    language: Option<String>,
    page_segmentation: Option<u8>,
}

impl Default for TesseractCli {
    fn default() -> Self {
        Self {
            binary: PathBuf::from("tesseract"),
            language: None,
            page_segmentation: None,
        }
    }
}

impl TesseractCli {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
            ..Self::default()
        }
    }

    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = Some(language.into());
        self
    }

    pub fn with_page_segmentation(mut self, psm: u8) -> Self {
        self.page_segmentation = Some(psm);
        self
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.binary);
        cmd.arg("stdin").arg("stdout");
        if let Some(lang) = &self.language {
            cmd.arg("-l").arg(lang);
        }
        if let Some(psm) = self.page_segmentation {
            cmd.arg("--psm").arg(psm.to_string());
        }
        cmd.arg("tsv");
        cmd
    }
}

impl TextRecognizer for TesseractCli {
    fn recognize(&self, screen: &RgbImage) -> LocateResult<Vec<OcrWord>> {
        let png = encode_png(screen)?;
        let ocr_err = |reason: String| LocateError::Ocr { reason };

        let mut child = self
            .command()
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|err| ocr_err(format!("failed to start {}: {err}", self.binary.display())))?;
        {
            let mut stdin = child
                .stdin
                .take()
                .ok_or_else(|| ocr_err("tesseract stdin unavailable".into()))?;
            stdin
                .write_all(&png)
                .map_err(|err| ocr_err(format!("failed to write image: {err}")))?;
        }
        let output = child
            .wait_with_output()
            .map_err(|err| ocr_err(format!("tesseract did not finish: {err}")))?;
        if !output.status.success() {
            return Err(ocr_err(format!(
                "tesseract exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        let words = parse_tsv(&String::from_utf8_lossy(&output.stdout));
        trace_debug!("tesseract recognized {} words", words.len());
        Ok(words)
    }
}

/// Parses tesseract TSV output into word boxes.
///
/// Columns: `level page block par line word left top width height conf text`.
/// Header, non-word and empty rows are skipped.
pub fn parse_tsv(tsv: &str) -> Vec<OcrWord> {
    tsv.lines()
        .filter_map(|line| {
            let cols: Vec<&str> = line.split('\t').collect();
            if cols.len() < 12 {
                return None;
            }
            let num = |i: usize| cols[i].trim().parse::<i64>().ok();
            if num(0)? as u32 != WORD_LEVEL {
                return None;
            }
            let text = cols[11..].join("\t").trim().to_string();
            let confidence: f32 = cols[10].trim().parse().ok()?;
            if text.is_empty() || confidence < 0.0 {
                return None;
            }
            let bounds = Rect::new(
                num(6)? as i32,
                num(7)? as i32,
                num(8)?.max(0) as u32,
                num(9)?.max(0) as u32,
            );
            Some(OcrWord {
                text,
                bounds,
                confidence,
                line: Some((num(2)? as u32, num(3)? as u32, num(4)? as u32)),
            })
        })
        .collect()
}
