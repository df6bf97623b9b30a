//! The four OCR strategies over a fixed set of recognized words.

use crate::image::{Point, Rect};
use crate::ocr::{OcrLayout, OcrStrategy, OcrWord, TextHit};
use image::{Rgb, RgbImage};
use std::collections::BTreeMap;

/// A label found on screen: its bounds and the words it is made of.
#[derive(Clone, Debug, PartialEq)]
pub struct Label {
    pub bounds: Rect,
    pub members: Vec<usize>,
}

impl Label {
    fn contains(&self, idx: usize) -> bool {
        self.members.contains(&idx)
    }
}

/// Runs a single strategy.
pub fn run(
    strategy: OcrStrategy,
    screen: &RgbImage,
    words: &[OcrWord],
    search_text: &str,
    layout: &OcrLayout,
) -> Option<TextHit> {
    let needle = normalize(search_text);
    if needle.is_empty() {
        return None;
    }
    if strategy == OcrStrategy::Fallback {
        return fallback(screen, words, &needle);
    }
    let label = find_label(words, &needle)?;
    let point = match strategy {
        OcrStrategy::TwoPass => two_pass(words, &label, layout),
        OcrStrategy::ColorRegion => color_region(screen, &label, layout),
        OcrStrategy::SmartOffset => Some(smart_offset(words, &label, &needle, layout)),
        OcrStrategy::Fallback => None,
    }?;
    Some(TextHit {
        point,
        strategy,
        label: Some(label.bounds),
    })
}

fn normalize(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Word indices in reading order (top to bottom, then left to right).
fn reading_order(words: &[OcrWord]) -> Vec<usize> {
    let mut order: Vec<usize> = (0..words.len()).collect();
    order.sort_by_key(|&i| (words[i].bounds.y, words[i].bounds.x, i));
    order
}

/// Groups words into text lines, each sorted left to right.
///
/// Recognizer line keys are used when present; other words join the first
/// line whose leading word vertically covers their center.
pub fn lines(words: &[OcrWord]) -> Vec<Vec<usize>> {
    let mut keyed: BTreeMap<(u32, u32, u32), Vec<usize>> = BTreeMap::new();
    let mut loose: Vec<Vec<usize>> = Vec::new();
    for i in reading_order(words) {
        let word = &words[i];
        if let Some(key) = word.line {
            keyed.entry(key).or_default().push(i);
            continue;
        }
        let cy = word.bounds.center_y();
        let slot = loose.iter_mut().find(|line| {
            let lead = &words[line[0]].bounds;
            cy >= lead.y && cy < lead.bottom()
        });
        match slot {
            Some(line) => line.push(i),
            None => loose.push(vec![i]),
        }
    }
    let mut out: Vec<Vec<usize>> = keyed.into_values().chain(loose).collect();
    for line in &mut out {
        line.sort_by_key(|&i| (words[i].bounds.x, i));
    }
    out.sort_by_key(|line| {
        let first = &words[line[0]].bounds;
        (first.y, first.x)
    });
    out
}

/// Lowercased screen text, one line per row of words.
pub fn full_text(words: &[OcrWord]) -> String {
    lines(words)
        .iter()
        .map(|line| {
            line.iter()
                .map(|&i| normalize(&words[i].text))
                .collect::<Vec<_>>()
                .join(" ")
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// First word, or shortest run of words on one line, containing `needle`.
pub fn find_label(words: &[OcrWord], needle: &str) -> Option<Label> {
    for i in reading_order(words) {
        if normalize(&words[i].text).contains(needle) {
            return Some(Label {
                bounds: words[i].bounds,
                members: vec![i],
            });
        }
    }
    for line in lines(words) {
        for start in 0..line.len() {
            let mut joined = String::new();
            for end in start..line.len() {
                if !joined.is_empty() {
                    joined.push(' ');
                }
                joined.push_str(&normalize(&words[line[end]].text));
                if joined.contains(needle) {
                    let members = line[start..=end].to_vec();
                    let bounds = members
                        .iter()
                        .map(|&i| words[i].bounds)
                        .reduce(|a, b| a.union(&b))?;
                    return Some(Label { bounds, members });
                }
            }
        }
    }
    None
}

/// Words below the label, inside the search band and horizontally aligned.
fn below_label<'a>(
    words: &'a [OcrWord],
    label: &'a Label,
    layout: &'a OcrLayout,
) -> impl Iterator<Item = &'a OcrWord> + 'a {
    let top = label.bounds.bottom();
    let band_end = top + layout.search_band as i32;
    let cx = label.bounds.center_x();
    words.iter().enumerate().filter_map(move |(i, w)| {
        let aligned = (w.bounds.center_x() - cx).unsigned_abs() <= layout.align_tolerance;
        let inside = w.bounds.y >= top && w.bounds.y <= band_end;
        (!label.contains(i) && aligned && inside).then_some(w)
    })
}

/// Nearest hint-like word below the label; clicks just under its top edge.
pub fn two_pass(words: &[OcrWord], label: &Label, layout: &OcrLayout) -> Option<Point> {
    let cx = label.bounds.center_x();
    let hint = below_label(words, label, layout)
        .filter(|w| layout.is_hint(&w.text))
        .min_by_key(|w| {
            (
                w.bounds.y,
                (w.bounds.center_x() - cx).unsigned_abs(),
                w.bounds.x,
            )
        })?;
    Some(Point::new(
        hint.bounds.center_x(),
        hint.bounds.y + layout.hint_offset as i32,
    ))
}

fn manhattan(a: Rgb<u8>, b: Rgb<u8>) -> u32 {
    a.0.iter()
        .zip(b.0.iter())
        .map(|(&x, &y)| (x as i32 - y as i32).unsigned_abs())
        .sum()
}

/// Most common color on the label box's border.
fn background_of(screen: &RgbImage, bounds: Rect) -> Option<Rgb<u8>> {
    let b = bounds.clamp_to(screen.width(), screen.height())?;
    let (x0, y0) = (b.x as u32, b.y as u32);
    let (x1, y1) = (x0 + b.width - 1, y0 + b.height - 1);
    let mut counts: BTreeMap<[u8; 3], u32> = BTreeMap::new();
    let mut add = |x: u32, y: u32| {
        *counts.entry(screen.get_pixel(x, y).0).or_insert(0) += 1;
    };
    for x in x0..=x1 {
        add(x, y0);
        add(x, y1);
    }
    for y in y0..=y1 {
        add(x0, y);
        add(x1, y);
    }
    counts
        .into_iter()
        .max_by(|a, b| a.1.cmp(&b.1).then_with(|| b.0.cmp(&a.0)))
        .map(|(c, _)| Rgb(c))
}

/// Extent of pixels below the label that differ from its background.
pub fn color_region(screen: &RgbImage, label: &Label, layout: &OcrLayout) -> Option<Point> {
    let bg = background_of(screen, label.bounds)?;
    let (w, h) = (screen.width() as i32, screen.height() as i32);
    let cx = label.bounds.center_x();
    let tol = layout.align_tolerance as i32;
    let x0 = (cx - tol).max(0);
    let x1 = (cx + tol + 1).min(w);
    let y0 = label.bounds.bottom().max(0);
    let y1 = (label.bounds.bottom() + layout.search_band as i32).min(h);
    if x0 >= x1 || y0 >= y1 {
        return None;
    }

    let mut extent: Option<(i32, i32, i32, i32)> = None;
    for y in y0..y1 {
        for x in x0..x1 {
            let px = *screen.get_pixel(x as u32, y as u32);
            if manhattan(px, bg) <= layout.color_distance {
                continue;
            }
            extent = Some(match extent {
                None => (x, y, x, y),
                Some((ax, ay, bx, by)) => (ax.min(x), ay.min(y), bx.max(x), by.max(y)),
            });
        }
    }
    let (min_x, min_y, max_x, max_y) = extent?;
    let height = max_y - min_y + 1;
    let ratio = if height > layout.tall_region_height as i32 {
        layout.tall_region_ratio
    } else {
        layout.normal_region_ratio
    };
    Some(Point::new(
        (min_x + max_x + 1) / 2,
        min_y + (height as f32 * ratio) as i32,
    ))
}

/// Clicks a fixed fraction into a field whose height is estimated from the label.
pub fn smart_offset(words: &[OcrWord], label: &Label, needle: &str, layout: &OcrLayout) -> Point {
    let mut height = layout.field_height_for(needle) as i32;
    let next_label = below_label(words, label, layout)
        .filter(|w| !layout.is_hint(&w.text))
        .map(|w| w.bounds.y - label.bounds.bottom())
        .filter(|&gap| gap > 0)
        .min();
    if let Some(gap) = next_label {
        height = height.min(gap);
    }
    let ratio = if height > layout.tall_field_threshold as i32 {
        layout.tall_field_ratio
    } else {
        layout.normal_field_ratio
    };
    Point::new(
        label.bounds.center_x(),
        label.bounds.bottom() + (height as f32 * ratio) as i32,
    )
}

/// Screen center when the text appears anywhere in the recognized text.
pub fn fallback(screen: &RgbImage, words: &[OcrWord], needle: &str) -> Option<TextHit> {
    let text = full_text(words).replace('\n', " ");
    text.contains(needle).then(|| TextHit {
        point: Point::new(screen.width() as i32 / 2, screen.height() as i32 / 2),
        strategy: OcrStrategy::Fallback,
        label: None,
    })
}
