use std::collections::BTreeMap;
use std::str::FromStr;

use anyhow::anyhow;

use crate::ocr::{BBoxPx, LineKey, RecognizedWord};

/// How words are assembled into visual rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Grouping {
    /// Native engine keys when every word carries one, geometry otherwise.
    #[default]
    Auto,
    Native,
    Geometric,
}

impl FromStr for Grouping {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "native" => Ok(Self::Native),
            "geometric" | "geometry" => Ok(Self::Geometric),
            other => Err(anyhow!("unknown grouping: {}", other)),
        }
    }
}

/// Maximum vertical-centre deviation for a word to join an anchor's row.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LineTolerance {
    /// Fraction of the taller of the two words.
    Relative(f32),
    /// Absolute pixels regardless of text size.
    Fixed(f32),
}

impl Default for LineTolerance {
    fn default() -> Self {
        Self::Relative(0.6)
    }
}

impl LineTolerance {
    fn allows(&self, anchor: &BBoxPx, candidate: &BBoxPx) -> bool {
        let limit = match *self {
            Self::Relative(ratio) => (anchor.h as f32 * ratio).max(candidate.h as f32 * ratio),
            Self::Fixed(pixels) => pixels,
        };
        (candidate.center_y() - anchor.center_y()).abs() <= limit
    }
}

/// Words judged to share one visual row, left to right.
#[derive(Debug, Clone, PartialEq)]
pub struct TextLine {
    pub words: Vec<RecognizedWord>,
    pub text: String,
    pub average_height: f32,
    pub mean_confidence: f32,
}

impl TextLine {
    fn from_words(mut words: Vec<RecognizedWord>) -> Option<Self> {
        if words.is_empty() {
            return None;
        }
        words.sort_by_key(|word| word.bbox.x);
        let text = words
            .iter()
            .map(|word| word.text.as_str())
            .collect::<Vec<_>>()
            .join(" ")
            .trim()
            .to_string();
        let count = words.len() as f32;
        let average_height = words.iter().map(|word| word.bbox.h as f32).sum::<f32>() / count;
        let mean_confidence = words.iter().map(|word| word.confidence).sum::<f32>() / count;
        Some(Self {
            words,
            text,
            average_height,
            mean_confidence,
        })
    }

    pub fn char_count(&self) -> usize {
        self.text.chars().count()
    }

    /// Mean fraction of the image each word covers.
    pub fn mean_area_ratio(&self, image_area: f32) -> f32 {
        let image_area = image_area.max(1.0);
        let sum = self
            .words
            .iter()
            .map(|word| word.bbox.area() / image_area)
            .sum::<f32>();
        sum / self.words.len().max(1) as f32
    }
}

pub(crate) fn group_words(
    words: Vec<RecognizedWord>,
    grouping: Grouping,
    tolerance: LineTolerance,
) -> Vec<TextLine> {
    let native = match grouping {
        Grouping::Native => true,
        Grouping::Geometric => false,
        Grouping::Auto => !words.is_empty() && words.iter().all(|word| word.line_key.is_some()),
    };
    if native {
        group_native(words)
    } else {
        group_geometric(words, tolerance)
    }
}

/// Words without a key share the default key, so nothing is dropped.
pub(crate) fn group_native(words: Vec<RecognizedWord>) -> Vec<TextLine> {
    let mut by_key: BTreeMap<LineKey, Vec<RecognizedWord>> = BTreeMap::new();
    for word in words {
        by_key.entry(word.line_key.unwrap_or_default()).or_default().push(word);
    }
    by_key.into_values().filter_map(TextLine::from_words).collect()
}

/// Top-to-bottom scan: each unclaimed word anchors a row and claims every
/// later unclaimed word within `tolerance` of it.
pub(crate) fn group_geometric(
    mut words: Vec<RecognizedWord>,
    tolerance: LineTolerance,
) -> Vec<TextLine> {
    words.sort_by(|a, b| a.bbox.y.cmp(&b.bbox.y).then(a.bbox.x.cmp(&b.bbox.x)));

    let mut slots = words.into_iter().map(Some).collect::<Vec<_>>();
    let mut lines = Vec::new();
    for i in 0..slots.len() {
        let Some(anchor) = slots[i].take() else {
            continue;
        };
        let anchor_box = anchor.bbox;
        let mut members = vec![anchor];
        for slot in slots.iter_mut().skip(i + 1) {
            let joins = slot
                .as_ref()
                .is_some_and(|candidate| tolerance.allows(&anchor_box, &candidate.bbox));
            if joins {
                members.extend(slot.take());
            }
        }
        lines.extend(TextLine::from_words(members));
    }
    lines
}
