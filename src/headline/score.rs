use std::cmp::Ordering;
use std::str::FromStr;

use anyhow::anyhow;

use super::group::TextLine;
use super::Headlines;

/// Prominence formula used to rank lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Scoring {
    /// `height × confidence × (1 + ln(1 + chars))`; discounts large misreads.
    #[default]
    ConfidenceAware,
    /// `height + 3 × area ratio + chars / 500`, for engines without usable confidence.
    Geometry,
}

impl FromStr for Scoring {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "confidence" | "confidence-aware" => Ok(Self::ConfidenceAware),
            "geometry" | "area" => Ok(Self::Geometry),
            other => Err(anyhow!("unknown scoring: {}", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct RankedLine {
    pub(crate) text: String,
    pub(crate) prominence_score: f32,
}

pub(crate) fn prominence_score(line: &TextLine, scoring: Scoring, image_area: f32) -> f32 {
    let chars = line.char_count() as f32;
    match scoring {
        Scoring::ConfidenceAware => {
            line.average_height * line.mean_confidence * (1.0 + chars.ln_1p())
        }
        Scoring::Geometry => {
            line.average_height + 3.0 * line.mean_area_ratio(image_area) + chars / 500.0
        }
    }
}

/// Highest score first; ties keep their grouping order.
pub(crate) fn rank_lines(lines: &[TextLine], scoring: Scoring, image_area: f32) -> Vec<RankedLine> {
    let mut ranked = lines
        .iter()
        .map(|line| RankedLine {
            text: line.text.clone(),
            prominence_score: prominence_score(line, scoring, image_area),
        })
        .collect::<Vec<_>>();
    ranked.sort_by(|a, b| {
        b.prominence_score
            .partial_cmp(&a.prominence_score)
            .unwrap_or(Ordering::Equal)
    });
    ranked
}

pub(crate) fn select_headlines(ranked: &[RankedLine]) -> Headlines {
    let primary = ranked.first().map(|line| line.text.clone());
    let secondary = ranked.get(1).and_then(|line| {
        let duplicate = primary
            .as_deref()
            .is_some_and(|first| same_text(first, &line.text));
        (!duplicate).then(|| line.text.clone())
    });
    Headlines { primary, secondary }
}

fn same_text(a: &str, b: &str) -> bool {
    a.trim().to_lowercase() == b.trim().to_lowercase()
}
