//! Headline extraction from advertisement creatives.
//!
//! An image is decoded, normalized and binarized, run through the shared
//! [`OcrEngine`], and its words are grouped into visual rows. The two most
//! prominent rows become the primary and secondary headline.
//!
//! [`HeadlineExtractor::extract_headlines`] never fails: any problem along the
//! way yields an empty [`Headlines`], since a batch caller can only leave
//! the columns blank and move on.

mod group;
mod preprocess;
mod score;

use std::path::Path;
use std::sync::Arc;

use serde::Serialize;

use crate::ocr::{OcrEngine, RecognizedWord, TesseractEngine};
use crate::settings::Settings;

pub use group::{Grouping, LineTolerance, TextLine};
pub use score::Scoring;

/// Up to two ranked headline candidates.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Headlines {
    pub primary: Option<String>,
    pub secondary: Option<String>,
}

impl Headlines {
    pub fn is_empty(&self) -> bool {
        self.primary.is_none() && self.secondary.is_none()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ExtractFailure {
    #[error("failed to read image {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to decode image: {0}")]
    Decode(#[from] image::ImageError),
    #[error("ocr engine failed: {0}")]
    OcrEngine(String),
    #[error("no usable text lines")]
    NoTextFound,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExtractorOptions {
    /// Words below this normalized confidence are ignored.
    pub min_confidence: f32,
    /// Lines with fewer characters are ignored.
    pub min_line_chars: usize,
    /// Images whose longer side is below this are upscaled 2x.
    pub upscale_floor: u32,
    pub scoring: Scoring,
    pub grouping: Grouping,
    pub tolerance: LineTolerance,
}

impl Default for ExtractorOptions {
    fn default() -> Self {
        Self {
            min_confidence: 0.40,
            min_line_chars: 3,
            upscale_floor: 1400,
            scoring: Scoring::default(),
            grouping: Grouping::default(),
            tolerance: LineTolerance::default(),
        }
    }
}

impl ExtractorOptions {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            min_confidence: settings.min_confidence,
            min_line_chars: settings.min_line_chars,
            upscale_floor: settings.upscale_floor,
            scoring: settings.scoring,
            grouping: settings.grouping,
            tolerance: LineTolerance::default(),
        }
    }
}

pub struct HeadlineExtractor {
    engine: Arc<dyn OcrEngine>,
    options: ExtractorOptions,
    default_languages: String,
}

impl HeadlineExtractor {
    pub fn new(
        engine: Arc<dyn OcrEngine>,
        options: ExtractorOptions,
        default_languages: impl Into<String>,
    ) -> Self {
        Self {
            engine,
            options,
            default_languages: default_languages.into(),
        }
    }

    /// Build the process-wide extractor backed by the tesseract CLI.
    pub fn from_settings(settings: &Settings) -> Self {
        let engine =
            TesseractEngine::new(settings.page_segmentation).with_deadline(settings.image_timeout);
        Self::new(
            Arc::new(engine),
            ExtractorOptions::from_settings(settings),
            settings.ocr_languages.clone(),
        )
    }

    pub fn options(&self) -> &ExtractorOptions {
        &self.options
    }

    pub fn default_languages(&self) -> &str {
        &self.default_languages
    }

    pub fn engine_name(&self) -> &'static str {
        self.engine.name()
    }

    /// Primary and secondary headline of the image at `path`, or an empty
    /// pair when nothing usable could be read.
    pub fn extract_headlines(&self, path: &Path, languages: Option<&str>) -> Headlines {
        match self.try_extract(path, languages) {
            Ok(headlines) => headlines,
            Err(err) => {
                tracing::debug!(path = %path.display(), "headline extraction failed: {err}");
                Headlines::default()
            }
        }
    }

    pub fn try_extract(
        &self,
        path: &Path,
        languages: Option<&str>,
    ) -> Result<Headlines, ExtractFailure> {
        let image = preprocess::decode_image(path)?;
        let prepared = preprocess::prepare_for_ocr(&image, self.options.upscale_floor);
        let languages = languages
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .unwrap_or(&self.default_languages);
        let words = self
            .engine
            .recognize(&prepared, languages)
            .map_err(|err| ExtractFailure::OcrEngine(format!("{err:#}")))?;
        let (width, height) = prepared.dimensions();
        self.headlines_from_words(words, width, height)
    }

    /// Grouping, filtering and ranking over already recognized words.
    pub fn headlines_from_words(
        &self,
        words: Vec<RecognizedWord>,
        width: u32,
        height: u32,
    ) -> Result<Headlines, ExtractFailure> {
        let words = words
            .into_iter()
            .filter_map(|mut word| {
                let trimmed = word.text.trim();
                if trimmed.is_empty()
                    || word.bbox.w == 0
                    || word.bbox.h == 0
                    || word.confidence < self.options.min_confidence
                {
                    return None;
                }
                word.text = trimmed.to_string();
                Some(word)
            })
            .collect::<Vec<_>>();

        let lines = group::group_words(words, self.options.grouping, self.options.tolerance)
            .into_iter()
            .filter(|line| line.char_count() >= self.options.min_line_chars)
            .collect::<Vec<_>>();
        if lines.is_empty() {
            return Err(ExtractFailure::NoTextFound);
        }

        let image_area = width as f32 * height as f32;
        let ranked = score::rank_lines(&lines, self.options.scoring, image_area);
        Ok(score::select_headlines(&ranked))
    }
}
