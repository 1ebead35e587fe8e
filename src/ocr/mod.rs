mod parse;
mod tesseract;

use anyhow::Result;
use image::GrayImage;

pub use tesseract::{list_tesseract_languages, TesseractEngine};

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct BBoxPx {
    pub x: u32,
    pub y: u32,
    pub w: u32,
    pub h: u32,
}

impl BBoxPx {
    pub fn new(x: u32, y: u32, w: u32, h: u32) -> Self {
        Self { x, y, w, h }
    }

    pub fn center_y(&self) -> f32 {
        self.y as f32 + self.h as f32 * 0.5
    }

    pub fn area(&self) -> f32 {
        self.w as f32 * self.h as f32
    }
}

/// Native grouping indices reported by the engine: (page, block, paragraph, line).
pub type LineKey = (i32, i32, i32, i32);

/// One OCR-detected token with its confidence normalized to `[0, 1]`.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct RecognizedWord {
    pub text: String,
    pub bbox: BBoxPx,
    pub confidence: f32,
    pub line_key: Option<LineKey>,
}

impl RecognizedWord {
    pub fn new(text: impl Into<String>, bbox: BBoxPx, confidence: f32) -> Self {
        Self {
            text: text.into(),
            bbox,
            confidence,
            line_key: None,
        }
    }

    pub fn with_line_key(mut self, key: LineKey) -> Self {
        self.line_key = Some(key);
        self
    }
}

/// Recognition backend shared read-only across extractions.
///
/// Implementations must be safe to call from several threads at once; the
/// extractor holds one instance for the lifetime of the process.
pub trait OcrEngine: Send + Sync {
    fn name(&self) -> &'static str;

    /// Recognize words in an already preprocessed grayscale image.
    fn recognize(&self, image: &GrayImage, languages: &str) -> Result<Vec<RecognizedWord>>;
}
