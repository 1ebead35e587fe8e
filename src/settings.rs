use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::headline::{Grouping, Scoring};

const DEFAULT_SETTINGS_TOML: &str = include_str!("../settings.toml");

#[derive(Debug, Clone)]
pub struct Settings {
    pub ocr_languages: String,
    pub min_confidence: f32,
    pub min_line_chars: usize,
    pub upscale_floor: u32,
    pub scoring: Scoring,
    pub grouping: Grouping,
    pub page_segmentation: u32,
    pub threads: usize,
    pub image_timeout: Duration,
    pub runs_dir: PathBuf,
    pub job_timeout: Duration,
    pub max_upload_bytes: usize,
    /// Server jobs may only read `paths`, `dir` and `manifest` inside this
    /// directory; `None` disables those inputs and leaves uploads only.
    pub input_root: Option<PathBuf>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            ocr_languages: "swe+eng".to_string(),
            min_confidence: 0.40,
            min_line_chars: 3,
            upscale_floor: 1400,
            scoring: Scoring::ConfidenceAware,
            grouping: Grouping::Auto,
            page_segmentation: 3,
            threads: 0,
            image_timeout: Duration::from_secs(60),
            runs_dir: PathBuf::from("runs"),
            job_timeout: Duration::from_secs(1800),
            max_upload_bytes: 64 * 1024 * 1024,
            input_root: None,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct SettingsFile {
    ocr: Option<OcrSettings>,
    batch: Option<BatchSettings>,
    server: Option<ServerSettings>,
}

#[derive(Debug, Default, Deserialize)]
struct OcrSettings {
    languages: Option<String>,
    min_confidence: Option<f32>,
    min_line_chars: Option<usize>,
    upscale_floor: Option<u32>,
    scoring: Option<String>,
    grouping: Option<String>,
    page_segmentation: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
struct BatchSettings {
    threads: Option<usize>,
    image_timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct ServerSettings {
    runs_dir: Option<String>,
    job_timeout_secs: Option<u64>,
    max_upload_bytes: Option<usize>,
    input_root: Option<String>,
}

pub fn load_settings(extra_path: Option<&Path>) -> Result<Settings> {
    let mut settings = Settings::default();
    settings.merge(parse_settings(DEFAULT_SETTINGS_TOML, Path::new("<embedded>"))?);
    ensure_home_settings_file()?;

    let mut ordered_paths = Vec::new();
    ordered_paths.push(PathBuf::from("settings.toml"));
    ordered_paths.push(PathBuf::from("settings.local.toml"));

    if let Some(home) = home_dir() {
        ordered_paths.push(home.join("settings.toml"));
        ordered_paths.push(home.join("settings.local.toml"));
    }

    if let Some(extra) = extra_path {
        if !extra.exists() {
            return Err(anyhow!("settings file not found: {}", extra.display()));
        }
        ordered_paths.push(extra.to_path_buf());
    }

    for path in ordered_paths {
        if path.exists() {
            let content = fs::read_to_string(&path)
                .with_context(|| format!("failed to read settings: {}", path.display()))?;
            settings.merge(parse_settings(&content, &path)?);
            tracing::debug!(path = %path.display(), "settings layer applied");
        }
    }

    Ok(settings)
}

fn parse_settings(content: &str, path: &Path) -> Result<SettingsFile> {
    toml::from_str(content)
        .with_context(|| format!("failed to parse settings: {}", path.display()))
}

impl Settings {
    fn merge(&mut self, incoming: SettingsFile) {
        if let Some(ocr) = incoming.ocr {
            if let Some(languages) = ocr.languages {
                if !languages.trim().is_empty() {
                    self.ocr_languages = languages.trim().to_string();
                }
            }
            if let Some(value) = ocr.min_confidence {
                if (0.0..=1.0).contains(&value) {
                    self.min_confidence = value;
                }
            }
            if let Some(value) = ocr.min_line_chars {
                self.min_line_chars = value;
            }
            if let Some(value) = ocr.upscale_floor {
                self.upscale_floor = value;
            }
            if let Some(value) = ocr.scoring {
                match value.parse::<Scoring>() {
                    Ok(scoring) => self.scoring = scoring,
                    Err(err) => tracing::warn!("ignoring ocr.scoring: {err}"),
                }
            }
            if let Some(value) = ocr.grouping {
                match value.parse::<Grouping>() {
                    Ok(grouping) => self.grouping = grouping,
                    Err(err) => tracing::warn!("ignoring ocr.grouping: {err}"),
                }
            }
            if let Some(value) = ocr.page_segmentation {
                if value <= 13 {
                    self.page_segmentation = value;
                }
            }
        }
        if let Some(batch) = incoming.batch {
            if let Some(threads) = batch.threads {
                self.threads = threads;
            }
            if let Some(secs) = batch.image_timeout_secs {
                if secs > 0 {
                    self.image_timeout = Duration::from_secs(secs);
                }
            }
        }
        if let Some(server) = incoming.server {
            if let Some(dir) = server.runs_dir {
                if !dir.trim().is_empty() {
                    self.runs_dir = PathBuf::from(dir.trim());
                }
            }
            if let Some(secs) = server.job_timeout_secs {
                if secs > 0 {
                    self.job_timeout = Duration::from_secs(secs);
                }
            }
            if let Some(bytes) = server.max_upload_bytes {
                if bytes > 0 {
                    self.max_upload_bytes = bytes;
                }
            }
            if let Some(root) = server.input_root {
                let root = root.trim();
                self.input_root = (!root.is_empty()).then(|| PathBuf::from(root));
            }
        }
    }

    /// Worker count with `0` meaning every available core.
    pub fn effective_threads(&self) -> usize {
        if self.threads == 0 {
            num_cpus::get().max(1)
        } else {
            self.threads
        }
    }
}

fn ensure_home_settings_file() -> Result<()> {
    let Some(home) = home_dir() else {
        return Ok(());
    };
    fs::create_dir_all(&home)
        .with_context(|| format!("failed to create settings directory: {}", home.display()))?;
    let path = home.join("settings.toml");
    if !path.exists() {
        fs::write(&path, DEFAULT_SETTINGS_TOML)
            .with_context(|| format!("failed to write settings: {}", path.display()))?;
    }
    Ok(())
}

fn home_dir() -> Option<PathBuf> {
    std::env::var("HOME").ok().and_then(|home| {
        let home = home.trim();
        if home.is_empty() {
            None
        } else {
            Some(Path::new(home).join(".ad-headlines"))
        }
    })
}
