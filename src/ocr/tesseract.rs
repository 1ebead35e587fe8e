use anyhow::{anyhow, Context, Result};
use image::GrayImage;
use std::ffi::OsString;
use std::io::{Read, Write};
use std::path::Path;
use std::process::{Child, Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use super::parse::parse_tsv_words;
use super::{OcrEngine, RecognizedWord};

pub fn list_tesseract_languages() -> Result<Vec<String>> {
    let output = Command::new("tesseract")
        .arg("--list-langs")
        .output()
        .with_context(|| "failed to run tesseract --list-langs")?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(anyhow!("tesseract --list-langs failed: {}", stderr.trim()));
    }
    let stdout = String::from_utf8_lossy(&output.stdout);
    Ok(parse_language_list(&stdout))
}

fn parse_language_list(stdout: &str) -> Vec<String> {
    let mut langs = Vec::new();
    for (idx, line) in stdout.lines().enumerate() {
        if idx == 0 {
            continue;
        }
        let value = line.trim();
        if !value.is_empty() {
            langs.push(value.to_string());
        }
    }
    langs
}

/// `tesseract` CLI backend.
///
/// The installed language list is probed once at construction; each
/// recognition spawns its own child process, so the engine is safe to share.
/// A child still running after `deadline` is killed.
pub struct TesseractEngine {
    available: Option<Vec<String>>,
    page_segmentation: u32,
    deadline: Option<Duration>,
}

impl TesseractEngine {
    pub fn new(page_segmentation: u32) -> Self {
        let available = match list_tesseract_languages() {
            Ok(list) => {
                tracing::debug!(languages = %list.join(","), "tesseract languages probed");
                Some(list)
            }
            Err(err) => {
                tracing::warn!("could not list tesseract languages: {err:#}");
                None
            }
        };
        Self {
            available,
            page_segmentation,
            deadline: None,
        }
    }

    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }

    fn normalize_languages(&self, requested: &str) -> Result<String> {
        normalize_ocr_languages(requested, self.available.as_deref())
    }
}

impl OcrEngine for TesseractEngine {
    fn name(&self) -> &'static str {
        "tesseract"
    }

    fn recognize(&self, image: &GrayImage, languages: &str) -> Result<Vec<RecognizedWord>> {
        let languages = self.normalize_languages(languages)?;
        let mut tmp = tempfile::Builder::new()
            .suffix(".png")
            .tempfile()
            .with_context(|| "failed to create temp file for OCR")?;
        image
            .write_to(&mut tmp, image::ImageFormat::Png)
            .with_context(|| "failed to write temp image for OCR")?;
        tmp.flush().ok();

        let tsv = run_tesseract_tsv(tmp.path(), &languages, self.page_segmentation, self.deadline)?;
        Ok(parse_tsv_words(&tsv))
    }
}

pub(super) fn normalize_ocr_languages(
    requested: &str,
    available: Option<&[String]>,
) -> Result<String> {
    let trimmed = requested.trim();
    if trimmed.is_empty() {
        return Err(anyhow!("ocr languages is empty"));
    }

    let requested = trimmed
        .split(['+', ',', ' '])
        .map(str::trim)
        .filter(|lang| !lang.is_empty())
        .collect::<Vec<_>>();

    let Some(available) = available else {
        return Ok(requested.join("+"));
    };

    let mut chosen = Vec::new();
    let mut missing = Vec::new();
    for lang in requested {
        if available.iter().any(|value| value == lang) {
            chosen.push(lang.to_string());
        } else {
            missing.push(lang.to_string());
        }
    }

    if chosen.is_empty() {
        return Err(anyhow!(
            "ocr language(s) not available: {} (available: {})",
            missing.join(", "),
            available.join(", ")
        ));
    }
    if !missing.is_empty() {
        tracing::warn!(
            "ocr language(s) not available: {} (available: {})",
            missing.join(", "),
            available.join(", ")
        );
    }

    Ok(chosen.join("+"))
}

fn run_tesseract_tsv(
    path: &Path,
    languages: &str,
    psm: u32,
    deadline: Option<Duration>,
) -> Result<String> {
    let mut child = Command::new("tesseract")
        .args(tesseract_args(path, languages, psm))
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .with_context(|| "failed to run tesseract (is it installed?)")?;

    // Drain both pipes while waiting so a chatty child never blocks on a full pipe.
    let stdout = drain(child.stdout.take());
    let stderr = drain(child.stderr.take());
    let status = wait_with_deadline(&mut child, deadline)?;
    let stdout = stdout.join().unwrap_or_default();
    let stderr = stderr.join().unwrap_or_default();

    if !status.success() {
        return Err(anyhow!("tesseract failed: {}", String::from_utf8_lossy(&stderr).trim()));
    }
    Ok(String::from_utf8_lossy(&stdout).to_string())
}

fn tesseract_args(path: &Path, languages: &str, psm: u32) -> Vec<OsString> {
    // The temp PNG carries no resolution, so pin the one tesseract expects.
    vec![
        path.into(),
        "stdout".into(),
        "-l".into(),
        languages.into(),
        "--oem".into(),
        "1".into(),
        "--psm".into(),
        psm.to_string().into(),
        "--dpi".into(),
        "300".into(),
        "tsv".into(),
    ]
}

fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> thread::JoinHandle<Vec<u8>> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        if let Some(mut pipe) = pipe {
            let _ = pipe.read_to_end(&mut buf);
        }
        buf
    })
}

const WAIT_POLL: Duration = Duration::from_millis(20);

pub(super) fn wait_with_deadline(
    child: &mut Child,
    deadline: Option<Duration>,
) -> Result<std::process::ExitStatus> {
    let Some(deadline) = deadline else {
        return child.wait().with_context(|| "failed to wait for tesseract");
    };
    let started = Instant::now();
    loop {
        if let Some(status) = child
            .try_wait()
            .with_context(|| "failed to wait for tesseract")?
        {
            return Ok(status);
        }
        if started.elapsed() >= deadline {
            let _ = child.kill();
            let _ = child.wait();
            return Err(anyhow!(
                "tesseract killed after {:.1}s",
                deadline.as_secs_f32()
            ));
        }
        thread::sleep(WAIT_POLL);
    }
}
