//! Advertisement records handed over by the collection stage.

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::headline::Headlines;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdRecord {
    #[serde(alias = "page_name")]
    pub advertiser: Option<String>,
    #[serde(alias = "ad_id", alias = "id")]
    pub creative_id: Option<String>,
    #[serde(alias = "url", alias = "image_url")]
    pub source_url: Option<String>,
    #[serde(alias = "local_path", alias = "path")]
    pub image_path: PathBuf,
    pub content_type: Option<String>,
}

impl AdRecord {
    pub fn from_path(path: impl Into<PathBuf>) -> Self {
        Self {
            image_path: path.into(),
            ..Self::default()
        }
    }
}

/// One exported row: the record plus whatever headlines were found.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HeadlineRow {
    #[serde(flatten)]
    pub record: AdRecord,
    pub h1: Option<String>,
    pub h2: Option<String>,
}

impl HeadlineRow {
    pub fn new(record: AdRecord, headlines: Headlines) -> Self {
        Self {
            record,
            h1: headlines.primary,
            h2: headlines.secondary,
        }
    }
}

/// Load a JSON array of records; relative image paths resolve against the
/// manifest's own directory.
pub fn load_manifest(path: &Path) -> Result<Vec<AdRecord>> {
    let content = fs::read(path)
        .with_context(|| format!("failed to read manifest: {}", path.display()))?;
    let mut records: Vec<AdRecord> = serde_json::from_slice(&content)
        .with_context(|| format!("failed to parse manifest: {}", path.display()))?;
    let base = path.parent().unwrap_or(Path::new(""));
    for record in &mut records {
        if record.image_path.as_os_str().is_empty() {
            return Err(anyhow!(
                "manifest entry without image_path: {}",
                path.display()
            ));
        }
        if record.image_path.is_relative() {
            record.image_path = base.join(&record.image_path);
        }
    }
    Ok(records)
}

/// Regular files in `dir` whose content sniffs as an image, sorted by path.
pub fn scan_directory(dir: &Path) -> Result<Vec<AdRecord>> {
    let entries = fs::read_dir(dir)
        .with_context(|| format!("failed to list directory: {}", dir.display()))?;
    let mut records = Vec::new();
    for entry in entries {
        let entry =
            entry.with_context(|| format!("failed to read entry in: {}", dir.display()))?;
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let mime = match infer::get_from_path(&path) {
            Ok(Some(kind)) => kind.mime_type(),
            Ok(None) => continue,
            Err(err) => {
                tracing::debug!(path = %path.display(), "skipping unreadable file: {err}");
                continue;
            }
        };
        if !mime.starts_with("image/") {
            continue;
        }
        records.push(AdRecord {
            content_type: Some(mime.to_string()),
            ..AdRecord::from_path(path)
        });
    }
    records.sort_by(|a, b| a.image_path.cmp(&b.image_path));
    Ok(records)
}

pub fn from_paths<I, P>(paths: I) -> Vec<AdRecord>
where
    I: IntoIterator<Item = P>,
    P: Into<PathBuf>,
{
    paths.into_iter().map(AdRecord::from_path).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn manifest_resolves_relative_paths() {
        let dir = tempdir().expect("tempdir");
        let manifest = dir.path().join("ads.json");
        fs::write(
            &manifest,
            r#"[
                {"advertiser": "Kaffebolaget", "creative_id": "123", "source_url": "https://example.com/a.jpg", "image_path": "images/a.jpg"},
                {"page_name": "Cykelhuset", "ad_id": "456", "image_path": "/abs/b.png"}
            ]"#,
        )
        .expect("write manifest");

        let records = load_manifest(&manifest).expect("load manifest");
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].image_path, dir.path().join("images/a.jpg"));
        assert_eq!(records[0].advertiser.as_deref(), Some("Kaffebolaget"));
        assert_eq!(records[1].advertiser.as_deref(), Some("Cykelhuset"));
        assert_eq!(records[1].creative_id.as_deref(), Some("456"));
        assert_eq!(records[1].image_path, PathBuf::from("/abs/b.png"));
    }

    #[test]
    fn manifest_entries_need_an_image() {
        let dir = tempdir().expect("tempdir");
        let manifest = dir.path().join("ads.json");
        fs::write(&manifest, r#"[{"advertiser": "Utan bild"}]"#).expect("write manifest");
        assert!(load_manifest(&manifest).is_err());
    }

    #[test]
    fn scan_keeps_only_images_in_order() {
        let dir = tempdir().expect("tempdir");
        let gray = image::GrayImage::from_pixel(4, 4, image::Luma([128]));
        gray.save(dir.path().join("b.png")).expect("save b");
        gray.save(dir.path().join("a.png")).expect("save a");
        fs::write(dir.path().join("notes.txt"), "inte en bild").expect("write txt");
        // Extension lies; content decides.
        fs::write(dir.path().join("fake.jpg"), "plain text").expect("write fake");
        fs::create_dir(dir.path().join("nested")).expect("mkdir");

        let records = scan_directory(dir.path()).expect("scan");
        let names = records
            .iter()
            .map(|record| record.image_path.file_name().and_then(|n| n.to_str()))
            .collect::<Vec<_>>();
        assert_eq!(names, vec![Some("a.png"), Some("b.png")]);
        assert_eq!(records[0].content_type.as_deref(), Some("image/png"));
    }

    #[test]
    fn row_carries_headlines() {
        let row = HeadlineRow::new(
            AdRecord::from_path("x.png"),
            Headlines {
                primary: Some("Rea".to_string()),
                secondary: None,
            },
        );
        assert_eq!(row.h1.as_deref(), Some("Rea"));
        assert_eq!(row.h2, None);
    }
}
