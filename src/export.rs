use anyhow::{Context, Result};
use std::fs;
use std::path::Path;

use crate::records::HeadlineRow;

pub const CSV_HEADER: [&str; 6] = [
    "Advertiser",
    "Creative ID",
    "Source URL",
    "Image Path",
    "H1 (OCR)",
    "H2 (OCR)",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Csv,
    Json,
}

impl ExportFormat {
    pub fn for_path(path: &Path) -> Self {
        match path.extension().and_then(|ext| ext.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("json") => Self::Json,
            _ => Self::Csv,
        }
    }
}

/// Write `rows` to `path`, choosing the format from its extension.
///
/// The header is always written, so a batch where every extraction failed
/// still produces a complete file with blank headline columns.
pub fn write_rows(path: &Path, rows: &[HeadlineRow]) -> Result<()> {
    let bytes = match ExportFormat::for_path(path) {
        ExportFormat::Csv => rows_to_csv(rows)?,
        ExportFormat::Json => rows_to_json(rows)?.into_bytes(),
    };
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create output dir: {}", parent.display()))?;
    }
    fs::write(path, bytes).with_context(|| format!("failed to write {}", path.display()))?;
    tracing::info!(path = %path.display(), rows = rows.len(), "rows exported");
    Ok(())
}

pub fn rows_to_csv(rows: &[HeadlineRow]) -> Result<Vec<u8>> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer
        .write_record(CSV_HEADER)
        .with_context(|| "failed to write csv header")?;
    for row in rows {
        let image_path = row.record.image_path.to_string_lossy();
        writer
            .write_record([
                row.record.advertiser.as_deref().unwrap_or(""),
                row.record.creative_id.as_deref().unwrap_or(""),
                row.record.source_url.as_deref().unwrap_or(""),
                &*image_path,
                row.h1.as_deref().unwrap_or(""),
                row.h2.as_deref().unwrap_or(""),
            ])
            .with_context(|| "failed to write csv row")?;
    }
    writer
        .into_inner()
        .map_err(|err| anyhow::anyhow!("failed to flush csv: {}", err))
}

pub fn rows_to_json(rows: &[HeadlineRow]) -> Result<String> {
    serde_json::to_string_pretty(rows).with_context(|| "failed to serialize rows")
}
