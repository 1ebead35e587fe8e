use anyhow::{anyhow, Context, Result};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

pub mod batch;
pub mod export;
pub mod headline;
pub mod logging;
pub mod ocr;
pub mod records;
pub mod server;
pub mod settings;
mod test_util;

pub use headline::{
    ExtractFailure, ExtractorOptions, Grouping, HeadlineExtractor, Headlines, LineTolerance,
    Scoring,
};
pub use records::{AdRecord, HeadlineRow};

#[derive(Debug, Clone, Default)]
pub struct Config {
    pub images: Vec<String>,
    pub dir: Option<String>,
    pub manifest: Option<String>,
    pub output: Option<String>,
    pub lang: Option<String>,
    pub scoring: Option<String>,
    pub grouping: Option<String>,
    pub threads: Option<usize>,
    pub image_timeout_secs: Option<u64>,
    pub settings_path: Option<String>,
    pub show_ocr_languages: bool,
    pub server: Option<String>,
}

pub async fn run(config: Config) -> Result<String> {
    if config.show_ocr_languages {
        return Ok(ocr::list_tesseract_languages()?.join("\n"));
    }

    let settings_path = config.settings_path.as_deref().map(Path::new);
    let mut settings = settings::load_settings(settings_path)?;
    apply_overrides(&mut settings, &config)?;

    let extractor = Arc::new(HeadlineExtractor::from_settings(&settings));
    tracing::debug!(
        engine = extractor.engine_name(),
        languages = extractor.default_languages(),
        "extractor ready"
    );

    if let Some(addr) = config.server.clone() {
        server::run_server(settings, extractor, addr).await?;
        return Ok(String::new());
    }

    let records = collect_records(&config)?;
    if records.is_empty() {
        return Err(anyhow!("no input images (pass paths, --dir or --manifest)"));
    }

    let options = batch::BatchOptions::from_settings(&settings);
    let rows = batch::run_batch(extractor, records, None, options).await;

    match config.output.as_deref() {
        Some(output) => {
            let path = Path::new(output);
            export::write_rows(path, &rows)?;
            let found = rows.iter().filter(|row| row.h1.is_some()).count();
            Ok(format!(
                "wrote {} rows ({} with headlines) to {}",
                rows.len(),
                found,
                path.display()
            ))
        }
        None => export::rows_to_json(&rows),
    }
}

fn apply_overrides(settings: &mut settings::Settings, config: &Config) -> Result<()> {
    if let Some(lang) = config.lang.as_deref().map(str::trim) {
        if lang.is_empty() {
            return Err(anyhow!("ocr languages is empty"));
        }
        settings.ocr_languages = lang.to_string();
    }
    if let Some(value) = config.scoring.as_deref() {
        settings.scoring = value.parse::<Scoring>().with_context(|| "invalid --scoring")?;
    }
    if let Some(value) = config.grouping.as_deref() {
        settings.grouping = value.parse::<Grouping>().with_context(|| "invalid --grouping")?;
    }
    if let Some(threads) = config.threads {
        settings.threads = threads;
    }
    if let Some(secs) = config.image_timeout_secs {
        if secs == 0 {
            return Err(anyhow!("--image-timeout must be positive"));
        }
        settings.image_timeout = Duration::from_secs(secs);
    }
    Ok(())
}

fn collect_records(config: &Config) -> Result<Vec<AdRecord>> {
    let mut records = records::from_paths(config.images.iter().map(String::as_str));
    if let Some(dir) = config.dir.as_deref() {
        records.extend(records::scan_directory(Path::new(dir))?);
    }
    if let Some(manifest) = config.manifest.as_deref() {
        records.extend(records::load_manifest(Path::new(manifest))?);
    }
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overrides_replace_settings() {
        let mut settings = settings::Settings::default();
        let config = Config {
            lang: Some(" eng ".to_string()),
            scoring: Some("geometry".to_string()),
            grouping: Some("geometric".to_string()),
            threads: Some(2),
            image_timeout_secs: Some(5),
            ..Config::default()
        };
        apply_overrides(&mut settings, &config).expect("overrides");
        assert_eq!(settings.ocr_languages, "eng");
        assert_eq!(settings.scoring, Scoring::Geometry);
        assert_eq!(settings.grouping, Grouping::Geometric);
        assert_eq!(settings.effective_threads(), 2);
        assert_eq!(settings.image_timeout, Duration::from_secs(5));
    }

    #[test]
    fn bad_overrides_are_rejected() {
        let mut settings = settings::Settings::default();
        let config = Config {
            scoring: Some("loudest".to_string()),
            ..Config::default()
        };
        assert!(apply_overrides(&mut settings, &config).is_err());

        let config = Config {
            image_timeout_secs: Some(0),
            ..Config::default()
        };
        assert!(apply_overrides(&mut settings, &config).is_err());
    }

    #[test]
    fn records_come_from_every_source() {
        let dir = tempfile::tempdir().expect("tempdir");
        image::GrayImage::from_pixel(4, 4, image::Luma([0]))
            .save(dir.path().join("scan.png"))
            .expect("save");
        let manifest = dir.path().join("ads.json");
        std::fs::write(&manifest, r#"[{"image_path": "m.png", "advertiser": "A"}]"#)
            .expect("write manifest");
        let config = Config {
            images: vec!["direct.jpg".to_string()],
            dir: Some(dir.path().display().to_string()),
            manifest: Some(manifest.display().to_string()),
            ..Config::default()
        };

        let records = collect_records(&config).expect("records");
        assert_eq!(records.len(), 3);
        assert_eq!(records[0].image_path, Path::new("direct.jpg"));
        assert!(records[1].image_path.ends_with("scan.png"));
        assert_eq!(records[2].advertiser.as_deref(), Some("A"));
    }
}
