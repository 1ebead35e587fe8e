use anyhow::{anyhow, Context, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::fs;
use tokio::io::AsyncWriteExt;

use crate::batch::{run_batch, BatchOptions};
use crate::export;
use crate::records::{self, AdRecord};

use super::models::{JobRequest, JobState, JobStatus, UploadedImage};
use super::state::ServerState;

const STATUS_FILE_NAME: &str = "status.json";
const LOG_FILE_NAME: &str = "job.log";
const RESULT_FILE_NAME: &str = "headlines.csv";
const IMAGES_DIR_NAME: &str = "images";

static JOB_COUNTER: AtomicU64 = AtomicU64::new(0);

/// On-disk job bookkeeping: one directory per job under `runs_dir`.
#[derive(Debug, Clone)]
pub(crate) struct JobStore {
    runs_dir: PathBuf,
}

impl JobStore {
    pub(crate) fn new(runs_dir: impl Into<PathBuf>) -> Self {
        Self {
            runs_dir: runs_dir.into(),
        }
    }

    pub(crate) async fn create_job(&self) -> Result<String> {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos();
        let seq = JOB_COUNTER.fetch_add(1, Ordering::Relaxed);
        let id_seed = format!("{}:{}:{}", nanos, std::process::id(), seq);
        let id = format!("{:x}", md5::compute(id_seed.as_bytes()));

        let dir = self.runs_dir.join(&id);
        fs::create_dir_all(dir.join(IMAGES_DIR_NAME))
            .await
            .with_context(|| format!("failed to create job dir: {}", dir.display()))?;
        self.write_status(&id, JobStatus::new(JobState::Queued)).await?;
        self.append_log(&id, "job queued").await;
        Ok(id)
    }

    /// Directory of a known job; `None` for malformed or unknown ids.
    pub(crate) async fn job_dir(&self, id: &str) -> Option<PathBuf> {
        if id.len() != 32 || !id.chars().all(|ch| ch.is_ascii_hexdigit()) {
            return None;
        }
        let dir = self.runs_dir.join(id);
        let is_dir = fs::metadata(&dir)
            .await
            .map(|meta| meta.is_dir())
            .unwrap_or(false);
        is_dir.then_some(dir)
    }

    pub(crate) fn images_dir(&self, id: &str) -> PathBuf {
        self.runs_dir.join(id).join(IMAGES_DIR_NAME)
    }

    pub(crate) fn result_path(&self, id: &str) -> PathBuf {
        self.runs_dir.join(id).join(RESULT_FILE_NAME)
    }

    pub(crate) fn log_path(&self, id: &str) -> PathBuf {
        self.runs_dir.join(id).join(LOG_FILE_NAME)
    }

    pub(crate) async fn write_status(&self, id: &str, mut status: JobStatus) -> Result<()> {
        status.updated_at = now_rfc3339();
        let path = self.runs_dir.join(id).join(STATUS_FILE_NAME);
        let tmp = path.with_extension("json.tmp");
        let body = serde_json::to_vec_pretty(&status)?;
        fs::write(&tmp, body)
            .await
            .with_context(|| format!("failed to write job status: {}", tmp.display()))?;
        fs::rename(&tmp, &path)
            .await
            .with_context(|| format!("failed to replace job status: {}", path.display()))?;
        Ok(())
    }

    pub(crate) async fn read_status(&self, id: &str) -> Result<Option<JobStatus>> {
        let Some(dir) = self.job_dir(id).await else {
            return Ok(None);
        };
        let path = dir.join(STATUS_FILE_NAME);
        let content = match fs::read(&path).await {
            Ok(content) => content,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
            Err(err) => {
                return Err(err)
                    .with_context(|| format!("failed to read job status: {}", path.display()))
            }
        };
        let status = serde_json::from_slice(&content)
            .with_context(|| format!("failed to parse job status: {}", path.display()))?;
        Ok(Some(status))
    }

    /// Best effort; a job never fails because its log could not be written.
    pub(crate) async fn append_log(&self, id: &str, message: &str) {
        let path = self.log_path(id);
        let line = format!("{} {}\n", now_rfc3339(), message);
        let written = async {
            let mut file = fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .await?;
            file.write_all(line.as_bytes()).await?;
            file.flush().await
        }
        .await;
        if let Err(err) = written {
            tracing::warn!(path = %path.display(), "failed to append job log: {err}");
        }
    }

    /// Decode uploaded images into the job's image directory.
    pub(crate) async fn store_uploads(
        &self,
        id: &str,
        uploads: &[UploadedImage],
    ) -> Result<Vec<AdRecord>> {
        let dir = self.images_dir(id);
        let mut records = Vec::with_capacity(uploads.len());
        for (idx, upload) in uploads.iter().enumerate() {
            let bytes = BASE64
                .decode(upload.data_base64.trim())
                .map_err(|err| anyhow!("images[{}]: invalid base64: {}", idx, err))?;
            let name = upload.name.as_deref().unwrap_or("image");
            let path = dir.join(format!("{:04}_{}", idx, sanitize_filename_component(name)));
            fs::write(&path, &bytes)
                .await
                .with_context(|| format!("failed to store upload: {}", path.display()))?;
            records.push(AdRecord {
                advertiser: upload.advertiser.clone(),
                creative_id: upload.creative_id.clone(),
                source_url: upload.source_url.clone(),
                content_type: infer::get(&bytes).map(|kind| kind.mime_type().to_string()),
                image_path: path,
            });
        }
        Ok(records)
    }
}

pub(crate) fn result_url(id: &str) -> String {
    format!("/jobs/{}/result", id)
}

pub(crate) fn status_url(id: &str) -> String {
    format!("/jobs/{}", id)
}

/// Resolve a request path under `root`. Parent components and absolute paths
/// elsewhere are refused; symlinks inside `root` are trusted.
pub(crate) fn confine_path(root: &Path, path: &Path) -> Result<PathBuf> {
    if path
        .components()
        .any(|component| matches!(component, Component::ParentDir))
    {
        return Err(anyhow!("path leaves input_root: {}", path.display()));
    }
    let resolved = if path.is_absolute() {
        path.to_path_buf()
    } else {
        root.join(path)
    };
    if !resolved.starts_with(root) {
        return Err(anyhow!("path leaves input_root: {}", path.display()));
    }
    Ok(resolved)
}

/// Check the filesystem inputs of a request before any job is created.
pub(crate) fn check_request_paths(request: &JobRequest, root: Option<&Path>) -> Result<()> {
    let inputs = request.path_inputs();
    if inputs.is_empty() {
        return Ok(());
    }
    let Some(root) = root else {
        return Err(anyhow!(
            "paths, dir and manifest are disabled; set server.input_root or upload images"
        ));
    };
    for input in inputs {
        confine_path(root, Path::new(input))?;
    }
    Ok(())
}

pub(crate) fn collect_records(request: &JobRequest, root: Option<&Path>) -> Result<Vec<AdRecord>> {
    check_request_paths(request, root)?;
    let Some(root) = root else {
        return Ok(Vec::new());
    };

    let mut paths = Vec::new();
    for path in request.paths.iter().map(|path| path.trim()).filter(|path| !path.is_empty()) {
        paths.push(confine_path(root, Path::new(path))?);
    }
    let mut records = records::from_paths(paths);
    if let Some(dir) = request.dir.as_deref().map(str::trim).filter(|d| !d.is_empty()) {
        records.extend(records::scan_directory(&confine_path(root, Path::new(dir))?)?);
    }
    if let Some(manifest) = request
        .manifest
        .as_deref()
        .map(str::trim)
        .filter(|m| !m.is_empty())
    {
        let listed = records::load_manifest(&confine_path(root, Path::new(manifest))?)?;
        for record in &listed {
            confine_path(root, &record.image_path)?;
        }
        records.extend(listed);
    }
    Ok(records)
}

/// Run a queued job to completion, recording every transition in its
/// status file and log.
pub(crate) async fn run_job(
    state: &ServerState,
    id: String,
    request: JobRequest,
    uploaded: Vec<AdRecord>,
) {
    let jobs = &state.jobs;
    if let Err(err) = jobs.write_status(&id, JobStatus::new(JobState::Running)).await {
        tracing::error!(job = %id, "failed to mark job running: {err:#}");
        return;
    }
    jobs.append_log(&id, "job running").await;

    let budget = state.settings.job_timeout;
    let outcome = tokio::time::timeout(budget, process_job(state, &id, request, uploaded)).await;
    let status = match outcome {
        Ok(Ok(rows)) => {
            jobs.append_log(&id, &format!("job done: {} rows", rows)).await;
            JobStatus {
                result_url: Some(result_url(&id)),
                rows: Some(rows),
                ..JobStatus::new(JobState::Done)
            }
        }
        Ok(Err(err)) => {
            jobs.append_log(&id, &format!("job failed: {err:#}")).await;
            JobStatus::failed(format!("{err:#}"))
        }
        Err(_) => {
            jobs.append_log(&id, &format!("job exceeded {}s budget", budget.as_secs()))
                .await;
            JobStatus::failed("timeout")
        }
    };
    if let Err(err) = jobs.write_status(&id, status).await {
        tracing::error!(job = %id, "failed to write final job status: {err:#}");
    }
}

async fn process_job(
    state: &ServerState,
    id: &str,
    request: JobRequest,
    uploaded: Vec<AdRecord>,
) -> Result<usize> {
    let languages = request
        .lang
        .as_deref()
        .map(str::trim)
        .filter(|lang| !lang.is_empty())
        .map(str::to_string);

    let root = state.settings.input_root.clone();
    let collected = tokio::task::spawn_blocking(move || collect_records(&request, root.as_deref()))
        .await
        .context("record collection task failed")??;
    let mut records = uploaded;
    records.extend(collected);
    state
        .jobs
        .append_log(id, &format!("extracting headlines from {} images", records.len()))
        .await;

    let rows = run_batch(
        state.extractor.clone(),
        records,
        languages,
        BatchOptions::from_settings(&state.settings),
    )
    .await;

    for row in rows.iter().filter(|row| row.h1.is_none()) {
        state
            .jobs
            .append_log(id, &format!("no headline: {}", row.record.image_path.display()))
            .await;
    }
    let result_path = state.jobs.result_path(id);
    tokio::task::spawn_blocking(move || {
        export::write_rows(&result_path, &rows)?;
        Ok::<_, anyhow::Error>(rows.len())
    })
    .await
    .context("result export task failed")?
}

fn now_rfc3339() -> String {
    time::OffsetDateTime::now_utc()
        .format(&time::format_description::well_known::Rfc3339)
        .unwrap_or_default()
}

fn sanitize_filename_component(value: &str) -> String {
    let mut out = String::new();
    for ch in value.chars() {
        if ch.is_ascii_alphanumeric() || ch == '.' || ch == '-' || ch == '_' {
            out.push(ch);
        } else {
            out.push('_');
        }
    }
    if out.is_empty() || out.chars().all(|ch| ch == '.') {
        "image".to_string()
    } else {
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::headline::{ExtractorOptions, HeadlineExtractor};
    use crate::ocr::{BBoxPx, OcrEngine, RecognizedWord};
    use crate::settings::Settings;
    use image::GrayImage;
    use std::sync::Arc;
    use std::time::Duration;

    struct FixedEngine;

    impl OcrEngine for FixedEngine {
        fn name(&self) -> &'static str {
            "fixed"
        }

        fn recognize(&self, _image: &GrayImage, _languages: &str) -> Result<Vec<RecognizedWord>> {
            Ok(vec![RecognizedWord::new(
                "Julklappstips",
                BBoxPx::new(0, 0, 200, 40),
                0.9,
            )])
        }
    }

    fn state(runs_dir: &Path) -> ServerState {
        let settings = Settings {
            runs_dir: runs_dir.to_path_buf(),
            input_root: Some(runs_dir.to_path_buf()),
            threads: 2,
            image_timeout: Duration::from_secs(10),
            ..Settings::default()
        };
        ServerState {
            extractor: Arc::new(HeadlineExtractor::new(
                Arc::new(FixedEngine),
                ExtractorOptions::default(),
                "swe+eng",
            )),
            jobs: JobStore::new(runs_dir),
            settings,
        }
    }

    fn png_base64() -> String {
        let mut bytes = std::io::Cursor::new(Vec::new());
        GrayImage::from_pixel(8, 8, image::Luma([255]))
            .write_to(&mut bytes, image::ImageFormat::Png)
            .expect("encode png");
        BASE64.encode(bytes.into_inner())
    }

    #[tokio::test]
    async fn new_jobs_are_queued_and_ids_are_unique() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = JobStore::new(dir.path());
        let first = store.create_job().await.expect("create");
        let second = store.create_job().await.expect("create");
        assert_ne!(first, second);
        let status = store.read_status(&first).await.expect("read").expect("status");
        assert_eq!(status.status, JobState::Queued);
        assert!(!status.updated_at.is_empty());
        assert!(store.log_path(&first).exists());
    }

    #[tokio::test]
    async fn unknown_or_malformed_ids_have_no_status() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = JobStore::new(dir.path());
        assert!(store.read_status("../../etc").await.expect("read").is_none());
        assert!(store
            .read_status("0123456789abcdef0123456789abcdef")
            .await
            .expect("read")
            .is_none());
    }

    #[tokio::test]
    async fn invalid_upload_is_rejected() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = JobStore::new(dir.path());
        let id = store.create_job().await.expect("create");
        let uploads = vec![UploadedImage {
            data_base64: "not base64!!".to_string(),
            ..UploadedImage::default()
        }];
        assert!(store.store_uploads(&id, &uploads).await.is_err());
    }

    #[test]
    fn upload_names_are_sanitized() {
        assert_eq!(sanitize_filename_component("../höst rea.png"), ".._h_st_rea.png");
        assert_eq!(sanitize_filename_component(".."), "image");
        assert_eq!(sanitize_filename_component(""), "image");
    }

    #[test]
    fn request_paths_stay_inside_input_root() {
        let root = Path::new("/srv/ads");
        assert_eq!(
            confine_path(root, Path::new("vecka-12/a.png")).expect("relative"),
            PathBuf::from("/srv/ads/vecka-12/a.png")
        );
        assert!(confine_path(root, Path::new("/srv/ads/b.png")).is_ok());
        assert!(confine_path(root, Path::new("/etc/passwd")).is_err());
        assert!(confine_path(root, Path::new("../etc/passwd")).is_err());
        assert!(confine_path(root, Path::new("/srv/ads/../../etc")).is_err());
        assert!(confine_path(root, Path::new("/srv/ads-old/c.png")).is_err());
    }

    #[test]
    fn path_inputs_need_a_configured_root() {
        let request = JobRequest {
            dir: Some("/tmp".to_string()),
            ..JobRequest::default()
        };
        assert!(check_request_paths(&request, None).is_err());
        assert!(check_request_paths(&request, Some(Path::new("/tmp"))).is_ok());
        assert!(check_request_paths(&JobRequest::default(), None).is_ok());
    }

    #[test]
    fn manifest_entries_outside_root_are_refused() {
        let dir = tempfile::tempdir().expect("tempdir");
        let manifest = dir.path().join("ads.json");
        std::fs::write(&manifest, r#"[{"image_path": "/etc/passwd"}]"#).expect("write manifest");
        let request = JobRequest {
            manifest: Some(manifest.display().to_string()),
            ..JobRequest::default()
        };
        let err = collect_records(&request, Some(dir.path())).expect_err("outside root");
        assert!(err.to_string().contains("input_root"));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn job_runs_to_done_with_csv() {
        let dir = tempfile::tempdir().expect("tempdir");
        let state = state(dir.path());
        let id = state.jobs.create_job().await.expect("create");
        let uploads = vec![UploadedImage {
            name: Some("annons.png".to_string()),
            data_base64: png_base64(),
            advertiser: Some("Leksaksboden".to_string()),
            ..UploadedImage::default()
        }];
        let uploaded = state.jobs.store_uploads(&id, &uploads).await.expect("store");
        assert_eq!(uploaded[0].content_type.as_deref(), Some("image/png"));

        run_job(&state, id.clone(), JobRequest::default(), uploaded).await;

        let status = state.jobs.read_status(&id).await.expect("read").expect("status");
        assert_eq!(status.status, JobState::Done);
        assert_eq!(status.rows, Some(1));
        assert_eq!(status.result_url, Some(result_url(&id)));
        let csv = std::fs::read_to_string(state.jobs.result_path(&id)).expect("csv");
        assert!(csv.starts_with("Advertiser,"));
        assert!(csv.contains("Leksaksboden"));
        assert!(csv.contains("Julklappstips"));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn missing_manifest_marks_job_failed() {
        let dir = tempfile::tempdir().expect("tempdir");
        let state = state(dir.path());
        let id = state.jobs.create_job().await.expect("create");
        let request = JobRequest {
            manifest: Some(dir.path().join("saknas.json").display().to_string()),
            ..JobRequest::default()
        };

        run_job(&state, id.clone(), request, Vec::new()).await;

        let status = state.jobs.read_status(&id).await.expect("read").expect("status");
        assert_eq!(status.status, JobState::Error);
        assert!(status.error.expect("error").contains("manifest"));
        let log = std::fs::read_to_string(state.jobs.log_path(&id)).expect("log");
        assert!(log.contains("job failed"));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn unreadable_images_still_produce_result() {
        let dir = tempfile::tempdir().expect("tempdir");
        let state = state(dir.path());
        let id = state.jobs.create_job().await.expect("create");
        let request = JobRequest {
            paths: vec![dir.path().join("saknas.png").display().to_string()],
            ..JobRequest::default()
        };

        run_job(&state, id.clone(), request, Vec::new()).await;

        let status = state.jobs.read_status(&id).await.expect("read").expect("status");
        assert_eq!(status.status, JobState::Done);
        let csv = std::fs::read_to_string(state.jobs.result_path(&id)).expect("csv");
        assert_eq!(csv.lines().count(), 2);
        assert!(csv.lines().nth(1).expect("row").ends_with(",,"));
    }
}
