use futures_util::stream::{self, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;

use crate::headline::{HeadlineExtractor, Headlines};
use crate::records::{AdRecord, HeadlineRow};
use crate::settings::Settings;

#[derive(Debug, Clone, Copy)]
pub struct BatchOptions {
    pub concurrency: usize,
    pub image_timeout: Duration,
}

impl BatchOptions {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            concurrency: settings.effective_threads(),
            image_timeout: settings.image_timeout,
        }
    }
}

/// Extract headlines for every record, in input order.
///
/// Each image runs on the blocking pool under its own time budget. A budget
/// overrun or a panicked worker counts as a failed extraction. An abandoned
/// call keeps its worker permit until it really returns, so overruns never
/// push the number of live extractions past `concurrency`.
pub async fn run_batch(
    extractor: Arc<HeadlineExtractor>,
    records: Vec<AdRecord>,
    languages: Option<String>,
    options: BatchOptions,
) -> Vec<HeadlineRow> {
    let total = records.len();
    let concurrency = options.concurrency.max(1);
    tracing::info!(total, concurrency, "starting headline batch");

    let permits = Arc::new(Semaphore::new(concurrency));

    let rows: Vec<HeadlineRow> = stream::iter(records)
        .map(|record| {
            let extractor = extractor.clone();
            let languages = languages.clone();
            let permits = permits.clone();
            async move {
                let Ok(permit) = permits.acquire_owned().await else {
                    return HeadlineRow::new(record, Headlines::default());
                };
                let path = record.image_path.clone();
                let task = tokio::task::spawn_blocking(move || {
                    let _permit = permit;
                    extractor.extract_headlines(&path, languages.as_deref())
                });
                let headlines = match tokio::time::timeout(options.image_timeout, task).await {
                    Ok(Ok(headlines)) => headlines,
                    Ok(Err(err)) => {
                        tracing::warn!(
                            path = %record.image_path.display(),
                            "extraction task failed: {err}"
                        );
                        Headlines::default()
                    }
                    Err(_) => {
                        tracing::warn!(
                            path = %record.image_path.display(),
                            timeout_secs = options.image_timeout.as_secs_f32(),
                            "extraction timed out"
                        );
                        Headlines::default()
                    }
                };
                HeadlineRow::new(record, headlines)
            }
        })
        .buffered(concurrency)
        .collect()
        .await;

    let found = rows.iter().filter(|row| row.h1.is_some()).count();
    tracing::info!(total, found, "headline batch finished");
    rows
}
