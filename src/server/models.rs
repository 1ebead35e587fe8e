use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub(crate) struct JobRequest {
    pub(crate) paths: Vec<String>,
    pub(crate) dir: Option<String>,
    pub(crate) manifest: Option<String>,
    pub(crate) images: Vec<UploadedImage>,
    pub(crate) lang: Option<String>,
}

impl JobRequest {
    /// Non-blank filesystem inputs: every path, then dir, then manifest.
    pub(crate) fn path_inputs(&self) -> Vec<&str> {
        self.paths
            .iter()
            .map(String::as_str)
            .chain(self.dir.as_deref())
            .chain(self.manifest.as_deref())
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .collect()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.paths.iter().all(|path| path.trim().is_empty())
            && self.dir.as_deref().is_none_or(|dir| dir.trim().is_empty())
            && self
                .manifest
                .as_deref()
                .is_none_or(|manifest| manifest.trim().is_empty())
            && self.images.is_empty()
    }
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub(crate) struct UploadedImage {
    pub(crate) name: Option<String>,
    pub(crate) data_base64: String,
    pub(crate) advertiser: Option<String>,
    pub(crate) creative_id: Option<String>,
    pub(crate) source_url: Option<String>,
}

#[derive(Debug, Serialize)]
pub(crate) struct JobAccepted {
    pub(crate) job_id: String,
    pub(crate) status_url: String,
    pub(crate) result_url: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub(crate) enum JobState {
    Queued,
    Running,
    Done,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct JobStatus {
    pub(crate) status: JobState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) result_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) rows: Option<usize>,
    #[serde(default)]
    pub(crate) updated_at: String,
}

impl JobStatus {
    pub(crate) fn new(status: JobState) -> Self {
        Self {
            status,
            error: None,
            result_url: None,
            rows: None,
            updated_at: String::new(),
        }
    }

    pub(crate) fn failed(error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            ..Self::new(JobState::Error)
        }
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct ErrorResponse {
    pub(crate) error: String,
}
