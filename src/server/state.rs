use std::sync::Arc;

use crate::headline::HeadlineExtractor;
use crate::settings;

use super::jobs::JobStore;

#[derive(Clone)]
pub(crate) struct ServerState {
    pub(crate) settings: settings::Settings,
    pub(crate) extractor: Arc<HeadlineExtractor>,
    pub(crate) jobs: JobStore,
}
