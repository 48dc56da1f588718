use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;

use crate::db::ResultRepository;
use crate::services::{queue::JobPublisher, status::StatusReader, submission::JobSubmitter};

/// Shared application state passed to all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub repository: Arc<dyn ResultRepository>,
    pub publisher: Arc<dyn JobPublisher>,
    pub submitter: Arc<JobSubmitter>,
    pub status: Arc<StatusReader>,
    pub metrics: Option<Arc<PrometheusHandle>>,
}

impl AppState {
    pub fn new(
        repository: Arc<dyn ResultRepository>,
        publisher: Arc<dyn JobPublisher>,
        write_pending: bool,
    ) -> Self {
        let submitter = JobSubmitter::new(publisher.clone(), repository.clone(), write_pending);
        let status = StatusReader::new(repository.clone());
        Self {
            repository,
            publisher,
            submitter: Arc::new(submitter),
            status: Arc::new(status),
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics = Some(Arc::new(handle));
        self
    }
}
