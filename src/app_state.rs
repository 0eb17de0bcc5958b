use std::sync::Arc;

use crate::services::{queue::TaskQueue, records::RecordStore, submitter::Submitter};

/// Shared gateway state passed to all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub submitter: Arc<Submitter>,
    pub records: Arc<dyn RecordStore>,
    pub queue: Arc<dyn TaskQueue>,
}

impl AppState {
    pub fn new(
        submitter: Submitter,
        records: Arc<dyn RecordStore>,
        queue: Arc<dyn TaskQueue>,
    ) -> Self {
        Self {
            submitter: Arc::new(submitter),
            records,
            queue,
        }
    }
}
