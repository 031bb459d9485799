//! Application state for the HTTP server.

use std::sync::Arc;

use crate::config::Settings;
use crate::db::repository::FullRepository;
use crate::services::JobTracker;

/// Shared application state passed to all handlers.
#[derive(Clone)]
pub struct AppState {
    /// Repository instance for database operations
    pub repository: Arc<dyn FullRepository>,
    /// Background ingestion jobs and their logs
    pub job_tracker: JobTracker,
    pub settings: Arc<Settings>,
}

impl AppState {
    /// Create a new application state with the given repository and settings.
    pub fn new(repository: Arc<dyn FullRepository>, settings: Settings) -> Self {
        Self {
            repository,
            job_tracker: JobTracker::new(),
            settings: Arc::new(settings),
        }
    }
}
