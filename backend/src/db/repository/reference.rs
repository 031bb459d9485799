//! Variables, sources and runs.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::error::RepositoryResult;
use crate::api::{Run, Source, Variable};

#[async_trait]
pub trait ReferenceRepository: Send + Sync {
    /// List variables ordered by label.
    async fn list_variables(&self) -> RepositoryResult<Vec<Variable>>;

    async fn get_variable(&self, code: &str) -> RepositoryResult<Option<Variable>>;

    /// List sources ordered by code.
    async fn list_sources(&self) -> RepositoryResult<Vec<Source>>;

    async fn get_source(&self, code: &str) -> RepositoryResult<Option<Source>>;

    /// Return the run labelled `label` for `source_code`, creating it with
    /// `run_time` when missing.
    ///
    /// # Returns
    /// * `Err(RepositoryError::NotFound)` - If the source doesn't exist
    async fn get_or_create_run(
        &self,
        source_code: &str,
        label: &str,
        run_time: DateTime<Utc>,
    ) -> RepositoryResult<Run>;

    /// Distinct run times of a source, newest first.
    async fn list_run_times(
        &self,
        source_code: &str,
        limit: usize,
    ) -> RepositoryResult<Vec<DateTime<Utc>>>;
}
