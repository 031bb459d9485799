//! Ingestion history repository trait.

use async_trait::async_trait;

use super::error::RepositoryResult;
use crate::api::{IngestionRecord, IngestionStatus};

#[async_trait]
pub trait IngestionRepository: Send + Sync {
    /// Open a RUNNING history row.
    async fn start_ingestion(
        &self,
        pipeline_name: &str,
        file_checksum: Option<&str>,
    ) -> RepositoryResult<IngestionRecord>;

    /// Close a history row with its final status and summary.
    async fn finish_ingestion(
        &self,
        ingestion_id: i64,
        status: IngestionStatus,
        summary: serde_json::Value,
    ) -> RepositoryResult<IngestionRecord>;

    /// History rows, newest first.
    async fn list_ingestions(&self, limit: usize) -> RepositoryResult<Vec<IngestionRecord>>;
}
