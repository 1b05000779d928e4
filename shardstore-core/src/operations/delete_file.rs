use crate::{MetadataError, MetadataService, Result, RetryPolicy, StoreError};
use std::sync::Arc;

#[derive(Clone)]
pub struct DeleteFileOperation {
    metadata: Arc<dyn MetadataService>,
    retry: RetryPolicy,
}

#[derive(Debug, Clone)]
pub struct DeleteFileOperationRequest {
    pub filename: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteFileOperationOutcome {
    Deleted { version: u64 },
    NotFound,
}

impl DeleteFileOperation {
    pub fn new(metadata: Arc<dyn MetadataService>, retry: RetryPolicy) -> Self {
        Self { metadata, retry }
    }

    pub async fn run(
        &self,
        request: DeleteFileOperationRequest,
    ) -> Result<DeleteFileOperationOutcome> {
        let DeleteFileOperationRequest { filename } = request;

        let mut current = self.metadata.read_file(&filename).await?.version;
        if current == 0 {
            return Ok(DeleteFileOperationOutcome::NotFound);
        }

        let mut conflicts = 0u32;
        for _ in 0..self.retry.max_attempts {
            match self.metadata.delete_file(&filename, current + 1).await {
                Ok(version) => {
                    tracing::info!("Deleted {} at v{}", filename, version);
                    return Ok(DeleteFileOperationOutcome::Deleted { version });
                }
                Err(StoreError::Rejected(MetadataError::WrongVersion { current: latest })) => {
                    tracing::debug!(
                        "Delete of {} raced a writer: expected v{}, store has v{}",
                        filename,
                        current,
                        latest
                    );
                    current = latest;
                    conflicts += 1;
                    self.retry.wait(conflicts).await;
                }
                Err(StoreError::Rejected(MetadataError::FileNotFound)) => {
                    return Ok(DeleteFileOperationOutcome::NotFound);
                }
                Err(error) => return Err(error),
            }
        }

        tracing::warn!(
            "Delete of {} gave up after {} attempts",
            filename,
            self.retry.max_attempts
        );
        Err(StoreError::RetriesExhausted {
            operation: "delete",
            filename,
            attempts: self.retry.max_attempts,
        })
    }
}
