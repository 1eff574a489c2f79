use async_trait::async_trait;

use crate::domain::models::Job;

/// Executes jobs of one kind.
///
/// Returning an error (or panicking) counts as a failed attempt; the queue
/// decides whether to retry.
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn handle(&self, job: &Job) -> anyhow::Result<()>;
}
