use async_trait::async_trait;

use crate::domain::models::CanonicalEvent;

/// External executor for matched triggers.
///
/// Invoked once per (owner, trigger, event) match. An error marks the
/// execution job's attempt as failed and subjects it to retry.
#[async_trait]
pub trait ExecutionSink: Send + Sync {
    async fn execute(&self, owner_id: &str, trigger_id: &str, event: &CanonicalEvent) -> anyhow::Result<()>;
}
