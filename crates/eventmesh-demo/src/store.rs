//! State store that writes snapshots to the log.

use async_trait::async_trait;
use eventmesh_core::error::CoreError;
use eventmesh_core::store::StateStore;
use tracing::info;

/// Logs every snapshot at `info` level instead of persisting it.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogStateStore;

#[async_trait]
impl StateStore for LogStateStore {
    async fn set(
        &self,
        namespace: &str,
        key: &str,
        value: serde_json::Value,
    ) -> Result<(), CoreError> {
        info!(namespace, key, snapshot = %value, "State snapshot");
        Ok(())
    }
}
