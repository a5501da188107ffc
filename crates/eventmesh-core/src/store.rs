//! External state store abstraction.
//!
//! The event infrastructure pushes observability snapshots into a store
//! owned by the host application. Snapshots are never read back.

use async_trait::async_trait;

use crate::error::CoreError;

/// Write-only namespaced key/value sink.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Stores `value` under `namespace`/`key`, replacing any previous value.
    async fn set(
        &self,
        namespace: &str,
        key: &str,
        value: serde_json::Value,
    ) -> Result<(), CoreError>;
}
