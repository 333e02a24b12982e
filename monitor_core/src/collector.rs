//! The collection capability a monitor implements, per Design Note §9: a
//! monitor's other behaviors (interval alignment, process-snapshot pulls)
//! are plain fields read off its descriptor rather than separate traits,
//! since the descriptor already carries that data and every monitor needs
//! both.

use async_trait::async_trait;

use crate::model::{Datapoint, MonitorDescriptor};

/// Result of a single collection attempt. A failure is a skipped tick, never
/// a crash: the kernel logs it and leaves all counters/buffers untouched.
pub type CollectResult = std::result::Result<Datapoint, CollectError>;

#[derive(Debug, thiserror::Error)]
pub enum CollectError {
    #[error("collection failed: {0}")]
    Failed(String),
}

/// The one capability every monitor must provide: produce a datapoint on
/// demand. Implementations may shell out, read `/proc`, query `sysinfo`, or
/// run a declarative `.mon` command; the kernel does not care which.
#[async_trait]
pub trait Collector: Send + Sync {
    fn descriptor(&self) -> &MonitorDescriptor;

    async fn collect(&self) -> CollectResult;

    /// Additional context to attach to an alert for `source`, beyond the
    /// observation itself (e.g. total/used/free for a usage source). Returns
    /// `None` by default; built-ins that want richer alert payloads override it.
    async fn extra_alert_data(
        &self,
        _source: &str,
    ) -> Option<serde_json::Map<String, serde_json::Value>> {
        None
    }
}
