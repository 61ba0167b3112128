//! Optional observer for item mutations.

use async_trait::async_trait;
use std::fmt;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Added,
    Updated,
    Deleted,
}

impl Method {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Method::Added => "added",
            Method::Updated => "updated",
            Method::Deleted => "deleted",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricsEvent {
    pub method: Method,
    pub item_id: String,
    /// Comma-joined names of the fields an update touched.
    pub changed_fields: Option<String>,
}

#[async_trait]
pub trait MetricsHook: Send + Sync {
    async fn record(&self, event: MetricsEvent) -> Result<(), Box<dyn std::error::Error + Send + Sync>>;
}

/// Runs the hook, swallowing its failure.
pub(crate) async fn report(hook: Option<&dyn MetricsHook>, event: MetricsEvent) {
    let Some(hook) = hook else {
        return;
    };
    let method = event.method;
    let item_id = event.item_id.clone();
    match hook.record(event).await {
        Ok(()) => debug!(%method, %item_id, "metrics event recorded"),
        Err(e) => warn!(%method, %item_id, "metrics hook failed: {}", e),
    }
}
