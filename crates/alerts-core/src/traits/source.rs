//! Event source trait: where candidate events come from.

use async_trait::async_trait;

use crate::error::Result;
use crate::types::{Event, EventFilter};

/// Yields the current set of candidate events.
///
/// Implementations have no memory of past cycles. Failures should be
/// reported as [`AlertsError::SourceUnavailable`](crate::error::AlertsError::SourceUnavailable).
/// Ordering of the returned events is not significant.
#[async_trait]
pub trait EventSource: Send + Sync {
    fn name(&self) -> &str;

    async fn fetch_candidates(&self, filter: &EventFilter) -> Result<Vec<Event>>;
}
