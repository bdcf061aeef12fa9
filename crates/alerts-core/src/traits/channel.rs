//! Notification channel trait: one implementation per delivery mechanism.

use async_trait::async_trait;

use crate::error::Result;
use crate::types::{Audience, Event};

/// Sends a rendered notification for one event to one audience.
///
/// A channel may retry internally but must resolve within a bounded time.
/// Any `Err` is treated as a terminal failure for this cycle.
#[async_trait]
pub trait NotifyChannel: Send + Sync {
    /// Stable name recorded in `channels_last_used`.
    fn name(&self) -> &str;

    async fn send(&self, event: &Event, audience: &Audience) -> Result<()>;
}
