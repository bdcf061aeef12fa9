//! Notify router: fans one event out to every enabled channel.

use std::sync::Arc;
use std::time::Duration;

use alerts_core::traits::NotifyChannel;
use alerts_core::types::{Audience, ChannelOutcome, DeliveryOutcome, Event};
use futures::future::join_all;
use tracing::{debug, warn};

/// An enabled channel bound to the audience it delivers to.
///
/// Disabled channels never get a route, so the router cannot invoke them.
pub struct ChannelRoute {
    pub channel: Arc<dyn NotifyChannel>,
    pub audience: Audience,
}

impl ChannelRoute {
    pub fn new(channel: Arc<dyn NotifyChannel>, audience: Audience) -> Self {
        Self { channel, audience }
    }

    pub fn name(&self) -> &str {
        self.channel.name()
    }
}

/// Invokes every routed channel concurrently, each under its own timeout.
pub struct NotifyRouter {
    routes: Vec<ChannelRoute>,
    send_timeout: Duration,
}

impl NotifyRouter {
    pub fn new(routes: Vec<ChannelRoute>, send_timeout: Duration) -> Self {
        Self {
            routes,
            send_timeout,
        }
    }

    /// Names of the channels that will be invoked.
    pub fn enabled_channels(&self) -> Vec<&str> {
        self.routes.iter().map(ChannelRoute::name).collect()
    }

    pub fn has_enabled(&self) -> bool {
        !self.routes.is_empty()
    }

    /// Send `event` on every routed channel.
    ///
    /// Never fails as a whole: each channel's error or timeout becomes a
    /// [`DeliveryOutcome::Failed`] in the returned list, in route order.
    pub async fn notify(&self, event: &Event) -> Vec<ChannelOutcome> {
        let sends = self.routes.iter().map(|route| async move {
            let name = route.name().to_string();
            let outcome =
                match tokio::time::timeout(self.send_timeout, route.channel.send(event, &route.audience))
                    .await
                {
                    Ok(Ok(())) => {
                        debug!(event_id = %event.id, channel = %name, audience = %route.audience.name, "delivered");
                        DeliveryOutcome::Delivered
                    }
                    Ok(Err(e)) => {
                        warn!(event_id = %event.id, channel = %name, reason = %e, "channel send failed");
                        DeliveryOutcome::Failed(e.to_string())
                    }
                    Err(_) => {
                        let reason = format!("timed out after {}s", self.send_timeout.as_secs_f64());
                        warn!(event_id = %event.id, channel = %name, reason = %reason, "channel send failed");
                        DeliveryOutcome::Failed(reason)
                    }
                };
            ChannelOutcome {
                channel: name,
                outcome,
            }
        });
        join_all(sends).await
    }
}
