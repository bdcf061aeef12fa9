//! Audience and delivery outcome types.

use serde::{Deserialize, Serialize};

/// Who a channel delivers to.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Audience {
    /// Label used in logs (e.g. "internal", "teams-channel").
    pub name: String,
    /// Addresses for mail-like channels; empty for webhooks.
    #[serde(default)]
    pub recipients: Vec<String>,
}

impl Audience {
    pub fn new(name: impl Into<String>, recipients: Vec<String>) -> Self {
        Self {
            name: name.into(),
            recipients,
        }
    }

    /// Audience for channels whose endpoint is the audience (webhooks).
    pub fn endpoint(name: impl Into<String>) -> Self {
        Self::new(name, vec![])
    }
}

/// Result of one channel call for one event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Delivered,
    Failed(String),
}

impl DeliveryOutcome {
    pub fn is_delivered(&self) -> bool {
        matches!(self, Self::Delivered)
    }
}

impl std::fmt::Display for DeliveryOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeliveryOutcome::Delivered => write!(f, "delivered"),
            DeliveryOutcome::Failed(reason) => write!(f, "failed: {reason}"),
        }
    }
}

/// Per-channel outcome as reported by the router.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelOutcome {
    pub channel: String,
    pub outcome: DeliveryOutcome,
}
