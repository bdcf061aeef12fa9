//! # Alerts Channels
//!
//! Notification channels for events-alerts:
//! - `email`: SMTP to the internal recipient list, logos inline
//! - `teams_email`: same SMTP transport, addressed to a Teams channel mailbox
//! - `teams_webhook`: MessageCard posted to a Teams incoming webhook

pub mod email;
pub mod logo;
pub mod render;
pub mod retry;
pub mod teams;

pub use email::{EmailChannel, SmtpMailer};
pub use logo::LogoSet;
pub use render::MessageRenderer;
pub use retry::RetryPolicy;
pub use teams::TeamsWebhookChannel;
