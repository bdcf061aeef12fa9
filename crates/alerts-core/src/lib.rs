//! # Alerts Core
//!
//! Shared vocabulary for the events-alerts workspace: the error taxonomy,
//! configuration, event and audience types, and the two trait seams the
//! polling pipeline talks through ([`EventSource`] and [`NotifyChannel`]).

pub mod config;
pub mod error;
pub mod secrets;
pub mod traits;
pub mod types;

pub use config::AlertsConfig;
pub use error::{AlertsError, Result};
pub use traits::{EventSource, NotifyChannel};
pub use types::{Audience, ChannelOutcome, DeliveryOutcome, Event, EventFilter};
