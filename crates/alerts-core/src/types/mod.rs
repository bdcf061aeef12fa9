//! Shared data types.

pub mod event;
pub mod notification;

pub use event::{Event, EventFilter, sort_for_dispatch};
pub use notification::{Audience, ChannelOutcome, DeliveryOutcome};
