//! Trait seams between the core pipeline and its I/O collaborators.

pub mod channel;
pub mod source;

pub use channel::NotifyChannel;
pub use source::EventSource;
