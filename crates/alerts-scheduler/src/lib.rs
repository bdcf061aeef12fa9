//! # Alerts Scheduler
//!
//! Polling and deduplication pipeline for event notifications.
//!
//! ## Design
//! - File-based fingerprint store (JSON), rewritten atomically once per cycle
//! - One cycle at a time; tokio timers between cycles
//! - Every enabled channel is tried for a due event; one success is enough
//!
//! ## Architecture
//! ```text
//! SchedulerEngine (every SCHEDULE_FREQUENCY hours)
//!   ├── EventSource::fetch_candidates(filter)
//!   ├── FingerprintStore::load()
//!   ├── DispatchCoordinator
//!   │     ├── is_due(record, now, reminder)? ── no ──> skip
//!   │     └── NotifyRouter (concurrent, per-channel timeout)
//!   │           ├── email
//!   │           ├── teams_email
//!   │           └── teams_webhook
//!   │         ≥1 delivered → record_notification
//!   │         0 delivered  → dead letter log, stays due
//!   └── FingerprintStore::save()
//! ```

pub mod dispatch;
pub mod engine;
pub mod notify;
pub mod store;

pub use dispatch::{CycleReport, DispatchCoordinator};
pub use engine::{SchedulerEngine, next_sleep};
pub use notify::{ChannelRoute, NotifyRouter};
pub use store::{
    FingerprintMap, FingerprintRecord, FingerprintStore, is_due, prune_cutoff, prune_records,
    record_notification,
};
