//! Dispatch coordinator: per-event notify/skip decisions for one cycle.

use std::collections::BTreeSet;

use alerts_core::types::{DeliveryOutcome, Event, sort_for_dispatch};
use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::notify::NotifyRouter;
use crate::store::{FingerprintMap, is_due, record_notification};

/// Counters for one cycle, logged by the engine as a summary line.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub candidates: usize,
    pub skipped_not_due: usize,
    pub notified: usize,
    pub failed: usize,
    pub would_notify: usize,
    /// Shutdown was requested before every candidate was considered.
    pub interrupted: bool,
}

impl std::fmt::Display for CycleReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} candidate(s): {} notified, {} failed, {} not yet due",
            self.candidates, self.notified, self.failed, self.skipped_not_due
        )?;
        if self.would_notify > 0 {
            write!(f, ", {} would notify (dry run)", self.would_notify)?;
        }
        if self.interrupted {
            write!(f, " [interrupted]")?;
        }
        Ok(())
    }
}

pub struct DispatchCoordinator {
    router: NotifyRouter,
    reminder_interval: chrono::Duration,
    dry_run: bool,
}

impl DispatchCoordinator {
    pub fn new(router: NotifyRouter, reminder_interval: chrono::Duration) -> Self {
        Self {
            router,
            reminder_interval,
            dry_run: false,
        }
    }

    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn is_dry_run(&self) -> bool {
        self.dry_run
    }

    pub fn router(&self) -> &NotifyRouter {
        &self.router
    }

    /// Walk the candidates in dispatch order and notify the due ones.
    ///
    /// Mutates `map` in memory only; persisting it is the caller's job.
    /// `cancel` is checked between events, never during a send.
    pub async fn dispatch(
        &self,
        events: Vec<Event>,
        map: &mut FingerprintMap,
        now: DateTime<Utc>,
        cancel: &CancellationToken,
    ) -> CycleReport {
        let events = sort_for_dispatch(events);
        let mut report = CycleReport {
            candidates: events.len(),
            ..Default::default()
        };

        let can_send = self.router.has_enabled();
        if !can_send && !self.dry_run && !events.is_empty() {
            warn!("no notification channels are enabled; due events stay pending");
        }

        for event in &events {
            if cancel.is_cancelled() {
                info!("shutdown requested, stopping dispatch early");
                report.interrupted = true;
                break;
            }

            if !is_due(map.get(&event.id), now, self.reminder_interval) {
                debug!(event_id = %event.id, "not due yet, skipping");
                report.skipped_not_due += 1;
                continue;
            }

            if self.dry_run {
                info!(
                    event_id = %event.id,
                    channels = ?self.router.enabled_channels(),
                    "dry run: would notify \"{}\"", event.name
                );
                report.would_notify += 1;
                continue;
            }

            if !can_send {
                report.failed += 1;
                continue;
            }

            let outcomes = self.router.notify(event).await;
            let succeeded: BTreeSet<String> = outcomes
                .iter()
                .filter(|o| o.outcome.is_delivered())
                .map(|o| o.channel.clone())
                .collect();

            if succeeded.is_empty() {
                let reasons: Vec<String> = outcomes
                    .iter()
                    .filter_map(|o| match &o.outcome {
                        DeliveryOutcome::Failed(reason) => Some(format!("{}: {reason}", o.channel)),
                        DeliveryOutcome::Delivered => None,
                    })
                    .collect();
                error!(
                    target: "alerts::dead_letter",
                    event_id = %event.id,
                    event_name = %event.name,
                    reasons = %reasons.join("; "),
                    "all channels failed; event stays due"
                );
                report.failed += 1;
                continue;
            }

            let record = record_notification(map, &event.id, now, succeeded);
            info!(
                event_id = %event.id,
                notify_count = record.notify_count,
                channels = ?record.channels_last_used,
                "notified \"{}\"", event.name
            );
            report.notified += 1;
        }

        report
    }
}
