//! Fingerprint store: which events were notified, when, and on what channels.
//!
//! File layout: a JSON object keyed by event id.
//! ```json
//! {
//!   "101": {
//!     "first_notified_at": "2025-10-29T07:00:00Z",
//!     "last_notified_at": "2025-11-01T07:00:00Z",
//!     "notify_count": 2,
//!     "channels_last_used": ["email"]
//!   }
//! }
//! ```
//! The file may be hand-edited or deleted between runs. A missing or corrupt
//! file loads as an empty store, which means every matching event is sent
//! again on the next cycle.

use std::collections::{BTreeMap, BTreeSet};
use std::io::Write;
use std::path::{Path, PathBuf};

use alerts_core::error::{AlertsError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

/// In-memory view of the store, keyed by event id.
pub type FingerprintMap = BTreeMap<String, FingerprintRecord>;

/// Notification history for one event.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FingerprintRecord {
    /// Filled from the map key on load; not persisted inside the value.
    #[serde(skip)]
    pub event_id: String,
    pub first_notified_at: DateTime<Utc>,
    pub last_notified_at: DateTime<Utc>,
    pub notify_count: u32,
    #[serde(default)]
    pub channels_last_used: BTreeSet<String>,
}

impl FingerprintRecord {
    fn first(event_id: &str, now: DateTime<Utc>, channels: BTreeSet<String>) -> Self {
        Self {
            event_id: event_id.to_string(),
            first_notified_at: now,
            last_notified_at: now,
            notify_count: 1,
            channels_last_used: channels,
        }
    }

    /// Repair values a hand edit may have broken.
    fn normalize(&mut self) {
        if self.first_notified_at > self.last_notified_at {
            self.first_notified_at = self.last_notified_at;
        }
        if self.notify_count == 0 {
            self.notify_count = 1;
        }
    }
}

/// True when the event has never been notified, or its last notification
/// is at least `reminder_interval` old. The boundary is inclusive.
pub fn is_due(
    record: Option<&FingerprintRecord>,
    now: DateTime<Utc>,
    reminder_interval: chrono::Duration,
) -> bool {
    match record {
        None => true,
        Some(r) => now - r.last_notified_at >= reminder_interval,
    }
}

/// Create or advance the record for `event_id`. Call once per cycle per
/// delivered event, with the channels that actually succeeded.
pub fn record_notification(
    map: &mut FingerprintMap,
    event_id: &str,
    now: DateTime<Utc>,
    channels: BTreeSet<String>,
) -> FingerprintRecord {
    let record = map
        .entry(event_id.to_string())
        .and_modify(|r| {
            r.first_notified_at = r.first_notified_at.min(now);
            r.last_notified_at = now;
            r.notify_count = r.notify_count.saturating_add(1);
            r.channels_last_used = channels.clone();
        })
        .or_insert_with(|| FingerprintRecord::first(event_id, now, channels));
    record.clone()
}

/// Remove records whose last notification is before `cutoff`.
/// `now - older_than`, or `None` when that instant is out of range.
pub fn prune_cutoff(now: DateTime<Utc>, older_than: chrono::Duration) -> Option<DateTime<Utc>> {
    now.checked_sub_signed(older_than)
}

pub fn prune_records(map: &mut FingerprintMap, cutoff: DateTime<Utc>) -> usize {
    let before = map.len();
    map.retain(|_, r| r.last_notified_at >= cutoff);
    before - map.len()
}

/// File-backed fingerprint store.
#[derive(Debug, Clone)]
pub struct FingerprintStore {
    path: PathBuf,
}

impl FingerprintStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the store, degrading to empty on a missing or unreadable file.
    pub fn load(&self) -> FingerprintMap {
        match self.try_load() {
            Ok(map) => map,
            Err(e) => {
                warn!("{e}; continuing with an empty store (matching events will be re-sent)");
                FingerprintMap::new()
            }
        }
    }

    /// Load the store, reporting corruption as [`AlertsError::StoreReadCorrupt`].
    pub fn try_load(&self) -> Result<FingerprintMap> {
        let bytes = match std::fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!("no fingerprint store at {}, starting empty", self.path.display());
                return Ok(FingerprintMap::new());
            }
            Err(e) => {
                return Err(AlertsError::StoreReadCorrupt(format!(
                    "cannot read {}: {e}",
                    self.path.display()
                )));
            }
        };

        let map = parse_store(&bytes, Utc::now())?;
        debug!("loaded {} fingerprint(s) from {}", map.len(), self.path.display());
        Ok(map)
    }

    /// Persist the whole map: write a temp file next to the target, then
    /// rename over it. A crash mid-write leaves the previous file intact.
    pub fn save(&self, map: &FingerprintMap) -> Result<()> {
        let parent = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        std::fs::create_dir_all(parent).map_err(|e| {
            AlertsError::store_write(format!("cannot create {}: {e}", parent.display()))
        })?;

        let json = serde_json::to_vec_pretty(map)
            .map_err(|e| AlertsError::store_write(format!("cannot serialize store: {e}")))?;

        let mut tmp = tempfile::NamedTempFile::new_in(parent)
            .map_err(|e| AlertsError::store_write(format!("cannot create temp file: {e}")))?;
        tmp.write_all(&json)
            .and_then(|_| tmp.as_file().sync_all())
            .map_err(|e| AlertsError::store_write(format!("cannot write temp file: {e}")))?;
        tmp.persist(&self.path).map_err(|e| {
            AlertsError::store_write(format!("cannot replace {}: {}", self.path.display(), e.error))
        })?;

        debug!("saved {} fingerprint(s) to {}", map.len(), self.path.display());
        Ok(())
    }

    /// Drop records not notified within `older_than` of `now`.
    ///
    /// Runs independently of dispatch; the file is rewritten only when
    /// something was removed.
    pub fn prune(&self, older_than: chrono::Duration, now: DateTime<Utc>) -> Result<usize> {
        let Some(cutoff) = prune_cutoff(now, older_than) else {
            debug!("retention of {} day(s) predates any record, nothing to prune", older_than.num_days());
            return Ok(0);
        };
        let mut map = self.try_load()?;
        let removed = prune_records(&mut map, cutoff);
        if removed > 0 {
            self.save(&map)?;
            info!("pruned {removed} fingerprint(s) older than {} day(s)", older_than.num_days());
        }
        Ok(removed)
    }
}

/// Parse store bytes, migrating the layouts written by earlier versions.
fn parse_store(bytes: &[u8], now: DateTime<Utc>) -> Result<FingerprintMap> {
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Ok(FingerprintMap::new());
    }

    let value: Value = serde_json::from_slice(bytes)
        .map_err(|e| AlertsError::StoreReadCorrupt(format!("invalid JSON: {e}")))?;
    let Value::Object(obj) = value else {
        return Err(AlertsError::StoreReadCorrupt("top level is not an object".into()));
    };

    // {"sent_events": {"101": "<ts>"}, "last_updated": ...}
    if let Some(Value::Object(sent)) = obj.get("sent_events") {
        if sent.values().all(Value::is_string) {
            info!("migrating {} entries from legacy sent_events layout", sent.len());
            let mut map = FingerprintMap::new();
            for (id, ts) in sent {
                match ts.as_str().and_then(parse_timestamp) {
                    Some(at) => {
                        map.insert(id.clone(), FingerprintRecord::first(id, at, BTreeSet::new()));
                    }
                    None => warn!(event_id = %id, "skipping legacy entry with unparseable timestamp"),
                }
            }
            return Ok(map);
        }
    }

    // {"sent_event_ids": [101, 102], "last_updated": "<ts>"}
    if let Some(Value::Array(ids)) = obj.get("sent_event_ids") {
        let at = obj
            .get("last_updated")
            .and_then(Value::as_str)
            .and_then(parse_timestamp)
            .unwrap_or(now);
        info!("migrating {} entries from legacy sent_event_ids layout", ids.len());
        return Ok(ids
            .iter()
            .filter_map(legacy_id)
            .map(|id| {
                let record = FingerprintRecord::first(&id, at, BTreeSet::new());
                (id, record)
            })
            .collect());
    }

    let mut map = FingerprintMap::new();
    for (id, entry) in obj {
        match serde_json::from_value::<FingerprintRecord>(entry) {
            Ok(mut record) => {
                record.event_id = id.clone();
                record.normalize();
                map.insert(id, record);
            }
            Err(e) => warn!(event_id = %id, "skipping malformed fingerprint entry: {e}"),
        }
    }
    Ok(map)
}

fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|d| d.with_timezone(&Utc))
}

fn legacy_id(v: &Value) -> Option<String> {
    match v {
        Value::Number(n) => Some(n.to_string()),
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        _ => None,
    }
}
