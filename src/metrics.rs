//! Service counters.
//! Plain atomics plus per-format occupancy, read through [`Metrics::snapshot`].
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};

use serde::Serialize;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FormatCounter {
    pub entries: u64,
    pub exits: u64,
    pub currently_active: u64,
    pub concurrent_peak: u64,
}

#[derive(Debug, Default)]
pub struct Metrics {
    instances_created: AtomicU64,
    instances_recycled: AtomicU64,
    instances_erased: AtomicU64,
    fan_outs_fired: AtomicU64,
    fan_outs_suppressed: AtomicU64,
    keys_dropped: AtomicU64,
    keys_collected: AtomicU64,
    formats: Mutex<HashMap<String, FormatCounter>>,
}

#[derive(Debug, Default, Clone, Serialize)]
pub struct Snapshot {
    pub instances_created: u64,
    pub instances_recycled: u64,
    pub instances_erased: u64,
    pub fan_outs_fired: u64,
    pub fan_outs_suppressed: u64,
    pub keys_dropped: u64,
    pub keys_collected: u64,
    pub formats: HashMap<String, FormatCounter>,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn instance_created(&self) {
        self.instances_created.fetch_add(1, Ordering::Relaxed);
    }

    pub fn instance_recycled(&self) {
        self.instances_recycled.fetch_add(1, Ordering::Relaxed);
    }

    pub fn instance_erased(&self) {
        self.instances_erased.fetch_add(1, Ordering::Relaxed);
    }

    pub fn fan_out_fired(&self) {
        self.fan_outs_fired.fetch_add(1, Ordering::Relaxed);
    }

    pub fn fan_out_suppressed(&self) {
        self.fan_outs_suppressed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn key_dropped(&self) {
        self.keys_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn key_collected(&self) {
        self.keys_collected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_entry(&self, format: &str) -> FormatCounter {
        let mut guard = self.formats.lock().unwrap_or_else(PoisonError::into_inner);
        let counter = guard.entry(format.to_string()).or_default();
        counter.entries = counter.entries.saturating_add(1);
        counter.currently_active = counter.currently_active.saturating_add(1);
        if counter.currently_active > counter.concurrent_peak {
            counter.concurrent_peak = counter.currently_active;
        }
        *counter
    }

    pub fn record_exit(&self, format: &str) -> FormatCounter {
        let mut guard = self.formats.lock().unwrap_or_else(PoisonError::into_inner);
        let counter = guard.entry(format.to_string()).or_default();
        counter.exits = counter.exits.saturating_add(1);
        counter.currently_active = counter.currently_active.saturating_sub(1);
        *counter
    }

    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            instances_created: self.instances_created.load(Ordering::Relaxed),
            instances_recycled: self.instances_recycled.load(Ordering::Relaxed),
            instances_erased: self.instances_erased.load(Ordering::Relaxed),
            fan_outs_fired: self.fan_outs_fired.load(Ordering::Relaxed),
            fan_outs_suppressed: self.fan_outs_suppressed.load(Ordering::Relaxed),
            keys_dropped: self.keys_dropped.load(Ordering::Relaxed),
            keys_collected: self.keys_collected.load(Ordering::Relaxed),
            formats: self
                .formats
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clone(),
        }
    }
}
