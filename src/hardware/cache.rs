//! Discovery Cache
//!
//! Holds the most recent discovery result. The map is immutable once
//! published: writers build a new map and swap the `Arc`, readers clone the
//! `Arc` and walk it without holding the lock.
//!
//! ```text
//!   reader ──read lock──▶ clone Arc ──unlock──▶ deep copy
//!   writer ──upgradable read──▶ build new map ──upgrade──▶ swap ──unlock
//! ```
//!
//! Readers never block each other and only wait for the pointer swap.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::{RwLock, RwLockUpgradableReadGuard};

use super::discovery::PhysicalDisk;

/// An immutable published discovery result
#[derive(Debug, Clone, Default)]
pub struct CacheSnapshot {
    /// Device path → disk
    pub devices: HashMap<String, PhysicalDisk>,
    /// Time of the last committed full scan
    pub last_scan_time: Option<DateTime<Utc>>,
}

impl CacheSnapshot {
    /// Find the cache key of a device by node or link.
    pub fn resolve_path(&self, path: &str) -> Option<&str> {
        if let Some((key, _)) = self.devices.get_key_value(path) {
            return Some(key.as_str());
        }
        self.devices
            .iter()
            .find(|(_, disk)| disk.is_known_as(path))
            .map(|(key, _)| key.as_str())
    }
}

/// Keyed store of the latest discovery result
#[derive(Debug, Default)]
pub struct DiscoveryCache {
    current: RwLock<Arc<CacheSnapshot>>,
}

impl DiscoveryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the whole map and the scan time in one swap.
    pub fn replace_all(&self, disks: Vec<PhysicalDisk>, scanned_at: DateTime<Utc>) -> usize {
        let devices: HashMap<String, PhysicalDisk> = disks
            .into_iter()
            .map(|disk| (disk.device_path.clone(), disk))
            .collect();
        let count = devices.len();

        let next = Arc::new(CacheSnapshot {
            devices,
            last_scan_time: Some(scanned_at),
        });
        *self.current.write() = next;
        count
    }

    /// Insert or replace one entry, keeping every other entry and the scan
    /// time. Returns the previous entry.
    pub fn upsert(&self, disk: PhysicalDisk) -> Option<PhysicalDisk> {
        self.modify(|devices| devices.insert(disk.device_path.clone(), disk))
    }

    /// Drop one entry. Returns it if it was present.
    pub fn remove(&self, device_path: &str) -> Option<PhysicalDisk> {
        self.modify(|devices| devices.remove(device_path))
    }

    fn modify<T>(&self, f: impl FnOnce(&mut HashMap<String, PhysicalDisk>) -> T) -> T {
        // Upgradable guards exclude each other, so concurrent writers cannot
        // lose updates while readers keep going.
        let guard = self.current.upgradable_read();
        let mut next = (**guard).clone();
        let result = f(&mut next.devices);

        let mut guard = RwLockUpgradableReadGuard::upgrade(guard);
        *guard = Arc::new(next);
        result
    }

    /// The current published result, shared.
    pub fn current(&self) -> Arc<CacheSnapshot> {
        self.current.read().clone()
    }

    /// Deep copy of the current map.
    pub fn snapshot(&self) -> HashMap<String, PhysicalDisk> {
        self.current().devices.clone()
    }

    /// Copy of one entry, looked up by node or link.
    pub fn get(&self, path: &str) -> Option<PhysicalDisk> {
        let current = self.current();
        let key = current.resolve_path(path)?;
        current.devices.get(key).cloned()
    }

    pub fn last_scan_time(&self) -> Option<DateTime<Utc>> {
        self.current.read().last_scan_time
    }

    pub fn len(&self) -> usize {
        self.current.read().devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
