//! Per-factory bookkeeping of open devices.
//!
//! Every factory (the native registry, each expander) keeps one
//! [`DeviceStates`] map. A key is claimed with [`DeviceStates::reserve`]
//! before any hardware is touched, so two racing provisioning requests for
//! the same key can never both reach the backend. The map lock is only held
//! for the claim itself; register I/O happens outside it.
//!
//! Once a factory starts shutting down the map is sealed: new claims fail,
//! and a provisioning that claimed its key before the seal cannot publish it.

use crate::error::{Error, Result};
use common::ResourceKey;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

/// Identity of one successful provisioning of a key.
///
/// A handle remembers the id it was opened with so that it can never close a
/// later record for the same key.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RecordId(u64);

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum DeviceState {
    /// Claimed, hardware not configured yet.
    Provisioning,
    Open,
    /// Being torn down. The key stays claimed until teardown finishes.
    Closing,
}

#[derive(Debug, Clone)]
pub struct DeviceRecord<T> {
    pub key: ResourceKey,
    pub id: RecordId,
    pub state: DeviceState,
    /// Factory-specific teardown information. `None` while provisioning.
    pub detail: Option<T>,
}

#[derive(Debug)]
pub struct DeviceStates<T> {
    records: spin::Mutex<BTreeMap<ResourceKey, DeviceRecord<T>>>,
    next_id: AtomicU64,
    /// Only changed with `records` locked.
    sealed: AtomicBool,
}

impl<T> Default for DeviceStates<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> DeviceStates<T> {
    pub const fn new() -> Self {
        Self {
            records: spin::Mutex::new(BTreeMap::new()),
            next_id: AtomicU64::new(1),
            sealed: AtomicBool::new(false),
        }
    }

    /// Claim `key`, failing with `AlreadyOpen` if any record holds it.
    ///
    /// Dropping the reservation without committing releases the key.
    pub fn reserve(&self, key: &ResourceKey) -> Result<Reservation<'_, T>> {
        let mut records = self.records.lock();
        if self.sealed.load(Ordering::Acquire) {
            return Err(Error::Fatal(format!("cannot provision {key}, factory is shut down")));
        }
        if records.contains_key(key) {
            return Err(Error::AlreadyOpen(key.clone()));
        }
        let id = RecordId(self.next_id.fetch_add(1, Ordering::Relaxed));
        records.insert(
            key.clone(),
            DeviceRecord {
                key: key.clone(),
                id,
                state: DeviceState::Provisioning,
                detail: None,
            },
        );
        Ok(Reservation {
            states: self,
            key: key.clone(),
            id,
            committed: false,
        })
    }

    pub fn is_open(&self, key: &ResourceKey) -> bool {
        self.records
            .lock()
            .get(key)
            .is_some_and(|r| r.state == DeviceState::Open)
    }

    /// Keys of every open record.
    pub fn open_keys(&self) -> Vec<ResourceKey> {
        self.records
            .lock()
            .values()
            .filter(|r| r.state == DeviceState::Open)
            .map(|r| r.key.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }

    /// Wait for claims made before the seal to be committed or released.
    ///
    /// Only meaningful once sealed, when nothing can add a record.
    pub fn wait_until_empty(&self) {
        let mut spins = 0;
        while !self.is_empty() {
            if spins < 64 {
                spins += 1;
                std::thread::yield_now();
            } else {
                std::thread::sleep(Duration::from_millis(1));
            }
        }
    }

    pub fn is_sealed(&self) -> bool {
        self.sealed.load(Ordering::Acquire)
    }

    /// Move the record opened as `id` from open to closing.
    ///
    /// Returns its detail if this caller won the right to tear it down, or
    /// `None` if it was already closed or belongs to another provisioning.
    pub fn begin_close(&self, key: &ResourceKey, id: RecordId) -> Option<T>
    where
        T: Clone,
    {
        let mut records = self.records.lock();
        let record = records.get_mut(key)?;
        if record.id != id || record.state != DeviceState::Open {
            return None;
        }
        record.state = DeviceState::Closing;
        record.detail.clone()
    }

    /// Seal the map and move every open record to closing.
    ///
    /// Records still being provisioned are left to their owners, whose
    /// [`Reservation::commit`] will now fail.
    pub fn begin_close_all(&self) -> Vec<(ResourceKey, RecordId, T)>
    where
        T: Clone,
    {
        let mut records = self.records.lock();
        self.sealed.store(true, Ordering::Release);
        records
            .values_mut()
            .filter(|r| r.state == DeviceState::Open)
            .filter_map(|r| {
                r.state = DeviceState::Closing;
                r.detail.clone().map(|d| (r.key.clone(), r.id, d))
            })
            .collect()
    }

    /// Drop the record, freeing the key for the next provisioning.
    pub fn finish_close(&self, key: &ResourceKey, id: RecordId) {
        let mut records = self.records.lock();
        if records.get(key).is_some_and(|r| r.id == id) {
            records.remove(key);
        }
    }
}

/// A claimed key that has not been published as open yet.
pub struct Reservation<'a, T> {
    states: &'a DeviceStates<T>,
    key: ResourceKey,
    id: RecordId,
    committed: bool,
}

impl<T> Reservation<'_, T> {
    pub fn key(&self) -> &ResourceKey {
        &self.key
    }

    pub fn id(&self) -> RecordId {
        self.id
    }

    /// Publish the record as open.
    ///
    /// Fails if the factory was shut down since the key was claimed. The key
    /// is released and the caller has to undo its hardware setup.
    pub fn commit(mut self, detail: T) -> Result<RecordId> {
        let mut records = self.states.records.lock();
        self.committed = true;
        if self.states.sealed.load(Ordering::Acquire) {
            if records.get(&self.key).is_some_and(|r| r.id == self.id) {
                records.remove(&self.key);
            }
            return Err(Error::Fatal(format!(
                "{} was shut down while being provisioned",
                self.key
            )));
        }
        if let Some(record) = records.get_mut(&self.key) {
            record.state = DeviceState::Open;
            record.detail = Some(detail);
        }
        Ok(self.id)
    }
}

impl<T> Drop for Reservation<'_, T> {
    fn drop(&mut self) {
        if !self.committed {
            log::debug!("provisioning of {} abandoned", self.key);
            self.states.finish_close(&self.key, self.id);
        }
    }
}
