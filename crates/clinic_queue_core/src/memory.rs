//! crates/clinic_queue_core/src/memory.rs
//!
//! In-memory implementation of every port, for tests and local runs.
//!
//! Writes made through a `MemoryTransaction` are buffered and only reach the shared
//! tables on commit. Scope locks are real async mutexes held by the transaction,
//! so concurrent bookings behave the way they do against the database adapter.

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::{Mutex as ScopeMutex, OwnedMutexGuard};

use crate::domain::{
    HistoryEntry, HistoryFilter, HistoryId, HistoryStatus, NewHistoryEntry, NewReservation,
    QueueScope, Reservation, ReservationFilter, ReservationId, ReservationPatch,
    SpecializationId,
};
use crate::ports::{
    Clock, Entity, HistoryRepository, PortError, PortResult, QueueTransaction,
    ReservationRepository, SpecializationDirectory,
};

//=========================================================================================
// Shared State
//=========================================================================================

#[derive(Default)]
struct Tables {
    last_reservation_id: i64,
    last_history_id: i64,
    reservations: BTreeMap<ReservationId, Reservation>,
    history: BTreeMap<HistoryId, HistoryEntry>,
}

impl Tables {
    fn highest_in_scope(&self, scope: QueueScope) -> u32 {
        highest_number(self.history.values(), scope)
    }
}

fn highest_number<'a>(entries: impl Iterator<Item = &'a HistoryEntry>, scope: QueueScope) -> u32 {
    entries
        .filter(|h| h.scope() == scope)
        .map(|h| h.queue_number.get())
        .max()
        .unwrap_or(0)
}

#[derive(Default)]
struct Faults {
    failing_history_inserts: AtomicU32,
    conflicting_history_inserts: AtomicU32,
}

impl Faults {
    /// Consumes one armed fault from `counter`, if any.
    fn take(counter: &AtomicU32) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

/// An in-memory store implementing the reservation, history and specialization ports.
#[derive(Clone, Default)]
pub struct MemoryStore {
    tables: Arc<Mutex<Tables>>,
    scope_locks: Arc<Mutex<HashMap<QueueScope, Arc<ScopeMutex<()>>>>>,
    specializations: Arc<Mutex<HashSet<SpecializationId>>>,
    faults: Arc<Faults>,
}

fn poisoned() -> PortError {
    PortError::Internal("Mutex lock failed".to_string())
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store whose catalogue already knows `ids`.
    pub fn with_specializations(ids: impl IntoIterator<Item = i64>) -> Self {
        let store = Self::new();
        for id in ids {
            store.add_specialization(SpecializationId(id));
        }
        store
    }

    pub fn add_specialization(&self, id: SpecializationId) {
        if let Ok(mut known) = self.specializations.lock() {
            known.insert(id);
        }
    }

    /// Makes the next `n` history inserts fail with an internal error.
    pub fn fail_next_history_inserts(&self, n: u32) {
        self.faults.failing_history_inserts.store(n, Ordering::SeqCst);
    }

    /// Makes the next `n` history inserts fail as if a concurrent writer won the race.
    pub fn conflict_next_history_inserts(&self, n: u32) {
        self.faults
            .conflicting_history_inserts
            .store(n, Ordering::SeqCst);
    }

    pub fn reservation_count(&self) -> PortResult<usize> {
        Ok(self.tables()?.reservations.len())
    }

    pub fn history_count(&self) -> PortResult<usize> {
        Ok(self.tables()?.history.len())
    }

    fn tables(&self) -> PortResult<MutexGuard<'_, Tables>> {
        self.tables.lock().map_err(|_| poisoned())
    }

    fn scope_lock(&self, scope: QueueScope) -> PortResult<Arc<ScopeMutex<()>>> {
        let mut locks = self.scope_locks.lock().map_err(|_| poisoned())?;
        Ok(Arc::clone(locks.entry(scope).or_default()))
    }

    /// Drops scope locks that no transaction holds or waits on.
    fn prune_scope_locks(&self) {
        if let Ok(mut locks) = self.scope_locks.lock() {
            locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        }
    }

    /// Number of scopes that currently have a lock allocated.
    pub fn scope_lock_count(&self) -> PortResult<usize> {
        Ok(self.scope_locks.lock().map_err(|_| poisoned())?.len())
    }
}

//=========================================================================================
// Transaction
//=========================================================================================

/// A buffered unit of work over a `MemoryStore`.
pub struct MemoryTransaction {
    store: MemoryStore,
    held: HashMap<QueueScope, OwnedMutexGuard<()>>,
    reservations: Vec<Reservation>,
    history: Vec<HistoryEntry>,
    finished: bool,
}

impl MemoryTransaction {
    fn new(store: MemoryStore) -> Self {
        Self {
            store,
            held: HashMap::new(),
            reservations: Vec::new(),
            history: Vec::new(),
            finished: false,
        }
    }

    fn ensure_open(&self) -> PortResult<()> {
        if self.finished {
            return Err(PortError::Internal(
                "Transaction already finished".to_string(),
            ));
        }
        Ok(())
    }

    fn release(&mut self) {
        self.reservations.clear();
        self.history.clear();
        self.held.clear();
        self.finished = true;
        self.store.prune_scope_locks();
    }
}

#[async_trait]
impl QueueTransaction for MemoryTransaction {
    async fn lock_scope(&mut self, scope: QueueScope) -> PortResult<()> {
        self.ensure_open()?;
        if self.held.contains_key(&scope) {
            return Ok(());
        }
        let lock = self.store.scope_lock(scope)?;
        let guard = lock.lock_owned().await;
        self.held.insert(scope, guard);
        Ok(())
    }

    async fn highest_in_scope(&mut self, scope: QueueScope) -> PortResult<u32> {
        self.ensure_open()?;
        let committed = self.store.tables()?.highest_in_scope(scope);
        let pending = highest_number(self.history.iter(), scope);
        // Give other tasks a chance to interleave between the read and the write.
        tokio::task::yield_now().await;
        Ok(committed.max(pending))
    }

    async fn insert_reservation(&mut self, new: &NewReservation) -> PortResult<Reservation> {
        self.ensure_open()?;
        let id = {
            let mut tables = self.store.tables()?;
            tables.last_reservation_id += 1;
            ReservationId(tables.last_reservation_id)
        };
        let now = Utc::now();
        let reservation = Reservation {
            id,
            specialization_id: new.specialization_id,
            patient: new.patient.clone(),
            appointment_date: new.appointment_date,
            appointment_time: new.appointment_time.clone(),
            created_at: now,
            updated_at: now,
        };
        self.reservations.push(reservation.clone());
        Ok(reservation)
    }

    async fn insert_history(&mut self, new: &NewHistoryEntry) -> PortResult<HistoryEntry> {
        self.ensure_open()?;
        if Faults::take(&self.store.faults.failing_history_inserts) {
            return Err(PortError::Internal("Injected history insert failure".to_string()));
        }
        if Faults::take(&self.store.faults.conflicting_history_inserts) {
            return Err(PortError::Conflict(
                "Injected queue number collision".to_string(),
            ));
        }

        let scope = QueueScope::new(new.specialization_id, new.appointment_date);
        let id = {
            let mut tables = self.store.tables()?;
            let reservation_known = tables.reservations.contains_key(&new.reservation_id)
                || self.reservations.iter().any(|r| r.id == new.reservation_id);
            if !reservation_known {
                return Err(PortError::not_found(Entity::Reservation, new.reservation_id));
            }
            let taken = tables
                .history
                .values()
                .chain(self.history.iter())
                .any(|h| h.scope() == scope && h.queue_number == new.queue_number);
            if taken {
                return Err(PortError::Conflict(format!(
                    "Queue number {} already issued for {scope}",
                    new.queue_number
                )));
            }
            let linked = tables
                .history
                .values()
                .chain(self.history.iter())
                .any(|h| h.reservation_id == new.reservation_id);
            if linked {
                return Err(PortError::Conflict(format!(
                    "Reservation {} already has a history entry",
                    new.reservation_id
                )));
            }
            tables.last_history_id += 1;
            HistoryId(tables.last_history_id)
        };

        let now = Utc::now();
        let entry = HistoryEntry {
            id,
            reservation_id: new.reservation_id,
            specialization_id: new.specialization_id,
            patient_name: new.patient_name.clone(),
            appointment_date: new.appointment_date,
            appointment_time: new.appointment_time.clone(),
            status: new.status,
            queue_number: new.queue_number,
            created_at: now,
            updated_at: now,
        };
        self.history.push(entry.clone());
        Ok(entry)
    }

    async fn commit(&mut self) -> PortResult<()> {
        self.ensure_open()?;
        {
            let mut tables = self.store.tables()?;
            for reservation in self.reservations.drain(..) {
                tables.reservations.insert(reservation.id, reservation);
            }
            for entry in self.history.drain(..) {
                tables.history.insert(entry.id, entry);
            }
        }
        self.release();
        Ok(())
    }

    async fn rollback(&mut self) -> PortResult<()> {
        self.ensure_open()?;
        self.release();
        Ok(())
    }
}

//=========================================================================================
// Repository Implementations
//=========================================================================================

#[async_trait]
impl ReservationRepository for MemoryStore {
    async fn begin(&self) -> PortResult<Box<dyn QueueTransaction>> {
        Ok(Box::new(MemoryTransaction::new(self.clone())))
    }

    async fn get_reservation(&self, id: ReservationId) -> PortResult<Reservation> {
        self.tables()?
            .reservations
            .get(&id)
            .cloned()
            .ok_or_else(|| PortError::not_found(Entity::Reservation, id))
    }

    async fn list_reservations(&self, filter: ReservationFilter) -> PortResult<Vec<Reservation>> {
        Ok(self
            .tables()?
            .reservations
            .values()
            .filter(|r| filter.matches(r))
            .cloned()
            .collect())
    }

    async fn update_reservation(
        &self,
        id: ReservationId,
        patch: &ReservationPatch,
    ) -> PortResult<Reservation> {
        let mut tables = self.tables()?;
        let current = tables
            .reservations
            .get(&id)
            .ok_or_else(|| PortError::not_found(Entity::Reservation, id))?;
        let mut updated = patch.apply_to(current);
        updated.updated_at = Utc::now();
        tables.reservations.insert(id, updated.clone());
        Ok(updated)
    }

    async fn delete_reservation(&self, id: ReservationId) -> PortResult<Reservation> {
        let mut tables = self.tables()?;
        let removed = tables
            .reservations
            .remove(&id)
            .ok_or_else(|| PortError::not_found(Entity::Reservation, id))?;
        tables.history.retain(|_, h| h.reservation_id != id);
        Ok(removed)
    }
}

#[async_trait]
impl HistoryRepository for MemoryStore {
    async fn get_history(&self, id: HistoryId) -> PortResult<HistoryEntry> {
        self.tables()?
            .history
            .get(&id)
            .cloned()
            .ok_or_else(|| PortError::not_found(Entity::HistoryEntry, id))
    }

    async fn list_history(&self, filter: HistoryFilter) -> PortResult<Vec<HistoryEntry>> {
        let mut entries: Vec<HistoryEntry> = self
            .tables()?
            .history
            .values()
            .filter(|h| filter.matches(h))
            .cloned()
            .collect();
        entries.sort_by_key(|h| (h.appointment_date, h.specialization_id, h.queue_number));
        Ok(entries)
    }

    async fn transition_status(
        &self,
        id: HistoryId,
        from: HistoryStatus,
        to: HistoryStatus,
    ) -> PortResult<Option<HistoryEntry>> {
        let mut tables = self.tables()?;
        let entry = tables
            .history
            .get_mut(&id)
            .ok_or_else(|| PortError::not_found(Entity::HistoryEntry, id))?;
        if entry.status != from {
            return Ok(None);
        }
        entry.status = to;
        entry.updated_at = Utc::now();
        Ok(Some(entry.clone()))
    }

    async fn delete_history(&self, id: HistoryId) -> PortResult<HistoryEntry> {
        self.tables()?
            .history
            .remove(&id)
            .ok_or_else(|| PortError::not_found(Entity::HistoryEntry, id))
    }
}

#[async_trait]
impl SpecializationDirectory for MemoryStore {
    async fn exists(&self, id: SpecializationId) -> PortResult<bool> {
        Ok(self
            .specializations
            .lock()
            .map_err(|_| poisoned())?
            .contains(&id))
    }
}

//=========================================================================================
// Clock
//=========================================================================================

/// A clock pinned to one service date.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub NaiveDate);

impl Clock for FixedClock {
    fn today(&self) -> NaiveDate {
        self.0
    }
}
