//! crates/clinic_queue_core/src/ports.rs
//!
//! Defines the service contracts (traits) for the reservation engine.
//! These traits form the boundary of the hexagonal architecture, allowing the core
//! to be independent of the persistence technology and of the HTTP layer.

use async_trait::async_trait;
use chrono::NaiveDate;
use std::fmt;

use crate::domain::{
    HistoryEntry, HistoryFilter, HistoryId, HistoryStatus, NewHistoryEntry, NewReservation,
    QueueScope, Reservation, ReservationFilter, ReservationId, ReservationPatch,
    SpecializationId,
};

//=========================================================================================
// Generic Port Error and Result Types
//=========================================================================================

/// The kind of record a `NotFound` error refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Entity {
    Reservation,
    HistoryEntry,
    Specialization,
    /// The queue of one (specialization, date) scope has no entries.
    Queue,
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Entity::Reservation => "Reservation",
            Entity::HistoryEntry => "History entry",
            Entity::Specialization => "Specialization",
            Entity::Queue => "Queue",
        })
    }
}

/// A generic error type for all port and service operations.
/// This abstracts away the specific errors from external services (e.g., the database).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PortError {
    #[error("{entity} not found: {key}")]
    NotFound { entity: Entity, key: String },
    #[error("Invalid input: {0}")]
    Validation(String),
    #[error("Conflicting concurrent write: {0}")]
    Conflict(String),
    #[error("Cannot move history entry from {from} to {to}")]
    InvalidTransition {
        from: HistoryStatus,
        to: HistoryStatus,
    },
    #[error("An unexpected error occurred: {0}")]
    Internal(String),
}

impl PortError {
    pub fn not_found(entity: Entity, key: impl fmt::Display) -> Self {
        PortError::NotFound {
            entity,
            key: key.to_string(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, PortError::NotFound { .. })
    }
}

/// A convenience type alias for `Result<T, PortError>`.
pub type PortResult<T> = Result<T, PortError>;

//=========================================================================================
// Transaction Port
//=========================================================================================

/// An open unit of work against the store. Nothing written through it is visible
/// to other callers until `commit` returns. Dropping it without committing rolls back.
#[async_trait]
pub trait QueueTransaction: Send {
    /// Blocks until this transaction holds the exclusive lock of `scope`.
    /// The lock is released when the transaction commits or rolls back.
    async fn lock_scope(&mut self, scope: QueueScope) -> PortResult<()>;

    /// Returns the highest queue number held in `scope` by any status, counting
    /// entries written earlier in this transaction. Zero for an empty scope.
    async fn highest_in_scope(&mut self, scope: QueueScope) -> PortResult<u32>;

    async fn insert_reservation(&mut self, new: &NewReservation) -> PortResult<Reservation>;

    async fn insert_history(&mut self, new: &NewHistoryEntry) -> PortResult<HistoryEntry>;

    async fn commit(&mut self) -> PortResult<()>;

    async fn rollback(&mut self) -> PortResult<()>;
}

//=========================================================================================
// Repository Ports (Traits)
//=========================================================================================

#[async_trait]
pub trait ReservationRepository: Send + Sync {
    /// Opens a transaction for the two-record booking write.
    async fn begin(&self) -> PortResult<Box<dyn QueueTransaction>>;

    async fn get_reservation(&self, id: ReservationId) -> PortResult<Reservation>;

    /// Reservations matching `filter`, oldest first.
    async fn list_reservations(&self, filter: ReservationFilter) -> PortResult<Vec<Reservation>>;

    /// Applies `patch` to the reservation row only. Its history entry is untouched.
    async fn update_reservation(
        &self,
        id: ReservationId,
        patch: &ReservationPatch,
    ) -> PortResult<Reservation>;

    /// Deletes the reservation and, by cascade, its history entry.
    async fn delete_reservation(&self, id: ReservationId) -> PortResult<Reservation>;
}

#[async_trait]
pub trait HistoryRepository: Send + Sync {
    async fn get_history(&self, id: HistoryId) -> PortResult<HistoryEntry>;

    /// Entries matching `filter`, ordered by date, specialization and queue number.
    async fn list_history(&self, filter: HistoryFilter) -> PortResult<Vec<HistoryEntry>>;

    /// Compare-and-set of the status. Returns `None` when the entry exists but its
    /// status is no longer `from`, and `NotFound` when it does not exist.
    async fn transition_status(
        &self,
        id: HistoryId,
        from: HistoryStatus,
        to: HistoryStatus,
    ) -> PortResult<Option<HistoryEntry>>;

    /// Hard-deletes the entry and leaves its reservation in place.
    async fn delete_history(&self, id: HistoryId) -> PortResult<HistoryEntry>;
}

/// Lookup into the specialization catalogue, which this engine does not own.
#[async_trait]
pub trait SpecializationDirectory: Send + Sync {
    async fn exists(&self, id: SpecializationId) -> PortResult<bool>;
}

/// Source of the clinic's current service date.
pub trait Clock: Send + Sync {
    fn today(&self) -> NaiveDate;
}
