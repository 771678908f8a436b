//! crates/clinic_queue_core/src/domain.rs
//!
//! Defines the pure, core data structures for the reservation and queue engine.
//! These structs are independent of any database or serialization format.

use chrono::{DateTime, Datelike, NaiveDate, Utc};
use std::fmt;
use std::str::FromStr;

//=========================================================================================
// Identifiers
//=========================================================================================

/// Identifier of a persisted reservation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ReservationId(pub i64);

/// Identifier of a persisted history entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HistoryId(pub i64);

/// Identifier of a specialization owned by the catalogue subsystem.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SpecializationId(pub i64);

impl fmt::Display for ReservationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for HistoryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for SpecializationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

//=========================================================================================
// Queue numbers and scopes
//=========================================================================================

/// A 1-based position in the queue of one (specialization, date) scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct QueueNumber(u32);

impl QueueNumber {
    pub const FIRST: QueueNumber = QueueNumber(1);

    /// Returns `None` for zero, which is never a valid queue position.
    pub fn new(value: u32) -> Option<Self> {
        (value >= 1).then_some(Self(value))
    }

    /// The number that follows `highest`, the largest number already held in the scope.
    pub fn after(highest: u32) -> Self {
        Self(highest.saturating_add(1))
    }

    pub fn get(self) -> u32 {
        self.0
    }

    /// Zero-padded ticket label, e.g. `007`. Numbers past 999 are printed in full.
    pub fn label(self) -> String {
        format!("{:03}", self.0)
    }
}

impl fmt::Display for QueueNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The (specialization, appointment date) pair under which queue numbers are unique.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct QueueScope {
    pub specialization_id: SpecializationId,
    pub appointment_date: NaiveDate,
}

impl QueueScope {
    pub fn new(specialization_id: SpecializationId, appointment_date: NaiveDate) -> Self {
        Self {
            specialization_id,
            appointment_date,
        }
    }

    /// Day number of the appointment date, used as the second half of a lock key.
    pub fn day_key(&self) -> i32 {
        self.appointment_date.num_days_from_ce()
    }
}

impl fmt::Display for QueueScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "specialization {} on {}",
            self.specialization_id, self.appointment_date
        )
    }
}

//=========================================================================================
// History status state machine
//=========================================================================================

/// Lifecycle status of a history entry. `Pending` is the only non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum HistoryStatus {
    #[default]
    Pending,
    Completed,
    Canceled,
}

impl HistoryStatus {
    pub const ALL: [HistoryStatus; 3] = [
        HistoryStatus::Pending,
        HistoryStatus::Completed,
        HistoryStatus::Canceled,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            HistoryStatus::Pending => "pending",
            HistoryStatus::Completed => "completed",
            HistoryStatus::Canceled => "canceled",
        }
    }

    pub fn is_terminal(self) -> bool {
        match self {
            HistoryStatus::Pending => false,
            HistoryStatus::Completed | HistoryStatus::Canceled => true,
        }
    }

    /// Whether the state machine allows moving from `self` to `next`.
    pub fn can_transition_to(self, next: HistoryStatus) -> bool {
        match (self, next) {
            (HistoryStatus::Pending, HistoryStatus::Completed)
            | (HistoryStatus::Pending, HistoryStatus::Canceled) => true,
            (HistoryStatus::Pending, HistoryStatus::Pending)
            | (HistoryStatus::Completed, _)
            | (HistoryStatus::Canceled, _) => false,
        }
    }
}

impl fmt::Display for HistoryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returned when a stored or requested status string is not one of the known states.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown history status '{0}'")]
pub struct UnknownStatus(pub String);

impl FromStr for HistoryStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(HistoryStatus::Pending),
            "completed" => Ok(HistoryStatus::Completed),
            "canceled" => Ok(HistoryStatus::Canceled),
            other => Err(UnknownStatus(other.to_string())),
        }
    }
}

//=========================================================================================
// Records
//=========================================================================================

/// Patient-identifying fields carried by a reservation. Validated upstream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatientDetails {
    pub name: String,
    pub age: u32,
    pub phone: String,
    pub address: String,
    pub sex: String,
}

/// A booked appointment request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reservation {
    pub id: ReservationId,
    pub specialization_id: SpecializationId,
    pub patient: PatientDetails,
    pub appointment_date: NaiveDate,
    pub appointment_time: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Reservation {
    pub fn scope(&self) -> QueueScope {
        QueueScope::new(self.specialization_id, self.appointment_date)
    }
}

/// The operational record of one reservation's queue position and status.
///
/// `patient_name`, `appointment_date` and `appointment_time` are a snapshot taken
/// when the reservation was booked; later edits to the reservation do not reach them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryEntry {
    pub id: HistoryId,
    pub reservation_id: ReservationId,
    pub specialization_id: SpecializationId,
    pub patient_name: String,
    pub appointment_date: NaiveDate,
    pub appointment_time: String,
    pub status: HistoryStatus,
    pub queue_number: QueueNumber,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl HistoryEntry {
    pub fn scope(&self) -> QueueScope {
        QueueScope::new(self.specialization_id, self.appointment_date)
    }
}

//=========================================================================================
// Inputs
//=========================================================================================

/// A booking request as accepted from the HTTP layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReservationInput {
    pub specialization_id: Option<SpecializationId>,
    pub patient: PatientDetails,
    pub appointment_date: NaiveDate,
    pub appointment_time: String,
}

/// A validated reservation ready to be inserted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewReservation {
    pub specialization_id: SpecializationId,
    pub patient: PatientDetails,
    pub appointment_date: NaiveDate,
    pub appointment_time: String,
}

impl NewReservation {
    pub fn scope(&self) -> QueueScope {
        QueueScope::new(self.specialization_id, self.appointment_date)
    }
}

/// A history entry ready to be inserted alongside its reservation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewHistoryEntry {
    pub reservation_id: ReservationId,
    pub specialization_id: SpecializationId,
    pub patient_name: String,
    pub appointment_date: NaiveDate,
    pub appointment_time: String,
    pub status: HistoryStatus,
    pub queue_number: QueueNumber,
}

impl NewHistoryEntry {
    /// Snapshots the booked reservation into a pending entry holding `queue_number`.
    pub fn pending_for(reservation: &Reservation, queue_number: QueueNumber) -> Self {
        Self {
            reservation_id: reservation.id,
            specialization_id: reservation.specialization_id,
            patient_name: reservation.patient.name.clone(),
            appointment_date: reservation.appointment_date,
            appointment_time: reservation.appointment_time.clone(),
            status: HistoryStatus::Pending,
            queue_number,
        }
    }
}

/// Partial update of a reservation. `None` leaves the field untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReservationPatch {
    pub specialization_id: Option<SpecializationId>,
    pub name: Option<String>,
    pub age: Option<u32>,
    pub phone: Option<String>,
    pub address: Option<String>,
    pub sex: Option<String>,
    pub appointment_date: Option<NaiveDate>,
    pub appointment_time: Option<String>,
}

impl ReservationPatch {
    pub fn is_empty(&self) -> bool {
        self == &ReservationPatch::default()
    }

    /// Applies the patch to a copy of `reservation`. Timestamps are left to the store.
    pub fn apply_to(&self, reservation: &Reservation) -> Reservation {
        let mut updated = reservation.clone();
        if let Some(id) = self.specialization_id {
            updated.specialization_id = id;
        }
        if let Some(name) = &self.name {
            updated.patient.name = name.clone();
        }
        if let Some(age) = self.age {
            updated.patient.age = age;
        }
        if let Some(phone) = &self.phone {
            updated.patient.phone = phone.clone();
        }
        if let Some(address) = &self.address {
            updated.patient.address = address.clone();
        }
        if let Some(sex) = &self.sex {
            updated.patient.sex = sex.clone();
        }
        if let Some(date) = self.appointment_date {
            updated.appointment_date = date;
        }
        if let Some(time) = &self.appointment_time {
            updated.appointment_time = time.clone();
        }
        updated
    }
}

//=========================================================================================
// Filters
//=========================================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReservationFilter {
    pub specialization_id: Option<SpecializationId>,
    pub appointment_date: Option<NaiveDate>,
}

impl ReservationFilter {
    pub fn matches(&self, reservation: &Reservation) -> bool {
        self.specialization_id
            .map_or(true, |id| id == reservation.specialization_id)
            && self
                .appointment_date
                .map_or(true, |date| date == reservation.appointment_date)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HistoryFilter {
    pub specialization_id: Option<SpecializationId>,
    pub appointment_date: Option<NaiveDate>,
    pub status: Option<HistoryStatus>,
}

impl HistoryFilter {
    /// Every entry of one scope, in any status.
    pub fn for_scope(scope: QueueScope) -> Self {
        Self {
            specialization_id: Some(scope.specialization_id),
            appointment_date: Some(scope.appointment_date),
            status: None,
        }
    }

    pub fn matches(&self, entry: &HistoryEntry) -> bool {
        self.specialization_id
            .map_or(true, |id| id == entry.specialization_id)
            && self
                .appointment_date
                .map_or(true, |date| date == entry.appointment_date)
            && self.status.map_or(true, |status| status == entry.status)
    }
}
