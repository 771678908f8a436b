//! crates/clinic_queue_core/src/reservation.rs
//!
//! Books reservations together with their queue-numbered history entries, and
//! handles admin edits and deletion of reservations.

use std::sync::Arc;
use tracing::{error, info, warn};

use crate::domain::{
    HistoryEntry, NewHistoryEntry, NewReservation, Reservation, ReservationFilter,
    ReservationId, ReservationInput, ReservationPatch, SpecializationId,
};
use crate::ports::{
    Entity, PortError, PortResult, QueueTransaction, ReservationRepository,
    SpecializationDirectory,
};
use crate::sequencer::QueueSequencer;

/// How many times a booking is attempted when the store reports a write conflict.
const BOOKING_ATTEMPTS: u32 = 2;

/// The two records written by one booking.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Booking {
    pub reservation: Reservation,
    pub history: HistoryEntry,
}

pub struct ReservationService {
    reservations: Arc<dyn ReservationRepository>,
    specializations: Arc<dyn SpecializationDirectory>,
    sequencer: QueueSequencer,
}

impl ReservationService {
    pub fn new(
        reservations: Arc<dyn ReservationRepository>,
        specializations: Arc<dyn SpecializationDirectory>,
    ) -> Self {
        Self {
            reservations,
            specializations,
            sequencer: QueueSequencer::new(),
        }
    }

    /// Books a reservation and its pending history entry as a single unit.
    ///
    /// Either both records are committed or neither is. A write conflict is
    /// retried once with a fresh transaction before it is returned.
    pub async fn create_reservation(&self, input: ReservationInput) -> PortResult<Booking> {
        let new = validate_input(input)?;
        self.ensure_specialization(new.specialization_id).await?;

        let mut attempt = 1;
        loop {
            match self.book_once(&new).await {
                Err(PortError::Conflict(reason)) if attempt < BOOKING_ATTEMPTS => {
                    warn!(
                        scope = %new.scope(),
                        attempt,
                        "Booking hit a write conflict, retrying: {}",
                        reason
                    );
                    attempt += 1;
                }
                Ok(booking) => {
                    info!(
                        reservation_id = %booking.reservation.id,
                        history_id = %booking.history.id,
                        queue_number = booking.history.queue_number.get(),
                        scope = %new.scope(),
                        "Reservation booked"
                    );
                    return Ok(booking);
                }
                Err(e) => return Err(e),
            }
        }
    }

    pub async fn get_reservation(&self, id: ReservationId) -> PortResult<Reservation> {
        self.reservations.get_reservation(id).await
    }

    /// Edits the reservation only. The history snapshot keeps the values that were
    /// booked, and the queue number is not re-issued even if date or specialization change.
    pub async fn update_reservation(
        &self,
        id: ReservationId,
        patch: ReservationPatch,
    ) -> PortResult<Reservation> {
        validate_patch(&patch)?;
        if let Some(specialization_id) = patch.specialization_id {
            self.ensure_specialization(specialization_id).await?;
        }
        let updated = self.reservations.update_reservation(id, &patch).await?;
        info!(reservation_id = %id, "Reservation updated");
        Ok(updated)
    }

    /// Deletes the reservation and its history entry. Deleting twice reports `NotFound`.
    pub async fn delete_reservation(&self, id: ReservationId) -> PortResult<Reservation> {
        let deleted = self.reservations.delete_reservation(id).await?;
        info!(reservation_id = %id, "Reservation deleted with its history entry");
        Ok(deleted)
    }

    pub async fn list_reservations(
        &self,
        filter: ReservationFilter,
    ) -> PortResult<Vec<Reservation>> {
        self.reservations.list_reservations(filter).await
    }

    async fn ensure_specialization(&self, id: SpecializationId) -> PortResult<()> {
        if self.specializations.exists(id).await? {
            Ok(())
        } else {
            Err(PortError::not_found(Entity::Specialization, id))
        }
    }

    async fn book_once(&self, new: &NewReservation) -> PortResult<Booking> {
        let mut tx = self.reservations.begin().await?;
        match self.write_booking(tx.as_mut(), new).await {
            Ok(booking) => {
                tx.commit().await?;
                Ok(booking)
            }
            Err(e) => {
                if let Err(rollback_err) = tx.rollback().await {
                    error!("Failed to roll back booking: {:?}", rollback_err);
                }
                Err(e)
            }
        }
    }

    async fn write_booking(
        &self,
        tx: &mut dyn QueueTransaction,
        new: &NewReservation,
    ) -> PortResult<Booking> {
        let reservation = tx.insert_reservation(new).await?;
        let queue_number = self.sequencer.next(tx, reservation.scope()).await?;
        let history = tx
            .insert_history(&NewHistoryEntry::pending_for(&reservation, queue_number))
            .await?;
        Ok(Booking {
            reservation,
            history,
        })
    }
}

fn validate_input(input: ReservationInput) -> PortResult<NewReservation> {
    let specialization_id = input
        .specialization_id
        .ok_or_else(|| PortError::Validation("specialization_id is required".to_string()))?;
    if specialization_id.0 <= 0 {
        return Err(PortError::Validation(format!(
            "specialization_id must be positive, got {}",
            specialization_id
        )));
    }
    require_text("name", &input.patient.name)?;
    require_text("appointment_time", &input.appointment_time)?;

    Ok(NewReservation {
        specialization_id,
        patient: input.patient,
        appointment_date: input.appointment_date,
        appointment_time: input.appointment_time,
    })
}

fn validate_patch(patch: &ReservationPatch) -> PortResult<()> {
    if patch.is_empty() {
        return Err(PortError::Validation("No fields to update".to_string()));
    }
    if let Some(id) = patch.specialization_id {
        if id.0 <= 0 {
            return Err(PortError::Validation(format!(
                "specialization_id must be positive, got {}",
                id
            )));
        }
    }
    if let Some(name) = &patch.name {
        require_text("name", name)?;
    }
    if let Some(time) = &patch.appointment_time {
        require_text("appointment_time", time)?;
    }
    Ok(())
}

fn require_text(field: &str, value: &str) -> PortResult<()> {
    if value.trim().is_empty() {
        return Err(PortError::Validation(format!("{} must not be blank", field)));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{HistoryStatus, PatientDetails, QueueNumber};
    use crate::memory::MemoryStore;
    use chrono::NaiveDate;

    fn service(store: &MemoryStore) -> ReservationService {
        ReservationService::new(Arc::new(store.clone()), Arc::new(store.clone()))
    }

    fn input(specialization: Option<i64>, name: &str) -> ReservationInput {
        ReservationInput {
            specialization_id: specialization.map(SpecializationId),
            patient: PatientDetails {
                name: name.to_string(),
                age: 25,
                phone: "081234567890".into(),
                address: "Test Address".into(),
                sex: "P".into(),
            },
            appointment_date: NaiveDate::from_ymd_opt(2025, 6, 1).unwrap(),
            appointment_time: "12:00".into(),
        }
    }

    #[tokio::test]
    async fn booking_copies_patient_snapshot_into_pending_entry() {
        let store = MemoryStore::with_specializations([1]);
        let booking = service(&store)
            .create_reservation(input(Some(1), "Jane Doe"))
            .await
            .unwrap();

        let history = booking.history;
        assert_eq!(history.reservation_id, booking.reservation.id);
        assert_eq!(history.specialization_id, SpecializationId(1));
        assert_eq!(history.patient_name, "Jane Doe");
        assert_eq!(history.appointment_time, "12:00");
        assert_eq!(history.status, HistoryStatus::Pending);
        assert_eq!(history.queue_number, QueueNumber::FIRST);
    }

    #[tokio::test]
    async fn missing_specialization_id_is_rejected_before_any_write() {
        let store = MemoryStore::with_specializations([1]);
        let err = service(&store)
            .create_reservation(input(None, "Jane Doe"))
            .await
            .unwrap_err();

        assert!(matches!(err, PortError::Validation(_)));
        assert_eq!(store.reservation_count().unwrap(), 0);
    }

    #[tokio::test]
    async fn blank_name_is_rejected() {
        let store = MemoryStore::with_specializations([1]);
        let err = service(&store)
            .create_reservation(input(Some(1), "   "))
            .await
            .unwrap_err();
        assert!(matches!(err, PortError::Validation(_)));
    }

    #[tokio::test]
    async fn unknown_specialization_is_not_found() {
        let store = MemoryStore::with_specializations([1]);
        let err = service(&store)
            .create_reservation(input(Some(7), "Jane Doe"))
            .await
            .unwrap_err();

        assert_eq!(
            err,
            PortError::NotFound {
                entity: Entity::Specialization,
                key: "7".to_string()
            }
        );
        assert_eq!(store.history_count().unwrap(), 0);
    }

    #[tokio::test]
    async fn single_conflict_is_retried() {
        let store = MemoryStore::with_specializations([1]);
        store.conflict_next_history_inserts(1);

        let booking = service(&store)
            .create_reservation(input(Some(1), "Jane Doe"))
            .await
            .unwrap();

        assert_eq!(booking.history.queue_number, QueueNumber::FIRST);
        assert_eq!(store.reservation_count().unwrap(), 1);
        assert_eq!(store.history_count().unwrap(), 1);
    }

    #[tokio::test]
    async fn repeated_conflict_surfaces_after_one_retry() {
        let store = MemoryStore::with_specializations([1]);
        store.conflict_next_history_inserts(2);

        let err = service(&store)
            .create_reservation(input(Some(1), "Jane Doe"))
            .await
            .unwrap_err();

        assert!(matches!(err, PortError::Conflict(_)));
        assert_eq!(store.reservation_count().unwrap(), 0);
        assert_eq!(store.history_count().unwrap(), 0);
    }

    #[tokio::test]
    async fn empty_patch_is_rejected() {
        let store = MemoryStore::with_specializations([1]);
        let svc = service(&store);
        let booking = svc.create_reservation(input(Some(1), "Jane Doe")).await.unwrap();

        let err = svc
            .update_reservation(booking.reservation.id, ReservationPatch::default())
            .await
            .unwrap_err();
        assert!(matches!(err, PortError::Validation(_)));
    }

    #[tokio::test]
    async fn patch_to_unknown_specialization_is_not_found() {
        let store = MemoryStore::with_specializations([1]);
        let svc = service(&store);
        let booking = svc.create_reservation(input(Some(1), "Jane Doe")).await.unwrap();

        let patch = ReservationPatch {
            specialization_id: Some(SpecializationId(9)),
            ..Default::default()
        };
        let err = svc
            .update_reservation(booking.reservation.id, patch)
            .await
            .unwrap_err();
        assert!(err.is_not_found());
        assert_eq!(
            svc.get_reservation(booking.reservation.id)
                .await
                .unwrap()
                .specialization_id,
            SpecializationId(1)
        );
    }
}
