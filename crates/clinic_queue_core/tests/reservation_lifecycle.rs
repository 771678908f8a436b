//! End-to-end behaviour of the booking, queue and history lifecycle against the
//! in-memory adapter.

use chrono::NaiveDate;
use clinic_queue_core::memory::MemoryStore;
use clinic_queue_core::{
    Entity, HistoryId, HistoryService, HistoryStatus, PatientDetails, PortError,
    QueueSequencer, QueueScope, ReservationFilter, ReservationInput, ReservationRepository,
    ReservationService, SpecializationId,
};
use futures::future::join_all;
use std::collections::BTreeSet;
use std::sync::Arc;

fn date(s: &str) -> NaiveDate {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
}

fn booking_input(specialization: i64, day: &str, name: &str) -> ReservationInput {
    ReservationInput {
        specialization_id: Some(SpecializationId(specialization)),
        patient: PatientDetails {
            name: name.to_string(),
            age: 25,
            phone: "081234567890".into(),
            address: "Test Address".into(),
            sex: "P".into(),
        },
        appointment_date: date(day),
        appointment_time: "12:00".into(),
    }
}

fn services(store: &MemoryStore) -> (ReservationService, HistoryService) {
    (
        ReservationService::new(Arc::new(store.clone()), Arc::new(store.clone())),
        HistoryService::new(Arc::new(store.clone())),
    )
}

#[tokio::test]
async fn sequential_bookings_get_one_two_three() {
    let store = MemoryStore::with_specializations([1]);
    let (reservations, _) = services(&store);

    let mut numbers = Vec::new();
    for name in ["Ani", "Budi", "Citra"] {
        let booking = reservations
            .create_reservation(booking_input(1, "2025-06-01", name))
            .await
            .unwrap();
        numbers.push(booking.history.queue_number.get());
    }

    assert_eq!(numbers, vec![1, 2, 3]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_bookings_in_one_scope_get_a_dense_unique_sequence() {
    const K: u32 = 25;
    let store = MemoryStore::with_specializations([1]);
    let (reservations, history) = services(&store);
    let reservations = Arc::new(reservations);

    let tasks = (0..K).map(|i| {
        let reservations = Arc::clone(&reservations);
        tokio::spawn(async move {
            reservations
                .create_reservation(booking_input(1, "2025-06-01", &format!("Pasien {i}")))
                .await
        })
    });
    let results = join_all(tasks).await;

    let numbers: Vec<u32> = results
        .into_iter()
        .map(|joined| joined.unwrap().unwrap().history.queue_number.get())
        .collect();
    let unique: BTreeSet<u32> = numbers.iter().copied().collect();
    assert_eq!(unique.len(), K as usize, "duplicate queue numbers: {numbers:?}");
    assert_eq!(unique, (1..=K).collect::<BTreeSet<u32>>());

    let queue = history
        .queue_list(SpecializationId(1), date("2025-06-01"))
        .await
        .unwrap();
    assert_eq!(queue.len(), K as usize);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn different_scopes_number_independently() {
    let store = MemoryStore::with_specializations([1, 2]);
    let (reservations, _) = services(&store);
    let reservations = Arc::new(reservations);

    let scopes = [(1, "2025-06-01"), (1, "2025-06-02"), (2, "2025-06-01")];
    let mut tasks = Vec::new();
    for &(specialization, day) in &scopes {
        for i in 0..4 {
            let reservations = Arc::clone(&reservations);
            tasks.push(tokio::spawn(async move {
                reservations
                    .create_reservation(booking_input(specialization, day, &format!("P{i}")))
                    .await
            }));
        }
    }
    let bookings: Vec<_> = join_all(tasks)
        .await
        .into_iter()
        .map(|joined| joined.unwrap().unwrap())
        .collect();

    for &(specialization, day) in &scopes {
        let scope = QueueScope::new(SpecializationId(specialization), date(day));
        let numbers: BTreeSet<u32> = bookings
            .iter()
            .filter(|b| b.history.scope() == scope)
            .map(|b| b.history.queue_number.get())
            .collect();
        assert_eq!(numbers, (1..=4).collect::<BTreeSet<u32>>(), "scope {scope}");
    }
}

#[tokio::test]
async fn failed_history_insert_leaves_no_reservation_behind() {
    let store = MemoryStore::with_specializations([1]);
    let (reservations, _) = services(&store);
    store.fail_next_history_inserts(1);

    let err = reservations
        .create_reservation(booking_input(1, "2025-06-01", "Jane Doe"))
        .await
        .unwrap_err();

    assert!(matches!(err, PortError::Internal(_)));
    assert_eq!(store.reservation_count().unwrap(), 0);
    assert_eq!(store.history_count().unwrap(), 0);
    assert!(reservations
        .list_reservations(ReservationFilter::default())
        .await
        .unwrap()
        .is_empty());

    // The aborted attempt did not consume a queue number.
    let booking = reservations
        .create_reservation(booking_input(1, "2025-06-01", "Jane Doe"))
        .await
        .unwrap();
    assert_eq!(booking.history.queue_number.get(), 1);
}

#[tokio::test]
async fn rolled_back_sequencer_read_does_not_consume_a_number() {
    let store = MemoryStore::with_specializations([1]);
    let scope = QueueScope::new(SpecializationId(1), date("2025-06-01"));
    let sequencer = QueueSequencer::new();

    let mut aborted = store.begin().await.unwrap();
    let first = sequencer.next(aborted.as_mut(), scope).await.unwrap();
    aborted.rollback().await.unwrap();

    let mut retried = store.begin().await.unwrap();
    let second = sequencer.next(retried.as_mut(), scope).await.unwrap();
    retried.rollback().await.unwrap();

    assert_eq!(first, second);
    assert_eq!(first.get(), 1);
}

#[tokio::test]
async fn deleting_a_reservation_cascades_to_its_history_entry() {
    let store = MemoryStore::with_specializations([1]);
    let (reservations, history) = services(&store);
    let booking = reservations
        .create_reservation(booking_input(1, "2025-06-01", "Jane Doe"))
        .await
        .unwrap();

    let deleted = reservations
        .delete_reservation(booking.reservation.id)
        .await
        .unwrap();
    assert_eq!(deleted.id, booking.reservation.id);

    let err = history.get(booking.history.id).await.unwrap_err();
    assert_eq!(
        err,
        PortError::NotFound {
            entity: Entity::HistoryEntry,
            key: booking.history.id.to_string(),
        }
    );
}

#[tokio::test]
async fn deleting_a_reservation_twice_reports_not_found() {
    let store = MemoryStore::with_specializations([1]);
    let (reservations, _) = services(&store);
    let booking = reservations
        .create_reservation(booking_input(1, "2025-06-01", "Jane Doe"))
        .await
        .unwrap();

    reservations
        .delete_reservation(booking.reservation.id)
        .await
        .unwrap();
    let err = reservations
        .delete_reservation(booking.reservation.id)
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        PortError::NotFound {
            entity: Entity::Reservation,
            ..
        }
    ));
}

#[tokio::test]
async fn deleting_history_keeps_the_reservation() {
    let store = MemoryStore::with_specializations([1]);
    let (reservations, history) = services(&store);
    let booking = reservations
        .create_reservation(booking_input(1, "2025-06-01", "Jane Doe"))
        .await
        .unwrap();

    history.delete(booking.history.id).await.unwrap();

    assert!(history.get(booking.history.id).await.unwrap_err().is_not_found());
    assert_eq!(
        reservations
            .get_reservation(booking.reservation.id)
            .await
            .unwrap(),
        booking.reservation
    );
    assert!(matches!(
        history.delete(booking.history.id).await.unwrap_err(),
        PortError::NotFound {
            entity: Entity::HistoryEntry,
            ..
        }
    ));
}

#[tokio::test]
async fn booking_after_a_history_delete_takes_the_next_unused_number() {
    let store = MemoryStore::with_specializations([1]);
    let (reservations, history) = services(&store);
    let mut bookings = Vec::new();
    for name in ["Ani", "Budi", "Citra"] {
        bookings.push(
            reservations
                .create_reservation(booking_input(1, "2025-06-01", name))
                .await
                .unwrap(),
        );
    }

    history.delete(bookings[1].history.id).await.unwrap();

    let mut later = Vec::new();
    for name in ["Dewi", "Eka"] {
        let booking = reservations
            .create_reservation(booking_input(1, "2025-06-01", name))
            .await
            .unwrap();
        later.push(booking.history.queue_number.get());
    }
    assert_eq!(later, vec![4, 5]);

    let queue: Vec<u32> = history
        .queue_list(SpecializationId(1), date("2025-06-01"))
        .await
        .unwrap()
        .iter()
        .map(|h| h.queue_number.get())
        .collect();
    assert_eq!(queue, vec![1, 3, 4, 5]);
}

#[tokio::test]
async fn booking_after_a_reservation_delete_takes_the_next_unused_number() {
    let store = MemoryStore::with_specializations([1]);
    let (reservations, history) = services(&store);
    let first = reservations
        .create_reservation(booking_input(1, "2025-06-01", "Xena"))
        .await
        .unwrap();
    reservations
        .create_reservation(booking_input(1, "2025-06-01", "Yusuf"))
        .await
        .unwrap();

    reservations
        .delete_reservation(first.reservation.id)
        .await
        .unwrap();
    let third = reservations
        .create_reservation(booking_input(1, "2025-06-01", "Zaki"))
        .await
        .unwrap();

    assert_eq!(third.history.queue_number.get(), 3);
    let queue: Vec<u32> = history
        .queue_list(SpecializationId(1), date("2025-06-01"))
        .await
        .unwrap()
        .iter()
        .map(|h| h.queue_number.get())
        .collect();
    assert_eq!(queue, vec![2, 3]);
}

#[tokio::test]
async fn finished_transactions_release_their_scope_locks() {
    let store = MemoryStore::with_specializations([1, 2]);
    let (reservations, _) = services(&store);
    for (specialization, day) in [(1, "2025-06-01"), (1, "2025-06-02"), (2, "2025-06-01")] {
        reservations
            .create_reservation(booking_input(specialization, day, "Jane Doe"))
            .await
            .unwrap();
    }

    let mut aborted = store.begin().await.unwrap();
    QueueSequencer::new()
        .next(aborted.as_mut(), QueueScope::new(SpecializationId(2), date("2025-06-03")))
        .await
        .unwrap();
    assert_eq!(store.scope_lock_count().unwrap(), 1);
    aborted.rollback().await.unwrap();

    assert_eq!(store.scope_lock_count().unwrap(), 0);
}

#[tokio::test]
async fn cancel_keeps_the_queue_number() {
    let store = MemoryStore::with_specializations([1]);
    let (reservations, history) = services(&store);
    reservations
        .create_reservation(booking_input(1, "2025-06-01", "Ani"))
        .await
        .unwrap();
    let booking = reservations
        .create_reservation(booking_input(1, "2025-06-01", "Budi"))
        .await
        .unwrap();

    history.cancel(booking.history.id).await.unwrap();

    let entry = history.get(booking.history.id).await.unwrap();
    assert_eq!(entry.status, HistoryStatus::Canceled);
    assert_eq!(entry.queue_number, booking.history.queue_number);

    // Canceled slots stay counted.
    let next = reservations
        .create_reservation(booking_input(1, "2025-06-01", "Citra"))
        .await
        .unwrap();
    assert_eq!(next.history.queue_number.get(), 3);
}

#[tokio::test]
async fn cancel_of_unknown_entry_is_not_found_and_mutates_nothing() {
    let store = MemoryStore::with_specializations([1]);
    let (reservations, history) = services(&store);
    let booking = reservations
        .create_reservation(booking_input(1, "2025-06-01", "Jane Doe"))
        .await
        .unwrap();

    let err = history.cancel(HistoryId(99)).await.unwrap_err();

    assert_eq!(
        err,
        PortError::NotFound {
            entity: Entity::HistoryEntry,
            key: "99".to_string(),
        }
    );
    assert_eq!(err.to_string(), "History entry not found: 99");
    assert_eq!(history.get(booking.history.id).await.unwrap(), booking.history);
}

#[tokio::test]
async fn queue_list_includes_canceled_entries_in_order() {
    let store = MemoryStore::with_specializations([1]);
    let (reservations, history) = services(&store);
    let today = "2025-06-01";
    let mut bookings = Vec::new();
    for name in ["Ani", "Budi", "Citra"] {
        bookings.push(
            reservations
                .create_reservation(booking_input(1, today, name))
                .await
                .unwrap(),
        );
    }
    history.cancel(bookings[2].history.id).await.unwrap();

    let queue = history
        .queue_list(SpecializationId(1), date(today))
        .await
        .unwrap();

    let view: Vec<(u32, HistoryStatus)> = queue
        .iter()
        .map(|h| (h.queue_number.get(), h.status))
        .collect();
    assert_eq!(
        view,
        vec![
            (1, HistoryStatus::Pending),
            (2, HistoryStatus::Pending),
            (3, HistoryStatus::Canceled),
        ]
    );
}

#[tokio::test]
async fn reservation_edits_do_not_reach_the_history_snapshot() {
    let store = MemoryStore::with_specializations([1, 2]);
    let (reservations, history) = services(&store);
    let booking = reservations
        .create_reservation(booking_input(1, "2025-06-01", "Jane Doe"))
        .await
        .unwrap();

    let updated = reservations
        .update_reservation(
            booking.reservation.id,
            clinic_queue_core::ReservationPatch {
                name: Some("Jane Roe".into()),
                specialization_id: Some(SpecializationId(2)),
                appointment_date: Some(date("2025-06-03")),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(updated.patient.name, "Jane Roe");
    assert_eq!(updated.specialization_id, SpecializationId(2));

    let entry = history.get(booking.history.id).await.unwrap();
    assert_eq!(entry.patient_name, "Jane Doe");
    assert_eq!(entry.specialization_id, SpecializationId(1));
    assert_eq!(entry.appointment_date, date("2025-06-01"));
    assert_eq!(entry.queue_number, booking.history.queue_number);
}

#[tokio::test]
async fn updating_a_missing_reservation_is_not_found() {
    let store = MemoryStore::with_specializations([1]);
    let (reservations, _) = services(&store);

    let err = reservations
        .update_reservation(
            clinic_queue_core::ReservationId(42),
            clinic_queue_core::ReservationPatch {
                appointment_time: Some("10:00".into()),
                ..Default::default()
            },
        )
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        PortError::NotFound {
            entity: Entity::Reservation,
            ..
        }
    ));
}

#[tokio::test]
async fn list_reservations_filters_by_specialization_and_date() {
    let store = MemoryStore::with_specializations([1, 2]);
    let (reservations, _) = services(&store);
    for (specialization, day) in [(1, "2025-06-01"), (1, "2025-06-02"), (2, "2025-06-01")] {
        reservations
            .create_reservation(booking_input(specialization, day, "Pasien"))
            .await
            .unwrap();
    }

    let filtered = reservations
        .list_reservations(ReservationFilter {
            specialization_id: Some(SpecializationId(1)),
            appointment_date: Some(date("2025-06-01")),
        })
        .await
        .unwrap();
    assert_eq!(filtered.len(), 1);

    let by_day = reservations
        .list_reservations(ReservationFilter {
            appointment_date: Some(date("2025-06-01")),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(by_day.len(), 2);
}
