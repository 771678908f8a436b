//! services/api/src/adapters/db.rs
//!
//! This module contains the database adapter, which is the concrete implementation
//! of the repository ports from the `core` crate. It handles all interactions
//! with the PostgreSQL database using `sqlx`.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use clinic_queue_core::domain::{
    HistoryEntry, HistoryFilter, HistoryId, HistoryStatus, NewHistoryEntry, NewReservation,
    PatientDetails, QueueNumber, QueueScope, Reservation, ReservationFilter, ReservationId,
    ReservationPatch, SpecializationId,
};
use clinic_queue_core::ports::{
    Entity, HistoryRepository, PortError, PortResult, QueueTransaction, ReservationRepository,
    SpecializationDirectory,
};
use sqlx::{FromRow, PgPool, Postgres, Transaction};

const RESERVATION_COLUMNS: &str = "id, specialization_id, name, age, phone, address, sex, \
     appointment_date, appointment_time, created_at, updated_at";

const HISTORY_COLUMNS: &str = "id, reservation_id, specialization_id, patient_name, \
     appointment_date, appointment_time, status, queue_number, created_at, updated_at";

//=========================================================================================
// The Main Adapter Struct
//=========================================================================================

/// A database adapter that implements the reservation, history and specialization ports.
#[derive(Clone)]
pub struct DbAdapter {
    pool: PgPool,
}

impl DbAdapter {
    /// Creates a new `DbAdapter`.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// A helper function to run database migrations at startup.
    pub async fn run_migrations(&self) -> Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }
}

//=========================================================================================
// Error Mapping
//=========================================================================================

/// Serialization failures, deadlocks and unique violations all mean another writer
/// got there first; the caller may retry with a fresh transaction.
fn port_error(e: sqlx::Error) -> PortError {
    if let sqlx::Error::Database(db) = &e {
        if let Some("40001" | "40P01" | "23505") = db.code().as_deref() {
            return PortError::Conflict(db.message().to_string());
        }
    }
    PortError::Internal(e.to_string())
}

fn lock_key(id: SpecializationId) -> PortResult<i32> {
    i32::try_from(id.0).map_err(|_| {
        PortError::Validation(format!("specialization_id {} is out of range", id))
    })
}

//=========================================================================================
// "Impure" Database Record Structs
//=========================================================================================

#[derive(FromRow)]
struct ReservationRecord {
    id: i64,
    specialization_id: i64,
    name: String,
    age: i32,
    phone: String,
    address: String,
    sex: String,
    appointment_date: NaiveDate,
    appointment_time: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}
impl ReservationRecord {
    fn to_domain(self) -> PortResult<Reservation> {
        let age = u32::try_from(self.age).map_err(|_| {
            PortError::Internal(format!("Reservation {} has a negative age", self.id))
        })?;
        Ok(Reservation {
            id: ReservationId(self.id),
            specialization_id: SpecializationId(self.specialization_id),
            patient: PatientDetails {
                name: self.name,
                age,
                phone: self.phone,
                address: self.address,
                sex: self.sex,
            },
            appointment_date: self.appointment_date,
            appointment_time: self.appointment_time,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

#[derive(FromRow)]
struct HistoryRecord {
    id: i64,
    reservation_id: i64,
    specialization_id: i64,
    patient_name: String,
    appointment_date: NaiveDate,
    appointment_time: String,
    status: String,
    queue_number: i32,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}
impl HistoryRecord {
    fn to_domain(self) -> PortResult<HistoryEntry> {
        let status = self
            .status
            .parse::<HistoryStatus>()
            .map_err(|e| PortError::Internal(e.to_string()))?;
        let queue_number = u32::try_from(self.queue_number)
            .ok()
            .and_then(QueueNumber::new)
            .ok_or_else(|| {
                PortError::Internal(format!(
                    "History entry {} has invalid queue number {}",
                    self.id, self.queue_number
                ))
            })?;
        Ok(HistoryEntry {
            id: HistoryId(self.id),
            reservation_id: ReservationId(self.reservation_id),
            specialization_id: SpecializationId(self.specialization_id),
            patient_name: self.patient_name,
            appointment_date: self.appointment_date,
            appointment_time: self.appointment_time,
            status,
            queue_number,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

fn reservations_to_domain(records: Vec<ReservationRecord>) -> PortResult<Vec<Reservation>> {
    records.into_iter().map(ReservationRecord::to_domain).collect()
}

fn history_to_domain(records: Vec<HistoryRecord>) -> PortResult<Vec<HistoryEntry>> {
    records.into_iter().map(HistoryRecord::to_domain).collect()
}

fn age_column(age: u32) -> PortResult<i32> {
    i32::try_from(age).map_err(|_| PortError::Validation(format!("age {} is out of range", age)))
}

//=========================================================================================
// `QueueTransaction` Implementation
//=========================================================================================

/// A booking transaction on one pooled connection. The scope lock is a
/// transaction-level advisory lock, so it is released by commit or rollback.
pub struct PgQueueTransaction {
    tx: Option<Transaction<'static, Postgres>>,
}

impl PgQueueTransaction {
    fn open(&mut self) -> PortResult<&mut Transaction<'static, Postgres>> {
        self.tx
            .as_mut()
            .ok_or_else(|| PortError::Internal("Transaction already finished".to_string()))
    }
}

#[async_trait]
impl QueueTransaction for PgQueueTransaction {
    async fn lock_scope(&mut self, scope: QueueScope) -> PortResult<()> {
        let specialization_key = lock_key(scope.specialization_id)?;
        let tx = self.open()?;
        sqlx::query("SELECT pg_advisory_xact_lock($1, $2)")
            .bind(specialization_key)
            .bind(scope.day_key())
            .execute(&mut **tx)
            .await
            .map_err(port_error)?;
        Ok(())
    }

    async fn highest_in_scope(&mut self, scope: QueueScope) -> PortResult<u32> {
        let tx = self.open()?;
        let highest: i64 = sqlx::query_scalar(
            "SELECT COALESCE(MAX(queue_number), 0)::BIGINT FROM history_entries WHERE specialization_id = $1 AND appointment_date = $2",
        )
        .bind(scope.specialization_id.0)
        .bind(scope.appointment_date)
        .fetch_one(&mut **tx)
        .await
        .map_err(port_error)?;
        u32::try_from(highest)
            .map_err(|_| PortError::Internal(format!("Queue of {} overflowed", scope)))
    }

    async fn insert_reservation(&mut self, new: &NewReservation) -> PortResult<Reservation> {
        let age = age_column(new.patient.age)?;
        let tx = self.open()?;
        let sql = format!(
            "INSERT INTO reservations \
             (specialization_id, name, age, phone, address, sex, appointment_date, appointment_time) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8) RETURNING {}",
            RESERVATION_COLUMNS
        );
        let record = sqlx::query_as::<_, ReservationRecord>(&sql)
            .bind(new.specialization_id.0)
            .bind(&new.patient.name)
            .bind(age)
            .bind(&new.patient.phone)
            .bind(&new.patient.address)
            .bind(&new.patient.sex)
            .bind(new.appointment_date)
            .bind(&new.appointment_time)
            .fetch_one(&mut **tx)
            .await
            .map_err(port_error)?;
        record.to_domain()
    }

    async fn insert_history(&mut self, new: &NewHistoryEntry) -> PortResult<HistoryEntry> {
        let queue_number = i32::try_from(new.queue_number.get()).map_err(|_| {
            PortError::Internal(format!("Queue number {} is out of range", new.queue_number))
        })?;
        let tx = self.open()?;
        let sql = format!(
            "INSERT INTO history_entries \
             (reservation_id, specialization_id, patient_name, appointment_date, appointment_time, status, queue_number) \
             VALUES ($1, $2, $3, $4, $5, $6, $7) RETURNING {}",
            HISTORY_COLUMNS
        );
        let record = sqlx::query_as::<_, HistoryRecord>(&sql)
            .bind(new.reservation_id.0)
            .bind(new.specialization_id.0)
            .bind(&new.patient_name)
            .bind(new.appointment_date)
            .bind(&new.appointment_time)
            .bind(new.status.as_str())
            .bind(queue_number)
            .fetch_one(&mut **tx)
            .await
            .map_err(port_error)?;
        record.to_domain()
    }

    async fn commit(&mut self) -> PortResult<()> {
        let tx = self
            .tx
            .take()
            .ok_or_else(|| PortError::Internal("Transaction already finished".to_string()))?;
        tx.commit().await.map_err(port_error)
    }

    async fn rollback(&mut self) -> PortResult<()> {
        let tx = self
            .tx
            .take()
            .ok_or_else(|| PortError::Internal("Transaction already finished".to_string()))?;
        tx.rollback().await.map_err(port_error)
    }
}

//=========================================================================================
// Repository Trait Implementations
//=========================================================================================

#[async_trait]
impl ReservationRepository for DbAdapter {
    async fn begin(&self) -> PortResult<Box<dyn QueueTransaction>> {
        let tx = self.pool.begin().await.map_err(port_error)?;
        Ok(Box::new(PgQueueTransaction { tx: Some(tx) }))
    }

    async fn get_reservation(&self, id: ReservationId) -> PortResult<Reservation> {
        let sql = format!("SELECT {} FROM reservations WHERE id = $1", RESERVATION_COLUMNS);
        sqlx::query_as::<_, ReservationRecord>(&sql)
            .bind(id.0)
            .fetch_optional(&self.pool)
            .await
            .map_err(port_error)?
            .ok_or_else(|| PortError::not_found(Entity::Reservation, id))?
            .to_domain()
    }

    async fn list_reservations(&self, filter: ReservationFilter) -> PortResult<Vec<Reservation>> {
        let sql = format!(
            "SELECT {} FROM reservations \
             WHERE ($1::BIGINT IS NULL OR specialization_id = $1) \
               AND ($2::DATE IS NULL OR appointment_date = $2) \
             ORDER BY id ASC",
            RESERVATION_COLUMNS
        );
        let records = sqlx::query_as::<_, ReservationRecord>(&sql)
            .bind(filter.specialization_id.map(|id| id.0))
            .bind(filter.appointment_date)
            .fetch_all(&self.pool)
            .await
            .map_err(port_error)?;
        reservations_to_domain(records)
    }

    async fn update_reservation(
        &self,
        id: ReservationId,
        patch: &ReservationPatch,
    ) -> PortResult<Reservation> {
        let age = patch.age.map(age_column).transpose()?;
        let sql = format!(
            "UPDATE reservations SET \
               specialization_id = COALESCE($2, specialization_id), \
               name = COALESCE($3, name), \
               age = COALESCE($4, age), \
               phone = COALESCE($5, phone), \
               address = COALESCE($6, address), \
               sex = COALESCE($7, sex), \
               appointment_date = COALESCE($8, appointment_date), \
               appointment_time = COALESCE($9, appointment_time), \
               updated_at = NOW() \
             WHERE id = $1 RETURNING {}",
            RESERVATION_COLUMNS
        );
        sqlx::query_as::<_, ReservationRecord>(&sql)
            .bind(id.0)
            .bind(patch.specialization_id.map(|s| s.0))
            .bind(patch.name.as_deref())
            .bind(age)
            .bind(patch.phone.as_deref())
            .bind(patch.address.as_deref())
            .bind(patch.sex.as_deref())
            .bind(patch.appointment_date)
            .bind(patch.appointment_time.as_deref())
            .fetch_optional(&self.pool)
            .await
            .map_err(port_error)?
            .ok_or_else(|| PortError::not_found(Entity::Reservation, id))?
            .to_domain()
    }

    async fn delete_reservation(&self, id: ReservationId) -> PortResult<Reservation> {
        // history_entries.reservation_id is ON DELETE CASCADE.
        let sql = format!("DELETE FROM reservations WHERE id = $1 RETURNING {}", RESERVATION_COLUMNS);
        sqlx::query_as::<_, ReservationRecord>(&sql)
            .bind(id.0)
            .fetch_optional(&self.pool)
            .await
            .map_err(port_error)?
            .ok_or_else(|| PortError::not_found(Entity::Reservation, id))?
            .to_domain()
    }
}

#[async_trait]
impl HistoryRepository for DbAdapter {
    async fn get_history(&self, id: HistoryId) -> PortResult<HistoryEntry> {
        let sql = format!("SELECT {} FROM history_entries WHERE id = $1", HISTORY_COLUMNS);
        sqlx::query_as::<_, HistoryRecord>(&sql)
            .bind(id.0)
            .fetch_optional(&self.pool)
            .await
            .map_err(port_error)?
            .ok_or_else(|| PortError::not_found(Entity::HistoryEntry, id))?
            .to_domain()
    }

    async fn list_history(&self, filter: HistoryFilter) -> PortResult<Vec<HistoryEntry>> {
        let sql = format!(
            "SELECT {} FROM history_entries \
             WHERE ($1::BIGINT IS NULL OR specialization_id = $1) \
               AND ($2::DATE IS NULL OR appointment_date = $2) \
               AND ($3::TEXT IS NULL OR status = $3) \
             ORDER BY appointment_date ASC, specialization_id ASC, queue_number ASC",
            HISTORY_COLUMNS
        );
        let records = sqlx::query_as::<_, HistoryRecord>(&sql)
            .bind(filter.specialization_id.map(|id| id.0))
            .bind(filter.appointment_date)
            .bind(filter.status.map(HistoryStatus::as_str))
            .fetch_all(&self.pool)
            .await
            .map_err(port_error)?;
        history_to_domain(records)
    }

    async fn transition_status(
        &self,
        id: HistoryId,
        from: HistoryStatus,
        to: HistoryStatus,
    ) -> PortResult<Option<HistoryEntry>> {
        let sql = format!(
            "UPDATE history_entries SET status = $3, updated_at = NOW() \
             WHERE id = $1 AND status = $2 RETURNING {}",
            HISTORY_COLUMNS
        );
        let updated = sqlx::query_as::<_, HistoryRecord>(&sql)
            .bind(id.0)
            .bind(from.as_str())
            .bind(to.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(port_error)?;

        match updated {
            Some(record) => record.to_domain().map(Some),
            None => {
                let exists: bool =
                    sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM history_entries WHERE id = $1)")
                        .bind(id.0)
                        .fetch_one(&self.pool)
                        .await
                        .map_err(port_error)?;
                if exists {
                    Ok(None)
                } else {
                    Err(PortError::not_found(Entity::HistoryEntry, id))
                }
            }
        }
    }

    async fn delete_history(&self, id: HistoryId) -> PortResult<HistoryEntry> {
        let sql = format!("DELETE FROM history_entries WHERE id = $1 RETURNING {}", HISTORY_COLUMNS);
        sqlx::query_as::<_, HistoryRecord>(&sql)
            .bind(id.0)
            .fetch_optional(&self.pool)
            .await
            .map_err(port_error)?
            .ok_or_else(|| PortError::not_found(Entity::HistoryEntry, id))?
            .to_domain()
    }
}

#[async_trait]
impl SpecializationDirectory for DbAdapter {
    async fn exists(&self, id: SpecializationId) -> PortResult<bool> {
        sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM specializations WHERE id = $1)")
            .bind(id.0)
            .fetch_one(&self.pool)
            .await
            .map_err(port_error)
    }
}
