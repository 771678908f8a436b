//! services/api/src/web/rest.rs
//!
//! Contains the Axum handlers for the reservation and history endpoints and the
//! master definition for the OpenAPI specification.

use crate::web::state::AppState;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json},
};
use chrono::{DateTime, NaiveDate, Utc};
use clinic_queue_core::domain::{
    HistoryEntry, HistoryFilter, HistoryId, HistoryStatus, PatientDetails, Reservation,
    ReservationFilter, ReservationId, ReservationInput, ReservationPatch, SpecializationId,
};
use clinic_queue_core::ports::PortError;
use clinic_queue_core::Booking;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, warn};
use utoipa::{IntoParams, OpenApi, ToSchema};

//=========================================================================================
// OpenAPI Master Definition
//=========================================================================================

#[derive(OpenApi)]
#[openapi(
    paths(
        create_reservation_handler,
        create_reservation_for_specialization_handler,
        list_reservations_handler,
        get_reservation_handler,
        update_reservation_handler,
        delete_reservation_handler,
        list_history_handler,
        get_history_handler,
        queue_handler,
        cancel_history_handler,
        complete_history_handler,
        delete_history_handler,
    ),
    components(
        schemas(
            CreateReservationRequest,
            UpdateReservationRequest,
            ReservationResponse,
            HistoryResponse,
            BookingResponse,
            ErrorResponse,
        )
    ),
    tags(
        (name = "Clinic Queue API", description = "Reservation booking and queue tracking.")
    )
)]
pub struct ApiDoc;

//=========================================================================================
// API Response and Payload Structs
//=========================================================================================

/// Booking payload. `specialization_id` may instead come from the URL path.
#[derive(Deserialize, ToSchema)]
pub struct CreateReservationRequest {
    pub specialization_id: Option<i64>,
    pub name: String,
    pub age: u32,
    pub phone: String,
    pub address: String,
    pub sex: String,
    pub appointment_date: NaiveDate,
    pub appointment_time: String,
}

impl CreateReservationRequest {
    fn into_input(self) -> ReservationInput {
        ReservationInput {
            specialization_id: self.specialization_id.map(SpecializationId),
            patient: PatientDetails {
                name: self.name,
                age: self.age,
                phone: self.phone,
                address: self.address,
                sex: self.sex,
            },
            appointment_date: self.appointment_date,
            appointment_time: self.appointment_time,
        }
    }
}

#[derive(Deserialize, Default, ToSchema)]
pub struct UpdateReservationRequest {
    pub specialization_id: Option<i64>,
    pub name: Option<String>,
    pub age: Option<u32>,
    pub phone: Option<String>,
    pub address: Option<String>,
    pub sex: Option<String>,
    pub appointment_date: Option<NaiveDate>,
    pub appointment_time: Option<String>,
}

impl From<UpdateReservationRequest> for ReservationPatch {
    fn from(req: UpdateReservationRequest) -> Self {
        ReservationPatch {
            specialization_id: req.specialization_id.map(SpecializationId),
            name: req.name,
            age: req.age,
            phone: req.phone,
            address: req.address,
            sex: req.sex,
            appointment_date: req.appointment_date,
            appointment_time: req.appointment_time,
        }
    }
}

#[derive(Serialize, Deserialize, ToSchema)]
pub struct ReservationResponse {
    pub id: i64,
    pub specialization_id: i64,
    pub name: String,
    pub age: u32,
    pub phone: String,
    pub address: String,
    pub sex: String,
    pub appointment_date: NaiveDate,
    pub appointment_time: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<Reservation> for ReservationResponse {
    fn from(r: Reservation) -> Self {
        Self {
            id: r.id.0,
            specialization_id: r.specialization_id.0,
            name: r.patient.name,
            age: r.patient.age,
            phone: r.patient.phone,
            address: r.patient.address,
            sex: r.patient.sex,
            appointment_date: r.appointment_date,
            appointment_time: r.appointment_time,
            created_at: r.created_at,
            updated_at: r.updated_at,
        }
    }
}

#[derive(Serialize, Deserialize, ToSchema)]
pub struct HistoryResponse {
    pub id: i64,
    pub reservation_id: i64,
    pub specialization_id: i64,
    pub patient_name: String,
    pub appointment_date: NaiveDate,
    pub appointment_time: String,
    /// One of `pending`, `completed` or `canceled`.
    pub status: String,
    pub queue_number: u32,
    /// Zero-padded ticket label, e.g. `003`.
    pub queue_label: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<HistoryEntry> for HistoryResponse {
    fn from(h: HistoryEntry) -> Self {
        Self {
            id: h.id.0,
            reservation_id: h.reservation_id.0,
            specialization_id: h.specialization_id.0,
            patient_name: h.patient_name,
            appointment_date: h.appointment_date,
            appointment_time: h.appointment_time,
            status: h.status.to_string(),
            queue_number: h.queue_number.get(),
            queue_label: h.queue_number.label(),
            created_at: h.created_at,
            updated_at: h.updated_at,
        }
    }
}

/// The response payload sent after successfully booking a reservation.
#[derive(Serialize, Deserialize, ToSchema)]
pub struct BookingResponse {
    pub reservation: ReservationResponse,
    pub history: HistoryResponse,
}

impl From<Booking> for BookingResponse {
    fn from(b: Booking) -> Self {
        Self {
            reservation: b.reservation.into(),
            history: b.history.into(),
        }
    }
}

#[derive(Serialize, Deserialize, ToSchema)]
pub struct ErrorResponse {
    pub error: String,
}

#[derive(Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct ReservationQuery {
    pub specialization_id: Option<i64>,
    pub date: Option<NaiveDate>,
}

#[derive(Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct HistoryQuery {
    pub specialization_id: Option<i64>,
    pub date: Option<NaiveDate>,
    /// One of `pending`, `completed` or `canceled`.
    pub status: Option<String>,
}

#[derive(Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct QueueQuery {
    /// Service date to show. Defaults to the clinic's current date.
    pub date: Option<NaiveDate>,
}

//=========================================================================================
// Error Mapping
//=========================================================================================

type ErrorReply = (StatusCode, Json<ErrorResponse>);

fn error_reply(status: StatusCode, message: impl Into<String>) -> ErrorReply {
    (
        status,
        Json(ErrorResponse {
            error: message.into(),
        }),
    )
}

/// Maps a core error kind to its HTTP status. Internal details are logged, not returned.
fn port_error_reply(action: &str, e: PortError) -> ErrorReply {
    let status = match &e {
        PortError::NotFound { .. } => StatusCode::NOT_FOUND,
        PortError::Validation(_) => StatusCode::BAD_REQUEST,
        PortError::Conflict(_) | PortError::InvalidTransition { .. } => StatusCode::CONFLICT,
        PortError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    if status == StatusCode::INTERNAL_SERVER_ERROR {
        error!("Failed to {}: {:?}", action, e);
        return error_reply(status, format!("Failed to {}", action));
    }
    warn!("Could not {}: {}", action, e);
    error_reply(status, e.to_string())
}

//=========================================================================================
// Reservation Handlers
//=========================================================================================

/// Book a reservation and receive its queue number.
#[utoipa::path(
    post,
    path = "/reservations",
    request_body = CreateReservationRequest,
    responses(
        (status = 201, description = "Reservation booked", body = BookingResponse),
        (status = 400, description = "Invalid payload", body = ErrorResponse),
        (status = 404, description = "Specialization not found", body = ErrorResponse),
        (status = 409, description = "Queue number conflict persisted after retry", body = ErrorResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    )
)]
pub async fn create_reservation_handler(
    State(app_state): State<Arc<AppState>>,
    Json(req): Json<CreateReservationRequest>,
) -> Result<impl IntoResponse, ErrorReply> {
    let booking = app_state
        .reservations
        .create_reservation(req.into_input())
        .await
        .map_err(|e| port_error_reply("create reservation", e))?;
    Ok((StatusCode::CREATED, Json(BookingResponse::from(booking))))
}

/// Book a reservation for the specialization named in the path.
#[utoipa::path(
    post,
    path = "/specializations/{id}/reservations",
    request_body = CreateReservationRequest,
    params(("id" = i64, Path, description = "Specialization id; overrides the body field.")),
    responses(
        (status = 201, description = "Reservation booked", body = BookingResponse),
        (status = 400, description = "Invalid payload", body = ErrorResponse),
        (status = 404, description = "Specialization not found", body = ErrorResponse),
        (status = 409, description = "Queue number conflict persisted after retry", body = ErrorResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    )
)]
pub async fn create_reservation_for_specialization_handler(
    State(app_state): State<Arc<AppState>>,
    Path(specialization_id): Path<i64>,
    Json(mut req): Json<CreateReservationRequest>,
) -> Result<impl IntoResponse, ErrorReply> {
    req.specialization_id = Some(specialization_id);
    let booking = app_state
        .reservations
        .create_reservation(req.into_input())
        .await
        .map_err(|e| port_error_reply("create reservation", e))?;
    Ok((StatusCode::CREATED, Json(BookingResponse::from(booking))))
}

/// List reservations, optionally filtered by specialization and date.
#[utoipa::path(
    get,
    path = "/reservations",
    params(ReservationQuery),
    responses(
        (status = 200, description = "Matching reservations", body = [ReservationResponse]),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    )
)]
pub async fn list_reservations_handler(
    State(app_state): State<Arc<AppState>>,
    Query(query): Query<ReservationQuery>,
) -> Result<impl IntoResponse, ErrorReply> {
    let filter = ReservationFilter {
        specialization_id: query.specialization_id.map(SpecializationId),
        appointment_date: query.date,
    };
    let reservations = app_state
        .reservations
        .list_reservations(filter)
        .await
        .map_err(|e| port_error_reply("list reservations", e))?;
    let body: Vec<ReservationResponse> = reservations.into_iter().map(Into::into).collect();
    Ok(Json(body))
}

#[utoipa::path(
    get,
    path = "/reservations/{id}",
    params(("id" = i64, Path, description = "Reservation id")),
    responses(
        (status = 200, description = "The reservation", body = ReservationResponse),
        (status = 404, description = "Reservation not found", body = ErrorResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    )
)]
pub async fn get_reservation_handler(
    State(app_state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ErrorReply> {
    let reservation = app_state
        .reservations
        .get_reservation(ReservationId(id))
        .await
        .map_err(|e| port_error_reply("get reservation", e))?;
    Ok(Json(ReservationResponse::from(reservation)))
}

/// Edit a reservation. The queue entry keeps the values captured at booking time.
#[utoipa::path(
    put,
    path = "/reservations/{id}",
    request_body = UpdateReservationRequest,
    params(("id" = i64, Path, description = "Reservation id")),
    responses(
        (status = 200, description = "Reservation updated", body = ReservationResponse),
        (status = 400, description = "Invalid patch", body = ErrorResponse),
        (status = 404, description = "Reservation or specialization not found", body = ErrorResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    )
)]
pub async fn update_reservation_handler(
    State(app_state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    Json(req): Json<UpdateReservationRequest>,
) -> Result<impl IntoResponse, ErrorReply> {
    let reservation = app_state
        .reservations
        .update_reservation(ReservationId(id), req.into())
        .await
        .map_err(|e| port_error_reply("update reservation", e))?;
    Ok(Json(ReservationResponse::from(reservation)))
}

/// Delete a reservation together with its queue entry.
#[utoipa::path(
    delete,
    path = "/reservations/{id}",
    params(("id" = i64, Path, description = "Reservation id")),
    responses(
        (status = 200, description = "Reservation deleted", body = ReservationResponse),
        (status = 404, description = "Reservation not found", body = ErrorResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    )
)]
pub async fn delete_reservation_handler(
    State(app_state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ErrorReply> {
    let deleted = app_state
        .reservations
        .delete_reservation(ReservationId(id))
        .await
        .map_err(|e| port_error_reply("delete reservation", e))?;
    Ok(Json(ReservationResponse::from(deleted)))
}

//=========================================================================================
// History Handlers
//=========================================================================================

/// List history entries across all dates, for reporting.
#[utoipa::path(
    get,
    path = "/history",
    params(HistoryQuery),
    responses(
        (status = 200, description = "Matching history entries", body = [HistoryResponse]),
        (status = 400, description = "Unknown status filter", body = ErrorResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    )
)]
pub async fn list_history_handler(
    State(app_state): State<Arc<AppState>>,
    Query(query): Query<HistoryQuery>,
) -> Result<impl IntoResponse, ErrorReply> {
    let status = query
        .status
        .as_deref()
        .map(str::parse::<HistoryStatus>)
        .transpose()
        .map_err(|e| error_reply(StatusCode::BAD_REQUEST, e.to_string()))?;
    let filter = HistoryFilter {
        specialization_id: query.specialization_id.map(SpecializationId),
        appointment_date: query.date,
        status,
    };
    let entries = app_state
        .history
        .list(filter)
        .await
        .map_err(|e| port_error_reply("list history", e))?;
    let body: Vec<HistoryResponse> = entries.into_iter().map(Into::into).collect();
    Ok(Json(body))
}

#[utoipa::path(
    get,
    path = "/history/{id}",
    params(("id" = i64, Path, description = "History entry id")),
    responses(
        (status = 200, description = "The history entry", body = HistoryResponse),
        (status = 404, description = "History entry not found", body = ErrorResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    )
)]
pub async fn get_history_handler(
    State(app_state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ErrorReply> {
    let entry = app_state
        .history
        .get(HistoryId(id))
        .await
        .map_err(|e| port_error_reply("get history entry", e))?;
    Ok(Json(HistoryResponse::from(entry)))
}

/// The day's queue of one specialization, in serving order, canceled entries included.
#[utoipa::path(
    get,
    path = "/history/queue/{specialization_id}",
    params(
        ("specialization_id" = i64, Path, description = "Specialization id"),
        QueueQuery
    ),
    responses(
        (status = 200, description = "Queue in serving order", body = [HistoryResponse]),
        (status = 404, description = "No entries for that day", body = ErrorResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    )
)]
pub async fn queue_handler(
    State(app_state): State<Arc<AppState>>,
    Path(specialization_id): Path<i64>,
    Query(query): Query<QueueQuery>,
) -> Result<impl IntoResponse, ErrorReply> {
    let service_date = query.date.unwrap_or_else(|| app_state.clock.today());
    let queue = app_state
        .history
        .queue_list(SpecializationId(specialization_id), service_date)
        .await
        .map_err(|e| port_error_reply("load queue", e))?;
    let body: Vec<HistoryResponse> = queue.into_iter().map(Into::into).collect();
    Ok(Json(body))
}

#[utoipa::path(
    patch,
    path = "/history/{id}/cancel",
    params(("id" = i64, Path, description = "History entry id")),
    responses(
        (status = 200, description = "Entry canceled", body = HistoryResponse),
        (status = 404, description = "History entry not found", body = ErrorResponse),
        (status = 409, description = "Entry is already completed or canceled", body = ErrorResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    )
)]
pub async fn cancel_history_handler(
    State(app_state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ErrorReply> {
    let entry = app_state
        .history
        .cancel(HistoryId(id))
        .await
        .map_err(|e| port_error_reply("cancel history entry", e))?;
    Ok(Json(HistoryResponse::from(entry)))
}

#[utoipa::path(
    patch,
    path = "/history/{id}/complete",
    params(("id" = i64, Path, description = "History entry id")),
    responses(
        (status = 200, description = "Entry completed", body = HistoryResponse),
        (status = 404, description = "History entry not found", body = ErrorResponse),
        (status = 409, description = "Entry is already completed or canceled", body = ErrorResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    )
)]
pub async fn complete_history_handler(
    State(app_state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ErrorReply> {
    let entry = app_state
        .history
        .complete(HistoryId(id))
        .await
        .map_err(|e| port_error_reply("complete history entry", e))?;
    Ok(Json(HistoryResponse::from(entry)))
}

/// Purge a history entry. Its reservation is kept.
#[utoipa::path(
    delete,
    path = "/history/{id}",
    params(("id" = i64, Path, description = "History entry id")),
    responses(
        (status = 200, description = "Entry deleted", body = HistoryResponse),
        (status = 404, description = "History entry not found", body = ErrorResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    )
)]
pub async fn delete_history_handler(
    State(app_state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ErrorReply> {
    let deleted = app_state
        .history
        .delete(HistoryId(id))
        .await
        .map_err(|e| port_error_reply("delete history entry", e))?;
    Ok(Json(HistoryResponse::from(deleted)))
}
