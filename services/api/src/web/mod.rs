pub mod rest;
pub mod state;

use axum::{
    routing::{get, patch, post},
    Router,
};
use std::sync::Arc;

pub use rest::{
    cancel_history_handler, complete_history_handler, create_reservation_for_specialization_handler,
    create_reservation_handler, delete_history_handler, delete_reservation_handler,
    get_history_handler, get_reservation_handler, list_history_handler,
    list_reservations_handler, queue_handler, update_reservation_handler,
};
pub use state::AppState;

/// Builds the reservation and history routes over the shared state.
pub fn router(app_state: Arc<AppState>) -> Router {
    Router::new()
        .route(
            "/reservations",
            post(create_reservation_handler).get(list_reservations_handler),
        )
        .route(
            "/reservations/{id}",
            get(get_reservation_handler)
                .put(update_reservation_handler)
                .delete(delete_reservation_handler),
        )
        .route(
            "/specializations/{id}/reservations",
            post(create_reservation_for_specialization_handler),
        )
        .route("/history", get(list_history_handler))
        .route(
            "/history/{id}",
            get(get_history_handler).delete(delete_history_handler),
        )
        .route("/history/{id}/cancel", patch(cancel_history_handler))
        .route("/history/{id}/complete", patch(complete_history_handler))
        .route("/history/queue/{specialization_id}", get(queue_handler))
        .with_state(app_state)
}
