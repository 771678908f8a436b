//! services/api/src/web/state.rs
//!
//! Defines the application's shared state.

use clinic_queue_core::ports::{
    Clock, HistoryRepository, ReservationRepository, SpecializationDirectory,
};
use clinic_queue_core::{HistoryService, ReservationService};
use std::sync::Arc;

//=========================================================================================
// AppState (Shared Across All Requests)
//=========================================================================================

/// The shared application state, created once at startup and passed to all handlers.
#[derive(Clone)]
pub struct AppState {
    pub reservations: Arc<ReservationService>,
    pub history: Arc<HistoryService>,
    pub clock: Arc<dyn Clock>,
}

impl AppState {
    /// Wires the core services to the given adapters.
    pub fn new(
        reservation_repo: Arc<dyn ReservationRepository>,
        history_repo: Arc<dyn HistoryRepository>,
        specializations: Arc<dyn SpecializationDirectory>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            reservations: Arc::new(ReservationService::new(reservation_repo, specializations)),
            history: Arc::new(HistoryService::new(history_repo)),
            clock,
        }
    }
}
