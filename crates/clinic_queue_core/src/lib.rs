pub mod domain;
pub mod history;
pub mod memory;
pub mod ports;
pub mod reservation;
pub mod sequencer;

pub use domain::{
    HistoryEntry, HistoryFilter, HistoryId, HistoryStatus, NewHistoryEntry, NewReservation,
    PatientDetails, QueueNumber, QueueScope, Reservation, ReservationFilter, ReservationId,
    ReservationInput, ReservationPatch, SpecializationId,
};
pub use history::HistoryService;
pub use ports::{
    Clock, Entity, HistoryRepository, PortError, PortResult, QueueTransaction,
    ReservationRepository, SpecializationDirectory,
};
pub use reservation::{Booking, ReservationService};
pub use sequencer::QueueSequencer;
