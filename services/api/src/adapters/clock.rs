//! services/api/src/adapters/clock.rs
//!
//! The wall clock used to decide the clinic's current service date.

use chrono::{FixedOffset, NaiveDate, Utc};
use clinic_queue_core::ports::Clock;

/// Reads the system time and converts it to the clinic's local date.
#[derive(Debug, Clone, Copy)]
pub struct FixedOffsetClock {
    offset: FixedOffset,
}

impl FixedOffsetClock {
    pub fn new(offset: FixedOffset) -> Self {
        Self { offset }
    }
}

impl Clock for FixedOffsetClock {
    fn today(&self) -> NaiveDate {
        Utc::now().with_timezone(&self.offset).date_naive()
    }
}
