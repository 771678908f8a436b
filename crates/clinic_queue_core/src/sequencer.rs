//! crates/clinic_queue_core/src/sequencer.rs
//!
//! Computes the next queue number of a (specialization, date) scope.

use tracing::debug;

use crate::domain::{QueueNumber, QueueScope};
use crate::ports::{PortResult, QueueTransaction};

/// Issues queue numbers from durable state only. There is no in-process counter:
/// the number is one above the highest number held in the scope (canceled ones
/// included), read while holding the scope lock. Without deletions this is the
/// entry count plus one; after a deletion the gap is left unfilled.
#[derive(Debug, Clone, Copy, Default)]
pub struct QueueSequencer;

impl QueueSequencer {
    pub fn new() -> Self {
        Self
    }

    /// Locks `scope` inside `tx` and returns the number the next entry must take.
    ///
    /// The lock stays held until `tx` finishes, so the caller must insert the history
    /// entry through the same transaction. If `tx` is rolled back the number is
    /// not consumed.
    pub async fn next(
        &self,
        tx: &mut dyn QueueTransaction,
        scope: QueueScope,
    ) -> PortResult<QueueNumber> {
        tx.lock_scope(scope).await?;
        let highest = tx.highest_in_scope(scope).await?;
        let number = QueueNumber::after(highest);
        debug!(%scope, highest, queue_number = number.get(), "Queue number computed");
        Ok(number)
    }
}
