//! crates/clinic_queue_core/src/history.rs
//!
//! Queue lookups and status changes of history entries.

use chrono::NaiveDate;
use std::sync::Arc;
use tracing::{info, warn};

use crate::domain::{
    HistoryEntry, HistoryFilter, HistoryId, HistoryStatus, QueueScope, SpecializationId,
};
use crate::ports::{Entity, HistoryRepository, PortError, PortResult};

pub struct HistoryService {
    history: Arc<dyn HistoryRepository>,
}

impl HistoryService {
    pub fn new(history: Arc<dyn HistoryRepository>) -> Self {
        Self { history }
    }

    /// Moves a pending entry to `canceled`. The queue number stays issued.
    pub async fn cancel(&self, id: HistoryId) -> PortResult<HistoryEntry> {
        self.transition(id, HistoryStatus::Canceled).await
    }

    /// Moves a pending entry to `completed`.
    pub async fn complete(&self, id: HistoryId) -> PortResult<HistoryEntry> {
        self.transition(id, HistoryStatus::Completed).await
    }

    /// The queue of `specialization_id` on `service_date`, in serving order.
    /// Canceled entries are included; only hard deletes leave holes.
    pub async fn queue_list(
        &self,
        specialization_id: SpecializationId,
        service_date: NaiveDate,
    ) -> PortResult<Vec<HistoryEntry>> {
        let scope = QueueScope::new(specialization_id, service_date);
        let mut entries = self
            .history
            .list_history(HistoryFilter::for_scope(scope))
            .await?;
        if entries.is_empty() {
            return Err(PortError::not_found(Entity::Queue, scope));
        }
        entries.sort_by_key(|h| h.queue_number);
        Ok(entries)
    }

    pub async fn get(&self, id: HistoryId) -> PortResult<HistoryEntry> {
        self.history.get_history(id).await
    }

    /// Removes the entry without touching its reservation.
    pub async fn delete(&self, id: HistoryId) -> PortResult<HistoryEntry> {
        let deleted = self.history.delete_history(id).await?;
        info!(
            history_id = %id,
            reservation_id = %deleted.reservation_id,
            "History entry deleted"
        );
        Ok(deleted)
    }

    pub async fn list(&self, filter: HistoryFilter) -> PortResult<Vec<HistoryEntry>> {
        self.history.list_history(filter).await
    }

    async fn transition(&self, id: HistoryId, to: HistoryStatus) -> PortResult<HistoryEntry> {
        let current = self.history.get_history(id).await?;
        if !current.status.can_transition_to(to) {
            warn!(history_id = %id, from = %current.status, %to, "Rejected status change");
            return Err(PortError::InvalidTransition {
                from: current.status,
                to,
            });
        }

        match self
            .history
            .transition_status(id, current.status, to)
            .await?
        {
            Some(updated) => {
                info!(
                    history_id = %id,
                    queue_number = updated.queue_number.get(),
                    from = %current.status,
                    %to,
                    "History status changed"
                );
                Ok(updated)
            }
            // Another caller moved the entry between the read and the write.
            None => {
                let latest = self.history.get_history(id).await?;
                warn!(history_id = %id, from = %latest.status, %to, "Lost status race");
                Err(PortError::InvalidTransition {
                    from: latest.status,
                    to,
                })
            }
        }
    }
}
