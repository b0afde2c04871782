use chrono::Utc;
use serde_json::Value;
use std::sync::Arc;
use tracing::error;

use super::models::{NewTimelineEntry, TimelineAction, TimelineEntry};
use super::store::TicketStore;

/// Append-only audit trail for ticket mutations.
///
/// Entries are written after the mutation they describe has been stored. A
/// failed append is logged and swallowed: the mutation stays durable and the
/// caller still gets its result.
#[derive(Clone)]
pub struct TimelineRecorder {
    store: Arc<dyn TicketStore>,
}

impl TimelineRecorder {
    pub fn new(store: Arc<dyn TicketStore>) -> Self {
        Self { store }
    }

    pub async fn record(
        &self,
        ticket_id: i64,
        actor_id: Option<i64>,
        action: TimelineAction,
        details: Value,
    ) -> Option<TimelineEntry> {
        let entry = NewTimelineEntry {
            ticket_id,
            actor_id,
            action,
            details,
            created_at: Utc::now(),
        };

        match self.store.append_timeline(entry).await {
            Ok(entry) => Some(entry),
            Err(e) => {
                error!(
                    ticket_id,
                    action = action.as_str(),
                    "Failed to append timeline entry: {e}"
                );
                None
            }
        }
    }
}
