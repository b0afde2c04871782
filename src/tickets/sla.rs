use chrono::{DateTime, Duration, Utc};

use super::models::Priority;

pub fn sla_hours(priority: Priority) -> i64 {
    match priority {
        Priority::Low => 72,
        Priority::Medium => 48,
        Priority::High => 24,
        Priority::Urgent => 4,
    }
}

/// Absolute deadline for a ticket of `priority` opened (or re-prioritised) at `now`.
pub fn due_at(priority: Priority, now: DateTime<Utc>) -> DateTime<Utc> {
    now + Duration::hours(sla_hours(priority))
}

pub fn is_breached(sla_due_at: Option<DateTime<Utc>>, now: DateTime<Utc>) -> bool {
    sla_due_at.is_some_and(|due| due < now)
}
