use crate::security::auth_api::{Capability, Principal};

use super::models::{Ticket, UpdateTicketRequest};

/// Agents and admins see every ticket; users see the tickets they requested.
pub fn principal_can_view(principal: &Principal, ticket: &Ticket) -> bool {
    principal.can(Capability::ViewAll)
        || (principal.can(Capability::ViewOwn) && ticket.requester_id == principal.id)
}

/// Requester filter to apply when listing, `None` when the caller sees all tickets.
pub fn list_scope(principal: &Principal) -> Option<i64> {
    if principal.can(Capability::ViewAll) {
        None
    } else {
        Some(principal.id)
    }
}

/// Strips the fields the caller may not change. Returns the permitted patch and
/// the names of the fields that were dropped.
pub fn restrict_patch(
    principal: &Principal,
    mut patch: UpdateTicketRequest,
) -> (UpdateTicketRequest, Vec<&'static str>) {
    let mut discarded = Vec::new();

    if principal.can(Capability::EditAll) {
        return (patch, discarded);
    }

    if patch.status.take().is_some() {
        discarded.push("status");
    }
    if patch.priority.take().is_some() {
        discarded.push("priority");
    }
    if patch.assignee_id.take().is_some() {
        discarded.push("assignee_id");
    }

    (patch, discarded)
}
