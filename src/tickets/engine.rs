use chrono::Utc;
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::models::{
    Comment, CreateCommentRequest, CreateTicketRequest, ListQuery, NewComment, NewTicket,
    Priority, Ticket, TicketChanges, TicketDetail, TicketPage, TicketQuery, TicketStatus,
    TimelineAction, UpdateTicketRequest,
};
use super::store::TicketStore;
use super::timeline::TimelineRecorder;
use super::{sla, visibility};
use crate::core::config::TicketsConfig;
use crate::core::shared::error::ApiError;
use crate::security::auth_api::Principal;

/// Orchestrates ticket mutations: validation, visibility, SLA stamping,
/// optimistic concurrency and the audit trail.
#[derive(Clone)]
pub struct TicketEngine {
    store: Arc<dyn TicketStore>,
    timeline: TimelineRecorder,
    config: TicketsConfig,
}

impl TicketEngine {
    pub fn new(store: Arc<dyn TicketStore>, config: TicketsConfig) -> Self {
        Self {
            timeline: TimelineRecorder::new(store.clone()),
            store,
            config,
        }
    }

    pub async fn create(
        &self,
        principal: &Principal,
        request: CreateTicketRequest,
    ) -> Result<Ticket, ApiError> {
        let title = required_text(request.title, "title")?;
        let description = required_text(request.description, "description")?;
        let priority = match request.priority.as_deref() {
            Some(raw) => parse_priority(raw)?,
            None => Priority::default(),
        };

        let now = Utc::now();
        let ticket = self
            .store
            .insert_ticket(NewTicket {
                title,
                description,
                status: TicketStatus::Open,
                priority,
                requester_id: principal.id,
                assignee_id: request.assignee_id,
                sla_due_at: Some(sla::due_at(priority, now)),
                created_at: now,
            })
            .await?;

        self.timeline
            .record(
                ticket.id,
                Some(principal.id),
                TimelineAction::TicketCreated,
                json!({ "priority": ticket.priority, "assignee_id": ticket.assignee_id }),
            )
            .await;

        info!(
            ticket_id = ticket.id,
            requester_id = principal.id,
            priority = %ticket.priority,
            "Ticket created"
        );
        Ok(ticket)
    }

    pub async fn list(&self, principal: &Principal, query: ListQuery) -> Result<TicketPage, ApiError> {
        let limit = query
            .limit
            .as_deref()
            .and_then(|raw| raw.trim().parse::<i64>().ok())
            .unwrap_or(self.config.default_page_size)
            .clamp(1, self.config.max_page_size.max(1));
        let offset = query
            .offset
            .as_deref()
            .and_then(|raw| raw.trim().parse::<i64>().ok())
            .unwrap_or(0)
            .max(0);

        // Status is an exact-match filter; a value no ticket can hold matches nothing.
        let status = match query.status.as_deref().filter(|s| !s.is_empty()) {
            Some(raw) => match raw.parse::<TicketStatus>() {
                Ok(status) => Some(status),
                Err(_) => {
                    return Ok(TicketPage {
                        items: Vec::new(),
                        next_offset: None,
                    })
                }
            },
            None => None,
        };

        let breached = query
            .breached
            .as_deref()
            .is_some_and(|raw| matches!(raw, "1" | "true"));

        let search = query
            .search
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());

        let ticket_query = TicketQuery {
            requester_id: visibility::list_scope(principal),
            status,
            breached_before: breached.then(Utc::now),
            search,
            limit,
            offset,
        };

        let items = self.store.search_tickets(&ticket_query).await?;
        let next_offset = (items.len() as i64 == limit).then_some(offset + limit);

        Ok(TicketPage { items, next_offset })
    }

    pub async fn get(&self, principal: &Principal, id: i64) -> Result<TicketDetail, ApiError> {
        let ticket = self.visible_ticket(principal, id).await?;
        let comments = self.store.list_comments(id).await?;
        let timeline = self.store.list_timeline(id).await?;

        Ok(TicketDetail {
            ticket,
            comments,
            timeline,
        })
    }

    /// Applies a partial update guarded by the caller's expected version.
    ///
    /// Checks run in a fixed order: version present, ticket exists, ticket
    /// visible, version current, field values valid. Exactly one of any set of
    /// concurrent patches carrying the same version can succeed.
    pub async fn patch(
        &self,
        principal: &Principal,
        id: i64,
        request: UpdateTicketRequest,
    ) -> Result<Ticket, ApiError> {
        let expected_version = request
            .version
            .ok_or_else(|| ApiError::field_required("version"))?;

        let stored = self.visible_ticket(principal, id).await?;
        if stored.version != expected_version {
            debug!(
                ticket_id = id,
                expected_version,
                stored_version = stored.version,
                "Rejected stale patch"
            );
            return Err(ApiError::stale_update());
        }

        let (request, discarded) = visibility::restrict_patch(principal, request);
        if !discarded.is_empty() {
            debug!(ticket_id = id, user_id = principal.id, ?discarded, "Ignored restricted fields");
        }

        let changes = next_state(&stored, request)?;
        let updated = self
            .store
            .update_ticket_if_version(id, expected_version, changes.clone())
            .await?
            .ok_or_else(|| {
                warn!(ticket_id = id, expected_version, "Lost concurrent update race");
                ApiError::stale_update()
            })?;

        self.timeline
            .record(
                id,
                Some(principal.id),
                TimelineAction::TicketUpdated,
                json!({ "before": stored, "after": changes }),
            )
            .await;

        info!(ticket_id = id, version = updated.version, "Ticket updated");
        Ok(updated)
    }

    pub async fn add_comment(
        &self,
        principal: &Principal,
        ticket_id: i64,
        request: CreateCommentRequest,
    ) -> Result<Comment, ApiError> {
        let body = required_text(request.body, "body")?;
        self.visible_ticket(principal, ticket_id).await?;

        let comment = self
            .store
            .insert_comment(NewComment {
                ticket_id,
                author_id: principal.id,
                body,
                parent_id: request.parent_id,
                created_at: Utc::now(),
            })
            .await?;

        self.timeline
            .record(
                ticket_id,
                Some(principal.id),
                TimelineAction::CommentCreated,
                json!({ "comment_id": comment.id, "parent_id": comment.parent_id }),
            )
            .await;

        Ok(comment)
    }

    async fn visible_ticket(&self, principal: &Principal, id: i64) -> Result<Ticket, ApiError> {
        let ticket = self
            .store
            .get_ticket(id)
            .await?
            .ok_or_else(ApiError::ticket_not_found)?;

        if !visibility::principal_can_view(principal, &ticket) {
            return Err(ApiError::not_allowed());
        }
        Ok(ticket)
    }
}

/// Merges a permitted patch over the stored row. The SLA deadline is
/// recomputed from now only when the priority actually changes.
fn next_state(stored: &Ticket, request: UpdateTicketRequest) -> Result<TicketChanges, ApiError> {
    let title = match request.title {
        Some(title) => required_text(Some(title), "title")?,
        None => stored.title.clone(),
    };
    let description = match request.description {
        Some(description) => required_text(Some(description), "description")?,
        None => stored.description.clone(),
    };
    let status = match request.status.as_deref() {
        Some(raw) => raw
            .parse::<TicketStatus>()
            .map_err(|e| ApiError::invalid_field("status", e))?,
        None => stored.status,
    };
    let priority = match request.priority.as_deref() {
        Some(raw) => parse_priority(raw)?,
        None => stored.priority,
    };
    let assignee_id = request.assignee_id.unwrap_or(stored.assignee_id);

    let now = Utc::now();
    let sla_due_at = if priority != stored.priority {
        Some(sla::due_at(priority, now))
    } else {
        stored.sla_due_at
    };

    Ok(TicketChanges {
        title,
        description,
        status,
        priority,
        assignee_id,
        sla_due_at,
        updated_at: now,
    })
}

fn required_text(value: Option<String>, field: &'static str) -> Result<String, ApiError> {
    value
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| ApiError::field_required(field))
}

fn parse_priority(raw: &str) -> Result<Priority, ApiError> {
    raw.parse::<Priority>()
        .map_err(|e| ApiError::invalid_field("priority", e))
}
