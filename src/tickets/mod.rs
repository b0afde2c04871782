pub mod engine;
pub mod models;
pub mod sla;
pub mod store;
pub mod timeline;
pub mod visibility;

use axum::{
    extract::{Path, Query, State},
    middleware,
    routing::{get, post},
    Json, Router,
};
use std::sync::Arc;

use crate::core::shared::error::{ApiError, ApiJson};
use crate::core::shared::state::AppState;
use crate::idempotency::{idempotency_middleware, IdempotencyGuard};
use crate::security::auth_api::CurrentUser;

pub use engine::TicketEngine;
pub use models::{
    Comment, CommentResponse, CreateCommentRequest, CreateTicketRequest, ListQuery, NewComment,
    NewTicket, NewTimelineEntry, Priority, Ticket, TicketChanges, TicketDetail, TicketPage,
    TicketQuery, TicketResponse, TicketStatus, TimelineAction, TimelineEntry, UpdateTicketRequest,
};
pub use store::TicketStore;

/// Non-numeric ids cannot name a ticket.
fn ticket_id(raw: &str) -> Result<i64, ApiError> {
    raw.parse().map_err(|_| ApiError::ticket_not_found())
}

pub async fn create_ticket(
    State(state): State<Arc<AppState>>,
    CurrentUser(principal): CurrentUser,
    ApiJson(request): ApiJson<CreateTicketRequest>,
) -> Result<Json<TicketResponse>, ApiError> {
    let ticket = state.tickets.create(&principal, request).await?;
    Ok(Json(TicketResponse { ticket }))
}

pub async fn list_tickets(
    State(state): State<Arc<AppState>>,
    CurrentUser(principal): CurrentUser,
    Query(query): Query<ListQuery>,
) -> Result<Json<TicketPage>, ApiError> {
    let page = state.tickets.list(&principal, query).await?;
    Ok(Json(page))
}

pub async fn get_ticket(
    State(state): State<Arc<AppState>>,
    CurrentUser(principal): CurrentUser,
    Path(id): Path<String>,
) -> Result<Json<TicketDetail>, ApiError> {
    let detail = state.tickets.get(&principal, ticket_id(&id)?).await?;
    Ok(Json(detail))
}

pub async fn update_ticket(
    State(state): State<Arc<AppState>>,
    CurrentUser(principal): CurrentUser,
    Path(id): Path<String>,
    ApiJson(request): ApiJson<UpdateTicketRequest>,
) -> Result<Json<TicketResponse>, ApiError> {
    let ticket = state
        .tickets
        .patch(&principal, ticket_id(&id)?, request)
        .await?;
    Ok(Json(TicketResponse { ticket }))
}

pub async fn add_comment(
    State(state): State<Arc<AppState>>,
    CurrentUser(principal): CurrentUser,
    Path(id): Path<String>,
    ApiJson(request): ApiJson<CreateCommentRequest>,
) -> Result<Json<CommentResponse>, ApiError> {
    let comment = state
        .tickets
        .add_comment(&principal, ticket_id(&id)?, request)
        .await?;
    Ok(Json(CommentResponse { comment }))
}

/// Ticket routes. Only the two create endpoints sit behind the idempotency guard.
pub fn configure_tickets_routes(guard: IdempotencyGuard) -> Router<Arc<AppState>> {
    let idempotent = middleware::from_fn_with_state(guard, idempotency_middleware);

    Router::new()
        .route(
            "/api/tickets",
            post(create_ticket)
                .route_layer(idempotent.clone())
                .get(list_tickets),
        )
        .route("/api/tickets/:id", get(get_ticket).patch(update_ticket))
        .route(
            "/api/tickets/:id/comments",
            post(add_comment).route_layer(idempotent),
        )
}
