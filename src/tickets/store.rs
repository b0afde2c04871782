use async_trait::async_trait;

use super::models::{
    Comment, NewComment, NewTicket, NewTimelineEntry, Ticket, TicketChanges, TicketQuery,
    TimelineEntry,
};
use crate::storage::StoreError;

/// Ticket, comment and timeline persistence.
///
/// `update_ticket_if_version` is the only write path for existing tickets. It
/// applies `changes`, bumps the version by one and returns the new row, but
/// only if the stored version still equals `expected_version`; otherwise it
/// writes nothing and returns `None`.
#[async_trait]
pub trait TicketStore: Send + Sync {
    async fn insert_ticket(&self, ticket: NewTicket) -> Result<Ticket, StoreError>;

    async fn get_ticket(&self, id: i64) -> Result<Option<Ticket>, StoreError>;

    async fn update_ticket_if_version(
        &self,
        id: i64,
        expected_version: i64,
        changes: TicketChanges,
    ) -> Result<Option<Ticket>, StoreError>;

    /// Newest first. `search` matches title, description or the ticket's
    /// most recent comment, case-insensitively and literally.
    async fn search_tickets(&self, query: &TicketQuery) -> Result<Vec<Ticket>, StoreError>;

    async fn insert_comment(&self, comment: NewComment) -> Result<Comment, StoreError>;

    /// Oldest first.
    async fn list_comments(&self, ticket_id: i64) -> Result<Vec<Comment>, StoreError>;

    async fn append_timeline(&self, entry: NewTimelineEntry)
        -> Result<TimelineEntry, StoreError>;

    /// Oldest first.
    async fn list_timeline(&self, ticket_id: i64) -> Result<Vec<TimelineEntry>, StoreError>;
}
