use async_trait::async_trait;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use tokio::sync::RwLock;

use super::StoreError;
use crate::auth::users::{NewUser, User, UserCredentials, UserStore};
use crate::idempotency::{IdempotencyRecord, IdempotencyStore, NewIdempotencyRecord, Reservation};
use crate::tickets::models::{
    Comment, NewComment, NewTicket, NewTimelineEntry, Ticket, TicketChanges, TicketQuery,
    TimelineEntry,
};
use crate::tickets::sla;
use crate::tickets::store::TicketStore;

#[derive(Debug, Default)]
struct Tables {
    users: BTreeMap<i64, UserCredentials>,
    tickets: BTreeMap<i64, Ticket>,
    comments: Vec<Comment>,
    timeline: Vec<TimelineEntry>,
    idempotency: HashMap<String, IdempotencyRecord>,
    next_user_id: i64,
    next_ticket_id: i64,
    next_comment_id: i64,
    next_timeline_id: i64,
}

fn next_id(counter: &mut i64) -> i64 {
    *counter += 1;
    *counter
}

/// In-process store with the same contracts and ordering rules as [`super::PgStore`].
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored tickets. Used by integration tests to check for duplicate writes.
    pub async fn ticket_count(&self) -> usize {
        self.tables.read().await.tickets.len()
    }

    /// Overwrites a ticket's SLA deadline, bypassing the version check.
    /// Exists so integration tests can put a ticket past its deadline.
    pub async fn set_sla_due_at(&self, id: i64, due: Option<chrono::DateTime<chrono::Utc>>) {
        if let Some(ticket) = self.tables.write().await.tickets.get_mut(&id) {
            ticket.sla_due_at = due;
        }
    }
}

fn latest_comment<'a>(comments: &'a [Comment], ticket_id: i64) -> Option<&'a Comment> {
    comments
        .iter()
        .filter(|c| c.ticket_id == ticket_id)
        .max_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)))
}

fn matches_search(ticket: &Ticket, comments: &[Comment], needle: &str) -> bool {
    let contains = |haystack: &str| haystack.to_lowercase().contains(needle);
    contains(&ticket.title)
        || contains(&ticket.description)
        || latest_comment(comments, ticket.id).is_some_and(|c| contains(&c.body))
}

#[async_trait]
impl TicketStore for MemoryStore {
    async fn insert_ticket(&self, new: NewTicket) -> Result<Ticket, StoreError> {
        let mut tables = self.tables.write().await;
        let ticket = Ticket {
            id: next_id(&mut tables.next_ticket_id),
            title: new.title,
            description: new.description,
            status: new.status,
            priority: new.priority,
            requester_id: new.requester_id,
            assignee_id: new.assignee_id,
            sla_due_at: new.sla_due_at,
            created_at: new.created_at,
            updated_at: new.created_at,
            version: 1,
        };
        tables.tickets.insert(ticket.id, ticket.clone());
        Ok(ticket)
    }

    async fn get_ticket(&self, id: i64) -> Result<Option<Ticket>, StoreError> {
        Ok(self.tables.read().await.tickets.get(&id).cloned())
    }

    async fn update_ticket_if_version(
        &self,
        id: i64,
        expected_version: i64,
        changes: TicketChanges,
    ) -> Result<Option<Ticket>, StoreError> {
        let mut tables = self.tables.write().await;
        let Some(ticket) = tables.tickets.get_mut(&id) else {
            return Ok(None);
        };
        if ticket.version != expected_version {
            return Ok(None);
        }

        ticket.title = changes.title;
        ticket.description = changes.description;
        ticket.status = changes.status;
        ticket.priority = changes.priority;
        ticket.assignee_id = changes.assignee_id;
        ticket.sla_due_at = changes.sla_due_at;
        ticket.updated_at = changes.updated_at;
        ticket.version += 1;

        Ok(Some(ticket.clone()))
    }

    async fn search_tickets(&self, query: &TicketQuery) -> Result<Vec<Ticket>, StoreError> {
        let tables = self.tables.read().await;
        let needle = query.search.as_deref().map(str::to_lowercase);

        let mut matched: Vec<&Ticket> = tables
            .tickets
            .values()
            .filter(|t| query.requester_id.map_or(true, |id| t.requester_id == id))
            .filter(|t| query.status.map_or(true, |s| t.status == s))
            .filter(|t| {
                query
                    .breached_before
                    .map_or(true, |now| sla::is_breached(t.sla_due_at, now))
            })
            .filter(|t| {
                needle
                    .as_deref()
                    .map_or(true, |n| matches_search(t, &tables.comments, n))
            })
            .collect();

        matched.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));

        Ok(matched
            .into_iter()
            .skip(query.offset.max(0) as usize)
            .take(query.limit.max(0) as usize)
            .cloned()
            .collect())
    }

    async fn insert_comment(&self, new: NewComment) -> Result<Comment, StoreError> {
        let mut tables = self.tables.write().await;
        if !tables.tickets.contains_key(&new.ticket_id) {
            return Err(StoreError::Backend(format!(
                "comment references missing ticket {}",
                new.ticket_id
            )));
        }
        let comment = Comment {
            id: next_id(&mut tables.next_comment_id),
            ticket_id: new.ticket_id,
            author_id: new.author_id,
            body: new.body,
            parent_id: new.parent_id,
            created_at: new.created_at,
        };
        tables.comments.push(comment.clone());
        Ok(comment)
    }

    async fn list_comments(&self, ticket_id: i64) -> Result<Vec<Comment>, StoreError> {
        let tables = self.tables.read().await;
        let mut comments: Vec<Comment> = tables
            .comments
            .iter()
            .filter(|c| c.ticket_id == ticket_id)
            .cloned()
            .collect();
        comments.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(comments)
    }

    async fn append_timeline(&self, new: NewTimelineEntry) -> Result<TimelineEntry, StoreError> {
        let mut tables = self.tables.write().await;
        let entry = TimelineEntry {
            id: next_id(&mut tables.next_timeline_id),
            ticket_id: new.ticket_id,
            actor_id: new.actor_id,
            action: new.action.as_str().to_string(),
            details: new.details,
            created_at: new.created_at,
        };
        tables.timeline.push(entry.clone());
        Ok(entry)
    }

    async fn list_timeline(&self, ticket_id: i64) -> Result<Vec<TimelineEntry>, StoreError> {
        let tables = self.tables.read().await;
        let mut entries: Vec<TimelineEntry> = tables
            .timeline
            .iter()
            .filter(|e| e.ticket_id == ticket_id)
            .cloned()
            .collect();
        entries.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(entries)
    }
}

#[async_trait]
impl UserStore for MemoryStore {
    async fn insert_user(&self, new: NewUser) -> Result<User, StoreError> {
        let mut tables = self.tables.write().await;
        if tables.users.values().any(|u| u.user.email == new.email) {
            return Err(StoreError::Duplicate(format!("email {} already exists", new.email)));
        }
        let user = User {
            id: next_id(&mut tables.next_user_id),
            email: new.email,
            role: new.role,
            created_at: new.created_at,
        };
        tables.users.insert(
            user.id,
            UserCredentials {
                user: user.clone(),
                password_hash: new.password_hash,
            },
        );
        Ok(user)
    }

    async fn find_user(&self, id: i64) -> Result<Option<User>, StoreError> {
        Ok(self.tables.read().await.users.get(&id).map(|c| c.user.clone()))
    }

    async fn find_credentials(&self, email: &str) -> Result<Option<UserCredentials>, StoreError> {
        Ok(self
            .tables
            .read()
            .await
            .users
            .values()
            .find(|c| c.user.email == email)
            .cloned())
    }
}

#[async_trait]
impl IdempotencyStore for MemoryStore {
    async fn reserve(&self, new: NewIdempotencyRecord) -> Result<Reservation, StoreError> {
        let mut tables = self.tables.write().await;
        if let Some(existing) = tables.idempotency.get(&new.key) {
            return Ok(Reservation::Existing(existing.clone()));
        }
        tables.idempotency.insert(
            new.key.clone(),
            IdempotencyRecord {
                key: new.key,
                method: new.method,
                path: new.path,
                user_id: new.user_id,
                status: None,
                response_body: None,
                created_at: new.created_at,
            },
        );
        Ok(Reservation::Reserved)
    }

    async fn find(&self, key: &str) -> Result<Option<IdempotencyRecord>, StoreError> {
        Ok(self.tables.read().await.idempotency.get(key).cloned())
    }

    async fn complete(&self, key: &str, status: u16, body: Value) -> Result<(), StoreError> {
        let mut tables = self.tables.write().await;
        match tables.idempotency.get_mut(key) {
            Some(record) => {
                record.status = Some(status);
                record.response_body = Some(body);
                Ok(())
            }
            None => Err(StoreError::Backend(format!(
                "idempotency key {key} is not reserved"
            ))),
        }
    }

    async fn release(&self, key: &str) -> Result<(), StoreError> {
        let mut tables = self.tables.write().await;
        if tables
            .idempotency
            .get(key)
            .is_some_and(|record| !record.is_complete())
        {
            tables.idempotency.remove(key);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::security::auth_api::Role;
    use crate::tickets::models::{Priority, TicketStatus};
    use chrono::{Duration, Utc};

    fn new_ticket(requester_id: i64, title: &str) -> NewTicket {
        NewTicket {
            title: title.to_string(),
            description: "details".to_string(),
            status: TicketStatus::Open,
            priority: Priority::Medium,
            requester_id,
            assignee_id: None,
            sla_due_at: None,
            created_at: Utc::now(),
        }
    }

    fn changes_from(ticket: &Ticket) -> TicketChanges {
        TicketChanges {
            title: ticket.title.clone(),
            description: ticket.description.clone(),
            status: ticket.status,
            priority: ticket.priority,
            assignee_id: ticket.assignee_id,
            sla_due_at: ticket.sla_due_at,
            updated_at: Utc::now(),
        }
    }

    fn query() -> TicketQuery {
        TicketQuery {
            limit: 20,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_compare_and_swap() {
        let store = MemoryStore::new();
        let ticket = store.insert_ticket(new_ticket(1, "a")).await.expect("insert");

        let updated = store
            .update_ticket_if_version(ticket.id, 1, changes_from(&ticket))
            .await
            .expect("update");
        assert_eq!(updated.map(|t| t.version), Some(2));

        let stale = store
            .update_ticket_if_version(ticket.id, 1, changes_from(&ticket))
            .await
            .expect("update");
        assert!(stale.is_none());

        let missing = store
            .update_ticket_if_version(404, 1, changes_from(&ticket))
            .await
            .expect("update");
        assert!(missing.is_none());
    }

    #[tokio::test]
    async fn test_search_only_looks_at_latest_comment() {
        let store = MemoryStore::new();
        let ticket = store.insert_ticket(new_ticket(1, "Laptop")).await.expect("insert");
        let base = Utc::now();

        for (offset, body) in [(0, "Battery is SWOLLEN"), (1, "replaced it")] {
            store
                .insert_comment(NewComment {
                    ticket_id: ticket.id,
                    author_id: 1,
                    body: body.to_string(),
                    parent_id: None,
                    created_at: base + Duration::seconds(offset),
                })
                .await
                .expect("comment");
        }

        let mut q = query();
        q.search = Some("swollen".into());
        assert!(store.search_tickets(&q).await.expect("search").is_empty());

        q.search = Some("REPLACED".into());
        assert_eq!(store.search_tickets(&q).await.expect("search").len(), 1);

        q.search = Some("lap".into());
        assert_eq!(store.search_tickets(&q).await.expect("search").len(), 1);
    }

    #[tokio::test]
    async fn test_search_filters_and_order() {
        let store = MemoryStore::new();
        let older = store.insert_ticket(new_ticket(1, "older")).await.expect("insert");
        let newer = store.insert_ticket(new_ticket(2, "newer")).await.expect("insert");
        store
            .set_sla_due_at(older.id, Some(Utc::now() - Duration::hours(1)))
            .await;

        let all = store.search_tickets(&query()).await.expect("all");
        assert_eq!(all.iter().map(|t| t.id).collect::<Vec<_>>(), vec![newer.id, older.id]);

        let mut mine = query();
        mine.requester_id = Some(2);
        assert_eq!(store.search_tickets(&mine).await.expect("mine").len(), 1);

        let mut breached = query();
        breached.breached_before = Some(Utc::now());
        let hits = store.search_tickets(&breached).await.expect("breached");
        assert_eq!(hits.iter().map(|t| t.id).collect::<Vec<_>>(), vec![older.id]);

        let mut paged = query();
        paged.limit = 1;
        paged.offset = 1;
        let page = store.search_tickets(&paged).await.expect("page");
        assert_eq!(page.iter().map(|t| t.id).collect::<Vec<_>>(), vec![older.id]);
    }

    #[tokio::test]
    async fn test_duplicate_email_rejected() {
        let store = MemoryStore::new();
        let new_user = || NewUser {
            email: "a@example.com".into(),
            password_hash: "hash".into(),
            role: Role::User,
            created_at: Utc::now(),
        };
        store.insert_user(new_user()).await.expect("first");
        assert!(matches!(
            store.insert_user(new_user()).await,
            Err(StoreError::Duplicate(_))
        ));
    }

    #[tokio::test]
    async fn test_reservation_lifecycle() {
        let store = MemoryStore::new();
        let record = NewIdempotencyRecord {
            key: "k".into(),
            method: "POST".into(),
            path: "/api/tickets".into(),
            user_id: Some(1),
            created_at: Utc::now(),
        };

        assert_eq!(store.reserve(record.clone()).await.expect("reserve"), Reservation::Reserved);
        assert!(matches!(
            store.reserve(record.clone()).await.expect("reserve"),
            Reservation::Existing(r) if !r.is_complete()
        ));

        store.release("k").await.expect("release");
        assert_eq!(store.reserve(record.clone()).await.expect("reserve"), Reservation::Reserved);

        store
            .complete("k", 200, serde_json::json!({"ok": true}))
            .await
            .expect("complete");
        store.release("k").await.expect("release is a no-op once complete");
        let stored = store.find("k").await.expect("find").expect("exists");
        assert_eq!(stored.status, Some(200));
    }
}
