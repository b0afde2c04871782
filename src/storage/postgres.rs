use async_trait::async_trait;
use chrono::{DateTime, Utc};
use diesel::dsl::sql;
use diesel::prelude::*;
use diesel::sql_types::{Bool, Text};
use serde_json::Value;

use super::StoreError;
use crate::auth::users::{NewUser, User, UserCredentials, UserStore};
use crate::core::config::DatabaseConfig;
use crate::core::shared::schema::{comments, idempotency_keys, tickets, timeline, users};
use crate::core::shared::utils::{create_conn, like_pattern, DbPool};
use crate::idempotency::{IdempotencyRecord, IdempotencyStore, NewIdempotencyRecord, Reservation};
use crate::security::auth_api::Role;
use crate::tickets::models::{
    Comment, NewComment, NewTicket, NewTimelineEntry, Priority, Ticket, TicketChanges,
    TicketQuery, TicketStatus, TimelineEntry,
};
use crate::tickets::store::TicketStore;

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = tickets)]
struct TicketRow {
    id: i64,
    title: String,
    description: String,
    status: String,
    priority: String,
    requester_id: i64,
    assignee_id: Option<i64>,
    sla_due_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    version: i64,
}

impl From<TicketRow> for Ticket {
    fn from(row: TicketRow) -> Self {
        Self {
            id: row.id,
            title: row.title,
            description: row.description,
            status: TicketStatus::parse_or_open(&row.status),
            priority: Priority::parse_or_medium(&row.priority),
            requester_id: row.requester_id,
            assignee_id: row.assignee_id,
            sla_due_at: row.sla_due_at,
            created_at: row.created_at,
            updated_at: row.updated_at,
            version: row.version,
        }
    }
}

#[derive(Insertable)]
#[diesel(table_name = tickets)]
struct NewTicketRow<'a> {
    title: &'a str,
    description: &'a str,
    status: &'a str,
    priority: &'a str,
    requester_id: i64,
    assignee_id: Option<i64>,
    sla_due_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    version: i64,
}

#[derive(AsChangeset)]
#[diesel(table_name = tickets, treat_none_as_null = true)]
struct TicketChangesRow<'a> {
    title: &'a str,
    description: &'a str,
    status: &'a str,
    priority: &'a str,
    assignee_id: Option<i64>,
    sla_due_at: Option<DateTime<Utc>>,
    updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = comments)]
struct CommentRow {
    id: i64,
    ticket_id: i64,
    author_id: i64,
    body: String,
    parent_id: Option<i64>,
    created_at: DateTime<Utc>,
}

impl From<CommentRow> for Comment {
    fn from(row: CommentRow) -> Self {
        Self {
            id: row.id,
            ticket_id: row.ticket_id,
            author_id: row.author_id,
            body: row.body,
            parent_id: row.parent_id,
            created_at: row.created_at,
        }
    }
}

#[derive(Insertable)]
#[diesel(table_name = comments)]
struct NewCommentRow<'a> {
    ticket_id: i64,
    author_id: i64,
    body: &'a str,
    parent_id: Option<i64>,
    created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = timeline)]
struct TimelineRow {
    id: i64,
    ticket_id: i64,
    actor_id: Option<i64>,
    action: String,
    details: Value,
    created_at: DateTime<Utc>,
}

impl From<TimelineRow> for TimelineEntry {
    fn from(row: TimelineRow) -> Self {
        Self {
            id: row.id,
            ticket_id: row.ticket_id,
            actor_id: row.actor_id,
            action: row.action,
            details: row.details,
            created_at: row.created_at,
        }
    }
}

#[derive(Insertable)]
#[diesel(table_name = timeline)]
struct NewTimelineRow<'a> {
    ticket_id: i64,
    actor_id: Option<i64>,
    action: &'a str,
    details: Value,
    created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = users)]
struct UserRow {
    id: i64,
    email: String,
    password_hash: String,
    role: String,
    created_at: DateTime<Utc>,
}

impl From<UserRow> for UserCredentials {
    fn from(row: UserRow) -> Self {
        Self {
            user: User {
                id: row.id,
                email: row.email,
                role: Role::parse_or_user(&row.role),
                created_at: row.created_at,
            },
            password_hash: row.password_hash,
        }
    }
}

#[derive(Insertable)]
#[diesel(table_name = users)]
struct NewUserRow<'a> {
    email: &'a str,
    password_hash: &'a str,
    role: &'a str,
    created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = idempotency_keys)]
struct IdempotencyRow {
    key: String,
    method: String,
    path: String,
    user_id: Option<i64>,
    response_body: Option<Value>,
    status: Option<i32>,
    created_at: DateTime<Utc>,
}

impl From<IdempotencyRow> for IdempotencyRecord {
    fn from(row: IdempotencyRow) -> Self {
        Self {
            key: row.key,
            method: row.method,
            path: row.path,
            user_id: row.user_id,
            status: row.status.and_then(|s| u16::try_from(s).ok()),
            response_body: row.response_body,
            created_at: row.created_at,
        }
    }
}

#[derive(Insertable)]
#[diesel(table_name = idempotency_keys)]
struct NewIdempotencyRow<'a> {
    key: &'a str,
    method: &'a str,
    path: &'a str,
    user_id: Option<i64>,
    created_at: DateTime<Utc>,
}

/// Postgres-backed store. Every call checks a connection out of the r2d2
/// pool and runs the blocking diesel query on tokio's blocking pool.
#[derive(Clone)]
pub struct PgStore {
    pool: DbPool,
}

impl std::fmt::Debug for PgStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PgStore")
            .field("connections", &self.pool.state().connections)
            .finish()
    }
}

impl PgStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub fn connect(config: &DatabaseConfig) -> Result<Self, StoreError> {
        Ok(Self::new(create_conn(config)?))
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }

    async fn interact<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&mut PgConnection) -> Result<T, StoreError> + Send + 'static,
        T: Send + 'static,
    {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = pool.get()?;
            f(&mut conn)
        })
        .await?
    }
}

#[async_trait]
impl TicketStore for PgStore {
    async fn insert_ticket(&self, new: NewTicket) -> Result<Ticket, StoreError> {
        self.interact(move |conn| {
            let row = NewTicketRow {
                title: &new.title,
                description: &new.description,
                status: new.status.as_str(),
                priority: new.priority.as_str(),
                requester_id: new.requester_id,
                assignee_id: new.assignee_id,
                sla_due_at: new.sla_due_at,
                created_at: new.created_at,
                updated_at: new.created_at,
                version: 1,
            };
            let inserted: TicketRow = diesel::insert_into(tickets::table)
                .values(&row)
                .returning(TicketRow::as_returning())
                .get_result(conn)?;
            Ok(inserted.into())
        })
        .await
    }

    async fn get_ticket(&self, id: i64) -> Result<Option<Ticket>, StoreError> {
        self.interact(move |conn| {
            let row = tickets::table
                .find(id)
                .select(TicketRow::as_select())
                .first::<TicketRow>(conn)
                .optional()?;
            Ok(row.map(Ticket::from))
        })
        .await
    }

    async fn update_ticket_if_version(
        &self,
        id: i64,
        expected_version: i64,
        changes: TicketChanges,
    ) -> Result<Option<Ticket>, StoreError> {
        self.interact(move |conn| {
            let row = TicketChangesRow {
                title: &changes.title,
                description: &changes.description,
                status: changes.status.as_str(),
                priority: changes.priority.as_str(),
                assignee_id: changes.assignee_id,
                sla_due_at: changes.sla_due_at,
                updated_at: changes.updated_at,
            };

            let updated = diesel::update(
                tickets::table
                    .filter(tickets::id.eq(id))
                    .filter(tickets::version.eq(expected_version)),
            )
            .set((&row, tickets::version.eq(tickets::version + 1)))
            .returning(TicketRow::as_returning())
            .get_result::<TicketRow>(conn)
            .optional()?;

            Ok(updated.map(Ticket::from))
        })
        .await
    }

    async fn search_tickets(&self, query: &TicketQuery) -> Result<Vec<Ticket>, StoreError> {
        let query = query.clone();
        self.interact(move |conn| {
            let mut db_query = tickets::table.into_boxed();

            if let Some(requester_id) = query.requester_id {
                db_query = db_query.filter(tickets::requester_id.eq(requester_id));
            }
            if let Some(status) = query.status {
                db_query = db_query.filter(tickets::status.eq(status.as_str()));
            }
            if let Some(before) = query.breached_before {
                db_query = db_query.filter(tickets::sla_due_at.lt(before));
            }
            if let Some(search) = query.search.as_deref() {
                let term = like_pattern(search);
                let latest_comment = sql::<Bool>(
                    "COALESCE((SELECT c.body FROM comments c WHERE c.ticket_id = tickets.id \
                     ORDER BY c.created_at DESC, c.id DESC LIMIT 1), '') ILIKE ",
                )
                .bind::<Text, _>(term.clone());

                db_query = db_query.filter(
                    tickets::title
                        .ilike(term.clone())
                        .or(tickets::description.ilike(term))
                        .or(latest_comment),
                );
            }

            let rows: Vec<TicketRow> = db_query
                .order((tickets::created_at.desc(), tickets::id.desc()))
                .limit(query.limit)
                .offset(query.offset)
                .select(TicketRow::as_select())
                .load(conn)?;

            Ok(rows.into_iter().map(Ticket::from).collect())
        })
        .await
    }

    async fn insert_comment(&self, new: NewComment) -> Result<Comment, StoreError> {
        self.interact(move |conn| {
            let row = NewCommentRow {
                ticket_id: new.ticket_id,
                author_id: new.author_id,
                body: &new.body,
                parent_id: new.parent_id,
                created_at: new.created_at,
            };
            let inserted: CommentRow = diesel::insert_into(comments::table)
                .values(&row)
                .returning(CommentRow::as_returning())
                .get_result(conn)?;
            Ok(inserted.into())
        })
        .await
    }

    async fn list_comments(&self, ticket_id: i64) -> Result<Vec<Comment>, StoreError> {
        self.interact(move |conn| {
            let rows: Vec<CommentRow> = comments::table
                .filter(comments::ticket_id.eq(ticket_id))
                .order((comments::created_at.asc(), comments::id.asc()))
                .select(CommentRow::as_select())
                .load(conn)?;
            Ok(rows.into_iter().map(Comment::from).collect())
        })
        .await
    }

    async fn append_timeline(&self, new: NewTimelineEntry) -> Result<TimelineEntry, StoreError> {
        self.interact(move |conn| {
            let row = NewTimelineRow {
                ticket_id: new.ticket_id,
                actor_id: new.actor_id,
                action: new.action.as_str(),
                details: new.details,
                created_at: new.created_at,
            };
            let inserted: TimelineRow = diesel::insert_into(timeline::table)
                .values(&row)
                .returning(TimelineRow::as_returning())
                .get_result(conn)?;
            Ok(inserted.into())
        })
        .await
    }

    async fn list_timeline(&self, ticket_id: i64) -> Result<Vec<TimelineEntry>, StoreError> {
        self.interact(move |conn| {
            let rows: Vec<TimelineRow> = timeline::table
                .filter(timeline::ticket_id.eq(ticket_id))
                .order((timeline::created_at.asc(), timeline::id.asc()))
                .select(TimelineRow::as_select())
                .load(conn)?;
            Ok(rows.into_iter().map(TimelineEntry::from).collect())
        })
        .await
    }
}

#[async_trait]
impl UserStore for PgStore {
    async fn insert_user(&self, new: NewUser) -> Result<User, StoreError> {
        self.interact(move |conn| {
            let row = NewUserRow {
                email: &new.email,
                password_hash: &new.password_hash,
                role: new.role.as_str(),
                created_at: new.created_at,
            };
            let inserted: UserRow = diesel::insert_into(users::table)
                .values(&row)
                .returning(UserRow::as_returning())
                .get_result(conn)?;
            Ok(UserCredentials::from(inserted).user)
        })
        .await
    }

    async fn find_user(&self, id: i64) -> Result<Option<User>, StoreError> {
        self.interact(move |conn| {
            let row = users::table
                .find(id)
                .select(UserRow::as_select())
                .first::<UserRow>(conn)
                .optional()?;
            Ok(row.map(|r| UserCredentials::from(r).user))
        })
        .await
    }

    async fn find_credentials(&self, email: &str) -> Result<Option<UserCredentials>, StoreError> {
        let email = email.to_string();
        self.interact(move |conn| {
            let row = users::table
                .filter(users::email.eq(&email))
                .select(UserRow::as_select())
                .first::<UserRow>(conn)
                .optional()?;
            Ok(row.map(UserCredentials::from))
        })
        .await
    }
}

/// Bounded so a key that is released and re-taken in a tight loop cannot spin forever.
const RESERVE_ATTEMPTS: usize = 3;

#[async_trait]
impl IdempotencyStore for PgStore {
    async fn reserve(&self, new: NewIdempotencyRecord) -> Result<Reservation, StoreError> {
        self.interact(move |conn| {
            let row = NewIdempotencyRow {
                key: &new.key,
                method: &new.method,
                path: &new.path,
                user_id: new.user_id,
                created_at: new.created_at,
            };

            for _ in 0..RESERVE_ATTEMPTS {
                let inserted = diesel::insert_into(idempotency_keys::table)
                    .values(&row)
                    .on_conflict(idempotency_keys::key)
                    .do_nothing()
                    .execute(conn)?;
                if inserted == 1 {
                    return Ok(Reservation::Reserved);
                }

                let existing = idempotency_keys::table
                    .filter(idempotency_keys::key.eq(&new.key))
                    .select(IdempotencyRow::as_select())
                    .first::<IdempotencyRow>(conn)
                    .optional()?;
                if let Some(existing) = existing {
                    return Ok(Reservation::Existing(existing.into()));
                }
            }

            Err(StoreError::Backend(format!(
                "idempotency key {} changed hands during reservation",
                new.key
            )))
        })
        .await
    }

    async fn find(&self, key: &str) -> Result<Option<IdempotencyRecord>, StoreError> {
        let key = key.to_string();
        self.interact(move |conn| {
            let row = idempotency_keys::table
                .filter(idempotency_keys::key.eq(&key))
                .select(IdempotencyRow::as_select())
                .first::<IdempotencyRow>(conn)
                .optional()?;
            Ok(row.map(IdempotencyRecord::from))
        })
        .await
    }

    async fn complete(&self, key: &str, status: u16, body: Value) -> Result<(), StoreError> {
        let key = key.to_string();
        self.interact(move |conn| {
            let updated = diesel::update(
                idempotency_keys::table.filter(idempotency_keys::key.eq(&key)),
            )
            .set((
                idempotency_keys::status.eq(Some(i32::from(status))),
                idempotency_keys::response_body.eq(Some(body)),
            ))
            .execute(conn)?;

            if updated == 0 {
                return Err(StoreError::Backend(format!(
                    "idempotency key {key} is not reserved"
                )));
            }
            Ok(())
        })
        .await
    }

    async fn release(&self, key: &str) -> Result<(), StoreError> {
        let key = key.to_string();
        self.interact(move |conn| {
            diesel::delete(
                idempotency_keys::table
                    .filter(idempotency_keys::key.eq(&key))
                    .filter(idempotency_keys::status.is_null()),
            )
            .execute(conn)?;
            Ok(())
        })
        .await
    }
}
