use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TicketStatus {
    #[default]
    Open,
    InProgress,
    Resolved,
    Closed,
}

impl TicketStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::InProgress => "in_progress",
            Self::Resolved => "resolved",
            Self::Closed => "closed",
        }
    }

    /// Stored rows are trusted to hold a known value; anything else reads as `open`.
    pub fn parse_or_open(value: &str) -> Self {
        value.parse().unwrap_or_default()
    }
}

impl std::str::FromStr for TicketStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "open" => Ok(Self::Open),
            "in_progress" => Ok(Self::InProgress),
            "resolved" => Ok(Self::Resolved),
            "closed" => Ok(Self::Closed),
            other => Err(format!(
                "'{other}' is not one of open, in_progress, resolved, closed"
            )),
        }
    }
}

impl fmt::Display for TicketStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    #[default]
    Medium,
    High,
    Urgent,
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Urgent => "urgent",
        }
    }

    pub fn parse_or_medium(value: &str) -> Self {
        value.parse().unwrap_or_default()
    }
}

impl std::str::FromStr for Priority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "low" => Ok(Self::Low),
            "medium" => Ok(Self::Medium),
            "high" => Ok(Self::High),
            "urgent" => Ok(Self::Urgent),
            other => Err(format!("'{other}' is not one of low, medium, high, urgent")),
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ticket {
    pub id: i64,
    pub title: String,
    pub description: String,
    pub status: TicketStatus,
    pub priority: Priority,
    pub requester_id: i64,
    pub assignee_id: Option<i64>,
    pub sla_due_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub version: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Comment {
    pub id: i64,
    pub ticket_id: i64,
    pub author_id: i64,
    pub body: String,
    pub parent_id: Option<i64>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimelineEntry {
    pub id: i64,
    pub ticket_id: i64,
    pub actor_id: Option<i64>,
    pub action: String,
    pub details: Value,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimelineAction {
    TicketCreated,
    TicketUpdated,
    CommentCreated,
}

impl TimelineAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TicketCreated => "ticket.created",
            Self::TicketUpdated => "ticket.updated",
            Self::CommentCreated => "comment.created",
        }
    }
}

#[derive(Debug, Clone)]
pub struct NewTicket {
    pub title: String,
    pub description: String,
    pub status: TicketStatus,
    pub priority: Priority,
    pub requester_id: i64,
    pub assignee_id: Option<i64>,
    pub sla_due_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// Full next state of the mutable columns, written only if the version still matches.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TicketChanges {
    pub title: String,
    pub description: String,
    pub status: TicketStatus,
    pub priority: Priority,
    pub assignee_id: Option<i64>,
    pub sla_due_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewComment {
    pub ticket_id: i64,
    pub author_id: i64,
    pub body: String,
    pub parent_id: Option<i64>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewTimelineEntry {
    pub ticket_id: i64,
    pub actor_id: Option<i64>,
    pub action: TimelineAction,
    pub details: Value,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TicketQuery {
    /// Set for callers who may only see their own tickets.
    pub requester_id: Option<i64>,
    pub status: Option<TicketStatus>,
    pub breached_before: Option<DateTime<Utc>>,
    pub search: Option<String>,
    pub limit: i64,
    pub offset: i64,
}

#[derive(Debug, Default, Deserialize)]
pub struct CreateTicketRequest {
    pub title: Option<String>,
    pub description: Option<String>,
    pub priority: Option<String>,
    pub assignee_id: Option<i64>,
}

#[derive(Debug, Default, Deserialize)]
pub struct UpdateTicketRequest {
    pub version: Option<i64>,
    pub title: Option<String>,
    pub description: Option<String>,
    pub status: Option<String>,
    pub priority: Option<String>,
    /// Absent keeps the assignee, `null` clears it.
    #[serde(default, deserialize_with = "double_option")]
    pub assignee_id: Option<Option<i64>>,
}

#[derive(Debug, Default, Deserialize)]
pub struct CreateCommentRequest {
    pub body: Option<String>,
    pub parent_id: Option<i64>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ListQuery {
    pub search: Option<String>,
    pub status: Option<String>,
    pub limit: Option<String>,
    pub offset: Option<String>,
    pub breached: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TicketResponse {
    pub ticket: Ticket,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TicketPage {
    pub items: Vec<Ticket>,
    pub next_offset: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TicketDetail {
    pub ticket: Ticket,
    pub comments: Vec<Comment>,
    pub timeline: Vec<TimelineEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommentResponse {
    pub comment: Comment,
}

fn double_option<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_wire_names() {
        assert_eq!(serde_json::to_value(TicketStatus::InProgress).ok(), Some("in_progress".into()));
        assert_eq!("resolved".parse::<TicketStatus>().ok(), Some(TicketStatus::Resolved));
        assert!("pending".parse::<TicketStatus>().is_err());
        assert_eq!(TicketStatus::parse_or_open("bogus"), TicketStatus::Open);
    }

    #[test]
    fn test_priority_defaults_to_medium() {
        assert_eq!(Priority::default(), Priority::Medium);
        assert_eq!(Priority::parse_or_medium("critical"), Priority::Medium);
        assert_eq!("urgent".parse::<Priority>().ok(), Some(Priority::Urgent));
    }

    #[test]
    fn test_assignee_merge_patch_semantics() {
        let absent: UpdateTicketRequest = serde_json::from_str(r#"{"version":1}"#).expect("absent");
        assert_eq!(absent.assignee_id, None);

        let cleared: UpdateTicketRequest =
            serde_json::from_str(r#"{"version":1,"assignee_id":null}"#).expect("null");
        assert_eq!(cleared.assignee_id, Some(None));

        let set: UpdateTicketRequest =
            serde_json::from_str(r#"{"version":1,"assignee_id":9}"#).expect("set");
        assert_eq!(set.assignee_id, Some(Some(9)));
    }

    #[test]
    fn test_timeline_action_tags() {
        assert_eq!(TimelineAction::TicketCreated.as_str(), "ticket.created");
        assert_eq!(TimelineAction::TicketUpdated.as_str(), "ticket.updated");
        assert_eq!(TimelineAction::CommentCreated.as_str(), "comment.created");
    }
}
