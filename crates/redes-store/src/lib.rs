//! Ticket store abstractions and in-memory backend.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use thiserror::Error;
use tokio::sync::RwLock;

mod sqlite;

pub use sqlite::SqliteTicketStore;

/// Result type for ticket store operations.
pub type StoreResult<T> = Result<T, TicketStoreError>;

/// Errors returned by store implementations.
#[derive(Debug, Error)]
pub enum TicketStoreError {
    #[error("ticket '{0}' already exists")]
    TicketAlreadyExists(String),
    #[error("ticket '{0}' not found")]
    TicketNotFound(String),
    #[error("user '{0}' already exists")]
    UserAlreadyExists(String),
    #[error("invalid persisted value for '{field}': {value}")]
    InvalidPersistedValue { field: &'static str, value: String },
    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Chrono(#[from] chrono::ParseError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Handling profile for a mirrored ticket.
///
/// The kind is fixed at creation and selects how outbound flows shape their
/// payloads; it never changes the persistence model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TicketKind {
    #[default]
    Standard,
    Bulk,
    ScheduledWorks,
}

impl TicketKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Standard => "standard",
            Self::Bulk => "bulk",
            Self::ScheduledWorks => "scheduled_works",
        }
    }
}

/// Direction of the exchange an event-log entry records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogDirection {
    In,
    Out,
    Local,
}

/// Outcome recorded on an event-log entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogStatus {
    Pending,
    Success,
    Error,
    RolledBack,
}

/// Reference to an attachment captured in a ticket's local history.
///
/// History keeps the attachment name and size only; the content itself is
/// forwarded to the remote authority and never persisted locally.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttachmentRef {
    pub name: String,
    pub mime_type: String,
    pub bytes: usize,
}

/// One operator action recorded against a ticket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocalAction {
    pub recorded_at: DateTime<Utc>,
    pub dialog: Option<String>,
    #[serde(default)]
    pub fields: BTreeMap<String, String>,
    #[serde(default)]
    pub attachments: Vec<AttachmentRef>,
}

impl LocalAction {
    /// Creates an action recorded at the current instant.
    pub fn new(dialog: Option<String>) -> Self {
        Self {
            recorded_at: Utc::now(),
            dialog,
            fields: BTreeMap::new(),
            attachments: Vec::new(),
        }
    }
}

/// Which of the three per-ticket history lists an action belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocalHistory {
    Requests,
    Resolutions,
    Reports,
}

/// Locally mirrored trouble ticket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ticket {
    pub primary_key: String,
    pub mirror_key: String,
    pub state: Option<String>,
    pub dialog: Option<String>,
    pub kind: TicketKind,
    #[serde(default)]
    pub local_requests: Vec<LocalAction>,
    #[serde(default)]
    pub local_resolutions: Vec<LocalAction>,
    #[serde(default)]
    pub local_reports: Vec<LocalAction>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Ticket {
    /// Creates a ticket with empty histories, timestamped at the current instant.
    pub fn new(
        primary_key: impl Into<String>,
        mirror_key: impl Into<String>,
        kind: TicketKind,
    ) -> Self {
        let now = Utc::now();
        Self {
            primary_key: primary_key.into(),
            mirror_key: mirror_key.into(),
            state: None,
            dialog: None,
            kind,
            local_requests: Vec::new(),
            local_resolutions: Vec::new(),
            local_reports: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    fn history_mut(&mut self, slot: LocalHistory) -> &mut Vec<LocalAction> {
        match slot {
            LocalHistory::Requests => &mut self.local_requests,
            LocalHistory::Resolutions => &mut self.local_resolutions,
            LocalHistory::Reports => &mut self.local_reports,
        }
    }
}

/// Event-log entry submitted for appending; the store assigns id and timestamp.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewLogEntry {
    pub event_type: String,
    pub ticket_primary_key: Option<String>,
    pub direction: Option<LogDirection>,
    pub payload: Option<String>,
    pub status: LogStatus,
}

impl NewLogEntry {
    pub fn new(event_type: impl Into<String>, status: LogStatus) -> Self {
        Self {
            event_type: event_type.into(),
            ticket_primary_key: None,
            direction: None,
            payload: None,
            status,
        }
    }

    pub fn with_ticket(mut self, primary_key: impl Into<String>) -> Self {
        self.ticket_primary_key = Some(primary_key.into());
        self
    }

    pub fn with_direction(mut self, direction: LogDirection) -> Self {
        self.direction = Some(direction);
        self
    }

    pub fn with_payload(mut self, payload: impl Into<String>) -> Self {
        self.payload = Some(payload.into());
        self
    }
}

/// Persisted event-log entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub log_id: i64,
    pub event_type: String,
    pub ticket_primary_key: Option<String>,
    pub direction: Option<LogDirection>,
    pub payload: Option<String>,
    pub status: LogStatus,
    pub created_at: DateTime<Utc>,
}

/// Operator account able to drive outbound flows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub email: String,
    pub password_digest: String,
    pub role: String,
    pub created_at: DateTime<Utc>,
}

impl User {
    pub fn new(
        email: impl Into<String>,
        password_digest: impl Into<String>,
        role: impl Into<String>,
    ) -> Self {
        Self {
            email: email.into(),
            password_digest: password_digest.into(),
            role: role.into(),
            created_at: Utc::now(),
        }
    }
}

/// Paging window for list queries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageQuery {
    pub limit: Option<usize>,
    pub offset: usize,
}

/// Async store contract shared by the server, flows, and reconciler.
///
/// List operations return newest-first so callers see recent activity on the
/// first page without extra ordering parameters.
#[async_trait]
pub trait TicketStore: Send + Sync {
    async fn insert_ticket(&self, ticket: Ticket) -> StoreResult<()>;
    async fn get_ticket(&self, primary_key: &str) -> StoreResult<Option<Ticket>>;
    /// Overwrites the given fields and bumps `updated_at`. `None` leaves a
    /// field untouched.
    async fn update_ticket_fields(
        &self,
        primary_key: &str,
        state: Option<String>,
        dialog: Option<String>,
    ) -> StoreResult<Ticket>;
    async fn append_local_action(
        &self,
        primary_key: &str,
        slot: LocalHistory,
        action: LocalAction,
    ) -> StoreResult<()>;
    /// Removes a ticket, returning whether it existed. Log entries that
    /// reference the primary key are kept; the log is append-only.
    async fn remove_ticket(&self, primary_key: &str) -> StoreResult<bool>;
    async fn list_tickets(&self, query: PageQuery) -> StoreResult<Vec<Ticket>>;
    async fn append_log(&self, entry: NewLogEntry) -> StoreResult<LogEntry>;
    async fn list_logs(&self, query: PageQuery) -> StoreResult<Vec<LogEntry>>;
    async fn insert_user(&self, user: User) -> StoreResult<()>;
    async fn get_user(&self, email: &str) -> StoreResult<Option<User>>;
}

/// In-memory implementation for tests and local experimentation.
#[derive(Debug, Default)]
pub struct InMemoryTicketStore {
    inner: RwLock<StoreInner>,
}

#[derive(Debug, Default)]
struct StoreInner {
    tickets: HashMap<String, Ticket>,
    ticket_order: Vec<String>,
    logs: Vec<LogEntry>,
    next_log_id: i64,
    users: HashMap<String, User>,
}

impl InMemoryTicketStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TicketStore for InMemoryTicketStore {
    async fn insert_ticket(&self, ticket: Ticket) -> StoreResult<()> {
        let mut inner = self.inner.write().await;
        if inner.tickets.contains_key(&ticket.primary_key) {
            return Err(TicketStoreError::TicketAlreadyExists(ticket.primary_key));
        }
        inner.ticket_order.push(ticket.primary_key.clone());
        inner.tickets.insert(ticket.primary_key.clone(), ticket);
        Ok(())
    }

    async fn get_ticket(&self, primary_key: &str) -> StoreResult<Option<Ticket>> {
        let inner = self.inner.read().await;
        Ok(inner.tickets.get(primary_key).cloned())
    }

    async fn update_ticket_fields(
        &self,
        primary_key: &str,
        state: Option<String>,
        dialog: Option<String>,
    ) -> StoreResult<Ticket> {
        let mut inner = self.inner.write().await;
        let Some(ticket) = inner.tickets.get_mut(primary_key) else {
            return Err(TicketStoreError::TicketNotFound(primary_key.to_string()));
        };
        if let Some(state) = state {
            ticket.state = Some(state);
        }
        if let Some(dialog) = dialog {
            ticket.dialog = Some(dialog);
        }
        ticket.updated_at = Utc::now();
        Ok(ticket.clone())
    }

    async fn append_local_action(
        &self,
        primary_key: &str,
        slot: LocalHistory,
        action: LocalAction,
    ) -> StoreResult<()> {
        let mut inner = self.inner.write().await;
        let Some(ticket) = inner.tickets.get_mut(primary_key) else {
            return Err(TicketStoreError::TicketNotFound(primary_key.to_string()));
        };
        ticket.history_mut(slot).push(action);
        ticket.updated_at = Utc::now();
        Ok(())
    }

    async fn remove_ticket(&self, primary_key: &str) -> StoreResult<bool> {
        let mut inner = self.inner.write().await;
        let existed = inner.tickets.remove(primary_key).is_some();
        if existed {
            inner.ticket_order.retain(|key| key != primary_key);
        }
        Ok(existed)
    }

    async fn list_tickets(&self, query: PageQuery) -> StoreResult<Vec<Ticket>> {
        let inner = self.inner.read().await;
        let tickets = inner
            .ticket_order
            .iter()
            .rev()
            .filter_map(|key| inner.tickets.get(key))
            .skip(query.offset)
            .take(query.limit.unwrap_or(usize::MAX))
            .cloned()
            .collect();
        Ok(tickets)
    }

    async fn append_log(&self, entry: NewLogEntry) -> StoreResult<LogEntry> {
        let mut inner = self.inner.write().await;
        inner.next_log_id += 1;
        let persisted = LogEntry {
            log_id: inner.next_log_id,
            event_type: entry.event_type,
            ticket_primary_key: entry.ticket_primary_key,
            direction: entry.direction,
            payload: entry.payload,
            status: entry.status,
            created_at: Utc::now(),
        };
        inner.logs.push(persisted.clone());
        Ok(persisted)
    }

    async fn list_logs(&self, query: PageQuery) -> StoreResult<Vec<LogEntry>> {
        let inner = self.inner.read().await;
        let logs = inner
            .logs
            .iter()
            .rev()
            .skip(query.offset)
            .take(query.limit.unwrap_or(usize::MAX))
            .cloned()
            .collect();
        Ok(logs)
    }

    async fn insert_user(&self, user: User) -> StoreResult<()> {
        let mut inner = self.inner.write().await;
        if inner.users.contains_key(&user.email) {
            return Err(TicketStoreError::UserAlreadyExists(user.email));
        }
        inner.users.insert(user.email.clone(), user);
        Ok(())
    }

    async fn get_user(&self, email: &str) -> StoreResult<Option<User>> {
        let inner = self.inner.read().await;
        Ok(inner.users.get(email).cloned())
    }
}
