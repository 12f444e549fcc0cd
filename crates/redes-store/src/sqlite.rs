//! SQLite-backed `TicketStore` implementation with durable persistence.

use crate::{
    LocalAction, LocalHistory, LogDirection, LogEntry, LogStatus, NewLogEntry, PageQuery,
    StoreResult, Ticket, TicketKind, TicketStore, TicketStoreError, User,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Persistent SQLite store backend used by the mirroring service.
#[derive(Debug)]
pub struct SqliteTicketStore {
    db_path: PathBuf,
}

impl SqliteTicketStore {
    /// Creates a SQLite-backed store at `path`, creating schema if needed.
    pub fn new(path: impl AsRef<Path>) -> StoreResult<Self> {
        let db_path = path.as_ref().to_path_buf();
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let store = Self { db_path };
        let connection = store.open_connection()?;
        store.initialize_schema(&connection)?;
        Ok(store)
    }

    fn open_connection(&self) -> StoreResult<Connection> {
        let connection = Connection::open(&self.db_path)?;
        connection.busy_timeout(Duration::from_secs(5))?;
        connection.execute_batch(
            r#"
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA foreign_keys = ON;
            "#,
        )?;
        Ok(connection)
    }

    fn initialize_schema(&self, connection: &Connection) -> StoreResult<()> {
        connection.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS tickets (
                primary_key TEXT PRIMARY KEY,
                mirror_key TEXT NOT NULL,
                state TEXT NULL,
                dialog TEXT NULL,
                kind TEXT NOT NULL,
                local_requests_json TEXT NOT NULL,
                local_resolutions_json TEXT NOT NULL,
                local_reports_json TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS logs (
                log_id INTEGER PRIMARY KEY AUTOINCREMENT,
                event_type TEXT NOT NULL,
                ticket_primary_key TEXT NULL,
                direction TEXT NULL,
                payload TEXT NULL,
                status TEXT NOT NULL,
                created_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_logs_ticket ON logs (ticket_primary_key);

            CREATE TABLE IF NOT EXISTS users (
                email TEXT PRIMARY KEY,
                password_digest TEXT NOT NULL,
                role TEXT NOT NULL,
                created_at TEXT NOT NULL
            );
            "#,
        )?;
        Ok(())
    }
}

#[async_trait]
impl TicketStore for SqliteTicketStore {
    async fn insert_ticket(&self, ticket: Ticket) -> StoreResult<()> {
        let mut connection = self.open_connection()?;
        let transaction = connection.transaction()?;

        let exists = transaction
            .query_row(
                "SELECT 1 FROM tickets WHERE primary_key = ?1",
                params![ticket.primary_key],
                |row| row.get::<_, i64>(0),
            )
            .optional()?;
        if exists.is_some() {
            return Err(TicketStoreError::TicketAlreadyExists(ticket.primary_key));
        }

        transaction.execute(
            r#"
            INSERT INTO tickets (
                primary_key, mirror_key, state, dialog, kind, local_requests_json,
                local_resolutions_json, local_reports_json, created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
            "#,
            params![
                ticket.primary_key,
                ticket.mirror_key,
                ticket.state,
                ticket.dialog,
                kind_to_db(ticket.kind),
                serialize_json(&ticket.local_requests)?,
                serialize_json(&ticket.local_resolutions)?,
                serialize_json(&ticket.local_reports)?,
                timestamp_to_db(ticket.created_at),
                timestamp_to_db(ticket.updated_at),
            ],
        )?;
        transaction.commit()?;
        Ok(())
    }

    async fn get_ticket(&self, primary_key: &str) -> StoreResult<Option<Ticket>> {
        let connection = self.open_connection()?;
        read_ticket(&connection, primary_key)
    }

    async fn update_ticket_fields(
        &self,
        primary_key: &str,
        state: Option<String>,
        dialog: Option<String>,
    ) -> StoreResult<Ticket> {
        let mut connection = self.open_connection()?;
        let transaction = connection.transaction()?;

        let Some(mut ticket) = read_ticket(&transaction, primary_key)? else {
            return Err(TicketStoreError::TicketNotFound(primary_key.to_string()));
        };
        if let Some(state) = state {
            ticket.state = Some(state);
        }
        if let Some(dialog) = dialog {
            ticket.dialog = Some(dialog);
        }
        ticket.updated_at = Utc::now();

        transaction.execute(
            "UPDATE tickets SET state = ?1, dialog = ?2, updated_at = ?3 WHERE primary_key = ?4",
            params![
                ticket.state,
                ticket.dialog,
                timestamp_to_db(ticket.updated_at),
                primary_key,
            ],
        )?;
        transaction.commit()?;
        Ok(ticket)
    }

    async fn append_local_action(
        &self,
        primary_key: &str,
        slot: LocalHistory,
        action: LocalAction,
    ) -> StoreResult<()> {
        let column = history_column(slot);
        let mut connection = self.open_connection()?;
        let transaction = connection.transaction()?;

        let stored: Option<String> = transaction
            .query_row(
                &format!("SELECT {column} FROM tickets WHERE primary_key = ?1"),
                params![primary_key],
                |row| row.get(0),
            )
            .optional()?;
        let Some(stored) = stored else {
            return Err(TicketStoreError::TicketNotFound(primary_key.to_string()));
        };

        let mut actions: Vec<LocalAction> = deserialize_json(&stored)?;
        actions.push(action);
        transaction.execute(
            &format!("UPDATE tickets SET {column} = ?1, updated_at = ?2 WHERE primary_key = ?3"),
            params![
                serialize_json(&actions)?,
                timestamp_to_db(Utc::now()),
                primary_key,
            ],
        )?;
        transaction.commit()?;
        Ok(())
    }

    async fn remove_ticket(&self, primary_key: &str) -> StoreResult<bool> {
        let connection = self.open_connection()?;
        let removed = connection.execute(
            "DELETE FROM tickets WHERE primary_key = ?1",
            params![primary_key],
        )?;
        Ok(removed > 0)
    }

    async fn list_tickets(&self, query: PageQuery) -> StoreResult<Vec<Ticket>> {
        let connection = self.open_connection()?;
        let mut statement = connection.prepare(
            r#"
            SELECT
                primary_key, mirror_key, state, dialog, kind, local_requests_json,
                local_resolutions_json, local_reports_json, created_at, updated_at
            FROM tickets
            ORDER BY created_at DESC, rowid DESC
            "#,
        )?;
        let mut rows = statement.query([])?;

        let mut tickets = Vec::new();
        while let Some(row) = rows.next()? {
            tickets.push(ticket_from_columns(
                row.get(0)?,
                row.get(1)?,
                row.get(2)?,
                row.get(3)?,
                row.get::<_, String>(4)?,
                row.get::<_, String>(5)?,
                row.get::<_, String>(6)?,
                row.get::<_, String>(7)?,
                row.get::<_, String>(8)?,
                row.get::<_, String>(9)?,
            )?);
        }

        let start = query.offset.min(tickets.len());
        let mut sliced = tickets.split_off(start);
        if let Some(limit) = query.limit {
            sliced.truncate(limit);
        }
        Ok(sliced)
    }

    async fn append_log(&self, entry: NewLogEntry) -> StoreResult<LogEntry> {
        let connection = self.open_connection()?;
        let created_at = Utc::now();
        connection.execute(
            r#"
            INSERT INTO logs (event_type, ticket_primary_key, direction, payload, status, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
            params![
                entry.event_type,
                entry.ticket_primary_key,
                entry.direction.map(direction_to_db),
                entry.payload,
                log_status_to_db(entry.status),
                timestamp_to_db(created_at),
            ],
        )?;
        let log_id = connection.last_insert_rowid();
        Ok(LogEntry {
            log_id,
            event_type: entry.event_type,
            ticket_primary_key: entry.ticket_primary_key,
            direction: entry.direction,
            payload: entry.payload,
            status: entry.status,
            created_at,
        })
    }

    async fn list_logs(&self, query: PageQuery) -> StoreResult<Vec<LogEntry>> {
        let connection = self.open_connection()?;
        let limit = query.limit.map(|value| value as i64).unwrap_or(-1);
        let mut statement = connection.prepare(
            r#"
            SELECT log_id, event_type, ticket_primary_key, direction, payload, status, created_at
            FROM logs
            ORDER BY log_id DESC
            LIMIT ?1 OFFSET ?2
            "#,
        )?;
        let mut rows = statement.query(params![limit, query.offset as i64])?;

        let mut logs = Vec::new();
        while let Some(row) = rows.next()? {
            logs.push(LogEntry {
                log_id: row.get(0)?,
                event_type: row.get(1)?,
                ticket_primary_key: row.get(2)?,
                direction: option_direction_from_db(row.get(3)?)?,
                payload: row.get(4)?,
                status: log_status_from_db(&row.get::<_, String>(5)?)?,
                created_at: timestamp_from_db(&row.get::<_, String>(6)?)?,
            });
        }
        Ok(logs)
    }

    async fn insert_user(&self, user: User) -> StoreResult<()> {
        let mut connection = self.open_connection()?;
        let transaction = connection.transaction()?;

        let exists = transaction
            .query_row(
                "SELECT 1 FROM users WHERE email = ?1",
                params![user.email],
                |row| row.get::<_, i64>(0),
            )
            .optional()?;
        if exists.is_some() {
            return Err(TicketStoreError::UserAlreadyExists(user.email));
        }

        transaction.execute(
            "INSERT INTO users (email, password_digest, role, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![
                user.email,
                user.password_digest,
                user.role,
                timestamp_to_db(user.created_at),
            ],
        )?;
        transaction.commit()?;
        Ok(())
    }

    async fn get_user(&self, email: &str) -> StoreResult<Option<User>> {
        let connection = self.open_connection()?;
        let row = connection
            .query_row(
                "SELECT email, password_digest, role, created_at FROM users WHERE email = ?1",
                params![email],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                    ))
                },
            )
            .optional()?;
        row.map(|(email, password_digest, role, created_at)| -> StoreResult<User> {
            Ok(User {
                email,
                password_digest,
                role,
                created_at: timestamp_from_db(&created_at)?,
            })
        })
        .transpose()
    }
}

fn read_ticket(connection: &Connection, primary_key: &str) -> StoreResult<Option<Ticket>> {
    let row = connection
        .query_row(
            r#"
            SELECT
                primary_key, mirror_key, state, dialog, kind, local_requests_json,
                local_resolutions_json, local_reports_json, created_at, updated_at
            FROM tickets
            WHERE primary_key = ?1
            "#,
            params![primary_key],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, Option<String>>(2)?,
                    row.get::<_, Option<String>>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, String>(5)?,
                    row.get::<_, String>(6)?,
                    row.get::<_, String>(7)?,
                    row.get::<_, String>(8)?,
                    row.get::<_, String>(9)?,
                ))
            },
        )
        .optional()?;
    row.map(
        |(
            primary_key,
            mirror_key,
            state,
            dialog,
            kind,
            requests_json,
            resolutions_json,
            reports_json,
            created_at,
            updated_at,
        )| {
            ticket_from_columns(
                primary_key,
                mirror_key,
                state,
                dialog,
                kind,
                requests_json,
                resolutions_json,
                reports_json,
                created_at,
                updated_at,
            )
        },
    )
    .transpose()
}

#[allow(clippy::too_many_arguments)]
fn ticket_from_columns(
    primary_key: String,
    mirror_key: String,
    state: Option<String>,
    dialog: Option<String>,
    kind: String,
    requests_json: String,
    resolutions_json: String,
    reports_json: String,
    created_at: String,
    updated_at: String,
) -> StoreResult<Ticket> {
    Ok(Ticket {
        primary_key,
        mirror_key,
        state,
        dialog,
        kind: kind_from_db(&kind)?,
        local_requests: deserialize_json(&requests_json)?,
        local_resolutions: deserialize_json(&resolutions_json)?,
        local_reports: deserialize_json(&reports_json)?,
        created_at: timestamp_from_db(&created_at)?,
        updated_at: timestamp_from_db(&updated_at)?,
    })
}

fn history_column(slot: LocalHistory) -> &'static str {
    match slot {
        LocalHistory::Requests => "local_requests_json",
        LocalHistory::Resolutions => "local_resolutions_json",
        LocalHistory::Reports => "local_reports_json",
    }
}

fn serialize_json<T: Serialize>(value: &T) -> StoreResult<String> {
    serde_json::to_string(value).map_err(TicketStoreError::from)
}

fn deserialize_json<T: DeserializeOwned>(value: &str) -> StoreResult<T> {
    serde_json::from_str(value).map_err(TicketStoreError::from)
}

fn timestamp_to_db(value: DateTime<Utc>) -> String {
    value.to_rfc3339()
}

fn timestamp_from_db(value: &str) -> StoreResult<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(value)?.with_timezone(&Utc))
}

fn kind_to_db(kind: TicketKind) -> &'static str {
    match kind {
        TicketKind::Standard => "standard",
        TicketKind::Bulk => "bulk",
        TicketKind::ScheduledWorks => "scheduled_works",
    }
}

fn kind_from_db(value: &str) -> StoreResult<TicketKind> {
    match value {
        "standard" => Ok(TicketKind::Standard),
        "bulk" => Ok(TicketKind::Bulk),
        "scheduled_works" => Ok(TicketKind::ScheduledWorks),
        _ => Err(TicketStoreError::InvalidPersistedValue {
            field: "kind",
            value: value.to_string(),
        }),
    }
}

fn direction_to_db(direction: LogDirection) -> &'static str {
    match direction {
        LogDirection::In => "in",
        LogDirection::Out => "out",
        LogDirection::Local => "local",
    }
}

fn option_direction_from_db(value: Option<String>) -> StoreResult<Option<LogDirection>> {
    value
        .as_deref()
        .map(|item| match item {
            "in" => Ok(LogDirection::In),
            "out" => Ok(LogDirection::Out),
            "local" => Ok(LogDirection::Local),
            _ => Err(TicketStoreError::InvalidPersistedValue {
                field: "direction",
                value: item.to_string(),
            }),
        })
        .transpose()
}

fn log_status_to_db(status: LogStatus) -> &'static str {
    match status {
        LogStatus::Pending => "pending",
        LogStatus::Success => "success",
        LogStatus::Error => "error",
        LogStatus::RolledBack => "rolled_back",
    }
}

fn log_status_from_db(value: &str) -> StoreResult<LogStatus> {
    match value {
        "pending" => Ok(LogStatus::Pending),
        "success" => Ok(LogStatus::Success),
        "error" => Ok(LogStatus::Error),
        "rolled_back" => Ok(LogStatus::RolledBack),
        _ => Err(TicketStoreError::InvalidPersistedValue {
            field: "log_status",
            value: value.to_string(),
        }),
    }
}
