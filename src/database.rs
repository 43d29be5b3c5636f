//! # SQLite Storage
//!
//! Persistent store for users and events. Implements the reminder engine's
//! [`EventStore`] and [`OwnerLookup`] seams, plus the owner-scoped event
//! management used by the CRUD layer.
//!
//! Timestamps are stored as Unix milliseconds (UTC).
//!
//! - **Version**: 1.3.0
//! - **Since**: 0.1.0
//!
//! ## Changelog
//! - 1.3.0: Conditional disarm replaces read-modify-write of reminder state
//! - 1.2.0: Upcoming events and sorted listings
//! - 1.1.0: Owner-scoped event updates and deletes
//! - 1.0.0: Initial schema

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use sqlite::{Connection, State, Statement, Value};
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::features::events::{Category, Contact, Event, EventUpdate, NewEvent, Reminder, SortField};
use crate::features::reminders::{EventStore, OwnerLookup, StoreError};

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS users (
        id TEXT PRIMARY KEY,
        email TEXT NOT NULL UNIQUE,
        name TEXT NOT NULL,
        created_at INTEGER NOT NULL
    );

    CREATE TABLE IF NOT EXISTS events (
        id TEXT PRIMARY KEY,
        user_id TEXT NOT NULL,
        name TEXT NOT NULL,
        description TEXT NOT NULL,
        event_time INTEGER NOT NULL,
        category TEXT NOT NULL,
        reminder_enabled INTEGER NOT NULL DEFAULT 0,
        reminder_time INTEGER,
        created_at INTEGER NOT NULL
    );

    CREATE INDEX IF NOT EXISTS idx_events_user_time ON events(user_id, event_time);
    CREATE INDEX IF NOT EXISTS idx_events_category ON events(category);
    CREATE INDEX IF NOT EXISTS idx_events_reminder ON events(reminder_enabled);
";

const EVENT_COLUMNS: &str = "id, user_id, name, description, event_time, category, \
     reminder_enabled, reminder_time, created_at";

#[derive(Clone)]
pub struct Database {
    connection: Arc<Mutex<Connection>>,
}

impl Database {
    /// Open (or create) the database at `path` and ensure the schema exists
    pub async fn new(path: &str) -> Result<Self> {
        let connection = sqlite::open(path)?;
        connection.execute(SCHEMA)?;
        info!("📦 Database ready at {path}");

        Ok(Database {
            connection: Arc::new(Mutex::new(connection)),
        })
    }

    /// A private in-memory database, mostly for tests
    pub async fn in_memory() -> Result<Self> {
        Self::new(":memory:").await
    }

    /// Run `f` against the connection on the blocking pool so slow queries
    /// never stall a runtime worker
    async fn with_connection<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let connection = self.connection.clone();
        tokio::task::spawn_blocking(move || {
            let conn = connection.blocking_lock();
            f(&conn)
        })
        .await?
    }

    // ---------------------------------------------------------------------
    // Users
    // ---------------------------------------------------------------------

    pub async fn create_user(&self, email: &str, name: &str) -> Result<Contact> {
        let email = email.trim();
        let name = name.trim();
        if email.is_empty() || name.is_empty() {
            return Err(anyhow::anyhow!("User email and name are required"));
        }

        let contact = Contact {
            user_id: Uuid::new_v4().to_string(),
            email: email.to_string(),
            name: name.to_string(),
        };

        let conn = self.connection.lock().await;
        let mut statement =
            conn.prepare("INSERT INTO users (id, email, name, created_at) VALUES (?, ?, ?, ?)")?;
        statement.bind((1, contact.user_id.as_str()))?;
        statement.bind((2, contact.email.as_str()))?;
        statement.bind((3, contact.name.as_str()))?;
        statement.bind((4, Utc::now().timestamp_millis()))?;
        statement.next()?;

        debug!("Created user {}", contact.user_id);
        Ok(contact)
    }

    pub async fn delete_user(&self, user_id: &str) -> Result<bool> {
        let conn = self.connection.lock().await;
        let mut statement = conn.prepare("DELETE FROM users WHERE id = ?")?;
        statement.bind((1, user_id))?;
        statement.next()?;
        Ok(conn.change_count() > 0)
    }

    // ---------------------------------------------------------------------
    // Events
    // ---------------------------------------------------------------------

    /// Create an event owned by `owner_id`
    pub async fn create_event(&self, owner_id: &str, input: NewEvent) -> Result<Event> {
        let input = input.normalized()?;
        let id = Uuid::new_v4().to_string();

        let conn = self.connection.lock().await;
        let mut statement = conn.prepare(format!(
            "INSERT INTO events ({EVENT_COLUMNS}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)"
        ))?;
        statement.bind((1, id.as_str()))?;
        statement.bind((2, owner_id))?;
        statement.bind((3, input.name.as_str()))?;
        statement.bind((4, input.description.as_str()))?;
        statement.bind((5, input.event_time.timestamp_millis()))?;
        statement.bind((6, input.category.to_string().as_str()))?;
        statement.bind((7, input.reminder.armed as i64))?;
        statement.bind((8, optional_millis(input.reminder.fire_time)))?;
        statement.bind((9, Utc::now().timestamp_millis()))?;
        statement.next()?;
        drop(statement);

        info!("Created event {id} for user {owner_id}");
        fetch_event(&conn, owner_id, &id)?
            .ok_or_else(|| anyhow::anyhow!("Event {id} missing right after insert"))
    }

    pub async fn get_event(&self, owner_id: &str, event_id: &str) -> Result<Option<Event>> {
        let conn = self.connection.lock().await;
        fetch_event(&conn, owner_id, event_id)
    }

    /// All events of `owner_id`, optionally filtered by category, ascending by `sort`
    pub async fn list_events(
        &self,
        owner_id: &str,
        category: Option<Category>,
        sort: SortField,
    ) -> Result<Vec<Event>> {
        let conn = self.connection.lock().await;
        let category_filter = if category.is_some() {
            " AND category = ?"
        } else {
            ""
        };
        let mut statement = conn.prepare(format!(
            "SELECT {EVENT_COLUMNS} FROM events WHERE user_id = ?{category_filter} ORDER BY {} ASC",
            sort.column()
        ))?;
        statement.bind((1, owner_id))?;
        if let Some(category) = category {
            statement.bind((2, category.to_string().as_str()))?;
        }
        read_events(&mut statement)
    }

    /// Events of `owner_id` happening at or after `now`, soonest first
    pub async fn upcoming_events(&self, owner_id: &str, now: DateTime<Utc>) -> Result<Vec<Event>> {
        let conn = self.connection.lock().await;
        let mut statement = conn.prepare(format!(
            "SELECT {EVENT_COLUMNS} FROM events WHERE user_id = ? AND event_time >= ? \
             ORDER BY event_time ASC"
        ))?;
        statement.bind((1, owner_id))?;
        statement.bind((2, now.timestamp_millis()))?;
        read_events(&mut statement)
    }

    /// Apply a partial update; `Ok(None)` if the event does not exist for this owner
    ///
    /// This is the only path that can re-arm a consumed reminder.
    pub async fn update_event(
        &self,
        owner_id: &str,
        event_id: &str,
        update: &EventUpdate,
    ) -> Result<Option<Event>> {
        let conn = self.connection.lock().await;
        let Some(mut event) = fetch_event(&conn, owner_id, event_id)? else {
            return Ok(None);
        };
        update.apply_to(&mut event)?;

        let mut statement = conn.prepare(
            "UPDATE events SET name = ?, description = ?, event_time = ?, category = ?, \
             reminder_enabled = ?, reminder_time = ? WHERE id = ? AND user_id = ?",
        )?;
        statement.bind((1, event.name.as_str()))?;
        statement.bind((2, event.description.as_str()))?;
        statement.bind((3, event.event_time.timestamp_millis()))?;
        statement.bind((4, event.category.to_string().as_str()))?;
        statement.bind((5, event.reminder.armed as i64))?;
        statement.bind((6, optional_millis(event.reminder.fire_time)))?;
        statement.bind((7, event_id))?;
        statement.bind((8, owner_id))?;
        statement.next()?;
        drop(statement);

        if conn.change_count() == 0 {
            return Ok(None);
        }
        info!("Updated event {event_id} for user {owner_id}");
        fetch_event(&conn, owner_id, event_id)
    }

    /// Delete an event; `false` if it did not exist for this owner
    pub async fn delete_event(&self, owner_id: &str, event_id: &str) -> Result<bool> {
        let conn = self.connection.lock().await;
        let mut statement = conn.prepare("DELETE FROM events WHERE id = ? AND user_id = ?")?;
        statement.bind((1, event_id))?;
        statement.bind((2, owner_id))?;
        statement.next()?;
        drop(statement);

        let deleted = conn.change_count() > 0;
        if deleted {
            info!("Deleted event {event_id} for user {owner_id}");
        }
        Ok(deleted)
    }
}

#[async_trait]
impl EventStore for Database {
    async fn find_due(&self, now: DateTime<Utc>) -> Result<Vec<Event>, StoreError> {
        self.with_connection(move |conn| query_due(conn, now))
            .await
            .map_err(|e| StoreError::Query(e.to_string()))
    }

    async fn conditional_disarm(&self, event_id: &str) -> Result<bool, StoreError> {
        let event_id = event_id.to_string();
        self.with_connection(move |conn| disarm(conn, &event_id))
            .await
            .map_err(|e| StoreError::Write(e.to_string()))
    }
}

#[async_trait]
impl OwnerLookup for Database {
    async fn get_contact(&self, user_id: &str) -> Result<Option<Contact>, StoreError> {
        let user_id = user_id.to_string();
        self.with_connection(move |conn| fetch_contact(conn, &user_id))
            .await
            .map_err(|e| StoreError::Query(e.to_string()))
    }
}

fn query_due(conn: &Connection, now: DateTime<Utc>) -> Result<Vec<Event>> {
    let now = now.timestamp_millis();
    let mut statement = conn.prepare(format!(
        "SELECT {EVENT_COLUMNS} FROM events \
         WHERE reminder_enabled = 1 AND reminder_time IS NOT NULL \
         AND reminder_time <= ? AND event_time > ?"
    ))?;
    statement.bind((1, now))?;
    statement.bind((2, now))?;

    // A row that fails to decode is skipped so it cannot hold back everyone else's reminders
    let mut events = Vec::new();
    while let State::Row = statement.next()? {
        match read_event(&statement) {
            Ok(event) => events.push(event),
            Err(e) => {
                let id = statement
                    .read::<String, _>("id")
                    .unwrap_or_else(|_| "<unreadable id>".to_string());
                warn!("Skipping due reminder for event {id}: {e}");
            }
        }
    }
    Ok(events)
}

fn disarm(conn: &Connection, event_id: &str) -> Result<bool> {
    let mut statement =
        conn.prepare("UPDATE events SET reminder_enabled = 0 WHERE id = ? AND reminder_enabled = 1")?;
    statement.bind((1, event_id))?;
    statement.next()?;
    drop(statement);
    Ok(conn.change_count() > 0)
}

fn fetch_contact(conn: &Connection, user_id: &str) -> Result<Option<Contact>> {
    let mut statement = conn.prepare("SELECT id, email, name FROM users WHERE id = ?")?;
    statement.bind((1, user_id))?;

    if let State::Row = statement.next()? {
        Ok(Some(Contact {
            user_id: statement.read::<String, _>("id")?,
            email: statement.read::<String, _>("email")?,
            name: statement.read::<String, _>("name")?,
        }))
    } else {
        Ok(None)
    }
}

fn fetch_event(conn: &Connection, owner_id: &str, event_id: &str) -> Result<Option<Event>> {
    let mut statement = conn.prepare(format!(
        "SELECT {EVENT_COLUMNS} FROM events WHERE id = ? AND user_id = ?"
    ))?;
    statement.bind((1, event_id))?;
    statement.bind((2, owner_id))?;
    Ok(read_events(&mut statement)?.into_iter().next())
}

fn read_events(statement: &mut Statement<'_>) -> Result<Vec<Event>> {
    let mut events = Vec::new();
    while let State::Row = statement.next()? {
        events.push(read_event(statement)?);
    }
    Ok(events)
}

fn read_event(statement: &Statement<'_>) -> Result<Event> {
    let id = statement.read::<String, _>("id")?;
    let category = statement.read::<String, _>("category")?;
    let category = category
        .parse::<Category>()
        .map_err(|e| corrupt(&id, e.to_string()))?;

    let fire_time = match statement.read::<Value, _>("reminder_time")? {
        Value::Integer(ms) => Some(from_millis(&id, ms)?),
        Value::Null => None,
        other => return Err(corrupt(&id, format!("unexpected reminder_time {other:?}"))),
    };

    Ok(Event {
        owner_id: statement.read::<String, _>("user_id")?,
        name: statement.read::<String, _>("name")?,
        description: statement.read::<String, _>("description")?,
        event_time: from_millis(&id, statement.read::<i64, _>("event_time")?)?,
        category,
        reminder: Reminder {
            armed: statement.read::<i64, _>("reminder_enabled")? != 0,
            fire_time,
        },
        created_at: from_millis(&id, statement.read::<i64, _>("created_at")?)?,
        id,
    })
}

fn optional_millis(time: Option<DateTime<Utc>>) -> Value {
    match time {
        Some(time) => Value::Integer(time.timestamp_millis()),
        None => Value::Null,
    }
}

fn from_millis(id: &str, ms: i64) -> Result<DateTime<Utc>> {
    DateTime::<Utc>::from_timestamp_millis(ms)
        .ok_or_else(|| corrupt(id, format!("timestamp {ms} out of range")))
}

fn corrupt(id: &str, reason: String) -> anyhow::Error {
    StoreError::Corrupt {
        id: id.to_string(),
        reason,
    }
    .into()
}
