//! Storage seams consumed by the reminder engine
//!
//! The engine never talks to a database directly. It reads due events and
//! disarms reminders through [`EventStore`], and resolves owners through
//! [`OwnerLookup`]. [`crate::database::Database`] implements both for SQLite;
//! [`InMemoryStore`] implements both on top of `DashMap`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::sync::Arc;
use thiserror::Error;

use super::selector::is_due;
use crate::features::events::{Contact, Event};

/// Failure of the backing store
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store query failed: {0}")]
    Query(String),

    #[error("store write failed: {0}")]
    Write(String),

    #[error("corrupt record {id}: {reason}")]
    Corrupt { id: String, reason: String },
}

/// Query and conditional-update capability over event records
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Events whose reminder is armed, whose fire time is at or before `now`,
    /// and whose event time is after `now`. Order is unspecified.
    async fn find_due(&self, now: DateTime<Utc>) -> Result<Vec<Event>, StoreError>;

    /// Flip the reminder of `event_id` from armed to disarmed.
    ///
    /// Returns `true` only if this call changed the record. A missing event or
    /// an already-disarmed reminder yields `Ok(false)`.
    async fn conditional_disarm(&self, event_id: &str) -> Result<bool, StoreError>;
}

/// Resolves an event owner to a deliverable contact
#[async_trait]
pub trait OwnerLookup: Send + Sync {
    /// `Ok(None)` when the user no longer exists
    async fn get_contact(&self, user_id: &str) -> Result<Option<Contact>, StoreError>;
}

/// Process-local store, shared by cloning
#[derive(Debug, Clone, Default)]
pub struct InMemoryStore {
    events: Arc<DashMap<String, Event>>,
    contacts: Arc<DashMap<String, Contact>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace an event
    pub fn upsert_event(&self, event: Event) {
        self.events.insert(event.id.clone(), event);
    }

    /// Insert or replace a contact
    pub fn upsert_contact(&self, contact: Contact) {
        self.contacts.insert(contact.user_id.clone(), contact);
    }

    pub fn remove_event(&self, event_id: &str) -> Option<Event> {
        self.events.remove(event_id).map(|(_, event)| event)
    }

    pub fn remove_contact(&self, user_id: &str) -> Option<Contact> {
        self.contacts.remove(user_id).map(|(_, contact)| contact)
    }

    pub fn event(&self, event_id: &str) -> Option<Event> {
        self.events.get(event_id).map(|entry| entry.value().clone())
    }
}

#[async_trait]
impl EventStore for InMemoryStore {
    async fn find_due(&self, now: DateTime<Utc>) -> Result<Vec<Event>, StoreError> {
        Ok(self
            .events
            .iter()
            .filter(|entry| is_due(entry.value(), now))
            .map(|entry| entry.value().clone())
            .collect())
    }

    async fn conditional_disarm(&self, event_id: &str) -> Result<bool, StoreError> {
        match self.events.get_mut(event_id) {
            Some(mut entry) if entry.reminder.armed => {
                entry.reminder.armed = false;
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

#[async_trait]
impl OwnerLookup for InMemoryStore {
    async fn get_contact(&self, user_id: &str) -> Result<Option<Contact>, StoreError> {
        Ok(self.contacts.get(user_id).map(|entry| entry.value().clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::reminders::testing::{contact, event_with_reminder};
    use chrono::Duration;

    #[tokio::test]
    async fn test_find_due_filters_by_predicate() {
        let store = InMemoryStore::new();
        let now = Utc::now();

        store.upsert_event(event_with_reminder(
            "due",
            "u1",
            true,
            Some(now - Duration::seconds(1)),
            now + Duration::hours(1),
        ));
        store.upsert_event(event_with_reminder(
            "future",
            "u1",
            true,
            Some(now + Duration::hours(1)),
            now + Duration::hours(2),
        ));
        store.upsert_event(event_with_reminder(
            "disarmed",
            "u1",
            false,
            Some(now - Duration::seconds(1)),
            now + Duration::hours(1),
        ));

        let due = store.find_due(now).await.unwrap();

        assert_eq!(due.len(), 1);
        assert_eq!(due[0].id, "due");
    }

    #[tokio::test]
    async fn test_conditional_disarm_is_idempotent() {
        let store = InMemoryStore::new();
        let now = Utc::now();
        store.upsert_event(event_with_reminder(
            "e1",
            "u1",
            true,
            Some(now),
            now + Duration::hours(1),
        ));

        assert!(store.conditional_disarm("e1").await.unwrap());
        assert!(!store.conditional_disarm("e1").await.unwrap());
        assert!(!store.event("e1").unwrap().reminder.armed);
    }

    #[tokio::test]
    async fn test_conditional_disarm_missing_event_is_noop() {
        let store = InMemoryStore::new();
        assert!(!store.conditional_disarm("gone").await.unwrap());
    }

    #[tokio::test]
    async fn test_owner_lookup() {
        let store = InMemoryStore::new();
        store.upsert_contact(contact("u1"));

        assert_eq!(
            store.get_contact("u1").await.unwrap().map(|c| c.email),
            Some("u1@example.com".to_string())
        );
        assert!(store.get_contact("u2").await.unwrap().is_none());

        store.remove_contact("u1");
        assert!(store.get_contact("u1").await.unwrap().is_none());
    }
}
