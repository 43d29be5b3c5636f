//! Test doubles shared by the reminder engine tests

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{Notify, Semaphore};

use crate::features::events::{Category, Contact, Event, Reminder};
use crate::features::notifications::{DeliveryError, Notifier};
use crate::features::reminders::store::{InMemoryStore, OwnerLookup, StoreError};

pub fn event_with_reminder(
    id: &str,
    owner_id: &str,
    armed: bool,
    fire_time: Option<DateTime<Utc>>,
    event_time: DateTime<Utc>,
) -> Event {
    Event {
        id: id.to_string(),
        owner_id: owner_id.to_string(),
        name: format!("Event {id}"),
        description: "Test event".to_string(),
        event_time,
        category: Category::Meeting,
        reminder: Reminder { armed, fire_time },
        created_at: Utc::now(),
    }
}

pub fn contact(user_id: &str) -> Contact {
    Contact {
        user_id: user_id.to_string(),
        email: format!("{user_id}@example.com"),
        name: user_id.to_uppercase(),
    }
}

/// Owner directory that errors for the configured user ids
pub struct UnreachableOwners {
    pub inner: InMemoryStore,
    pub unreachable: HashSet<String>,
}

impl UnreachableOwners {
    pub fn new(inner: InMemoryStore, user_ids: &[&str]) -> Self {
        Self {
            inner,
            unreachable: user_ids.iter().map(|id| id.to_string()).collect(),
        }
    }
}

#[async_trait]
impl OwnerLookup for UnreachableOwners {
    async fn get_contact(&self, user_id: &str) -> Result<Option<Contact>, StoreError> {
        if self.unreachable.contains(user_id) {
            return Err(StoreError::Query("directory offline".to_string()));
        }
        self.inner.get_contact(user_id).await
    }
}

/// Records every delivery; fails for the configured event ids
#[derive(Default)]
pub struct RecordingNotifier {
    delivered: Mutex<Vec<String>>,
    failing: HashSet<String>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_for(ids: &[&str]) -> Self {
        Self {
            delivered: Mutex::new(Vec::new()),
            failing: ids.iter().map(|id| id.to_string()).collect(),
        }
    }

    /// Event ids passed to `deliver`, including failed attempts
    pub fn attempts(&self) -> Vec<String> {
        self.delivered.lock().unwrap().clone()
    }

    pub fn attempts_for(&self, event_id: &str) -> usize {
        self.attempts().iter().filter(|id| *id == event_id).count()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    fn name(&self) -> &'static str {
        "recording"
    }

    async fn deliver(&self, _contact: &Contact, event: &Event) -> Result<(), DeliveryError> {
        self.delivered.lock().unwrap().push(event.id.clone());
        if self.failing.contains(&event.id) {
            return Err(DeliveryError::Transport("relay unavailable".to_string()));
        }
        Ok(())
    }
}

/// Blocks every delivery until a permit is released through `open`
pub struct GatedNotifier {
    gate: Semaphore,
    entered: Notify,
    calls: AtomicUsize,
}

impl GatedNotifier {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            gate: Semaphore::new(0),
            entered: Notify::new(),
            calls: AtomicUsize::new(0),
        })
    }

    /// Let `n` blocked deliveries through
    pub fn open(&self, n: usize) {
        self.gate.add_permits(n);
    }

    /// Resolves once a delivery has started
    pub async fn wait_entered(&self) {
        self.entered.notified().await;
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Notifier for GatedNotifier {
    fn name(&self) -> &'static str {
        "gated"
    }

    async fn deliver(&self, _contact: &Contact, _event: &Event) -> Result<(), DeliveryError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.entered.notify_one();
        let permit = self
            .gate
            .acquire()
            .await
            .map_err(|e| DeliveryError::Transport(e.to_string()))?;
        permit.forget();
        Ok(())
    }
}
