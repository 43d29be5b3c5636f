//! Due-reminder selection
//!
//! A reminder is due when it is armed, its fire time has passed, and the
//! event itself is still ahead. Reminders for events that already happened
//! are never delivered.

use chrono::{DateTime, Utc};
use log::{debug, warn};
use std::collections::HashSet;
use std::sync::Arc;

use super::store::{EventStore, StoreError};
use crate::features::events::Event;

/// `armed && fire_time <= now && event_time > now`
///
/// An armed reminder without a fire time is never due.
pub fn is_due(event: &Event, now: DateTime<Utc>) -> bool {
    let fired = matches!(event.reminder.fire_time, Some(fire_time) if fire_time <= now);
    event.reminder.armed && fired && event.event_time > now
}

/// Reads the set of due events from an [`EventStore`]
#[derive(Clone)]
pub struct DueReminderSelector {
    store: Arc<dyn EventStore>,
}

impl DueReminderSelector {
    pub fn new(store: Arc<dyn EventStore>) -> Self {
        Self { store }
    }

    /// Every event due at `now`, at most once per id, in no particular order
    ///
    /// The store's answer is re-checked against [`is_due`], so an adapter
    /// with a looser query never causes an ineligible dispatch.
    pub async fn select(&self, now: DateTime<Utc>) -> Result<Vec<Event>, StoreError> {
        let candidates = self.store.find_due(now).await?;
        let returned = candidates.len();

        let mut seen = HashSet::with_capacity(returned);
        let due: Vec<Event> = candidates
            .into_iter()
            .filter(|event| is_due(event, now))
            .filter(|event| seen.insert(event.id.clone()))
            .collect();

        if due.len() != returned {
            warn!(
                "Store returned {} candidate reminders, {} remain after filtering",
                returned,
                due.len()
            );
        }
        debug!("Selected {} due reminder(s) at {}", due.len(), now);

        Ok(due)
    }
}
