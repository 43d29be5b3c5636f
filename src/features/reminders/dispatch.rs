//! Deliver-then-disarm for a single due event
//!
//! The sequence per event is: resolve the owner, attempt delivery, then
//! disarm according to [`DisarmPolicy`]. Nothing in here returns an error to
//! the caller; every failure is folded into a [`DeliveryReport`].
//!
//! With the default [`DisarmPolicy::Always`] a reminder is consumed by the
//! attempt, not by a successful send: a transient notifier outage silences
//! that reminder for good. This is the established behaviour and is kept on
//! purpose. [`DisarmPolicy::OnSuccess`] switches to retrying on the next
//! cycle instead.

use anyhow::Result;
use log::{info, warn};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

use super::store::{EventStore, OwnerLookup};
use crate::features::events::{Contact, Event};
use crate::features::notifications::{DeliveryError, Notifier};

/// When a reminder is disarmed relative to the delivery result
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub enum DisarmPolicy {
    /// Disarm after every attempt, successful or not (at most one attempt)
    #[default]
    Always,
    /// Disarm only after a successful delivery; failures retry next cycle
    OnSuccess,
}

impl std::fmt::Display for DisarmPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DisarmPolicy::Always => write!(f, "always"),
            DisarmPolicy::OnSuccess => write!(f, "on_success"),
        }
    }
}

impl std::str::FromStr for DisarmPolicy {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "always" => Ok(DisarmPolicy::Always),
            "on_success" | "on-success" => Ok(DisarmPolicy::OnSuccess),
            _ => Err(anyhow::anyhow!("Invalid disarm policy: {}", s)),
        }
    }
}

/// What happened to the notification for one event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DeliveryOutcome {
    Delivered,
    DeliveryFailed,
    /// Owner no longer exists; nothing was sent
    OwnerMissing,
    /// Owner could not be resolved because the store failed; nothing was sent
    OwnerLookupFailed,
}

impl std::fmt::Display for DeliveryOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeliveryOutcome::Delivered => write!(f, "delivered"),
            DeliveryOutcome::DeliveryFailed => write!(f, "delivery_failed"),
            DeliveryOutcome::OwnerMissing => write!(f, "owner_missing"),
            DeliveryOutcome::OwnerLookupFailed => write!(f, "owner_lookup_failed"),
        }
    }
}

/// What happened to the reminder record after the delivery step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DisarmOutcome {
    /// Reminder flipped from armed to disarmed
    Applied,
    /// Event was deleted or already disarmed; nothing changed
    NoChange,
    /// Not attempted (owner unresolved, or policy kept it armed)
    Skipped,
    /// Store write failed; the reminder may fire again next cycle
    Failed,
}

impl std::fmt::Display for DisarmOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DisarmOutcome::Applied => write!(f, "applied"),
            DisarmOutcome::NoChange => write!(f, "no_change"),
            DisarmOutcome::Skipped => write!(f, "skipped"),
            DisarmOutcome::Failed => write!(f, "failed"),
        }
    }
}

/// One record per attempted event, emitted to logs and subscribers
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeliveryReport {
    pub event_id: String,
    pub outcome: DeliveryOutcome,
    pub disarm: DisarmOutcome,
    pub reason: Option<String>,
}

impl DeliveryReport {
    fn log(&self) {
        let reason = self.reason.as_deref().unwrap_or("-");
        match (self.outcome, self.disarm) {
            (DeliveryOutcome::Delivered, DisarmOutcome::Applied | DisarmOutcome::NoChange) => {
                info!(
                    "Reminder event_id={} outcome={} disarm={}",
                    self.event_id, self.outcome, self.disarm
                );
            }
            _ => {
                warn!(
                    "Reminder event_id={} outcome={} disarm={} reason={}",
                    self.event_id, self.outcome, self.disarm, reason
                );
            }
        }
    }
}

/// Runs deliver-then-disarm for individual events
pub struct ReminderDispatcher {
    store: Arc<dyn EventStore>,
    owners: Arc<dyn OwnerLookup>,
    notifier: Arc<dyn Notifier>,
    policy: DisarmPolicy,
    delivery_timeout: Option<Duration>,
}

impl ReminderDispatcher {
    pub fn new(
        store: Arc<dyn EventStore>,
        owners: Arc<dyn OwnerLookup>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            store,
            owners,
            notifier,
            policy: DisarmPolicy::default(),
            delivery_timeout: None,
        }
    }

    pub fn with_policy(mut self, policy: DisarmPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Bound each delivery attempt; an overrun counts as a failed delivery
    pub fn with_delivery_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.delivery_timeout = timeout;
        self
    }

    /// Deliver the reminder for `event`, then disarm it per policy
    pub async fn process(&self, event: &Event) -> DeliveryReport {
        let report = self.run(event).await;
        report.log();
        report
    }

    async fn run(&self, event: &Event) -> DeliveryReport {
        let contact = match self.owners.get_contact(&event.owner_id).await {
            Ok(Some(contact)) => contact,
            Ok(None) => {
                return DeliveryReport {
                    event_id: event.id.clone(),
                    outcome: DeliveryOutcome::OwnerMissing,
                    disarm: DisarmOutcome::Skipped,
                    reason: Some(format!("owner {} not found", event.owner_id)),
                };
            }
            Err(e) => {
                return DeliveryReport {
                    event_id: event.id.clone(),
                    outcome: DeliveryOutcome::OwnerLookupFailed,
                    disarm: DisarmOutcome::Skipped,
                    reason: Some(e.to_string()),
                };
            }
        };

        let delivery = self.deliver(&contact, event).await;
        let (outcome, mut reason) = match delivery {
            Ok(()) => (DeliveryOutcome::Delivered, None),
            Err(e) => (DeliveryOutcome::DeliveryFailed, Some(e.to_string())),
        };

        let should_disarm = match self.policy {
            DisarmPolicy::Always => true,
            DisarmPolicy::OnSuccess => outcome == DeliveryOutcome::Delivered,
        };

        let disarm = if !should_disarm {
            DisarmOutcome::Skipped
        } else {
            match self.store.conditional_disarm(&event.id).await {
                Ok(true) => DisarmOutcome::Applied,
                Ok(false) => DisarmOutcome::NoChange,
                Err(e) => {
                    let disarm_reason = format!("disarm failed: {e}");
                    reason = Some(match reason {
                        Some(existing) => format!("{existing}; {disarm_reason}"),
                        None => disarm_reason,
                    });
                    DisarmOutcome::Failed
                }
            }
        };

        DeliveryReport {
            event_id: event.id.clone(),
            outcome,
            disarm,
            reason,
        }
    }

    async fn deliver(&self, contact: &Contact, event: &Event) -> Result<(), DeliveryError> {
        match self.delivery_timeout {
            Some(limit) => {
                match tokio::time::timeout(limit, self.notifier.deliver(contact, event)).await {
                    Ok(result) => result,
                    Err(_) => Err(DeliveryError::Timeout(limit)),
                }
            }
            None => self.notifier.deliver(contact, event).await,
        }
    }
}
