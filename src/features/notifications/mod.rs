//! # Feature: Notifications
//!
//! Transports that deliver a due reminder to the event owner. The reminder
//! engine only sees the [`Notifier`] trait; concrete transports are chosen at
//! startup from configuration.
//!
//! - **Version**: 1.2.0
//! - **Since**: 0.2.0
//! - **Toggleable**: false
//!
//! ## Changelog
//! - 1.2.0: Webhook transport
//! - 1.1.0: Shared message rendering for all transports
//! - 1.0.0: Initial release with log transport

pub mod log_notifier;
pub mod message;
pub mod webhook;

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

use crate::features::events::{Contact, Event};

pub use log_notifier::LogNotifier;
pub use message::ReminderMessage;
pub use webhook::WebhookNotifier;

/// Why a delivery attempt failed
#[derive(Debug, Error)]
pub enum DeliveryError {
    /// Could not reach the transport (network, DNS, TLS, ...)
    #[error("transport error: {0}")]
    Transport(String),

    /// Transport answered but refused the message
    #[error("rejected: {0}")]
    Rejected(String),

    /// The attempt did not finish within the configured bound
    #[error("timed out after {0:?}")]
    Timeout(Duration),
}

/// Delivers a reminder for `event` to `contact`
///
/// Implementations may be slow or fail transiently. Callers treat every
/// returned error as final for this attempt; retry policy lives in the
/// reminder engine, not here.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Short transport name used in logs
    fn name(&self) -> &'static str;

    async fn deliver(&self, contact: &Contact, event: &Event) -> Result<(), DeliveryError>;
}
