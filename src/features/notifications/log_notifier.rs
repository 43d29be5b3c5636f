//! Log-only transport, for local runs and deployments without a relay

use async_trait::async_trait;
use log::info;

use super::{DeliveryError, Notifier, ReminderMessage};
use crate::features::events::{Contact, Event};

/// Writes each rendered reminder to the log instead of sending it
#[derive(Debug, Clone, Default)]
pub struct LogNotifier;

impl LogNotifier {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Notifier for LogNotifier {
    fn name(&self) -> &'static str {
        "log"
    }

    async fn deliver(&self, contact: &Contact, event: &Event) -> Result<(), DeliveryError> {
        let message = ReminderMessage::render(contact, event);
        info!(
            "📨 Reminder for event {} to {}: {}\n{}",
            event.id, message.to, message.subject, message.body
        );
        Ok(())
    }
}
