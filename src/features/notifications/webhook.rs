//! HTTP webhook transport
//!
//! POSTs a JSON payload per reminder to a relay (mail gateway, chat webhook,
//! ...). Any non-2xx answer is a failed delivery.

use async_trait::async_trait;
use log::debug;
use serde::Serialize;
use std::time::Duration;

use super::{DeliveryError, Notifier, ReminderMessage};
use crate::features::events::{Contact, Event};

const USER_AGENT: &str = concat!("event-planner/", env!("CARGO_PKG_VERSION"));

/// Request timeout applied by the HTTP client itself
const REQUEST_TIMEOUT_SECS: u64 = 30;

/// JSON body sent to the webhook
#[derive(Debug, Serialize)]
pub struct WebhookPayload<'a> {
    pub event_id: &'a str,
    pub user_id: &'a str,
    pub to: &'a str,
    pub subject: &'a str,
    pub body: &'a str,
    pub event_time: String,
    pub category: String,
}

/// Delivers reminders by POSTing to a configured URL
#[derive(Debug, Clone)]
pub struct WebhookNotifier {
    client: reqwest::Client,
    url: String,
}

impl WebhookNotifier {
    pub fn new(url: impl Into<String>) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .user_agent(USER_AGENT)
            .build()?;

        Ok(Self {
            client,
            url: url.into(),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    fn payload<'a>(
        contact: &'a Contact,
        event: &'a Event,
        message: &'a ReminderMessage,
    ) -> WebhookPayload<'a> {
        WebhookPayload {
            event_id: &event.id,
            user_id: &contact.user_id,
            to: &message.to,
            subject: &message.subject,
            body: &message.body,
            event_time: event.event_time.to_rfc3339(),
            category: event.category.to_string(),
        }
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    fn name(&self) -> &'static str {
        "webhook"
    }

    async fn deliver(&self, contact: &Contact, event: &Event) -> Result<(), DeliveryError> {
        let message = ReminderMessage::render(contact, event);
        let payload = Self::payload(contact, event, &message);

        let resp = self
            .client
            .post(&self.url)
            .json(&payload)
            .send()
            .await
            .map_err(|e| DeliveryError::Transport(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(DeliveryError::Rejected(format!("HTTP {status}")));
        }

        debug!("Webhook accepted reminder for event {} ({status})", event.id);
        Ok(())
    }
}
