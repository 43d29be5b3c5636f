//! Reminder message rendering shared by all transports

use serde::Serialize;

use crate::features::events::{Contact, Event};

/// Format used for event dates in reminder bodies
const DATE_FORMAT: &str = "%Y-%m-%d %H:%M UTC";

/// A rendered reminder, ready to hand to a transport
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReminderMessage {
    /// Recipient address
    pub to: String,
    pub subject: String,
    pub body: String,
}

impl ReminderMessage {
    /// Render the reminder for `event` addressed to `contact`
    pub fn render(contact: &Contact, event: &Event) -> Self {
        let mut body = format!("Hi {},\n\n", contact.name);
        body.push_str("This is a reminder for your upcoming event:\n\n");
        body.push_str(&format!("{}\n", event.name));
        body.push_str(&format!("Description: {}\n", event.description));
        body.push_str(&format!(
            "Date: {}\n",
            event.event_time.format(DATE_FORMAT)
        ));
        body.push_str(&format!("Category: {}\n", event.category));

        Self {
            to: contact.email.clone(),
            subject: format!("Reminder: {}", event.name),
            body,
        }
    }
}
