// Event records and the CRUD-facing input types
pub mod events;

// Delivery transports
pub mod notifications;

// Reminder engine
pub mod reminders;

pub use events::{Category, Contact, Event, EventUpdate, NewEvent, Reminder, SortField};
pub use notifications::{DeliveryError, LogNotifier, Notifier, WebhookNotifier};
pub use reminders::{
    DeliveryReport, DisarmPolicy, EventStore, InMemoryStore, OwnerLookup, ReminderScheduler,
    ReminderSettings, StoreError,
};
