// Core layer - configuration and shared helpers
pub mod core;

// Features layer - events, notifications and the reminder engine
pub mod features;

// Infrastructure
pub mod database;

pub use core::Config;
pub use database::Database;

pub use features::{
    // Events
    Category, Contact, Event, EventUpdate, NewEvent, Reminder, SortField,
    // Notifications
    DeliveryError, LogNotifier, Notifier, WebhookNotifier,
    // Reminders
    DeliveryReport, DisarmPolicy, EventStore, InMemoryStore, OwnerLookup, ReminderScheduler,
    ReminderSettings, StoreError,
};
