//! # Feature: Events
//!
//! Calendar event records with an optional one-shot reminder.
//!
//! - **Version**: 1.1.0
//! - **Since**: 0.1.0
//! - **Toggleable**: false

pub mod model;

pub use model::{Category, Contact, Event, EventUpdate, NewEvent, Reminder, SortField};
