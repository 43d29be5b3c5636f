//! # Event Records
//!
//! Calendar events, their one-shot reminder, and the owner contact a reminder
//! is delivered to.
//!
//! - **Version**: 1.1.0
//! - **Since**: 0.1.0
//!
//! ## Changelog
//! - 1.1.0: Accept plural category spellings from older clients
//! - 1.0.0: Initial release

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Closed set of event categories
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Category {
    Meeting,
    Birthday,
    Appointment,
    Other,
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Category::Meeting => write!(f, "Meeting"),
            Category::Birthday => write!(f, "Birthday"),
            Category::Appointment => write!(f, "Appointment"),
            Category::Other => write!(f, "Other"),
        }
    }
}

impl std::str::FromStr for Category {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "meeting" | "meetings" => Ok(Category::Meeting),
            "birthday" | "birthdays" => Ok(Category::Birthday),
            "appointment" | "appointments" => Ok(Category::Appointment),
            "other" => Ok(Category::Other),
            _ => Err(anyhow::anyhow!("Invalid event category: {}", s)),
        }
    }
}

/// One-shot reminder attached to an event
///
/// `fire_time` is only meaningful while `armed` is true. An armed reminder
/// without a `fire_time` is never due.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reminder {
    #[serde(default)]
    pub armed: bool,
    #[serde(default)]
    pub fire_time: Option<DateTime<Utc>>,
}

impl Reminder {
    /// An armed reminder firing at `fire_time`
    pub fn at(fire_time: DateTime<Utc>) -> Self {
        Self {
            armed: true,
            fire_time: Some(fire_time),
        }
    }

    /// A reminder that will never fire
    pub fn disarmed() -> Self {
        Self::default()
    }
}

/// A scheduled calendar event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Opaque unique identifier
    pub id: String,

    /// User who owns the event
    pub owner_id: String,

    pub name: String,

    pub description: String,

    /// When the event itself takes place
    pub event_time: DateTime<Utc>,

    pub category: Category,

    pub reminder: Reminder,

    pub created_at: DateTime<Utc>,
}

/// Where a reminder for a user is sent
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contact {
    pub user_id: String,
    pub email: String,
    pub name: String,
}

/// Input for creating an event
#[derive(Debug, Clone, Deserialize)]
pub struct NewEvent {
    pub name: String,
    pub description: String,
    pub event_time: DateTime<Utc>,
    pub category: Category,
    #[serde(default)]
    pub reminder: Reminder,
}

impl NewEvent {
    /// Trim text fields and reject empty ones
    pub fn normalized(mut self) -> Result<Self> {
        self.name = self.name.trim().to_string();
        self.description = self.description.trim().to_string();

        if self.name.is_empty() {
            return Err(anyhow::anyhow!("Event name is required"));
        }
        if self.description.is_empty() {
            return Err(anyhow::anyhow!("Event description is required"));
        }
        Ok(self)
    }
}

/// Partial update of an event; `None` fields are left untouched
#[derive(Debug, Clone, Default, Deserialize)]
pub struct EventUpdate {
    pub name: Option<String>,
    pub description: Option<String>,
    pub event_time: Option<DateTime<Utc>>,
    pub category: Option<Category>,
    pub reminder: Option<Reminder>,
}

impl EventUpdate {
    /// Apply this update to `event`, validating text fields the same way as creation
    pub fn apply_to(&self, event: &mut Event) -> Result<()> {
        if let Some(ref name) = self.name {
            let name = name.trim();
            if name.is_empty() {
                return Err(anyhow::anyhow!("Event name is required"));
            }
            event.name = name.to_string();
        }
        if let Some(ref description) = self.description {
            let description = description.trim();
            if description.is_empty() {
                return Err(anyhow::anyhow!("Event description is required"));
            }
            event.description = description.to_string();
        }
        if let Some(event_time) = self.event_time {
            event.event_time = event_time;
        }
        if let Some(category) = self.category {
            event.category = category;
        }
        if let Some(ref reminder) = self.reminder {
            event.reminder = reminder.clone();
        }
        Ok(())
    }
}

/// Sort order for event listings (always ascending)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SortField {
    #[default]
    EventTime,
    Name,
    Category,
    CreatedAt,
}

impl SortField {
    /// Column backing this sort order
    pub fn column(&self) -> &'static str {
        match self {
            SortField::EventTime => "event_time",
            SortField::Name => "name",
            SortField::Category => "category",
            SortField::CreatedAt => "created_at",
        }
    }
}

impl std::str::FromStr for SortField {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "date" | "event_time" => Ok(SortField::EventTime),
            "name" => Ok(SortField::Name),
            "category" => Ok(SortField::Category),
            "created_at" | "createdat" => Ok(SortField::CreatedAt),
            _ => Err(anyhow::anyhow!("Invalid sort field: {}", s)),
        }
    }
}
