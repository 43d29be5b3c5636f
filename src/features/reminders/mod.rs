//! # Feature: Reminders
//!
//! Periodic scan-and-dispatch engine for one-shot event reminders. Each armed
//! reminder gets exactly one delivery attempt once its fire time has passed,
//! as long as the event itself is still ahead.
//!
//! - **Version**: 2.0.0
//! - **Since**: 0.1.0
//! - **Toggleable**: false
//!
//! ## Changelog
//! - 2.0.0: Explicit Idle/Running/Stopped loop with overlap guard, bounded fan-out,
//!   conditional disarm, configurable disarm policy
//! - 1.0.0: Minute-by-minute scan with mutate-then-save disarm

pub mod dispatch;
pub mod scheduler;
pub mod selector;
pub mod store;

#[cfg(test)]
pub(crate) mod testing;

pub use dispatch::{
    DeliveryOutcome, DeliveryReport, DisarmOutcome, DisarmPolicy, ReminderDispatcher,
};
pub use scheduler::{CycleOutcome, CycleSummary, LoopState, ReminderScheduler, ReminderSettings};
pub use selector::{is_due, DueReminderSelector};
pub use store::{EventStore, InMemoryStore, OwnerLookup, StoreError};
