//! # Core Module
//!
//! Configuration and shared helpers for the event planner.
//!
//! - **Version**: 1.1.0
//! - **Since**: 0.1.0
//! - **Toggleable**: false
//!
//! ## Changelog
//! - 1.1.0: Add duration parsing shared by configuration values
//! - 1.0.0: Initial creation with config module

pub mod config;
pub mod duration;

// Re-export commonly used items
pub use config::{Config, NotifierConfig};
pub use duration::{format_duration, parse_duration};
