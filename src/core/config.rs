//! # Configuration
//!
//! Process configuration read once at startup from environment variables
//! (optionally seeded from a `.env` file by the binary). Any invalid value is
//! a startup error.
//!
//! - **Version**: 1.1.0
//! - **Since**: 0.1.0
//!
//! ## Changelog
//! - 1.1.0: Disarm policy, shutdown grace and delivery timeout
//! - 1.0.0: Initial release

use anyhow::{Context, Result};
use std::time::Duration;

use super::duration::parse_duration;
use crate::features::reminders::{DisarmPolicy, ReminderSettings};

/// Which transport delivers reminders
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotifierConfig {
    /// Write reminders to the log only
    Log,
    /// POST reminders to a webhook
    Webhook { url: String },
}

#[derive(Debug, Clone)]
pub struct Config {
    pub database_path: String,
    pub log_level: String,
    pub reminders: ReminderSettings,
    pub notifier: NotifierConfig,
}

impl Config {
    /// Load configuration from the process environment
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration from an arbitrary key lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        let defaults = ReminderSettings::default();

        let database_path = get("DATABASE_PATH").unwrap_or_else(|| "planner.db".to_string());
        let log_level = get("LOG_LEVEL").unwrap_or_else(|| "info".to_string());

        let poll_interval = match get("REMINDER_POLL_INTERVAL") {
            Some(raw) => duration_var("REMINDER_POLL_INTERVAL", &raw)?,
            None => defaults.poll_interval,
        };
        if poll_interval.is_zero() {
            anyhow::bail!("REMINDER_POLL_INTERVAL must be greater than zero");
        }

        let workers = match get("REMINDER_WORKERS") {
            Some(raw) => raw
                .parse::<usize>()
                .with_context(|| format!("Invalid REMINDER_WORKERS: {raw}"))?,
            None => defaults.workers,
        };
        if workers == 0 {
            anyhow::bail!("REMINDER_WORKERS must be at least 1");
        }

        let disarm_policy = match get("REMINDER_DISARM_POLICY") {
            Some(raw) => raw.parse::<DisarmPolicy>()?,
            None => defaults.disarm_policy,
        };

        let shutdown_grace = match get("REMINDER_SHUTDOWN_GRACE") {
            Some(raw) => duration_var("REMINDER_SHUTDOWN_GRACE", &raw)?,
            None => defaults.shutdown_grace,
        };

        let delivery_timeout = match get("REMINDER_DELIVERY_TIMEOUT") {
            Some(raw) => {
                let timeout = duration_var("REMINDER_DELIVERY_TIMEOUT", &raw)?;
                if timeout.is_zero() {
                    anyhow::bail!("REMINDER_DELIVERY_TIMEOUT must be greater than zero");
                }
                Some(timeout)
            }
            None => defaults.delivery_timeout,
        };

        let notifier_kind = get("NOTIFIER").map(|v| v.to_lowercase());
        let notifier = match notifier_kind.as_deref() {
            None | Some("log") => NotifierConfig::Log,
            Some("webhook") => {
                let url = get("NOTIFIER_WEBHOOK_URL").ok_or_else(|| {
                    anyhow::anyhow!("NOTIFIER_WEBHOOK_URL is required when NOTIFIER=webhook")
                })?;
                if !(url.starts_with("http://") || url.starts_with("https://")) {
                    anyhow::bail!("NOTIFIER_WEBHOOK_URL must be an http(s) URL: {url}");
                }
                NotifierConfig::Webhook { url }
            }
            Some(other) => anyhow::bail!("Unknown NOTIFIER: {other} (expected log or webhook)"),
        };

        Ok(Config {
            database_path,
            log_level,
            reminders: ReminderSettings {
                poll_interval,
                workers,
                disarm_policy,
                shutdown_grace,
                delivery_timeout,
            },
            notifier,
        })
    }
}

fn duration_var(key: &str, raw: &str) -> Result<Duration> {
    parse_duration(raw).ok_or_else(|| {
        anyhow::anyhow!("Invalid {key}: {raw} (use forms like 30s, 1m, 1h30m)")
    })
}
